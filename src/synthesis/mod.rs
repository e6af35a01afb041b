//! # 基于区域的 Petri 网合成
//!
//! [`Synthesizer`] 依次求解所有分离问题：
//! 1. 每个 ESSP 实例（状态 × 在该状态不可发生的事件），先复用已找到的区域，再交给分离策略；
//! 2. 除非只要求事件分离，按已有区域的标识对状态增量划分，对仍未分开的状态对求解 SSP；
//! 3. 用必需区域 + 贪心覆盖做一次廉价的最小化。
//!
//! 未能求解的实例不是错误，而是结果的一部分：[`SynthesisResult`] 记录失败的 ESSP（事件 → 状态）
//! 以及不可分离状态的划分。每个区域在合成网中对应一个库所，每个事件对应一个变迁。

pub mod minimize;
pub mod overapproximate;

use std::rc::Rc;

use bitflags::bitflags;
use indexmap::IndexMap;
use num::{BigInt, ToPrimitive};
use petgraph::unionfind::UnionFind;
use thiserror::Error;

use crate::cancel::{CancelToken, Interrupted};
use crate::config::SynthConfig;
use crate::net::{Net, Place, Transition, TransitionId, Weight};
use crate::properties::PnProperties;
use crate::regions::{InvalidRegion, Region, RegionUtility};
use crate::separation::{
    Dispatcher, Separation, SeparationContext, SeparationCtor, SeparationError, default_strategies,
};
use crate::ts::{StateId, TransitionSystem, TsError, UnfoldingError, limited_unfolding};

pub use minimize::{minimize_cheap, minimize_with_backend};
pub use overapproximate::overapproximate;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SynthesisFlags: u8 {
        /// Stop at the first unsolved separation instance.
        const QUICK_FAIL = 1 << 0;
        /// Skip state separation.
        const ONLY_EVENTS = 1 << 1;
        /// Run the backend tier of the minimizer.
        const MINIMIZE = 1 << 2;
        /// Log every region found.
        const VERBOSE = 1 << 3;
        /// Synthesize up to language equivalence on the limited unfolding.
        const LANGUAGE_EQUIVALENCE = 1 << 4;
        /// Relax the input until it becomes synthesizable.
        const OVERAPPROXIMATE = 1 << 5;
    }
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("invalid seed region: {0}")]
    InvalidRegion(#[from] InvalidRegion),
    #[error(transparent)]
    Separation(#[from] SeparationError),
    #[error("unsupported properties: {0}")]
    UnsupportedProperties(String),
    #[error("value {0} does not fit into a place weight")]
    WeightOverflow(BigInt),
    #[error(transparent)]
    Ts(#[from] TsError),
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

impl From<UnfoldingError> for SynthesisError {
    fn from(err: UnfoldingError) -> Self {
        match err {
            UnfoldingError::Ts(err) => SynthesisError::Ts(err),
            UnfoldingError::Interrupted(err) => SynthesisError::Interrupted(err),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SynthesisResult {
    utility: Rc<RegionUtility>,
    properties: PnProperties,
    regions: Vec<Region>,
    failed_events: IndexMap<usize, Vec<StateId>>,
    failed_states: Vec<Vec<StateId>>,
    strategies: Vec<&'static str>,
    inconclusive: usize,
}

impl SynthesisResult {
    pub fn is_success(&self) -> bool {
        self.failed_events.is_empty() && self.failed_states.is_empty()
    }

    /// Utility of the system actually synthesized (unfolded or relaxed inputs differ from the original).
    pub fn utility(&self) -> &Rc<RegionUtility> {
        &self.utility
    }

    pub fn properties(&self) -> PnProperties {
        self.properties
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Unsolved event/state separation instances, by event index.
    pub fn failed_event_separation(&self) -> &IndexMap<usize, Vec<StateId>> {
        &self.failed_events
    }

    /// Classes of mutually unseparated states (each with at least two states).
    pub fn failed_state_separation(&self) -> &[Vec<StateId>] {
        &self.failed_states
    }

    pub fn strategies(&self) -> &[&'static str] {
        &self.strategies
    }

    /// Failed instances the constraint backend gave up on; a failure is only a proof when this is 0.
    pub fn inconclusive(&self) -> usize {
        self.inconclusive
    }

    pub(crate) fn with_regions(mut self, regions: Vec<Region>) -> Self {
        self.regions = regions;
        self
    }

    /// One place per region, one transition per event.
    pub fn to_net(&self) -> Result<Net, SynthesisError> {
        let utility = &self.utility;
        let mut net = Net::empty();
        let transitions = (0..utility.event_count())
            .map(|event| {
                net.add_transition(Transition::with_location(
                    utility.event_label(event),
                    utility.event_location(event).map(str::to_string),
                ))
            })
            .collect::<Vec<TransitionId>>();
        for (index, region) in self.regions.iter().enumerate() {
            let place = net.add_place(Place::new(
                format!("p{index}"),
                to_weight(region.initial_marking())?,
            ));
            for (event, &transition) in transitions.iter().enumerate() {
                let backward = to_weight(region.backward(event))?;
                if backward > 0 {
                    net.set_input_weight(place, transition, backward);
                }
                let forward = to_weight(region.forward(event))?;
                if forward > 0 {
                    net.set_output_weight(place, transition, forward);
                }
            }
        }
        if cfg!(debug_assertions) && self.is_success() {
            for violation in self.properties.verify_net(&net) {
                log::warn!("synthesized net: {violation}");
            }
        }
        Ok(net)
    }
}

fn to_weight(value: &BigInt) -> Result<Weight, SynthesisError> {
    value
        .to_u64()
        .ok_or_else(|| SynthesisError::WeightOverflow(value.clone()))
}

/// Orchestrates all separation problems of one region utility.
pub struct Synthesizer {
    utility: Rc<RegionUtility>,
    properties: PnProperties,
    flags: SynthesisFlags,
    config: SynthConfig,
    cancel: CancelToken,
    seeds: Vec<Region>,
    strategies: Vec<SeparationCtor>,
}

impl Synthesizer {
    pub fn new(utility: Rc<RegionUtility>, properties: PnProperties) -> Self {
        Self {
            utility,
            properties,
            flags: SynthesisFlags::empty(),
            config: SynthConfig::default(),
            cancel: CancelToken::new(),
            seeds: Vec::new(),
            strategies: default_strategies(),
        }
    }

    pub fn with_flags(mut self, flags: SynthesisFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_config(mut self, config: SynthConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Regions known in advance; each one is validated before use.
    pub fn with_seeds(mut self, seeds: Vec<Region>) -> Self {
        self.seeds = seeds;
        self
    }

    /// Replaces the strategy constructors tried by the dispatcher.
    pub fn with_strategies(mut self, strategies: Vec<SeparationCtor>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn run(self) -> Result<SynthesisResult, SynthesisError> {
        let utility = self.utility.clone();
        for seed in &self.seeds {
            seed.check_valid(&utility)?;
        }
        let quick_fail = self.flags.contains(SynthesisFlags::QUICK_FAIL);
        let context = SeparationContext {
            utility: utility.clone(),
            properties: self.properties,
            config: self.config.clone(),
            cancel: self.cancel.clone(),
            quick_fail,
        };
        let mut dispatcher = Dispatcher::new(&context, &self.strategies)?;
        log::info!(
            "synthesizing {} ({} states, {} events) with {}",
            utility.ts().name(),
            utility.reachable_states().len(),
            utility.event_count(),
            dispatcher.strategy_names().join(", ")
        );

        let mut regions = Vec::new();
        for seed in &self.seeds {
            self.record(&mut regions, seed.clone());
        }
        let mut failed_events: IndexMap<usize, Vec<StateId>> = IndexMap::new();
        for (state, event) in utility.event_state_problems() {
            self.cancel.check()?;
            if regions
                .iter()
                .any(|r| r.separates_event(&utility, state, event).unwrap_or(false))
            {
                continue;
            }
            match dispatcher.separate_event(state, event)? {
                Some(region) => self.record(&mut regions, region),
                None => {
                    log::debug!(
                        "no region prevents {} at {}",
                        utility.event_label(event),
                        utility.state_name(state)
                    );
                    failed_events.entry(event).or_default().push(state);
                    if quick_fail {
                        return Ok(self.finish(regions, failed_events, Vec::new(), &dispatcher));
                    }
                }
            }
        }
        log::info!(
            "event/state separation done: {} regions, {} events unsolved",
            regions.len(),
            failed_events.len()
        );

        let mut failed_states = Vec::new();
        if !self.flags.contains(SynthesisFlags::ONLY_EVENTS) {
            failed_states = self.separate_states(&mut dispatcher, &mut regions)?;
            if quick_fail && !failed_states.is_empty() {
                return Ok(self.finish(regions, failed_events, failed_states, &dispatcher));
            }
        }

        let regions = minimize_cheap(
            &utility,
            &regions,
            self.flags.contains(SynthesisFlags::ONLY_EVENTS),
            &self.cancel,
        )?;
        Ok(self.finish(regions, failed_events, failed_states, &dispatcher))
    }

    fn finish(
        &self,
        regions: Vec<Region>,
        failed_events: IndexMap<usize, Vec<StateId>>,
        failed_states: Vec<Vec<StateId>>,
        dispatcher: &Dispatcher,
    ) -> SynthesisResult {
        SynthesisResult {
            utility: self.utility.clone(),
            properties: self.properties,
            regions,
            failed_events,
            failed_states,
            strategies: dispatcher.strategy_names(),
            inconclusive: dispatcher.inconclusive(),
        }
    }

    fn record(&self, regions: &mut Vec<Region>, region: Region) {
        if regions.contains(&region) {
            return;
        }
        if self.flags.contains(SynthesisFlags::VERBOSE) {
            log::info!("region {}", region.display_with(&self.utility));
        }
        regions.push(region);
    }

    /// Separates states class by class and returns the partition of unseparable states.
    fn separate_states(
        &self,
        dispatcher: &mut Dispatcher,
        regions: &mut Vec<Region>,
    ) -> Result<Vec<Vec<StateId>>, Interrupted> {
        let utility = &self.utility;
        let mut classes = vec![utility.reachable_states().to_vec()];
        for region in regions.iter() {
            classes = classes
                .into_iter()
                .flat_map(|class| refine(utility, class, region))
                .collect();
        }

        let mut unseparable = UnionFind::<usize>::new(utility.reachable_states().len());
        let mut failed = false;
        while let Some(mut class) = classes.pop() {
            self.cancel.check()?;
            if class.len() < 2 {
                continue;
            }
            let (left, right) = (class[0], class[1]);
            if let Some(known) = regions
                .iter()
                .find(|r| r.separates_states(utility, left, right).unwrap_or(false))
            {
                classes.extend(refine(utility, class, known));
                continue;
            }
            let found = dispatcher
                .separate_states(left, right)?
                .filter(|r| r.separates_states(utility, left, right).unwrap_or(false));
            match found {
                Some(region) => {
                    classes.extend(refine(utility, class, &region));
                    self.record(regions, region);
                }
                None => {
                    log::debug!(
                        "states {} and {} cannot be separated",
                        utility.state_name(left),
                        utility.state_name(right)
                    );
                    if let (Some(l), Some(r)) = (utility.position(left), utility.position(right)) {
                        unseparable.union(l, r);
                    }
                    failed = true;
                    if self.flags.contains(SynthesisFlags::QUICK_FAIL) {
                        break;
                    }
                    class.remove(1);
                    classes.push(class);
                }
            }
        }
        if !failed {
            return Ok(Vec::new());
        }

        let mut groups: IndexMap<usize, Vec<StateId>> = IndexMap::new();
        for (position, &state) in utility.reachable_states().iter().enumerate() {
            groups
                .entry(unseparable.find(position))
                .or_default()
                .push(state);
        }
        Ok(groups.into_values().filter(|group| group.len() > 1).collect())
    }
}

/// Splits `class` by the markings `region` assigns, keeping first-seen order.
fn refine(utility: &RegionUtility, class: Vec<StateId>, region: &Region) -> Vec<Vec<StateId>> {
    let mut parts: IndexMap<BigInt, Vec<StateId>> = IndexMap::new();
    for state in class {
        let marking = region
            .marking_for_state(utility, state)
            .unwrap_or_default();
        parts.entry(marking).or_default().push(state);
    }
    parts.into_values().collect()
}

/// Full pipeline: optional unfolding, synthesis or overapproximation, optional minimization.
pub fn synthesize(
    ts: &TransitionSystem,
    properties: PnProperties,
    flags: SynthesisFlags,
    config: &SynthConfig,
    cancel: &CancelToken,
) -> Result<SynthesisResult, SynthesisError> {
    let mut flags = flags;
    let input = if flags.contains(SynthesisFlags::LANGUAGE_EQUIVALENCE) {
        flags |= SynthesisFlags::ONLY_EVENTS;
        limited_unfolding(ts, cancel)?
    } else {
        ts.clone()
    };

    let result = if flags.contains(SynthesisFlags::OVERAPPROXIMATE) {
        overapproximate(&input, properties, flags, config, cancel)?
    } else {
        let utility = RegionUtility::new_cancellable(input, cancel)?;
        Synthesizer::new(Rc::new(utility), properties)
            .with_flags(flags)
            .with_config(config.clone())
            .with_cancel(cancel.clone())
            .run()?
    };

    let minimize = flags.contains(SynthesisFlags::MINIMIZE) || config.synthesis.minimize_ilp;
    if minimize && result.is_success() {
        let regions = minimize_with_backend(
            result.utility(),
            properties,
            result.regions().to_vec(),
            flags.contains(SynthesisFlags::ONLY_EVENTS),
            config,
            cancel,
        )?;
        return Ok(result.with_regions(regions));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::Structure;
    use crate::separation::SmtSeparation;

    fn utility(arcs: &[(&str, &str, &str)]) -> Rc<RegionUtility> {
        let mut ts = TransitionSystem::new(arcs.first().map_or("s0", |arc| arc.0));
        for (from, label, to) in arcs {
            ts.add_arc_named(from, label, to);
        }
        Rc::new(RegionUtility::new(ts))
    }

    #[test]
    fn cycle_needs_a_place_per_direction() {
        let utility = utility(&[("s0", "a", "s1"), ("s1", "b", "s0")]);
        let result = Synthesizer::new(utility, PnProperties::new()).run().unwrap();
        assert!(result.is_success());
        assert_eq!(result.regions().len(), 2);
        let net = result.to_net().unwrap();
        assert_eq!(net.transitions_len(), 2);
        assert_eq!(net.places_len(), 2);
    }

    #[test]
    fn nondeterminism_is_a_state_separation_failure() {
        let utility = utility(&[("s", "a", "t1"), ("s", "a", "t2")]);
        let result = Synthesizer::new(utility.clone(), PnProperties::new())
            .run()
            .unwrap();
        assert!(!result.is_success());
        let t1 = utility.ts().state("t1").unwrap();
        let t2 = utility.ts().state("t2").unwrap();
        assert_eq!(result.failed_state_separation(), &[vec![t1, t2]]);
    }

    #[test]
    fn invalid_seeds_are_rejected() {
        let utility = utility(&[("s0", "a", "s1")]);
        let mut builder = crate::regions::RegionBuilder::new(1);
        builder.add_weight_on(0, -1);
        let seed = builder.with_initial_marking(0);
        let err = Synthesizer::new(utility, PnProperties::new())
            .with_seeds(vec![seed])
            .run()
            .unwrap_err();
        assert!(matches!(err, SynthesisError::InvalidRegion(_)));
    }

    #[test]
    fn explicit_strategy_list_is_used() {
        let utility = utility(&[("s0", "a", "s1"), ("s1", "b", "s2")]);
        let result = Synthesizer::new(utility, PnProperties::new().with(Structure::PURE))
            .with_strategies(vec![SmtSeparation::create])
            .run()
            .unwrap();
        assert_eq!(result.strategies(), &["smt"]);
        assert!(result.is_success());
    }

    #[test]
    fn quick_fail_stops_at_the_first_failure() {
        let utility = utility(&[("s0", "a", "s1"), ("s1", "b", "s2")]);
        let result = Synthesizer::new(utility, PnProperties::new().with_k_bounded(0))
            .with_flags(SynthesisFlags::QUICK_FAIL)
            .run()
            .unwrap();
        assert!(!result.is_success());
        assert_eq!(
            result
                .failed_event_separation()
                .values()
                .map(Vec::len)
                .sum::<usize>(),
            1
        );
    }

    #[test]
    fn cancellation_propagates() {
        let utility = utility(&[("s0", "a", "s1")]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = Synthesizer::new(utility, PnProperties::new())
            .with_cancel(cancel)
            .run()
            .unwrap_err();
        assert!(matches!(err, SynthesisError::Interrupted(_)));
    }
}
