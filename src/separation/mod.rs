//! # 分离问题求解策略
//!
//! 合成需要为两类分离问题找到区域：
//! * ESSP（事件/状态分离）：事件 `e` 在状态 `s` 不可发生，需要一个区域满足 `m(s) < B[e]`；
//! * SSP（状态分离）：两个不同状态 `s ≠ s'`，需要一个区域满足 `m(s) ≠ m(s')`。
//!
//! 每种策略由一个构造函数给出，构造函数检查性质描述与输入 TS，不适用时返回 `None`。
//! [`Dispatcher`] 按固定顺序尝试构造函数：第一个可用的策略为主策略，
//! 若主策略不是精确的（返回 `None` 并不代表问题无解），则继续追加后续策略直到遇到精确策略。

pub mod elementary;
pub mod encoding;
pub mod factorization;
pub mod inequality;
pub mod kbounded;
pub mod marked_graph;
pub mod output_nonbranching;
pub mod smt;

use std::rc::Rc;

use thiserror::Error;

use crate::cancel::{CancelToken, Interrupted};
use crate::config::SynthConfig;
use crate::properties::PnProperties;
use crate::regions::{Region, RegionUtility};
use crate::ts::StateId;

pub use elementary::ElementarySeparation;
pub use encoding::RegionEncoding;
pub use factorization::FactorizationSeparation;
pub use inequality::InequalitySeparation;
pub use kbounded::KBoundedSeparation;
pub use marked_graph::MarkedGraphSeparation;
pub use output_nonbranching::OutputNonbranchingSeparation;
pub use smt::SmtSeparation;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SeparationError {
    #[error("event `{label}` has no location while other events do")]
    MissingLocation { label: String },
    #[error("no separation strategy supports the requested properties")]
    NoApplicableStrategy,
}

/// A solver for separation problems over the utility it was built for.
pub trait Separation {
    fn name(&self) -> &'static str;

    /// `Ok(None)`: this strategy found no region for the pair.
    fn separate_states(
        &mut self,
        left: StateId,
        right: StateId,
    ) -> Result<Option<Region>, Interrupted>;

    fn separate_event(&mut self, state: StateId, event: usize)
    -> Result<Option<Region>, Interrupted>;

    /// `None` from an exact strategy proves the instance unsolvable for the properties.
    fn is_exact(&self) -> bool;

    /// Instances answered with `None` only because the constraint backend gave up.
    fn inconclusive(&self) -> usize {
        0
    }
}

/// Everything a strategy constructor may inspect.
#[derive(Debug, Clone)]
pub struct SeparationContext {
    pub utility: Rc<RegionUtility>,
    pub properties: PnProperties,
    pub config: SynthConfig,
    pub cancel: CancelToken,
    pub quick_fail: bool,
}

impl SeparationContext {
    pub fn new(utility: Rc<RegionUtility>, properties: PnProperties) -> Self {
        Self {
            utility,
            properties,
            config: SynthConfig::default(),
            cancel: CancelToken::new(),
            quick_fail: false,
        }
    }

    /// Same settings over another utility, used for factors and relaxed inputs.
    pub fn for_utility(&self, utility: Rc<RegionUtility>) -> Self {
        Self {
            utility,
            ..self.clone()
        }
    }
}

pub type SeparationCtor = fn(&SeparationContext) -> Option<Box<dyn Separation>>;

/// Strategy order: cheapest and most specialised first, the general encoding last.
pub fn default_strategies() -> Vec<SeparationCtor> {
    vec![
        FactorizationSeparation::create,
        MarkedGraphSeparation::create,
        ElementarySeparation::create,
        KBoundedSeparation::create,
        OutputNonbranchingSeparation::create,
        InequalitySeparation::create,
        SmtSeparation::create,
    ]
}

/// Either every event carries a location or none does.
pub fn check_locations(utility: &RegionUtility) -> Result<(), SeparationError> {
    if !utility.ts().has_locations() {
        return Ok(());
    }
    for event in 0..utility.event_count() {
        if utility.event_location(event).is_none() {
            return Err(SeparationError::MissingLocation {
                label: utility.event_label(event).to_string(),
            });
        }
    }
    Ok(())
}

/// Primary strategy followed by fallbacks up to the first exact one.
pub struct Dispatcher {
    strategies: Vec<Box<dyn Separation>>,
}

impl Dispatcher {
    pub fn new(
        context: &SeparationContext,
        ctors: &[SeparationCtor],
    ) -> Result<Self, SeparationError> {
        check_locations(&context.utility)?;
        let mut strategies = Vec::new();
        for ctor in ctors {
            let Some(strategy) = ctor(context) else {
                continue;
            };
            let exact = strategy.is_exact();
            strategies.push(strategy);
            if exact {
                break;
            }
        }
        if strategies.is_empty() {
            return Err(SeparationError::NoApplicableStrategy);
        }
        log::debug!(
            "separation strategies for {}: {}",
            context.properties,
            strategies
                .iter()
                .map(|s| s.name())
                .collect::<Vec<_>>()
                .join(" -> ")
        );
        Ok(Self { strategies })
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }
}

impl Separation for Dispatcher {
    fn name(&self) -> &'static str {
        self.strategies.first().map_or("none", |s| s.name())
    }

    fn separate_states(
        &mut self,
        left: StateId,
        right: StateId,
    ) -> Result<Option<Region>, Interrupted> {
        for strategy in &mut self.strategies {
            if let Some(region) = strategy.separate_states(left, right)? {
                return Ok(Some(region));
            }
        }
        Ok(None)
    }

    fn separate_event(
        &mut self,
        state: StateId,
        event: usize,
    ) -> Result<Option<Region>, Interrupted> {
        for strategy in &mut self.strategies {
            if let Some(region) = strategy.separate_event(state, event)? {
                return Ok(Some(region));
            }
        }
        Ok(None)
    }

    fn is_exact(&self) -> bool {
        self.strategies.iter().any(|s| s.is_exact())
    }

    fn inconclusive(&self) -> usize {
        self.strategies.iter().map(|s| s.inconclusive()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::Structure;
    use crate::ts::TransitionSystem;

    fn cycle() -> Rc<RegionUtility> {
        let mut ts = TransitionSystem::new("s0");
        ts.add_arc_named("s0", "a", "s1");
        ts.add_arc_named("s1", "b", "s0");
        Rc::new(RegionUtility::new(ts))
    }

    #[cfg(feature = "z3")]
    #[test]
    fn unrestricted_properties_use_inequalities() {
        let context = SeparationContext::new(cycle(), PnProperties::new());
        let dispatcher = Dispatcher::new(&context, &default_strategies()).unwrap();
        assert_eq!(dispatcher.strategy_names(), vec!["inequality"]);
    }

    #[test]
    fn marked_graph_comes_first() {
        let context = SeparationContext::new(
            cycle(),
            PnProperties::new().with(Structure::MARKED_GRAPH),
        );
        let dispatcher = Dispatcher::new(&context, &default_strategies()).unwrap();
        assert_eq!(dispatcher.name(), "marked-graph");
        assert!(dispatcher.is_exact());
    }

    #[cfg(feature = "z3")]
    #[test]
    fn inexact_primary_gets_fallbacks() {
        let context = SeparationContext::new(cycle(), PnProperties::new().with_k_bounded(2));
        let dispatcher = Dispatcher::new(&context, &default_strategies()).unwrap();
        assert_eq!(dispatcher.strategy_names(), vec!["k-bounded", "inequality"]);
    }

    #[test]
    fn built_in_search_is_never_exact() {
        let mut context = SeparationContext::new(cycle(), PnProperties::new());
        context.config.solver.use_z3 = false;
        let dispatcher = Dispatcher::new(&context, &default_strategies()).unwrap();
        assert_eq!(dispatcher.strategy_names(), vec!["inequality", "smt"]);
        assert!(!dispatcher.is_exact());
        assert_eq!(dispatcher.inconclusive(), 0);
    }

    #[test]
    fn partial_locations_are_rejected() {
        let mut ts = TransitionSystem::new("s0");
        ts.add_arc_named("s0", "a", "s1");
        ts.add_arc_named("s1", "b", "s0");
        ts.set_location("a", "left");
        let context = SeparationContext::new(Rc::new(RegionUtility::new(ts)), PnProperties::new());
        assert_eq!(
            Dispatcher::new(&context, &default_strategies()).err(),
            Some(SeparationError::MissingLocation {
                label: "b".to_string()
            })
        );
    }

    #[test]
    fn empty_factory_list_is_an_error() {
        let context = SeparationContext::new(cycle(), PnProperties::new());
        assert_eq!(
            Dispatcher::new(&context, &[]).err(),
            Some(SeparationError::NoApplicableStrategy)
        );
    }
}
