//! k 有界纯区域的多重集扩展。
//!
//! 把区域看作状态上的多重集 `R`（即各状态的标识）。`R` 是区域当且仅当每个事件的梯度
//! `R(s') - R(s)` 在其所有弧上恒定。从激发区域（或单个状态）出发，
//! 对第一个梯度不恒定的事件逐一尝试目标梯度，只增不减地抬高端点直到梯度恒定。
//! 超过 `k` 的候选以及覆盖全部状态的候选（整体减一仍是区域）被剪枝。
use std::collections::{HashSet, VecDeque};

use crate::cancel::Interrupted;
use crate::properties::Structure;
use crate::regions::{Region, RegionBuilder};
use crate::separation::{Separation, SeparationContext};
use crate::ts::StateId;

pub struct KBoundedSeparation {
    context: SeparationContext,
    bound: i64,
    /// Arcs as `(source position, target position)`, grouped by event.
    arcs_by_event: Vec<Vec<(usize, usize)>>,
}

impl KBoundedSeparation {
    pub fn create(context: &SeparationContext) -> Option<Box<dyn Separation>> {
        let bound = i64::try_from(context.properties.k_bounded()?).ok()?;
        let utility = &context.utility;
        let ts = utility.ts();
        if !context
            .properties
            .structure_within(Structure::PURE | Structure::PLAIN)
            || ts.has_locations()
            || !ts.is_deterministic()
            || !ts.is_totally_reachable()
        {
            return None;
        }
        let mut arcs_by_event = vec![Vec::new(); utility.event_count()];
        for arc in utility.arcs() {
            if let (Some(source), Some(target)) =
                (utility.position(arc.source), utility.position(arc.target))
            {
                arcs_by_event[arc.event].push((source, target));
            }
        }
        Some(Box::new(Self {
            context: context.clone(),
            bound,
            arcs_by_event,
        }))
    }

    fn gradients<'a>(&'a self, candidate: &'a [i64], event: usize) -> impl Iterator<Item = i64> + 'a {
        self.arcs_by_event[event]
            .iter()
            .map(move |&(source, target)| candidate[target] - candidate[source])
    }

    /// Raises endpoints until every `event` arc has `gradient`; `None` once a state exceeds `k`.
    fn expand(&self, candidate: &[i64], event: usize, gradient: i64) -> Option<Vec<i64>> {
        let mut next = candidate.to_vec();
        let mut changed = true;
        while changed {
            changed = false;
            for &(source, target) in &self.arcs_by_event[event] {
                let current = next[target] - next[source];
                if current < gradient {
                    next[target] = next[target].checked_add(gradient.checked_sub(current)?)?;
                    changed = true;
                } else if current > gradient {
                    next[source] = next[source].checked_add(current.checked_sub(gradient)?)?;
                    changed = true;
                }
                if next[source] > self.bound || next[target] > self.bound {
                    return None;
                }
            }
        }
        Some(next)
    }

    fn region(&self, candidate: &[i64]) -> Region {
        let mut builder = RegionBuilder::new(self.arcs_by_event.len());
        for event in 0..self.arcs_by_event.len() {
            if let Some(gradient) = self.gradients(candidate, event).next() {
                builder.add_weight_on(event, gradient);
            }
        }
        builder.with_initial_marking(candidate.first().copied().unwrap_or(0))
    }

    fn admissible(&self, region: &Region) -> bool {
        let properties = &self.context.properties;
        if properties.is_plain() && !region.is_plain() {
            return false;
        }
        properties
            .k_marking()
            .is_none_or(|k| region.initial_marking() % k == 0.into())
    }

    fn search(
        &self,
        seeds: Vec<Vec<i64>>,
        solves: impl Fn(&Region) -> bool,
    ) -> Result<Option<Region>, Interrupted> {
        let limit = self.context.config.kbounded.max_candidates;
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        for seed in seeds {
            if seed.iter().all(|tokens| *tokens <= self.bound) && seen.insert(seed.clone()) {
                queue.push_back(seed);
            }
        }
        let mut explored = 0;
        while let Some(candidate) = queue.pop_front() {
            self.context.cancel.check()?;
            explored += 1;
            if explored > limit {
                log::debug!("k-bounded expansion stopped after {limit} candidates");
                break;
            }
            if candidate.iter().all(|tokens| *tokens > 0) {
                continue;
            }
            let unsettled = (0..self.arcs_by_event.len()).find_map(|event| {
                let (min, max) = self
                    .gradients(&candidate, event)
                    .fold((i64::MAX, i64::MIN), |(lo, hi), g| (lo.min(g), hi.max(g)));
                (min < max).then_some((event, min, max))
            });
            let Some((event, min, max)) = unsettled else {
                let region = self.region(&candidate);
                if self.admissible(&region) && solves(&region) {
                    debug_assert_eq!(region.check_valid(&self.context.utility), Ok(()));
                    return Ok(Some(region));
                }
                continue;
            };
            for gradient in min..=max {
                if let Some(next) = self.expand(&candidate, event, gradient) {
                    if seen.insert(next.clone()) {
                        queue.push_back(next);
                    }
                }
            }
        }
        Ok(None)
    }

    fn indicator(&self, positions: impl IntoIterator<Item = usize>) -> Vec<i64> {
        let mut candidate = vec![0; self.context.utility.reachable_states().len()];
        for position in positions {
            candidate[position] = 1;
        }
        candidate
    }
}

impl Separation for KBoundedSeparation {
    fn name(&self) -> &'static str {
        "k-bounded"
    }

    fn separate_states(
        &mut self,
        left: StateId,
        right: StateId,
    ) -> Result<Option<Region>, Interrupted> {
        let utility = self.context.utility.clone();
        let (Some(l), Some(r)) = (utility.position(left), utility.position(right)) else {
            return Ok(None);
        };
        let seeds = vec![self.indicator([l]), self.indicator([r])];
        self.search(seeds, |region| {
            region
                .separates_states(&utility, left, right)
                .unwrap_or(false)
        })
    }

    fn separate_event(
        &mut self,
        state: StateId,
        event: usize,
    ) -> Result<Option<Region>, Interrupted> {
        let utility = self.context.utility.clone();
        let excitation = self.arcs_by_event[event]
            .iter()
            .map(|&(source, _)| source)
            .collect::<Vec<_>>();
        let seeds = vec![self.indicator(excitation)];
        self.search(seeds, |region| {
            region
                .separates_event(&utility, state, event)
                .unwrap_or(false)
        })
    }

    fn is_exact(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    use crate::properties::PnProperties;
    use crate::regions::RegionUtility;
    use crate::ts::TransitionSystem;

    /// Two-slot buffer: `a` puts, `b` takes.
    fn buffer() -> Rc<RegionUtility> {
        let mut ts = TransitionSystem::new("s0");
        ts.add_arc_named("s0", "a", "s1");
        ts.add_arc_named("s1", "a", "s2");
        ts.add_arc_named("s2", "b", "s1");
        ts.add_arc_named("s1", "b", "s0");
        Rc::new(RegionUtility::new(ts))
    }

    #[test]
    fn expands_excitation_to_a_counter() {
        let utility = buffer();
        let context = SeparationContext::new(utility.clone(), PnProperties::new().with_k_bounded(2));
        let mut strategy = KBoundedSeparation::create(&context).unwrap();
        let s2 = utility.ts().state("s2").unwrap();
        let a = utility.event_index("a").unwrap();

        let region = strategy.separate_event(s2, a).unwrap().unwrap();
        assert_eq!(region.check_valid(&utility), Ok(()));
        assert!(region.separates_event(&utility, s2, a).unwrap());
        assert!(region.markings(&utility).iter().all(|m| *m <= 2.into()));
    }

    #[test]
    fn bound_prunes_every_candidate() {
        let utility = buffer();
        let context = SeparationContext::new(utility.clone(), PnProperties::safe());
        let mut strategy = KBoundedSeparation::create(&context).unwrap();
        let s2 = utility.ts().state("s2").unwrap();
        let a = utility.event_index("a").unwrap();
        assert_eq!(strategy.separate_event(s2, a).unwrap(), None);
    }

    #[test]
    fn huge_bounds_leave_the_strategy_out() {
        let context =
            SeparationContext::new(buffer(), PnProperties::new().with_k_bounded(u64::MAX));
        assert!(KBoundedSeparation::create(&context).is_none());
        let context =
            SeparationContext::new(buffer(), PnProperties::new().with_k_bounded(i64::MAX as u64));
        assert!(KBoundedSeparation::create(&context).is_some());
    }

    #[test]
    fn separates_states_of_the_buffer() {
        let utility = buffer();
        let context = SeparationContext::new(utility.clone(), PnProperties::new().with_k_bounded(2));
        let mut strategy = KBoundedSeparation::create(&context).unwrap();
        let s0 = utility.ts().initial();
        let s2 = utility.ts().state("s2").unwrap();
        let region = strategy.separate_states(s0, s2).unwrap().unwrap();
        assert!(region.separates_states(&utility, s0, s2).unwrap());
    }
}
