//! 标记图：所有小环的 Parikh 向量都是全一向量的倍数时，
//! 每个库所都是某个 `a → p → b` 的形式，其标识为 `m0 + P(s)[a] - P(s)[b]`，无需搜索。
use crate::cancel::Interrupted;
use crate::properties::Structure;
use crate::regions::{Region, RegionBuilder};
use crate::separation::{Separation, SeparationContext};
use crate::ts::StateId;

pub struct MarkedGraphSeparation {
    context: SeparationContext,
}

impl MarkedGraphSeparation {
    pub fn create(context: &SeparationContext) -> Option<Box<dyn Separation>> {
        let properties = &context.properties;
        let allowed = Structure::MARKED_GRAPH
            | Structure::TNET
            | Structure::OUTPUT_NONBRANCHING
            | Structure::MERGE_FREE
            | Structure::CONFLICT_FREE
            | Structure::PLAIN
            | Structure::PURE
            | Structure::HOMOGENEOUS;
        if !properties.requires(Structure::TNET)
            || !properties.structure_within(allowed)
            || properties.k_bounded().is_some()
            || properties.k_marking().is_some()
        {
            return None;
        }
        let utility = &context.utility;
        let ts = utility.ts();
        if !ts.is_deterministic()
            || !ts.is_totally_reachable()
            || !ts.is_reversible()
            || !ts.is_persistent()
        {
            return None;
        }
        let cycles_are_uniform = utility.chords().iter().all(|&chord| {
            utility
                .parikh_vector_for_edge(chord)
                .is_ok_and(|vector| vector.windows(2).all(|pair| pair[0] == pair[1]))
        });
        if !cycles_are_uniform {
            log::debug!("marked-graph algorithm skipped: a cycle is not a multiple of the all-ones vector");
            return None;
        }
        Some(Box::new(Self {
            context: context.clone(),
        }))
    }

    /// `producer → p → consumer` with the smallest valid initial marking.
    fn place(&self, producer: usize, consumer: usize) -> Region {
        let utility = &self.context.utility;
        let mut builder = RegionBuilder::new(utility.event_count());
        builder.add_weight_on(producer, 1).add_weight_on(consumer, -1);
        builder.with_normal_initial_marking(utility)
    }

    fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let n = self.context.utility.event_count();
        (0..n).flat_map(move |a| (0..n).filter(move |b| *b != a).map(move |b| (a, b)))
    }
}

impl Separation for MarkedGraphSeparation {
    fn name(&self) -> &'static str {
        "marked-graph"
    }

    fn separate_states(
        &mut self,
        left: StateId,
        right: StateId,
    ) -> Result<Option<Region>, Interrupted> {
        let utility = &self.context.utility;
        for (producer, consumer) in self.pairs() {
            self.context.cancel.check()?;
            let region = self.place(producer, consumer);
            if region.separates_states(utility, left, right).unwrap_or(false) {
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
        let utility = &self.context.utility;
        for producer in (0..utility.event_count()).filter(|p| *p != event) {
            self.context.cancel.check()?;
            let region = self.place(producer, event);
            if region.separates_event(utility, state, event).unwrap_or(false) {
                debug_assert_eq!(region.check_valid(utility), Ok(()));
                return Ok(Some(region));
            }
        }
        Ok(None)
    }

    fn is_exact(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    use crate::properties::PnProperties;
    use crate::regions::RegionUtility;
    use crate::ts::TransitionSystem;

    /// `a` and `b` run concurrently, `c` joins them and restarts the cycle.
    fn fork_join() -> TransitionSystem {
        let mut ts = TransitionSystem::new("s0");
        ts.add_arc_named("s0", "a", "s1");
        ts.add_arc_named("s0", "b", "s2");
        ts.add_arc_named("s1", "b", "s3");
        ts.add_arc_named("s2", "a", "s3");
        ts.add_arc_named("s3", "c", "s0");
        ts
    }

    #[test]
    fn pairwise_places_solve_a_fork_join() {
        let utility = Rc::new(RegionUtility::new(fork_join()));
        let context = SeparationContext::new(
            utility.clone(),
            PnProperties::new().with(Structure::MARKED_GRAPH),
        );
        let mut strategy = MarkedGraphSeparation::create(&context).unwrap();
        for (state, event) in utility.event_state_problems() {
            let region = strategy.separate_event(state, event).unwrap().unwrap();
            assert_eq!(region.check_valid(&utility), Ok(()));
            assert_eq!(region.preset().count(), 1);
            assert_eq!(region.postset().count(), 1);
        }
        let s1 = utility.ts().state("s1").unwrap();
        let s2 = utility.ts().state("s2").unwrap();
        assert!(strategy.separate_states(s1, s2).unwrap().is_some());
    }

    #[test]
    fn rejects_non_uniform_cycles() {
        let mut ts = TransitionSystem::new("s0");
        ts.add_arc_named("s0", "a", "s1");
        ts.add_arc_named("s1", "a", "s2");
        ts.add_arc_named("s2", "b", "s0");
        let context = SeparationContext::new(
            Rc::new(RegionUtility::new(ts)),
            PnProperties::new().with(Structure::MARKED_GRAPH),
        );
        assert!(MarkedGraphSeparation::create(&context).is_none());
    }
}
