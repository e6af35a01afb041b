//! 输出无分支网：每个库所至多一个消费事件。
//!
//! 按消费事件把问题拆开：对每个事件 `e` 建一个只允许 `B[e] > 0` 的小约束系统
//! （另有一个无消费者的系统），ESSP `(s, e)` 只需在 `e` 的系统中求解，
//! SSP 依次尝试各个系统。系统按需构造并通过 `push`/`pop` 复用。
use crate::cancel::Interrupted;
use crate::properties::Structure;
use crate::regions::Region;
use crate::separation::{RegionEncoding, Separation, SeparationContext};
use crate::solver::{CheckResult, ConstraintBackend, Formula, backend_is_exact, new_backend};
use crate::ts::StateId;

struct ConsumerSystem {
    backend: Box<dyn ConstraintBackend>,
    encoding: RegionEncoding,
}

pub struct OutputNonbranchingSeparation {
    context: SeparationContext,
    /// Indexed by consumer event; the last slot has no consumer at all.
    systems: Vec<Option<ConsumerSystem>>,
    gave_up: usize,
}

impl OutputNonbranchingSeparation {
    pub fn create(context: &SeparationContext) -> Option<Box<dyn Separation>> {
        let properties = &context.properties;
        let allowed = Structure::OUTPUT_NONBRANCHING
            | Structure::CONFLICT_FREE
            | Structure::PURE
            | Structure::PLAIN
            | Structure::HOMOGENEOUS
            | Structure::BEHAVIOURALLY_CONFLICT_FREE
            | Structure::EQUAL_CONFLICT;
        if !properties.requires(Structure::OUTPUT_NONBRANCHING)
            || !properties.structure_within(allowed)
        {
            return None;
        }
        let slots = context.utility.event_count() + 1;
        Some(Box::new(Self {
            context: context.clone(),
            systems: (0..slots).map(|_| None).collect(),
            gave_up: 0,
        }))
    }

    fn system(&mut self, consumer: usize) -> &mut ConsumerSystem {
        let context = &self.context;
        self.systems[consumer].get_or_insert_with(|| {
            let utility = &context.utility;
            let mut backend = new_backend(&context.config.solver);
            let encoding = RegionEncoding::declare(
                backend.as_mut(),
                utility,
                &context.properties,
                &format!("{consumer}:"),
            );
            for event in (0..utility.event_count()).filter(|e| *e != consumer) {
                backend.assert(Formula::eq(encoding.backward(event), 0i64));
            }
            backend.assert(encoding.region_constraints(utility));
            backend.assert(encoding.structure_constraints(utility, &context.properties));
            ConsumerSystem { backend, encoding }
        })
    }

    fn solve(
        &mut self,
        consumer: usize,
        goal: impl FnOnce(&RegionEncoding) -> Formula,
    ) -> Result<Option<Region>, Interrupted> {
        self.context.cancel.check()?;
        let cancel = self.context.cancel.clone();
        let system = self.system(consumer);
        let goal = goal(&system.encoding);
        system.backend.push();
        system.backend.assert(goal);
        let result = system.backend.check(&cancel);
        system.backend.pop();
        Ok(match result? {
            CheckResult::Sat(model) => Some(system.encoding.region(&model)),
            CheckResult::Unsat => None,
            CheckResult::Unknown => {
                self.gave_up += 1;
                None
            }
        })
    }
}

impl Separation for OutputNonbranchingSeparation {
    fn name(&self) -> &'static str {
        "output-nonbranching"
    }

    fn separate_states(
        &mut self,
        left: StateId,
        right: StateId,
    ) -> Result<Option<Region>, Interrupted> {
        let utility = self.context.utility.clone();
        let none = utility.event_count();
        for consumer in std::iter::once(none).chain(0..none) {
            let region = self.solve(consumer, |encoding| {
                encoding.state_separation(&utility, left, right)
            })?;
            if region.is_some() {
                return Ok(region);
            }
        }
        Ok(None)
    }

    fn separate_event(
        &mut self,
        state: StateId,
        event: usize,
    ) -> Result<Option<Region>, Interrupted> {
        let utility = self.context.utility.clone();
        let region = self.solve(event, |encoding| {
            encoding.event_separation(&utility, state, event)
        })?;
        if let Some(region) = &region {
            debug_assert_eq!(region.check_valid(&utility), Ok(()));
            debug_assert!(region.postset().count() <= 1);
        }
        Ok(region)
    }

    fn is_exact(&self) -> bool {
        backend_is_exact(&self.context.config.solver)
    }

    fn inconclusive(&self) -> usize {
        self.gave_up
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    use crate::properties::PnProperties;
    use crate::regions::RegionUtility;
    use crate::ts::TransitionSystem;

    #[test]
    fn places_have_single_consumers() {
        // s0 -a-> s1 -b-> s2 -c-> s0
        let mut ts = TransitionSystem::new("s0");
        ts.add_arc_named("s0", "a", "s1");
        ts.add_arc_named("s1", "b", "s2");
        ts.add_arc_named("s2", "c", "s0");
        let utility = Rc::new(RegionUtility::new(ts));
        let context = SeparationContext::new(
            utility.clone(),
            PnProperties::new().with(Structure::OUTPUT_NONBRANCHING),
        );
        let mut strategy = OutputNonbranchingSeparation::create(&context).unwrap();
        for (state, event) in utility.event_state_problems() {
            let region = strategy.separate_event(state, event).unwrap().unwrap();
            assert!(region.postset().all(|consumer| consumer == event));
        }
        let s0 = utility.ts().initial();
        let s2 = utility.ts().state("s2").unwrap();
        assert!(strategy.separate_states(s0, s2).unwrap().is_some());
    }

    #[test]
    fn choice_between_two_consumers_is_unsolvable() {
        // s0 -a-> s1, s0 -b-> s2: disabling b after a needs a place consumed by a and b
        let mut ts = TransitionSystem::new("s0");
        ts.add_arc_named("s0", "a", "s1");
        ts.add_arc_named("s0", "b", "s2");
        let utility = Rc::new(RegionUtility::new(ts));
        let context = SeparationContext::new(
            utility.clone(),
            PnProperties::new().with(Structure::OUTPUT_NONBRANCHING),
        );
        let mut strategy = OutputNonbranchingSeparation::create(&context).unwrap();
        let s1 = utility.ts().state("s1").unwrap();
        let b = utility.event_index("b").unwrap();
        assert_eq!(strategy.separate_event(s1, b).unwrap(), None);
    }
}
