//! 通用策略：完整的区域定义加上全部结构约束组成一个约束系统，
//! 构造时断言一次，每个分离实例只在 `push`/`pop` 作用域内追加分离条件。
use crate::cancel::Interrupted;
use crate::regions::Region;
use crate::separation::{RegionEncoding, Separation, SeparationContext};
use crate::solver::{CheckResult, ConstraintBackend, Formula, backend_is_exact, new_backend};
use crate::ts::StateId;

pub struct SmtSeparation {
    context: SeparationContext,
    backend: Box<dyn ConstraintBackend>,
    encoding: RegionEncoding,
    gave_up: usize,
}

impl SmtSeparation {
    pub fn create(context: &SeparationContext) -> Option<Box<dyn Separation>> {
        Some(Box::new(Self::new(context)))
    }

    pub fn new(context: &SeparationContext) -> Self {
        let utility = &context.utility;
        let mut backend = new_backend(&context.config.solver);
        let encoding = RegionEncoding::declare(backend.as_mut(), utility, &context.properties, "");
        backend.assert(encoding.region_constraints(utility));
        backend.assert(encoding.structure_constraints(utility, &context.properties));
        log::debug!(
            "constraint system for {} prepared with the {} backend",
            context.properties,
            backend.name()
        );
        Self {
            context: context.clone(),
            backend,
            encoding,
            gave_up: 0,
        }
    }

    fn solve(&mut self, goal: Formula) -> Result<Option<Region>, Interrupted> {
        self.context.cancel.check()?;
        self.backend.push();
        self.backend.assert(goal);
        let result = self.backend.check(&self.context.cancel);
        self.backend.pop();
        let region = match result? {
            CheckResult::Sat(model) => self.encoding.region(&model),
            CheckResult::Unsat => return Ok(None),
            CheckResult::Unknown => {
                log::debug!("constraint backend gave up on a separation instance");
                self.gave_up += 1;
                return Ok(None);
            }
        };
        debug_assert_eq!(region.check_valid(&self.context.utility), Ok(()));
        Ok(Some(region))
    }
}

impl Separation for SmtSeparation {
    fn name(&self) -> &'static str {
        "smt"
    }

    fn separate_states(
        &mut self,
        left: StateId,
        right: StateId,
    ) -> Result<Option<Region>, Interrupted> {
        let goal = self
            .encoding
            .state_separation(&self.context.utility, left, right);
        self.solve(goal)
    }

    fn separate_event(
        &mut self,
        state: StateId,
        event: usize,
    ) -> Result<Option<Region>, Interrupted> {
        let goal = self
            .encoding
            .event_separation(&self.context.utility, state, event);
        self.solve(goal)
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

    use crate::properties::{PnProperties, Structure};
    use crate::regions::RegionUtility;
    use crate::ts::TransitionSystem;

    /// s0 -a-> s1, s0 -b-> s2: a and b are in conflict
    fn choice() -> Rc<RegionUtility> {
        let mut ts = TransitionSystem::new("s0");
        ts.add_arc_named("s0", "a", "s1");
        ts.add_arc_named("s0", "b", "s2");
        Rc::new(RegionUtility::new(ts))
    }

    #[test]
    fn conflicts_need_a_shared_place() {
        let utility = choice();
        let s1 = utility.ts().state("s1").unwrap();
        let b = utility.event_index("b").unwrap();

        let context = SeparationContext::new(utility.clone(), PnProperties::new());
        let mut strategy = SmtSeparation::new(&context);
        let region = strategy.separate_event(s1, b).unwrap().unwrap();
        assert!(region.separates_event(&utility, s1, b).unwrap());

        let context = SeparationContext::new(
            utility.clone(),
            PnProperties::new().with(Structure::BEHAVIOURALLY_CONFLICT_FREE),
        );
        let mut strategy = SmtSeparation::new(&context);
        assert_eq!(strategy.separate_event(s1, b).unwrap(), None);
        // the scope of the failed instance is gone again
        let s2 = utility.ts().state("s2").unwrap();
        assert!(strategy.separate_states(s1, s2).unwrap().is_some());
    }

    #[test]
    fn locations_restrict_consumers() {
        let mut ts = TransitionSystem::new("s0");
        ts.add_arc_named("s0", "a", "s1");
        ts.add_arc_named("s0", "b", "s2");
        ts.set_location("a", "left");
        ts.set_location("b", "right");
        let utility = Rc::new(RegionUtility::new(ts));
        let context = SeparationContext::new(utility.clone(), PnProperties::new());
        let mut strategy = SmtSeparation::new(&context);
        let s1 = utility.ts().state("s1").unwrap();
        let b = utility.event_index("b").unwrap();
        assert_eq!(strategy.separate_event(s1, b).unwrap(), None);
    }
}
