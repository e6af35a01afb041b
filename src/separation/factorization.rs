//! 因子分解预处理（仅 quick-fail 模式）：TS 是若干独立因子的交错积时，
//! 每个分离问题都落在某一个因子中求解，得到的区域在其余事件上权重为零，直接提升到原系统。
//! 某个因子上失败即视为整个实例失败。
use std::rc::Rc;

use crate::cancel::Interrupted;
use crate::regions::{Region, RegionUtility};
use crate::separation::{Dispatcher, Separation, SeparationContext, default_strategies};
use crate::ts::{Factor, StateId, factorize};

struct FactorSolver {
    factor: Factor,
    utility: Rc<RegionUtility>,
    dispatcher: Dispatcher,
}

pub struct FactorizationSeparation {
    utility: Rc<RegionUtility>,
    factors: Vec<FactorSolver>,
}

impl FactorizationSeparation {
    pub fn create(context: &SeparationContext) -> Option<Box<dyn Separation>> {
        if !context.quick_fail || context.utility.ts().has_locations() {
            return None;
        }
        let factorization = factorize(context.utility.ts())?;
        let mut factors = Vec::with_capacity(factorization.factors.len());
        for factor in factorization.factors {
            let utility =
                Rc::new(RegionUtility::new_cancellable(factor.ts.clone(), &context.cancel).ok()?);
            let mut inner = context.for_utility(utility.clone());
            inner.quick_fail = false;
            let dispatcher = Dispatcher::new(&inner, &default_strategies()).ok()?;
            factors.push(FactorSolver {
                factor,
                utility,
                dispatcher,
            });
        }
        log::info!(
            "transition system factorises into {} independent components",
            factors.len()
        );
        Some(Box::new(Self {
            utility: context.utility.clone(),
            factors,
        }))
    }

    /// Region of a factor, with zero weights on every event outside it.
    fn lift(&self, solver: &FactorSolver, region: &Region) -> Region {
        let mut backward = Vec::with_capacity(self.utility.event_count());
        let mut forward = Vec::with_capacity(self.utility.event_count());
        for label in self.utility.events() {
            match solver.utility.event_index(label) {
                Some(local) => {
                    backward.push(region.backward(local).clone());
                    forward.push(region.forward(local).clone());
                }
                None => {
                    backward.push(0.into());
                    forward.push(0.into());
                }
            }
        }
        let lifted = Region::from_parts(backward, forward, region.initial_marking().clone());
        debug_assert_eq!(lifted.check_valid(&self.utility), Ok(()));
        lifted
    }
}

impl Separation for FactorizationSeparation {
    fn name(&self) -> &'static str {
        "factorization"
    }

    fn separate_states(
        &mut self,
        left: StateId,
        right: StateId,
    ) -> Result<Option<Region>, Interrupted> {
        for index in 0..self.factors.len() {
            let solver = &mut self.factors[index];
            let (l, r) = (solver.factor.project(left), solver.factor.project(right));
            if l == r {
                continue;
            }
            if let Some(region) = solver.dispatcher.separate_states(l, r)? {
                return Ok(Some(self.lift(&self.factors[index], &region)));
            }
            return Ok(None);
        }
        Ok(None)
    }

    fn separate_event(
        &mut self,
        state: StateId,
        event: usize,
    ) -> Result<Option<Region>, Interrupted> {
        let label = self.utility.event_label(event).to_string();
        let Some(index) = self
            .factors
            .iter()
            .position(|solver| solver.factor.contains_label(&label))
        else {
            return Ok(None);
        };
        let solver = &mut self.factors[index];
        let Some(local_event) = solver.utility.event_index(&label) else {
            return Ok(None);
        };
        let local_state = solver.factor.project(state);
        let found = solver.dispatcher.separate_event(local_state, local_event)?;
        Ok(found.map(|region| self.lift(&self.factors[index], &region)))
    }

    fn is_exact(&self) -> bool {
        self.factors.iter().all(|solver| solver.dispatcher.is_exact())
    }

    fn inconclusive(&self) -> usize {
        self.factors
            .iter()
            .map(|solver| solver.dispatcher.inconclusive())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::PnProperties;
    use crate::solver::backend_is_exact;
    use crate::ts::TransitionSystem;

    /// Two independent toggles: `a`/`b` on one side, `c` on the other.
    fn product() -> TransitionSystem {
        let mut ts = TransitionSystem::new("00");
        ts.add_arc_named("00", "a", "10");
        ts.add_arc_named("10", "b", "00");
        ts.add_arc_named("00", "c", "01");
        ts.add_arc_named("10", "c", "11");
        ts.add_arc_named("01", "a", "11");
        ts.add_arc_named("11", "b", "01");
        ts
    }

    #[test]
    fn solves_per_factor_and_lifts() {
        let utility = Rc::new(RegionUtility::new(product()));
        let mut context = SeparationContext::new(utility.clone(), PnProperties::new());
        context.quick_fail = true;
        let mut strategy = FactorizationSeparation::create(&context).unwrap();
        assert_eq!(strategy.is_exact(), backend_is_exact(&context.config.solver));

        for (state, event) in utility.event_state_problems() {
            let region = strategy.separate_event(state, event).unwrap().unwrap();
            assert_eq!(region.check_valid(&utility), Ok(()));
            assert!(region.separates_event(&utility, state, event).unwrap());
        }
        let s00 = utility.ts().initial();
        let s11 = utility.ts().state("11").unwrap();
        assert!(strategy.separate_states(s00, s11).unwrap().is_some());
    }

    #[test]
    fn only_used_with_quick_fail() {
        let context = SeparationContext::new(
            Rc::new(RegionUtility::new(product())),
            PnProperties::new(),
        );
        assert!(FactorizationSeparation::create(&context).is_none());
    }
}
