//! 区域在整数约束系统中的编码。
//!
//! 每个区域对应 `2n + 1` 个非负整数变量 `B[e]`、`F[e]`、`m0`（k-marking 时另有 `m0 = k·y`）。
//! 状态标识 `m(s) = m0 + Σ P(s)[e]·(F[e] - B[e])` 是这些变量的线性表达式，
//! 因而区域定义、结构性质与分离条件都能写成线性原子的布尔组合。
use std::collections::BTreeSet;

use itertools::Itertools;
use num::BigInt;

use crate::properties::{PnProperties, Structure};
use crate::regions::{Region, RegionUtility};
use crate::solver::{ConstraintBackend, Formula, LinearExpr, Model, Var};
use crate::ts::StateId;

#[derive(Debug, Clone)]
pub struct RegionEncoding {
    backward: Vec<Var>,
    forward: Vec<Var>,
    initial: Var,
    marking_bound: Option<i64>,
}

impl RegionEncoding {
    /// Declares the variables of one region; only plainness and k-boundedness bound them above.
    pub fn declare(
        backend: &mut dyn ConstraintBackend,
        utility: &RegionUtility,
        properties: &PnProperties,
        prefix: &str,
    ) -> Self {
        let marking_bound = properties
            .k_bounded()
            .map(|k| i64::try_from(k).unwrap_or(i64::MAX));
        let weight_bound = if properties.is_plain() {
            Some(1)
        } else {
            marking_bound.map(|k| k.max(1))
        };
        let mut backward = Vec::with_capacity(utility.event_count());
        let mut forward = Vec::with_capacity(utility.event_count());
        for label in utility.events() {
            backward.push(backend.new_var(&format!("{prefix}B[{label}]"), Some(0), weight_bound));
            forward.push(backend.new_var(&format!("{prefix}F[{label}]"), Some(0), weight_bound));
        }
        let initial = backend.new_var(&format!("{prefix}m0"), Some(0), marking_bound);
        let encoding = Self {
            backward,
            forward,
            initial,
            marking_bound,
        };
        if let Some(k) = properties.k_marking() {
            let k = i64::try_from(k).unwrap_or(i64::MAX);
            let upper = marking_bound.map(|bound| bound / k);
            let factor = backend.new_var(&format!("{prefix}y"), Some(0), upper);
            backend.assert(Formula::eq(encoding.initial, LinearExpr::term(factor, k)));
        }
        encoding
    }

    pub fn backward(&self, event: usize) -> Var {
        self.backward[event]
    }

    pub fn forward(&self, event: usize) -> Var {
        self.forward[event]
    }

    pub fn initial(&self) -> Var {
        self.initial
    }

    /// `F[e] - B[e]`
    pub fn weight(&self, event: usize) -> LinearExpr {
        LinearExpr::from(self.forward[event]) - LinearExpr::from(self.backward[event])
    }

    pub fn effect(&self, vector: &[i64]) -> LinearExpr {
        let mut expr = LinearExpr::new();
        for (event, count) in vector.iter().enumerate() {
            if *count != 0 {
                expr.add_term(self.forward[event], *count);
                expr.add_term(self.backward[event], -*count);
            }
        }
        expr
    }

    /// Marking of a reachable state; unreachable states get `m0`.
    pub fn marking(&self, utility: &RegionUtility, state: StateId) -> LinearExpr {
        let effect = utility
            .reaching_parikh_vector(state)
            .map(|parikh| self.effect(parikh))
            .unwrap_or_default();
        LinearExpr::from(self.initial) + effect
    }

    /// Cycle consistency, non-negative (and bounded) markings, no prevented arc.
    pub fn region_constraints(&self, utility: &RegionUtility) -> Formula {
        let mut parts = Vec::new();
        for &chord in utility.chords() {
            if let Ok(vector) = utility.parikh_vector_for_edge(chord) {
                parts.push(Formula::eq(self.effect(&vector), 0i64));
            }
        }
        for &state in utility.reachable_states() {
            let marking = self.marking(utility, state);
            parts.push(Formula::ge(marking.clone(), 0i64));
            if let Some(k) = self.marking_bound {
                parts.push(Formula::le(marking, k));
            }
        }
        let mut checked = BTreeSet::new();
        for arc in utility.arcs() {
            if checked.insert((arc.source.index(), arc.event)) {
                parts.push(Formula::ge(
                    self.marking(utility, arc.source),
                    self.backward[arc.event],
                ));
            }
        }
        Formula::and(parts)
    }

    /// Structural properties of the place this region becomes, plus location distribution.
    pub fn structure_constraints(&self, utility: &RegionUtility, properties: &PnProperties) -> Formula {
        let n = utility.event_count();
        let mut parts = Vec::new();
        if properties.is_pure() {
            for event in 0..n {
                parts.push(either_zero(self.backward[event], self.forward[event]));
            }
        }
        if properties.requires(Structure::MARKED_GRAPH) {
            parts.push(at_least_one_positive(&self.forward));
            parts.push(at_least_one_positive(&self.backward));
        }
        if properties.requires(Structure::OUTPUT_NONBRANCHING) {
            parts.push(at_most_one_positive(&self.backward));
        }
        if properties.requires(Structure::MERGE_FREE) {
            parts.push(at_most_one_positive(&self.forward));
        }
        if properties.requires(Structure::CONFLICT_FREE)
            && !properties.requires(Structure::OUTPUT_NONBRANCHING)
        {
            let consumers_produce = (0..n)
                .map(|e| {
                    Formula::or(vec![
                        Formula::eq(self.backward[e], 0i64),
                        Formula::ge(self.forward[e], 1i64),
                    ])
                })
                .collect();
            parts.push(Formula::or(vec![
                at_most_one_positive(&self.backward),
                Formula::and(consumers_produce),
            ]));
        }
        if properties.requires(Structure::HOMOGENEOUS) {
            for (left, right) in (0..n).tuple_combinations() {
                parts.push(zero_or_equal(self.backward[left], self.backward[right]));
            }
        }
        if properties.requires(Structure::EQUAL_CONFLICT) {
            for (left, right) in (0..n).tuple_combinations() {
                if enabling_states(utility, left) == enabling_states(utility, right) {
                    parts.push(zero_or_equal(self.backward[left], self.backward[right]));
                } else {
                    parts.push(either_zero(self.backward[left], self.backward[right]));
                }
            }
        }
        let behavioural = properties.requires(Structure::BEHAVIOURALLY_CONFLICT_FREE)
            || properties.requires(Structure::BINARY_CONFLICT_FREE);
        if behavioural {
            let mut seen = BTreeSet::new();
            for &state in utility.reachable_states() {
                for (&left, &right) in utility.enabled_events(state).iter().tuple_combinations() {
                    let (left, right) = (left.min(right), left.max(right));
                    if properties.requires(Structure::BEHAVIOURALLY_CONFLICT_FREE)
                        && seen.insert((left, right))
                    {
                        parts.push(either_zero(self.backward[left], self.backward[right]));
                    }
                    if properties.requires(Structure::BINARY_CONFLICT_FREE) {
                        parts.push(Formula::ge(
                            self.marking(utility, state),
                            LinearExpr::from(self.backward[left])
                                + LinearExpr::from(self.backward[right]),
                        ));
                    }
                }
            }
        }
        if utility.ts().has_locations() {
            for (left, right) in (0..n).tuple_combinations() {
                if utility.event_location(left) != utility.event_location(right) {
                    parts.push(either_zero(self.backward[left], self.backward[right]));
                }
            }
        }
        Formula::and(parts)
    }

    /// `m(state) < B[event]`
    pub fn event_separation(&self, utility: &RegionUtility, state: StateId, event: usize) -> Formula {
        Formula::lt(self.marking(utility, state), self.backward[event])
    }

    /// `m(left) ≠ m(right)`
    pub fn state_separation(&self, utility: &RegionUtility, left: StateId, right: StateId) -> Formula {
        Formula::ne(self.marking(utility, left), self.marking(utility, right))
    }

    pub fn region(&self, model: &Model) -> Region {
        let value = |var: &Var| BigInt::from(model.value(*var));
        Region::from_parts(
            self.backward.iter().map(value).collect(),
            self.forward.iter().map(value).collect(),
            value(&self.initial),
        )
    }
}

fn either_zero(left: Var, right: Var) -> Formula {
    Formula::or(vec![Formula::eq(left, 0i64), Formula::eq(right, 0i64)])
}

fn zero_or_equal(left: Var, right: Var) -> Formula {
    Formula::or(vec![
        Formula::eq(left, 0i64),
        Formula::eq(right, 0i64),
        Formula::eq(left, right),
    ])
}

pub(crate) fn at_most_one_positive(vars: &[Var]) -> Formula {
    Formula::and(
        vars.iter()
            .tuple_combinations()
            .map(|(&left, &right)| either_zero(left, right))
            .collect(),
    )
}

pub(crate) fn at_least_one_positive(vars: &[Var]) -> Formula {
    Formula::or(vars.iter().map(|&var| Formula::ge(var, 1i64)).collect())
}

fn enabling_states(utility: &RegionUtility, event: usize) -> Vec<StateId> {
    utility
        .reachable_states()
        .iter()
        .copied()
        .filter(|&state| utility.is_enabled(state, event))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::solver::{BranchBackend, CheckResult};
    use crate::ts::TransitionSystem;

    fn cycle() -> RegionUtility {
        let mut ts = TransitionSystem::new("s0");
        ts.add_arc_named("s0", "a", "s1");
        ts.add_arc_named("s1", "b", "s0");
        RegionUtility::new(ts)
    }

    #[test]
    fn solutions_are_valid_regions() {
        let utility = cycle();
        let properties = PnProperties::new().with(Structure::PURE);
        let mut backend = BranchBackend::new(8, 64, 10_000);
        let encoding = RegionEncoding::declare(&mut backend, &utility, &properties, "");
        backend.assert(encoding.region_constraints(&utility));
        backend.assert(encoding.structure_constraints(&utility, &properties));
        let s1 = utility.ts().state("s1").unwrap();
        let a = utility.event_index("a").unwrap();
        backend.assert(encoding.event_separation(&utility, s1, a));

        let CheckResult::Sat(model) = backend.check(&CancelToken::new()).unwrap() else {
            panic!("the cycle is solvable");
        };
        let region = encoding.region(&model);
        assert_eq!(region.check_valid(&utility), Ok(()));
        assert!(region.is_pure());
        assert!(region.separates_event(&utility, s1, a).unwrap());
    }

    #[test]
    fn bounded_markings_rule_out_separation() {
        let utility = cycle();
        let properties = PnProperties::new().with_k_bounded(0);
        let mut backend = BranchBackend::new(8, 64, 10_000);
        let encoding = RegionEncoding::declare(&mut backend, &utility, &properties, "");
        backend.assert(encoding.region_constraints(&utility));
        let s1 = utility.ts().state("s1").unwrap();
        backend.assert(encoding.event_separation(&utility, s1, utility.event_index("a").unwrap()));
        assert_eq!(backend.check(&CancelToken::new()).unwrap(), CheckResult::Unsat);
    }

    #[test]
    fn at_most_one_is_pairwise() {
        let vars = [Var(0), Var(1), Var(2)];
        assert!(at_most_one_positive(&vars).holds(&Model::new(vec![0, 3, 0])));
        assert!(!at_most_one_positive(&vars).holds(&Model::new(vec![1, 0, 1])));
        assert!(at_least_one_positive(&vars).holds(&Model::new(vec![0, 0, 1])));
    }
}
