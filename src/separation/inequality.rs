//! 基于区域基的不等式求解。
//!
//! 区域的有效权重写成区域基的整数组合 `W = Σ cᵢ·wᵢ`，状态标识 `m(s) = m0 + Σ cᵢ·wᵢ·P(s)`
//! 对未知量 `c`、`m0` 线性。弦方程由区域基自动满足，只需对每个实例求解一个小的不等式组。
//! 非纯情形下被分离事件 `e` 额外带一个自环 `β`：输入权重为 `β`，输出权重为 `β + W[e]`。
use num::{BigInt, ToPrimitive};

use crate::cancel::Interrupted;
use crate::properties::Structure;
use crate::regions::{Region, RegionBuilder};
use crate::separation::{Separation, SeparationContext};
use crate::solver::{
    CheckResult, ConstraintBackend, Formula, LinearExpr, Model, Var, backend_is_exact, new_backend,
};
use crate::ts::StateId;

pub struct InequalitySeparation {
    context: SeparationContext,
    /// `weights[i][e]`: effective weight of basis region `i` on event `e`.
    weights: Vec<Vec<i64>>,
    /// `effects[i][p]`: effect of basis region `i` at the reachable state with position `p`.
    effects: Vec<Vec<i64>>,
    gave_up: usize,
}

struct Unknowns {
    coefficients: Vec<Var>,
    initial: Var,
}

impl InequalitySeparation {
    pub fn create(context: &SeparationContext) -> Option<Box<dyn Separation>> {
        if !context
            .properties
            .structure_within(Structure::PURE | Structure::PLAIN)
            || context.utility.ts().has_locations()
        {
            return None;
        }
        let utility = &context.utility;
        let Ok(basis) = utility.prepare_basis(&context.cancel) else {
            log::debug!("region basis interrupted, inequality separation left out");
            return None;
        };
        let mut weights = Vec::new();
        let mut effects = Vec::new();
        for region in basis {
            weights.push(
                region
                    .weights()
                    .iter()
                    .map(ToPrimitive::to_i64)
                    .collect::<Option<Vec<_>>>()?,
            );
            effects.push(
                utility
                    .reachable_states()
                    .iter()
                    .map(|&state| {
                        let parikh = utility.reaching_parikh_vector(state).ok()?;
                        region.evaluate(parikh).to_i64()
                    })
                    .collect::<Option<Vec<_>>>()?,
            );
        }
        Some(Box::new(Self {
            context: context.clone(),
            weights,
            effects,
            gave_up: 0,
        }))
    }

    fn marking_bound(&self) -> Option<i64> {
        self.context
            .properties
            .k_bounded()
            .map(|k| i64::try_from(k).unwrap_or(i64::MAX))
    }

    fn declare(&self, backend: &mut dyn ConstraintBackend) -> Unknowns {
        let coefficients = (0..self.weights.len())
            .map(|i| backend.new_var(&format!("c{i}"), None, None))
            .collect();
        let initial = backend.new_var("m0", Some(0), self.marking_bound());
        if let Some(k) = self.context.properties.k_marking() {
            let k = i64::try_from(k).unwrap_or(i64::MAX);
            let upper = self.marking_bound().map(|bound| bound / k);
            let factor = backend.new_var("y", Some(0), upper);
            backend.assert(Formula::eq(initial, LinearExpr::term(factor, k)));
        }
        Unknowns {
            coefficients,
            initial,
        }
    }

    fn weight(&self, unknowns: &Unknowns, event: usize) -> LinearExpr {
        let mut expr = LinearExpr::new();
        for (i, &c) in unknowns.coefficients.iter().enumerate() {
            expr.add_term(c, self.weights[i][event]);
        }
        expr
    }

    fn marking(&self, unknowns: &Unknowns, state: StateId) -> LinearExpr {
        let mut expr = LinearExpr::from(unknowns.initial);
        if let Some(position) = self.context.utility.position(state) {
            for (i, &c) in unknowns.coefficients.iter().enumerate() {
                expr.add_term(c, self.effects[i][position]);
            }
        }
        expr
    }

    /// Non-negative, bounded markings and plain weights outside `except`.
    fn base_constraints(&self, unknowns: &Unknowns, except: Option<usize>) -> Formula {
        let utility = &self.context.utility;
        let mut parts = Vec::new();
        for &state in utility.reachable_states() {
            let marking = self.marking(unknowns, state);
            parts.push(Formula::ge(marking.clone(), 0i64));
            if let Some(bound) = self.marking_bound() {
                parts.push(Formula::le(marking, bound));
            }
        }
        if self.context.properties.is_plain() {
            for event in (0..utility.event_count()).filter(|e| Some(*e) != except) {
                parts.push(Formula::le(self.weight(unknowns, event), 1i64));
                parts.push(Formula::ge(self.weight(unknowns, event), -1i64));
            }
        }
        Formula::and(parts)
    }

    fn check(&mut self, backend: &mut dyn ConstraintBackend) -> Result<Option<Model>, Interrupted> {
        Ok(match backend.check(&self.context.cancel)? {
            CheckResult::Sat(model) => Some(model),
            CheckResult::Unsat => None,
            CheckResult::Unknown => {
                self.gave_up += 1;
                None
            }
        })
    }

    fn builder(&self, coefficients: &[i64], except: Option<usize>) -> RegionBuilder {
        let utility = &self.context.utility;
        let mut builder = RegionBuilder::new(utility.event_count());
        for event in (0..utility.event_count()).filter(|e| Some(*e) != except) {
            let weight = coefficients
                .iter()
                .enumerate()
                .fold(BigInt::from(0), |acc, (i, c)| {
                    acc + BigInt::from(*c) * BigInt::from(self.weights[i][event])
                });
            builder.add_weight_on(event, weight);
        }
        builder
    }

    fn accept(&self, region: Region) -> Option<Region> {
        match region.check_valid(&self.context.utility) {
            Ok(()) => Some(region),
            Err(err) => {
                log::warn!("inequality system produced an invalid region: {err}");
                None
            }
        }
    }
}

impl Separation for InequalitySeparation {
    fn name(&self) -> &'static str {
        "inequality"
    }

    fn separate_states(
        &mut self,
        left: StateId,
        right: StateId,
    ) -> Result<Option<Region>, Interrupted> {
        self.context.cancel.check()?;
        let mut backend = new_backend(&self.context.config.solver);
        let unknowns = self.declare(backend.as_mut());
        backend.assert(self.base_constraints(&unknowns, None));
        backend.assert(Formula::ne(
            self.marking(&unknowns, left),
            self.marking(&unknowns, right),
        ));
        let Some(model) = self.check(backend.as_mut())? else {
            return Ok(None);
        };
        let coefficients = unknowns
            .coefficients
            .iter()
            .map(|&c| model.value(c))
            .collect::<Vec<_>>();
        let region = self
            .builder(&coefficients, None)
            .with_initial_marking(model.value(unknowns.initial));
        Ok(self.accept(region))
    }

    fn separate_event(
        &mut self,
        state: StateId,
        event: usize,
    ) -> Result<Option<Region>, Interrupted> {
        self.context.cancel.check()?;
        let utility = self.context.utility.clone();
        let properties = self.context.properties;
        let mut backend = new_backend(&self.context.config.solver);
        let unknowns = self.declare(backend.as_mut());
        let loop_weight = backend.new_var("beta", Some(0), None);
        let weight = self.weight(&unknowns, event);
        let produced = LinearExpr::from(loop_weight) + weight.clone();

        backend.assert(self.base_constraints(&unknowns, Some(event)));
        backend.assert(Formula::ge(produced.clone(), 0i64));
        if properties.is_pure() {
            backend.assert(Formula::eq(produced.clone(), 0i64));
        }
        if properties.is_plain() {
            backend.assert(Formula::le(loop_weight, 1i64));
            backend.assert(Formula::le(produced, 1i64));
        }
        for arc in utility.arcs().iter().filter(|arc| arc.event == event) {
            backend.assert(Formula::ge(self.marking(&unknowns, arc.source), loop_weight));
        }
        backend.assert(Formula::lt(self.marking(&unknowns, state), loop_weight));

        let Some(model) = self.check(backend.as_mut())? else {
            return Ok(None);
        };
        let coefficients = unknowns
            .coefficients
            .iter()
            .map(|&c| model.value(c))
            .collect::<Vec<_>>();
        let separated_weight = weight.evaluate(&model);
        let mut builder = self.builder(&coefficients, Some(event));
        builder.add_weight_on(event, separated_weight);
        builder.add_loop_around(event, model.value(loop_weight) - (-separated_weight).max(0));
        let region = builder.with_initial_marking(model.value(unknowns.initial));
        Ok(self.accept(region))
    }

    fn is_exact(&self) -> bool {
        backend_is_exact(&self.context.config.solver)
    }

    fn inconclusive(&self) -> usize {
        self.gave_up
    }
}
