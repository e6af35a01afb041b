//! Z3 后端：一个持久的 `Context`/`Solver`，`push`/`pop` 直接映射到 Z3 的作用域。
//!
//! 变量上下界不作为断言加入（否则会被 `pop` 一并撤销），而是在每次 `check` 时作为假设传入。
use ouroboros::self_referencing;
use z3::ast::{Ast, Bool, Int};
use z3::{Config, Context, Params, SatResult, Solver};

use crate::cancel::{CancelToken, Interrupted};
use crate::solver::{CheckResult, ConstraintBackend, Formula, LinearExpr, Model, Relation, Var};

#[self_referencing]
struct Session {
    context: Context,

    #[borrows(context)]
    #[not_covariant]
    solver: Solver<'this>,

    #[borrows(context)]
    #[not_covariant]
    vars: Vec<Int<'this>>,

    /// Declared variable bounds, passed as assumptions.
    #[borrows(context)]
    #[not_covariant]
    bounds: Vec<Bool<'this>>,
}

pub struct Z3Backend {
    session: Session,
    depth: u32,
}

impl Z3Backend {
    pub fn new(timeout_ms: u32) -> Self {
        let session = SessionBuilder {
            context: Context::new(&Config::new()),
            solver_builder: |context| {
                let solver = Solver::new(context);
                if timeout_ms > 0 {
                    let mut params = Params::new(context);
                    params.set_u32("timeout", timeout_ms);
                    solver.set_params(&params);
                }
                solver
            },
            vars_builder: |_| Vec::new(),
            bounds_builder: |_| Vec::new(),
        }
        .build();
        Self { session, depth: 0 }
    }
}

impl Default for Z3Backend {
    fn default() -> Self {
        Self::new(0)
    }
}

fn translate_expr<'ctx>(ctx: &'ctx Context, vars: &[Int<'ctx>], expr: &LinearExpr) -> Int<'ctx> {
    let mut summands = expr
        .terms()
        .iter()
        .map(|(var, c)| Int::mul(ctx, &[&vars[var.index()], &Int::from_i64(ctx, *c)]))
        .collect::<Vec<_>>();
    summands.push(Int::from_i64(ctx, expr.constant_part()));
    Int::add(ctx, &summands.iter().collect::<Vec<_>>())
}

fn translate<'ctx>(ctx: &'ctx Context, vars: &[Int<'ctx>], formula: &Formula) -> Bool<'ctx> {
    match formula {
        Formula::True => Bool::from_bool(ctx, true),
        Formula::False => Bool::from_bool(ctx, false),
        Formula::Atom(atom) => {
            let expr = translate_expr(ctx, vars, &atom.expr);
            let zero = Int::from_i64(ctx, 0);
            match atom.relation {
                Relation::Le => expr.le(&zero),
                Relation::Ge => expr.ge(&zero),
                Relation::Eq => expr._eq(&zero),
            }
        }
        Formula::And(parts) => {
            let parts = parts
                .iter()
                .map(|p| translate(ctx, vars, p))
                .collect::<Vec<_>>();
            Bool::and(ctx, &parts.iter().collect::<Vec<_>>())
        }
        Formula::Or(parts) => {
            let parts = parts
                .iter()
                .map(|p| translate(ctx, vars, p))
                .collect::<Vec<_>>();
            Bool::or(ctx, &parts.iter().collect::<Vec<_>>())
        }
    }
}

impl ConstraintBackend for Z3Backend {
    fn new_var(&mut self, name: &str, lower: Option<i64>, upper: Option<i64>) -> Var {
        self.session.with_mut(|fields| {
            let ctx = fields.context;
            let index = fields.vars.len();
            let var = Int::new_const(ctx, format!("{name}#{index}"));
            if let Some(lower) = lower {
                fields.bounds.push(var.ge(&Int::from_i64(ctx, lower)));
            }
            if let Some(upper) = upper {
                fields.bounds.push(var.le(&Int::from_i64(ctx, upper)));
            }
            fields.vars.push(var);
            Var(index)
        })
    }

    fn assert(&mut self, formula: Formula) {
        self.session.with_mut(|fields| {
            let constraint = translate(fields.context, &fields.vars[..], &formula);
            fields.solver.assert(&constraint);
        });
    }

    fn push(&mut self) {
        self.depth += 1;
        self.session.with_solver(|solver| solver.push());
    }

    fn pop(&mut self) {
        if self.depth == 0 {
            return;
        }
        self.depth -= 1;
        self.session.with_solver(|solver| solver.pop(1));
    }

    fn check(&mut self, cancel: &CancelToken) -> Result<CheckResult, Interrupted> {
        cancel.check()?;
        let result = self.session.with_mut(|fields| {
            let outcome = fields.solver.check_assumptions(&fields.bounds[..]);
            match outcome {
                SatResult::Sat => {
                    let Some(model) = fields.solver.get_model() else {
                        return CheckResult::Unknown;
                    };
                    let values = fields
                        .vars
                        .iter()
                        .map(|var| model.eval(var, true).and_then(|value| value.as_i64()))
                        .collect::<Option<Vec<_>>>();
                    match values {
                        Some(values) => CheckResult::Sat(Model::new(values)),
                        None => {
                            log::warn!("z3 model value does not fit into 64 bits");
                            CheckResult::Unknown
                        }
                    }
                }
                SatResult::Unsat => CheckResult::Unsat,
                SatResult::Unknown => {
                    log::debug!(
                        "z3 returned unknown: {}",
                        fields.solver.get_reason_unknown().unwrap_or_default()
                    );
                    CheckResult::Unknown
                }
            }
        });
        cancel.check()?;
        Ok(result)
    }

    fn name(&self) -> &'static str {
        "z3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_beyond_the_search_range_are_found() {
        let mut solver = Z3Backend::default();
        let x = solver.new_var("x", Some(0), None);
        solver.assert(Formula::ge(x, 1_000_000i64));
        let model = solver.check(&CancelToken::new()).unwrap().model().unwrap();
        assert!(model.value(x) >= 1_000_000);
    }

    #[test]
    fn unbounded_parity_conflict_is_unsat() {
        let mut solver = Z3Backend::default();
        let x = solver.new_var("x", None, None);
        let y = solver.new_var("y", None, None);
        solver.assert(Formula::eq(
            LinearExpr::term(x, 2) - LinearExpr::term(y, 2),
            1i64,
        ));
        assert_eq!(solver.check(&CancelToken::new()).unwrap(), CheckResult::Unsat);
    }

    #[test]
    fn scopes_map_onto_solver_push_and_pop() {
        let mut solver = Z3Backend::default();
        let x = solver.new_var("x", Some(0), Some(10));
        solver.assert(Formula::or(vec![Formula::le(x, 2i64), Formula::ge(x, 8i64)]));
        solver.push();
        solver.assert(Formula::ge(x, 3i64));
        let model = solver.check(&CancelToken::new()).unwrap().model().unwrap();
        assert!(model.value(x) >= 8);
        // declared inside the scope, its bounds survive the pop
        let y = solver.new_var("y", Some(5), Some(5));
        solver.assert(Formula::le(x, 7i64));
        assert_eq!(solver.check(&CancelToken::new()).unwrap(), CheckResult::Unsat);
        solver.pop();
        solver.assert(Formula::eq(x, LinearExpr::from(y) + LinearExpr::constant(3)));
        let model = solver.check(&CancelToken::new()).unwrap().model().unwrap();
        assert_eq!(model.value(y), 5);
        assert_eq!(model.value(x), 8);
    }

    #[test]
    fn unbalanced_pop_is_ignored() {
        let mut solver = Z3Backend::default();
        let x = solver.new_var("x", Some(1), None);
        solver.pop();
        solver.assert(Formula::le(x, 3i64));
        assert!(solver.check(&CancelToken::new()).unwrap().model().is_some());
    }
}
