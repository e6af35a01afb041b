//! 内置约束求解：有界整数域上的区间传播与深度优先搜索。
//!
//! 每个搜索节点保存变量区间 `[lo, hi]`、硬约束原子以及尚未确定的析取。
//! 节点先做边界一致性传播；析取中被蕴含的分支使整个析取满足，不可行的分支被删除，
//! 只剩一个分支时将其提升为硬约束。之后优先在分支最少的析取上分裂，
//! 否则对区间最小的变量二分（先试离零更近的一半）。
//!
//! 声明时没有上下界的变量先限制在 `±max_value` 内；无解时范围加倍重搜，直到 `max_value_limit`。
//! 只有所有变量都有声明的界时，搜索穷尽才给出 `Unsat`，否则给出 `Unknown`。
use std::rc::Rc;

use crate::cancel::{CancelToken, Interrupted};
use crate::solver::{Atom, CheckResult, ConstraintBackend, Formula, Model, Relation, Var};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Entailed,
    Infeasible,
    Open,
}

/// Atom in `Σ cᵢ·xᵢ + k ≤ 0` form (equalities are stored as two of them).
#[derive(Debug, Clone)]
struct Bound {
    terms: Vec<(usize, i128)>,
    constant: i128,
}

impl Bound {
    fn from_atom(atom: &Atom) -> Vec<Bound> {
        let le = Bound {
            terms: atom
                .expr
                .terms()
                .iter()
                .map(|(var, c)| (var.index(), *c as i128))
                .collect(),
            constant: atom.expr.constant_part() as i128,
        };
        match atom.relation {
            Relation::Le => vec![le],
            Relation::Ge => vec![le.negated()],
            Relation::Eq => {
                let ge = le.negated();
                vec![le, ge]
            }
        }
    }

    fn negated(&self) -> Bound {
        Bound {
            terms: self.terms.iter().map(|(v, c)| (*v, -c)).collect(),
            constant: -self.constant,
        }
    }

    fn min(&self, domains: &Domains) -> i128 {
        self.terms.iter().fold(self.constant, |acc, (v, c)| {
            acc + if *c > 0 {
                c * domains.lo[*v]
            } else {
                c * domains.hi[*v]
            }
        })
    }

    fn max(&self, domains: &Domains) -> i128 {
        self.terms.iter().fold(self.constant, |acc, (v, c)| {
            acc + if *c > 0 {
                c * domains.hi[*v]
            } else {
                c * domains.lo[*v]
            }
        })
    }

    fn status(&self, domains: &Domains) -> Status {
        if self.max(domains) <= 0 {
            Status::Entailed
        } else if self.min(domains) > 0 {
            Status::Infeasible
        } else {
            Status::Open
        }
    }

    /// Tightens the domains; `Err` on an empty domain.
    fn propagate(&self, domains: &mut Domains) -> Result<bool, ()> {
        let total = self.min(domains);
        if total > 0 {
            return Err(());
        }
        let mut changed = false;
        for (v, c) in &self.terms {
            let own = if *c > 0 {
                c * domains.lo[*v]
            } else {
                c * domains.hi[*v]
            };
            // c·x ≤ -(total - own)
            let room = own - total;
            if *c > 0 {
                let upper = room.div_euclid(*c);
                if upper < domains.hi[*v] {
                    domains.hi[*v] = upper;
                    changed = true;
                }
            } else {
                // euclidean division by a negative divisor rounds up
                let lower = room.div_euclid(*c);
                if lower > domains.lo[*v] {
                    domains.lo[*v] = lower;
                    changed = true;
                }
            }
            if domains.lo[*v] > domains.hi[*v] {
                return Err(());
            }
        }
        Ok(changed)
    }
}

#[derive(Debug, Clone)]
struct Domains {
    lo: Vec<i128>,
    hi: Vec<i128>,
}

impl Domains {
    fn formula_status(&self, formula: &Formula) -> Status {
        match formula {
            Formula::True => Status::Entailed,
            Formula::False => Status::Infeasible,
            Formula::Atom(atom) => {
                let parts = Bound::from_atom(atom);
                let statuses = parts.iter().map(|b| b.status(self)).collect::<Vec<_>>();
                if statuses.contains(&Status::Infeasible) {
                    Status::Infeasible
                } else if statuses.iter().all(|s| *s == Status::Entailed) {
                    Status::Entailed
                } else {
                    Status::Open
                }
            }
            Formula::And(parts) => {
                let mut all = true;
                for part in parts {
                    match self.formula_status(part) {
                        Status::Infeasible => return Status::Infeasible,
                        Status::Open => all = false,
                        Status::Entailed => {}
                    }
                }
                if all { Status::Entailed } else { Status::Open }
            }
            Formula::Or(parts) => {
                let mut none = true;
                for part in parts {
                    match self.formula_status(part) {
                        Status::Entailed => return Status::Entailed,
                        Status::Open => none = false,
                        Status::Infeasible => {}
                    }
                }
                if none { Status::Infeasible } else { Status::Open }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    domains: Domains,
    bounds: Vec<Rc<Bound>>,
    choices: Vec<Rc<[Formula]>>,
}

impl Node {
    /// Adds a formula as hard constraint; nested disjunctions become choices.
    fn add(&mut self, formula: &Formula) -> Result<(), ()> {
        match formula {
            Formula::True => Ok(()),
            Formula::False => Err(()),
            Formula::Atom(atom) => {
                self.bounds
                    .extend(Bound::from_atom(atom).into_iter().map(Rc::new));
                Ok(())
            }
            Formula::And(parts) => parts.iter().try_for_each(|part| self.add(part)),
            Formula::Or(parts) => {
                self.choices.push(Rc::from(parts.as_slice()));
                Ok(())
            }
        }
    }

    /// Fixpoint of bound propagation and choice simplification.
    fn settle(&mut self) -> Result<(), ()> {
        loop {
            let mut changed = true;
            while changed {
                changed = false;
                for bound in &self.bounds {
                    changed |= bound.propagate(&mut self.domains)?;
                }
            }

            let mut promoted = Vec::new();
            let mut kept = Vec::with_capacity(self.choices.len());
            for choice in self.choices.drain(..) {
                let mut open = Vec::new();
                let mut satisfied = false;
                for (idx, alternative) in choice.iter().enumerate() {
                    match self.domains.formula_status(alternative) {
                        Status::Entailed => {
                            satisfied = true;
                            break;
                        }
                        Status::Open => open.push(idx),
                        Status::Infeasible => {}
                    }
                }
                if satisfied {
                    continue;
                }
                match open.as_slice() {
                    [] => return Err(()),
                    [single] => promoted.push(choice[*single].clone()),
                    _ if open.len() == choice.len() => kept.push(choice),
                    _ => kept.push(open.iter().map(|&i| choice[i].clone()).collect()),
                }
            }
            self.choices = kept;
            if promoted.is_empty() {
                return Ok(());
            }
            for formula in &promoted {
                self.add(formula)?;
            }
        }
    }
}

enum Outcome {
    Sat(Model),
    Exhausted,
    GaveUp,
}

/// Built-in backend: search over integer domains bounded by a growing magnitude.
pub struct BranchBackend {
    lower: Vec<Option<i64>>,
    upper: Vec<Option<i64>>,
    names: Vec<String>,
    formulas: Vec<Formula>,
    frames: Vec<usize>,
    max_value: i64,
    max_value_limit: i64,
    node_limit: usize,
}

impl BranchBackend {
    pub fn new(max_value: i64, max_value_limit: i64, node_limit: usize) -> Self {
        let max_value = max_value.max(1);
        Self {
            lower: Vec::new(),
            upper: Vec::new(),
            names: Vec::new(),
            formulas: Vec::new(),
            frames: Vec::new(),
            max_value,
            max_value_limit: max_value_limit.max(max_value),
            node_limit: node_limit.max(1),
        }
    }

    pub fn var_name(&self, var: Var) -> &str {
        self.names.get(var.index()).map(String::as_str).unwrap_or("?")
    }

    fn model_of(domains: &Domains) -> Model {
        Model::new(
            domains
                .lo
                .iter()
                .zip(domains.hi.iter())
                .map(|(&lo, &hi)| closest_to_zero(lo, hi) as i64)
                .collect(),
        )
    }
}

fn closest_to_zero(lo: i128, hi: i128) -> i128 {
    if lo > 0 {
        lo
    } else if hi < 0 {
        hi
    } else {
        0
    }
}

impl BranchBackend {
    fn is_bounded(&self) -> bool {
        self.lower.iter().all(Option::is_some) && self.upper.iter().all(Option::is_some)
    }

    fn search(&self, magnitude: i64, cancel: &CancelToken) -> Result<Outcome, Interrupted> {
        let magnitude = i128::from(magnitude);
        let lo = self
            .lower
            .iter()
            .map(|bound| bound.map_or(-magnitude, i128::from))
            .collect::<Vec<_>>();
        let hi = self
            .upper
            .iter()
            .zip(lo.iter())
            .map(|(bound, &lo)| bound.map_or(magnitude.max(lo), i128::from))
            .collect();
        let mut root = Node {
            domains: Domains { lo, hi },
            bounds: Vec::new(),
            choices: Vec::new(),
        };
        for formula in &self.formulas {
            if root.add(formula).is_err() {
                return Ok(Outcome::Exhausted);
            }
        }

        let mut stack = vec![root];
        let mut nodes = 0usize;
        while let Some(mut node) = stack.pop() {
            cancel.check()?;
            nodes += 1;
            if nodes > self.node_limit {
                log::debug!("constraint search gave up after {} nodes", self.node_limit);
                return Ok(Outcome::GaveUp);
            }
            if node.settle().is_err() {
                continue;
            }

            if let Some((position, _)) = node
                .choices
                .iter()
                .enumerate()
                .min_by_key(|(_, choice)| choice.len())
            {
                let choice = node.choices.swap_remove(position);
                for alternative in choice.iter().rev() {
                    let mut child = node.clone();
                    if child.add(alternative).is_ok() {
                        stack.push(child);
                    }
                }
                continue;
            }

            let domains = &node.domains;
            let branch_var = node
                .bounds
                .iter()
                .flat_map(|bound| bound.terms.iter().map(|(v, _)| *v))
                .filter(|&v| domains.lo[v] < domains.hi[v])
                .min_by_key(|&v| (domains.hi[v] - domains.lo[v], v));
            let Some(var) = branch_var else {
                let model = Self::model_of(&node.domains);
                debug_assert!(self.formulas.iter().all(|f| f.holds(&model)));
                return Ok(Outcome::Sat(model));
            };

            let (lo, hi) = (node.domains.lo[var], node.domains.hi[var]);
            let (near, far) = if lo >= 0 {
                let mid = lo + (hi - lo) / 2;
                ((lo, mid), (mid + 1, hi))
            } else if hi <= 0 {
                let mid = hi - (hi - lo) / 2;
                ((mid, hi), (lo, mid - 1))
            } else {
                ((0, hi), (lo, -1))
            };
            for (from, to) in [far, near] {
                let mut child = node.clone();
                child.domains.lo[var] = from;
                child.domains.hi[var] = to;
                stack.push(child);
            }
        }
        Ok(Outcome::Exhausted)
    }
}

impl ConstraintBackend for BranchBackend {
    fn new_var(&mut self, name: &str, lower: Option<i64>, upper: Option<i64>) -> Var {
        let var = Var(self.lower.len());
        self.lower.push(lower);
        self.upper.push(upper);
        self.names.push(name.to_string());
        var
    }

    fn assert(&mut self, formula: Formula) {
        self.formulas.push(formula);
    }

    fn push(&mut self) {
        self.frames.push(self.formulas.len());
    }

    fn pop(&mut self) {
        if let Some(len) = self.frames.pop() {
            self.formulas.truncate(len);
        }
    }

    fn check(&mut self, cancel: &CancelToken) -> Result<CheckResult, Interrupted> {
        let bounded = self.is_bounded();
        let mut magnitude = self.max_value;
        loop {
            match self.search(magnitude, cancel)? {
                Outcome::Sat(model) => return Ok(CheckResult::Sat(model)),
                Outcome::GaveUp => return Ok(CheckResult::Unknown),
                Outcome::Exhausted if bounded => return Ok(CheckResult::Unsat),
                Outcome::Exhausted if magnitude >= self.max_value_limit => {
                    log::debug!("no solution with magnitudes up to {magnitude}");
                    return Ok(CheckResult::Unknown);
                }
                Outcome::Exhausted => {
                    magnitude = magnitude.saturating_mul(2).min(self.max_value_limit);
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "branch"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::LinearExpr;

    fn backend() -> BranchBackend {
        BranchBackend::new(16, 256, 10_000)
    }

    #[test]
    fn solves_linear_system() {
        let mut solver = backend();
        let x = solver.new_var("x", Some(0), None);
        let y = solver.new_var("y", Some(0), None);
        solver.assert(Formula::eq(LinearExpr::from(x) + LinearExpr::term(y, 2), 7i64));
        solver.assert(Formula::gt(x, y));
        let model = solver.check(&CancelToken::new()).unwrap().model().unwrap();
        assert_eq!(model.value(x) + 2 * model.value(y), 7);
        assert!(model.value(x) > model.value(y));
    }

    #[test]
    fn parity_conflict_is_unsat_only_on_declared_bounds() {
        let parity = |solver: &mut BranchBackend, x: Var, y: Var| {
            // 2x - 2y = 1 has no integer solution
            solver.assert(Formula::eq(
                LinearExpr::term(x, 2) - LinearExpr::term(y, 2),
                1i64,
            ));
        };
        let mut solver = backend();
        let x = solver.new_var("x", Some(-8), Some(8));
        let y = solver.new_var("y", Some(-8), Some(8));
        parity(&mut solver, x, y);
        assert_eq!(solver.check(&CancelToken::new()).unwrap(), CheckResult::Unsat);

        let mut solver = backend();
        let x = solver.new_var("x", None, None);
        let y = solver.new_var("y", Some(0), None);
        parity(&mut solver, x, y);
        assert_eq!(solver.check(&CancelToken::new()).unwrap(), CheckResult::Unknown);
    }

    #[test]
    fn search_range_grows_past_the_first_magnitude() {
        let mut solver = backend();
        let x = solver.new_var("x", Some(0), None);
        let y = solver.new_var("y", Some(0), None);
        solver.assert(Formula::eq(LinearExpr::from(x) - LinearExpr::from(y), 100i64));
        let model = solver.check(&CancelToken::new()).unwrap().model().unwrap();
        assert_eq!(model.value(x) - model.value(y), 100);

        solver.assert(Formula::ge(y, 1_000i64));
        assert_eq!(solver.check(&CancelToken::new()).unwrap(), CheckResult::Unknown);
    }

    #[test]
    fn disjunctions_and_scopes() {
        let mut solver = backend();
        let x = solver.new_var("x", Some(0), Some(10));
        solver.assert(Formula::or(vec![Formula::le(x, 2i64), Formula::ge(x, 8i64)]));
        solver.push();
        solver.assert(Formula::ge(x, 3i64));
        let model = solver.check(&CancelToken::new()).unwrap().model().unwrap();
        assert!(model.value(x) >= 8);
        solver.assert(Formula::le(x, 7i64));
        assert_eq!(solver.check(&CancelToken::new()).unwrap(), CheckResult::Unsat);
        solver.pop();
        let model = solver.check(&CancelToken::new()).unwrap().model().unwrap();
        assert_eq!(model.value(x), 0);
    }

    #[test]
    fn prefers_small_magnitudes() {
        let mut solver = backend();
        let x = solver.new_var("x", None, None);
        solver.assert(Formula::ne(x, 0i64));
        let model = solver.check(&CancelToken::new()).unwrap().model().unwrap();
        assert_eq!(model.value(x).abs(), 1);
    }

    #[test]
    fn cancellation_interrupts() {
        let mut solver = backend();
        let x = solver.new_var("x", None, None);
        solver.assert(Formula::ne(x, 0i64));
        let cancel = CancelToken::new();
        cancel.cancel();
        assert_eq!(solver.check(&cancel), Err(Interrupted));
    }
}
