//! # 整数约束后端
//!
//! 分离策略把区域定义与结构约束编码为整数线性约束的布尔组合，交给后端判定可满足性。
//! 后端接口刻意保持很小：整数变量（可带上下界）、线性原子 `expr ⋈ 0`
//! （`⋈ ∈ {≤, ≥, =}`）、合取/析取、`push`/`pop` 作用域以及 `check`。
//!
//! * `z3_backend::Z3Backend`：默认后端（`z3` feature，默认开启），整数不设上界，结论精确；
//! * [`search::BranchBackend`]：显式回退，区间传播 + 析取分支 + 二分标号。
//!   无界变量只在逐步加倍的有限范围内搜索，找不到解时只能回答 `Unknown`。

pub mod search;
#[cfg(feature = "z3")]
pub mod z3_backend;

use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

use crate::cancel::{CancelToken, Interrupted};
use crate::config::SolverConfig;

pub use search::BranchBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Var(pub(crate) usize);

impl Var {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

/// `Σ cᵢ·xᵢ + constant`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinearExpr {
    terms: Vec<(Var, i64)>,
    constant: i64,
}

impl LinearExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn constant(value: i64) -> Self {
        Self {
            terms: Vec::new(),
            constant: value,
        }
    }

    pub fn term(var: Var, coefficient: i64) -> Self {
        let mut expr = Self::new();
        expr.add_term(var, coefficient);
        expr
    }

    pub fn add_term(&mut self, var: Var, coefficient: i64) -> &mut Self {
        if coefficient == 0 {
            return self;
        }
        match self.terms.iter_mut().find(|(v, _)| *v == var) {
            Some((_, c)) => *c += coefficient,
            None => self.terms.push((var, coefficient)),
        }
        self.terms.retain(|(_, c)| *c != 0);
        self
    }

    pub fn add_constant(&mut self, value: i64) -> &mut Self {
        self.constant += value;
        self
    }

    pub fn terms(&self) -> &[(Var, i64)] {
        &self.terms
    }

    pub fn constant_part(&self) -> i64 {
        self.constant
    }

    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn evaluate(&self, model: &Model) -> i64 {
        self.terms
            .iter()
            .fold(self.constant, |acc, (var, c)| acc + c * model.value(*var))
    }

    pub fn scaled(mut self, factor: i64) -> Self {
        if factor == 0 {
            return Self::new();
        }
        for (_, c) in &mut self.terms {
            *c *= factor;
        }
        self.constant *= factor;
        self
    }
}

impl From<Var> for LinearExpr {
    fn from(var: Var) -> Self {
        LinearExpr::term(var, 1)
    }
}

impl From<i64> for LinearExpr {
    fn from(value: i64) -> Self {
        LinearExpr::constant(value)
    }
}

impl Add for LinearExpr {
    type Output = LinearExpr;

    fn add(mut self, rhs: LinearExpr) -> LinearExpr {
        for (var, c) in rhs.terms {
            self.add_term(var, c);
        }
        self.constant += rhs.constant;
        self
    }
}

impl Sub for LinearExpr {
    type Output = LinearExpr;

    fn sub(self, rhs: LinearExpr) -> LinearExpr {
        self + (-rhs)
    }
}

impl Neg for LinearExpr {
    type Output = LinearExpr;

    fn neg(self) -> LinearExpr {
        self.scaled(-1)
    }
}

impl Mul<i64> for LinearExpr {
    type Output = LinearExpr;

    fn mul(self, rhs: i64) -> LinearExpr {
        self.scaled(rhs)
    }
}

impl fmt::Display for LinearExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, (var, c)) in self.terms.iter().enumerate() {
            if idx > 0 {
                write!(f, " + ")?;
            }
            write!(f, "{c}*{var}")?;
        }
        if self.terms.is_empty() || self.constant != 0 {
            if !self.terms.is_empty() {
                write!(f, " + ")?;
            }
            write!(f, "{}", self.constant)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Le,
    Ge,
    Eq,
}

/// `expr ⋈ 0`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
    pub expr: LinearExpr,
    pub relation: Relation,
}

impl Atom {
    pub fn holds(&self, model: &Model) -> bool {
        let value = self.expr.evaluate(model);
        match self.relation {
            Relation::Le => value <= 0,
            Relation::Ge => value >= 0,
            Relation::Eq => value == 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Formula {
    True,
    False,
    Atom(Atom),
    And(Vec<Formula>),
    Or(Vec<Formula>),
}

impl Formula {
    fn atom(left: impl Into<LinearExpr>, right: impl Into<LinearExpr>, relation: Relation) -> Self {
        let expr = left.into() - right.into();
        if expr.is_constant() {
            let value = expr.constant_part();
            let holds = match relation {
                Relation::Le => value <= 0,
                Relation::Ge => value >= 0,
                Relation::Eq => value == 0,
            };
            return if holds { Formula::True } else { Formula::False };
        }
        Formula::Atom(Atom { expr, relation })
    }

    pub fn le(left: impl Into<LinearExpr>, right: impl Into<LinearExpr>) -> Self {
        Self::atom(left, right, Relation::Le)
    }

    pub fn ge(left: impl Into<LinearExpr>, right: impl Into<LinearExpr>) -> Self {
        Self::atom(left, right, Relation::Ge)
    }

    pub fn eq(left: impl Into<LinearExpr>, right: impl Into<LinearExpr>) -> Self {
        Self::atom(left, right, Relation::Eq)
    }

    pub fn lt(left: impl Into<LinearExpr>, right: impl Into<LinearExpr>) -> Self {
        let mut right = right.into();
        right.add_constant(-1);
        Self::le(left, right)
    }

    pub fn gt(left: impl Into<LinearExpr>, right: impl Into<LinearExpr>) -> Self {
        let mut right = right.into();
        right.add_constant(1);
        Self::ge(left, right)
    }

    pub fn ne(left: impl Into<LinearExpr>, right: impl Into<LinearExpr>) -> Self {
        let (left, right) = (left.into(), right.into());
        Self::or(vec![
            Self::lt(left.clone(), right.clone()),
            Self::gt(left, right),
        ])
    }

    pub fn and(parts: Vec<Formula>) -> Self {
        let mut flat = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Formula::True => {}
                Formula::False => return Formula::False,
                Formula::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Formula::True,
            1 => flat.pop().unwrap_or(Formula::True),
            _ => Formula::And(flat),
        }
    }

    pub fn or(parts: Vec<Formula>) -> Self {
        let mut flat = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Formula::False => {}
                Formula::True => return Formula::True,
                Formula::Or(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Formula::False,
            1 => flat.pop().unwrap_or(Formula::False),
            _ => Formula::Or(flat),
        }
    }

    pub fn holds(&self, model: &Model) -> bool {
        match self {
            Formula::True => true,
            Formula::False => false,
            Formula::Atom(atom) => atom.holds(model),
            Formula::And(parts) => parts.iter().all(|p| p.holds(model)),
            Formula::Or(parts) => parts.iter().any(|p| p.holds(model)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    values: Vec<i64>,
}

impl Model {
    pub fn new(values: Vec<i64>) -> Self {
        Self { values }
    }

    pub fn value(&self, var: Var) -> i64 {
        self.values.get(var.0).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResult {
    Sat(Model),
    Unsat,
    /// The backend gave up (node limit, magnitude limit or timeout); not a proof of anything.
    Unknown,
}

impl CheckResult {
    pub fn model(self) -> Option<Model> {
        match self {
            CheckResult::Sat(model) => Some(model),
            _ => None,
        }
    }
}

pub trait ConstraintBackend {
    /// Variables outlive `pop`; only asserted formulas are scoped.
    fn new_var(&mut self, name: &str, lower: Option<i64>, upper: Option<i64>) -> Var;
    fn assert(&mut self, formula: Formula);
    fn push(&mut self);
    fn pop(&mut self);
    fn check(&mut self, cancel: &CancelToken) -> Result<CheckResult, Interrupted>;
    fn name(&self) -> &'static str;
}

/// Backend selected by the configuration; falls back to the built-in search.
pub fn new_backend(config: &SolverConfig) -> Box<dyn ConstraintBackend> {
    #[cfg(feature = "z3")]
    if config.use_z3 {
        return Box::new(z3_backend::Z3Backend::new(config.timeout_ms));
    }
    Box::new(BranchBackend::new(
        config.max_value,
        config.max_value_limit,
        config.node_limit,
    ))
}

/// Whether `Unsat` from [`new_backend`] is a proof over unbounded integers.
pub fn backend_is_exact(config: &SolverConfig) -> bool {
    cfg!(feature = "z3") && config.use_z3
}
