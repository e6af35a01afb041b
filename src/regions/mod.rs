//! # 区域理论（Region Theory）
//!
//! 区域 `r = (B, F, m0)` 为每个事件给出输入权重 `B[e]` 与输出权重 `F[e]`，
//! 有效权重 `W = F - B`。对可达状态 `s`，区域赋予标识 `m0 + W·P(s)`，
//! 其中 `P(s)` 为沿生成树到达 `s` 的 Parikh 向量。每个合法区域对应合成网中的一个库所。
//!
//! * [`utility`]：生成树、Parikh 向量与区域基的计算；
//! * [`basis`]：弦矩阵整数零空间的格基；
//! * [`region`]：不可变的区域值类型与可变的 [`RegionBuilder`]。

pub mod basis;
pub mod region;
pub mod utility;

use num::BigInt;
use thiserror::Error;

pub use region::{Region, RegionBuilder};
pub use utility::{EventArc, RegionUtility};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegionError {
    #[error("state `{0}` is not reachable from the initial state")]
    Unreachable(String),
    #[error("label `{0}` does not exist in the source region utility")]
    MissingLabel(String),
    #[error(transparent)]
    Invalid(#[from] InvalidRegion),
}

/// First violated region invariant, with the offending arc or state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidRegion {
    #[error("region covers {found} events, expected {expected}")]
    WrongArity { expected: usize, found: usize },
    #[error("region has a negative component on event `{event}`")]
    NegativeWeight { event: String },
    #[error("negative initial marking {0}")]
    NegativeInitialMarking(BigInt),
    #[error("arc {from} --{label}--> {to} is prevented: marking {marking} < backward weight {backward}")]
    PreventedArc {
        from: String,
        label: String,
        to: String,
        marking: BigInt,
        backward: BigInt,
    },
    #[error("arc {from} --{label}--> {to} leads to marking {found}, expected {expected}")]
    EffectMismatch {
        from: String,
        label: String,
        to: String,
        expected: BigInt,
        found: BigInt,
    },
    #[error("state `{state}` has negative marking {marking}")]
    NegativeMarking { state: String, marking: BigInt },
}
