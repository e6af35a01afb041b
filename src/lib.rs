//! 基于区域理论的 Petri 网合成。
//!
//! 给定带标签迁移系统，寻找一个 Petri 网，使其可达图与之同构（或在语言等价模式下语言相同）。
//! 每个区域对应网中的一个库所，每个事件对应一个变迁。

pub mod cancel;
pub mod config;
pub mod net;
pub mod options;
pub mod properties;
pub mod regions;
pub mod report;
pub mod separation;
pub mod solver;
pub mod synthesis;
pub mod ts;

pub use cancel::{CancelToken, Interrupted};
pub use config::SynthConfig;
pub use properties::{PnProperties, Structure};
pub use synthesis::{SynthesisError, SynthesisFlags, SynthesisResult, Synthesizer, synthesize};
pub use ts::TransitionSystem;
