// lib.rs
// MoE 专家调度模拟库入口，声明并导出各子模块。
pub mod config;
pub mod error;
pub mod expert_cache;
pub mod report;
pub mod router;
pub mod scheduler;
pub mod simulator;
pub mod stats;
pub mod task;
pub mod token_dispatcher;
pub mod trace_generator;
pub mod trace_reader;
pub mod types;

pub use config::MoeConfig;
pub use error::{Error, Result};
pub use simulator::{LayerEvaluation, MoeLayerSimulator};
pub use stats::MoeStatsLog;
