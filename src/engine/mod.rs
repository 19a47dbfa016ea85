//! Core engine: the inventory check → offer → confirm → accept loop.

pub mod account;
pub mod pipeline;
pub mod selector;

pub use account::Account;
pub use pipeline::{CycleOutcome, NextAction, PipelineConfig, RunSummary, TradePipeline};
