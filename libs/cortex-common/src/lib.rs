pub mod config;
pub mod error;
pub mod exercise;
pub mod ledger;
pub mod orchestrator;
pub mod parser;
pub mod profile;
pub mod progress;
pub mod queue;
pub mod redis;
pub mod source;
pub mod store;
pub mod types;

pub use error::{EngineError, EngineResult};
