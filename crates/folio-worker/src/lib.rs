//! folio-worker
//!
//! The trade-ingestion worker: consumes trade-creation messages from the
//! durable queue, persists trades and reconciles positions inside one
//! transaction per message, and dead-letters anything it refuses to retry.
//!
//! The binary entry point is intentionally thin; the consume loop lives in
//! `consumer`, the per-message persistence pipeline in `processor`, and the
//! env-driven settings in `config`.

pub mod config;
pub mod consumer;
pub mod processor;

pub use config::WorkerConfig;
pub use consumer::TradeWorker;
pub use processor::{ProcessError, ProcessedBatch, TradeProcessor};
