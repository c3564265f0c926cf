//! The siphon ingestion engine.
//!
//! Pulls XML documents from a subscribed topic, decodes them against a fixed
//! record schema, accumulates decoded records into batches, and commits each
//! batch to a relational store in a single transaction before acknowledging
//! the underlying deliveries. Failed records are quarantined, never dropped
//! silently.
//!
//! The [`coordinator`] module owns the run lifecycle; everything else is a
//! stage or seam it wires together.

pub mod batcher;
pub mod broker;
pub mod config;
pub mod coordinator;
pub mod decoder;
pub mod errors;
pub mod postgres;
pub mod progress;
pub mod quarantine;
pub mod queue;
pub mod result;
pub mod sink;
pub mod synthetic;
pub mod writer;

pub use coordinator::{run_ingest, CoordinatorState, IngestHarness};
pub use errors::EngineError;
pub use result::RunResult;
