//! Shared types for the siphon ingestion engine.
//!
//! Record and schema models, batch framing, the structured error type, and
//! quarantine envelopes. Everything here is plain data: no IO, no runtime.

pub mod batch;
pub mod error;
pub mod outcome;
pub mod record;
pub mod schema;
