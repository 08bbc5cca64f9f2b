//! `oagr-core` — domain model of bulk identifier resolution.
//!
//! This crate contains **pure domain** logic (no I/O): the per-job
//! `RequestState` ledger, the backoff policy it schedules with, and the plain
//! JSON document it is persisted as.

pub mod backoff;
pub mod error;
pub mod id;
pub mod state;
pub mod timestamp;

pub use backoff::BackoffPolicy;
pub use error::{StateError, StateResult};
pub use id::{Identifier, JobId};
pub use state::{
    ApplySummary, IdentifierStatus, JobOutcome, LookupResult, RequestState, RequestStateDocument,
    StateDefaults, StateParameters, StateParams, StatusReport,
};
