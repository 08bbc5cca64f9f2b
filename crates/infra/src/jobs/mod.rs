//! Persisted identifier-resolution jobs and the loop that drives them.
//!
//! ## Components
//!
//! - `JobRecord`: a `RequestState` document plus derived status and counts
//! - `JobStore`: persistence adapter (in-memory or Postgres)
//! - `JobRunner`: sweeps the store for due jobs and cycles them
//! - `drive_to_completion`: runs a single job without any store

pub mod driver;
pub mod postgres;
pub mod runner;
pub mod store;
pub mod types;

pub use driver::{DriveOptions, drive_to_completion};
pub use postgres::PostgresJobStore;
pub use runner::{JobCallback, JobEvent, JobRunner, NoopCallback, RunnerError, SweepReport};
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use types::{JobQuery, JobRecord, JobStatus, JobStatusEntry};
