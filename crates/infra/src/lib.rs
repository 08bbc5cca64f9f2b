//! Infrastructure layer: configuration, HTTP lookup, job persistence and the
//! job runner.

pub mod callbacks;
pub mod config;
pub mod http;
pub mod jobs;
pub mod lookup;

pub use callbacks::CsvExportCallback;
pub use config::{ConfigError, HttpConfig, OagrConfig, RunnerConfig};
pub use http::{HttpTransport, TransportError};
pub use lookup::{BatchClient, CycleReport, HttpLookup, LookupService};
