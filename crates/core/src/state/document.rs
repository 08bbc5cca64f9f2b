//! Plain-data JSON form of a `RequestState`.
//!
//! Field names and the timestamp format are read by external tooling, so
//! this layout is a compatibility surface. The runtime result buffers are not
//! part of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{Identifier, JobId};
use crate::timestamp::{serde_format, serde_format_opt};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestStateDocument {
    pub id: JobId,
    #[serde(with = "serde_format")]
    pub start: DateTime<Utc>,
    #[serde(default, with = "serde_format_opt", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<DateTime<Utc>>,
    pub back_off_factor: f64,
    pub max_back_off: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    pub batch_size: usize,
    #[serde(default)]
    pub success: Vec<ResolvedEntry>,
    #[serde(default)]
    pub error: Vec<ResolvedEntry>,
    #[serde(default)]
    pub pending: Vec<PendingEntry>,
    #[serde(default)]
    pub maxed: Vec<MaxedEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub id: Identifier,
    #[serde(with = "serde_format")]
    pub init: DateTime<Utc>,
    #[serde(with = "serde_format")]
    pub due: DateTime<Utc>,
    pub requested: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedEntry {
    pub id: Identifier,
    #[serde(with = "serde_format")]
    pub init: DateTime<Utc>,
    pub requested: u32,
    #[serde(with = "serde_format")]
    pub found: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaxedEntry {
    pub id: Identifier,
    #[serde(with = "serde_format")]
    pub init: DateTime<Utc>,
    pub requested: u32,
}
