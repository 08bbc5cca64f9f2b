//! Job storage implementations.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use oagr_core::{JobId, StateError};

use super::types::{JobQuery, JobRecord, JobStatusEntry};

/// Persistence adapter for job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace the record with the same id.
    async fn save(&self, record: &JobRecord) -> Result<(), JobStoreError>;

    async fn pull(&self, id: JobId) -> Result<Option<JobRecord>, JobStoreError>;

    async fn count(&self, query: &JobQuery) -> Result<usize, JobStoreError>;

    /// Matching records, ordered by id.
    async fn iterate(&self, query: &JobQuery) -> Result<Vec<JobRecord>, JobStoreError>;

    /// `{id, status}` of every record.
    async fn statuses(&self) -> Result<Vec<JobStatusEntry>, JobStoreError>;
}

#[async_trait]
impl<T: JobStore + ?Sized> JobStore for Arc<T> {
    async fn save(&self, record: &JobRecord) -> Result<(), JobStoreError> {
        (**self).save(record).await
    }

    async fn pull(&self, id: JobId) -> Result<Option<JobRecord>, JobStoreError> {
        (**self).pull(id).await
    }

    async fn count(&self, query: &JobQuery) -> Result<usize, JobStoreError> {
        (**self).count(query).await
    }

    async fn iterate(&self, query: &JobQuery) -> Result<Vec<JobRecord>, JobStoreError> {
        (**self).iterate(query).await
    }

    async fn statuses(&self) -> Result<Vec<JobStatusEntry>, JobStoreError> {
        (**self).statuses().await
    }
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<serde_json::Error> for JobStoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}

impl From<StateError> for JobStoreError {
    fn from(value: StateError) -> Self {
        Self::Serialization(value.to_string())
    }
}

/// In-memory job store for tests/dev.
///
/// Records are kept as JSON documents, so every save/pull goes through the
/// same encoding a durable store would use.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    records: RwLock<BTreeMap<JobId, Value>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn decode_all(&self) -> Result<Vec<JobRecord>, JobStoreError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        records
            .values()
            .map(|v| JobRecord::from_json(v.clone()).map_err(JobStoreError::from))
            .collect()
    }
}

fn poisoned() -> JobStoreError {
    JobStoreError::Storage("lock poisoned".to_string())
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn save(&self, record: &JobRecord) -> Result<(), JobStoreError> {
        let json = record.to_json()?;
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.insert(record.id(), json);
        Ok(())
    }

    async fn pull(&self, id: JobId) -> Result<Option<JobRecord>, JobStoreError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        match records.get(&id) {
            Some(v) => Ok(Some(JobRecord::from_json(v.clone())?)),
            None => Ok(None),
        }
    }

    async fn count(&self, query: &JobQuery) -> Result<usize, JobStoreError> {
        Ok(self.decode_all()?.iter().filter(|r| query.matches(r)).count())
    }

    async fn iterate(&self, query: &JobQuery) -> Result<Vec<JobRecord>, JobStoreError> {
        Ok(self
            .decode_all()?
            .into_iter()
            .filter(|r| query.matches(r))
            .collect())
    }

    async fn statuses(&self) -> Result<Vec<JobStatusEntry>, JobStoreError> {
        Ok(self
            .decode_all()?
            .into_iter()
            .map(|r| JobStatusEntry {
                id: r.id(),
                status: r.status,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::JobStatus;
    use chrono::{TimeZone, Utc};
    use oagr_core::{Identifier, RequestState, StateDefaults, StateParams};

    fn record(start_offset_secs: i64) -> JobRecord {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let start = t0 + chrono::Duration::seconds(start_offset_secs);
        let st = RequestState::new(
            [Identifier::parse("a").unwrap()],
            StateParams::default().starting_at(start),
            &StateDefaults::default(),
        )
        .unwrap();
        JobRecord::from_state(&st, t0)
    }

    #[tokio::test]
    async fn save_is_an_upsert_keyed_by_id() {
        let store = InMemoryJobStore::new();
        let mut rec = record(0);
        store.save(&rec).await.unwrap();

        rec.status = JobStatus::Finished;
        store.save(&rec).await.unwrap();

        assert_eq!(store.count(&JobQuery::All).await.unwrap(), 1);
        let pulled = store.pull(rec.id()).await.unwrap().unwrap();
        assert_eq!(pulled.status, JobStatus::Finished);
    }

    #[tokio::test]
    async fn pull_of_unknown_id_is_none() {
        let store = InMemoryJobStore::new();
        assert!(store.pull(JobId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn due_query_skips_jobs_not_yet_started() {
        let store = InMemoryJobStore::arc();
        let now_job = record(0);
        let later_job = record(3600);
        store.save(&now_job).await.unwrap();
        store.save(&later_job).await.unwrap();

        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let due = store.iterate(&JobQuery::Due { now }).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id(), now_job.id());
        assert_eq!(store.count(&JobQuery::Due { now }).await.unwrap(), 1);

        let statuses = store.statuses().await.unwrap();
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|s| s.status == JobStatus::Active));
    }
}
