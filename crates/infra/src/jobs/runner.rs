//! Sweep loop driving every persisted job with due work.

use std::future::Future;

use chrono::{DateTime, Utc};
use oagr_core::{
    Identifier, JobId, RequestState, StateDefaults, StateError, StateParams, timestamp,
};
use tracing::{debug, error, info};

use super::store::{JobStore, JobStoreError};
use super::types::{JobQuery, JobRecord};
use crate::config::RunnerConfig;
use crate::lookup::{BatchClient, CycleReport, LookupService};

/// Lifecycle points at which the runner hands a state to its callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    /// A cycle ran; buffers hold what it resolved.
    Cycle,
    /// The job just became finished and has been persisted.
    Finished,
}

impl JobEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cycle => "cycle",
            Self::Finished => "finished",
        }
    }
}

impl std::fmt::Display for JobEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side effects run on job events (exports, notifications).
///
/// The state is mutable so callbacks can drain the result buffers.
pub trait JobCallback: Send + Sync {
    fn on_event(&self, event: JobEvent, state: &mut RequestState);
}

impl<F> JobCallback for F
where
    F: Fn(JobEvent, &mut RequestState) + Send + Sync,
{
    fn on_event(&self, event: JobEvent, state: &mut RequestState) {
        self(event, state)
    }
}

/// Callback that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallback;

impl JobCallback for NoopCallback {
    fn on_event(&self, _event: JobEvent, _state: &mut RequestState) {}
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("{failed} job(s) failed during the sweep; first error: {first}")]
    JobsFailed { failed: usize, first: String },
}

/// Totals for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Jobs that had due work.
    pub jobs: usize,
    pub finished: usize,
    pub failed: usize,
}

impl SweepReport {
    pub fn is_idle(&self) -> bool {
        self.jobs == 0
    }
}

/// Polls the store for due jobs and cycles them one at a time.
///
/// The runner owns each job for the whole of its cycle, so within one runner
/// a job never has two cycles in flight.
pub struct JobRunner<S, L, C> {
    store: S,
    client: BatchClient<L>,
    callback: C,
    config: RunnerConfig,
    defaults: StateDefaults,
}

impl<S, L, C> JobRunner<S, L, C>
where
    S: JobStore,
    L: LookupService,
    C: JobCallback,
{
    pub fn new(
        store: S,
        client: BatchClient<L>,
        callback: C,
        config: RunnerConfig,
        defaults: StateDefaults,
    ) -> Self {
        Self {
            store,
            client,
            callback,
            config,
            defaults,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Build a new job from `identifiers` and persist it.
    pub async fn create_job<I>(
        &self,
        identifiers: I,
        params: StateParams,
    ) -> Result<JobId, RunnerError>
    where
        I: IntoIterator<Item = Identifier>,
    {
        let state = RequestState::new(identifiers, params, &self.defaults)?;
        let record = JobRecord::from_state(&state, timestamp::now());
        self.store.save(&record).await?;
        info!(
            job_id = %state.id(),
            identifiers = state.identifier_count(),
            "job created"
        );
        Ok(state.id())
    }

    /// Cycle `state` once, run callbacks and persist it.
    ///
    /// A job that is already finished (its deadline passed since it was last
    /// saved) is persisted as finished and reported without any lookups.
    /// Returns the cycle report and whether the job is now finished.
    pub async fn cycle_state(
        &self,
        state: &mut RequestState,
    ) -> Result<(CycleReport, bool), RunnerError> {
        let now = timestamp::now();
        if state.finished_at(now) {
            debug!(job_id = %state.id(), "job already finished; skipping lookups");
            self.finish(state, now).await?;
            return Ok((CycleReport::default(), true));
        }

        let verbose = self.config.verbose;
        if verbose {
            info!(
                job_id = %state.id(),
                parameters = %state.parameters(),
                status = %state.status_report(),
                "processing job"
            );
        }

        let report = self
            .client
            .cycle(state, self.config.lookup_throttle, verbose)
            .await;
        self.callback.on_event(JobEvent::Cycle, state);

        let now = timestamp::now();
        if state.finished_at(now) {
            self.finish(state, now).await?;
            return Ok((report, true));
        }

        self.store.save(&JobRecord::from_state(state, now)).await?;
        if let Some(next) = state.next_due() {
            debug!(
                job_id = %state.id(),
                next_due = %timestamp::format(&next),
                "next request scheduled"
            );
        }
        Ok((report, false))
    }

    /// Persist a finished job and fire the `Finished` event.
    async fn finish(
        &self,
        state: &mut RequestState,
        now: DateTime<Utc>,
    ) -> Result<(), RunnerError> {
        self.store.save(&JobRecord::from_state(state, now)).await?;
        info!(
            job_id = %state.id(),
            outcome = ?state.outcome(now),
            status = %state.status_report(),
            "job finished"
        );
        self.callback.on_event(JobEvent::Finished, state);
        Ok(())
    }

    /// One pass over every job with due work.
    ///
    /// A failing job is logged and the remaining jobs are still cycled; the
    /// sweep then reports the failures as an error.
    pub async fn sweep(&self) -> Result<SweepReport, RunnerError> {
        let query = JobQuery::due_now();
        let records = self.store.iterate(&query).await?;
        let total = records.len();
        let mut report = SweepReport {
            jobs: total,
            ..SweepReport::default()
        };
        let mut first_failure: Option<String> = None;

        for (n, record) in records.into_iter().enumerate() {
            let job_id = record.id();
            if self.config.verbose {
                info!(%job_id, job = n + 1, of = total, "processing job in this round");
            } else {
                debug!(%job_id, job = n + 1, of = total, "processing job in this round");
            }

            let outcome = match record.into_state() {
                Ok(mut state) => self.cycle_state(&mut state).await,
                Err(e) => Err(RunnerError::State(e)),
            };
            match outcome {
                Ok((_, finished)) => {
                    if finished {
                        report.finished += 1;
                    }
                }
                Err(e) => {
                    error!(%job_id, error = %e, "job cycle failed");
                    report.failed += 1;
                    first_failure.get_or_insert_with(|| format!("{job_id}: {e}"));
                }
            }
        }

        match first_failure {
            Some(first) => Err(RunnerError::JobsFailed {
                failed: report.failed,
                first,
            }),
            None => Ok(report),
        }
    }

    /// Sweep forever until `shutdown` resolves.
    ///
    /// `shutdown` is only observed between sweeps. A failed sweep either ends
    /// the loop with its error (`exit_on_exception`) or is followed by the
    /// configured cooldown.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), RunnerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs_f64(),
            "job runner started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            match self.sweep().await {
                Ok(report) if report.is_idle() => debug!("heartbeat: no jobs due"),
                Ok(report) => {
                    let (jobs, finished) = (report.jobs, report.finished);
                    if self.config.verbose {
                        info!(jobs, finished, "finished job processing for this round");
                    } else {
                        debug!(jobs, finished, "finished job processing for this round");
                    }
                }
                Err(e) => {
                    error!(error = %e, "sweep failed");
                    if self.config.exit_on_exception {
                        return Err(e);
                    }
                    info!(
                        cooldown_secs = self.config.exception_cooldown.as_secs_f64(),
                        "cooling down before resuming"
                    );
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(self.config.exception_cooldown) => {}
                    }
                }
            }
        }

        info!("job runner stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use oagr_core::LookupResult;
    use serde_json::{Value, json};

    use crate::http::TransportError;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::{JobStatus, JobStatusEntry};

    /// Resolves every identifier it is asked about.
    struct ResolveAll;

    #[async_trait]
    impl LookupService for ResolveAll {
        async fn lookup(&self, identifiers: &[Identifier]) -> Result<LookupResult, TransportError> {
            Ok(LookupResult {
                results: identifiers
                    .iter()
                    .map(|id| json!({"identifier": [{"id": id.as_str()}]}))
                    .collect(),
                ..LookupResult::default()
            })
        }
    }

    /// Always fails at the transport level.
    struct Unreachable;

    #[async_trait]
    impl LookupService for Unreachable {
        async fn lookup(
            &self,
            _identifiers: &[Identifier],
        ) -> Result<LookupResult, TransportError> {
            Err(TransportError::Request("connection refused".into()))
        }
    }

    /// Counts calls, then answers like `ResolveAll`.
    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl LookupService for Counting {
        async fn lookup(&self, identifiers: &[Identifier]) -> Result<LookupResult, TransportError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            ResolveAll.lookup(identifiers).await
        }
    }

    /// A store whose writes always fail.
    struct BrokenStore(InMemoryJobStore);

    #[async_trait]
    impl JobStore for BrokenStore {
        async fn save(&self, _record: &JobRecord) -> Result<(), JobStoreError> {
            Err(JobStoreError::Storage("disk full".into()))
        }
        async fn pull(&self, id: JobId) -> Result<Option<JobRecord>, JobStoreError> {
            self.0.pull(id).await
        }
        async fn count(&self, query: &JobQuery) -> Result<usize, JobStoreError> {
            self.0.count(query).await
        }
        async fn iterate(&self, query: &JobQuery) -> Result<Vec<JobRecord>, JobStoreError> {
            self.0.iterate(query).await
        }
        async fn statuses(&self) -> Result<Vec<JobStatusEntry>, JobStoreError> {
            self.0.statuses().await
        }
    }

    fn quick_config() -> RunnerConfig {
        RunnerConfig {
            poll_interval: Duration::from_millis(5),
            lookup_throttle: Duration::ZERO,
            verbose: false,
            exit_on_exception: true,
            exception_cooldown: Duration::from_millis(5),
        }
    }

    fn ids(raw: &[&str]) -> Vec<Identifier> {
        raw.iter().map(|s| Identifier::parse(s).unwrap()).collect()
    }

    fn seed_state(raw: &[&str]) -> RequestState {
        RequestState::new(ids(raw), StateParams::default(), &StateDefaults::default()).unwrap()
    }

    type Events = Arc<Mutex<Vec<(JobEvent, usize)>>>;

    fn recording() -> (Events, impl Fn(JobEvent, &mut RequestState) + Send + Sync) {
        let events: Events = Arc::default();
        let sink = events.clone();
        let cb = move |event: JobEvent, state: &mut RequestState| {
            let flushed: Vec<Value> = state.flush_success();
            sink.lock().unwrap().push((event, flushed.len()));
        };
        (events, cb)
    }

    #[tokio::test]
    async fn sweep_cycles_due_jobs_and_reports_finish() {
        let store = InMemoryJobStore::arc();
        let (events, cb) = recording();
        let runner = JobRunner::new(
            store.clone(),
            BatchClient::new(ResolveAll),
            cb,
            quick_config(),
            StateDefaults::default(),
        );

        let id = runner
            .create_job(ids(&["a", "b", "c"]), StateParams::default().with_batch_size(2))
            .await
            .unwrap();

        let report = runner.sweep().await.unwrap();
        assert_eq!(report, SweepReport { jobs: 1, finished: 1, failed: 0 });

        let stored = store.pull(id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Finished);
        assert_eq!(stored.success_count, 3);
        assert_eq!(
            *events.lock().unwrap(),
            vec![(JobEvent::Cycle, 3), (JobEvent::Finished, 0)]
        );

        // Finished jobs are never swept again.
        assert!(runner.sweep().await.unwrap().is_idle());
    }

    #[tokio::test]
    async fn timed_out_job_is_finished_without_lookups() {
        let start = timestamp::now() - chrono::Duration::seconds(100);
        let seed = RequestState::new(
            ids(&["a", "b"]),
            StateParams::default()
                .starting_at(start)
                .with_timeout(Duration::from_secs(10)),
            &StateDefaults::default(),
        )
        .unwrap();
        let store = InMemoryJobStore::arc();
        // Saved before the deadline, so the record still reads active and due.
        let record = JobRecord::from_state(&seed, start);
        assert_eq!(record.status, JobStatus::Active);
        store.save(&record).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let (events, cb) = recording();
        let runner = JobRunner::new(
            store.clone(),
            BatchClient::new(Counting(calls.clone())),
            cb,
            quick_config(),
            StateDefaults::default(),
        );

        let report = runner.sweep().await.unwrap();
        assert_eq!(report, SweepReport { jobs: 1, finished: 1, failed: 0 });
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let stored = store.pull(seed.id()).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Finished);
        assert_eq!(stored.pending_count, 2);
        assert_eq!(stored.maxed_count, 0);
        assert_eq!(*events.lock().unwrap(), vec![(JobEvent::Finished, 0)]);
        assert!(runner.sweep().await.unwrap().is_idle());
    }

    #[tokio::test]
    async fn failing_lookups_are_absorbed_into_the_state() {
        let store = InMemoryJobStore::arc();
        let runner = JobRunner::new(
            store.clone(),
            BatchClient::new(Unreachable),
            NoopCallback,
            quick_config(),
            StateDefaults::default(),
        );
        let id = runner
            .create_job(ids(&["x", "y"]), StateParams::default().with_max_retries(1))
            .await
            .unwrap();

        let report = runner.sweep().await.unwrap();
        assert_eq!(report.finished, 1);

        let stored = store.pull(id).await.unwrap().unwrap();
        assert_eq!(stored.maxed_count, 2);
        assert_eq!(stored.pending_count, 0);
    }

    #[tokio::test]
    async fn persistence_failure_fails_the_sweep() {
        let inner = InMemoryJobStore::new();
        let seed = seed_state(&["a"]);
        inner.save(&JobRecord::from_state(&seed, timestamp::now())).await.unwrap();

        let runner = JobRunner::new(
            BrokenStore(inner),
            BatchClient::new(ResolveAll),
            NoopCallback,
            quick_config(),
            StateDefaults::default(),
        );

        let err = runner.sweep().await.unwrap_err();
        assert!(matches!(err, RunnerError::JobsFailed { failed: 1, .. }), "{err}");

        // exit_on_exception ends the loop with the sweep's error.
        let err = runner.run(std::future::pending()).await.unwrap_err();
        assert!(matches!(err, RunnerError::JobsFailed { .. }));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let runner = JobRunner::new(
            InMemoryJobStore::new(),
            BatchClient::new(ResolveAll),
            NoopCallback,
            quick_config(),
            StateDefaults::default(),
        );
        runner.run(async {}).await.unwrap();
    }

    #[tokio::test]
    async fn run_keeps_going_after_failures_without_exit_flag() {
        let inner = InMemoryJobStore::new();
        let seed = seed_state(&["a"]);
        inner.save(&JobRecord::from_state(&seed, timestamp::now())).await.unwrap();

        let runner = JobRunner::new(
            BrokenStore(inner),
            BatchClient::new(ResolveAll),
            NoopCallback,
            RunnerConfig {
                exit_on_exception: false,
                ..quick_config()
            },
            StateDefaults::default(),
        );

        runner
            .run(tokio::time::sleep(Duration::from_millis(50)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_job_rejects_invalid_parameters() {
        let runner = JobRunner::new(
            InMemoryJobStore::new(),
            BatchClient::new(ResolveAll),
            NoopCallback,
            quick_config(),
            StateDefaults::default(),
        );
        let err = runner
            .create_job(ids(&["a"]), StateParams::default().with_batch_size(0))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::State(StateError::Validation(_))));
        assert_eq!(runner.store().count(&JobQuery::All).await.unwrap(), 0);
    }
}
