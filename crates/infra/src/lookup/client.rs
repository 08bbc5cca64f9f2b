use std::time::Duration;

use oagr_core::{ApplySummary, RequestState, timestamp};
use tracing::{debug, info, warn};

use super::LookupService;

/// What one cycle did to a state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Identifiers due when the cycle started.
    pub due: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub applied: ApplySummary,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.due == 0
    }
}

/// Sends the due identifiers of a state to a lookup service, batch by batch,
/// and folds the answers back into the state.
#[derive(Debug, Clone)]
pub struct BatchClient<L> {
    lookup: L,
}

impl<L: LookupService> BatchClient<L> {
    pub fn new(lookup: L) -> Self {
        Self { lookup }
    }

    pub fn lookup(&self) -> &L {
        &self.lookup
    }

    /// Run one cycle over everything due now.
    ///
    /// Batches are `state.batch_size()` contiguous identifiers of the sorted
    /// due list, sent in order with `throttle` between consecutive requests.
    /// A failed batch counts as one attempt for each of its identifiers and
    /// never stops the cycle.
    pub async fn cycle(
        &self,
        state: &mut RequestState,
        throttle: Duration,
        verbose: bool,
    ) -> CycleReport {
        let due = state.get_due(timestamp::now());
        let mut report = CycleReport {
            due: due.len(),
            ..CycleReport::default()
        };
        if due.is_empty() {
            debug!(job_id = %state.id(), "nothing due");
            return report;
        }

        let batch_size = state.batch_size().max(1);
        let total = due.len().div_ceil(batch_size);
        for (n, batch) in due.chunks(batch_size).enumerate() {
            if n > 0 && !throttle.is_zero() {
                tokio::time::sleep(throttle).await;
            }

            let (job_id, batch_no, size) = (state.id(), n + 1, batch.len());
            if verbose {
                info!(%job_id, batch = batch_no, of = total, size, "sending batch");
            } else {
                debug!(%job_id, batch = batch_no, of = total, size, "sending batch");
            }

            report.batches += 1;
            let applied = match self.lookup.lookup(batch).await {
                Ok(result) => state.record_result(result),
                Err(e) => {
                    warn!(
                        job_id = %state.id(),
                        batch = n + 1,
                        error = %e,
                        "batch failed; counting an attempt"
                    );
                    report.failed_batches += 1;
                    state.record_requested(batch)
                }
            };
            report.applied.merge(applied);
        }

        if verbose {
            info!(job_id = %state.id(), status = %state.status_report(), "cycle complete");
        } else {
            debug!(job_id = %state.id(), status = %state.status_report(), "cycle complete");
        }
        report
    }
}
