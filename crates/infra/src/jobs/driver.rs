//! Drive one in-memory job to completion without a job store.

use std::time::Duration;

use chrono::{DateTime, Utc};
use oagr_core::{JobOutcome, RequestState, timestamp};
use tracing::{debug, info};

use super::runner::{JobCallback, JobEvent};
use crate::lookup::{BatchClient, LookupService};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveOptions {
    pub throttle: Duration,
    pub verbose: bool,
}

impl Default for DriveOptions {
    fn default() -> Self {
        Self {
            throttle: Duration::from_secs(5),
            verbose: true,
        }
    }
}

/// Cycle `state` until it is finished.
///
/// After every cycle the callback sees a `Cycle` event and `save_state` is
/// handed the state; between cycles the driver sleeps until the next
/// identifier is due (or the deadline passes). A state that is already
/// finished is reported without any lookups. A `save_state` error stops the
/// drive and is returned as is.
pub async fn drive_to_completion<L, C, F, E>(
    client: &BatchClient<L>,
    state: &mut RequestState,
    options: DriveOptions,
    callback: &C,
    mut save_state: F,
) -> Result<JobOutcome, E>
where
    L: LookupService,
    C: JobCallback + ?Sized,
    F: FnMut(&RequestState) -> Result<(), E>,
{
    let now = timestamp::now();
    if state.finished_at(now) {
        return Ok(finish(state, now, callback));
    }
    if options.verbose {
        info!(job_id = %state.id(), parameters = %state.parameters(), "starting job");
    }

    loop {
        client.cycle(state, options.throttle, options.verbose).await;
        callback.on_event(JobEvent::Cycle, state);
        save_state(state)?;

        let now = timestamp::now();
        if state.finished_at(now) {
            return Ok(finish(state, now, callback));
        }

        if let Some(wait) = wait_until_next(state, now) {
            debug!(job_id = %state.id(), wait_secs = wait.as_secs(), "sleeping until next due");
            tokio::time::sleep(wait).await;
        }
    }
}

fn finish<C>(state: &mut RequestState, now: DateTime<Utc>, callback: &C) -> JobOutcome
where
    C: JobCallback + ?Sized,
{
    let outcome = state.outcome(now);
    info!(job_id = %state.id(), ?outcome, status = %state.status_report(), "job finished");
    callback.on_event(JobEvent::Finished, state);
    outcome
}

/// Time until the earlier of the next due identifier and the moment the
/// deadline counts as passed; `None` when that is already now.
fn wait_until_next(state: &RequestState, now: DateTime<Utc>) -> Option<Duration> {
    // `finished` needs `now > deadline`, so wake one second after it.
    let deadline = state.timeout().map(|t| t + chrono::Duration::seconds(1));
    let wake = match (state.next_due(), deadline) {
        (Some(due), Some(dl)) => due.min(dl),
        (Some(due), None) => due,
        (None, Some(dl)) => dl,
        (None, None) => return None,
    };
    (wake - now).to_std().ok().filter(|d| !d.is_zero())
}
