// Periodic progress snapshots for one job, ending at a terminal state

use futures::stream::{self, Stream};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};

use super::models::{JobKey, ProgressSnapshot};
use super::progress::ProgressTracker;

pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

struct PollState {
    tracker: ProgressTracker,
    key: JobKey,
    period: Duration,
    ticker: Option<Interval>,
    finished: bool,
}

/// Snapshot stream for `key`, one item per `period`.
///
/// The first item is emitted immediately. The stream yields exactly one
/// terminal snapshot (completed or failed) and then ends. All state,
/// including the timer, lives inside the stream, so dropping it on client
/// disconnect stops the polling.
pub fn progress_updates(
    tracker: ProgressTracker,
    key: JobKey,
    period: Duration,
) -> impl Stream<Item = ProgressSnapshot> + Send + 'static {
    let state = PollState {
        tracker,
        key,
        period,
        ticker: None,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }

        let period = state.period;
        let ticker = state.ticker.get_or_insert_with(|| {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        ticker.tick().await;

        let snapshot = state.tracker.get(&state.key);
        if snapshot.status.is_terminal() {
            tracing::debug!(job = %state.key, status = %snapshot.status, "Sending terminal progress event");
            state.finished = true;
        }
        Some((snapshot, state))
    })
}
