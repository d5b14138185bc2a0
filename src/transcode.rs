//! Waiting out server-side transcoding.

use std::time::{Duration, Instant};

use crate::api::{CardService, TranscodeResult};
use crate::error::PublishError;

/// Sleep for `total`, waking at most every second to check the cancel flag.
/// Returns true if cancellation was observed.
pub(crate) fn sleep_cancellable(total: Duration, cancel: &dyn Fn() -> bool) -> bool {
    const SLICE: Duration = Duration::from_secs(1);
    let mut remaining = total;
    while !remaining.is_zero() {
        if cancel() {
            return true;
        }
        let step = remaining.min(SLICE);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
    cancel()
}

/// Poll one upload's transcode status at a fixed interval until the result is
/// ready, the wait budget is exhausted, or cancellation is requested. The
/// inter-poll sleep is sliced so a cancel request does not wait out the
/// remaining interval.
pub fn wait_for_transcode(
    service: &dyn CardService,
    upload_id: &str,
    budget: Duration,
    poll_interval: Duration,
    cancel: &dyn Fn() -> bool,
) -> Result<TranscodeResult, PublishError> {
    let start = Instant::now();
    loop {
        if let Some(result) = service.transcode_status(upload_id)? {
            return Ok(result);
        }
        if start.elapsed() >= budget {
            return Err(PublishError::TranscodeTimeout {
                waited_secs: budget.as_secs(),
            });
        }
        if sleep_cancellable(poll_interval, cancel) {
            return Err(PublishError::Cancelled);
        }
    }
}
