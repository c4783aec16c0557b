use std::time::Duration;

use tracing::debug;

use crate::app::cancel::CancelToken;
use crate::app::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityPolicy {
    pub settle: Duration,
    pub restabilize: Duration,
    /// Re-captures allowed before giving up; `None` waits indefinitely.
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StableSnapshot {
    Stable(Vec<u8>),
    Cancelled,
    Unstable { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSlot {
    First,
    Second,
}

// Only the second slot is re-captured; each capture is compared with the
// one before it.
pub fn capture_stable_snapshot(
    policy: &StabilityPolicy,
    cancel: &CancelToken,
    trace_id: &str,
    mut capture: impl FnMut(CaptureSlot) -> Result<Vec<u8>, AppError>,
) -> Result<StableSnapshot, AppError> {
    let mut previous = capture(CaptureSlot::First)?;
    if !cancel.sleep(policy.settle) {
        return Ok(StableSnapshot::Cancelled);
    }
    let mut current = capture(CaptureSlot::Second)?;

    let mut attempts: u32 = 0;
    while current != previous {
        if cancel.is_cancelled() {
            return Ok(StableSnapshot::Cancelled);
        }
        if policy.max_attempts.is_some_and(|max| attempts >= max) {
            return Ok(StableSnapshot::Unstable { attempts });
        }
        attempts += 1;
        debug!(trace_id = %trace_id, attempts, "ui still changing, capturing again");
        if !cancel.sleep(policy.restabilize) {
            return Ok(StableSnapshot::Cancelled);
        }
        previous = std::mem::replace(&mut current, capture(CaptureSlot::Second)?);
    }

    Ok(StableSnapshot::Stable(current))
}
