//! Time source for overlay timestamps.
//!
//! Overlay entries carry a wall-clock `updatedAt` (milliseconds since the
//! Unix epoch) so they stay meaningful after being persisted and reloaded.

use chrono::Utc;

pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Wall clock driven by tokio's timer.
///
/// Reads `anchor_ms` at construction and advances with
/// `tokio::time::Instant`, so a paused test runtime moves overlay ages
/// together with sleeps.
#[derive(Debug, Clone)]
pub struct TokioClock {
    anchor_ms: i64,
    started: tokio::time::Instant,
}

impl TokioClock {
    pub fn new(anchor_ms: i64) -> Self {
        Self {
            anchor_ms,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> i64 {
        self.anchor_ms + self.started.elapsed().as_millis() as i64
    }
}
