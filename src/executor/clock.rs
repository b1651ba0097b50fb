//! The tick source of a constant-arrival-rate run.
//!
//! The n-th tick is due at `start + n / rate`. The target is always derived
//! from `n` and never from the previous tick, so a slow consumer makes ticks
//! late but never moves the schedule.

use std::time::Duration;

use tokio::time::Instant;

/// One scheduled arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Position in the schedule, starting at 0.
    pub seq: u64,
    /// When the tick was due.
    pub scheduled_at: Instant,
    /// `scheduled_at` relative to the run start.
    pub offset: Duration,
    /// The tick was already overdue when it was checked and went out
    /// immediately.
    pub late: bool,
}

/// Offset of tick `seq` from the run start. Saturates at `Duration::MAX`.
pub fn schedule_offset(seq: u64, rate_per_second: f64) -> Duration {
    Duration::try_from_secs_f64(seq as f64 / rate_per_second).unwrap_or(Duration::MAX)
}

/// Number of ticks a full run emits: those with `n / rate < duration`.
pub fn expected_ticks(rate_per_second: f64, duration: Duration) -> u64 {
    (rate_per_second * duration.as_secs_f64()).ceil() as u64
}

/// Finite, non-restartable ticker.
#[derive(Debug)]
pub struct Ticker {
    start: Instant,
    rate: f64,
    duration: Duration,
    next_seq: u64,
    late: u64,
    exhausted: bool,
}

impl Ticker {
    /// Ticker whose schedule starts now.
    pub fn start(rate_per_second: f64, duration: Duration) -> Self {
        Self::starting_at(Instant::now(), rate_per_second, duration)
    }

    pub fn starting_at(start: Instant, rate_per_second: f64, duration: Duration) -> Self {
        Self {
            start,
            rate: rate_per_second,
            duration,
            next_seq: 0,
            late: 0,
            exhausted: false,
        }
    }

    pub fn start_instant(&self) -> Instant {
        self.start
    }

    /// Ticks handed out so far.
    pub fn emitted(&self) -> u64 {
        self.next_seq
    }

    /// How many of the emitted ticks were late.
    pub fn late(&self) -> u64 {
        self.late
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Wait for the next tick.
    ///
    /// Returns `None` once the run duration has elapsed, and keeps returning
    /// `None` afterwards. After the last tick this waits for the end of the
    /// run before reporting exhaustion.
    ///
    /// Cancel safe: dropping the future before it resolves does not consume a
    /// tick.
    pub async fn tick(&mut self) -> Option<Tick> {
        if self.exhausted {
            return None;
        }

        let Some(end) = self.start.checked_add(self.duration) else {
            tracing::warn!(duration = ?self.duration, "Run end is not representable, no ticks");
            self.exhausted = true;
            return None;
        };
        let offset = schedule_offset(self.next_seq, self.rate);
        let now = Instant::now();

        if offset >= self.duration || now >= end {
            tokio::time::sleep_until(end).await;
            self.exhausted = true;
            return None;
        }

        let scheduled_at = self.start + offset;
        let late = now > scheduled_at;
        if !late {
            tokio::time::sleep_until(scheduled_at).await;
        }

        let tick = Tick {
            seq: self.next_seq,
            scheduled_at,
            offset,
            late,
        };
        self.next_seq += 1;
        if late {
            self.late += 1;
        }
        Some(tick)
    }
}
