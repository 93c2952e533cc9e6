//! Clock Accountant.
//!
//! Charges elapsed wall time to the side that just moved. Clocks are
//! advisory: they saturate at zero and never end a game.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rookery_rules::Side;

// ============================================================================
// Time Sources
// ============================================================================

/// Millisecond wall clock.
pub trait TimeSource: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Real time (UTC, ms since the Unix epoch).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTime;

impl TimeSource for SystemTime {
    fn now_ms(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// Hand-driven time for tests. Clones share the same instant.
#[derive(Debug, Clone, Default)]
pub struct ManualTime {
    now: Arc<AtomicU64>,
}

impl ManualTime {
    pub fn starting_at(now_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(now_ms)),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTime {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Clock Accountant
// ============================================================================

/// Remaining time for both sides plus the running mark.
#[derive(Debug, Clone)]
pub struct ClockAccountant {
    allotment_ms: u64,
    white_ms: u64,
    black_ms: u64,
    /// Instant the current turn started; `None` until started.
    last_mark: Option<u64>,
    /// Set while paused (a seat is vacant).
    paused_at: Option<u64>,
}

impl ClockAccountant {
    pub fn new(allotment_ms: u64) -> Self {
        Self {
            allotment_ms,
            white_ms: allotment_ms,
            black_ms: allotment_ms,
            last_mark: None,
            paused_at: None,
        }
    }

    pub fn start(&mut self, now: u64) {
        self.last_mark = Some(now);
        self.paused_at = None;
    }

    pub fn is_running(&self) -> bool {
        self.last_mark.is_some() && self.paused_at.is_none()
    }

    /// Charge the time since the last mark to `side` and move the mark.
    ///
    /// While paused only the time up to the pause counts, and the pause
    /// restarts at `now` so the next turn begins clean on resume.
    /// Returns the elapsed milliseconds (0 before the clock starts).
    pub fn charge(&mut self, side: Side, now: u64) -> u64 {
        let Some(mark) = self.last_mark else {
            return 0;
        };

        let until = match self.paused_at {
            Some(paused_at) => {
                self.paused_at = Some(now);
                paused_at
            }
            None => now,
        };
        let elapsed = until.saturating_sub(mark);
        let remaining = match side {
            Side::White => &mut self.white_ms,
            Side::Black => &mut self.black_ms,
        };
        *remaining = remaining.saturating_sub(elapsed);
        self.last_mark = Some(now);
        elapsed
    }

    pub fn pause(&mut self, now: u64) {
        if self.last_mark.is_some() && self.paused_at.is_none() {
            self.paused_at = Some(now);
        }
    }

    /// Resume after a pause; the paused interval is never charged.
    pub fn resume(&mut self, now: u64) {
        if let (Some(mark), Some(paused_at)) = (self.last_mark, self.paused_at.take()) {
            self.last_mark = Some(mark + now.saturating_sub(paused_at));
        }
    }

    /// Refill both sides and start a fresh turn at `now`.
    pub fn reset(&mut self, now: u64) {
        self.white_ms = self.allotment_ms;
        self.black_ms = self.allotment_ms;
        self.start(now);
    }

    pub fn remaining(&self, side: Side) -> u64 {
        match side {
            Side::White => self.white_ms,
            Side::Black => self.black_ms,
        }
    }

    pub fn allotment(&self) -> u64 {
        self.allotment_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charge_only_mover() {
        let mut clock = ClockAccountant::new(60_000);
        clock.start(1_000);

        assert_eq!(clock.charge(Side::White, 4_000), 3_000);
        assert_eq!(clock.remaining(Side::White), 57_000);
        assert_eq!(clock.remaining(Side::Black), 60_000);

        assert_eq!(clock.charge(Side::Black, 9_000), 5_000);
        assert_eq!(clock.remaining(Side::Black), 55_000);
        assert_eq!(clock.remaining(Side::White), 57_000);
    }

    #[test]
    fn test_not_started_charges_nothing() {
        let mut clock = ClockAccountant::new(60_000);
        assert_eq!(clock.charge(Side::White, 10_000), 0);
        assert_eq!(clock.remaining(Side::White), 60_000);
        assert!(!clock.is_running());
    }

    #[test]
    fn test_saturates_at_zero() {
        let mut clock = ClockAccountant::new(1_000);
        clock.start(0);
        clock.charge(Side::White, 5_000);
        assert_eq!(clock.remaining(Side::White), 0);
    }

    #[test]
    fn test_paused_interval_not_charged() {
        let mut clock = ClockAccountant::new(60_000);
        clock.start(0);
        clock.pause(2_000);
        assert!(!clock.is_running());

        clock.resume(12_000);
        // 2s before the pause plus 1s after the resume.
        assert_eq!(clock.charge(Side::White, 13_000), 3_000);
        assert_eq!(clock.remaining(Side::White), 57_000);
    }

    #[test]
    fn test_move_while_paused_charges_mover() {
        let mut clock = ClockAccountant::new(60_000);
        clock.start(0);
        clock.pause(10_000);

        // Only the 10s before the pause belong to White.
        assert_eq!(clock.charge(Side::White, 20_000), 10_000);
        assert!(!clock.is_running());

        clock.resume(30_000);
        assert_eq!(clock.charge(Side::Black, 35_000), 5_000);
        assert_eq!(clock.remaining(Side::White), 50_000);
        assert_eq!(clock.remaining(Side::Black), 55_000);
    }

    #[test]
    fn test_resume_without_pause_is_noop() {
        let mut clock = ClockAccountant::new(60_000);
        clock.start(0);
        clock.resume(5_000);
        assert_eq!(clock.charge(Side::White, 5_000), 5_000);
    }

    #[test]
    fn test_reset_refills() {
        let mut clock = ClockAccountant::new(60_000);
        clock.start(0);
        clock.charge(Side::White, 10_000);
        clock.pause(11_000);

        clock.reset(20_000);
        assert!(clock.is_running());
        assert_eq!(clock.remaining(Side::White), 60_000);
        assert_eq!(clock.charge(Side::White, 21_000), 1_000);
    }

    #[test]
    fn test_manual_time_shared() {
        let time = ManualTime::starting_at(100);
        let view = time.clone();
        time.advance(50);
        assert_eq!(view.now_ms(), 150);
        view.set(7);
        assert_eq!(time.now_ms(), 7);
    }
}
