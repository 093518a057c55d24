//! Simulation time.
//!
//! The engine owns the one [`Clock`] of a run and advances it by one step
//! after each Tick → Resolve → Tock period. Agents only ever see copies.

/// Ticks are the atomic unit of simulation time.
pub type Ticks = u64;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Simulation clock: absolute start time, elapsed time, and the fixed step
/// and duration of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Clock {
    /// Absolute time of period 0.
    start: Ticks,
    /// Time elapsed since `start`. A multiple of `step` until it saturates.
    elapsed: Ticks,
    /// Length of one period.
    step: Ticks,
    /// Total length of the run. Periods run while `elapsed < duration`.
    duration: Ticks,
}

impl Clock {
    pub fn new(start: Ticks, step: Ticks, duration: Ticks) -> Self {
        Self {
            start,
            elapsed: 0,
            step,
            duration,
        }
    }

    /// Absolute current time, saturating at `Ticks::MAX`.
    pub fn time(&self) -> Ticks {
        self.start.saturating_add(self.elapsed)
    }

    /// Time elapsed since the start of the run.
    pub fn since_start(&self) -> Ticks {
        self.elapsed
    }

    pub fn start(&self) -> Ticks {
        self.start
    }

    pub fn step(&self) -> Ticks {
        self.step
    }

    pub fn duration(&self) -> Ticks {
        self.duration
    }

    /// Zero-based index of the current period.
    pub fn period(&self) -> u64 {
        self.elapsed.checked_div(self.step).unwrap_or(0)
    }

    /// Whether another period remains to be run.
    pub fn is_running(&self) -> bool {
        self.elapsed < self.duration
    }

    /// Periodic gate: true when `(since_start + offset) % period == 0`.
    /// A zero period means one step.
    pub fn is_due(&self, period: Ticks, offset: Ticks) -> bool {
        let period = if period == 0 { self.step } else { period };
        self.elapsed
            .saturating_add(offset)
            .checked_rem(period)
            .is_none_or(|rem| rem == 0)
    }

    /// Move to the next period. Elapsed time saturates, which ends the run
    /// since no duration exceeds `Ticks::MAX`.
    pub(crate) fn advance(&mut self) {
        self.elapsed = self.elapsed.saturating_add(self.step);
    }
}
