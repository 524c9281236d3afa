//! Simulation clock and the horizon-extension rule.
//!
//! Hydraulic engines of this family run to a finite, configured horizon. The
//! bridge runs forever, so before every step it pushes the horizon one step
//! further out. The invariant kept here is that, before any `compute_step`,
//! `horizon >= current_time + step_size`.

use crate::engine::SimTime;

/// Current time, step size and configured horizon, all in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SimulationClock {
    pub current_time: SimTime,
    pub step_size: SimTime,
    pub horizon: SimTime,
}

impl SimulationClock {
    pub fn new(step_size: SimTime, horizon: SimTime) -> Self {
        Self {
            current_time: 0,
            step_size,
            horizon,
        }
    }

    /// Extend the horizon by one step and return the new horizon.
    ///
    /// Normally this adds `step_size` to the horizon. If the horizon had
    /// fallen behind the current time, it is raised to exactly one step
    /// ahead of it instead.
    pub fn extend_horizon(&mut self) -> SimTime {
        let required = self.current_time.saturating_add(self.step_size);
        self.horizon = self.horizon.saturating_add(self.step_size).max(required);
        self.horizon
    }

    /// Whether one more step fits before the horizon.
    pub fn permits_step(&self) -> bool {
        self.horizon >= self.current_time.saturating_add(self.step_size)
    }

    /// Record the time reached after advancing by `elapsed`.
    pub fn advance(&mut self, elapsed: SimTime) {
        self.current_time = self.current_time.saturating_add(elapsed);
    }
}
