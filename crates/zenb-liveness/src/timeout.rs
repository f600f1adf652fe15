//! Monitoring window for a run.
//!
//! A fixed number of ticks, re-armed on start, reset and every step
//! transition. The engine invalidates the run when it reaches zero.

/// Result of advancing the monitor by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not armed; the tick had no effect
    Idle,
    Running { remaining: u32 },
    /// Reached zero on this tick. Reported once per arming.
    Expired,
}

/// Countdown for the active monitoring window.
#[derive(Debug, Clone)]
pub struct TimeoutMonitor {
    window_ticks: u32,
    remaining: u32,
    armed: bool,
}

impl TimeoutMonitor {
    pub fn new(window_ticks: u32) -> Self {
        TimeoutMonitor {
            window_ticks,
            remaining: 0,
            armed: false,
        }
    }

    /// Arm with a full window, discarding any countdown in progress.
    pub fn restart(&mut self) {
        self.remaining = self.window_ticks;
        self.armed = true;
    }

    pub fn cancel(&mut self) {
        self.armed = false;
        self.remaining = 0;
    }

    pub fn tick(&mut self) -> TickOutcome {
        if !self.armed {
            return TickOutcome::Idle;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.armed = false;
            TickOutcome::Expired
        } else {
            TickOutcome::Running {
                remaining: self.remaining,
            }
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn window_ticks(&self) -> u32 {
        self.window_ticks
    }
}
