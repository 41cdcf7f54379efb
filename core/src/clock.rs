//! Engine clock: owns the monotonic tick counter and pause state.
//!
//! Every timestamp inside the engine (wanted expiry, chase start, combat
//! timers, minigame deadlines) is a tick read from this clock. Wall-clock
//! time never enters session state.

use crate::types::{RunId, Tick};
use serde::{Deserialize, Serialize};

pub const TICKS_PER_SECOND: Tick = 20;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimClock {
    pub run_id:       RunId,
    pub current_tick: Tick,
    pub paused:       bool,
}

impl SimClock {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            current_tick: 0,
            paused: true,
        }
    }

    /// Advance one tick. Returns the new tick number.
    /// Panics if called while paused; callers must check.
    pub fn advance(&mut self) -> Tick {
        assert!(!self.paused, "advance() called on paused clock");
        self.current_tick += 1;
        self.current_tick
    }

    pub fn pause(&mut self)  { self.paused = true;  }
    pub fn resume(&mut self) { self.paused = false; }

    pub fn seconds_elapsed(&self) -> f64 {
        ticks_to_secs(self.current_tick)
    }
}

/// Convert a configured duration in seconds to ticks, rounding to nearest.
pub fn secs_to_ticks(secs: f64) -> Tick {
    if secs <= 0.0 {
        return 0;
    }
    (secs * TICKS_PER_SECOND as f64).round() as Tick
}

pub fn ticks_to_secs(ticks: Tick) -> f64 {
    ticks as f64 / TICKS_PER_SECOND as f64
}
