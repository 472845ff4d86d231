//! Hysteresis controller that keeps the server-side input queue within a target band
//!
//! Every result from the server carries the number of inputs still queued
//! for this client. The controller turns that depth into one of three
//! states and each state maps to a local tick cadence:
//!
//! - `Normal`: nominal update rate
//! - `SpeedUp`: nominal + step, refills a queue that is running dry
//! - `SlowDown`: nominal - step, drains a queue that adds latency
//!
//! Each state evaluates the depth against its own band. The bands overlap
//! so a depth hovering near one threshold cannot flap between states.

use log::debug;
use shared::{Band, FlowControlConfig};
use std::fmt;
use std::time::Duration;

/// Discrete control state of the local cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowState {
    #[default]
    Normal,
    SpeedUp,
    SlowDown,
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowState::Normal => "normal",
            FlowState::SpeedUp => "speed-up",
            FlowState::SlowDown => "slow-down",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct FlowRateController {
    config: FlowControlConfig,
    nominal_hz: u32,
    state: FlowState,
    transitions: u64,
}

impl FlowRateController {
    pub fn new(config: FlowControlConfig, nominal_hz: u32) -> Self {
        Self {
            config,
            nominal_hz,
            state: FlowState::Normal,
            transitions: 0,
        }
    }

    /// Feeds one reported queue depth and returns the resulting state
    ///
    /// SlowDown wins when both thresholds of the current band are crossed,
    /// which only an inverted band can produce.
    pub fn observe(&mut self, depth: u32) -> FlowState {
        let band = self.band();
        let slow = depth > band.slow_down_above;
        let fast = depth < band.speed_up_below;

        let next = if slow {
            FlowState::SlowDown
        } else if fast {
            FlowState::SpeedUp
        } else {
            FlowState::Normal
        };

        if next != self.state {
            debug!(
                "Flow control {} -> {} at depth {} ({} Hz -> {} Hz)",
                self.state,
                next,
                depth,
                self.cadence_hz(),
                self.cadence_for(next)
            );
            self.state = next;
            self.transitions += 1;
        }

        next
    }

    fn band(&self) -> Band {
        let bands = &self.config.buffer_target_band;
        match self.state {
            FlowState::Normal => bands.normal,
            FlowState::SpeedUp => bands.speed_up,
            FlowState::SlowDown => bands.slow_down,
        }
    }

    fn cadence_for(&self, state: FlowState) -> u32 {
        let step = self.config.cadence_step_hz;
        match state {
            FlowState::Normal => self.nominal_hz,
            FlowState::SpeedUp => self.nominal_hz.saturating_add(step),
            FlowState::SlowDown => self.nominal_hz.saturating_sub(step).max(1),
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    /// Local tick frequency for the current state
    pub fn cadence_hz(&self) -> u32 {
        self.cadence_for(self.state)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.cadence_hz() as f64)
    }

    pub fn nominal_hz(&self) -> u32 {
        self.nominal_hz
    }

    /// Number of state changes since construction or the last reset
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    pub fn reset(&mut self) {
        self.state = FlowState::Normal;
        self.transitions = 0;
    }
}
