//! Runtime configuration for the authority loop and the client flow controller
//!
//! Values are loaded once at startup, either from defaults, a JSON file or
//! command line overrides, and validated before anything is simulated.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TICK_RATE: u32 = 30;
pub const DEFAULT_UPDATE_RATE: u32 = 60;
pub const DEFAULT_CADENCE_STEP_HZ: u32 = 8;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{0} must be greater than zero")]
    ZeroRate(&'static str),
    #[error("update rate {update_rate} Hz is lower than tick rate {tick_rate} Hz")]
    UpdateBelowTick { tick_rate: u32, update_rate: u32 },
    #[error("{state} band is inverted: speed up below {speed_up_below}, slow down above {slow_down_above}")]
    InvertedBand {
        state: &'static str,
        speed_up_below: u32,
        slow_down_above: u32,
    },
    #[error("cadence step {step} Hz must be below the update rate {update_rate} Hz")]
    CadenceStepTooLarge { step: u32, update_rate: u32 },
    #[error("input buffer cap must be at least 1")]
    ZeroBufferCap,
}

/// How the update/tick ratio is turned into a whole number of sub-steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubstepRounding {
    /// Integer division; fractional remainders are dropped
    #[default]
    Truncate,
    Nearest,
}

/// Depth thresholds that hold while the controller sits in one state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Band {
    /// Enter or stay in speed-up while depth is strictly below this
    pub speed_up_below: u32,
    /// Enter or stay in slow-down while depth is strictly above this
    pub slow_down_above: u32,
}

impl Band {
    pub const fn new(speed_up_below: u32, slow_down_above: u32) -> Self {
        Self {
            speed_up_below,
            slow_down_above,
        }
    }
}

/// One band per controller state; the bands overlap to stop flapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferTargetBand {
    pub normal: Band,
    pub speed_up: Band,
    pub slow_down: Band,
}

impl Default for BufferTargetBand {
    fn default() -> Self {
        Self {
            normal: Band::new(3, 8),
            speed_up: Band::new(8, 20),
            slow_down: Band::new(2, 6),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowControlConfig {
    pub buffer_target_band: BufferTargetBand,
    /// Hz added in speed-up and removed in slow-down
    pub cadence_step_hz: u32,
}

impl Default for FlowControlConfig {
    fn default() -> Self {
        Self {
            buffer_target_band: BufferTargetBand::default(),
            cadence_step_hz: DEFAULT_CADENCE_STEP_HZ,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Authoritative consumption frequency
    pub tick_rate: u32,
    /// Nominal physics sub-step frequency on both roles
    pub update_rate: u32,
    pub substep_rounding: SubstepRounding,
    /// Hard backstop on per-connection buffer length; oldest inputs are dropped past it
    pub input_buffer_cap: Option<usize>,
    pub flow: FlowControlConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            update_rate: DEFAULT_UPDATE_RATE,
            substep_rounding: SubstepRounding::default(),
            input_buffer_cap: None,
            flow: FlowControlConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SimulationConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::ZeroRate("tick rate"));
        }
        if self.update_rate == 0 {
            return Err(ConfigError::ZeroRate("update rate"));
        }
        if self.update_rate < self.tick_rate {
            return Err(ConfigError::UpdateBelowTick {
                tick_rate: self.tick_rate,
                update_rate: self.update_rate,
            });
        }
        if self.input_buffer_cap == Some(0) {
            return Err(ConfigError::ZeroBufferCap);
        }
        if self.flow.cadence_step_hz >= self.update_rate {
            return Err(ConfigError::CadenceStepTooLarge {
                step: self.flow.cadence_step_hz,
                update_rate: self.update_rate,
            });
        }

        let bands = &self.flow.buffer_target_band;
        for (state, band) in [
            ("normal", bands.normal),
            ("speed-up", bands.speed_up),
            ("slow-down", bands.slow_down),
        ] {
            if band.speed_up_below > band.slow_down_above {
                return Err(ConfigError::InvertedBand {
                    state,
                    speed_up_below: band.speed_up_below,
                    slow_down_above: band.slow_down_above,
                });
            }
        }

        Ok(())
    }

    /// Sub-steps executed per tick-rate period, never less than one
    pub fn substeps_per_tick(&self) -> u32 {
        let substeps = match self.substep_rounding {
            SubstepRounding::Truncate => self.update_rate / self.tick_rate,
            SubstepRounding::Nearest => {
                (self.update_rate + self.tick_rate / 2) / self.tick_rate
            }
        };
        substeps.max(1)
    }

    /// Fixed simulation timestep in seconds
    pub fn update_dt(&self) -> f32 {
        1.0 / self.update_rate as f32
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.update_rate as f64)
    }
}
