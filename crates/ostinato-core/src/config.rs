//! Static per-stepper configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::solver::ActiveFlags;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("step_dist must be nonzero")]
    ZeroStepDist,
    #[error("unknown axis '{0}' in active_axes")]
    UnknownAxis(char),
    #[error("{0} must not be negative")]
    NegativePadding(&'static str),
}

/// Solver settings for one stepper binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepperConfig {
    /// Distance the motor travels per full step; the sign selects the
    /// positive-direction convention.
    pub step_dist: f64,

    /// Axis letters whose motion can drive this stepper, e.g. "xy".
    #[serde(default)]
    pub active_axes: String,

    /// Seconds of solving performed leading into an active move.
    #[serde(default)]
    pub gen_steps_pre_active: f64,

    /// Seconds of solving performed past the end of an active move.
    #[serde(default)]
    pub gen_steps_post_active: f64,
}

impl StepperConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.step_dist == 0.0 {
            return Err(ConfigError::ZeroStepDist);
        }
        for axis in self.active_axes.chars() {
            if !matches!(axis, 'x' | 'y' | 'z' | 'X' | 'Y' | 'Z') {
                return Err(ConfigError::UnknownAxis(axis));
            }
        }
        if self.gen_steps_pre_active < 0.0 {
            return Err(ConfigError::NegativePadding("gen_steps_pre_active"));
        }
        if self.gen_steps_post_active < 0.0 {
            return Err(ConfigError::NegativePadding("gen_steps_post_active"));
        }
        Ok(())
    }

    pub fn active_flags(&self) -> ActiveFlags {
        self.active_axes
            .chars()
            .fold(ActiveFlags::new(), ActiveFlags::with_axis)
    }
}
