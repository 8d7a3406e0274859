//! Boundary to the downstream step compressor.

use thiserror::Error;

/// Status reported by a sink that cannot accept more steps, typically a
/// hardware-queue overflow. The code is passed through to the caller of the
/// flush untouched.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("step sink rejected step (status {status})")]
pub struct SinkError {
    pub status: i32,
}

/// One emitted step. `step_time` is relative to the owning move's
/// `print_time`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub dir: bool,
    pub move_print_time: f64,
    pub step_time: f64,
}

impl Step {
    pub fn absolute_time(&self) -> f64 {
        self.move_print_time + self.step_time
    }
}

/// Consumer of solved steps, one per stepper.
pub trait StepSink {
    fn append(&mut self, sdir: bool, move_print_time: f64, step_time: f64)
        -> Result<(), SinkError>;
}

/// Sink that records every step it receives. Used by tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub steps: Vec<Step>,
}

impl StepSink for RecordingSink {
    fn append(
        &mut self,
        sdir: bool,
        move_print_time: f64,
        step_time: f64,
    ) -> Result<(), SinkError> {
        self.steps.push(Step {
            dir: sdir,
            move_print_time,
            step_time,
        });
        Ok(())
    }
}
