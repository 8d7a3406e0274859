//! Iterative step-time solver for kinematic moves.
//!
//! Given a queue of time-parametric Cartesian trajectories and a projection
//! from Cartesian space to one motor's scalar position, the solver produces
//! the exact step times and directions that keep the motor within half a
//! step of the trajectory. The downstream step compressor is reached only
//! through the [`sink::StepSink`] boundary; this crate never talks to
//! hardware.

pub mod config;
pub mod kinematics;
pub mod move_queue;
mod reversal;
pub mod sink;
pub mod solver;
