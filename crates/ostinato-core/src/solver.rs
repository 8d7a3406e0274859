//! Iterative solver turning kinematic moves into per-motor step times.

use std::{cell::RefCell, rc::Rc};

use thiserror::Error;

use crate::{
    config::{ConfigError, StepperConfig},
    move_queue::{Coord, Move, MoveQueue, QueueError},
    reversal::{ReversalFilter, SDS_CHECK_TIME},
    sink::{SinkError, StepSink},
};

/// Shared tolerance for root-finder convergence and time tie-breakers.
pub(crate) const TIME_EPSILON: f64 = 0.000_000_001;

/// Initial (and post-reversal) bracket probe size.
const SEEK_TIME_RESET: f64 = 0.000_100;

#[derive(Debug, Error)]
pub enum FlushError {
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Cartesian axes whose motion can drive a stepper.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveFlags(u8);

impl ActiveFlags {
    const X: u8 = 1 << 0;
    const Y: u8 = 1 << 1;
    const Z: u8 = 1 << 2;

    pub const fn new() -> Self {
        Self(0)
    }

    pub const fn with_x(mut self) -> Self {
        self.0 |= Self::X;
        self
    }

    pub const fn with_y(mut self) -> Self {
        self.0 |= Self::Y;
        self
    }

    pub const fn with_z(mut self) -> Self {
        self.0 |= Self::Z;
        self
    }

    /// Register by axis letter; letters outside x/y/z are ignored.
    pub const fn with_axis(self, axis: char) -> Self {
        match axis {
            'x' | 'X' => self.with_x(),
            'y' | 'Y' => self.with_y(),
            'z' | 'Z' => self.with_z(),
            _ => self,
        }
    }

    pub const fn has_x(&self) -> bool {
        self.0 & Self::X != 0
    }

    pub const fn has_y(&self) -> bool {
        self.0 & Self::Y != 0
    }

    pub const fn has_z(&self) -> bool {
        self.0 & Self::Z != 0
    }
}

/// Maps a Cartesian trajectory sample to one motor's scalar position.
///
/// The projection must be continuous on `[0, move_t]`; it need not be
/// monotone or analytically invertible.
pub trait Projection {
    fn project(&mut self, m: &Move, move_time: f64) -> f64;
}

/// Hook invoked once after each completed range solve.
pub trait PostStepHook {
    fn post_step(&mut self);
}

impl PostStepHook for () {
    fn post_step(&mut self) {}
}

#[derive(Debug, Clone, Copy)]
struct TimePos {
    time: f64,
    position: f64,
}

// Locate a half-step crossing by the false position method. `low` and
// `high` bracket the target; the endpoint replaced each iteration is the
// one whose residual shares the high endpoint's sign.
fn find_step<C: Projection>(
    projection: &mut C,
    m: &Move,
    mut low: TimePos,
    mut high: TimePos,
    target: f64,
) -> TimePos {
    let mut best_guess = high;
    low.position -= target;
    high.position -= target;
    if high.position == 0.0 {
        // The high range was a perfect guess for the next step
        return best_guess;
    }
    let high_sign = high.position.is_sign_negative();
    if high_sign == low.position.is_sign_negative() {
        // The target is not in the low/high range - report the low bound
        return TimePos {
            time: low.time,
            position: target,
        };
    }
    loop {
        let guess_time = (low.time * high.position - high.time * low.position)
            / (high.position - low.position);
        if (guess_time - best_guess.time).abs() <= TIME_EPSILON {
            break;
        }
        best_guess.time = guess_time;
        best_guess.position = projection.project(m, guess_time);
        let guess_position = best_guess.position - target;
        if guess_position.is_sign_negative() == high_sign {
            high.time = guess_time;
            high.position = guess_position;
        } else {
            low.time = guess_time;
            low.position = guess_position;
        }
    }
    best_guess
}

/// Per-motor solver state: projection, reversal filter, sink binding, and
/// flush bookkeeping.
pub struct StepSolver<C, P, S> {
    step_dist: f64,
    commanded_pos: f64,
    last_flush_time: f64,
    last_move_time: f64,
    active_flags: ActiveFlags,
    gen_steps_pre_active: f64,
    gen_steps_post_active: f64,
    projection: C,
    post_hook: P,
    filter: ReversalFilter,
    queue: Option<Rc<RefCell<MoveQueue>>>,
    sink: S,
}

impl<C: Projection, P: PostStepHook, S: StepSink> StepSolver<C, P, S> {
    pub fn new(
        step_dist: f64,
        active_flags: ActiveFlags,
        gen_steps_pre_active: f64,
        gen_steps_post_active: f64,
        projection: C,
        post_hook: P,
        sink: S,
    ) -> Self {
        Self {
            step_dist,
            commanded_pos: 0.0,
            last_flush_time: 0.0,
            // No activity yet, so no post-activity tail to solve.
            last_move_time: f64::NEG_INFINITY,
            active_flags,
            gen_steps_pre_active,
            gen_steps_post_active,
            projection,
            post_hook,
            filter: ReversalFilter::default(),
            queue: None,
            sink,
        }
    }

    pub fn from_config(
        config: &StepperConfig,
        projection: C,
        post_hook: P,
        sink: S,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(
            config.step_dist,
            config.active_flags(),
            config.gen_steps_pre_active,
            config.gen_steps_post_active,
            projection,
            post_hook,
            sink,
        ))
    }

    pub fn commanded_pos(&self) -> f64 {
        self.commanded_pos
    }

    pub fn set_position(&mut self, x: f64, y: f64, z: f64) {
        self.commanded_pos = self.calc_position_from_coord(x, y, z);
    }

    /// Evaluate the projection on an ephemeral stationary move at the given
    /// Cartesian point.
    pub fn calc_position_from_coord(&mut self, x: f64, y: f64, z: f64) -> f64 {
        let m = Move {
            print_time: 0.0,
            move_t: 1000.0,
            start_v: 0.0,
            half_accel: 0.0,
            start_pos: Coord { x, y, z },
            axes_r: Coord::default(),
        };
        self.projection.project(&m, 500.0)
    }

    pub fn set_queue(&mut self, queue: Option<Rc<RefCell<MoveQueue>>>) {
        self.queue = queue;
    }

    pub fn set_sink(&mut self, sink: S, step_dist: f64) {
        self.sink = sink;
        self.step_dist = step_dist;
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Report whether this stepper is registered for the given axis letter.
    pub fn is_active_axis(&self, axis: char) -> bool {
        match axis {
            'x' | 'X' => self.active_flags.has_x(),
            'y' | 'Y' => self.active_flags.has_y(),
            'z' | 'Z' => self.active_flags.has_z(),
            _ => false,
        }
    }

    // A move can drive this stepper if any registered axis changes.
    fn move_is_active(&self, m: &Move) -> bool {
        (self.active_flags.has_x() && m.axes_r.x != 0.0)
            || (self.active_flags.has_y() && m.axes_r.y != 0.0)
            || (self.active_flags.has_z() && m.axes_r.z != 0.0)
    }

    // Generate step times for a portion of one move, `[abs_start, abs_end]`
    // in absolute time. On success the commanded position is advanced and
    // the post-step hook runs; on a sink error neither happens.
    fn gen_steps_range(&mut self, m: &Move, abs_start: f64, abs_end: f64) -> Result<(), SinkError> {
        let half_step = 0.5 * self.step_dist;
        let start = abs_start - m.print_time;
        let end = abs_end - m.print_time;
        let mut last = TimePos {
            time: start,
            position: self.commanded_pos,
        };
        let mut low = last;
        let mut high = last;
        let mut seek_time_delta = SEEK_TIME_RESET;
        let mut sdir = self.filter.last_dir();
        let mut is_dir_change = false;
        loop {
            let diff = high.position - last.position;
            let dist = if sdir { diff } else { -diff };
            if dist >= half_step {
                // Have a valid upper bound - now find the step
                let target = last.position + if sdir { half_step } else { -half_step };
                let next = find_step(&mut self.projection, m, low, high, target);
                self.filter
                    .append(&mut self.sink, sdir, m.print_time, next.time)?;
                seek_time_delta = (next.time - last.time).max(TIME_EPSILON);
                if is_dir_change && seek_time_delta > SEEK_TIME_RESET {
                    seek_time_delta = SEEK_TIME_RESET;
                }
                is_dir_change = false;
                last.position = target + if sdir { half_step } else { -half_step };
                last.time = next.time;
                low = next;
                if low.time < high.time {
                    // The existing search range is still valid
                    continue;
                }
            } else if dist > 0.0 {
                // Stepper fully reached its last target, so the held step
                // cannot be a reversal artifact
                self.filter.commit(&mut self.sink)?;
            } else if dist < -(half_step + TIME_EPSILON) {
                // Found direction change
                is_dir_change = true;
                if seek_time_delta > SEEK_TIME_RESET {
                    seek_time_delta = SEEK_TIME_RESET;
                }
                if low.time > last.time {
                    // Update direction and retry
                    sdir = !sdir;
                    continue;
                }
                if high.time > last.time + TIME_EPSILON {
                    // Reduce the high bound - it will become a better low bound
                    high.time = (last.time + high.time) * 0.5;
                    high.position = self.projection.project(m, high.time);
                    continue;
                }
            }
            // Need to increase the search range to find an upper bound
            if high.time >= end {
                break;
            }
            low = high;
            loop {
                high.time = last.time + seek_time_delta;
                seek_time_delta += seek_time_delta;
                if high.time > low.time {
                    break;
                }
            }
            if high.time > end {
                high.time = end;
            }
            high.position = self.projection.project(m, high.time);
        }
        self.filter.flush(&mut self.sink, m.print_time, end)?;
        self.commanded_pos = last.position;
        self.post_hook.post_step();
        Ok(())
    }

    /// Solve every required step up to `flush_time`, including pre- and
    /// post-activity padding around active moves.
    pub fn generate_steps(&mut self, flush_time: f64) -> Result<(), FlushError> {
        let mut last_flush_time = self.last_flush_time;
        self.last_flush_time = flush_time;
        let Some(queue) = self.queue.clone() else {
            return Ok(());
        };
        queue.borrow_mut().check_sentinels()?;
        let queue = queue.borrow();
        let moves = queue.segments();
        tracing::trace!(flush_time, last_flush_time, "generating steps");
        let mut idx = 1;
        while idx + 1 < moves.len() && last_flush_time >= moves[idx].print_time + moves[idx].move_t
        {
            idx += 1;
        }
        let post_active = self.gen_steps_post_active.max(SDS_CHECK_TIME);
        let mut force_steps_time = self.last_move_time + post_active;
        loop {
            if last_flush_time >= flush_time {
                return Ok(());
            }
            let m = moves[idx];
            let start = m.print_time.max(last_flush_time);
            let end = (m.print_time + m.move_t).min(flush_time);
            if self.move_is_active(&m) {
                if self.gen_steps_pre_active > 0.0 && start > last_flush_time + TIME_EPSILON {
                    // Must generate steps leading up to stepper activity
                    tracing::trace!(activity_start = start, "stepping back for pre-active solve");
                    force_steps_time = start;
                    if last_flush_time < start - self.gen_steps_pre_active {
                        last_flush_time = start - self.gen_steps_pre_active;
                    }
                    while idx > 0 && moves[idx].print_time > last_flush_time {
                        idx -= 1;
                    }
                    continue;
                }
                self.gen_steps_range(&m, start, end)?;
                last_flush_time = end;
                self.last_move_time = end;
                force_steps_time = end + post_active;
            } else if start < force_steps_time {
                // Must generate steps just past stepper activity
                let end = end.min(force_steps_time);
                self.gen_steps_range(&m, start, end)?;
                last_flush_time = end;
            }
            if flush_time + self.gen_steps_pre_active <= m.print_time + m.move_t {
                return Ok(());
            }
            idx += 1;
            if idx == moves.len() {
                return Ok(());
            }
        }
    }

    /// Earliest `print_time` at which this stepper becomes active before
    /// `flush_time`, if any.
    pub fn check_active_time(&self, flush_time: f64) -> Option<f64> {
        let queue = self.queue.as_ref()?;
        queue.borrow_mut().refresh_sentinels();
        let queue = queue.borrow();
        let moves = queue.segments();
        let mut idx = 1;
        while idx + 1 < moves.len()
            && self.last_flush_time >= moves[idx].print_time + moves[idx].move_t
        {
            idx += 1;
        }
        loop {
            let m = &moves[idx];
            if self.move_is_active(m) {
                return Some(m.print_time);
            }
            if flush_time <= m.print_time + m.move_t {
                return None;
            }
            idx += 1;
            if idx == moves.len() {
                return None;
            }
        }
    }
}
