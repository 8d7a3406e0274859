//! Time-ordered queue of planned kinematic moves.
//!
//! The queue holds trapezoid segments between a head and a tail sentinel so
//! the solver can walk one slot past either end without branching. The
//! planner appends and expires moves; the solver only reads them during a
//! flush.

use thiserror::Error;

use crate::solver::TIME_EPSILON;

pub(crate) const NEVER_TIME: f64 = 9_999_999_999_999_999.9;
const MAX_NULL_MOVE: f64 = 1.0;

#[derive(Debug, Error, PartialEq)]
pub enum QueueError {
    #[error("move queue is missing its sentinels")]
    MissingSentinels,
    #[error("move at print_time {print_time} overlaps the previous move")]
    OutOfOrder { print_time: f64 },
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// One planned trajectory segment, live on `[print_time, print_time + move_t]`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Move {
    pub print_time: f64,
    pub move_t: f64,
    pub start_v: f64,
    pub half_accel: f64,
    pub start_pos: Coord,
    /// Unit direction of the move; a zero component means that axis does
    /// not change during the move.
    pub axes_r: Coord,
}

impl Move {
    /// Distance traveled along `axes_r` at `move_time` within the move.
    pub fn distance_at(&self, move_time: f64) -> f64 {
        (self.start_v + self.half_accel * move_time) * move_time
    }

    /// Cartesian position at `move_time` within the move.
    pub fn coord_at(&self, move_time: f64) -> Coord {
        let move_dist = self.distance_at(move_time);
        Coord {
            x: self.start_pos.x + self.axes_r.x * move_dist,
            y: self.start_pos.y + self.axes_r.y * move_dist,
            z: self.start_pos.z + self.axes_r.z * move_dist,
        }
    }
}

/// Accel/cruise/decel velocity profile expanded by
/// [`MoveQueue::append_trapezoid`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Trapezoid {
    pub accel_t: f64,
    pub cruise_t: f64,
    pub decel_t: f64,
    pub start_v: f64,
    pub cruise_v: f64,
    pub accel: f64,
}

pub struct MoveQueue {
    // Real moves live between moves[0] (head sentinel) and the tail
    // sentinel at moves[len - 1].
    moves: Vec<Move>,
}

impl Default for MoveQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MoveQueue {
    pub fn new() -> Self {
        let moves = vec![
            Move {
                print_time: -1.0,
                ..Move::default()
            },
            Move {
                print_time: NEVER_TIME,
                move_t: NEVER_TIME,
                ..Move::default()
            },
        ];
        Self { moves }
    }

    fn tail_index(&self) -> usize {
        self.moves.len() - 1
    }

    /// All queue slots, sentinels included.
    pub fn segments(&self) -> &[Move] {
        &self.moves
    }

    /// Real moves currently queued (sentinels excluded).
    pub fn len(&self) -> usize {
        self.moves.len() - 2
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recompute the tail sentinel if `add_move` marked it stale.
    pub fn refresh_sentinels(&mut self) {
        let tail_idx = self.tail_index();
        if self.moves[tail_idx].print_time != 0.0 {
            return;
        }
        if tail_idx == 1 {
            self.moves[tail_idx].print_time = NEVER_TIME;
            self.moves[tail_idx].move_t = NEVER_TIME;
            return;
        }
        let prev = self.moves[tail_idx - 1];
        let tail = &mut self.moves[tail_idx];
        tail.print_time = prev.print_time + prev.move_t;
        tail.move_t = 0.0;
        tail.start_pos = prev.coord_at(prev.move_t);
    }

    /// Refresh the tail sentinel and verify the queue is well formed.
    pub fn check_sentinels(&mut self) -> Result<(), QueueError> {
        if self.moves.len() < 2 {
            return Err(QueueError::MissingSentinels);
        }
        self.refresh_sentinels();
        let mut prev_end = self.moves[1].print_time;
        for m in &self.moves[1..self.tail_index()] {
            if m.print_time < prev_end - TIME_EPSILON || m.move_t < 0.0 {
                return Err(QueueError::OutOfOrder {
                    print_time: m.print_time,
                });
            }
            prev_end = m.print_time + m.move_t;
        }
        Ok(())
    }

    /// Add a fully-prepared move, filling any gap with a null move so that
    /// consecutive queued moves stay contiguous.
    pub fn add_move(&mut self, m: Move) {
        let tail_idx = self.tail_index();
        let prev = self.moves[tail_idx - 1];
        if prev.print_time + prev.move_t < m.print_time {
            let mut null_move = Move {
                start_pos: m.start_pos,
                ..Move::default()
            };
            if prev.print_time <= 0.0 && m.print_time > MAX_NULL_MOVE {
                null_move.print_time = m.print_time - MAX_NULL_MOVE;
            } else {
                null_move.print_time = prev.print_time + prev.move_t;
            }
            null_move.move_t = m.print_time - null_move.print_time;
            let insert_at = self.tail_index();
            self.moves.insert(insert_at, null_move);
        }
        let insert_at = self.tail_index();
        self.moves.insert(insert_at, m);
        // mark the tail stale so the next sentinel check recomputes it
        let tail_idx = self.tail_index();
        self.moves[tail_idx].print_time = 0.0;
        self.moves[tail_idx].move_t = 0.0;
    }

    /// Expand a trapezoid profile into up to three queued segments.
    pub fn append_trapezoid(
        &mut self,
        print_time: f64,
        profile: &Trapezoid,
        start_pos: Coord,
        axes_r: Coord,
    ) {
        let mut cur_time = print_time;
        let mut cur_pos = start_pos;

        if profile.accel_t > 0.0 {
            let m = Move {
                print_time: cur_time,
                move_t: profile.accel_t,
                start_v: profile.start_v,
                half_accel: 0.5 * profile.accel,
                start_pos: cur_pos,
                axes_r,
            };
            self.add_move(m);
            cur_time += profile.accel_t;
            cur_pos = m.coord_at(profile.accel_t);
        }

        if profile.cruise_t > 0.0 {
            let m = Move {
                print_time: cur_time,
                move_t: profile.cruise_t,
                start_v: profile.cruise_v,
                half_accel: 0.0,
                start_pos: cur_pos,
                axes_r,
            };
            self.add_move(m);
            cur_time += profile.cruise_t;
            cur_pos = m.coord_at(profile.cruise_t);
        }

        if profile.decel_t > 0.0 {
            let m = Move {
                print_time: cur_time,
                move_t: profile.decel_t,
                start_v: profile.cruise_v,
                half_accel: -0.5 * profile.accel,
                start_pos: cur_pos,
                axes_r,
            };
            self.add_move(m);
        }
    }

    /// Drop moves that end at or before `print_time`.
    pub fn finalize_moves(&mut self, print_time: f64) {
        while self.moves.len() > 2 {
            let m = self.moves[1];
            if m.print_time + m.move_t > print_time {
                break;
            }
            self.moves.remove(1);
        }
        if self.moves.len() == 2 {
            let tail = &mut self.moves[1];
            tail.print_time = NEVER_TIME;
            tail.move_t = NEVER_TIME;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_x() -> Coord {
        Coord {
            x: 1.0,
            y: 0.0,
            z: 0.0,
        }
    }

    #[test]
    fn trapezoid_expands_into_contiguous_segments() {
        let mut mq = MoveQueue::new();
        mq.append_trapezoid(
            0.0,
            &Trapezoid {
                accel_t: 1.0,
                cruise_t: 2.0,
                decel_t: 1.0,
                start_v: 0.0,
                cruise_v: 1.0,
                accel: 2.0,
            },
            Coord::default(),
            unit_x(),
        );
        // initial null move bridging the head sentinel, plus three segments
        assert_eq!(mq.len(), 4);
        mq.check_sentinels().unwrap();
        let tail = *mq.segments().last().unwrap();
        assert_eq!(tail.print_time, 4.0);
        assert_eq!(tail.move_t, 0.0);
    }

    #[test]
    fn gap_is_filled_with_null_move() {
        let mut mq = MoveQueue::new();
        mq.add_move(Move {
            print_time: 0.0,
            move_t: 0.5,
            ..Move::default()
        });
        mq.add_move(Move {
            print_time: 2.0,
            move_t: 0.5,
            ..Move::default()
        });
        // initial null + first move + gap null + second move
        assert_eq!(mq.len(), 4);
        let null_move = mq.segments()[3];
        assert_eq!(null_move.print_time, 0.5);
        assert_eq!(null_move.move_t, 1.5);
        assert_eq!(null_move.start_v, 0.0);
    }

    #[test]
    fn leading_null_move_is_capped() {
        let mut mq = MoveQueue::new();
        mq.add_move(Move {
            print_time: 100.0,
            move_t: 0.5,
            ..Move::default()
        });
        let null_move = mq.segments()[1];
        assert_eq!(null_move.print_time, 99.0);
        assert_eq!(null_move.move_t, 1.0);
    }

    #[test]
    fn finalize_drops_expired_moves_and_resets_tail() {
        let mut mq = MoveQueue::new();
        mq.append_trapezoid(
            0.0,
            &Trapezoid {
                accel_t: 1.0,
                cruise_t: 0.0,
                decel_t: 0.0,
                start_v: 0.5,
                cruise_v: 1.0,
                accel: 1.0,
            },
            Coord::default(),
            unit_x(),
        );
        mq.finalize_moves(2.0);
        assert!(mq.is_empty());
        mq.check_sentinels().unwrap();
        assert_eq!(mq.segments().last().unwrap().print_time, NEVER_TIME);
    }

    #[test]
    fn overlapping_moves_are_rejected() {
        let mut mq = MoveQueue::new();
        mq.add_move(Move {
            print_time: 0.0,
            move_t: 1.0,
            ..Move::default()
        });
        // Bypass add_move's ordering to simulate a corrupted queue.
        let tail_idx = mq.tail_index();
        mq.moves.insert(
            tail_idx,
            Move {
                print_time: 0.25,
                move_t: 1.0,
                ..Move::default()
            },
        );
        assert_eq!(
            mq.check_sentinels(),
            Err(QueueError::OutOfOrder { print_time: 0.25 })
        );
    }

    #[test]
    fn coord_at_follows_the_profile() {
        let m = Move {
            print_time: 0.0,
            move_t: 2.0,
            start_v: 1.0,
            half_accel: 0.5,
            start_pos: Coord {
                x: 10.0,
                y: 0.0,
                z: 0.0,
            },
            axes_r: unit_x(),
        };
        assert_eq!(m.distance_at(2.0), 4.0);
        assert_eq!(m.coord_at(2.0).x, 14.0);
    }
}
