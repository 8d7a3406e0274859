//! Projections from Cartesian space onto individual motors.
//!
//! Every geometry a Cartesian planner feeds this solver falls into one of
//! two shapes. Rails and belt drives are linear: the motor's scalar
//! position is a fixed weighting of the toolhead's x/y/z, so one weight
//! vector covers plain cartesian axes, CoreXY/CoreXZ belt pairs, and any
//! other mix. The linear-delta carriage is the exception, and the reason
//! the solver brackets crossings numerically instead of inverting the
//! projection.

use crate::{
    move_queue::Move,
    solver::{ActiveFlags, Projection},
};

/// Linear projection: the motor tracks `wx*x + wy*y + wz*z`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisMap {
    weights: [f64; 3],
}

impl AxisMap {
    pub const fn new(wx: f64, wy: f64, wz: f64) -> Self {
        Self {
            weights: [wx, wy, wz],
        }
    }

    /// Rail carrying exactly one axis letter.
    pub fn for_axis(axis: char) -> Option<Self> {
        let idx = match axis.to_ascii_lowercase() {
            'x' => 0,
            'y' => 1,
            'z' => 2,
            _ => return None,
        };
        let mut weights = [0.0; 3];
        weights[idx] = 1.0;
        Some(Self { weights })
    }

    /// The two belt motors of a CoreXY gantry: one tracks `x + y`, the
    /// other `x - y`.
    pub const fn corexy() -> (Self, Self) {
        (Self::new(1.0, 1.0, 0.0), Self::new(1.0, -1.0, 0.0))
    }

    /// CoreXZ variant of the belt pair.
    pub const fn corexz() -> (Self, Self) {
        (Self::new(1.0, 0.0, 1.0), Self::new(1.0, 0.0, -1.0))
    }

    /// A move can drive this motor exactly when it changes a weighted axis.
    pub fn active_flags(&self) -> ActiveFlags {
        let mut flags = ActiveFlags::new();
        for (axis, weight) in ['x', 'y', 'z'].into_iter().zip(self.weights) {
            if weight != 0.0 {
                flags = flags.with_axis(axis);
            }
        }
        flags
    }
}

impl Projection for AxisMap {
    fn project(&mut self, m: &Move, move_time: f64) -> f64 {
        let c = m.coord_at(move_time);
        let [wx, wy, wz] = self.weights;
        wx * c.x + wy * c.y + wz * c.z
    }
}

/// Carriage height of one linear-delta tower.
///
/// The carriage rides a vertical rail at `(tower_x, tower_y)` and holds the
/// effector through a rigid arm, so its height is the effector z plus the
/// vertical leg of the arm triangle. There is no closed-form inverse along
/// an arbitrary move.
pub struct TowerArm {
    tower_x: f64,
    tower_y: f64,
    arm2: f64,
}

impl TowerArm {
    pub fn new(arm_len: f64, tower_x: f64, tower_y: f64) -> Self {
        Self {
            tower_x,
            tower_y,
            arm2: arm_len * arm_len,
        }
    }

    pub fn active_flags(&self) -> ActiveFlags {
        ActiveFlags::new().with_x().with_y().with_z()
    }
}

impl Projection for TowerArm {
    fn project(&mut self, m: &Move, move_time: f64) -> f64 {
        let c = m.coord_at(move_time);
        let dx = self.tower_x - c.x;
        let dy = self.tower_y - c.y;
        (self.arm2 - dx * dx - dy * dy).sqrt() + c.z
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::move_queue::Coord;

    fn resting_at(x: f64, y: f64, z: f64) -> Move {
        Move {
            print_time: 0.0,
            move_t: 1.0,
            start_v: 0.0,
            half_accel: 0.0,
            start_pos: Coord { x, y, z },
            axes_r: Coord::default(),
        }
    }

    #[test]
    fn single_axis_maps_select_their_letter() {
        let m = resting_at(1.0, 2.0, 3.0);
        assert_eq!(AxisMap::for_axis('x').unwrap().project(&m, 0.0), 1.0);
        assert_eq!(AxisMap::for_axis('Z').unwrap().project(&m, 0.0), 3.0);
        assert!(AxisMap::for_axis('e').is_none());
    }

    #[test]
    fn axis_map_follows_the_move_profile() {
        let mut rail = AxisMap::for_axis('y').unwrap();
        let m = Move {
            print_time: 0.0,
            move_t: 2.0,
            start_v: 3.0,
            half_accel: 0.5,
            start_pos: Coord {
                x: 0.0,
                y: 1.0,
                z: 0.0,
            },
            axes_r: Coord {
                x: 0.0,
                y: 1.0,
                z: 0.0,
            },
        };
        // distance at t=1 is (3 + 0.5) * 1
        assert_eq!(rail.project(&m, 1.0), 4.5);
    }

    #[test]
    fn corexy_pair_recovers_the_toolhead_position() {
        let (mut a, mut b) = AxisMap::corexy();
        let m = resting_at(4.0, 1.5, 0.0);
        let (pa, pb) = (a.project(&m, 0.0), b.project(&m, 0.0));
        assert_eq!((pa + pb) * 0.5, 4.0);
        assert_eq!((pa - pb) * 0.5, 1.5);
    }

    #[test]
    fn diagonal_move_leaves_the_difference_motor_idle() {
        // x and y advance together, so x - y never changes
        let (_, mut b) = AxisMap::corexy();
        let m = Move {
            print_time: 0.0,
            move_t: 1.0,
            start_v: 2.0,
            half_accel: 0.0,
            start_pos: Coord::default(),
            axes_r: Coord {
                x: std::f64::consts::FRAC_1_SQRT_2,
                y: std::f64::consts::FRAC_1_SQRT_2,
                z: 0.0,
            },
        };
        assert_eq!(b.project(&m, 0.0), b.project(&m, 0.8));
    }

    #[test]
    fn flags_track_nonzero_weights() {
        let flags = AxisMap::new(0.0, -1.0, 2.0).active_flags();
        assert!(!flags.has_x() && flags.has_y() && flags.has_z());
        let (a, _) = AxisMap::corexz();
        let flags = a.active_flags();
        assert!(flags.has_x() && !flags.has_y() && flags.has_z());
    }

    #[test]
    fn tower_height_is_z_plus_the_vertical_leg() {
        // 13-5-12 triangle: tower 5 units away, arm 13
        let mut tower = TowerArm::new(13.0, 3.0, 4.0);
        assert_eq!(tower.project(&resting_at(0.0, 0.0, 7.0), 0.0), 19.0);
    }

    #[test]
    fn carriage_rides_higher_near_its_tower() {
        let mut tower = TowerArm::new(250.0, 100.0, 0.0);
        let near = tower.project(&resting_at(50.0, 0.0, 0.0), 0.0);
        let centered = tower.project(&resting_at(0.0, 0.0, 0.0), 0.0);
        let far = tower.project(&resting_at(-50.0, 0.0, 0.0), 0.0);
        assert!(near > centered);
        assert!(centered > far);
        assert!(tower.active_flags().has_z());
    }
}
