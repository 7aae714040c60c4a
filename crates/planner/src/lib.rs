//! Machine position bookkeeping and move segmentation.
//!
//! The planner owns the Cartesian view of the machine: where the head is, where
//! the current command wants it to go, and in which mode coordinates are read.
//! It turns each requested move into a sequence of short straight segments,
//! passes every segment endpoint through a [`Kinematics`] model and hands the
//! result to a [`SegmentQueue`], which does the actual velocity planning and
//! stepping.

#![cfg_attr(not(feature = "std"), no_std)]

pub use scarab_geom::{Actuators, Anomalies, Anomaly, Frame, Kinematics};

pub mod retract;
pub mod segmenter;

pub use retract::RetractionState;
pub use segmenter::{segment_and_emit, MoveSummary};

/// Moves shorter than this (in mm) are treated as not moving at all.
pub const MIN_MOVE: f32 = 0.000001;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
    E,
}

impl Axis {
    pub const ALL: [Axis; 4] = [Axis::X, Axis::Y, Axis::Z, Axis::E];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
            Axis::E => 'E',
        }
    }
}

/// A position in X, Y, Z and E, in mm.
pub type Position = [f32; 4];

/// One interpolated waypoint, already in actuator space.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Segment {
    /// Theta, psi and corrected Z on a SCARA arm; X, Y and Z on a Cartesian machine.
    pub actuators: [f32; 3],
    pub e: f32,
    /// mm/s.
    pub feed_rate: f32,
    pub tool: u8,
}

/// Motion limits and calibration that the segment queue uses to plan velocities.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MotionTunables {
    pub axis_steps_per_unit: [f32; 4],
    /// mm/s.
    pub max_feedrate: [f32; 4],
    /// mm/s^2.
    pub max_acceleration: [f32; 4],
    /// Derived from `max_acceleration` and `axis_steps_per_unit`.
    pub axis_steps_per_sqr_second: [f32; 4],
    pub acceleration: f32,
    pub retract_acceleration: f32,
    pub min_feedrate: f32,
    pub min_travel_feedrate: f32,
    /// Microseconds.
    pub min_segment_time: f32,
    pub max_xy_jerk: f32,
    pub max_z_jerk: f32,
    pub max_e_jerk: f32,
    /// Zero means volumetric extrusion is off.
    pub filament_diameter: f32,
}

impl Default for MotionTunables {
    fn default() -> Self {
        let mut ret = MotionTunables {
            axis_steps_per_unit: [103.69, 106.65, 200.0 / 1.25, 1000.0],
            max_feedrate: [300.0, 300.0, 30.0, 45.0],
            max_acceleration: [300.0, 300.0, 20.0, 1000.0],
            axis_steps_per_sqr_second: [0.0; 4],
            acceleration: 400.0,
            retract_acceleration: 2000.0,
            min_feedrate: 0.0,
            min_travel_feedrate: 0.0,
            min_segment_time: 20000.0,
            max_xy_jerk: 5.0,
            max_z_jerk: 0.4,
            max_e_jerk: 3.0,
            filament_diameter: 0.0,
        };
        ret.recompute_steps_per_sqr_second();
        ret
    }
}

impl MotionTunables {
    pub fn recompute_steps_per_sqr_second(&mut self) {
        for i in 0..4 {
            self.axis_steps_per_sqr_second[i] = self.max_acceleration[i] * self.axis_steps_per_unit[i];
        }
    }

    /// Changes the extruder's steps per mm.
    ///
    /// A small steps-per-mm value is assumed to belong to a geared-down extruder
    /// whose limits were tuned for the old value, so the E-axis jerk, feed rate and
    /// acceleration are scaled by `old / new` to keep the same physical behavior.
    pub fn set_e_steps_per_unit(&mut self, value: f32) {
        let e = Axis::E.index();
        if value < 20.0 {
            let factor = self.axis_steps_per_unit[e] / value;
            self.max_e_jerk *= factor;
            self.max_feedrate[e] *= factor;
            self.axis_steps_per_sqr_second[e] *= factor;
        }
        self.axis_steps_per_unit[e] = value;
    }
}

/// The far end of the plumbing: something that accepts segments and turns them into motion.
pub trait SegmentQueue {
    fn enqueue(&mut self, segment: Segment);

    /// Is any queued motion not yet finished?
    fn has_pending(&self) -> bool;

    /// Overwrites the queue's idea of where the actuators are, without moving.
    fn set_current_position(&mut self, actuators: [f32; 3], e: f32);

    fn set_e_position(&mut self, e: f32);

    fn apply_tunables(&mut self, tunables: &MotionTunables);

    fn set_extrude_multiplier(&mut self, percent: f32);
}

/// The coordinates named by a motion command. Missing axes hold their position.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MoveRequest {
    pub axes: [Option<f32>; 4],
    /// mm/min.
    pub feed_rate: Option<f32>,
}

impl MoveRequest {
    pub fn touches_only_e(&self) -> bool {
        self.axes[3].is_some() && self.axes[..3].iter().all(Option::is_none)
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MachineState {
    /// The endpoint of the last move that was handed to the segment queue.
    pub current_position: Position,
    pub destination: Position,
    /// mm/min.
    pub feed_rate: f32,
    /// Percent.
    pub feed_multiplier: f32,
    /// Percent.
    pub extrude_multiplier: f32,
    pub relative_mode: bool,
    pub axis_relative_mode: [bool; 4],
    pub home_offset: Position,
    pub axis_scaling: Position,
    pub soft_endstops_enabled: bool,
    pub min_pos: [f32; 3],
    pub max_pos: [f32; 3],
    pub active_tool: u8,
}

impl MachineState {
    pub fn new(min_pos: [f32; 3], max_pos: [f32; 3]) -> Self {
        MachineState {
            current_position: [0.0; 4],
            destination: [0.0; 4],
            feed_rate: 1500.0,
            feed_multiplier: 100.0,
            extrude_multiplier: 100.0,
            relative_mode: false,
            axis_relative_mode: [false; 4],
            home_offset: [0.0; 4],
            axis_scaling: [1.0; 4],
            soft_endstops_enabled: true,
            min_pos,
            max_pos,
            active_tool: 0,
        }
    }

    fn is_relative(&self, axis: usize) -> bool {
        self.relative_mode || self.axis_relative_mode[axis]
    }

    /// Fills in `destination` from a motion command.
    ///
    /// If `retraction` is provided and enabled for automatic detection, an
    /// extruder-only move may be rewritten into a firmware retract or recover.
    pub fn resolve_destination(
        &mut self,
        req: &MoveRequest,
        apply_scaling: bool,
        retraction: Option<&mut RetractionState>,
    ) {
        for axis in 0..4 {
            self.destination[axis] = match req.axes[axis] {
                Some(value) => {
                    let scale = if apply_scaling { self.axis_scaling[axis] } else { 1.0 };
                    let base = if self.is_relative(axis) { self.current_position[axis] } else { 0.0 };
                    value * scale + base
                }
                None => self.current_position[axis],
            };
        }

        if let Some(f) = req.feed_rate {
            if f > 0.0 {
                self.feed_rate = f;
            }
        }

        if let Some(retraction) = retraction {
            if req.touches_only_e() {
                retraction.detect(self);
            }
        }
    }

    /// Clamps the X, Y and Z of `destination` into the soft endstops.
    pub fn clamp_to_soft_endstops(&mut self) {
        for i in 0..3 {
            self.destination[i] = self.destination[i].clamp(self.min_pos[i], self.max_pos[i]);
        }
    }

    /// Sets the given axes of `current_position` directly, as G92 does.
    pub fn set_position(&mut self, axes: [Option<f32>; 4]) {
        for (axis, value) in axes.iter().enumerate() {
            if let Some(v) = value {
                self.current_position[axis] = *v;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_and_relative_resolution() {
        let mut state = MachineState::new([0.0; 3], [200.0; 3]);
        state.current_position = [5.0, 5.0, 1.0, 2.0];
        let req = MoveRequest {
            axes: [Some(10.0), None, None, Some(1.0)],
            feed_rate: Some(600.0),
        };
        state.resolve_destination(&req, false, None);
        assert_eq!(state.destination, [10.0, 5.0, 1.0, 1.0]);
        assert_eq!(state.feed_rate, 600.0);

        state.axis_relative_mode[3] = true;
        state.resolve_destination(&req, false, None);
        assert_eq!(state.destination, [10.0, 5.0, 1.0, 3.0]);

        state.relative_mode = true;
        state.resolve_destination(&req, false, None);
        assert_eq!(state.destination, [15.0, 5.0, 1.0, 3.0]);
    }

    #[test]
    fn non_positive_feed_is_ignored() {
        let mut state = MachineState::new([0.0; 3], [200.0; 3]);
        let req = MoveRequest {
            axes: [Some(1.0), None, None, None],
            feed_rate: Some(0.0),
        };
        state.resolve_destination(&req, false, None);
        assert_eq!(state.feed_rate, 1500.0);
    }

    #[test]
    fn scaling_applies_on_request() {
        let mut state = MachineState::new([0.0; 3], [200.0; 3]);
        state.axis_scaling = [2.0, 1.0, 1.0, 1.0];
        let req = MoveRequest {
            axes: [Some(10.0), None, None, None],
            feed_rate: None,
        };
        state.resolve_destination(&req, true, None);
        assert_eq!(state.destination[0], 20.0);
        state.resolve_destination(&req, false, None);
        assert_eq!(state.destination[0], 10.0);
    }

    #[test]
    fn small_e_steps_rescale_limits() {
        let mut t = MotionTunables::default();
        t.axis_steps_per_unit[3] = 10.0;
        let jerk = t.max_e_jerk;
        let feed = t.max_feedrate[3];
        let accel = t.axis_steps_per_sqr_second[3];
        t.set_e_steps_per_unit(14.0);
        let factor = 10.0 / 14.0;
        assert!((t.max_e_jerk - jerk * factor).abs() < 1e-4);
        assert!((t.max_feedrate[3] - feed * factor).abs() < 1e-4);
        assert!((t.axis_steps_per_sqr_second[3] - accel * factor).abs() < 1e-1);
        assert_eq!(t.axis_steps_per_unit[3], 14.0);
    }

    #[test]
    fn large_e_steps_leave_limits() {
        let mut t = MotionTunables::default();
        let before = t.clone();
        t.set_e_steps_per_unit(500.0);
        assert_eq!(t.max_e_jerk, before.max_e_jerk);
        assert_eq!(t.max_feedrate, before.max_feedrate);
        assert_eq!(t.axis_steps_per_unit[3], 500.0);
    }
}
