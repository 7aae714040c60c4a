//! Finding the home switches.
//!
//! Homing drives the actuators directly instead of going through the kinematics:
//! before each move we tell the segment queue that the axis being homed is at
//! zero, and then ask for a move far past the switch. The queue's position is only
//! made to agree with the Cartesian position again at the very end.

use scarab_planner::{Axis, Segment};
use scarab_protocol::Command;

use crate::calibration::GridPlan;
use crate::wait::Activity;
use crate::Firmware;

/// How far to lift the nozzle before moving anything else.
const Z_RAISE: f32 = 5.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    RaisingZ,
    /// Both arms seeking their switches together.
    HomingXY,
    Seek(usize),
    BackOff(usize),
    Approach(usize),
    Repositioning,
}

#[derive(Debug)]
pub(crate) struct Homing {
    phase: Phase,
    /// Which of X, Y and Z to home.
    axes: [bool; 3],
    /// Positions to report after homing instead of the switch positions.
    overrides: [Option<f32>; 3],
    /// Where the segment queue thinks the actuators are.
    actuators: [f32; 4],
    saved_feed_rate: f32,
    saved_feed_multiplier: f32,
    /// Start a grid calibration session once homed.
    then: Option<GridPlan>,
}

impl Homing {
    /// Homing for a `G28` command.
    ///
    /// With no axes named, or all of them, everything is homed. Naming either X
    /// or Y homes both arms. A non-zero value replaces the homed position of that
    /// axis.
    pub(crate) fn from_command(cmd: &Command<'_>) -> Self {
        let named = [cmd.has('X'), cmd.has('Y'), cmd.has('Z')];
        let all = named.iter().all(|n| !n) || named.iter().all(|n| *n);
        let arms = all || named[0] || named[1];
        let mut overrides = [None; 3];
        for (slot, letter) in overrides.iter_mut().zip(['X', 'Y', 'Z']) {
            *slot = cmd.get(letter).filter(|v| *v as i64 != 0);
        }
        Homing::new([arms, arms, all || named[2]], overrides, None)
    }

    /// Homing every axis, followed by `then`.
    pub(crate) fn all(then: Option<GridPlan>) -> Self {
        Homing::new([true; 3], [None; 3], then)
    }

    fn new(axes: [bool; 3], overrides: [Option<f32>; 3], then: Option<GridPlan>) -> Self {
        Homing {
            phase: Phase::Idle,
            axes,
            overrides,
            actuators: [0.0; 4],
            saved_feed_rate: 0.0,
            saved_feed_multiplier: 0.0,
            then,
        }
    }

    /// Advances by one phase once the previous move has finished.
    pub(crate) fn step(mut self, fw: &mut Firmware) -> Option<Activity> {
        if fw.hal.queue.has_pending() {
            return Some(Activity::Homing(self));
        }
        log::debug!("homing: {:?} done", self.phase);

        match self.phase {
            Phase::Idle => self.raise_z(fw),
            Phase::RaisingZ => {
                fw.hal.steppers.set_endstops_enabled(true);
                let quick = fw.config.quick_home
                    && self.axes[0]
                    && self.axes[1]
                    && fw.config.can_home(0)
                    && fw.config.can_home(1);
                if quick {
                    self.home_xy(fw);
                } else {
                    self.next_axis(fw, 0);
                }
            }
            Phase::HomingXY => {
                fw.hal.steppers.take_endstop_hit();
                self.next_axis(fw, 0);
            }
            Phase::Seek(axis) => {
                self.actuators[axis] = 0.0;
                self.tell_queue(fw);
                let back = -fw.config.home_retract_mm[axis] * self.dir(fw, axis);
                let feed_rate = fw.config.homing_feedrate[axis];
                self.move_axis(fw, axis, back, feed_rate);
                self.phase = Phase::BackOff(axis);
            }
            Phase::BackOff(axis) => {
                let forward = 2.0 * fw.config.home_retract_mm[axis] * self.dir(fw, axis);
                let feed_rate = fw.config.homing_feedrate[axis] / 2.0;
                self.move_axis(fw, axis, forward, feed_rate);
                self.phase = Phase::Approach(axis);
            }
            Phase::Approach(axis) => {
                fw.hal.steppers.take_endstop_hit();
                axis_is_at_home(fw, axis);
                self.next_axis(fw, axis + 1);
            }
            Phase::Repositioning => {}
        }

        if self.phase == Phase::Repositioning {
            self.finish(fw);
            return self.then.take().map(|plan| fw.start_grid(plan));
        }
        Some(Activity::Homing(self))
    }

    fn dir(&self, fw: &Firmware, axis: usize) -> f32 {
        fw.config.home_dir[axis] as f32
    }

    fn raise_z(&mut self, fw: &mut Firmware) {
        self.saved_feed_rate = fw.state.feed_rate;
        self.saved_feed_multiplier = fw.state.feed_multiplier;
        fw.state.feed_multiplier = 100.0;

        let z = Axis::Z.index();
        let at = fw.actuators_at(&fw.state.current_position);
        self.actuators = [at.coords[0], at.coords[1], 0.0, fw.state.current_position[3]];
        self.tell_queue(fw);
        let up = -Z_RAISE * self.dir(fw, z);
        let feed_rate = fw.config.homing_feedrate[z];
        self.move_axis(fw, z, up, feed_rate);
        if !self.axes[z] {
            fw.state.current_position[z] += up;
        }
        self.phase = Phase::RaisingZ;
    }

    fn home_xy(&mut self, fw: &mut Firmware) {
        self.actuators[0] = 0.0;
        self.actuators[1] = 0.0;
        self.tell_queue(fw);
        let reach = 3.0 * fw.config.z_max_length();
        self.actuators[0] = reach * self.dir(fw, 0);
        self.actuators[1] = reach * self.dir(fw, 1);
        let feed_rate = fw.config.homing_feedrate[0];
        self.enqueue(fw, feed_rate);
        self.phase = Phase::HomingXY;
    }

    /// Starts the fast seek of the next axis from `from` on that needs homing, or
    /// moves on to repositioning if there is none.
    fn next_axis(&mut self, fw: &mut Firmware, from: usize) {
        let Some(axis) = (from..3).find(|&a| self.axes[a] && fw.config.can_home(a)) else {
            self.phase = Phase::Repositioning;
            return;
        };
        self.actuators[axis] = 0.0;
        self.tell_queue(fw);
        let reach = 3.0 * fw.config.z_max_length() * self.dir(fw, axis);
        let feed_rate = fw.config.homing_feedrate[axis];
        self.move_axis(fw, axis, reach, feed_rate);
        self.phase = Phase::Seek(axis);
    }

    fn finish(&mut self, fw: &mut Firmware) {
        let z = Axis::Z.index();
        for axis in 0..3 {
            if let Some(value) = self.overrides[axis] {
                let offset = if axis == z { fw.state.home_offset[z] } else { 0.0 };
                fw.state.current_position[axis] = value + offset;
            }
        }
        fw.state.destination = fw.state.current_position;
        fw.sync_queue_position();

        if fw.config.endstops_only_for_homing {
            fw.hal.steppers.set_endstops_enabled(false);
        }
        fw.state.feed_rate = self.saved_feed_rate;
        fw.state.feed_multiplier = self.saved_feed_multiplier;
        fw.homed = true;
        log::info!("homed at {:?}", fw.state.current_position);
    }

    fn move_axis(&mut self, fw: &mut Firmware, axis: usize, to: f32, feed_rate: f32) {
        self.actuators[axis] = to;
        self.enqueue(fw, feed_rate);
    }

    fn tell_queue(&self, fw: &mut Firmware) {
        let [a, b, c, e] = self.actuators;
        fw.hal.queue.set_current_position([a, b, c], e);
    }

    fn enqueue(&self, fw: &mut Firmware, feed_rate: f32) {
        let [a, b, c, e] = self.actuators;
        fw.hal.queue.enqueue(Segment {
            actuators: [a, b, c],
            e,
            feed_rate: feed_rate / 60.0,
            tool: fw.state.active_tool,
        });
        fw.steppers_idle = false;
    }
}

/// Sets the Cartesian position and travel limits of an axis that has just found
/// its switch.
fn axis_is_at_home(fw: &mut Firmware, axis: usize) {
    let offset = fw.state.home_offset[axis];
    match axis {
        0 | 1 => {
            // The arm offsets act on the angles, so the switch position itself is fixed.
            let home = fw.kinematics.home_xy();
            fw.state.current_position[axis] = if axis == 0 { home.x } else { home.y };
            fw.state.min_pos[axis] = fw.config.base_min_pos[axis];
            fw.state.max_pos[axis] = fw.config.base_max_pos[axis];
        }
        _ => {
            fw.state.current_position[axis] = fw.config.base_home_pos[axis] + offset;
            fw.state.min_pos[axis] = fw.config.base_min_pos[axis] + offset;
            fw.state.max_pos[axis] = fw.config.base_max_pos[axis] + offset;
        }
    }
}
