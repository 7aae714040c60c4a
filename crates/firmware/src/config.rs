//! Build-time description of the machine.

use scarab_geom::ScaraConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum KinematicsKind {
    Scara,
    Cartesian,
}

/// Everything about the machine that does not change at run time.
///
/// Use [`ConfigBuilder`] to make one; the defaults describe a two-arm SCARA with a
/// 200mm square bed.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct MachineConfig {
    pub kinematics: KinematicsKind,
    pub scara: ScaraConfig,
    /// Is firmware retraction (G10/G11, M207-M209) available?
    pub retraction: bool,
    pub extruders: u8,
    /// Which axes have a switch at their minimum, for X, Y and Z.
    pub endstop_min: [bool; 3],
    /// Which axes have a switch at their maximum, for X, Y and Z.
    pub endstop_max: [bool; 3],
    /// Direction each axis moves to find its switch: -1 for min, 1 for max.
    pub home_dir: [i8; 3],
    pub base_min_pos: [f32; 3],
    pub base_max_pos: [f32; 3],
    /// Cartesian position of each axis at its home switch.
    pub base_home_pos: [f32; 3],
    /// mm/min, for X, Y, Z and E.
    pub homing_feedrate: [f32; 4],
    /// How far to back off from a switch before the slow second approach, in mm.
    pub home_retract_mm: [f32; 3],
    /// Home X and Y together before homing each on its own.
    pub quick_home: bool,
    /// Switch endstops off again once homing is done.
    pub endstops_only_for_homing: bool,
    /// Refuse motion until the machine has been homed.
    pub require_homing: bool,
    pub segments_per_second: f32,
    /// Milliseconds without a command before the firmware kills itself. Zero is never.
    pub max_inactive_ms: u64,
    /// Milliseconds without a command before idle steppers are switched off.
    pub stepper_inactive_ms: u64,
    /// How long a hotend has to stay near its target before M109 returns. Zero
    /// waits only until the target is crossed.
    pub temp_residency_ms: u64,
    /// How close to the target counts as reached, in degrees.
    pub temp_window: f32,
    /// How far the temperature may wander during the residency time.
    pub temp_hysteresis: f32,
    /// With no residency time, do not wait for a hotend to cool down.
    pub cooldown_no_wait: bool,
    /// Initial relative mode of X, Y, Z and E.
    pub axis_relative_modes: [bool; 4],
}

impl MachineConfig {
    pub fn z_max_length(&self) -> f32 {
        self.base_max_pos[2] - self.base_min_pos[2]
    }

    /// Does the axis have a switch in the direction it homes?
    pub fn can_home(&self, axis: usize) -> bool {
        if self.home_dir[axis] < 0 {
            self.endstop_min[axis]
        } else {
            self.endstop_max[axis]
        }
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        ConfigBuilder::default().build()
    }
}

#[derive(Clone, Debug)]
pub struct ConfigBuilder {
    config: MachineConfig,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            config: MachineConfig {
                kinematics: KinematicsKind::Scara,
                scara: ScaraConfig::default(),
                retraction: true,
                extruders: 1,
                endstop_min: [false, false, true],
                endstop_max: [true, true, false],
                home_dir: [1, 1, -1],
                base_min_pos: [0.0, 0.0, 0.0],
                base_max_pos: [200.0, 200.0, 225.0],
                base_home_pos: [0.0, 0.0, 0.0],
                homing_feedrate: [40.0 * 60.0, 40.0 * 60.0, 10.0 * 60.0, 0.0],
                home_retract_mm: [5.0, 5.0, 1.0],
                quick_home: true,
                endstops_only_for_homing: true,
                require_homing: true,
                segments_per_second: 200.0,
                max_inactive_ms: 0,
                stepper_inactive_ms: 60_000,
                temp_residency_ms: 10_000,
                temp_window: 1.0,
                temp_hysteresis: 3.0,
                cooldown_no_wait: true,
                axis_relative_modes: [false; 4],
            },
        }
    }
}

impl ConfigBuilder {
    pub fn build(&self) -> MachineConfig {
        self.config.clone()
    }

    pub fn with_kinematics(&mut self, kind: KinematicsKind) -> &mut Self {
        self.config.kinematics = kind;
        self
    }

    pub fn with_scara(&mut self, scara: ScaraConfig) -> &mut Self {
        self.config.scara = scara;
        self
    }

    pub fn with_retraction(&mut self, enabled: bool) -> &mut Self {
        self.config.retraction = enabled;
        self
    }

    pub fn with_extruders(&mut self, count: u8) -> &mut Self {
        self.config.extruders = count.max(1);
        self
    }

    pub fn with_endstops(&mut self, min: [bool; 3], max: [bool; 3]) -> &mut Self {
        self.config.endstop_min = min;
        self.config.endstop_max = max;
        self
    }

    pub fn with_home_dir(&mut self, dir: [i8; 3]) -> &mut Self {
        self.config.home_dir = dir.map(|d| if d < 0 { -1 } else { 1 });
        self
    }

    /// The travel limits, in mm.
    pub fn with_bounds(&mut self, min: [f32; 3], max: [f32; 3]) -> &mut Self {
        self.config.base_min_pos = min;
        self.config.base_max_pos = max;
        self
    }

    pub fn with_home_pos(&mut self, home: [f32; 3]) -> &mut Self {
        self.config.base_home_pos = home;
        self
    }

    pub fn with_homing_feedrate(&mut self, feed: [f32; 4]) -> &mut Self {
        self.config.homing_feedrate = feed;
        self
    }

    pub fn with_home_retract(&mut self, mm: [f32; 3]) -> &mut Self {
        self.config.home_retract_mm = mm;
        self
    }

    pub fn with_quick_home(&mut self, quick: bool) -> &mut Self {
        self.config.quick_home = quick;
        self
    }

    pub fn with_require_homing(&mut self, require: bool) -> &mut Self {
        self.config.require_homing = require;
        self
    }

    pub fn with_segments_per_second(&mut self, rate: f32) -> &mut Self {
        self.config.segments_per_second = rate;
        self
    }

    pub fn with_inactivity(&mut self, max_inactive_ms: u64, stepper_inactive_ms: u64) -> &mut Self {
        self.config.max_inactive_ms = max_inactive_ms;
        self.config.stepper_inactive_ms = stepper_inactive_ms;
        self
    }

    pub fn with_temp_residency(&mut self, ms: u64, window: f32, hysteresis: f32) -> &mut Self {
        self.config.temp_residency_ms = ms;
        self.config.temp_window = window;
        self.config.temp_hysteresis = hysteresis;
        self
    }

    pub fn with_cooldown_no_wait(&mut self, no_wait: bool) -> &mut Self {
        self.config.cooldown_no_wait = no_wait;
        self
    }

    pub fn with_axis_relative_modes(&mut self, modes: [bool; 4]) -> &mut Self {
        self.config.axis_relative_modes = modes;
        self
    }
}
