//! The command-interpretation core of a SCARA printer.
//!
//! [`Firmware`] owns the machine state and every collaborator (see [`hal`]). The
//! embedding calls [`Firmware::tick`] in a loop; each tick reads whatever input is
//! available, then either advances the blocking command in progress or runs the
//! next queued command, and finally does the periodic housekeeping.
//!
//! Nothing in here blocks. Commands that have to wait (dwells, temperature waits,
//! homing, grid moves) become an [`Activity`](wait::Activity) that later ticks poll
//! until it is done, and the `ok` for such a command goes out only then.

use core::fmt;

use scarab_geom::{Actuators, BedGrid, Cartesian, Frame, Kinematics};
use scarab_planner::{
    segment_and_emit, Axis, MachineState, MotionTunables, Position, RetractionState,
};
use scarab_protocol::{CommandQueue, Framer, Response, Source};

// These go through the sink field directly, so the arguments may borrow other
// fields of the firmware.
macro_rules! echo {
    ($fw:expr, $($arg:tt)*) => {
        $fw.hal.sink.send(&scarab_protocol::Response::Echo(format_args!($($arg)*)))
    };
}

macro_rules! raw {
    ($fw:expr, $($arg:tt)*) => {
        $fw.hal.sink.send(&scarab_protocol::Response::Raw(format_args!($($arg)*)))
    };
}

macro_rules! error_line {
    ($fw:expr, $($arg:tt)*) => {
        $fw.hal.sink.send(&scarab_protocol::Response::Error(format_args!($($arg)*)))
    };
}

pub mod calibration;
pub mod config;
mod dispatch;
pub mod error;
pub mod hal;
mod homing;
mod reader;
pub mod settings;
mod wait;

pub use config::{ConfigBuilder, KinematicsKind, MachineConfig};
pub use error::{Fatal, MediaError, SettingsError, StopReason};
pub use hal::Hal;
pub use settings::Settings;

use calibration::GridSession;
use wait::Activity;

pub(crate) const MSG_STOPPED: &str =
    "Printer stopped due to errors. Fix the error and use M999 to restart.";

pub struct Firmware {
    config: MachineConfig,
    kinematics: Box<dyn Kinematics>,
    hal: Hal,
    state: MachineState,
    tunables: MotionTunables,
    retraction: RetractionState,
    grid: BedGrid,
    grid_session: GridSession,
    framer: Framer,
    queue: CommandQueue,
    activity: Option<Activity>,
    /// Where the `ok` for the running activity goes once it finishes.
    pending_ack: Option<Source>,
    stopped: Option<StopReason>,
    fatal: Option<Fatal>,
    homed: bool,
    writing_to_media: bool,
    last_command_ms: u64,
    max_inactive_ms: u64,
    stepper_inactive_ms: u64,
    steppers_idle: bool,
    print_start_ms: u64,
    fan_speed: u8,
}

// The bed correction is skipped while a calibration session is capturing heights.
fn frame<'a>(home_offset: &Position, grid: &'a BedGrid, calibrating: bool) -> Frame<'a> {
    Frame {
        home_offset: [home_offset[0], home_offset[1]],
        bed: (!calibrating).then_some(grid),
    }
}

impl Firmware {
    /// Sets up the machine and loads the stored settings, falling back to the
    /// defaults if there are none.
    pub fn new(config: MachineConfig, hal: Hal) -> Self {
        let kinematics: Box<dyn Kinematics> = match config.kinematics {
            KinematicsKind::Scara => Box::new(config.scara),
            KinematicsKind::Cartesian => Box::new(Cartesian {
                home_x: config.base_home_pos[0],
                home_y: config.base_home_pos[1],
            }),
        };
        let mut state = MachineState::new(config.base_min_pos, config.base_max_pos);
        state.axis_relative_mode = config.axis_relative_modes;
        let grid = BedGrid::new(config.base_max_pos[0], config.base_max_pos[1]);
        let now = hal.clock.now_ms();

        let mut fw = Firmware {
            max_inactive_ms: config.max_inactive_ms,
            stepper_inactive_ms: config.stepper_inactive_ms,
            config,
            kinematics,
            hal,
            state,
            tunables: MotionTunables::default(),
            retraction: RetractionState::default(),
            grid,
            grid_session: GridSession::default(),
            framer: Framer::new(),
            queue: CommandQueue::new(),
            activity: None,
            pending_ack: None,
            stopped: None,
            fatal: None,
            homed: false,
            writing_to_media: false,
            last_command_ms: now,
            steppers_idle: false,
            print_start_ms: now,
            fan_speed: 0,
        };
        raw!(fw, "start");
        fw.load_settings();
        fw
    }

    /// Runs one iteration of the main loop.
    ///
    /// Once this has returned an error, every later call returns the same one.
    pub fn tick(&mut self) -> Result<(), Fatal> {
        if let Some(fatal) = self.fatal {
            return Err(fatal);
        }
        self.read_input();
        match self.activity.take() {
            Some(activity) => self.poll_activity(activity),
            None => {
                if let Some(line) = self.queue.pop() {
                    self.process(line);
                }
            }
        }
        self.housekeeping()
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn state(&self) -> &MachineState {
        &self.state
    }

    pub fn tunables(&self) -> &MotionTunables {
        &self.tunables
    }

    pub fn retraction(&self) -> &RetractionState {
        &self.retraction
    }

    pub fn grid(&self) -> &BedGrid {
        &self.grid
    }

    pub fn grid_session(&self) -> &GridSession {
        &self.grid_session
    }

    pub fn is_homed(&self) -> bool {
        self.homed
    }

    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stopped.as_ref()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_some()
    }

    /// The last serial line number accepted.
    pub fn line_number(&self) -> i64 {
        self.framer.sequence.last()
    }

    pub fn fan_speed(&self) -> u8 {
        self.fan_speed
    }

    /// Is there nothing left to do? That means no queued commands, no running
    /// activity, no media print and no pending motion.
    pub fn is_idle(&self) -> bool {
        self.activity.is_none()
            && self.queue.is_empty()
            && !self.hal.media.is_printing()
            && !self.hal.queue.has_pending()
    }

    /// Puts the machine into the stopped state: heaters off and motion refused
    /// until `M999`.
    pub fn stop(&mut self, reason: StopReason) {
        self.hal.heaters.disable_all();
        if self.stopped.is_some() {
            return;
        }
        log::error!("stopping: {reason}");
        self.stopped = Some(reason);
        self.framer.sequence.save();
        error_line!(self, "{MSG_STOPPED}");
        self.hal.display.set_status("Stopped.");
    }

    /// Shuts everything down for good.
    pub fn kill(&mut self, fatal: Fatal) -> Fatal {
        log::error!("halting: {fatal}");
        self.hal.heaters.disable_all();
        for axis in Axis::ALL {
            self.hal.steppers.disable(axis);
        }
        error_line!(self, "Printer halted. kill() called!");
        self.hal.display.set_status("KILLED. ");
        self.activity = None;
        self.pending_ack = None;
        self.fatal = Some(fatal);
        fatal
    }

    fn now(&self) -> u64 {
        self.hal.clock.now_ms()
    }

    fn housekeeping(&mut self) -> Result<(), Fatal> {
        if let Some(reason) = self.hal.heaters.service() {
            self.stop(reason);
        }

        let now = self.now();
        let idle = now.saturating_sub(self.last_command_ms);
        if self.max_inactive_ms > 0 && idle > self.max_inactive_ms {
            return Err(self.kill(Fatal::InactivityTimeout));
        }
        if self.stepper_inactive_ms > 0
            && idle > self.stepper_inactive_ms
            && !self.steppers_idle
            && !self.hal.queue.has_pending()
        {
            log::info!("no command for {idle}ms, disabling steppers");
            for axis in Axis::ALL {
                self.hal.steppers.disable(axis);
            }
            self.steppers_idle = true;
        }
        if self.hal.steppers.kill_requested() {
            return Err(self.kill(Fatal::KillSwitch));
        }

        if let Some(hit) = self.hal.steppers.take_endstop_hit() {
            self.report_endstop_hit(&hit);
        }
        self.hal.display.update();
        Ok(())
    }

    fn report_endstop_hit(&mut self, hit: &hal::EndstopHit) {
        use fmt::Write as _;

        let mut line = heapless::String::<64>::new();
        for (axis, pos) in Axis::ALL.iter().zip(hit.positions) {
            if let Some(pos) = pos {
                let _ = write!(line, " {}:{pos:.2}", axis.letter());
            }
        }
        log::warn!("endstops hit:{line}");
        echo!(self, "endstops hit:{line}");
        self.hal.display.set_status("Endstop hit");
    }

    fn ack(&mut self, source: Source) {
        self.last_command_ms = self.now();
        if source == Source::Serial {
            self.hal.sink.send(&Response::Ok);
        }
    }

    /// The actuator coordinates for a Cartesian position.
    fn actuators_at(&self, pos: &Position) -> Actuators {
        let frame = frame(&self.state.home_offset, &self.grid, self.grid_session.is_active());
        self.kinematics.inverse([pos[0], pos[1], pos[2]], &frame)
    }

    /// Tells the segment queue that the actuators are at `current_position`.
    fn sync_queue_position(&mut self) {
        let at = self.actuators_at(&self.state.current_position);
        self.hal
            .queue
            .set_current_position(at.coords, self.state.current_position[3]);
    }

    /// Segments the move from `current_position` to `destination`.
    fn emit_move(&mut self) {
        let frame = frame(&self.state.home_offset, &self.grid, self.grid_session.is_active());
        let summary = segment_and_emit(
            &mut self.state,
            self.kinematics.as_ref(),
            &frame,
            self.config.segments_per_second,
            self.hal.queue.as_mut(),
        );
        if summary.corrected > 0 {
            log::warn!(
                "{} of {} segments needed correcting",
                summary.corrected,
                summary.segments
            );
            for anomaly in summary.first_anomalies.iter() {
                echo!(self, "SCARA: {anomaly}");
            }
        }
        if summary.segments > 0 {
            self.steppers_idle = false;
        }
    }

    fn current_settings(&self) -> Settings {
        let [x, y, z, _] = self.state.home_offset;
        Settings {
            tunables: self.tunables.clone(),
            home_offset: [x, y, z],
            retraction: self.retraction.clone(),
        }
    }

    fn apply_settings(&mut self, settings: Settings) {
        self.tunables = settings.tunables;
        self.state.home_offset[..3].copy_from_slice(&settings.home_offset);
        let retracted = self.retraction.is_retracted;
        self.retraction = settings.retraction;
        self.retraction.is_retracted = retracted;
        self.hal.queue.apply_tunables(&self.tunables);
    }

    fn load_settings(&mut self) {
        match self.hal.settings.load() {
            Ok(settings) => {
                self.apply_settings(settings);
                echo!(self, "Stored settings retrieved");
            }
            Err(e) => {
                log::warn!("using default settings: {e}");
                let defaults = self.hal.settings.defaults();
                self.apply_settings(defaults);
                echo!(self, "Hardcoded Default Settings Loaded");
            }
        }
    }
}
