//! Running one command.

use scarab_geom::JointAngles;
use scarab_planner::{Axis, MoveRequest};
use scarab_protocol::{Command, CommandLine, Response, Source, Verb};

use crate::calibration::GridPlan;
use crate::hal::{End, HeaterId};
use crate::homing::Homing;
use crate::wait::{Activity, AfterSync, HeatWait};
use crate::{Firmware, KinematicsKind, MSG_STOPPED};

/// What became of a command.
pub(crate) enum Outcome {
    /// Finished; acknowledge it.
    Done,
    /// Finished, and the report it sent doubles as the acknowledgement.
    Acked,
    /// Acknowledge it once this is over.
    Wait(Activity),
}

/// The arm poses of `M360` to `M364`, as theta and psi.
const CALIBRATION_POSES: [(&str, f32, f32); 5] = [
    ("Theta 0", 0.0, 120.0),
    ("Theta 90", 90.0, 130.0),
    ("Psi 0", 60.0, 180.0),
    ("Psi 90", 50.0, 90.0),
    ("Theta-Psi 90", 45.0, 135.0),
];

fn axis_values(cmd: &Command<'_>) -> [Option<f32>; 4] {
    Axis::ALL.map(|axis| cmd.get(axis.letter()))
}

/// The `S` percentage of `M220`/`M221`. Values that are not positive are ignored.
fn percentage(cmd: &Command<'_>) -> Option<f32> {
    let s = cmd.get('S')?;
    if s > 0.0 && s.is_finite() {
        Some(s)
    } else {
        log::warn!("ignoring multiplier S{s}");
        None
    }
}

fn move_request(cmd: &Command<'_>) -> MoveRequest {
    MoveRequest {
        axes: axis_values(cmd),
        feed_rate: cmd.get('F'),
    }
}

impl Firmware {
    pub(crate) fn process(&mut self, line: CommandLine) {
        self.last_command_ms = self.now();
        self.steppers_idle = false;
        if self.writing_to_media {
            self.write_to_media(&line);
            return;
        }

        log::debug!("{:?}: {}", line.source, line.as_str());
        let cmd = Command::parse(line.as_str());
        match self.dispatch(&cmd, line.source) {
            Outcome::Done => self.ack(line.source),
            Outcome::Acked => {}
            Outcome::Wait(activity) => {
                self.activity = Some(activity);
                self.pending_ack = Some(line.source);
            }
        }
    }

    fn write_to_media(&mut self, line: &CommandLine) {
        let text = line.as_str();
        if text.to_ascii_uppercase().contains("M29") {
            self.hal.media.finish_write();
            self.writing_to_media = false;
            raw!(self, "Done saving file.");
        } else {
            self.hal.media.write_line(text);
        }
        self.ack(line.source);
    }

    fn dispatch(&mut self, cmd: &Command<'_>, source: Source) -> Outcome {
        match cmd.verb {
            Some(Verb::G(code)) => self.dispatch_g(code, cmd),
            Some(Verb::M(code)) => self.dispatch_m(code, cmd, source),
            Some(Verb::T(tool)) => {
                self.select_tool(tool);
                Outcome::Done
            }
            None => self.unknown(cmd),
        }
    }

    fn unknown(&mut self, cmd: &Command<'_>) -> Outcome {
        log::warn!("unknown command {:?}", cmd.text);
        echo!(self, "Unknown command: \"{}\"", cmd.text);
        Outcome::Done
    }

    /// May a command move the head? Says why not if it may not.
    fn motion_allowed(&mut self) -> bool {
        if self.stopped.is_some() {
            error_line!(self, "{MSG_STOPPED}");
            return false;
        }
        if self.config.require_homing && !self.homed {
            echo!(self, "No movement - Home first...");
            return false;
        }
        true
    }

    fn dispatch_g(&mut self, code: u16, cmd: &Command<'_>) -> Outcome {
        match code {
            0 | 1 => {
                if self.motion_allowed() {
                    let was_retracted = self.retraction.is_retracted;
                    let retraction = self.config.retraction.then_some(&mut self.retraction);
                    self.state
                        .resolve_destination(&move_request(cmd), true, retraction);
                    if self.retraction.is_retracted != was_retracted {
                        self.sync_queue_position();
                    }
                    self.emit_move();
                }
            }
            4 => {
                let mut ms = cmd.get_int('P').unwrap_or(0).max(0) as u64;
                if let Some(s) = cmd.get('S') {
                    ms = (s.max(0.0) * 1000.0) as u64;
                }
                self.hal.display.set_status("Sleep...");
                return Outcome::Wait(Activity::Dwell { ms, until: None });
            }
            10 if self.config.retraction => {
                if self.retraction.retract(&mut self.state) {
                    self.sync_queue_position();
                    self.emit_move();
                }
            }
            11 if self.config.retraction => {
                if self.retraction.recover(&mut self.state) {
                    self.sync_queue_position();
                    self.emit_move();
                }
            }
            28 => return Outcome::Wait(Activity::Homing(Homing::from_command(cmd))),
            90 => self.state.relative_mode = false,
            91 => self.state.relative_mode = true,
            92 => {
                let axes = axis_values(cmd);
                if axes[Axis::E.index()].is_none() {
                    return Outcome::Wait(Activity::Sync(AfterSync::SetPosition(axes)));
                }
                self.set_position(axes);
            }
            _ => return self.unknown(cmd),
        }
        Outcome::Done
    }

    /// Overwrites the current position without moving. Z is shifted by the home offset.
    pub(crate) fn set_position(&mut self, mut axes: [Option<f32>; 4]) {
        let z = Axis::Z.index();
        if let Some(v) = axes[z].as_mut() {
            *v += self.state.home_offset[z];
        }
        self.state.set_position(axes);
        if let Some(e) = axes[Axis::E.index()] {
            self.hal.queue.set_e_position(e);
        }
        if axes[..3].iter().any(Option::is_some) {
            self.sync_queue_position();
        }
    }

    fn select_tool(&mut self, tool: u8) {
        if tool >= self.config.extruders {
            echo!(self, "T{tool} Invalid extruder");
            return;
        }
        self.state.active_tool = tool;
        echo!(self, "Active Extruder: {tool}");
    }

    /// The hotend named by `T`, or the active one.
    fn target_tool(&mut self, code: u16, cmd: &Command<'_>) -> Option<u8> {
        let Some(t) = cmd.get_int('T') else {
            return Some(self.state.active_tool);
        };
        match u8::try_from(t) {
            Ok(tool) if tool < self.config.extruders => Some(tool),
            _ => {
                echo!(self, "M{code} Invalid extruder {t}");
                None
            }
        }
    }

    fn dispatch_m(&mut self, code: u16, cmd: &Command<'_>, source: Source) -> Outcome {
        match code {
            0 | 1 => {
                let p = cmd.get_int('P');
                let s = cmd.get_int('S');
                let mut timeout_ms = p.unwrap_or(0).max(0) as u64;
                if let Some(s) = s {
                    timeout_ms = s.max(0) as u64 * 1000;
                }
                let message = cmd.string_arg();
                if p.is_none() && s.is_none() && !message.is_empty() {
                    self.hal.display.set_status(message);
                } else {
                    self.hal.display.set_status("Wait for user...");
                }
                return Outcome::Wait(Activity::UserWait {
                    timeout_ms,
                    deadline: None,
                });
            }
            17 => {
                self.hal.display.set_status("No move.");
                for axis in Axis::ALL {
                    self.hal.steppers.enable(axis);
                }
            }
            18 | 84 => {
                if let Some(s) = cmd.get('S') {
                    self.stepper_inactive_ms = (s.max(0.0) * 1000.0) as u64;
                } else {
                    let named = Axis::ALL.map(|axis| cmd.has(axis.letter()));
                    let axes = if named.iter().any(|n| *n) { named } else { [true; 4] };
                    return Outcome::Wait(Activity::Sync(AfterSync::DisableSteppers(axes)));
                }
            }
            23 => {
                let name = cmd.string_arg();
                match self.hal.media.select(name) {
                    Ok(size) => {
                        raw!(self, "File opened: {name} Size: {size}");
                        raw!(self, "File selected");
                    }
                    Err(e) => {
                        log::warn!("cannot open {name:?}: {e}");
                        raw!(self, "open failed, File: {name}.");
                    }
                }
            }
            24 => {
                self.print_start_ms = self.now();
                self.hal.media.start();
            }
            25 => self.hal.media.pause(),
            27 => match self.hal.media.status() {
                Some((done, size)) => raw!(self, "SD printing byte {done}/{size}"),
                None => raw!(self, "Not SD printing"),
            },
            28 => {
                let name = cmd.string_arg();
                match self.hal.media.begin_write(name) {
                    Ok(()) => {
                        self.writing_to_media = true;
                        raw!(self, "Writing to file: {name}");
                    }
                    Err(e) => {
                        log::warn!("cannot write {name:?}: {e}");
                        raw!(self, "open failed, File: {name}.");
                    }
                }
            }
            // Only means something while writing.
            29 => {}
            31 => {
                let elapsed = self.now().saturating_sub(self.print_start_ms) / 1000;
                let (min, sec) = (elapsed / 60, elapsed % 60);
                echo!(self, "{min} min, {sec} sec");
                let mut status = heapless::String::<32>::new();
                let _ = core::fmt::write(&mut status, format_args!("{min} min, {sec} sec"));
                self.hal.display.set_status(&status);
            }
            82 => self.state.axis_relative_mode[Axis::E.index()] = false,
            83 => self.state.axis_relative_mode[Axis::E.index()] = true,
            85 => {
                if let Some(s) = cmd.get('S') {
                    self.max_inactive_ms = (s.max(0.0) * 1000.0) as u64;
                }
            }
            92 => {
                for axis in Axis::ALL {
                    let Some(value) = cmd.get(axis.letter()) else {
                        continue;
                    };
                    if axis == Axis::E {
                        self.tunables.set_e_steps_per_unit(value);
                    } else {
                        self.tunables.axis_steps_per_unit[axis.index()] = value;
                    }
                }
                self.hal.queue.apply_tunables(&self.tunables);
            }
            104 => {
                if let Some(tool) = self.target_tool(code, cmd) {
                    if let Some(s) = cmd.get('S') {
                        self.hal.heaters.set_target(HeaterId::Hotend(tool), s);
                    }
                }
            }
            105 => {
                let Some(tool) = self.target_tool(code, cmd) else {
                    return Outcome::Done;
                };
                self.report_temperatures(tool, source);
                self.last_command_ms = self.now();
                return Outcome::Acked;
            }
            106 => {
                self.fan_speed = cmd.get_int('S').map_or(255, |s| s.clamp(0, 255) as u8);
                self.hal.heaters.set_fan(self.fan_speed);
            }
            107 => {
                self.fan_speed = 0;
                self.hal.heaters.set_fan(0);
            }
            109 => {
                let Some(tool) = self.target_tool(code, cmd) else {
                    return Outcome::Done;
                };
                let heater = HeaterId::Hotend(tool);
                if let Some(s) = cmd.get('S') {
                    self.hal.heaters.set_target(heater, s);
                }
                let heating = self.hal.heaters.target(heater) > self.hal.heaters.current(heater);
                self.hal.display.set_status("Heating...");
                return Outcome::Wait(Activity::Hotend(HeatWait::new(tool, heating, self.now())));
            }
            110 => {
                if let Some(n) = cmd.get_int('N') {
                    self.framer.sequence.reset(n);
                }
            }
            114 => self.report_position(),
            115 => {
                let machine = match self.config.kinematics {
                    KinematicsKind::Scara => "SCARA",
                    KinematicsKind::Cartesian => "Cartesian",
                };
                raw!(
                    self,
                    "FIRMWARE_NAME:scarab {} PROTOCOL_VERSION:1.0 MACHINE_TYPE:{machine} EXTRUDER_COUNT:{}",
                    env!("CARGO_PKG_VERSION"),
                    self.config.extruders
                );
            }
            117 => {
                let message = cmd.string_arg();
                self.hal.display.set_status(message);
                echo!(self, "{message}");
            }
            119 => self.report_endstops(),
            120 => self.hal.steppers.set_endstops_enabled(false),
            121 => self.hal.steppers.set_endstops_enabled(true),
            140 => {
                if let Some(s) = cmd.get('S') {
                    self.hal.heaters.set_target(HeaterId::Bed, s);
                }
            }
            190 => {
                if let Some(s) = cmd.get('S') {
                    self.hal.heaters.set_target(HeaterId::Bed, s);
                }
                self.hal.display.set_status("Bed Heating.");
                return Outcome::Wait(Activity::Bed {
                    last_report: self.now(),
                });
            }
            200 => {
                if let Some(d) = cmd.get('D') {
                    self.tunables.filament_diameter = d;
                    self.hal.queue.apply_tunables(&self.tunables);
                }
            }
            201 => {
                for axis in Axis::ALL {
                    if let Some(v) = cmd.get(axis.letter()) {
                        let i = axis.index();
                        self.tunables.max_acceleration[i] = v;
                        self.tunables.axis_steps_per_sqr_second[i] =
                            v * self.tunables.axis_steps_per_unit[i];
                    }
                }
                self.hal.queue.apply_tunables(&self.tunables);
            }
            203 => {
                for axis in Axis::ALL {
                    if let Some(v) = cmd.get(axis.letter()) {
                        self.tunables.max_feedrate[axis.index()] = v;
                    }
                }
                self.hal.queue.apply_tunables(&self.tunables);
            }
            204 => {
                let t = &mut self.tunables;
                for (letter, field) in [('S', &mut t.acceleration), ('T', &mut t.retract_acceleration)] {
                    if let Some(v) = cmd.get(letter) {
                        *field = v;
                    }
                }
                self.hal.queue.apply_tunables(&self.tunables);
            }
            205 => {
                let t = &mut self.tunables;
                let fields = [
                    ('S', &mut t.min_feedrate),
                    ('T', &mut t.min_travel_feedrate),
                    ('B', &mut t.min_segment_time),
                    ('X', &mut t.max_xy_jerk),
                    ('Z', &mut t.max_z_jerk),
                    ('E', &mut t.max_e_jerk),
                ];
                for (letter, field) in fields {
                    if let Some(v) = cmd.get(letter) {
                        *field = v;
                    }
                }
                self.hal.queue.apply_tunables(&self.tunables);
            }
            206 => {
                let offset = &mut self.state.home_offset;
                for (i, letter) in ['X', 'Y', 'Z'].into_iter().enumerate() {
                    if let Some(v) = cmd.get(letter) {
                        offset[i] = v;
                    }
                }
                // Theta and psi, for arms.
                if let Some(v) = cmd.get('T') {
                    offset[0] = v;
                }
                if let Some(v) = cmd.get('P') {
                    offset[1] = v;
                }
            }
            207 if self.config.retraction => {
                let r = &mut self.retraction;
                for (letter, field) in [('S', &mut r.length), ('F', &mut r.feed_rate), ('Z', &mut r.zlift)] {
                    if let Some(v) = cmd.get(letter) {
                        *field = v;
                    }
                }
            }
            208 if self.config.retraction => {
                let r = &mut self.retraction;
                for (letter, field) in [('S', &mut r.recover_length), ('F', &mut r.recover_feed_rate)] {
                    if let Some(v) = cmd.get(letter) {
                        *field = v;
                    }
                }
            }
            209 if self.config.retraction => {
                if let Some(s) = cmd.get_int('S') {
                    match s {
                        0 | 1 => {
                            self.retraction.auto_retract_enabled = s == 1;
                            self.retraction.is_retracted = false;
                        }
                        _ => return self.unknown(cmd),
                    }
                }
            }
            220 => {
                if let Some(s) = percentage(cmd) {
                    self.state.feed_multiplier = s;
                }
            }
            221 => {
                if let Some(s) = percentage(cmd) {
                    self.state.extrude_multiplier = s;
                    self.hal.queue.set_extrude_multiplier(s);
                }
            }
            360..=364 if self.config.kinematics == KinematicsKind::Scara => {
                let (name, theta, psi) = CALIBRATION_POSES[(code - 360) as usize];
                echo!(self, " Cal: {name} ");
                self.state.soft_endstops_enabled = false;
                echo!(self, " Soft endstops disabled ");
                if self.may_calibrate() {
                    self.move_to_joints(JointAngles::new(theta, psi));
                }
            }
            365 => {
                for (i, letter) in ['X', 'Y', 'Z'].into_iter().enumerate() {
                    if let Some(v) = cmd.get(letter) {
                        self.state.axis_scaling[i] = v;
                    }
                }
            }
            366 if self.config.kinematics == KinematicsKind::Scara => {
                if self.may_calibrate() {
                    self.state.resolve_destination(&move_request(cmd), false, None);
                    let [theta, psi, ..] = self.state.destination;
                    self.move_to_joints(JointAngles::new(theta, psi));
                }
            }
            370 => {
                let plan = GridPlan {
                    points: (cmd.get('X'), cmd.get('Y')),
                    clear: cmd.has('C'),
                };
                return Outcome::Wait(Activity::Homing(Homing::all(Some(plan))));
            }
            371 => {
                if let Some(activity) = self.next_grid_point() {
                    return Outcome::Wait(activity);
                }
            }
            372 => {
                if let Some(activity) = self.capture_grid_point() {
                    return Outcome::Wait(activity);
                }
            }
            373 => self.end_grid(),
            375 => self.report_grid(),
            400 => return Outcome::Wait(Activity::Sync(AfterSync::Nothing)),
            500 => {
                self.state.soft_endstops_enabled = true;
                echo!(self, " Soft endstops enabled ");
                let settings = self.current_settings();
                match self.hal.settings.save(&settings) {
                    Ok(()) => echo!(self, "Settings Stored"),
                    Err(e) => {
                        log::error!("saving settings: {e}");
                        echo!(self, "Settings not stored: {e}");
                    }
                }
            }
            501 => self.load_settings(),
            502 => {
                let defaults = self.hal.settings.defaults();
                self.apply_settings(defaults);
                echo!(self, "Hardcoded Default Settings Loaded");
            }
            503 => self.current_settings().report(self.hal.sink.as_mut()),
            999 => {
                log::info!("restarting after {:?}", self.stopped);
                self.stopped = None;
                let resend = self.framer.sequence.restore();
                self.hal.sink.send(&Response::Resend(resend));
            }
            _ => return self.unknown(cmd),
        }
        Outcome::Done
    }

    /// The calibration poses move only on a running, homed machine, and say nothing
    /// otherwise.
    fn may_calibrate(&self) -> bool {
        self.stopped.is_none() && (self.homed || !self.config.require_homing)
    }

    fn move_to_joints(&mut self, joints: JointAngles) {
        let p = self.kinematics.forward(joints);
        self.state.destination = self.state.current_position;
        self.state.destination[Axis::X.index()] = p.x;
        self.state.destination[Axis::Y.index()] = p.y;
        self.emit_move();
    }

    fn report_temperatures(&mut self, tool: u8, source: Source) {
        let heaters = &self.hal.heaters;
        let hotend = HeaterId::Hotend(tool);
        let (t, tt) = (heaters.current(hotend), heaters.target(hotend));
        let (b, bt) = (heaters.current(HeaterId::Bed), heaters.target(HeaterId::Bed));
        let (p, bp) = (heaters.power(hotend), heaters.power(HeaterId::Bed));
        let ok = if source == Source::Serial { "ok " } else { "" };
        raw!(self, "{ok}T:{t:.1} /{tt:.1} B:{b:.1} /{bt:.1} @:{p} B@:{bp}");
    }

    fn report_position(&mut self) {
        if !self.homed {
            raw!(self, "*** Home Pending ***");
        }
        let [x, y, z, e] = self.state.current_position;
        raw!(self, "X:{x:.2} Y:{y:.2} Z:{z:.2} E:{e:.2}");
        if self.config.kinematics != KinematicsKind::Scara {
            return;
        }

        let at = self.actuators_at(&self.state.current_position);
        let [theta, psi, _] = at.coords;
        let [offset_theta, offset_psi, ..] = self.state.home_offset;
        let steps = self.tunables.axis_steps_per_unit;
        raw!(
            self,
            "SCARA Theta:{:.2}   Psi+Theta:{:.2}",
            theta + offset_theta,
            psi + offset_psi
        );
        raw!(
            self,
            "SCARA Cal - Theta:{theta:.2}   Psi+Theta (90):{:.2}",
            psi - theta - 90.0
        );
        raw!(
            self,
            "SCARA step Cal - Theta:{:.2}   Psi+Theta:{:.2}",
            theta / 90.0 * steps[0],
            (psi - theta) / 90.0 * steps[1]
        );
    }

    fn report_endstops(&mut self) {
        raw!(self, "Reporting endstop status");
        for axis in [Axis::X, Axis::Y, Axis::Z] {
            for (end, suffix) in [(End::Min, "min"), (End::Max, "max")] {
                let Some(triggered) = self.hal.steppers.endstop(axis, end) else {
                    continue;
                };
                let name = axis.letter().to_ascii_lowercase();
                let state = if triggered { "TRIGGERED" } else { "open" };
                raw!(self, "{name}_{suffix}: {state}");
            }
        }
    }
}
