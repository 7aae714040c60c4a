#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use scarab_firmware::hal::{
    Clock, Display, End, EndstopHit, HeaterId, Heaters, Media, SerialPort, SettingsStore, Steppers,
};
use scarab_firmware::{
    ConfigBuilder, Fatal, Firmware, Hal, MachineConfig, MediaError, Settings, SettingsError,
    StopReason,
};
use scarab_planner::{Axis, MotionTunables, Segment, SegmentQueue};
use scarab_protocol::response::{Response, ResponseSink};

/// How many `has_pending` calls report motion after each enqueue.
const DRAIN_POLLS: u32 = 3;

/// How far a heater moves toward its target on each service call.
const HEAT_STEP: f32 = 2.0;

#[derive(Default)]
pub struct World {
    pub now: u64,
    pub input: VecDeque<u8>,
    pub output: Vec<String>,

    pub segments: Vec<Segment>,
    pub pending: u32,
    pub queue_position: Option<([f32; 3], f32)>,
    pub queue_e: Option<f32>,
    pub tunables: Option<MotionTunables>,

    pub hotend: [f32; 2],
    pub bed: [f32; 2],
    pub fault: Option<StopReason>,
    pub heaters_disabled: u32,
    pub fan: u8,

    pub enabled: [bool; 4],
    pub endstops_enabled: bool,
    pub endstop_hit: Option<EndstopHit>,
    pub kill: bool,

    pub stored: Option<Settings>,

    pub status: Vec<String>,
    pub clicked: bool,

    pub file: VecDeque<u8>,
    pub file_size: u32,
    pub selected: bool,
    pub printing: bool,
    pub finished: u32,
    pub written: Vec<String>,
}

type Shared = Rc<RefCell<World>>;

struct Mock(Shared);

impl SegmentQueue for Mock {
    fn enqueue(&mut self, segment: Segment) {
        let mut w = self.0.borrow_mut();
        w.segments.push(segment);
        w.pending = DRAIN_POLLS;
    }

    fn has_pending(&self) -> bool {
        let mut w = self.0.borrow_mut();
        if w.pending > 0 {
            w.pending -= 1;
            true
        } else {
            false
        }
    }

    fn set_current_position(&mut self, actuators: [f32; 3], e: f32) {
        self.0.borrow_mut().queue_position = Some((actuators, e));
    }

    fn set_e_position(&mut self, e: f32) {
        self.0.borrow_mut().queue_e = Some(e);
    }

    fn apply_tunables(&mut self, tunables: &MotionTunables) {
        self.0.borrow_mut().tunables = Some(tunables.clone());
    }

    fn set_extrude_multiplier(&mut self, _percent: f32) {}
}

fn approach(pair: &mut [f32; 2]) {
    let [current, target] = *pair;
    pair[0] = if current < target {
        (current + HEAT_STEP).min(target)
    } else {
        (current - HEAT_STEP).max(target)
    };
}

impl Mock {
    fn heater(&self, heater: HeaterId) -> [f32; 2] {
        let w = self.0.borrow();
        match heater {
            HeaterId::Hotend(_) => w.hotend,
            HeaterId::Bed => w.bed,
        }
    }
}

impl Heaters for Mock {
    fn set_target(&mut self, heater: HeaterId, celsius: f32) {
        let mut w = self.0.borrow_mut();
        match heater {
            HeaterId::Hotend(_) => w.hotend[1] = celsius,
            HeaterId::Bed => w.bed[1] = celsius,
        }
    }

    fn target(&self, heater: HeaterId) -> f32 {
        self.heater(heater)[1]
    }

    fn current(&self, heater: HeaterId) -> f32 {
        self.heater(heater)[0]
    }

    fn is_heating(&self, heater: HeaterId) -> bool {
        let [current, target] = self.heater(heater);
        target > current
    }

    fn is_cooling(&self, heater: HeaterId) -> bool {
        let [current, target] = self.heater(heater);
        target < current
    }

    fn power(&self, heater: HeaterId) -> u8 {
        if self.is_heating(heater) {
            127
        } else {
            0
        }
    }

    fn service(&mut self) -> Option<StopReason> {
        let mut w = self.0.borrow_mut();
        approach(&mut w.hotend);
        approach(&mut w.bed);
        w.fault.take()
    }

    fn disable_all(&mut self) {
        let mut w = self.0.borrow_mut();
        w.hotend[1] = 0.0;
        w.bed[1] = 0.0;
        w.heaters_disabled += 1;
    }

    fn set_fan(&mut self, speed: u8) {
        self.0.borrow_mut().fan = speed;
    }
}

impl Steppers for Mock {
    fn enable(&mut self, axis: Axis) {
        self.0.borrow_mut().enabled[axis.index()] = true;
    }

    fn disable(&mut self, axis: Axis) {
        self.0.borrow_mut().enabled[axis.index()] = false;
    }

    fn endstop(&self, axis: Axis, end: End) -> Option<bool> {
        match (axis, end) {
            (Axis::X | Axis::Y, End::Max) | (Axis::Z, End::Min) => Some(false),
            _ => None,
        }
    }

    fn set_endstops_enabled(&mut self, enabled: bool) {
        self.0.borrow_mut().endstops_enabled = enabled;
    }

    fn take_endstop_hit(&mut self) -> Option<EndstopHit> {
        self.0.borrow_mut().endstop_hit.take()
    }

    fn kill_requested(&self) -> bool {
        self.0.borrow().kill
    }
}

impl SettingsStore for Mock {
    fn load(&mut self) -> Result<Settings, SettingsError> {
        self.0.borrow().stored.clone().ok_or(SettingsError::Missing)
    }

    fn save(&mut self, settings: &Settings) -> Result<(), SettingsError> {
        self.0.borrow_mut().stored = Some(settings.clone());
        Ok(())
    }
}

impl Display for Mock {
    fn set_status(&mut self, status: &str) {
        self.0.borrow_mut().status.push(status.to_owned());
    }

    fn clicked(&mut self) -> bool {
        std::mem::take(&mut self.0.borrow_mut().clicked)
    }

    fn update(&mut self) {}
}

impl Media for Mock {
    fn read_byte(&mut self) -> Option<u8> {
        self.0.borrow_mut().file.pop_front()
    }

    fn end_of_media(&self) -> bool {
        self.0.borrow().file.is_empty()
    }

    fn is_printing(&self) -> bool {
        self.0.borrow().printing
    }

    fn select(&mut self, name: &str) -> Result<u32, MediaError> {
        let mut w = self.0.borrow_mut();
        if name.is_empty() || w.file.is_empty() {
            return Err(MediaError::OpenFailed);
        }
        w.selected = true;
        Ok(w.file_size)
    }

    fn start(&mut self) {
        let mut w = self.0.borrow_mut();
        w.printing = w.selected;
    }

    fn pause(&mut self) {
        self.0.borrow_mut().printing = false;
    }

    fn status(&self) -> Option<(u32, u32)> {
        let w = self.0.borrow();
        w.selected.then(|| (w.file_size - w.file.len() as u32, w.file_size))
    }

    fn begin_write(&mut self, name: &str) -> Result<(), MediaError> {
        if name.is_empty() {
            Err(MediaError::OpenFailed)
        } else {
            Ok(())
        }
    }

    fn write_line(&mut self, line: &str) {
        self.0.borrow_mut().written.push(line.to_owned());
    }

    fn finish_write(&mut self) {}

    fn finished(&mut self) {
        let mut w = self.0.borrow_mut();
        w.printing = false;
        w.selected = false;
        w.finished += 1;
    }
}

impl SerialPort for Mock {
    fn read_byte(&mut self) -> Option<u8> {
        self.0.borrow_mut().input.pop_front()
    }

    fn flush(&mut self) {
        self.0.borrow_mut().input.clear();
    }
}

impl Clock for Mock {
    fn now_ms(&self) -> u64 {
        self.0.borrow().now
    }
}

impl ResponseSink for Mock {
    fn send(&mut self, response: &Response<'_>) {
        self.0.borrow_mut().output.push(response.to_string());
    }
}

/// Milliseconds that pass on each tick.
pub const TICK_MS: u64 = 10;

pub struct Rig {
    pub fw: Firmware,
    pub world: Shared,
}

impl Rig {
    pub fn new() -> Self {
        Rig::with_config(MachineConfig::default())
    }

    /// A machine that moves without homing first.
    pub fn unhomed() -> Self {
        Rig::with_config(ConfigBuilder::default().with_require_homing(false).build())
    }

    pub fn with_config(config: MachineConfig) -> Self {
        Rig::with_world(config, World::default())
    }

    pub fn with_world(config: MachineConfig, world: World) -> Self {
        let world = Rc::new(RefCell::new(world));
        let mock = || Box::new(Mock(world.clone()));
        let hal = Hal {
            queue: mock(),
            heaters: mock(),
            steppers: mock(),
            settings: mock(),
            display: mock(),
            media: mock(),
            serial: mock(),
            clock: mock(),
            sink: mock(),
        };
        let fw = Firmware::new(config, hal);
        Rig { fw, world }
    }

    pub fn send(&mut self, line: &str) {
        let mut w = self.world.borrow_mut();
        w.input.extend(line.bytes());
        w.input.push_back(b'\n');
    }

    pub fn tick(&mut self) -> Result<(), Fatal> {
        self.world.borrow_mut().now += TICK_MS;
        self.fw.tick()
    }

    /// Ticks until all input has been consumed and nothing is left to do.
    pub fn run(&mut self) {
        for _ in 0..100_000 {
            self.tick().expect("fatal while running");
            let drained = self.world.borrow().input.is_empty();
            if drained && self.fw.is_idle() {
                return;
            }
        }
        panic!("firmware never went idle");
    }

    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.world.borrow_mut().output)
    }

    /// Sends one line, runs it to completion and returns what came back.
    pub fn command(&mut self, line: &str) -> Vec<String> {
        self.take_output();
        self.send(line);
        self.run();
        self.take_output()
    }

    pub fn segment_count(&self) -> usize {
        self.world.borrow().segments.len()
    }

    pub fn home(&mut self) {
        let out = self.command("G28");
        assert_eq!(out.last().map(String::as_str), Some("ok"));
        assert!(self.fw.is_homed());
    }
}

/// Wraps a command in a line number and checksum.
pub fn numbered(n: i64, body: &str) -> String {
    let line = format!("N{n} {body}");
    let sum = scarab_protocol::framer::checksum(line.as_bytes());
    format!("{line}*{sum}")
}

pub fn oks(out: &[String]) -> usize {
    out.iter().filter(|l| l.as_str() == "ok").count()
}
