//! Stand-ins for the printer hardware.
//!
//! Time is simulated: the run loop advances a shared [`SimClock`] by a fixed step
//! per iteration, and everything that takes time (motion, heating) is measured
//! against it, so a long print runs as fast as the host can tick.

use std::{cell::Cell, rc::Rc};

use scarab_firmware::hal::{
    Axis, Clock, Display, End, EndstopHit, HeaterId, Heaters, SegmentQueue, Steppers,
};
use scarab_firmware::{MachineConfig, StopReason};
use scarab_planner::{MotionTunables, Segment};

const AMBIENT: f32 = 20.0;

#[derive(Clone, Debug, Default)]
pub struct SimClock {
    now: Rc<Cell<u64>>,
}

impl SimClock {
    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

/// Counters shared between the simulation and whoever reports on it.
#[derive(Clone, Debug, Default)]
pub struct Stats {
    pub segments: Rc<Cell<u64>>,
}

/// A segment queue that takes a fixed time per segment.
///
/// Segments are cut so that there are `segments_per_second` of them per second
/// of motion, so that is also how fast this one drains them.
pub struct SimQueue {
    clock: SimClock,
    stats: Stats,
    segment_ms: u64,
    busy_until: u64,
    actuators: [f32; 3],
    e: f32,
}

impl SimQueue {
    pub fn new(clock: SimClock, stats: Stats, segments_per_second: f32) -> Self {
        SimQueue {
            clock,
            stats,
            segment_ms: (1000.0 / segments_per_second.max(1.0)) as u64,
            busy_until: 0,
            actuators: [0.0; 3],
            e: 0.0,
        }
    }
}

impl SegmentQueue for SimQueue {
    fn enqueue(&mut self, segment: Segment) {
        let now = self.clock.now_ms();
        self.busy_until = self.busy_until.max(now) + self.segment_ms;
        self.actuators = segment.actuators;
        self.e = segment.e;
        self.stats.segments.set(self.stats.segments.get() + 1);
        log::trace!("segment {segment:?}");
    }

    fn has_pending(&self) -> bool {
        self.clock.now_ms() < self.busy_until
    }

    fn set_current_position(&mut self, actuators: [f32; 3], e: f32) {
        log::debug!(
            "queue position {:?} E{} -> {actuators:?} E{e}",
            self.actuators,
            self.e
        );
        self.actuators = actuators;
        self.e = e;
    }

    fn set_e_position(&mut self, e: f32) {
        self.e = e;
    }

    fn apply_tunables(&mut self, tunables: &MotionTunables) {
        log::debug!("tunables {tunables:?}");
    }

    fn set_extrude_multiplier(&mut self, percent: f32) {
        log::debug!("extrude multiplier {percent}%");
    }
}

#[derive(Clone, Copy, Debug)]
struct Thermal {
    current: f32,
    target: f32,
    /// Degrees per second, both ways.
    rate: f32,
    max: f32,
}

impl Thermal {
    fn new(rate: f32, max: f32) -> Self {
        Thermal {
            current: AMBIENT,
            target: 0.0,
            rate,
            max,
        }
    }

    fn step(&mut self, seconds: f32) {
        let delta = self.rate * seconds;
        let floor = self.target.max(AMBIENT);
        if self.current < self.target {
            self.current = (self.current + delta).min(self.target);
        } else if self.current > floor {
            self.current = (self.current - delta).max(floor);
        }
    }
}

/// Heaters that move toward their target at a constant rate.
pub struct SimHeaters {
    clock: SimClock,
    last_service: u64,
    hotends: Vec<Thermal>,
    bed: Thermal,
}

impl SimHeaters {
    pub fn new(clock: SimClock, extruders: u8) -> Self {
        SimHeaters {
            last_service: clock.now_ms(),
            clock,
            hotends: vec![Thermal::new(5.0, 275.0); extruders.max(1) as usize],
            bed: Thermal::new(1.0, 150.0),
        }
    }

    fn get(&self, heater: HeaterId) -> Option<&Thermal> {
        match heater {
            HeaterId::Hotend(n) => self.hotends.get(n as usize),
            HeaterId::Bed => Some(&self.bed),
        }
    }

    fn get_mut(&mut self, heater: HeaterId) -> Option<&mut Thermal> {
        match heater {
            HeaterId::Hotend(n) => self.hotends.get_mut(n as usize),
            HeaterId::Bed => Some(&mut self.bed),
        }
    }

    fn heaters(&self) -> impl Iterator<Item = HeaterId> {
        (0..self.hotends.len() as u8)
            .map(HeaterId::Hotend)
            .chain(std::iter::once(HeaterId::Bed))
    }
}

impl Heaters for SimHeaters {
    fn set_target(&mut self, heater: HeaterId, celsius: f32) {
        log::info!("{heater} target {celsius:.1}");
        if let Some(t) = self.get_mut(heater) {
            t.target = celsius;
        }
    }

    fn target(&self, heater: HeaterId) -> f32 {
        self.get(heater).map_or(0.0, |t| t.target)
    }

    fn current(&self, heater: HeaterId) -> f32 {
        self.get(heater).map_or(AMBIENT, |t| t.current)
    }

    fn is_heating(&self, heater: HeaterId) -> bool {
        self.get(heater).is_some_and(|t| t.current < t.target)
    }

    fn is_cooling(&self, heater: HeaterId) -> bool {
        self.get(heater)
            .is_some_and(|t| t.current > t.target.max(AMBIENT))
    }

    fn power(&self, heater: HeaterId) -> u8 {
        if self.is_heating(heater) {
            127
        } else {
            0
        }
    }

    fn service(&mut self) -> Option<StopReason> {
        let now = self.clock.now_ms();
        let seconds = now.saturating_sub(self.last_service) as f32 / 1000.0;
        self.last_service = now;

        let mut fault = None;
        for heater in self.heaters().collect::<Vec<_>>() {
            let Some(t) = self.get_mut(heater) else {
                continue;
            };
            t.step(seconds);
            if t.current > t.max && fault.is_none() {
                fault = Some(StopReason::MaxTemp(heater));
            }
        }
        fault
    }

    fn disable_all(&mut self) {
        for t in self.hotends.iter_mut().chain(std::iter::once(&mut self.bed)) {
            t.target = 0.0;
        }
    }

    fn set_fan(&mut self, speed: u8) {
        log::info!("fan {speed}");
    }
}

/// Drivers that are always where they are told to be, and switches that never
/// fire unexpectedly.
pub struct SimSteppers {
    enabled: [bool; 4],
    fitted_min: [bool; 3],
    fitted_max: [bool; 3],
}

impl SimSteppers {
    pub fn new(config: &MachineConfig) -> Self {
        SimSteppers {
            enabled: [false; 4],
            fitted_min: config.endstop_min,
            fitted_max: config.endstop_max,
        }
    }
}

impl Steppers for SimSteppers {
    fn enable(&mut self, axis: Axis) {
        self.enabled[axis.index()] = true;
    }

    fn disable(&mut self, axis: Axis) {
        if std::mem::take(&mut self.enabled[axis.index()]) {
            log::debug!("{} stepper off", axis.letter());
        }
    }

    fn endstop(&self, axis: Axis, end: End) -> Option<bool> {
        let fitted = match end {
            End::Min => self.fitted_min,
            End::Max => self.fitted_max,
        };
        fitted.get(axis.index()).copied()?.then_some(false)
    }

    fn set_endstops_enabled(&mut self, enabled: bool) {
        log::debug!("endstops {}", if enabled { "on" } else { "off" });
    }

    fn take_endstop_hit(&mut self) -> Option<EndstopHit> {
        None
    }

    fn kill_requested(&self) -> bool {
        false
    }
}

/// A display that logs its status line. Its button is pressed as soon as anyone
/// waits for it.
#[derive(Debug, Default)]
pub struct SimDisplay {
    status: String,
}

impl Display for SimDisplay {
    fn set_status(&mut self, status: &str) {
        if self.status != status {
            log::info!("display: {status}");
            self.status = status.to_owned();
        }
    }

    fn clicked(&mut self) -> bool {
        true
    }

    fn update(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_drains_with_time() {
        let clock = SimClock::default();
        let stats = Stats::default();
        let mut queue = SimQueue::new(clock.clone(), stats.clone(), 200.0);
        let segment = Segment {
            actuators: [1.0, 2.0, 3.0],
            e: 0.0,
            feed_rate: 10.0,
            tool: 0,
        };
        queue.enqueue(segment);
        queue.enqueue(segment);
        assert!(queue.has_pending());
        clock.advance(5);
        assert!(queue.has_pending());
        clock.advance(5);
        assert!(!queue.has_pending());
        assert_eq!(stats.segments.get(), 2);
    }

    #[test]
    fn heating_takes_time() {
        let clock = SimClock::default();
        let mut heaters = SimHeaters::new(clock.clone(), 1);
        let hotend = HeaterId::Hotend(0);
        heaters.set_target(hotend, 50.0);
        assert!(heaters.is_heating(hotend));

        clock.advance(2000);
        assert_eq!(heaters.service(), None);
        assert_eq!(heaters.current(hotend), 30.0);
        clock.advance(10_000);
        heaters.service();
        assert_eq!(heaters.current(hotend), 50.0);
        assert!(!heaters.is_heating(hotend));

        heaters.disable_all();
        assert!(heaters.is_cooling(hotend));
        clock.advance(60_000);
        heaters.service();
        assert_eq!(heaters.current(hotend), AMBIENT);
        assert!(!heaters.is_cooling(hotend));
    }

    #[test]
    fn overheating_stops() {
        let clock = SimClock::default();
        let mut heaters = SimHeaters::new(clock.clone(), 1);
        heaters.set_target(HeaterId::Bed, 300.0);
        clock.advance(1_000_000);
        assert_eq!(heaters.service(), Some(StopReason::MaxTemp(HeaterId::Bed)));
    }

    #[test]
    fn unknown_hotend() {
        let heaters = SimHeaters::new(SimClock::default(), 1);
        assert_eq!(heaters.target(HeaterId::Hotend(3)), 0.0);
        assert!(!heaters.is_heating(HeaterId::Hotend(3)));
    }

    #[test]
    fn fitted_switches() {
        let steppers = SimSteppers::new(&MachineConfig::default());
        assert_eq!(steppers.endstop(Axis::X, End::Max), Some(false));
        assert_eq!(steppers.endstop(Axis::X, End::Min), None);
        assert_eq!(steppers.endstop(Axis::Z, End::Min), Some(false));
        assert_eq!(steppers.endstop(Axis::E, End::Min), None);
    }
}
