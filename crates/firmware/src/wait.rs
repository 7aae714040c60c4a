//! Commands that take more than one tick.

use scarab_planner::Axis;

use crate::calibration::GridMove;
use crate::hal::HeaterId;
use crate::homing::Homing;
use crate::Firmware;

/// What to do once the segment queue has drained.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum AfterSync {
    Nothing,
    /// Switch off the steppers of these axes (X, Y, Z, E).
    DisableSteppers([bool; 4]),
    /// Make these axes of `current_position` the given values, as G92 does.
    SetPosition([Option<f32>; 4]),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct HeatWait {
    tool: u8,
    /// Were we below the target when we started?
    heating: bool,
    residency_start: Option<u64>,
    last_report: u64,
}

impl HeatWait {
    pub(crate) fn new(tool: u8, heating: bool, now: u64) -> Self {
        HeatWait {
            tool,
            heating,
            residency_start: None,
            last_report: now,
        }
    }
}

pub(crate) enum Activity {
    Sync(AfterSync),
    /// Wait for the queue to drain, then for `ms` more. The deadline is set
    /// once the queue is empty.
    Dwell { ms: u64, until: Option<u64> },
    /// Wait for the button, or the timeout if it is non-zero. The timeout starts
    /// once the queue has drained.
    UserWait { timeout_ms: u64, deadline: Option<u64> },
    Hotend(HeatWait),
    Bed { last_report: u64 },
    Homing(Homing),
    GridMove(GridMove),
}

impl Firmware {
    pub(crate) fn poll_activity(&mut self, activity: Activity) {
        let next = match activity {
            Activity::Sync(then) => self.poll_sync(then),
            Activity::Dwell { ms, until } => self.poll_dwell(ms, until),
            Activity::UserWait {
                timeout_ms,
                deadline,
            } => self.poll_user_wait(timeout_ms, deadline),
            Activity::Hotend(wait) => self.poll_hotend(wait),
            Activity::Bed { last_report } => self.poll_bed(last_report),
            Activity::Homing(homing) => homing.step(self),
            Activity::GridMove(grid_move) => grid_move.step(self),
        };

        match next {
            Some(activity) => self.activity = Some(activity),
            None => {
                if let Some(source) = self.pending_ack.take() {
                    self.ack(source);
                }
            }
        }
    }

    fn poll_sync(&mut self, then: AfterSync) -> Option<Activity> {
        if self.hal.queue.has_pending() {
            return Some(Activity::Sync(then));
        }
        match then {
            AfterSync::Nothing => {}
            AfterSync::DisableSteppers(axes) => {
                for (axis, _) in Axis::ALL.iter().zip(axes).filter(|(_, on)| *on) {
                    self.hal.steppers.disable(*axis);
                }
            }
            AfterSync::SetPosition(axes) => self.set_position(axes),
        }
        None
    }

    fn poll_dwell(&mut self, ms: u64, until: Option<u64>) -> Option<Activity> {
        let until = match until {
            Some(u) => u,
            None if self.hal.queue.has_pending() => return Some(Activity::Dwell { ms, until }),
            None => self.now() + ms,
        };
        (self.now() < until).then_some(Activity::Dwell {
            ms,
            until: Some(until),
        })
    }

    fn poll_user_wait(&mut self, timeout_ms: u64, deadline: Option<u64>) -> Option<Activity> {
        let now = self.now();
        let deadline = match deadline {
            Some(d) => d,
            None if self.hal.queue.has_pending() => {
                return Some(Activity::UserWait {
                    timeout_ms,
                    deadline: None,
                })
            }
            None => {
                self.last_command_ms = now;
                now + timeout_ms
            }
        };

        let timed_out = timeout_ms > 0 && now >= deadline;
        if self.hal.display.clicked() || timed_out {
            self.hal.display.set_status("Resuming print");
            return None;
        }
        Some(Activity::UserWait {
            timeout_ms,
            deadline: Some(deadline),
        })
    }

    fn poll_hotend(&mut self, mut wait: HeatWait) -> Option<Activity> {
        if self.stopped.is_some() {
            return None;
        }
        let now = self.now();
        let heater = HeaterId::Hotend(wait.tool);
        let current = self.hal.heaters.current(heater);
        let target = self.hal.heaters.target(heater);
        let residency = self.config.temp_residency_ms;

        if now.saturating_sub(wait.last_report) >= 1000 {
            let n = wait.tool;
            match wait.residency_start {
                Some(start) if residency > 0 => {
                    let left = residency.saturating_sub(now.saturating_sub(start)) / 1000;
                    raw!(self, "T:{current:.1} E:{n} W:{left}");
                }
                _ => raw!(self, "T:{current:.1} E:{n} W:?"),
            }
            wait.last_report = now;
        }

        let done = if residency > 0 {
            let window = self.config.temp_window;
            match wait.residency_start {
                None => {
                    let reached = if wait.heating {
                        current >= target - window
                    } else {
                        current <= target + window
                    };
                    if reached {
                        wait.residency_start = Some(now);
                    }
                }
                Some(_) if (current - target).abs() > self.config.temp_hysteresis => {
                    // Wandered off, so start counting again.
                    wait.residency_start = Some(now);
                }
                Some(_) => {}
            }
            wait.residency_start
                .is_some_and(|start| now.saturating_sub(start) >= residency)
        } else if wait.heating {
            !self.hal.heaters.is_heating(heater)
        } else {
            self.config.cooldown_no_wait || !self.hal.heaters.is_cooling(heater)
        };

        if !done {
            return Some(Activity::Hotend(wait));
        }
        log::info!("{heater} reached {target:.1}");
        self.hal.display.set_status("Heating done.");
        self.print_start_ms = now;
        self.last_command_ms = now;
        None
    }

    fn poll_bed(&mut self, mut last_report: u64) -> Option<Activity> {
        if self.stopped.is_some() {
            return None;
        }
        let now = self.now();
        if !self.hal.heaters.is_heating(HeaterId::Bed) {
            self.hal.display.set_status("Bed done.");
            self.last_command_ms = now;
            return None;
        }
        if now.saturating_sub(last_report) >= 1000 {
            let tool = self.state.active_tool;
            let hotend = self.hal.heaters.current(HeaterId::Hotend(tool));
            let bed = self.hal.heaters.current(HeaterId::Bed);
            raw!(self, "T:{hotend:.1} E:{tool} B:{bed:.1}");
            last_report = now;
        }
        Some(Activity::Bed { last_report })
    }
}
