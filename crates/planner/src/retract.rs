//! Firmware retraction.
//!
//! A retract pulls the filament back by `length` and lifts the nozzle by `zlift`;
//! a recover undoes both and pushes an extra `recover_length`. Neither changes the
//! *reported* position: the extra motion is produced by shifting
//! `current_position` before the move is segmented, so the segmenter sees a delta
//! that the G-code sender never asked for.

use crate::{Axis, MachineState};

/// Extruder-only moves shorter than this are never treated as retracts.
pub const MIN_RETRACT: f32 = 0.1;

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RetractionState {
    /// Treat plain extruder-only moves as retracts and recovers.
    pub auto_retract_enabled: bool,
    pub is_retracted: bool,
    pub length: f32,
    /// mm/min.
    pub feed_rate: f32,
    pub zlift: f32,
    /// Extra length pushed on recover, on top of `length`.
    pub recover_length: f32,
    /// mm/min.
    pub recover_feed_rate: f32,
}

impl Default for RetractionState {
    fn default() -> Self {
        RetractionState {
            auto_retract_enabled: true,
            is_retracted: false,
            length: 3.0,
            feed_rate: 17.0 * 60.0,
            zlift: 0.8,
            recover_length: 0.0,
            recover_feed_rate: 8.0 * 60.0,
        }
    }
}

impl RetractionState {
    /// Prepares an explicit retract (G10). Returns `false` if already retracted,
    /// in which case nothing should move.
    pub fn retract(&mut self, state: &mut MachineState) -> bool {
        if self.is_retracted {
            return false;
        }
        state.destination = state.current_position;
        self.shift_for_retract(state);
        true
    }

    /// Prepares an explicit recover (G11). Returns `false` if not retracted.
    pub fn recover(&mut self, state: &mut MachineState) -> bool {
        if !self.is_retracted {
            return false;
        }
        state.destination = state.current_position;
        self.shift_for_recover(state);
        true
    }

    /// Looks at an extruder-only move whose destination was just resolved, and
    /// turns it into a retract or a recover if it looks like one.
    pub(crate) fn detect(&mut self, state: &mut MachineState) {
        if !self.auto_retract_enabled {
            return;
        }
        let e = Axis::E.index();
        let change = state.destination[e] - state.current_position[e];

        if change < -MIN_RETRACT && !self.is_retracted {
            log::debug!("extruder move of {change:.2} treated as retract");
            self.shift_for_retract(state);
        } else if change > MIN_RETRACT && self.is_retracted {
            log::debug!("extruder move of {change:.2} treated as recover");
            self.shift_for_recover(state);
        }
    }

    fn shift_for_retract(&mut self, state: &mut MachineState) {
        let (z, e) = (Axis::Z.index(), Axis::E.index());
        state.current_position[z] -= self.zlift;
        state.current_position[e] = state.destination[e] + self.length;
        state.feed_rate = self.feed_rate;
        self.is_retracted = true;
    }

    fn shift_for_recover(&mut self, state: &mut MachineState) {
        let (z, e) = (Axis::Z.index(), Axis::E.index());
        state.current_position[z] += self.zlift;
        state.current_position[e] = state.destination[e] - (self.length + self.recover_length);
        state.feed_rate = self.recover_feed_rate;
        self.is_retracted = false;
    }
}
