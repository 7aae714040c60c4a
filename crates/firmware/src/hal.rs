//! The services the firmware core drives but does not implement.
//!
//! Everything here is polled from the single run loop, so none of the methods may
//! block for long.

use core::fmt;

pub use scarab_planner::{Axis, SegmentQueue};
pub use scarab_protocol::response::ResponseSink;

use crate::error::{MediaError, SettingsError, StopReason};
use crate::settings::Settings;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum HeaterId {
    Hotend(u8),
    Bed,
}

impl fmt::Display for HeaterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaterId::Hotend(n) => write!(f, "E{n}"),
            HeaterId::Bed => f.write_str("bed"),
        }
    }
}

/// The temperature control loop.
pub trait Heaters {
    fn set_target(&mut self, heater: HeaterId, celsius: f32);
    fn target(&self, heater: HeaterId) -> f32;
    fn current(&self, heater: HeaterId) -> f32;
    /// Is the heater still below its target?
    fn is_heating(&self, heater: HeaterId) -> bool;
    /// Is the heater still above its target?
    fn is_cooling(&self, heater: HeaterId) -> bool;
    /// Heater drive, 0 to 127.
    fn power(&self, heater: HeaterId) -> u8;
    /// Runs one step of the control loop. Returns a reason if the machine has to stop.
    fn service(&mut self) -> Option<StopReason>;
    fn disable_all(&mut self);
    fn set_fan(&mut self, speed: u8);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum End {
    Min,
    Max,
}

/// Where the axes were when their endstops fired unexpectedly, in mm.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EndstopHit {
    pub positions: [Option<f32>; 3],
}

/// Stepper drivers and limit switches.
pub trait Steppers {
    fn enable(&mut self, axis: Axis);
    fn disable(&mut self, axis: Axis);
    /// The state of a limit switch: `Some(true)` if triggered, `None` if not fitted.
    fn endstop(&self, axis: Axis, end: End) -> Option<bool>;
    fn set_endstops_enabled(&mut self, enabled: bool);
    /// Returns and clears the latest endstop hit.
    fn take_endstop_hit(&mut self) -> Option<EndstopHit>;
    /// Is the external kill interlock active?
    fn kill_requested(&self) -> bool;
}

/// Non-volatile storage for [`Settings`].
pub trait SettingsStore {
    fn load(&mut self) -> Result<Settings, SettingsError>;
    fn save(&mut self, settings: &Settings) -> Result<(), SettingsError>;

    fn defaults(&self) -> Settings {
        Settings::default()
    }
}

/// The status display and its button.
pub trait Display {
    fn set_status(&mut self, status: &str);
    /// Has the button been clicked since we last asked?
    fn clicked(&mut self) -> bool;
    fn update(&mut self);
}

/// Stored media: a file that can be printed from, or written to.
pub trait Media {
    fn read_byte(&mut self) -> Option<u8>;
    fn end_of_media(&self) -> bool;
    fn is_printing(&self) -> bool;
    /// Opens a file for printing, returning its size in bytes.
    fn select(&mut self, name: &str) -> Result<u32, MediaError>;
    fn start(&mut self);
    fn pause(&mut self);
    /// Bytes read and total size of the file being printed.
    fn status(&self) -> Option<(u32, u32)>;
    fn begin_write(&mut self, name: &str) -> Result<(), MediaError>;
    fn write_line(&mut self, line: &str);
    fn finish_write(&mut self);
    /// Called once when a print reaches the end of the file.
    fn finished(&mut self);
}

/// Incoming bytes from the host link.
pub trait SerialPort {
    fn read_byte(&mut self) -> Option<u8>;
    /// Throws away everything received but not yet read.
    fn flush(&mut self);
}

pub trait Clock {
    /// Milliseconds since some fixed point in the past.
    fn now_ms(&self) -> u64;
}

/// Every collaborator the firmware needs.
pub struct Hal {
    pub queue: Box<dyn SegmentQueue>,
    pub heaters: Box<dyn Heaters>,
    pub steppers: Box<dyn Steppers>,
    pub settings: Box<dyn SettingsStore>,
    pub display: Box<dyn Display>,
    pub media: Box<dyn Media>,
    pub serial: Box<dyn SerialPort>,
    pub clock: Box<dyn Clock>,
    pub sink: Box<dyn ResponseSink>,
}

/// Media for a machine without a card slot.
#[derive(Debug, Default)]
pub struct NoMedia;

impl Media for NoMedia {
    fn read_byte(&mut self) -> Option<u8> {
        None
    }

    fn end_of_media(&self) -> bool {
        true
    }

    fn is_printing(&self) -> bool {
        false
    }

    fn select(&mut self, _name: &str) -> Result<u32, MediaError> {
        Err(MediaError::NoMedia)
    }

    fn start(&mut self) {}

    fn pause(&mut self) {}

    fn status(&self) -> Option<(u32, u32)> {
        None
    }

    fn begin_write(&mut self, _name: &str) -> Result<(), MediaError> {
        Err(MediaError::NoMedia)
    }

    fn write_line(&mut self, _line: &str) {}

    fn finish_write(&mut self) {}

    fn finished(&mut self) {}
}
