use crate::hal::HeaterId;

/// A condition that halts the firmware for good. Only a reset gets out of it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Fatal {
    #[error("no command received within the maximum inactive time")]
    InactivityTimeout,
    #[error("kill switch pressed")]
    KillSwitch,
}

/// Why the machine went into the stopped state. Motion is refused until `M999`.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StopReason {
    #[error("{0}: maxtemp triggered")]
    MaxTemp(HeaterId),
    #[error("{0}: mintemp triggered")]
    MinTemp(HeaterId),
    #[error("{0}: temperature sensor failure")]
    Sensor(HeaterId),
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("no stored settings")]
    Missing,
    #[error("stored settings are corrupt")]
    Corrupt,
    #[error("settings storage failed: {0}")]
    Storage(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("no media")]
    NoMedia,
    #[error("open failed")]
    OpenFailed,
}
