use serde::Serialize;

use super::table::DeviceKey;
use super::table::SensorKey;

/// Last confirmed state of a device.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DeviceState {
    /// On/off devices (lights, air conditioner, plug, ...)
    Switch(bool),

    /// Gates and the curtain. The payload is kept as published by the
    /// device; interpreting unknown values is up to the view.
    Position(String),
}

/// Latest sensor readings.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SensorReadings {
    /// Degrees Celsius
    pub temperature: f64,

    /// Relative humidity, percent
    pub humidity: f64,

    pub motion: bool,
}

/// A change applied to the store by an inbound status message.
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    Device { key: DeviceKey, state: DeviceState },
    Sensor { key: SensorKey, reading: SensorValue },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorValue {
    Numeric(f64),
    Boolean(bool),
}
