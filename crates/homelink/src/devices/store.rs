use std::collections::BTreeMap;
use std::collections::HashMap;

use strum::IntoEnumIterator;
use tracing::debug;

use super::state::DeviceState;
use super::state::SensorReadings;
use super::state::SensorValue;
use super::state::StateChange;
use super::table::DeviceKey;
use super::table::SensorKey;

/// Where an inbound topic lands in the store
#[derive(Debug, Clone, Copy)]
enum Route {
    Device(DeviceKey),
    Sensor(SensorKey),
}

/// Last-known state of every device and sensor in the namespace.
///
/// Only inbound status messages mutate the store; commands never update it
/// optimistically.
#[derive(Debug, Clone)]
pub struct DeviceStore {
    routes: HashMap<String, Route>,
    devices: BTreeMap<DeviceKey, DeviceState>,
    sensors: SensorReadings,
}

impl DeviceStore {
    /// Create a store for the fleet under `root`, with every device in its
    /// initial state
    pub fn new(root: &str) -> Self {
        let mut routes = HashMap::new();
        let mut devices = BTreeMap::new();

        for key in DeviceKey::iter() {
            routes.insert(key.status_topic(root), Route::Device(key));
            devices.insert(key, key.kind().initial_state());
        }
        for key in SensorKey::iter() {
            routes.insert(key.topic(root), Route::Sensor(key));
        }

        Self {
            routes,
            devices,
            sensors: SensorReadings::default(),
        }
    }

    /// Apply an inbound message
    ///
    /// Topics outside the static table are ignored and return `None`; the
    /// namespace subscription delivers plenty of those (including our own
    /// commands).
    pub fn apply_status(&mut self, topic: &str, payload: &str) -> Option<StateChange> {
        let route = match self.routes.get(topic) {
            Some(route) => *route,
            None => {
                debug!("No device for topic {}", topic);
                return None;
            }
        };

        match route {
            Route::Device(key) => {
                let state = key.kind().decode(payload);
                self.devices.insert(key, state.clone());
                Some(StateChange::Device { key, state })
            }
            Route::Sensor(key) => {
                let reading = match key {
                    SensorKey::Temperature => {
                        let value = decode_number(payload);
                        self.sensors.temperature = value;
                        SensorValue::Numeric(value)
                    }
                    SensorKey::Humidity => {
                        let value = decode_number(payload);
                        self.sensors.humidity = value;
                        SensorValue::Numeric(value)
                    }
                    SensorKey::Motion => {
                        let value = payload == "ON";
                        self.sensors.motion = value;
                        SensorValue::Boolean(value)
                    }
                };
                Some(StateChange::Sensor { key, reading })
            }
        }
    }

    pub fn device(&self, key: DeviceKey) -> &DeviceState {
        // Every key is inserted in new() and never removed
        &self.devices[&key]
    }

    pub fn devices(&self) -> &BTreeMap<DeviceKey, DeviceState> {
        &self.devices
    }

    pub fn sensors(&self) -> &SensorReadings {
        &self.sensors
    }
}

/// Parse a numeric sensor payload, falling back to 0 on anything unusable
fn decode_number(payload: &str) -> f64 {
    payload
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}
