use crate::devices::DeviceKey;

/// Errors surfaced to callers of the session
///
/// None of these are fatal: every one is also recorded in the event log and
/// the session keeps running.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("not connected to an MQTT broker")]
    NotConnected,

    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("device {device} does not accept command {payload:?}")]
    InvalidCommand { device: DeviceKey, payload: String },

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("session controller is no longer running")]
    ControllerGone,
}
