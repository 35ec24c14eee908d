use std::collections::BTreeMap;

use serde::Serialize;

use crate::devices::DeviceKey;
use crate::devices::DeviceState;
use crate::devices::SensorReadings;
use crate::event_log::LogEntry;

/// Connection state of the session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    ConnectionLost,
    FailingOver,
}

impl SessionState {
    /// Whether a connection exists or is being established
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Connected | SessionState::FailingOver
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BrokerRole {
    Primary,
    Alternate,
}

impl BrokerRole {
    pub fn other(self) -> Self {
        match self {
            BrokerRole::Primary => BrokerRole::Alternate,
            BrokerRole::Alternate => BrokerRole::Primary,
        }
    }
}

/// Point-in-time view of the session for readers outside the controller task
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,

    /// Broker of the current or most recent connection attempt
    pub broker: Option<BrokerRole>,

    pub client_id: String,

    pub devices: BTreeMap<DeviceKey, DeviceState>,

    pub sensors: SensorReadings,

    /// Event log, newest first
    pub log: Vec<LogEntry>,
}
