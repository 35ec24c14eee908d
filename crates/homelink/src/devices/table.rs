//! Static device table.
//!
//! The dashboard drives a fixed fleet. Each device has a command topic
//! relative to the namespace root; its status topic is the command topic
//! plus `/status`. Sensors publish plain leaf topics.

use serde::Serialize;
use strum::EnumIter;
use strum::EnumString;
use strum::IntoStaticStr;

use super::state::DeviceState;
use crate::debounce::STATUS_SUFFIX;

/// How a device's status payload is decoded and which commands it accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceKind {
    /// On/off device, status `"ON"` means on
    Switch,
    /// Gate, status stored verbatim (e.g. "ABERTO", "FECHADO")
    Door,
    /// Curtain motor, status stored verbatim (e.g. "IDLE")
    Curtain,
}

impl DeviceKind {
    /// Command payloads this kind of device understands
    pub fn commands(self) -> &'static [&'static str] {
        match self {
            DeviceKind::Switch => &["ON", "OFF"],
            DeviceKind::Door | DeviceKind::Curtain => &["ABRIR", "FECHAR"],
        }
    }

    pub fn accepts(self, payload: &str) -> bool {
        self.commands().contains(&payload)
    }

    /// State before any status message has been received
    pub fn initial_state(self) -> DeviceState {
        match self {
            DeviceKind::Switch => DeviceState::Switch(false),
            DeviceKind::Door => DeviceState::Position("FECHADO".to_string()),
            DeviceKind::Curtain => DeviceState::Position("IDLE".to_string()),
        }
    }

    /// Decode a status payload. Never fails.
    pub fn decode(self, payload: &str) -> DeviceState {
        match self {
            DeviceKind::Switch => DeviceState::Switch(payload == "ON"),
            DeviceKind::Door | DeviceKind::Curtain => DeviceState::Position(payload.to_string()),
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    EnumIter,
    EnumString,
    IntoStaticStr,
    strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceKey {
    GarageLight,
    SocialGate,
    TiltGate,
    LivingRoomLight,
    AirConditioner,
    Humidifier,
    BedroomLight,
    SmartPlug,
    Curtain,
}

impl DeviceKey {
    /// Command topic relative to the namespace root
    pub fn topic_suffix(self) -> &'static str {
        match self {
            DeviceKey::GarageLight => "garagem/luz",
            DeviceKey::SocialGate => "garagem/portao/social",
            DeviceKey::TiltGate => "garagem/portao/basculante",
            DeviceKey::LivingRoomLight => "sala/luz",
            DeviceKey::AirConditioner => "sala/ar",
            DeviceKey::Humidifier => "sala/umidificador",
            DeviceKey::BedroomLight => "quarto/luz",
            DeviceKey::SmartPlug => "quarto/tomada",
            DeviceKey::Curtain => "quarto/cortina",
        }
    }

    pub fn kind(self) -> DeviceKind {
        match self {
            DeviceKey::SocialGate | DeviceKey::TiltGate => DeviceKind::Door,
            DeviceKey::Curtain => DeviceKind::Curtain,
            _ => DeviceKind::Switch,
        }
    }

    pub fn command_topic(self, root: &str) -> String {
        format!("{}/{}", root, self.topic_suffix())
    }

    pub fn status_topic(self, root: &str) -> String {
        format!("{}{}", self.command_topic(root), STATUS_SUFFIX)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    EnumIter,
    EnumString,
    IntoStaticStr,
    strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SensorKey {
    Temperature,
    Humidity,
    Motion,
}

impl SensorKey {
    pub fn topic_suffix(self) -> &'static str {
        match self {
            SensorKey::Temperature => "sala/temperatura",
            SensorKey::Humidity => "sala/umidade",
            SensorKey::Motion => "sala/movimento",
        }
    }

    pub fn topic(self, root: &str) -> String {
        format!("{}/{}", root, self.topic_suffix())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_status_topic_extends_command_topic() {
        for key in DeviceKey::iter() {
            let command = key.command_topic("casa");
            let status = key.status_topic("casa");
            assert_eq!(status, format!("{}/status", command));
        }
    }

    #[test]
    fn test_device_key_names() {
        assert_eq!(DeviceKey::LivingRoomLight.to_string(), "living_room_light");
        assert_eq!(
            DeviceKey::from_str("social_gate").unwrap(),
            DeviceKey::SocialGate
        );
        assert!(DeviceKey::from_str("garage").is_err());
    }

    #[test]
    fn test_switch_decode() {
        assert_eq!(DeviceKind::Switch.decode("ON"), DeviceState::Switch(true));
        for payload in ["OFF", "on", "", "1", "true", " ON"] {
            assert_eq!(DeviceKind::Switch.decode(payload), DeviceState::Switch(false));
        }
    }

    #[test]
    fn test_position_decode_is_verbatim() {
        assert_eq!(
            DeviceKind::Door.decode("ABRINDO"),
            DeviceState::Position("ABRINDO".to_string())
        );
        assert_eq!(
            DeviceKind::Curtain.decode("whatever"),
            DeviceState::Position("whatever".to_string())
        );
    }

    #[test]
    fn test_command_vocabulary() {
        assert!(DeviceKey::GarageLight.kind().accepts("ON"));
        assert!(!DeviceKey::GarageLight.kind().accepts("ABRIR"));
        assert!(DeviceKey::TiltGate.kind().accepts("FECHAR"));
        assert!(DeviceKey::Curtain.kind().accepts("ABRIR"));
        assert!(!DeviceKey::Curtain.kind().accepts("OFF"));
    }
}
