use std::fmt;

use crate::{
    topics::Dimension,
    types::{FanSpeed, Mode, Power, VanePosition},
};

pub const MAX_COMMAND_LEN: usize = 5;

const MIN_TEMPERATURE_EXCLUSIVE: f32 = 15.0;
const MAX_TEMPERATURE_EXCLUSIVE: f32 = 31.0;

/// A validated mutation for one appliance dimension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SettingChange {
    Power(Power),
    Mode(Mode),
    Temperature(f32),
    Fan(FanSpeed),
    Vane(VanePosition),
}

impl SettingChange {
    pub fn dimension(&self) -> Dimension {
        match self {
            Self::Power(_) => Dimension::Power,
            Self::Mode(_) => Dimension::Mode,
            Self::Temperature(_) => Dimension::Temperature,
            Self::Fan(_) => Dimension::Fan,
            Self::Vane(_) => Dimension::Vane,
        }
    }
}

impl fmt::Display for SettingChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Power(power) => f.write_str(power.as_str()),
            Self::Mode(mode) => f.write_str(mode.as_str()),
            Self::Temperature(temperature) => write!(f, "{temperature}"),
            Self::Fan(fan) => f.write_str(fan.as_str()),
            Self::Vane(vane) => f.write_str(vane.as_str()),
        }
    }
}

/// Upper-cases at most `max_len` bytes of a raw payload. Longer payloads are
/// cut, not rejected. Returns `None` when the kept bytes are not valid UTF-8.
pub fn normalize_payload(payload: &[u8], max_len: usize) -> Option<String> {
    let kept = &payload[..payload.len().min(max_len)];
    let upper = kept.to_ascii_uppercase();
    String::from_utf8(upper).ok()
}

pub fn validate_power(value: &str) -> Option<Power> {
    match value {
        "ON" => Some(Power::On),
        "OFF" => Some(Power::Off),
        _ => None,
    }
}

pub fn validate_mode(value: &str) -> Option<Mode> {
    match value {
        "HEAT" => Some(Mode::Heat),
        "DRY" => Some(Mode::Dry),
        "COOL" => Some(Mode::Cool),
        "FAN" => Some(Mode::Fan),
        "AUTO" => Some(Mode::Auto),
        _ => None,
    }
}

pub fn validate_temperature(value: &str) -> Option<f32> {
    let parsed = value.trim().parse::<f32>().ok()?;
    (parsed > MIN_TEMPERATURE_EXCLUSIVE && parsed < MAX_TEMPERATURE_EXCLUSIVE).then_some(parsed)
}

pub fn validate_fan(value: &str) -> Option<FanSpeed> {
    match value {
        "AUTO" => Some(FanSpeed::Auto),
        "QUIET" => Some(FanSpeed::Quiet),
        "1" => Some(FanSpeed::Speed1),
        "2" => Some(FanSpeed::Speed2),
        "3" => Some(FanSpeed::Speed3),
        "4" => Some(FanSpeed::Speed4),
        _ => None,
    }
}

pub fn validate_vane(value: &str) -> Option<VanePosition> {
    match value {
        "AUTO" => Some(VanePosition::Auto),
        "1" => Some(VanePosition::Position1),
        "2" => Some(VanePosition::Position2),
        "3" => Some(VanePosition::Position3),
        "4" => Some(VanePosition::Position4),
        "5" => Some(VanePosition::Position5),
        "SWING" => Some(VanePosition::Swing),
        _ => None,
    }
}

/// Runs the validator for `dimension` over an already normalized value.
pub fn parse_command(dimension: Dimension, value: &str) -> Option<SettingChange> {
    match dimension {
        Dimension::Power => validate_power(value).map(SettingChange::Power),
        Dimension::Mode => validate_mode(value).map(SettingChange::Mode),
        Dimension::Temperature => validate_temperature(value).map(SettingChange::Temperature),
        Dimension::Fan => validate_fan(value).map(SettingChange::Fan),
        Dimension::Vane => validate_vane(value).map(SettingChange::Vane),
    }
}
