use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Power {
    On,
    Off,
}

impl Power {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Heat,
    Dry,
    Cool,
    Fan,
    Auto,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Heat => "HEAT",
            Self::Dry => "DRY",
            Self::Cool => "COOL",
            Self::Fan => "FAN",
            Self::Auto => "AUTO",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanSpeed {
    Auto,
    Quiet,
    Speed1,
    Speed2,
    Speed3,
    Speed4,
}

impl FanSpeed {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Quiet => "QUIET",
            Self::Speed1 => "1",
            Self::Speed2 => "2",
            Self::Speed3 => "3",
            Self::Speed4 => "4",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VanePosition {
    Auto,
    Position1,
    Position2,
    Position3,
    Position4,
    Position5,
    Swing,
}

impl VanePosition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Position1 => "1",
            Self::Position2 => "2",
            Self::Position3 => "3",
            Self::Position4 => "4",
            Self::Position5 => "5",
            Self::Swing => "SWING",
        }
    }
}

/// Settings snapshot as reported by the appliance adapter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApplianceSettings {
    pub power: Power,
    pub mode: Mode,
    pub temperature: f32,
    pub fan: FanSpeed,
    pub vane: VanePosition,
}

impl Default for ApplianceSettings {
    fn default() -> Self {
        Self {
            power: Power::Off,
            mode: Mode::Auto,
            temperature: 22.0,
            fan: FanSpeed::Auto,
            vane: VanePosition::Auto,
        }
    }
}

impl ApplianceSettings {
    /// Mode as seen by consumers: a powered-off unit reports `OFF`.
    pub fn effective_mode(&self) -> &'static str {
        match self.power {
            Power::On => self.mode.as_str(),
            Power::Off => "OFF",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApplianceStatus {
    pub room_temperature: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub payload: String,
    pub qos: Qos,
    pub retain: bool,
}

impl Publication {
    pub fn retained(topic: &str, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.to_string(),
            payload: payload.into(),
            qos: Qos::AtMostOnce,
            retain: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    #[serde(rename = "uptimeMs")]
    pub uptime_ms: u64,
    #[serde(rename = "syncState")]
    pub sync_state: &'static str,
    #[serde(rename = "pendingFlush")]
    pub pending_flush: bool,
    #[serde(rename = "acceptedCommands")]
    pub accepted_commands: u64,
    #[serde(rename = "rejectedCommands")]
    pub rejected_commands: u64,
    pub flushes: u64,
    #[serde(rename = "failedFlushes")]
    pub failed_flushes: u64,
    #[serde(rename = "lastFlushError")]
    pub last_flush_error: Option<String>,
}

/// Renders a temperature the way the state topics carry it: rounded half to
/// even, right-aligned in three columns, never longer than three bytes.
pub fn format_temperature(value: f32) -> Option<String> {
    if !value.is_finite() {
        return None;
    }
    let rounded = value.round_ties_even() as i64;
    let mut text = format!("{rounded:>3}");
    text.truncate(3);
    Some(text)
}
