use std::net::Ipv4Addr;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub const MAX_LENGTH_MQTT_HOST: usize = 127;
pub const MAX_LENGTH_MQTT_PORT: usize = 5;
pub const MAX_LENGTH_MQTT_USERNAME: usize = 63;
pub const MAX_LENGTH_MQTT_PASSWORD: usize = 63;
pub const MAX_LENGTH_MQTT_TOPIC_PREFIX: usize = 31;
pub const MAX_LENGTH_SYSLOG_HOST: usize = 127;
pub const MAX_LENGTH_SYSLOG_PORT: usize = 5;
pub const MAX_LENGTH_SYSLOG_DEVICE_HOSTNAME: usize = 63;
pub const MAX_LENGTH_SYSLOG_APP_NAME: usize = 31;
pub const MAX_LENGTH_SYSLOG_LOG_LEVEL: usize = 7;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings file is not a valid settings object: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub flush_debounce_ms: u64,
    pub max_command_len: usize,
    pub status_publish_interval_ms: u64,
    pub reset_hold_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            flush_debounce_ms: 500,
            max_command_len: crate::command::MAX_COMMAND_LEN,
            status_publish_interval_ms: 60_000,
            reset_hold_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortalConfig {
    pub ap_ssid: String,
    pub ap_password: String,
    pub portal_ip: [u8; 4],
    pub dns_port: u16,
    pub http_port: u16,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            ap_ssid: "AirconGateway-Setup".to_string(),
            ap_password: "espaircon".to_string(),
            portal_ip: [192, 168, 4, 1],
            dns_port: 53,
            http_port: 80,
        }
    }
}

impl PortalConfig {
    pub fn portal_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.portal_ip)
    }
}

/// The persisted settings record. Every field is length-bounded and absent
/// values are empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    #[serde(deserialize_with = "lenient_string")]
    pub mqtt_host: String,
    #[serde(deserialize_with = "lenient_string")]
    pub mqtt_port: String,
    #[serde(deserialize_with = "lenient_string")]
    pub mqtt_username: String,
    #[serde(deserialize_with = "lenient_string")]
    pub mqtt_password: String,
    #[serde(deserialize_with = "lenient_string")]
    pub mqtt_topic_prefix: String,
    #[serde(deserialize_with = "lenient_string")]
    pub syslog_host: String,
    #[serde(deserialize_with = "lenient_string")]
    pub syslog_port: String,
    #[serde(deserialize_with = "lenient_string")]
    pub syslog_device_hostname: String,
    #[serde(deserialize_with = "lenient_string")]
    pub syslog_app_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub syslog_log_level: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            mqtt_host: String::new(),
            mqtt_port: "1883".to_string(),
            mqtt_username: String::new(),
            mqtt_password: String::new(),
            mqtt_topic_prefix: "esp-ac".to_string(),
            syslog_host: String::new(),
            syslog_port: "514".to_string(),
            syslog_device_hostname: String::new(),
            syslog_app_name: "esp-aircon".to_string(),
            syslog_log_level: "info".to_string(),
        }
    }
}

impl GatewaySettings {
    /// Keys absent from `raw` keep their default values.
    pub fn from_json(raw: &[u8]) -> Result<Self, SettingsError> {
        let mut settings = serde_json::from_slice::<GatewaySettings>(raw)?;
        settings.sanitize();
        Ok(settings)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, SettingsError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn sanitize(&mut self) {
        truncate_bytes(&mut self.mqtt_host, MAX_LENGTH_MQTT_HOST);
        truncate_bytes(&mut self.mqtt_port, MAX_LENGTH_MQTT_PORT);
        truncate_bytes(&mut self.mqtt_username, MAX_LENGTH_MQTT_USERNAME);
        truncate_bytes(&mut self.mqtt_password, MAX_LENGTH_MQTT_PASSWORD);
        truncate_bytes(&mut self.mqtt_topic_prefix, MAX_LENGTH_MQTT_TOPIC_PREFIX);
        truncate_bytes(&mut self.syslog_host, MAX_LENGTH_SYSLOG_HOST);
        truncate_bytes(&mut self.syslog_port, MAX_LENGTH_SYSLOG_PORT);
        truncate_bytes(
            &mut self.syslog_device_hostname,
            MAX_LENGTH_SYSLOG_DEVICE_HOSTNAME,
        );
        truncate_bytes(&mut self.syslog_app_name, MAX_LENGTH_SYSLOG_APP_NAME);
        truncate_bytes(&mut self.syslog_log_level, MAX_LENGTH_SYSLOG_LOG_LEVEL);
    }

    pub fn mqtt_port_number(&self) -> Option<u16> {
        parse_port(&self.mqtt_port)
    }

    pub fn has_broker(&self) -> bool {
        !self.mqtt_host.trim().is_empty()
    }
}

pub fn parse_port(value: &str) -> Option<u16> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse::<u16>().ok().filter(|port| *port > 0)
}

/// Cuts `value` to at most `max_len` bytes without splitting a character.
pub fn truncate_bytes(value: &mut String, max_len: usize) {
    if value.len() <= max_len {
        return;
    }
    let mut end = max_len;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value.truncate(end);
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(text) => text,
        serde_json::Value::Number(number) => number.to_string(),
        serde_json::Value::Bool(flag) => flag.to_string(),
        _ => String::new(),
    })
}
