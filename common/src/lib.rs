pub mod appliance;
pub mod bridge;
pub mod button;
pub mod command;
pub mod config;
pub mod dns;
pub mod topics;
pub mod types;

pub use appliance::{ApplianceAdapter, ApplianceError, ApplianceEvent};
pub use bridge::{BootInfo, BridgeAction, CommandBridge, CommandOutcome, SyncState};
pub use button::ResetButton;
pub use command::SettingChange;
pub use config::{BridgeConfig, GatewaySettings, PortalConfig, SettingsError};
pub use topics::{Dimension, TopicSet};
pub use types::{
    ApplianceSettings, ApplianceStatus, FanSpeed, GatewayStatus, Mode, Power, Publication, Qos,
    VanePosition,
};
