use thiserror::Error;

use crate::{
    command::SettingChange,
    types::{ApplianceSettings, ApplianceStatus},
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApplianceError {
    #[error("appliance is not connected")]
    Unavailable,
}

/// Change notifications raised by the appliance driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ApplianceEvent {
    SettingsChanged,
    StatusChanged(ApplianceStatus),
}

/// Boundary to the appliance transport driver.
///
/// `stage` only touches the driver's staging copy; nothing reaches the unit
/// until `commit` writes every staged setting in one cycle. The driver reports
/// committed or unsolicited changes through `poll_events`.
pub trait ApplianceAdapter {
    /// Settings last reported by the unit.
    fn settings(&self) -> ApplianceSettings;

    /// Settings that the next commit will write.
    fn staged(&self) -> ApplianceSettings;

    fn stage(&mut self, change: SettingChange);

    fn commit(&mut self) -> Result<(), ApplianceError>;

    fn poll_events(&mut self, now_ms: u64) -> Vec<ApplianceEvent>;

    fn backend_name(&self) -> &'static str;
}
