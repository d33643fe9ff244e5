use tracing::info;

use aircon_common::{
    ApplianceAdapter, ApplianceError, ApplianceEvent, ApplianceSettings, ApplianceStatus, Mode,
    Power, SettingChange,
};

const DRIFT_INTERVAL_MS: u64 = 30_000;
const DRIFT_STEP_C: f32 = 0.5;
const AMBIENT_C: f32 = 26.0;

/// Host stand-in for the serial heat-pump driver.
///
/// Writes land immediately and are acknowledged with a settings-changed
/// event. The room temperature creeps toward the target while the unit runs
/// and back toward ambient while it is off.
#[derive(Debug)]
pub struct SimulatedHeatPump {
    current: ApplianceSettings,
    staged: ApplianceSettings,
    room_temperature: f32,
    last_drift_ms: u64,
    events: Vec<ApplianceEvent>,
}

impl SimulatedHeatPump {
    pub fn new(now_ms: u64) -> Self {
        let current = ApplianceSettings::default();
        let room_temperature = AMBIENT_C;
        Self {
            current,
            staged: current,
            room_temperature,
            last_drift_ms: now_ms,
            // A freshly connected unit reports its full state once.
            events: vec![
                ApplianceEvent::SettingsChanged,
                ApplianceEvent::StatusChanged(ApplianceStatus { room_temperature }),
            ],
        }
    }

    fn drift(&mut self) -> bool {
        let previous = self.room_temperature;
        let target = match self.current.power {
            Power::Off => AMBIENT_C,
            Power::On => match self.current.mode {
                Mode::Heat => self.current.temperature.max(previous),
                Mode::Cool | Mode::Dry => self.current.temperature.min(previous),
                Mode::Auto => self.current.temperature,
                Mode::Fan => previous,
            },
        };

        let delta = (target - previous).clamp(-DRIFT_STEP_C, DRIFT_STEP_C);
        self.room_temperature = previous + delta;
        delta != 0.0
    }
}

impl ApplianceAdapter for SimulatedHeatPump {
    fn settings(&self) -> ApplianceSettings {
        self.current
    }

    fn staged(&self) -> ApplianceSettings {
        self.staged
    }

    fn stage(&mut self, change: SettingChange) {
        match change {
            SettingChange::Power(power) => self.staged.power = power,
            SettingChange::Mode(mode) => self.staged.mode = mode,
            SettingChange::Temperature(temperature) => self.staged.temperature = temperature,
            SettingChange::Fan(fan) => self.staged.fan = fan,
            SettingChange::Vane(vane) => self.staged.vane = vane,
        }
    }

    fn commit(&mut self) -> Result<(), ApplianceError> {
        let settings = self.staged;
        info!(
            "heat pump write: power={} mode={} temperature={} fan={} vane={}",
            settings.power.as_str(),
            settings.mode.as_str(),
            settings.temperature,
            settings.fan.as_str(),
            settings.vane.as_str()
        );
        self.current = settings;
        self.events.push(ApplianceEvent::SettingsChanged);
        Ok(())
    }

    fn poll_events(&mut self, now_ms: u64) -> Vec<ApplianceEvent> {
        if now_ms.saturating_sub(self.last_drift_ms) >= DRIFT_INTERVAL_MS {
            self.last_drift_ms = now_ms;
            if self.drift() {
                self.events.push(ApplianceEvent::StatusChanged(ApplianceStatus {
                    room_temperature: self.room_temperature,
                }));
            }
        }
        std::mem::take(&mut self.events)
    }

    fn backend_name(&self) -> &'static str {
        "simulated-heat-pump"
    }
}
