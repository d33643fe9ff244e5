use std::{io::ErrorKind, path::PathBuf, sync::Arc};

use anyhow::Context;
use tokio::sync::Mutex;
use tracing::warn;

use aircon_common::GatewaySettings;

const SETTINGS_FILE: &str = "config.json";

/// Settings record persisted as one JSON file under the data directory.
#[derive(Clone)]
pub struct SettingsStore {
    settings_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl SettingsStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            settings_path: Arc::new(data_dir.join(SETTINGS_FILE)),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &PathBuf {
        self.settings_path.as_ref()
    }

    /// Missing or unreadable files fall back to defaults.
    pub async fn load(&self) -> GatewaySettings {
        match self.try_load().await {
            Ok(Some(settings)) => settings,
            Ok(None) => GatewaySettings::default(),
            Err(err) => {
                warn!("failed to load settings from store: {err:#}");
                GatewaySettings::default()
            }
        }
    }

    async fn try_load(&self) -> anyhow::Result<Option<GatewaySettings>> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.settings_path.as_ref()).await {
            Ok(raw) => Ok(Some(GatewaySettings::from_json(&raw).with_context(|| {
                format!("invalid settings file {}", self.settings_path.display())
            })?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn save(&self, settings: &GatewaySettings) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.settings_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = settings.to_json()?;
        tokio::fs::write(&path, payload)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    pub async fn erase(&self) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        match tokio::fs::remove_file(self.settings_path.as_ref()).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().to_path_buf());

        assert_eq!(store.load().await, GatewaySettings::default());
    }

    #[tokio::test]
    async fn saved_settings_are_loaded_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("nested"));

        let settings = GatewaySettings {
            mqtt_host: "broker.lan".to_string(),
            mqtt_password: "hunter2".to_string(),
            mqtt_topic_prefix: "hall/ac".to_string(),
            ..GatewaySettings::default()
        };
        store.save(&settings).await.unwrap();

        assert_eq!(store.load().await, settings);
    }

    #[tokio::test]
    async fn corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().to_path_buf());
        tokio::fs::write(store.path(), b"{\"mqtt_host\": ").await.unwrap();

        assert_eq!(store.load().await, GatewaySettings::default());
    }

    #[tokio::test]
    async fn partial_file_keeps_defaults_for_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().to_path_buf());
        tokio::fs::write(store.path(), br#"{"mqtt_host":"10.0.0.2"}"#)
            .await
            .unwrap();

        let settings = store.load().await;
        assert_eq!(settings.mqtt_host, "10.0.0.2");
        assert_eq!(settings.mqtt_port, "1883");
        assert_eq!(settings.mqtt_topic_prefix, "esp-ac");
    }

    #[tokio::test]
    async fn erase_removes_file_and_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().to_path_buf());
        store.save(&GatewaySettings::default()).await.unwrap();

        store.erase().await.unwrap();
        assert!(!store.path().exists());
        store.erase().await.unwrap();
    }
}
