use crate::{
    appliance::{ApplianceAdapter, ApplianceError, ApplianceEvent},
    command::{normalize_payload, parse_command, SettingChange},
    config::BridgeConfig,
    topics::{Dimension, TopicSet},
    types::{format_temperature, ApplianceSettings, GatewayStatus, Publication, Qos},
};

pub const AVAILABILITY_ONLINE: &str = "online";
pub const AVAILABILITY_OFFLINE: &str = "offline";

/// Write-cycle state shared by all five dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    PendingFlush { last_command_ms: u64 },
    Flushing,
}

impl SyncState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::PendingFlush { .. } => "PENDING_FLUSH",
            Self::Flushing => "FLUSHING",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BridgeAction {
    Subscribe { topic: String, qos: Qos },
    Publish(Publication),
    Flushed,
    FlushFailed(ApplianceError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Ignored,
    Rejected { dimension: Dimension, value: String },
    Staged(SettingChange),
}

#[derive(Debug, Clone)]
pub struct BootInfo {
    pub firmware: String,
    pub version: String,
    pub appliance: String,
    pub topic_prefix: String,
    pub booted_at: String,
}

impl BootInfo {
    pub fn render(&self) -> String {
        format!(
            "{} {} booted at {}; appliance={}, prefix={}",
            self.firmware, self.version, self.booted_at, self.appliance, self.topic_prefix
        )
    }
}

#[derive(Debug, Clone, Default)]
struct BridgeStats {
    accepted: u64,
    rejected: u64,
    flushes: u64,
    failed_flushes: u64,
    last_flush_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CommandBridge {
    pub config: BridgeConfig,
    topics: TopicSet,
    boot: BootInfo,

    sync: SyncState,
    connected: bool,
    boot_diagnostics_sent: bool,

    started_ms: u64,
    last_status_publish_ms: Option<u64>,

    stats: BridgeStats,
}

impl CommandBridge {
    pub fn new(config: BridgeConfig, topics: TopicSet, boot: BootInfo, now_ms: u64) -> Self {
        Self {
            config,
            topics,
            boot,
            sync: SyncState::Idle,
            connected: false,
            boot_diagnostics_sent: false,
            started_ms: now_ms,
            last_status_publish_ms: None,
            stats: BridgeStats::default(),
        }
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync
    }

    pub fn has_pending_flush(&self) -> bool {
        matches!(self.sync, SyncState::PendingFlush { .. })
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Subscriptions and announcements for a fresh broker session.
    pub fn on_connected(&mut self, now_ms: u64) -> Vec<BridgeAction> {
        self.connected = true;

        let mut actions: Vec<BridgeAction> = self
            .topics
            .command_topics()
            .map(|topic| BridgeAction::Subscribe {
                topic: topic.to_string(),
                qos: Qos::AtMostOnce,
            })
            .collect();

        actions.push(BridgeAction::Publish(Publication {
            topic: self.topics.availability.clone(),
            payload: AVAILABILITY_ONLINE.to_string(),
            qos: Qos::AtLeastOnce,
            retain: true,
        }));

        if !self.boot_diagnostics_sent {
            self.boot_diagnostics_sent = true;
            actions.push(BridgeAction::Publish(Publication {
                topic: self.topics.info.clone(),
                payload: self.boot.render(),
                qos: Qos::AtMostOnce,
                retain: false,
            }));
        }

        self.last_status_publish_ms = Some(now_ms);
        actions
    }

    pub fn on_disconnected(&mut self) {
        self.connected = false;
    }

    pub fn handle_message<A: ApplianceAdapter>(
        &mut self,
        adapter: &mut A,
        topic: &str,
        payload: &[u8],
        now_ms: u64,
    ) -> CommandOutcome {
        let Some(dimension) = self.topics.match_command(topic) else {
            return CommandOutcome::Ignored;
        };

        let normalized =
            normalize_payload(payload, self.config.max_command_len).unwrap_or_default();
        let Some(change) = parse_command(dimension, &normalized) else {
            self.stats.rejected = self.stats.rejected.saturating_add(1);
            return CommandOutcome::Rejected {
                dimension,
                value: normalized,
            };
        };

        adapter.stage(change);
        self.stats.accepted = self.stats.accepted.saturating_add(1);
        self.sync = SyncState::PendingFlush {
            last_command_ms: now_ms,
        };

        CommandOutcome::Staged(change)
    }

    pub fn tick<A: ApplianceAdapter>(&mut self, adapter: &mut A, now_ms: u64) -> Vec<BridgeAction> {
        let mut actions = Vec::new();

        self.flush_if_quiescent(adapter, now_ms, &mut actions);
        self.publish_status_if_due(now_ms, &mut actions);

        actions
    }

    pub fn on_appliance_event<A: ApplianceAdapter>(
        &mut self,
        adapter: &A,
        event: ApplianceEvent,
    ) -> Vec<BridgeAction> {
        match event {
            ApplianceEvent::SettingsChanged => {
                if self.sync == SyncState::Flushing {
                    self.sync = SyncState::Idle;
                }
                self.settings_publications(&adapter.settings())
                    .into_iter()
                    .map(BridgeAction::Publish)
                    .collect()
            }
            ApplianceEvent::StatusChanged(status) => format_temperature(status.room_temperature)
                .map(|temperature| {
                    BridgeAction::Publish(Publication::retained(
                        &self.topics.current_temperature_state,
                        temperature,
                    ))
                })
                .into_iter()
                .collect(),
        }
    }

    pub fn status(&self, now_ms: u64) -> GatewayStatus {
        GatewayStatus {
            uptime_ms: now_ms.saturating_sub(self.started_ms),
            sync_state: self.sync.as_str(),
            pending_flush: self.has_pending_flush(),
            accepted_commands: self.stats.accepted,
            rejected_commands: self.stats.rejected,
            flushes: self.stats.flushes,
            failed_flushes: self.stats.failed_flushes,
            last_flush_error: self.stats.last_flush_error.clone(),
        }
    }

    fn flush_if_quiescent<A: ApplianceAdapter>(
        &mut self,
        adapter: &mut A,
        now_ms: u64,
        actions: &mut Vec<BridgeAction>,
    ) {
        let SyncState::PendingFlush { last_command_ms } = self.sync else {
            return;
        };
        if now_ms.saturating_sub(last_command_ms) < self.config.flush_debounce_ms {
            return;
        }

        self.sync = SyncState::Flushing;
        match adapter.commit() {
            Ok(()) => {
                self.stats.flushes = self.stats.flushes.saturating_add(1);
                self.stats.last_flush_error = None;
                actions.push(BridgeAction::Flushed);
            }
            Err(err) => {
                // Staged values stay with the adapter; try again after another quiet window.
                self.sync = SyncState::PendingFlush {
                    last_command_ms: now_ms,
                };
                self.stats.failed_flushes = self.stats.failed_flushes.saturating_add(1);
                self.stats.last_flush_error = Some(err.to_string());
                actions.push(BridgeAction::FlushFailed(err));
            }
        }
    }

    fn publish_status_if_due(&mut self, now_ms: u64, actions: &mut Vec<BridgeAction>) {
        if !self.connected {
            return;
        }
        if let Some(last) = self.last_status_publish_ms {
            if now_ms.saturating_sub(last) < self.config.status_publish_interval_ms {
                return;
            }
        }
        self.last_status_publish_ms = Some(now_ms);

        if let Ok(body) = serde_json::to_string(&self.status(now_ms)) {
            actions.push(BridgeAction::Publish(Publication {
                topic: self.topics.info.clone(),
                payload: body,
                qos: Qos::AtMostOnce,
                retain: false,
            }));
        }
    }

    fn settings_publications(&self, settings: &ApplianceSettings) -> Vec<Publication> {
        let mut publications = vec![
            Publication::retained(
                self.topics.state(Dimension::Power),
                settings.power.as_str(),
            ),
            Publication::retained(
                self.topics.state(Dimension::Mode),
                settings.effective_mode(),
            ),
        ];
        if let Some(temperature) = format_temperature(settings.temperature) {
            publications.push(Publication::retained(
                self.topics.state(Dimension::Temperature),
                temperature,
            ));
        }
        publications.push(Publication::retained(
            self.topics.state(Dimension::Fan),
            settings.fan.as_str(),
        ));
        publications.push(Publication::retained(
            self.topics.state(Dimension::Vane),
            settings.vane.as_str(),
        ));
        publications
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::{ApplianceStatus, FanSpeed, Mode, Power, VanePosition};

    #[derive(Debug, Default)]
    struct FakeAppliance {
        current: ApplianceSettings,
        staged: ApplianceSettings,
        staged_changes: Vec<SettingChange>,
        commits: u32,
        fail_commits: bool,
        events: Vec<ApplianceEvent>,
    }

    impl ApplianceAdapter for FakeAppliance {
        fn settings(&self) -> ApplianceSettings {
            self.current
        }

        fn staged(&self) -> ApplianceSettings {
            self.staged
        }

        fn stage(&mut self, change: SettingChange) {
            self.staged_changes.push(change);
            match change {
                SettingChange::Power(power) => self.staged.power = power,
                SettingChange::Mode(mode) => self.staged.mode = mode,
                SettingChange::Temperature(temperature) => self.staged.temperature = temperature,
                SettingChange::Fan(fan) => self.staged.fan = fan,
                SettingChange::Vane(vane) => self.staged.vane = vane,
            }
        }

        fn commit(&mut self) -> Result<(), ApplianceError> {
            if self.fail_commits {
                return Err(ApplianceError::Unavailable);
            }
            self.commits += 1;
            self.current = self.staged;
            self.events.push(ApplianceEvent::SettingsChanged);
            Ok(())
        }

        fn poll_events(&mut self, _now_ms: u64) -> Vec<ApplianceEvent> {
            std::mem::take(&mut self.events)
        }

        fn backend_name(&self) -> &'static str {
            "fake"
        }
    }

    fn bridge() -> CommandBridge {
        CommandBridge::new(
            BridgeConfig::default(),
            TopicSet::new("ac"),
            BootInfo {
                firmware: "aircon-gateway".to_string(),
                version: "0.1.0".to_string(),
                appliance: "fake".to_string(),
                topic_prefix: "ac".to_string(),
                booted_at: "2024-01-01T00:00:00Z".to_string(),
            },
            0,
        )
    }

    fn publications(actions: &[BridgeAction]) -> Vec<(String, String)> {
        actions
            .iter()
            .filter_map(|action| match action {
                BridgeAction::Publish(publication) => {
                    Some((publication.topic.clone(), publication.payload.clone()))
                }
                _ => None,
            })
            .collect()
    }

    fn run_ticks(
        bridge: &mut CommandBridge,
        appliance: &mut FakeAppliance,
        from_ms: u64,
        to_ms: u64,
    ) -> Vec<u64> {
        let mut flushed_at = Vec::new();
        for now_ms in (from_ms..=to_ms).step_by(50) {
            let actions = bridge.tick(appliance, now_ms);
            if actions.contains(&BridgeAction::Flushed) {
                flushed_at.push(now_ms);
            }
        }
        flushed_at
    }

    #[test]
    fn burst_of_commands_flushes_once_after_quiet_window() {
        let mut bridge = bridge();
        let mut appliance = FakeAppliance::default();

        for (now_ms, value) in [(0, "20"), (100, "21"), (200, "22"), (300, "23")] {
            bridge.handle_message(&mut appliance, "ac/temperature/set", value.as_bytes(), now_ms);
            assert_eq!(run_ticks(&mut bridge, &mut appliance, now_ms, now_ms + 99), Vec::<u64>::new());
        }

        let flushed_at = run_ticks(&mut bridge, &mut appliance, 400, 2_000);
        assert_eq!(flushed_at, vec![800]);
        assert_eq!(appliance.commits, 1);
        assert_eq!(appliance.current.temperature, 23.0);
    }

    #[test]
    fn debounce_is_shared_across_dimensions() {
        let mut bridge = bridge();
        let mut appliance = FakeAppliance::default();

        bridge.handle_message(&mut appliance, "ac/power/set", b"on", 0);
        assert_eq!(run_ticks(&mut bridge, &mut appliance, 0, 400), Vec::<u64>::new());
        bridge.handle_message(&mut appliance, "ac/mode/set", b"cool", 400);

        assert_eq!(run_ticks(&mut bridge, &mut appliance, 450, 3_000), vec![900]);
        assert_eq!(appliance.current.power, Power::On);
        assert_eq!(appliance.current.mode, Mode::Cool);
    }

    #[test]
    fn staging_is_visible_before_flush() {
        let mut bridge = bridge();
        let mut appliance = FakeAppliance::default();

        bridge.handle_message(&mut appliance, "ac/fan/set", b"quiet", 10);

        assert_eq!(appliance.staged().fan, FanSpeed::Quiet);
        assert_eq!(appliance.settings().fan, FanSpeed::Auto);
        assert_eq!(bridge.sync_state(), SyncState::PendingFlush { last_command_ms: 10 });
        assert!(bridge.has_pending_flush());
    }

    #[test]
    fn invalid_payloads_never_reach_appliance() {
        let mut bridge = bridge();
        let mut appliance = FakeAppliance::default();

        let rejected = [
            ("ac/power/set", "maybe"),
            ("ac/mode/set", "off"),
            ("ac/temperature/set", "31"),
            ("ac/temperature/set", "15"),
            ("ac/fan/set", "5"),
            ("ac/vane/set", "0"),
            ("ac/vane/set", ""),
        ];
        for (topic, payload) in rejected {
            let outcome = bridge.handle_message(&mut appliance, topic, payload.as_bytes(), 0);
            assert!(matches!(outcome, CommandOutcome::Rejected { .. }), "{topic} {payload}");
        }

        assert!(appliance.staged_changes.is_empty());
        assert_eq!(bridge.sync_state(), SyncState::Idle);
        assert_eq!(bridge.status(0).rejected_commands, 7);
    }

    #[test]
    fn unmatched_topics_are_ignored() {
        let mut bridge = bridge();
        let mut appliance = FakeAppliance::default();

        assert_eq!(
            bridge.handle_message(&mut appliance, "ac/power/state", b"ON", 0),
            CommandOutcome::Ignored
        );
        assert_eq!(
            bridge.handle_message(&mut appliance, "other/power/set", b"ON", 0),
            CommandOutcome::Ignored
        );
        assert!(appliance.staged_changes.is_empty());
        assert_eq!(bridge.status(0).rejected_commands, 0);
    }

    #[test]
    fn oversized_payload_is_truncated_before_validation() {
        let mut bridge = bridge();
        let mut appliance = FakeAppliance::default();

        let outcome = bridge.handle_message(&mut appliance, "ac/vane/set", b"swinging-wildly", 0);

        assert_eq!(outcome, CommandOutcome::Staged(SettingChange::Vane(VanePosition::Swing)));
    }

    #[test]
    fn temperature_command_publishes_rounded_state_after_flush() {
        let mut bridge = bridge();
        let mut appliance = FakeAppliance::default();

        let outcome = bridge.handle_message(&mut appliance, "ac/temperature/set", b"25.5", 0);
        assert_eq!(outcome, CommandOutcome::Staged(SettingChange::Temperature(25.5)));
        assert_eq!(appliance.staged().temperature, 25.5);

        run_ticks(&mut bridge, &mut appliance, 0, 600);
        assert_eq!(bridge.sync_state(), SyncState::Flushing);

        let mut published = Vec::new();
        for event in appliance.poll_events(600) {
            published.extend(publications(&bridge.on_appliance_event(&appliance, event)));
        }

        assert!(published.contains(&("ac/temperature/state".to_string(), " 26".to_string())));
        assert_eq!(bridge.sync_state(), SyncState::Idle);
    }

    #[test]
    fn settings_changed_publishes_every_dimension() {
        let mut bridge = bridge();
        let appliance = FakeAppliance {
            current: ApplianceSettings {
                power: Power::On,
                mode: Mode::Heat,
                temperature: 22.0,
                fan: FanSpeed::Speed3,
                vane: VanePosition::Swing,
            },
            ..FakeAppliance::default()
        };

        let actions = bridge.on_appliance_event(&appliance, ApplianceEvent::SettingsChanged);

        assert_eq!(
            publications(&actions),
            vec![
                ("ac/power/state".to_string(), "ON".to_string()),
                ("ac/mode/state".to_string(), "HEAT".to_string()),
                ("ac/temperature/state".to_string(), " 22".to_string()),
                ("ac/fan/state".to_string(), "3".to_string()),
                ("ac/vane/state".to_string(), "SWING".to_string()),
            ]
        );
        assert!(actions.iter().all(|action| matches!(
            action,
            BridgeAction::Publish(Publication { retain: true, qos: Qos::AtMostOnce, .. })
        )));
    }

    #[test]
    fn powered_off_unit_publishes_off_mode() {
        let mut bridge = bridge();
        let appliance = FakeAppliance {
            current: ApplianceSettings {
                power: Power::Off,
                mode: Mode::Cool,
                ..ApplianceSettings::default()
            },
            ..FakeAppliance::default()
        };

        let actions = bridge.on_appliance_event(&appliance, ApplianceEvent::SettingsChanged);

        assert!(publications(&actions).contains(&("ac/mode/state".to_string(), "OFF".to_string())));
    }

    #[test]
    fn status_changed_publishes_room_temperature() {
        let mut bridge = bridge();
        let appliance = FakeAppliance::default();

        let actions = bridge.on_appliance_event(
            &appliance,
            ApplianceEvent::StatusChanged(ApplianceStatus {
                room_temperature: 19.4,
            }),
        );

        assert_eq!(
            actions,
            vec![BridgeAction::Publish(Publication::retained(
                "ac/current_temperature/state",
                " 19"
            ))]
        );
    }

    #[test]
    fn connect_subscribes_then_announces_and_sends_diagnostics_once() {
        let mut bridge = bridge();

        let actions = bridge.on_connected(0);

        let subscriptions: Vec<&str> = actions
            .iter()
            .filter_map(|action| match action {
                BridgeAction::Subscribe { topic, qos } => {
                    assert_eq!(*qos, Qos::AtMostOnce);
                    Some(topic.as_str())
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            subscriptions,
            vec!["ac/power/set", "ac/mode/set", "ac/temperature/set", "ac/fan/set", "ac/vane/set"]
        );
        assert_eq!(
            actions[5],
            BridgeAction::Publish(Publication {
                topic: "ac/availability".to_string(),
                payload: "online".to_string(),
                qos: Qos::AtLeastOnce,
                retain: true,
            })
        );
        assert!(matches!(
            &actions[6],
            BridgeAction::Publish(Publication { topic, retain: false, .. }) if topic == "ac/info"
        ));

        bridge.on_disconnected();
        let reconnect = bridge.on_connected(5_000);
        assert_eq!(reconnect.len(), 6);
    }

    #[test]
    fn failed_flush_is_retried_after_another_quiet_window() {
        let mut bridge = bridge();
        let mut appliance = FakeAppliance {
            fail_commits: true,
            ..FakeAppliance::default()
        };

        bridge.handle_message(&mut appliance, "ac/power/set", b"ON", 0);
        let actions = bridge.tick(&mut appliance, 500);
        assert_eq!(actions, vec![BridgeAction::FlushFailed(ApplianceError::Unavailable)]);
        assert_eq!(bridge.sync_state(), SyncState::PendingFlush { last_command_ms: 500 });

        appliance.fail_commits = false;
        assert!(bridge.tick(&mut appliance, 900).is_empty());
        assert_eq!(bridge.tick(&mut appliance, 1_000), vec![BridgeAction::Flushed]);

        let status = bridge.status(1_000);
        assert_eq!(status.flushes, 1);
        assert_eq!(status.failed_flushes, 1);
        assert_eq!(status.last_flush_error, None);
    }

    #[test]
    fn command_during_flush_rearms_pending_state() {
        let mut bridge = bridge();
        let mut appliance = FakeAppliance::default();

        bridge.handle_message(&mut appliance, "ac/power/set", b"ON", 0);
        bridge.tick(&mut appliance, 500);
        assert_eq!(bridge.sync_state(), SyncState::Flushing);

        bridge.handle_message(&mut appliance, "ac/fan/set", b"2", 520);
        assert_eq!(bridge.sync_state(), SyncState::PendingFlush { last_command_ms: 520 });

        // A late settings callback from the first write must not clear the new intent.
        bridge.on_appliance_event(&appliance, ApplianceEvent::SettingsChanged);
        assert!(bridge.has_pending_flush());
    }

    #[test]
    fn periodic_status_only_while_connected() {
        let mut bridge = bridge();
        let mut appliance = FakeAppliance::default();

        assert!(bridge.tick(&mut appliance, 120_000).is_empty());

        bridge.on_connected(120_000);
        assert!(bridge.tick(&mut appliance, 150_000).is_empty());

        let actions = bridge.tick(&mut appliance, 180_000);
        let published = publications(&actions);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "ac/info");
        assert!(published[0].1.contains("\"syncState\":\"IDLE\""));
        assert!(published[0].1.contains("\"uptimeMs\":180000"));

        bridge.on_disconnected();
        assert!(bridge.tick(&mut appliance, 400_000).is_empty());
    }
}
