use std::{
    future::Future,
    net::Ipv4Addr,
    path::{Path, PathBuf},
    str::FromStr,
    sync::OnceLock,
    time::{Duration, Instant},
};

use chrono::{SecondsFormat, Utc};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, Outgoing, QoS};
use tokio::{sync::mpsc, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use aircon_common::{
    bridge::AVAILABILITY_OFFLINE, ApplianceAdapter, BootInfo, BridgeAction, BridgeConfig,
    CommandBridge, CommandOutcome, GatewaySettings, PortalConfig, Qos, ResetButton, TopicSet,
};

use crate::{appliance::SimulatedHeatPump, provisioning, store::SettingsStore};

const DEFAULT_MQTT_PORT: u16 = 1883;
const MQTT_KEEP_ALIVE_SECS: u64 = 15;
const MQTT_REQUEST_CAPACITY: usize = 64;
const MQTT_RETRY_DELAY: Duration = Duration::from_secs(2);
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);
const TICK_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
struct HostConfig {
    data_dir: PathBuf,
    portal: PortalConfig,
    bridge: BridgeConfig,
    reset_input: Option<PathBuf>,
    force_provisioning: bool,
}

impl HostConfig {
    fn from_env() -> Self {
        let mut portal = PortalConfig::default();
        if let Some(ip) = env_parse::<Ipv4Addr>("AIRCON_PORTAL_IP") {
            apply_portal_ip(&mut portal, ip);
        }
        if let Some(port) = env_parse::<u16>("AIRCON_PORTAL_DNS_PORT") {
            portal.dns_port = port;
        }
        if let Some(port) = env_parse::<u16>("AIRCON_PORTAL_HTTP_PORT") {
            portal.http_port = port;
        }
        if let Ok(ssid) = std::env::var("AIRCON_AP_SSID") {
            portal.ap_ssid = ssid;
        }
        if let Ok(password) = std::env::var("AIRCON_AP_PASSWORD") {
            portal.ap_password = password;
        }

        Self {
            data_dir: std::env::var("AIRCON_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./.aircon")),
            portal,
            bridge: BridgeConfig::default(),
            reset_input: std::env::var("AIRCON_RESET_INPUT").ok().map(PathBuf::from),
            force_provisioning: env_parse::<bool>("AIRCON_FORCE_PROVISIONING").unwrap_or(false),
        }
    }
}

/// The portal address doubles as the DNS answer, so it must be routable.
fn apply_portal_ip(portal: &mut PortalConfig, ip: Ipv4Addr) {
    if ip.is_unspecified() {
        warn!(
            "ignoring unspecified AIRCON_PORTAL_IP; keeping {}",
            portal.portal_addr()
        );
        return;
    }
    portal.portal_ip = ip.octets();
}

#[derive(Debug, PartialEq)]
enum SessionEnd {
    FactoryReset,
    Shutdown,
}

/// What the session loop sees of the MQTT event loop.
#[derive(Debug)]
enum MqttEvent {
    Connected,
    Message { topic: String, payload: Vec<u8> },
    Disconnected,
    Closed,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = HostConfig::from_env();
    let store = SettingsStore::new(config.data_dir.clone());
    let mut force_portal = config.force_provisioning;

    loop {
        let Some(settings) =
            provisioning::resolve_settings(&store, &config.portal, force_portal).await?
        else {
            return Ok(());
        };
        force_portal = false;

        let shutdown = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for ctrl-c: {err}");
                std::future::pending::<()>().await;
            }
        };
        let end = run_session(&config, settings, shutdown).await?;
        if end == SessionEnd::FactoryReset {
            warn!("factory reset requested; erasing stored settings");
            if let Err(err) = store.erase().await {
                warn!("failed to erase settings: {err:#}");
            }
        }
        match next_boot(&end) {
            Some(forced) => force_portal = forced,
            None => {
                info!("gateway stopped");
                return Ok(());
            }
        }
    }
}

/// `None` stops the gateway; otherwise whether the next boot must go
/// through the portal. A reset always does, even if the old settings file
/// survived the erase.
fn next_boot(end: &SessionEnd) -> Option<bool> {
    match end {
        SessionEnd::Shutdown => None,
        SessionEnd::FactoryReset => Some(true),
    }
}

async fn run_session(
    config: &HostConfig,
    settings: GatewaySettings,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<SessionEnd> {
    let mut appliance = SimulatedHeatPump::new(monotonic_ms());
    let topics = TopicSet::new(&settings.mqtt_topic_prefix);
    let boot = BootInfo {
        firmware: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        appliance: appliance.backend_name().to_string(),
        topic_prefix: settings.mqtt_topic_prefix.clone(),
        booted_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    };
    let mut bridge = CommandBridge::new(config.bridge.clone(), topics, boot, monotonic_ms());
    let mut reset_button = ResetButton::new(config.bridge.reset_hold_ms);

    let options = mqtt_options(&settings, bridge.topics());
    let (host, port) = options.broker_address();
    info!(
        "bridging {} to mqtt://{host}:{port} under `{}`",
        appliance.backend_name(),
        settings.mqtt_topic_prefix
    );
    let (mqtt, eventloop) = AsyncClient::new(options, MQTT_REQUEST_CAPACITY);
    let (event_tx, mut events) = mpsc::channel(MQTT_REQUEST_CAPACITY);
    let mqtt_task = spawn_mqtt_loop(eventloop, event_tx);

    let mut interval = tokio::time::interval(TICK_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let end = loop {
        tokio::select! {
            Some(event) = events.recv() => match event {
                MqttEvent::Connected => {
                    info!("mqtt connected");
                    execute_bridge_actions(&mqtt, bridge.on_connected(monotonic_ms()));
                }
                MqttEvent::Message { topic, payload } => {
                    handle_mqtt_message(&mut bridge, &mut appliance, &topic, &payload);
                }
                MqttEvent::Disconnected | MqttEvent::Closed => bridge.on_disconnected(),
            },
            _ = interval.tick() => {
                let now_ms = monotonic_ms();
                execute_bridge_actions(&mqtt, bridge.tick(&mut appliance, now_ms));
                for event in appliance.poll_events(now_ms) {
                    execute_bridge_actions(&mqtt, bridge.on_appliance_event(&appliance, event));
                }

                let pressed = read_reset_input(config.reset_input.as_deref()).await;
                if reset_button.update(pressed, now_ms) {
                    break SessionEnd::FactoryReset;
                }
            }
            _ = &mut shutdown => {
                info!("shutdown requested");
                break SessionEnd::Shutdown;
            }
        }
    };

    close_session(&mqtt, &mut events, &bridge).await;
    mqtt_task.abort();
    Ok(end)
}

/// Drives the rumqttc event loop on its own task so reconnect backoff never
/// stalls the tick loop. Returns once the client's disconnect goes out or
/// the session stops listening.
fn spawn_mqtt_loop(mut eventloop: EventLoop, events: mpsc::Sender<MqttEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => MqttEvent::Connected,
                Ok(Event::Incoming(Incoming::Publish(message))) => MqttEvent::Message {
                    topic: message.topic,
                    payload: message.payload.to_vec(),
                },
                Ok(Event::Incoming(Incoming::Disconnect)) => {
                    warn!("mqtt broker closed the session");
                    MqttEvent::Disconnected
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    let _ = events.send(MqttEvent::Closed).await;
                    return;
                }
                Ok(_) => continue,
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    if events.send(MqttEvent::Disconnected).await.is_err() {
                        return;
                    }
                    tokio::time::sleep(MQTT_RETRY_DELAY).await;
                    continue;
                }
            };
            if events.send(event).await.is_err() {
                return;
            }
        }
    })
}

fn handle_mqtt_message<A: ApplianceAdapter>(
    bridge: &mut CommandBridge,
    appliance: &mut A,
    topic: &str,
    payload: &[u8],
) {
    match bridge.handle_message(appliance, topic, payload, monotonic_ms()) {
        CommandOutcome::Staged(change) => {
            info!("SET {} setting to {change}", change.dimension().as_str());
        }
        CommandOutcome::Rejected { dimension, value } => {
            debug!("rejected {} command `{value}`", dimension.as_str());
        }
        CommandOutcome::Ignored => debug!("ignoring message on {topic}"),
    }
}

fn execute_bridge_actions(mqtt: &AsyncClient, actions: Vec<BridgeAction>) {
    for action in actions {
        match action {
            BridgeAction::Subscribe { topic, qos } => {
                if let Err(err) = mqtt.try_subscribe(topic.as_str(), mqtt_qos(qos)) {
                    warn!("subscribe to {topic} failed: {err}");
                }
            }
            BridgeAction::Publish(publication) => {
                debug!("PUB {} {}", publication.topic, publication.payload);
                if let Err(err) = mqtt.try_publish(
                    publication.topic.as_str(),
                    mqtt_qos(publication.qos),
                    publication.retain,
                    publication.payload,
                ) {
                    warn!("publish to {} failed: {err}", publication.topic);
                }
            }
            BridgeAction::Flushed => debug!("appliance write committed"),
            BridgeAction::FlushFailed(err) => warn!("appliance write failed: {err}"),
        }
    }
}

/// Announces `offline` ahead of the broker's last will and waits for the event
/// loop to drain the outgoing requests before the session is dropped.
async fn close_session(
    mqtt: &AsyncClient,
    events: &mut mpsc::Receiver<MqttEvent>,
    bridge: &CommandBridge,
) {
    if !bridge.is_connected() {
        return;
    }

    if let Err(err) = mqtt.try_publish(
        bridge.topics().availability.as_str(),
        QoS::AtLeastOnce,
        true,
        AVAILABILITY_OFFLINE,
    ) {
        warn!("offline announcement failed: {err}");
    }
    if let Err(err) = mqtt.try_disconnect() {
        warn!("mqtt disconnect failed: {err}");
        return;
    }

    let drained = tokio::time::timeout(SHUTDOWN_FLUSH_TIMEOUT, async {
        while let Some(event) = events.recv().await {
            if matches!(event, MqttEvent::Closed | MqttEvent::Disconnected) {
                break;
            }
        }
    })
    .await;
    if drained.is_err() {
        warn!("mqtt session did not close cleanly");
    }
}

fn mqtt_options(settings: &GatewaySettings, topics: &TopicSet) -> MqttOptions {
    let port = settings.mqtt_port_number().unwrap_or_else(|| {
        warn!(
            "invalid mqtt port `{}`; using {DEFAULT_MQTT_PORT}",
            settings.mqtt_port
        );
        DEFAULT_MQTT_PORT
    });

    let mut options = MqttOptions::new(client_id(settings), settings.mqtt_host.trim(), port);
    options.set_keep_alive(Duration::from_secs(MQTT_KEEP_ALIVE_SECS));
    options.set_last_will(LastWill::new(
        topics.availability.as_str(),
        AVAILABILITY_OFFLINE,
        QoS::AtLeastOnce,
        true,
    ));
    if !settings.mqtt_username.is_empty() {
        options.set_credentials(
            settings.mqtt_username.as_str(),
            settings.mqtt_password.as_str(),
        );
    }
    options
}

fn client_id(settings: &GatewaySettings) -> String {
    let hostname = settings.syslog_device_hostname.trim();
    if !hostname.is_empty() {
        return hostname.to_string();
    }
    format!("aircon-gateway-{}", settings.mqtt_topic_prefix.replace('/', "-"))
}

fn mqtt_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
    }
}

/// Active-low: the input reads `0` while the button is held.
async fn read_reset_input(path: Option<&Path>) -> bool {
    let Some(path) = path else {
        return false;
    };
    match tokio::fs::read_to_string(path).await {
        Ok(value) => value.trim() == "0",
        Err(_) => false,
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let value = std::env::var(key).ok()?;
    match value.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("ignoring invalid {key}=`{value}`");
            None
        }
    }
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn settings() -> GatewaySettings {
        GatewaySettings {
            mqtt_host: " broker.lan ".to_string(),
            mqtt_topic_prefix: "home/ac".to_string(),
            ..GatewaySettings::default()
        }
    }

    #[test]
    fn options_carry_broker_and_last_will() {
        let settings = settings();
        let topics = TopicSet::new(&settings.mqtt_topic_prefix);
        let options = mqtt_options(&settings, &topics);

        assert_eq!(options.broker_address(), ("broker.lan".to_string(), 1883));
        assert_eq!(options.client_id(), "aircon-gateway-home-ac");

        let will = options.last_will().unwrap();
        assert_eq!(will.topic, "home/ac/availability");
        assert_eq!(will.message.as_ref(), b"offline".as_slice());
        assert_eq!(will.qos, QoS::AtLeastOnce);
        assert!(will.retain);
    }

    #[test]
    fn invalid_port_falls_back_to_default() {
        let settings = GatewaySettings {
            mqtt_port: "abc".to_string(),
            ..settings()
        };
        let options = mqtt_options(&settings, &TopicSet::new("home/ac"));

        assert_eq!(options.broker_address().1, DEFAULT_MQTT_PORT);
    }

    #[test]
    fn device_hostname_becomes_client_id() {
        let settings = GatewaySettings {
            syslog_device_hostname: "ac-den".to_string(),
            ..settings()
        };
        assert_eq!(client_id(&settings), "ac-den");
    }

    #[test]
    fn bridge_qos_maps_onto_mqtt_levels() {
        assert_eq!(mqtt_qos(Qos::AtMostOnce), QoS::AtMostOnce);
        assert_eq!(mqtt_qos(Qos::AtLeastOnce), QoS::AtLeastOnce);
    }

    #[test]
    fn unspecified_portal_ip_keeps_default() {
        let mut portal = PortalConfig::default();
        let default_ip = portal.portal_ip;

        apply_portal_ip(&mut portal, Ipv4Addr::UNSPECIFIED);
        assert_eq!(portal.portal_ip, default_ip);

        apply_portal_ip(&mut portal, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(portal.portal_ip, [10, 0, 0, 1]);
    }

    #[test]
    fn factory_reset_forces_portal_on_next_boot() {
        assert_eq!(next_boot(&SessionEnd::Shutdown), None);
        assert_eq!(next_boot(&SessionEnd::FactoryReset), Some(true));
    }

    #[tokio::test]
    async fn reset_hold_fires_while_broker_refuses_connections() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("reset");
        tokio::fs::write(&input, "0").await.unwrap();

        let config = HostConfig {
            data_dir: dir.path().to_path_buf(),
            portal: PortalConfig::default(),
            bridge: BridgeConfig::default(),
            reset_input: Some(input),
            force_provisioning: false,
        };
        let settings = GatewaySettings {
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: "1".to_string(),
            ..settings()
        };

        let session = run_session(&config, settings, std::future::pending());
        let end = tokio::time::timeout(Duration::from_millis(4_500), session)
            .await
            .expect("reset hold was not detected")
            .unwrap();
        assert_eq!(end, SessionEnd::FactoryReset);
    }

    #[tokio::test]
    async fn reset_input_is_active_low() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("value");

        assert!(!read_reset_input(None).await);
        assert!(!read_reset_input(Some(&input)).await);

        tokio::fs::write(&input, "0\n").await.unwrap();
        assert!(read_reset_input(Some(&input)).await);

        tokio::fs::write(&input, "1\n").await.unwrap();
        assert!(!read_reset_input(Some(&input)).await);
    }
}
