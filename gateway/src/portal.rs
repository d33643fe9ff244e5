use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use aircon_common::{config::parse_port, GatewaySettings};

const CAPTIVE_CHECK_PATHS: [&str; 7] = [
    "/",
    "/generate_204",
    "/gen_204",
    "/hotspot-detect.html",
    "/connecttest.txt",
    "/ncsi.txt",
    "/fwlink",
];

const PORTAL_INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Air Conditioner Gateway Setup</title>
  <style>
    body{font-family:Arial,sans-serif;max-width:720px;margin:2rem auto;padding:0 1rem;color:#111}
    h1{margin:0 0 .5rem}.card{border:1px solid #ddd;border-radius:8px;padding:1rem}
    label{display:block;margin:.5rem 0 .2rem}input[type=text],input[type=password],input[type=number]{width:100%;padding:.5rem;box-sizing:border-box}
    .row{display:flex;gap:1rem}.row>div{flex:1}.muted{color:#555}.ok{color:#106010}.err{color:#a00000}
    button{padding:.55rem .9rem;margin-top:.8rem}
  </style>
</head>
<body>
  <h1>Air Conditioner Gateway Setup</h1>
  <p class="muted">Enter the MQTT broker the gateway should report to.</p>
  <div class="card">
    <div class="row">
      <div><label>MQTT Host</label><input id="mqttHost" type="text"></div>
      <div><label>MQTT Port</label><input id="mqttPort" type="number" min="1" max="65535"></div>
    </div>
    <label>MQTT Username</label><input id="mqttUser" type="text">
    <label>MQTT Password (leave blank to keep current)</label><input id="mqttPass" type="password">
    <label>Topic Prefix</label><input id="mqttTopicPrefix" type="text">
    <div class="row">
      <div><label>Syslog Host</label><input id="syslogHost" type="text"></div>
      <div><label>Syslog Port</label><input id="syslogPort" type="text"></div>
    </div>
    <div class="row">
      <div><label>Device Hostname</label><input id="syslogDeviceHostname" type="text"></div>
      <div><label>App Name</label><input id="syslogAppName" type="text"></div>
      <div><label>Log Level</label><input id="syslogLogLevel" type="text"></div>
    </div>
    <label><input id="save" type="checkbox" checked> Remember these settings</label>
    <button id="submit">Save and Connect</button>
    <div id="status" class="muted"></div>
  </div>
  <script>
    const q=(id)=>document.getElementById(id);
    const text=['mqttHost','mqttUser','mqttTopicPrefix','syslogHost','syslogPort','syslogDeviceHostname','syslogAppName','syslogLogLevel'];
    async function api(path,opt){const r=await fetch(path,opt);let b={};try{b=await r.json();}catch(_){}if(!r.ok)throw new Error(b.error||('Request failed: '+r.status));return b;}
    async function load(){
      const s=await api('/api/settings');
      text.forEach((id)=>{q(id).value=s[id]||'';});
      q('mqttPort').value=s.mqttPort||1883;
    }
    q('submit').addEventListener('click', async ()=>{
      q('status').className='muted'; q('status').textContent='Saving...';
      try{
        const payload={mqttPort:Number(q('mqttPort').value||1883),mqttPass:q('mqttPass').value||undefined,save:q('save').checked};
        text.forEach((id)=>{payload[id]=q(id).value.trim();});
        await api('/api/settings',{method:'PUT',headers:{'content-type':'application/json'},body:JSON.stringify(payload)});
        q('status').className='ok'; q('status').textContent='Saved. The gateway is connecting to the broker.';
        q('mqttPass').value='';
      }catch(err){q('status').className='err'; q('status').textContent=err.message;}
    });
    load().catch((err)=>{q('status').className='err';q('status').textContent=err.message;});
  </script>
</body>
</html>
"#;

/// Settings entered through the portal, handed back to the boot sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct PortalSubmission {
    pub settings: GatewaySettings,
    pub save: bool,
}

#[derive(Clone)]
pub struct PortalState {
    settings: Arc<Mutex<GatewaySettings>>,
    completion: mpsc::Sender<PortalSubmission>,
}

impl PortalState {
    pub fn new(settings: GatewaySettings) -> (Self, mpsc::Receiver<PortalSubmission>) {
        let (completion, submissions) = mpsc::channel(1);
        (
            Self {
                settings: Arc::new(Mutex::new(settings)),
                completion,
            },
            submissions,
        )
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct SettingsView {
    #[serde(rename = "mqttHost")]
    mqtt_host: String,
    #[serde(rename = "mqttPort")]
    mqtt_port: Option<u16>,
    #[serde(rename = "mqttUser")]
    mqtt_user: String,
    #[serde(rename = "mqttPassSet")]
    mqtt_pass_set: bool,
    #[serde(rename = "mqttTopicPrefix")]
    mqtt_topic_prefix: String,
    #[serde(rename = "syslogHost")]
    syslog_host: String,
    #[serde(rename = "syslogPort")]
    syslog_port: String,
    #[serde(rename = "syslogDeviceHostname")]
    syslog_device_hostname: String,
    #[serde(rename = "syslogAppName")]
    syslog_app_name: String,
    #[serde(rename = "syslogLogLevel")]
    syslog_log_level: String,
}

#[derive(Debug, Deserialize)]
struct SettingsUpdate {
    #[serde(rename = "mqttHost")]
    mqtt_host: String,
    #[serde(rename = "mqttPort")]
    mqtt_port: u16,
    #[serde(rename = "mqttUser", default)]
    mqtt_user: String,
    #[serde(rename = "mqttPass", default)]
    mqtt_pass: Option<String>,
    #[serde(rename = "mqttTopicPrefix")]
    mqtt_topic_prefix: String,
    #[serde(rename = "syslogHost", default)]
    syslog_host: Option<String>,
    #[serde(rename = "syslogPort", default)]
    syslog_port: Option<String>,
    #[serde(rename = "syslogDeviceHostname", default)]
    syslog_device_hostname: Option<String>,
    #[serde(rename = "syslogAppName", default)]
    syslog_app_name: Option<String>,
    #[serde(rename = "syslogLogLevel", default)]
    syslog_log_level: Option<String>,
    #[serde(default = "default_save")]
    save: bool,
}

#[derive(Debug, Serialize)]
struct SettingsUpdateResponse {
    saved: bool,
    settings: SettingsView,
}

fn default_save() -> bool {
    true
}

pub fn router(state: PortalState) -> Router {
    let mut router = Router::new();
    for path in CAPTIVE_CHECK_PATHS {
        router = router.route(path, get(handle_index));
    }

    router
        .route(
            "/api/settings",
            get(handle_get_settings).put(handle_put_settings),
        )
        .fallback(handle_index)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_index() -> Html<&'static str> {
    Html(PORTAL_INDEX_HTML)
}

async fn handle_get_settings(State(state): State<PortalState>) -> impl IntoResponse {
    let settings = state.settings.lock().await;
    Json(build_settings_view(&settings))
}

async fn handle_put_settings(
    State(state): State<PortalState>,
    Json(update): Json<SettingsUpdate>,
) -> impl IntoResponse {
    if let Err(message) = validate_settings_update(&update) {
        return error_response(StatusCode::BAD_REQUEST, message);
    }

    let save = update.save;
    let mut current = state.settings.lock().await;
    let settings = apply_settings_update(&current, update);
    let view = build_settings_view(&settings);
    // Only an accepted submission may change what the portal reports.
    if state
        .completion
        .try_send(PortalSubmission {
            settings: settings.clone(),
            save,
        })
        .is_err()
    {
        warn!("portal submission ignored; provisioning already completed");
        return error_response(StatusCode::CONFLICT, "Provisioning already completed");
    }
    *current = settings;
    drop(current);

    info!("portal submission accepted for broker {}", view.mqtt_host);
    Json(SettingsUpdateResponse {
        saved: save,
        settings: view,
    })
    .into_response()
}

fn validate_settings_update(update: &SettingsUpdate) -> Result<(), &'static str> {
    if update.mqtt_host.trim().is_empty() {
        return Err("mqttHost cannot be empty");
    }
    if update.mqtt_port == 0 {
        return Err("mqttPort must be between 1 and 65535");
    }
    let prefix = update.mqtt_topic_prefix.trim();
    if prefix.is_empty() {
        return Err("mqttTopicPrefix cannot be empty");
    }
    if prefix.contains(['+', '#']) {
        return Err("mqttTopicPrefix cannot contain MQTT wildcards");
    }
    if let Some(port) = update.syslog_port.as_deref() {
        if !port.is_empty() && parse_port(port).is_none() {
            return Err("syslogPort must be between 1 and 65535");
        }
    }

    Ok(())
}

fn apply_settings_update(current: &GatewaySettings, update: SettingsUpdate) -> GatewaySettings {
    let mut settings = current.clone();
    settings.mqtt_host = update.mqtt_host.trim().to_string();
    settings.mqtt_port = update.mqtt_port.to_string();
    settings.mqtt_username = update.mqtt_user.trim().to_string();
    if let Some(pass) = update.mqtt_pass {
        settings.mqtt_password = pass;
    }
    settings.mqtt_topic_prefix = update.mqtt_topic_prefix.trim().to_string();

    let optional = [
        (update.syslog_host, &mut settings.syslog_host),
        (update.syslog_port, &mut settings.syslog_port),
        (update.syslog_device_hostname, &mut settings.syslog_device_hostname),
        (update.syslog_app_name, &mut settings.syslog_app_name),
        (update.syslog_log_level, &mut settings.syslog_log_level),
    ];
    for (value, field) in optional {
        if let Some(value) = value {
            *field = value.trim().to_string();
        }
    }

    settings.sanitize();
    settings
}

fn build_settings_view(settings: &GatewaySettings) -> SettingsView {
    SettingsView {
        mqtt_host: settings.mqtt_host.clone(),
        mqtt_port: settings.mqtt_port_number(),
        mqtt_user: settings.mqtt_username.clone(),
        mqtt_pass_set: !settings.mqtt_password.is_empty(),
        mqtt_topic_prefix: settings.mqtt_topic_prefix.clone(),
        syslog_host: settings.syslog_host.clone(),
        syslog_port: settings.syslog_port.clone(),
        syslog_device_hostname: settings.syslog_device_hostname.clone(),
        syslog_app_name: settings.syslog_app_name.clone(),
        syslog_log_level: settings.syslog_log_level.clone(),
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
