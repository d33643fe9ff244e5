use std::net::{IpAddr, SocketAddr};

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use aircon_common::{GatewaySettings, PortalConfig};

use crate::{
    dns_server::DnsResponder,
    portal::{self, PortalState, PortalSubmission},
    store::SettingsStore,
};

pub fn needs_portal(settings: &GatewaySettings, forced: bool) -> bool {
    forced || !settings.has_broker()
}

/// Produces the settings for the next session: defaults, then the stored
/// file, then the portal when no broker is known. Returns `None` when
/// shutdown was requested while the portal was up.
pub async fn resolve_settings(
    store: &SettingsStore,
    portal_config: &PortalConfig,
    force_portal: bool,
) -> anyhow::Result<Option<GatewaySettings>> {
    let settings = store.load().await;
    if !needs_portal(&settings, force_portal) {
        return Ok(Some(settings));
    }

    if force_portal {
        info!("provisioning forced; starting portal");
    } else {
        info!("no broker configured; starting portal");
    }

    let Some(submission) = run_portal(portal_config, settings).await? else {
        return Ok(None);
    };
    Ok(Some(finish_submission(store, submission).await))
}

/// Persists the submission when asked to. A failed save only costs the next
/// boot another trip through the portal.
pub async fn finish_submission(
    store: &SettingsStore,
    submission: PortalSubmission,
) -> GatewaySettings {
    if submission.save {
        match store.save(&submission.settings).await {
            Ok(()) => info!("settings saved to {}", store.path().display()),
            Err(err) => warn!("failed to persist portal settings: {err:#}"),
        }
    }
    submission.settings
}

async fn run_portal(
    portal_config: &PortalConfig,
    settings: GatewaySettings,
) -> anyhow::Result<Option<PortalSubmission>> {
    let portal_ip = portal_config.portal_addr();
    info!(
        "provisioning access point `{}` (password: `{}`) expected at {portal_ip}",
        portal_config.ap_ssid, portal_config.ap_password
    );

    let dns_addr = SocketAddr::new(IpAddr::V4(portal_ip), portal_config.dns_port);
    let responder = DnsResponder::bind(dns_addr, portal_ip).await?;
    let dns_task = tokio::spawn(responder.run());

    let http_addr = SocketAddr::new(IpAddr::V4(portal_ip), portal_config.http_port);
    let listener = match TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("failed to bind portal server at {http_addr}"))
    {
        Ok(listener) => listener,
        Err(err) => {
            dns_task.abort();
            return Err(err);
        }
    };

    let (state, mut submissions) = PortalState::new(settings);
    let app = portal::router(state);
    let http_task = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            warn!("portal server stopped: {err}");
        }
    });
    info!("portal listening on http://{http_addr}");

    let outcome = tokio::select! {
        submission = submissions.recv() => submission,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested during provisioning");
            None
        }
    };

    http_task.abort();
    dns_task.abort();
    Ok(outcome)
}
