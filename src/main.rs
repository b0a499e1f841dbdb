//! Scan Station - headless barcode scan station
//!
//! Each line on stdin is one decoded frame from a keyboard-wedge scanner.
//! The scanner stays visible, so every accepted code is looked up against
//! the inventory API and the session re-arms for the next one.

use scanstation::{
    decode_engine::{DecodeEngine, LineDecodeEngine},
    feedback_hub::HubMessage,
    inventory_client::{InventoryClient, ProductLookup},
    state::{AppConfig, AppState},
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scanstation=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Scan Station v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::default();
    tracing::info!(
        inventory_api_url = %config.inventory_api_url,
        deployment_host = %config.deployment_host,
        mode = ?config.mode(),
        min_payload_len = config.min_payload_len,
        cooldown_ms = config.cooldown_ms,
        "Configuration loaded"
    );

    let engine: Arc<dyn DecodeEngine> = Arc::new(LineDecodeEngine::stdin());
    let lookup: Arc<dyn ProductLookup> = Arc::new(InventoryClient::new(config.inventory_api_url.clone())?);
    let state = AppState::build(config, engine, lookup, None);

    // Console feedback, and re-arm after every accepted scan
    let (_subscriber_id, mut messages) = state.hub.subscribe("console").await;
    let rearm = state.clone();
    tokio::spawn(async move {
        while let Some(message) = messages.recv().await {
            match message {
                HubMessage::Toast(toast) => {
                    tracing::info!(level = ?toast.level, "{}", toast.message);
                }
                HubMessage::LookupResult(result) => match result.product {
                    Some(product) => tracing::info!(
                        barcode = %result.payload,
                        name = %product.name,
                        quantity = product.quantity,
                        source = ?product.source,
                        "Product"
                    ),
                    None => tracing::info!(barcode = %result.payload, "No product"),
                },
                HubMessage::Detection(detection) => {
                    tracing::debug!(payload = %detection.payload, "Re-arming scanner");
                    let session = rearm.clone();
                    tokio::spawn(async move {
                        if let Err(e) = session.trigger.start().await {
                            tracing::warn!(error = %e, "Scanner re-arm failed");
                        }
                    });
                }
                HubMessage::SessionState(change) => {
                    tracing::debug!(session = %change.session, state = ?change.state, "Session state");
                }
                HubMessage::Flash(_) => {}
            }
        }
    });

    state.show_scanner();
    tracing::info!("Scanner shown, waiting for codes (Ctrl-C to quit)");

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    state.hide_scanner();
    state.scan.stop().await;

    Ok(())
}
