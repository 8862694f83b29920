//! Gateway process entry point.
//!
//! Exit codes: 0 on normal shutdown, 1 on configuration or
//! initialization errors.

use std::process::ExitCode;
use std::sync::Arc;

use rand::RngCore;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use warden_gateway::{ExternalServices, Gateway, GatewayConfig};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "gateway failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let mut config = GatewayConfig::from_env();
    if config.auth_token.is_empty() {
        if config.production_hardening {
            anyhow::bail!("WARDEN_AUTH_TOKEN must be set in production");
        }
        let mut token = [0_u8; 24];
        rand::thread_rng().fill_bytes(&mut token);
        config.auth_token = hex::encode(token);
        info!(token = %config.auth_token, "generated ephemeral auth token");
    }

    let listen_addr = config.listen_addr.clone();
    let gateway = Gateway::new(config, ExternalServices::in_memory())?;
    gateway.start().await?;

    let app = warden_gateway::router(Arc::clone(&gateway));
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    info!(addr = %listen_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}
