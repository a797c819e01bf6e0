use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::config::AppConfig;
use crate::core::lifecycle::LifecycleManager;
use crate::core::terminal;
use crate::interfaces::web::{ApiServer, AppState};

pub(super) async fn run_server(config: AppConfig) -> Result<()> {
    let production = config.server.production;
    let origin = if production {
        config.server.allowed_origin.clone()
    } else {
        "*".to_string()
    };

    let state = AppState::from_config(config)?;
    let server = ApiServer::new(state);
    let addr = server.addr().to_string();

    let mut lifecycle = LifecycleManager::new();
    lifecycle.attach(Arc::new(Mutex::new(server)));
    lifecycle.start().await?;

    terminal::print_success("multichat API server is up");
    terminal::print_link("API", &format!("http://{}", addr));
    terminal::print_status("Mode", if production { "production" } else { "development" });
    terminal::print_status("CORS origin", &origin);
    terminal::print_info("Press Ctrl-C to stop.");

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, stopping");
    lifecycle.shutdown().await?;
    Ok(())
}
