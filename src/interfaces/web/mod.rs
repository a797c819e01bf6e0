mod error;
mod handlers;
mod router;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::core::config::AppConfig;
use crate::core::lifecycle::LifecycleComponent;
use crate::core::llm::{AssistantBackend, CompatibleAssistant};
use crate::core::tasks::{DashScopeTasks, ImageGenerator, PollingImageGenerator};

pub use error::ApiError;
pub use router::build_api_router;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub images: Arc<dyn ImageGenerator>,
    pub assistant: Arc<dyn AssistantBackend>,
}

impl AppState {
    /// Wires the DashScope backends described by `config`.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        if config.provider.api_key().is_none() {
            warn!("DASHSCOPE_API_KEY is not set; AI requests will fail until it is configured");
        }
        let tasks = DashScopeTasks::new(&config.provider)?;
        let images = PollingImageGenerator::new(tasks, config.polling.generate, config.polling.edit);
        let assistant = CompatibleAssistant::new(&config.provider)?;
        Ok(Self {
            config: Arc::new(config),
            images: Arc::new(images),
            assistant: Arc::new(assistant),
        })
    }
}

pub struct ApiServer {
    state: AppState,
    addr: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ApiServer {
    pub fn new(state: AppState) -> Self {
        let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
        Self {
            state,
            addr,
            shutdown_tx: None,
            handle: None,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("API Server Interface initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .with_context(|| format!("Failed to bind API server to {}", self.addr))?;
        let app = build_api_router(self.state.clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let addr = self.addr.clone();

        info!("API Server running at http://{addr}");
        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                error!("API Server crashed: {}", e);
            }
        });

        self.shutdown_tx = Some(shutdown_tx);
        self.handle = Some(handle);
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API Server Interface shutting down...");
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.await?;
        }
        Ok(())
    }
}
