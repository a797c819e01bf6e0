use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::core::tasks::PollPolicy;

pub const DEFAULT_PORT: u16 = 3000;
pub const PRODUCTION_ORIGIN: &str = "https://erlinmall.com";
pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    /// Root for config, saved sessions and run logs. Not read from the file.
    #[serde(skip)]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub production: bool,

    #[serde(default = "default_allowed_origin")]
    pub allowed_origin: String,

    #[serde(default = "default_body_limit_mb")]
    pub body_limit_mb: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    #[serde(default = "default_vision_model")]
    pub vision_model: String,

    #[serde(default = "default_text_to_image_model")]
    pub text_to_image_model: String,

    #[serde(default = "default_image_edit_model")]
    pub image_edit_model: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PollingConfig {
    #[serde(default)]
    pub generate: PollPolicy,

    #[serde(default)]
    pub edit: PollPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_allowed_origin() -> String {
    PRODUCTION_ORIGIN.to_string()
}
fn default_body_limit_mb() -> usize {
    50
}
fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_chat_model() -> String {
    "qwen-turbo".to_string()
}
fn default_vision_model() -> String {
    "qwen-vl-max".to_string()
}
fn default_text_to_image_model() -> String {
    "wanx2.1-t2i-turbo".to_string()
}
fn default_image_edit_model() -> String {
    "wanx2.1-imageedit".to_string()
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_max_sessions() -> usize {
    20
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            production: false,
            allowed_origin: default_allowed_origin(),
            body_limit_mb: default_body_limit_mb(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            chat_model: default_chat_model(),
            vision_model: default_vision_model(),
            text_to_image_model: default_text_to_image_model(),
            image_edit_model: default_image_edit_model(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
        }
    }
}

impl ProviderConfig {
    /// The API key, if one is set and non-blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

impl AppConfig {
    /// `MULTICHAT_DATA_DIR`, else `~/.multichat`.
    pub fn default_data_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("MULTICHAT_DATA_DIR")
            && !dir.trim().is_empty()
        {
            return Ok(PathBuf::from(dir));
        }
        let home = dirs::home_dir().context("Could not find home directory")?;
        Ok(home.join(".multichat"))
    }

    /// Reads `config.toml` (or `config_path`) and applies process environment overrides.
    pub async fn load(data_dir: &Path, config_path: Option<&Path>) -> Result<Self> {
        let path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if path.exists() {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("Invalid config file {}", path.display()))?;
            info!("Loaded config from {}", path.display());
            config
        } else {
            info!("No config.toml found, using defaults.");
            AppConfig::default()
        };

        config.data_dir = data_dir.to_path_buf();
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Environment overrides, resolved through `lookup` so tests need not touch the process env.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = lookup("DASHSCOPE_API_KEY") {
            self.provider.api_key = Some(key);
        }
        if let Some(url) = lookup("DASHSCOPE_BASE_URL") {
            self.provider.base_url = url;
        }
        if let Some(env) = lookup("MULTICHAT_ENV").or_else(|| lookup("NODE_ENV")) {
            self.server.production = env.eq_ignore_ascii_case("production");
        }
        if let Some(origin) = lookup("MULTICHAT_ALLOWED_ORIGIN") {
            self.server.allowed_origin = origin;
        }
        if let Some(port) = lookup("PORT").and_then(|p| p.trim().parse().ok()) {
            self.server.port = port;
        }
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.data_dir.join("storage")
    }

    /// Run log under a data directory. Logging starts before the config file is read.
    pub fn log_file(data_dir: &Path) -> PathBuf {
        data_dir.join("run").join("multichat.log")
    }

    pub fn body_limit_bytes(&self) -> usize {
        self.server.body_limit_mb * 1024 * 1024
    }
}
