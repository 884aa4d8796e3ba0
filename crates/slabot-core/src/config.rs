use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Bounded grace period for in-flight handlers during shutdown.
pub const SHUTDOWN_GRACE_SECS: u64 = 10;
/// Telegram's documented bulk-send ceiling; the alerts pool paces to this.
pub const ALERTS_RATE_PER_SEC: u32 = 30;

/// Top-level config (slabot.toml + SLABOT_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlabotConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub ai: AiConfig,
    /// "development" or "production". Mirrors the NODE_ENV convention of
    /// the deployment tooling this bot is supervised by.
    #[serde(default = "default_environment")]
    pub environment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub auth: RpcAuthConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            auth: RpcAuthConfig::default(),
        }
    }
}

/// Static bearer tokens for the three RPC authorization tiers.
///
/// Tiers nest: the admin token passes manager and authed checks, the
/// manager token passes authed checks.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RpcAuthConfig {
    pub authed_token: Option<String>,
    pub manager_token: Option<String>,
    pub admin_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// How transport updates reach the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TelegramMode {
    /// Long polling — no public URL required.
    #[default]
    Polling,
    /// Updates arrive via POST /webhook/telegram, authenticated by the
    /// shared secret header.
    Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Shared secret Telegram echoes back in
    /// `X-Telegram-Bot-Api-Secret-Token`. Mandatory in production.
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub mode: TelegramMode,
}

/// AI classifier provider — any OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    pub api_key: Option<String>,
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    #[serde(default = "default_ai_model")]
    pub model: String,
    #[serde(default = "default_ai_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_ai_base_url(),
            model: default_ai_model(),
            timeout_ms: default_ai_timeout_ms(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_environment() -> String {
    "development".to_string()
}
fn default_ai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_ai_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_ai_timeout_ms() -> u64 {
    15_000
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.slabot/slabot.db", home)
}

impl SlabotConfig {
    /// Load config from a TOML file with SLABOT_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: SlabotConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("SLABOT_").split("_"))
            .extract()
            .map_err(|e| crate::error::SlabotError::Config(e.to_string()))?;

        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Startup sanity checks. A missing webhook secret in production is a
    /// critical misconfiguration: anyone who learns the webhook URL could
    /// inject forged updates.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            return Err(crate::error::SlabotError::Config(
                "telegram.bot_token is required".to_string(),
            ));
        }
        if self.is_production()
            && self.telegram.mode == TelegramMode::Webhook
            && self.telegram.webhook_secret.is_none()
        {
            tracing::error!(
                service = "config",
                "CRITICAL: production webhook mode without telegram.webhook_secret"
            );
            return Err(crate::error::SlabotError::Config(
                "telegram.webhook_secret is mandatory in production".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.slabot/slabot.toml", home)
}
