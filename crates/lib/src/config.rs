//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.murmur/config.json`) and environment.
//! The same file serves both processes: the bridge reads `bridge` and `channels`, the
//! personality server reads `model` and `personalities`; both read `broker`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_MODEL: &str = "llama3.2:latest";
pub const DEFAULT_SIGNAL_CLI: &str = "/usr/local/bin/signal-cli";
pub const DEFAULT_PERSONALITY_NAME: &str = "bot";
pub const DEFAULT_PERSONALITY_PROMPT: &str =
    "You are a friendly, concise conversational partner replying to text messages.";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// MQTT broker connections.
    #[serde(default)]
    pub broker: BrokerSettings,

    /// Bridge topics and timings.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Channel settings (e.g. Signal).
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Model backend settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Personalities served by `murmur personality`. Empty means one default personality.
    #[serde(default)]
    pub personalities: Vec<PersonalityConfig>,
}

/// The two broker connections: requests flow through `request`, replies through `response`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerSettings {
    /// Prefix for MQTT client ids (default "murmur").
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,

    /// Broker that carries requests (bridge publishes, personality server subscribes).
    #[serde(default)]
    pub request: BrokerConfig,

    /// Broker that carries responses (personality server publishes, bridge subscribes).
    #[serde(default)]
    pub response: BrokerConfig,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            client_id_prefix: default_client_id_prefix(),
            request: BrokerConfig::default(),
            response: BrokerConfig::default(),
        }
    }
}

/// Address of one MQTT broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

/// Bridge topics and loop timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Topic requests are published to (default "bot_in").
    #[serde(default = "default_request_topic")]
    pub request_topic: String,

    /// Topic responses arrive on (default "bot_out").
    #[serde(default = "default_response_topic")]
    pub response_topic: String,

    /// Delay between channel polls (default 1000 ms).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Pause after relaying each message of a batch (default 500 ms, 0 disables).
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Interval at which the response queue is drained (default 100 ms).
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,

    /// Correlation ids remembered for unanswered requests (default 256); older ones are forgotten.
    #[serde(default = "default_max_pending_requests")]
    pub max_pending_requests: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_topic: default_request_topic(),
            response_topic: default_response_topic(),
            poll_interval_ms: default_poll_interval_ms(),
            grace_period_ms: default_grace_period_ms(),
            dispatch_interval_ms: default_dispatch_interval_ms(),
            max_pending_requests: default_max_pending_requests(),
        }
    }
}

/// Per-channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub signal: SignalChannelConfig,
}

/// Signal (signal-cli) channel config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalChannelConfig {
    /// Path to the signal-cli binary.
    #[serde(default = "default_signal_cli")]
    pub cli_path: PathBuf,
    /// Registered bot account (phone number). Overridden by PHONE_NUMBER_BOT env when set.
    pub account: Option<String>,
}

impl Default for SignalChannelConfig {
    fn default() -> Self {
        Self {
            cli_path: default_signal_cli(),
            account: None,
        }
    }
}

/// Model backend (Ollama) config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    /// Ollama model name, exactly as shown by `ollama list`.
    pub name: Option<String>,
    /// Ollama base URL (default http://127.0.0.1:11434).
    pub base_url: Option<String>,
}

/// One personality: a name (which determines its topics) and a system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalityConfig {
    pub name: String,
    /// Inline system prompt.
    #[serde(default)]
    pub prompt: Option<String>,
    /// System prompt file; relative paths are resolved against the config file's parent.
    #[serde(default)]
    pub prompt_file: Option<PathBuf>,
}

/// A personality ready to serve: normalized id and resolved system prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Personality {
    pub id: String,
    pub prompt: String,
}

impl Personality {
    pub fn request_topic(&self) -> String {
        format!("{}_in", self.id)
    }

    pub fn response_topic(&self) -> String {
        format!("{}_out", self.id)
    }
}

/// Personality id used in topic names: trimmed and lowercased.
pub fn personality_id(name: &str) -> String {
    name.trim().to_lowercase()
}

fn default_client_id_prefix() -> String {
    "murmur".to_string()
}

fn default_broker_host() -> String {
    "127.0.0.1".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_request_topic() -> String {
    format!("{}_in", DEFAULT_PERSONALITY_NAME)
}

fn default_response_topic() -> String {
    format!("{}_out", DEFAULT_PERSONALITY_NAME)
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_grace_period_ms() -> u64 {
    500
}

fn default_dispatch_interval_ms() -> u64 {
    100
}

fn default_max_pending_requests() -> usize {
    crate::relay::correlator::DEFAULT_PENDING_CAPACITY
}

fn default_signal_cli() -> PathBuf {
    PathBuf::from(DEFAULT_SIGNAL_CLI)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the Signal account: env PHONE_NUMBER_BOT overrides config.
pub fn resolve_signal_account(config: &Config) -> Option<String> {
    non_empty(std::env::var("PHONE_NUMBER_BOT").ok().as_deref())
        .or_else(|| non_empty(config.channels.signal.account.as_deref()))
}

/// Resolve the model name, falling back to [`DEFAULT_MODEL`].
pub fn resolve_model(config: &Config) -> String {
    non_empty(config.model.name.as_deref()).unwrap_or_else(|| DEFAULT_MODEL.to_string())
}

/// Directory containing the config file.
pub fn config_dir(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Resolve configured personalities (reading prompt files). With none configured, returns
/// the default personality. Duplicate ids are rejected.
pub fn resolve_personalities(config: &Config, config_path: &Path) -> Result<Vec<Personality>> {
    if config.personalities.is_empty() {
        return Ok(vec![Personality {
            id: DEFAULT_PERSONALITY_NAME.to_string(),
            prompt: DEFAULT_PERSONALITY_PROMPT.to_string(),
        }]);
    }
    let mut out: Vec<Personality> = Vec::with_capacity(config.personalities.len());
    for p in &config.personalities {
        let id = personality_id(&p.name);
        if id.is_empty() {
            anyhow::bail!("personality with empty name");
        }
        if out.iter().any(|existing| existing.id == id) {
            anyhow::bail!("duplicate personality: {}", id);
        }
        let prompt = match (&p.prompt, &p.prompt_file) {
            (Some(inline), _) if !inline.trim().is_empty() => inline.clone(),
            (_, Some(file)) => {
                let path = if file.is_absolute() {
                    file.clone()
                } else {
                    config_dir(config_path).join(file)
                };
                std::fs::read_to_string(&path).with_context(|| {
                    format!("reading prompt for {} from {}", id, path.display())
                })?
            }
            _ => anyhow::bail!("personality {} has neither prompt nor promptFile", id),
        };
        out.push(Personality { id, prompt });
    }
    Ok(out)
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("MURMUR_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".murmur").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, MURMUR_CONFIG_PATH, or the default. Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
