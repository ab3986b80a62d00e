//! Configuration loading and validation.

use crate::error::{ConfigError, Result};
use anyhow::Context as _;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// zapbot configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Instance directory: database, logs.
    pub data_dir: PathBuf,
    pub assistant: AssistantConfig,
    pub gateway: GatewayConfig,
    pub tools: ToolsConfig,
    pub debounce: DebounceConfig,
    pub driver: DriverConfig,
    pub chunker: ChunkerConfig,
    pub dispatch: DispatchConfig,
    pub contacts: ContactsConfig,
    pub api: ApiConfig,
}

/// Hosted assistant service configuration.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub api_key: String,
    pub base_url: String,
    /// Gateway instance name → assistant id. Instances without an entry use
    /// their own name as the assistant id.
    pub identities: HashMap<String, String>,
    /// Model used to caption inbound images.
    pub vision_model: String,
    /// Model used to transcribe inbound audio.
    pub transcription_model: String,
}

impl AssistantConfig {
    /// Assistant identity that answers for a gateway instance.
    pub fn identity_for(&self, instance: &str) -> String {
        self.identities
            .get(instance)
            .cloned()
            .unwrap_or_else(|| instance.to_string())
    }
}

/// Outbound WhatsApp gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: String,
    /// Typing delay the gateway simulates before each message, in milliseconds.
    pub send_delay_ms: u64,
}

/// Tool handler configuration.
#[derive(Debug, Clone)]
pub struct ToolsConfig {
    /// Base URL for the generic webhook-forward handler. Tool calls with no
    /// registered handler are POSTed to `<base>/<tool name>`.
    pub webhook_base_url: Option<String>,
    pub webhook_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            webhook_base_url: None,
            webhook_timeout_secs: 30,
        }
    }
}

/// Per-contact burst coalescing.
#[derive(Debug, Clone, Copy)]
pub struct DebounceConfig {
    /// Fixed wait between the first fragment of a burst and the flush. Later
    /// fragments do not extend it.
    pub quiet_period_ms: u64,
}

impl DebounceConfig {
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: 5000,
        }
    }
}

/// Conversation driver polling behavior.
#[derive(Debug, Clone, Copy)]
pub struct DriverConfig {
    pub poll_interval_ms: u64,
    /// Maximum run status fetches before the turn is abandoned.
    pub max_polls: u32,
    /// Pause after cancelling a stale run.
    pub cancel_settle_ms: u64,
}

impl DriverConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cancel_settle(&self) -> Duration {
        Duration::from_millis(self.cancel_settle_ms)
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            max_polls: 30,
            cancel_settle_ms: 1000,
        }
    }
}

/// Reply chunking thresholds, in characters.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    /// Replies shorter than this are sent whole.
    pub short_message_chars: usize,
    /// Blocks are packed together while the chunk stays under this size.
    pub pack_ceiling: usize,
    /// Blocks longer than this are never merged with neighbors.
    pub oversized_block: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            short_message_chars: 100,
            pack_ceiling: 150,
            oversized_block: 250,
        }
    }
}

/// Outbound pacing.
#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    pub pacing_ms: u64,
}

impl DispatchConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { pacing_ms: 1000 }
    }
}

/// Contact lifecycle settings.
#[derive(Debug, Clone)]
pub struct ContactsConfig {
    /// How long the bot stays quiet after an operator answers by hand.
    pub cooldown_hours: i64,
    /// Funnel stage assigned to new contacts.
    pub default_stage: String,
}

impl Default for ContactsConfig {
    fn default() -> Self {
        Self {
            cooldown_hours: 24,
            default_stage: "conexão".into(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Copy)]
pub struct ApiConfig {
    pub bind: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
        }
    }
}

const DEFAULT_ASSISTANT_BASE_URL: &str = "https://api.openai.com";

// -- TOML mirror types --

#[derive(Deserialize, Default)]
struct TomlConfig {
    data_dir: Option<PathBuf>,
    #[serde(default)]
    assistant: TomlAssistantConfig,
    #[serde(default)]
    gateway: TomlGatewayConfig,
    #[serde(default)]
    tools: TomlToolsConfig,
    debounce: Option<TomlDebounceConfig>,
    driver: Option<TomlDriverConfig>,
    chunker: Option<TomlChunkerConfig>,
    dispatch: Option<TomlDispatchConfig>,
    contacts: Option<TomlContactsConfig>,
    api: Option<TomlApiConfig>,
}

#[derive(Deserialize, Default)]
struct TomlAssistantConfig {
    api_key: Option<String>,
    base_url: Option<String>,
    #[serde(default)]
    identities: HashMap<String, String>,
    vision_model: Option<String>,
    transcription_model: Option<String>,
}

#[derive(Deserialize, Default)]
struct TomlGatewayConfig {
    base_url: Option<String>,
    api_key: Option<String>,
    send_delay_ms: Option<u64>,
}

#[derive(Deserialize, Default)]
struct TomlToolsConfig {
    webhook_base_url: Option<String>,
    webhook_timeout_secs: Option<u64>,
}

#[derive(Deserialize)]
struct TomlDebounceConfig {
    quiet_period_ms: Option<u64>,
}

#[derive(Deserialize)]
struct TomlDriverConfig {
    poll_interval_ms: Option<u64>,
    max_polls: Option<u32>,
    cancel_settle_ms: Option<u64>,
}

#[derive(Deserialize)]
struct TomlChunkerConfig {
    short_message_chars: Option<usize>,
    pack_ceiling: Option<usize>,
    oversized_block: Option<usize>,
}

#[derive(Deserialize)]
struct TomlDispatchConfig {
    pacing_ms: Option<u64>,
}

#[derive(Deserialize)]
struct TomlContactsConfig {
    cooldown_hours: Option<i64>,
    default_stage: Option<String>,
}

#[derive(Deserialize)]
struct TomlApiConfig {
    bind: Option<String>,
}

/// Resolve a value that might be an "env:VAR_NAME" reference.
fn resolve_env_value(value: &str) -> Option<String> {
    if let Some(var_name) = value.strip_prefix("env:") {
        std::env::var(var_name).ok()
    } else {
        Some(value.to_string())
    }
}

/// Resolve an optional TOML secret, falling back to an environment variable.
fn resolve_secret(value: Option<&str>, fallback_env: &str) -> Option<String> {
    value
        .and_then(resolve_env_value)
        .or_else(|| std::env::var(fallback_env).ok())
        .filter(|value| !value.trim().is_empty())
}

impl Config {
    /// Resolve the instance directory from env or default (~/.zapbot).
    pub fn default_instance_dir() -> PathBuf {
        std::env::var("ZAPBOT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|d| d.join(".zapbot"))
                    .unwrap_or_else(|| PathBuf::from("./.zapbot"))
            })
    }

    /// Load configuration from the default config file, falling back to env vars.
    pub fn load() -> Result<Self> {
        let instance_dir = Self::default_instance_dir();

        let config_path = instance_dir.join("config.toml");
        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::from_toml(TomlConfig::default(), instance_dir)
        }
    }

    /// Load from a specific TOML config file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let instance_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        Self::from_toml_str(&content, instance_dir)
    }

    /// Parse a TOML document. Missing sections take their defaults and
    /// missing secrets fall back to the environment.
    pub fn from_toml_str(content: &str, instance_dir: PathBuf) -> Result<Self> {
        let toml_config: TomlConfig =
            toml::from_str(content).context("failed to parse config TOML")?;
        Self::from_toml(toml_config, instance_dir)
    }

    fn from_toml(toml: TomlConfig, instance_dir: PathBuf) -> Result<Self> {
        let data_dir = toml.data_dir.unwrap_or(instance_dir);

        let assistant_api_key = resolve_secret(toml.assistant.api_key.as_deref(), "OPENAI_API_KEY")
            .ok_or_else(|| ConfigError::MissingKey("assistant.api_key (OPENAI_API_KEY)".into()))?;
        let assistant = AssistantConfig {
            api_key: assistant_api_key,
            base_url: toml
                .assistant
                .base_url
                .unwrap_or_else(|| DEFAULT_ASSISTANT_BASE_URL.into()),
            identities: toml.assistant.identities,
            vision_model: toml.assistant.vision_model.unwrap_or_else(|| "gpt-4o".into()),
            transcription_model: toml
                .assistant
                .transcription_model
                .unwrap_or_else(|| "whisper-1".into()),
        };

        let gateway = GatewayConfig {
            base_url: resolve_secret(toml.gateway.base_url.as_deref(), "EVOLUTION_API_URL")
                .ok_or_else(|| ConfigError::MissingKey("gateway.base_url (EVOLUTION_API_URL)".into()))?,
            api_key: resolve_secret(toml.gateway.api_key.as_deref(), "EVOLUTION_API_KEY")
                .ok_or_else(|| ConfigError::MissingKey("gateway.api_key (EVOLUTION_API_KEY)".into()))?,
            send_delay_ms: toml.gateway.send_delay_ms.unwrap_or(1200),
        };

        let tool_defaults = ToolsConfig::default();
        let tools = ToolsConfig {
            webhook_base_url: resolve_secret(
                toml.tools.webhook_base_url.as_deref(),
                "TOOL_WEBHOOK_URL",
            ),
            webhook_timeout_secs: toml
                .tools
                .webhook_timeout_secs
                .unwrap_or(tool_defaults.webhook_timeout_secs),
        };

        let debounce = match toml.debounce {
            Some(t) => DebounceConfig {
                quiet_period_ms: t
                    .quiet_period_ms
                    .unwrap_or(DebounceConfig::default().quiet_period_ms),
            },
            None => DebounceConfig::default(),
        };

        let driver = match toml.driver {
            Some(t) => {
                let base = DriverConfig::default();
                DriverConfig {
                    poll_interval_ms: t.poll_interval_ms.unwrap_or(base.poll_interval_ms),
                    max_polls: t.max_polls.unwrap_or(base.max_polls),
                    cancel_settle_ms: t.cancel_settle_ms.unwrap_or(base.cancel_settle_ms),
                }
            }
            None => DriverConfig::default(),
        };
        if driver.max_polls == 0 {
            return Err(ConfigError::Invalid("driver.max_polls must be at least 1".into()).into());
        }

        let chunker = match toml.chunker {
            Some(t) => {
                let base = ChunkerConfig::default();
                ChunkerConfig {
                    short_message_chars: t.short_message_chars.unwrap_or(base.short_message_chars),
                    pack_ceiling: t.pack_ceiling.unwrap_or(base.pack_ceiling),
                    oversized_block: t.oversized_block.unwrap_or(base.oversized_block),
                }
            }
            None => ChunkerConfig::default(),
        };
        if chunker.oversized_block < chunker.pack_ceiling {
            return Err(ConfigError::Invalid(
                "chunker.oversized_block must not be smaller than chunker.pack_ceiling".into(),
            )
            .into());
        }

        let dispatch = match toml.dispatch {
            Some(t) => DispatchConfig {
                pacing_ms: t.pacing_ms.unwrap_or(DispatchConfig::default().pacing_ms),
            },
            None => DispatchConfig::default(),
        };

        let contacts = match toml.contacts {
            Some(t) => {
                let base = ContactsConfig::default();
                ContactsConfig {
                    cooldown_hours: t.cooldown_hours.unwrap_or(base.cooldown_hours),
                    default_stage: t.default_stage.unwrap_or(base.default_stage),
                }
            }
            None => ContactsConfig::default(),
        };

        let api = match toml.api.and_then(|t| t.bind) {
            Some(bind) => ApiConfig {
                bind: bind
                    .parse()
                    .map_err(|_| ConfigError::Invalid(format!("invalid api.bind address: {bind}")))?,
            },
            None => ApiConfig::default(),
        };

        Ok(Self {
            data_dir,
            assistant,
            gateway,
            tools,
            debounce,
            driver,
            chunker,
            dispatch,
            contacts,
            api,
        })
    }

    /// Get the SQLite database path.
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("zapbot.db")
    }

    /// Get the log directory.
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    const MINIMAL: &str = indoc! {r#"
        [assistant]
        api_key = "sk-test"

        [gateway]
        base_url = "https://gateway.example"
        api_key = "gw-key"
    "#};

    #[test]
    fn defaults_match_relay_timings() {
        let config = Config::from_toml_str(MINIMAL, PathBuf::from("/tmp/zapbot")).unwrap();

        assert_eq!(config.debounce.quiet_period_ms, 5000);
        assert_eq!(config.driver.poll_interval_ms, 2000);
        assert_eq!(config.driver.max_polls, 30);
        assert_eq!(config.chunker.short_message_chars, 100);
        assert_eq!(config.chunker.pack_ceiling, 150);
        assert_eq!(config.chunker.oversized_block, 250);
        assert_eq!(config.dispatch.pacing_ms, 1000);
        assert_eq!(config.gateway.send_delay_ms, 1200);
        assert_eq!(config.contacts.cooldown_hours, 24);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/zapbot"));
    }

    #[test]
    fn identity_falls_back_to_instance_name() {
        let content = format!("{MINIMAL}\n[assistant.identities]\nloja = \"asst_123\"\n");
        let config = Config::from_toml_str(&content, PathBuf::from(".")).unwrap();

        assert_eq!(config.assistant.identity_for("loja"), "asst_123");
        assert_eq!(config.assistant.identity_for("asst_other"), "asst_other");
    }

    #[test]
    fn overrides_are_applied() {
        let content = format!(
            "{MINIMAL}\n[driver]\nmax_polls = 5\n\n[api]\nbind = \"127.0.0.1:9000\"\n"
        );
        let config = Config::from_toml_str(&content, PathBuf::from(".")).unwrap();

        assert_eq!(config.driver.max_polls, 5);
        assert_eq!(config.driver.poll_interval_ms, 2000);
        assert_eq!(config.api.bind, "127.0.0.1:9000".parse().unwrap());
    }

    #[test]
    fn rejects_invalid_bind_address() {
        let content = format!("{MINIMAL}\n[api]\nbind = \"not an address\"\n");
        let error = Config::from_toml_str(&content, PathBuf::from(".")).unwrap_err();
        assert!(error.to_string().contains("invalid api.bind"));
    }

    #[test]
    fn env_references_are_resolved() {
        assert_eq!(resolve_env_value("plain"), Some("plain".to_string()));
        assert_eq!(
            resolve_env_value("env:ZAPBOT_TEST_SURELY_UNSET_VARIABLE"),
            None
        );
    }
}
