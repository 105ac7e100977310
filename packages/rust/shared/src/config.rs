//! Application configuration for webextract.
//!
//! User config lives at `~/.webextract/webextract.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ExtractError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "webextract.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".webextract";

/// Default database file name inside the config directory.
const DB_FILE_NAME: &str = "webextract.db";

/// Credits charged per URL entering the fetch stage.
pub const DEFAULT_CREDITS_PER_URL: u64 = 5;

// ---------------------------------------------------------------------------
// Config structs (matching webextract.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Request defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// OpenRouter settings for the extraction call.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Billing settings.
    #[serde(default)]
    pub billing: BillingConfig,

    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Fetcher settings.
    #[serde(default)]
    pub fetch: FetchConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Origin tag attached to runs started from this machine.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Overall run timeout in milliseconds (unset = no explicit budget).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Maximum links per expanded seed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    /// Account charged for local runs.
    #[serde(default = "default_account_id")]
    pub account_id: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            timeout_ms: None,
            limit: None,
            account_id: default_account_id(),
        }
    }
}

fn default_origin() -> String {
    "cli".into()
}
fn default_account_id() -> String {
    "local".into()
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used for extraction.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// API base URL (any OpenAI-compatible endpoint works).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// HTTP timeout for the extraction request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_request_timeout() -> u64 {
    120
}

/// `[billing]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Record charges in the local credit ledger.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Credits per URL that enters the fetch stage.
    #[serde(default = "default_credits_per_url")]
    pub credits_per_url: u64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            credits_per_url: DEFAULT_CREDITS_PER_URL,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_credits_per_url() -> u64 {
    DEFAULT_CREDITS_PER_URL
}

/// `[storage]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database path; defaults to `~/.webextract/webextract.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Allow fetching loopback/private hosts.
    #[serde(default)]
    pub allow_private_hosts: bool,

    /// Upper bound on a response body, in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            allow_private_hosts: false,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_max_body_bytes() -> u64 {
    10 * 1024 * 1024
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.webextract/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| ExtractError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.webextract/webextract.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

impl AppConfig {
    /// Resolved database path.
    pub fn db_path(&self) -> Result<PathBuf> {
        match &self.storage.db_path {
            Some(p) => Ok(PathBuf::from(p)),
            None => Ok(config_dir()?.join(DB_FILE_NAME)),
        }
    }
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ExtractError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| ExtractError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ExtractError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ExtractError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ExtractError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the OpenRouter API key from the configured env var.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.openrouter.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(ExtractError::config(format!(
            "OpenRouter API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://openrouter.ai/keys"
        ))),
    }
}
