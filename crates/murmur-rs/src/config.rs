//! Configuration for providers, storage, and the session engine.
//!
//! Everything is resolved once at startup. The host (usually `main`) loads an
//! optional JSON file with [`MurmurConfig::load`], fills credentials with
//! [`MurmurConfig::apply_env`], and moves the [`ProviderConfig`] into
//! [`build_provider`](crate::provider::build_provider). Library code never
//! reads the process environment.
//!
//! # Examples
//!
//! ```
//! use murmur_rs::config::{ProviderConfig, ProviderKind};
//!
//! let config = ProviderConfig::new(ProviderKind::Bedrock)
//!     .with_region("eu-west-1")
//!     .with_max_tokens(2048)
//!     .with_temperature(0.2);
//!
//! assert_eq!(config.model, "us.anthropic.claude-3-5-sonnet-20241022-v2:0");
//! assert_eq!(config.max_tokens, 2048);
//! ```

use crate::error::{MurmurError, Result};
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default Anthropic model.
pub const CLAUDE_SONNET: &str = "claude-3-5-sonnet-latest";

/// Default Bedrock model (cross-region inference profile).
pub const BEDROCK_CLAUDE: &str = "us.anthropic.claude-3-5-sonnet-20241022-v2:0";

/// Default Bedrock region.
pub const US_EAST_1: &str = "us-east-1";

pub const DEFAULT_MAX_TOKENS: u32 = 4096;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Base system prompt, before any file context is appended.
pub const BASE_SYSTEM_PROMPT: &str = "You are an AI agent embedded into Neovim, a text editor.";

/// Environment variable holding the Anthropic API key.
pub const ANTHROPIC_KEY_VAR: &str = "ANTHROPIC_API_KEY";

/// Environment variable holding the Bedrock API key (bearer token).
pub const BEDROCK_KEY_VAR: &str = "AWS_BEARER_TOKEN_BEDROCK";

pub const AWS_REGION_VAR: &str = "AWS_REGION";

// ── ProviderKind ───────────────────────────────────────────────────

/// Which backend serves completions.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Direct HTTPS Messages API.
    #[default]
    Anthropic,
    /// Amazon Bedrock InvokeModel API.
    Bedrock,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Bedrock => "bedrock",
        }
    }

    /// Model used when none is configured.
    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => CLAUDE_SONNET,
            ProviderKind::Bedrock => BEDROCK_CLAUDE,
        }
    }

    /// Environment variable the credentials are read from.
    pub fn credential_var(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => ANTHROPIC_KEY_VAR,
            ProviderKind::Bedrock => BEDROCK_KEY_VAR,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = MurmurError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Ok(ProviderKind::Anthropic),
            "bedrock" => Ok(ProviderKind::Bedrock),
            other => Err(MurmurError::InvalidConfig(format!(
                "unknown provider '{other}' (expected 'anthropic' or 'bedrock')"
            ))),
        }
    }
}

// ── ProviderConfig ─────────────────────────────────────────────────

/// Settings a provider is constructed with. Fixed for the provider's
/// lifetime; switching credentials means building a new provider.
#[derive(Serialize, Deserialize, Clone, PartialEq)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// API key or bearer token. Never serialized back out.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// AWS region (Bedrock only).
    pub region: String,
    /// Override for the API base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("api_key", &self.api_key.as_ref().map(|_| "<REDACTED>"))
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::new(ProviderKind::default())
    }
}

impl ProviderConfig {
    /// Defaults for the given backend, without credentials.
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            api_key: None,
            model: kind.default_model().to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            region: US_EAST_1.to_string(),
            endpoint: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// The configured key, if present and non-blank.
    pub fn credentials(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    /// Fail with [`MurmurError::ProviderNotConfigured`] when credentials are
    /// missing, or with [`MurmurError::InvalidConfig`] on nonsensical limits.
    pub fn validate(&self) -> Result<()> {
        if self.credentials().is_none() {
            return Err(MurmurError::ProviderNotConfigured {
                provider: self.kind.as_str(),
                reason: format!("{} is not set", self.kind.credential_var()),
            });
        }
        if self.model.trim().is_empty() {
            return Err(MurmurError::InvalidConfig("model must not be empty".into()));
        }
        if self.max_tokens == 0 {
            return Err(MurmurError::InvalidConfig(
                "max_tokens must be greater than zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(MurmurError::InvalidConfig(format!(
                "temperature {} is outside 0.0..=1.0",
                self.temperature
            )));
        }
        Ok(())
    }
}

// ── MurmurConfig ───────────────────────────────────────────────────

/// Top-level configuration for a host embedding the engine.
///
/// Every field has a default, so a config file only lists what it changes:
///
/// ```json
/// {
///   "provider": { "kind": "bedrock", "region": "us-west-2" },
///   "storage_dir": "/home/me/.local/share/murmur/conversations"
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MurmurConfig {
    #[serde(deserialize_with = "provider_with_kind_defaults")]
    pub provider: ProviderConfig,
    /// Directory conversations are stored in. `None` disables persistence.
    pub storage_dir: Option<PathBuf>,
    /// Directory daily log files are written to. `None` disables logging.
    pub log_dir: Option<PathBuf>,
    pub base_prompt: String,
    pub retry: RetryConfig,
}

impl Default for MurmurConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            storage_dir: None,
            log_dir: None,
            base_prompt: BASE_SYSTEM_PROMPT.to_string(),
            retry: RetryConfig::default(),
        }
    }
}

impl MurmurConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            MurmurError::InvalidConfig(format!("failed to read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&json).map_err(|e| {
            MurmurError::InvalidConfig(format!("failed to parse {}: {e}", path.display()))
        })
    }

    /// Fill credentials and region from an environment lookup.
    ///
    /// Values already present in the config win over the lookup. Taking the
    /// lookup as a closure keeps the environment read in one place (the
    /// caller) and makes the resolution testable.
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if self.provider.credentials().is_none() {
            self.provider.api_key = lookup(self.provider.kind.credential_var());
        }
        if self.provider.kind == ProviderKind::Bedrock
            && self.provider.region == US_EAST_1
            && let Some(region) = lookup(AWS_REGION_VAR).filter(|r| !r.trim().is_empty())
        {
            self.provider.region = region;
        }
        self
    }

    /// Switch the provider backend, resetting the model to that backend's
    /// default when the current model belongs to the old backend.
    pub fn with_provider_kind(mut self, kind: ProviderKind) -> Self {
        if self.provider.kind != kind {
            if self.provider.model == self.provider.kind.default_model() {
                self.provider.model = kind.default_model().to_string();
            }
            self.provider.kind = kind;
            self.provider.api_key = None;
        }
        self
    }
}

/// Deserialize a [`ProviderConfig`] whose missing fields default according to
/// its `kind` (so `{"kind": "bedrock"}` gets the Bedrock model).
fn provider_with_kind_defaults<'de, D>(deserializer: D) -> std::result::Result<ProviderConfig, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Partial {
        #[serde(default)]
        kind: ProviderKind,
        api_key: Option<String>,
        model: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
        region: Option<String>,
        endpoint: Option<String>,
    }

    let p = Partial::deserialize(deserializer)?;
    let defaults = ProviderConfig::new(p.kind);
    Ok(ProviderConfig {
        kind: p.kind,
        api_key: p.api_key,
        model: p.model.unwrap_or(defaults.model),
        max_tokens: p.max_tokens.unwrap_or(defaults.max_tokens),
        temperature: p.temperature.unwrap_or(defaults.temperature),
        region: p.region.unwrap_or(defaults.region),
        endpoint: p.endpoint,
    })
}
