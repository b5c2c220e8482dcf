//! Relay configuration: provider credentials, retry policy, fallbacks, and
//! deadlines.
//!
//! # Example JSON
//!
//! ```json
//! {
//!   "providers": {
//!     "openai": { "api_key_env": "OPENAI_API_KEY" },
//!     "anthropic": { "enabled": false }
//!   },
//!   "retry": { "max_attempts": 3, "base_delay_ms": 1000, "jitter_ms": 1000 },
//!   "fallbacks": [
//!     { "provider": "google", "model": "gemini-2.0-flash" }
//!   ],
//!   "request_timeout_secs": 120
//! }
//! ```

use crate::api::{Candidate, Provider, RetryPolicy};
use crate::error::{GenerationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

/// Default overall deadline for one request.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Fast, highly available fallback models tried after the requested one.
pub fn default_fallbacks() -> Vec<Candidate> {
    vec![
        Candidate::new(Provider::Google, "gemini-2.0-flash"),
        Candidate::new(Provider::Anthropic, "claude-3-5-haiku-latest"),
    ]
}

/// Per-provider connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Name of the environment variable holding the API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Override of the provider's API base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Set to `false` to exclude the provider even when a key is present.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_key_env: None,
            base_url: None,
            enabled: true,
        }
    }
}

impl ProviderSettings {
    /// Environment variable consulted for `provider`'s key.
    pub fn key_env(&self, provider: Provider) -> &str {
        self.api_key_env
            .as_deref()
            .unwrap_or_else(|| default_key_env(provider))
    }
}

/// Conventional API key variable for each provider.
pub fn default_key_env(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAi => "OPENAI_API_KEY",
        Provider::Anthropic => "ANTHROPIC_API_KEY",
        Provider::Google => "GEMINI_API_KEY",
    }
}

/// Top-level relay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub providers: BTreeMap<Provider, ProviderSettings>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_fallbacks")]
    pub fallbacks: Vec<Candidate>,
    /// Hard deadline for a whole request, across every candidate.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: Option<u64>,
    /// Timeout for a single upstream call. `None` relies on the HTTP client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_timeout_secs: Option<u64>,
}

fn default_request_timeout() -> Option<u64> {
    Some(DEFAULT_REQUEST_TIMEOUT_SECS)
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            providers: BTreeMap::new(),
            retry: RetryPolicy::default(),
            fallbacks: default_fallbacks(),
            request_timeout_secs: default_request_timeout(),
            call_timeout_secs: None,
        }
    }
}

impl RelayConfig {
    /// Validate invariants: at least one attempt, non-zero timeouts, non-empty
    /// fallback model ids.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(GenerationError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_secs == Some(0) {
            return Err(GenerationError::Config(
                "Request timeout must be greater than 0".to_string(),
            ));
        }
        if self.call_timeout_secs == Some(0) {
            return Err(GenerationError::Config(
                "Call timeout must be greater than 0".to_string(),
            ));
        }
        if let Some(bad) = self.fallbacks.iter().find(|c| c.model.trim().is_empty()) {
            return Err(GenerationError::Config(format!(
                "Fallback for provider '{}' has an empty model id",
                bad.provider
            )));
        }
        Ok(())
    }

    /// Settings for `provider`, falling back to defaults.
    pub fn settings(&self, provider: Provider) -> ProviderSettings {
        self.providers.get(&provider).cloned().unwrap_or_default()
    }

    /// Resolve the API key for `provider` from the environment.
    pub fn api_key(&self, provider: Provider) -> Result<String> {
        let settings = self.settings(provider);
        let env_var = settings.key_env(provider);
        std::env::var(env_var)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| GenerationError::Config(format!("{} env var not set", env_var)))
    }

    /// Providers that are enabled and have a key in the environment.
    ///
    /// A provider without credentials is simply left out.
    pub fn credentialed_providers(&self) -> BTreeSet<Provider> {
        Provider::ALL
            .into_iter()
            .filter(|p| self.settings(*p).enabled)
            .filter(|p| {
                let present = self.api_key(*p).is_ok();
                if !present {
                    tracing::debug!(provider = %p, "No credentials configured; provider excluded");
                }
                present
            })
            .collect()
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_secs.map(Duration::from_secs)
    }

    /// Parse and validate a config from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)
            .map_err(|e| GenerationError::Config(format!("Invalid relay config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            GenerationError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&contents)
    }
}
