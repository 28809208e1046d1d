use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::language::Language;
use crate::util::{is_local_endpoint_url, parse_timeout};

pub const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_EVAL_TIMEOUT: Duration = Duration::from_millis(5_000);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api_key: Option<String>,
    pub model: String,
    pub api_url: String,
    pub anthropic_version: String,
    /// Wire protocol override ("anthropic" or "openai"); inferred from the URL when unset.
    pub api_protocol: Option<String>,
    pub max_tokens: Option<u32>,
    /// `None` lets a provider call wait indefinitely.
    pub request_timeout: Option<Duration>,
    /// `None` disables the sandbox interrupt.
    pub eval_timeout: Option<Duration>,
    /// Heap limit for the JavaScript sandbox in bytes; `None` is unlimited.
    pub memory_limit: Option<usize>,
    pub language: Language,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            anthropic_version: "2023-06-01".to_string(),
            api_protocol: None,
            max_tokens: None,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            eval_timeout: Some(DEFAULT_EVAL_TIMEOUT),
            memory_limit: None,
            language: Language::JavaScript,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let defaults = Self::default();

        let api_url = env_value("CODEBENCH_API_URL").unwrap_or(defaults.api_url);
        let api_key = env_value("CODEBENCH_API_KEY");
        let model = env_value("CODEBENCH_MODEL").unwrap_or(defaults.model);
        let anthropic_version =
            env_value("CODEBENCH_ANTHROPIC_VERSION").unwrap_or(defaults.anthropic_version);
        let api_protocol = env_value("CODEBENCH_API_PROTOCOL");
        let max_tokens = match env_value("CODEBENCH_MAX_TOKENS") {
            Some(raw) => match raw.parse::<u32>() {
                Ok(value) => Some(value),
                Err(_) => bail!("Invalid CODEBENCH_MAX_TOKENS '{raw}': expected an integer"),
            },
            None => None,
        };
        let request_timeout = match env_value("CODEBENCH_REQUEST_TIMEOUT_SECS") {
            Some(raw) => match parse_timeout(&raw, Duration::from_secs) {
                Some(timeout) => timeout,
                None => bail!("Invalid CODEBENCH_REQUEST_TIMEOUT_SECS '{raw}': expected seconds"),
            },
            None => defaults.request_timeout,
        };
        let eval_timeout = match env_value("CODEBENCH_EVAL_TIMEOUT_MS") {
            Some(raw) => match parse_timeout(&raw, Duration::from_millis) {
                Some(timeout) => timeout,
                None => bail!("Invalid CODEBENCH_EVAL_TIMEOUT_MS '{raw}': expected milliseconds"),
            },
            None => defaults.eval_timeout,
        };
        let memory_limit = match env_value("CODEBENCH_MEMORY_LIMIT_MB") {
            Some(raw) => match raw.parse::<usize>() {
                Ok(0) => None,
                Ok(megabytes) => Some(megabytes.saturating_mul(1024 * 1024)),
                Err(_) => bail!("Invalid CODEBENCH_MEMORY_LIMIT_MB '{raw}': expected megabytes"),
            },
            None => defaults.memory_limit,
        };
        let language = match env_value("CODEBENCH_LANGUAGE") {
            Some(raw) => match Language::from_id(&raw) {
                Some(language) => language,
                None => bail!("Unknown CODEBENCH_LANGUAGE '{raw}'"),
            },
            None => defaults.language,
        };

        Ok(Self {
            api_key,
            model,
            api_url,
            anthropic_version,
            api_protocol,
            max_tokens,
            request_timeout,
            eval_timeout,
            memory_limit,
            language,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            bail!(
                "Invalid CODEBENCH_API_URL '{}': expected http:// or https:// URL",
                self.api_url
            );
        }

        let local_endpoint = self.is_local_endpoint();
        if !local_endpoint && self.api_key.is_none() {
            bail!(
                "CODEBENCH_API_KEY must be set for non-local endpoints (url: '{}')",
                self.api_url
            );
        }

        if !local_endpoint && self.model.starts_with("local/") {
            bail!("Local models are only allowed for localhost endpoints");
        }

        if self.model.trim().is_empty() {
            bail!("CODEBENCH_MODEL must not be empty");
        }

        if let Some(protocol) = &self.api_protocol {
            if !matches!(
                protocol.trim().to_ascii_lowercase().as_str(),
                "anthropic" | "messages" | "openai" | "chat" | "chat_completions"
            ) {
                bail!("Unknown CODEBENCH_API_PROTOCOL '{protocol}': expected 'anthropic' or 'openai'");
            }
        }

        Ok(())
    }

    pub fn is_local_endpoint(&self) -> bool {
        is_local_endpoint_url(&self.api_url)
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_env() {
        for name in [
            "CODEBENCH_API_URL",
            "CODEBENCH_API_KEY",
            "CODEBENCH_MODEL",
            "CODEBENCH_ANTHROPIC_VERSION",
            "CODEBENCH_API_PROTOCOL",
            "CODEBENCH_MAX_TOKENS",
            "CODEBENCH_REQUEST_TIMEOUT_SECS",
            "CODEBENCH_EVAL_TIMEOUT_MS",
            "CODEBENCH_MEMORY_LIMIT_MB",
            "CODEBENCH_LANGUAGE",
        ] {
            std::env::remove_var(name);
        }
    }

    #[test]
    fn test_load_uses_defaults_when_env_is_empty() {
        let _env_lock = crate::test_support::ENV_LOCK.blocking_lock();
        clear_env();

        let config = Config::load().expect("defaults should load");
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.request_timeout, Some(DEFAULT_REQUEST_TIMEOUT));
        assert_eq!(config.language, Language::JavaScript);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_load_reads_timeouts_and_language() {
        let _env_lock = crate::test_support::ENV_LOCK.blocking_lock();
        clear_env();
        std::env::set_var("CODEBENCH_REQUEST_TIMEOUT_SECS", "0");
        std::env::set_var("CODEBENCH_EVAL_TIMEOUT_MS", "250");
        std::env::set_var("CODEBENCH_LANGUAGE", "py");

        let config = Config::load().expect("config should load");
        assert_eq!(config.request_timeout, None);
        assert_eq!(config.eval_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.language, Language::Python);
        clear_env();
    }

    #[test]
    fn test_load_reads_memory_limit_in_megabytes() {
        let _env_lock = crate::test_support::ENV_LOCK.blocking_lock();
        clear_env();
        std::env::set_var("CODEBENCH_MEMORY_LIMIT_MB", "64");
        let config = Config::load().expect("config should load");
        assert_eq!(config.memory_limit, Some(64 * 1024 * 1024));

        std::env::set_var("CODEBENCH_MEMORY_LIMIT_MB", "0");
        let config = Config::load().expect("config should load");
        assert_eq!(config.memory_limit, None);

        std::env::set_var("CODEBENCH_MEMORY_LIMIT_MB", "lots");
        assert!(Config::load().is_err());
        clear_env();
    }

    #[test]
    fn test_load_rejects_unknown_language() {
        let _env_lock = crate::test_support::ENV_LOCK.blocking_lock();
        clear_env();
        std::env::set_var("CODEBENCH_LANGUAGE", "cobol");

        assert!(Config::load().is_err());
        clear_env();
    }
}
