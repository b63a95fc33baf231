// ⚙️ Configuration - Environment variables with defaults
//
// `.env` is loaded first (if present), then every setting falls back to a
// default so the CLI works with an empty environment.

use crate::error::{LedgerError, Result};
use std::path::PathBuf;

pub const DEFAULT_DATABASE: &str = "ledgerdesk.db";
pub const DEFAULT_BIND: &str = "0.0.0.0:3000";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_OPENAI_MAX_TOKENS: u32 = 2000;
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Placeholder shipped in sample `.env` files; treated as "no key".
const PLACEHOLDER_API_KEY: &str = "your-openai-api-key-here";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub bind_addr: String,
    pub log_json: bool,
    pub openai: OpenAiSettings,
}

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub base_url: String,
    pub temperature: f32,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        OpenAiSettings {
            api_key: None,
            model: DEFAULT_OPENAI_MODEL.to_string(),
            max_tokens: DEFAULT_OPENAI_MAX_TOKENS,
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            temperature: 0.7,
        }
    }
}

impl OpenAiSettings {
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

impl Config {
    /// Load `.env` and read the process environment.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup (the environment, or a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_key = get("OPENAI_API_KEY").filter(|key| key != PLACEHOLDER_API_KEY);

        let max_tokens = match get("OPENAI_MAX_TOKENS") {
            Some(raw) => raw.parse::<u32>().map_err(|_| {
                LedgerError::Config(format!("OPENAI_MAX_TOKENS must be a positive integer, got '{}'", raw))
            })?,
            None => DEFAULT_OPENAI_MAX_TOKENS,
        };

        let log_json = match get("LEDGER_LOG_JSON").as_deref() {
            None => false,
            Some("1") | Some("true") | Some("yes") => true,
            Some("0") | Some("false") | Some("no") => false,
            Some(other) => {
                return Err(LedgerError::Config(format!(
                    "LEDGER_LOG_JSON must be true or false, got '{}'",
                    other
                )))
            }
        };

        Ok(Config {
            database_path: PathBuf::from(get("LEDGER_DATABASE").unwrap_or_else(|| DEFAULT_DATABASE.to_string())),
            bind_addr: get("LEDGER_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            log_json,
            openai: OpenAiSettings {
                api_key,
                model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
                max_tokens,
                base_url: get("OPENAI_BASE_URL")
                    .map(|url| url.trim_end_matches('/').to_string())
                    .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
                temperature: 0.7,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.database_path, PathBuf::from("ledgerdesk.db"));
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.openai.model, "gpt-4o-mini");
        assert_eq!(config.openai.max_tokens, 2000);
        assert!(!config.openai.is_configured());
        assert!(!config.log_json);
    }

    #[test]
    fn test_placeholder_key_is_not_configured() {
        let config = config_from(&[("OPENAI_API_KEY", "your-openai-api-key-here")]).unwrap();
        assert!(config.openai.api_key.is_none());

        let config = config_from(&[("OPENAI_API_KEY", "sk-live")]).unwrap();
        assert_eq!(config.openai.api_key.as_deref(), Some("sk-live"));
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let config = config_from(&[
            ("OPENAI_BASE_URL", "http://localhost:8080/v1/"),
            ("OPENAI_MAX_TOKENS", "512"),
            ("LEDGER_LOG_JSON", "true"),
        ])
        .unwrap();
        assert_eq!(config.openai.base_url, "http://localhost:8080/v1");
        assert_eq!(config.openai.max_tokens, 512);
        assert!(config.log_json);

        assert!(matches!(
            config_from(&[("OPENAI_MAX_TOKENS", "lots")]),
            Err(LedgerError::Config(_))
        ));
    }
}
