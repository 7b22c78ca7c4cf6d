use crate::constants;
use crate::error::Result;
use serde::Deserialize;
use std::fs;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub espoo: EspooConfig,
}

#[derive(Debug, Deserialize)]
pub struct EspooConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

fn default_base_url() -> String {
    constants::DEFAULT_BASE_URL.to_string()
}

fn default_max_retries() -> u32 {
    constants::MAX_RETRY
}

fn default_retry_delay_secs() -> u64 {
    constants::RETRY_DELAY_SECS
}

impl Default for EspooConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl Config {
    /// Load `config.toml` from the working directory, falling back to the
    /// built-in defaults when the file does not exist. The feed base URL can
    /// always be overridden through the `ESPOO_BASE_URL` environment variable.
    pub fn load() -> Result<Self> {
        let mut config: Config = match fs::read_to_string("config.toml") {
            Ok(content) => toml::from_str(&content)?,
            Err(_) => Config {
                espoo: EspooConfig::default(),
            },
        };

        if let Ok(base_url) = std::env::var("ESPOO_BASE_URL") {
            config.espoo.base_url = base_url;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_missing_sections() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.espoo.base_url, constants::DEFAULT_BASE_URL);
        assert_eq!(config.espoo.max_retries, 5);
    }

    #[test]
    fn file_values_override_defaults() {
        let config: Config =
            toml::from_str("[espoo]\nbase_url = \"http://localhost:9000\"\nmax_retries = 2\n")
                .unwrap();
        assert_eq!(config.espoo.base_url, "http://localhost:9000");
        assert_eq!(config.espoo.max_retries, 2);
        assert_eq!(config.espoo.retry_delay_secs, 5);
    }
}
