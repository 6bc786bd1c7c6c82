//! Environment configuration for the worker binary.
//!
//! Transport settings fall back to local dev-server values so `dev`
//! mode works out of the box. The DashScope credential has no fallback
//! and is resolved per job, not at worker startup.

use mynah_agents::AgentError;
use secrecy::SecretString;
use std::env;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {0}")]
    InvalidValue(String),
}

impl From<ConfigError> for AgentError {
    fn from(e: ConfigError) -> Self {
        AgentError::Config(e.to_string())
    }
}

/// Server coordinates the worker registers against.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub url: String,
    pub api_key: String,
    pub api_secret: String,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = var_or("LIVEKIT_URL", "ws://localhost:7880");
        if !["ws://", "wss://", "http://", "https://"]
            .iter()
            .any(|scheme| url.starts_with(scheme))
        {
            return Err(ConfigError::InvalidValue("LIVEKIT_URL".to_string()));
        }
        Ok(Self {
            url,
            api_key: var_or("LIVEKIT_API_KEY", "devkey"),
            api_secret: var_or("LIVEKIT_API_SECRET", "secret"),
        })
    }
}

/// DashScope credential, looked up when a job starts.
pub fn dashscope_api_key() -> Result<SecretString, ConfigError> {
    match env::var("DASHSCOPE_API_KEY") {
        Ok(key) if key.is_empty() => Err(ConfigError::InvalidValue(
            "DASHSCOPE_API_KEY".to_string(),
        )),
        Ok(key) => Ok(SecretString::from(key)),
        Err(_) => Err(ConfigError::MissingVar("DASHSCOPE_API_KEY".to_string())),
    }
}

/// Optional hot-word vocabulary for recognition.
pub fn vocabulary_id() -> Option<String> {
    env::var("DASHSCOPE_VOCABULARY_ID")
        .ok()
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_falls_back_to_dev_server() {
        unsafe {
            env::remove_var("LIVEKIT_URL");
            env::remove_var("LIVEKIT_API_KEY");
            env::remove_var("LIVEKIT_API_SECRET");
        }
        let config = WorkerConfig::from_env().unwrap();
        assert_eq!(config.url, "ws://localhost:7880");
        assert_eq!(config.api_key, "devkey");
        assert_eq!(config.api_secret, "secret");
    }

    #[test]
    #[serial]
    fn test_from_env_reads_transport_vars() {
        unsafe {
            env::set_var("LIVEKIT_URL", "wss://livekit.example.com");
            env::set_var("LIVEKIT_API_KEY", "APIabc");
            env::set_var("LIVEKIT_API_SECRET", "shh");
        }
        let config = WorkerConfig::from_env().unwrap();
        assert_eq!(config.url, "wss://livekit.example.com");
        assert_eq!(config.api_key, "APIabc");
        assert_eq!(config.api_secret, "shh");
        unsafe {
            env::remove_var("LIVEKIT_URL");
            env::remove_var("LIVEKIT_API_KEY");
            env::remove_var("LIVEKIT_API_SECRET");
        }
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_scheme() {
        unsafe {
            env::set_var("LIVEKIT_URL", "ftp://livekit.example.com");
        }
        let err = WorkerConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
        unsafe {
            env::remove_var("LIVEKIT_URL");
        }
    }

    #[test]
    #[serial]
    fn test_dashscope_api_key_is_required() {
        unsafe {
            env::remove_var("DASHSCOPE_API_KEY");
        }
        let err = dashscope_api_key().unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(_)));
        assert!(err.to_string().contains("DASHSCOPE_API_KEY"));

        unsafe {
            env::set_var("DASHSCOPE_API_KEY", "sk-test");
        }
        assert!(dashscope_api_key().is_ok());
        unsafe {
            env::remove_var("DASHSCOPE_API_KEY");
        }
    }
}
