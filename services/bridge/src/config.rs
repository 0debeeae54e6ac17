use secrecy::SecretString;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Expected Twilio account; streams from any other account are dropped.
    pub twilio_account_sid: Option<String>,
    pub rpc_url: Option<String>,
    pub rpc_timeout: Duration,
    /// Serve every call from the in-process backend instead of `rpc_url`.
    pub fake_rpc: bool,
    pub openai_api_key: Option<SecretString>,
    pub openai_prompt: Option<String>,
    pub openai_url: String,
    pub handshake_timeout: Duration,
    pub log_level: Level,
}

fn millis(var: &str, default: u64) -> Result<Duration, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| ConfigError::InvalidValue(var.to_string(), e.to_string())),
        Err(_) => Ok(Duration::from_millis(default)),
    }
}

fn flag(var: &str) -> Result<bool, ConfigError> {
    let Ok(raw) = std::env::var(var) else {
        return Ok(false);
    };
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "" | "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue(
            var.to_string(),
            format!("'{}' is not a boolean", raw),
        )),
    }
}

fn non_empty(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let twilio_account_sid = non_empty("TWILIO_ACCOUNT_SID");

        let fake_rpc = flag("FAKE_RPC")?;
        let rpc_url = non_empty("RPC_URL").map(|url| url.trim_end_matches('/').to_string());
        if !fake_rpc && rpc_url.is_none() {
            return Err(ConfigError::MissingVar(
                "RPC_URL must be set unless FAKE_RPC is enabled".to_string(),
            ));
        }
        let rpc_timeout = millis("RPC_TIMEOUT_MS", 5000)?;

        let openai_api_key = non_empty("OPENAI_API_KEY").map(SecretString::from);
        let openai_prompt = non_empty("OPENAI_PROMPT");
        let openai_url = std::env::var("OPENAI_REALTIME_URL")
            .unwrap_or_else(|_| openai_realtime::DEFAULT_URL.to_string());

        let handshake_timeout = millis("HANDSHAKE_TIMEOUT_MS", 5000)?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            twilio_account_sid,
            rpc_url,
            rpc_timeout,
            fake_rpc,
            openai_api_key,
            openai_prompt,
            openai_url,
            handshake_timeout,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("BIND_ADDRESS");
            env::remove_var("TWILIO_ACCOUNT_SID");
            env::remove_var("RPC_URL");
            env::remove_var("RPC_TIMEOUT_MS");
            env::remove_var("FAKE_RPC");
            env::remove_var("OPENAI_API_KEY");
            env::remove_var("OPENAI_PROMPT");
            env::remove_var("OPENAI_REALTIME_URL");
            env::remove_var("HANDSHAKE_TIMEOUT_MS");
            env::remove_var("RUST_LOG");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_minimal() {
        clear_env_vars();
        unsafe {
            env::set_var("RPC_URL", "http://localhost:50051/");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:8080");
        assert_eq!(config.rpc_url.as_deref(), Some("http://localhost:50051"));
        assert_eq!(config.rpc_timeout, Duration::from_secs(5));
        assert!(!config.fake_rpc);
        assert_eq!(config.twilio_account_sid, None);
        assert!(config.openai_api_key.is_none());
        assert_eq!(config.openai_url, "wss://api.openai.com/v1/realtime");
        assert_eq!(config.handshake_timeout, Duration::from_secs(5));
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    #[serial]
    fn test_config_from_env_fake_rpc() {
        clear_env_vars();
        unsafe {
            env::set_var("BIND_ADDRESS", "127.0.0.1:9090");
            env::set_var("FAKE_RPC", "true");
            env::set_var("TWILIO_ACCOUNT_SID", "AC123");
            env::set_var("OPENAI_API_KEY", "sk-fake");
            env::set_var("OPENAI_PROMPT", "Be helpful.");
            env::set_var("HANDSHAKE_TIMEOUT_MS", "250");
            env::set_var("RUST_LOG", "debug");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "127.0.0.1:9090");
        assert!(config.fake_rpc);
        assert_eq!(config.rpc_url, None);
        assert_eq!(config.twilio_account_sid.as_deref(), Some("AC123"));
        assert_eq!(
            config.openai_api_key.as_ref().map(|k| k.expose_secret()),
            Some("sk-fake")
        );
        assert_eq!(config.openai_prompt.as_deref(), Some("Be helpful."));
        assert_eq!(config.handshake_timeout, Duration::from_millis(250));
        assert_eq!(config.log_level, Level::DEBUG);
        assert!(!format!("{:?}", config).contains("sk-fake"));
    }

    #[test]
    #[serial]
    fn test_config_missing_rpc_url() {
        clear_env_vars();

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(msg) => assert!(msg.contains("RPC_URL")),
            _ => panic!("Expected MissingVar for RPC_URL"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_values() {
        for (var, value) in [
            ("BIND_ADDRESS", "not-a-valid-address"),
            ("FAKE_RPC", "maybe"),
            ("RPC_TIMEOUT_MS", "soon"),
            ("HANDSHAKE_TIMEOUT_MS", "-1"),
            ("RUST_LOG", "not-a-level"),
        ] {
            clear_env_vars();
            unsafe {
                env::set_var("RPC_URL", "http://localhost:50051");
                env::set_var(var, value);
            }

            let err = Config::from_env().unwrap_err();
            match err {
                ConfigError::InvalidValue(name, _) => assert_eq!(name, var),
                _ => panic!("Expected InvalidValue for {var}"),
            }
        }
    }
}
