//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// Gemini's OpenAI-compatible endpoint.
pub const DEFAULT_LLM_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub log_level: Level,
    pub gemini_api_key: String,
    pub llm_api_base: String,
    pub fast_model: String,
    pub pro_model: String,
    /// Directory holding the pdfium shared library; the system library is used otherwise.
    pub pdfium_library_dir: Option<PathBuf>,
    /// How long the "crafting your quiz" placeholder stays up before the quiz appears.
    pub quiz_reveal_delay: Duration,
    pub max_upload_bytes: usize,
    pub cors_origin: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        // --- Server Settings ---
        let bind_address_str = var_or("BIND_ADDRESS", "0.0.0.0:3000");
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- The single required credential ---
        let gemini_api_key = lookup("GEMINI_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        // --- Model Settings ---
        let llm_api_base = var_or("LLM_API_BASE", DEFAULT_LLM_API_BASE);
        let fast_model = var_or("FAST_MODEL", "gemini-2.5-flash");
        let pro_model = var_or("PRO_MODEL", "gemini-2.5-pro");

        // --- Adapter-specific Settings ---
        let pdfium_library_dir = lookup("PDFIUM_LIBRARY_DIR").map(PathBuf::from);

        let quiz_reveal_delay = Duration::from_millis(parse_number(
            "QUIZ_REVEAL_DELAY_MS",
            lookup("QUIZ_REVEAL_DELAY_MS"),
            1500,
        )?);
        let max_upload_bytes =
            parse_number("MAX_UPLOAD_BYTES", lookup("MAX_UPLOAD_BYTES"), 20 * 1024 * 1024)?;
        let cors_origin = var_or("CORS_ORIGIN", "http://localhost:5173");

        Ok(Self {
            bind_address,
            log_level,
            gemini_api_key,
            llm_api_base,
            fast_model,
            pro_model,
            pdfium_library_dir,
            quiz_reveal_delay,
            max_upload_bytes,
            cors_origin,
        })
    }
}

fn parse_number<T: std::str::FromStr>(
    key: &str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(key.to_string(), format!("'{}' is not a number", raw))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_the_key_is_set() {
        let config = Config::from_lookup(lookup(&[("GEMINI_API_KEY", "secret")])).unwrap();
        assert_eq!(config.bind_address.to_string(), "0.0.0.0:3000");
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.llm_api_base, DEFAULT_LLM_API_BASE);
        assert_eq!(config.quiz_reveal_delay, Duration::from_millis(1500));
        assert_eq!(config.max_upload_bytes, 20 * 1024 * 1024);
        assert!(config.pdfium_library_dir.is_none());
    }

    #[test]
    fn missing_api_key_is_reported() {
        let err = Config::from_lookup(lookup(&[("GEMINI_API_KEY", "  ")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(var) if var == "GEMINI_API_KEY"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "secret"),
            ("QUIZ_REVEAL_DELAY_MS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(var, _) if var == "QUIZ_REVEAL_DELAY_MS"));

        let err = Config::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "secret"),
            ("BIND_ADDRESS", "nowhere"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(var, _) if var == "BIND_ADDRESS"));
    }

    #[test]
    fn zero_delay_disables_the_placeholder() {
        let config = Config::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "secret"),
            ("QUIZ_REVEAL_DELAY_MS", "0"),
            ("PRO_MODEL", "custom-pro"),
        ]))
        .unwrap();
        assert!(config.quiz_reveal_delay.is_zero());
        assert_eq!(config.pro_model, "custom-pro");
    }
}
