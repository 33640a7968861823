//! Environment-driven configuration

use crate::analyzer::AnalyzerConfig;
use crate::error::AssistantError;
use crate::interpreter::ExtractionPolicy;
use crate::Result;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_SCOPE: &str = "default";
/// Upper bound for `MODEL_MAX_RETRIES`.
pub const MAX_MODEL_RETRIES: u32 = 10;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub model_timeout: Duration,
    pub model_max_retries: u32,
    pub extraction: ExtractionPolicy,
    pub api_port: u16,
    pub database_url: Option<String>,
    pub history_file: Option<PathBuf>,
    pub history_scope: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: String::new(),
            gemini_model: DEFAULT_MODEL.to_string(),
            model_timeout: Duration::from_secs(30),
            model_max_retries: 0,
            extraction: ExtractionPolicy::Greedy,
            api_port: DEFAULT_PORT,
            database_url: None,
            history_file: None,
            history_scope: DEFAULT_SCOPE.to_string(),
        }
    }
}

impl AppConfig {
    /// Read configuration from the process environment (call `dotenv` first).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read configuration through an arbitrary lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let extraction = match get("EXTRACTION_POLICY").as_deref() {
            None => defaults.extraction,
            Some("greedy") => ExtractionPolicy::Greedy,
            Some("balanced") => ExtractionPolicy::Balanced,
            Some(other) => {
                return Err(AssistantError::Configuration(format!(
                    "EXTRACTION_POLICY must be 'greedy' or 'balanced', got '{}'",
                    other
                )))
            }
        };

        Ok(Self {
            gemini_api_key: get("GEMINI_API_KEY").unwrap_or_default(),
            gemini_model: get("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            model_timeout: get("MODEL_TIMEOUT_SECS")
                .map(|v| parse_number::<u64>("MODEL_TIMEOUT_SECS", &v))
                .transpose()?
                .map(Duration::from_secs)
                .unwrap_or(defaults.model_timeout),
            model_max_retries: get("MODEL_MAX_RETRIES")
                .map(|v| parse_retries(&v))
                .transpose()?
                .unwrap_or(defaults.model_max_retries),
            extraction,
            api_port: get("PORT")
                .or_else(|| get("API_PORT"))
                .map(|v| parse_number("PORT", &v))
                .transpose()?
                .unwrap_or(defaults.api_port),
            database_url: get("POSTGRES_URL").or_else(|| get("DATABASE_URL")),
            history_file: get("HISTORY_FILE").map(PathBuf::from),
            history_scope: get("HISTORY_SCOPE").unwrap_or(defaults.history_scope),
        })
    }

    pub fn analyzer_config(&self) -> AnalyzerConfig {
        AnalyzerConfig {
            timeout: self.model_timeout,
            max_retries: self.model_max_retries,
            extraction: self.extraction,
        }
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        AssistantError::Configuration(format!("{} must be a non-negative integer, got '{}'", key, value))
    })
}

fn parse_retries(value: &str) -> Result<u32> {
    let retries: u32 = parse_number("MODEL_MAX_RETRIES", value)?;
    if retries > MAX_MODEL_RETRIES {
        return Err(AssistantError::Configuration(format!(
            "MODEL_MAX_RETRIES must be at most {}, got {}",
            MAX_MODEL_RETRIES, retries
        )));
    }
    Ok(retries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert!(config.gemini_api_key.is_empty());
        assert_eq!(config.gemini_model, DEFAULT_MODEL);
        assert_eq!(config.model_timeout, Duration::from_secs(30));
        assert_eq!(config.model_max_retries, 0);
        assert_eq!(config.api_port, DEFAULT_PORT);
        assert!(config.database_url.is_none());
        assert_eq!(config.history_scope, DEFAULT_SCOPE);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("GEMINI_API_KEY", "k"),
            ("MODEL_TIMEOUT_SECS", "5"),
            ("MODEL_MAX_RETRIES", "2"),
            ("API_PORT", "9000"),
            ("DATABASE_URL", "postgres://localhost/db"),
            ("HISTORY_FILE", "/tmp/history.json"),
            ("EXTRACTION_POLICY", "balanced"),
        ])
        .unwrap();

        assert_eq!(config.gemini_api_key, "k");
        assert_eq!(config.model_timeout, Duration::from_secs(5));
        assert_eq!(config.api_port, 9000);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/db"));
        assert_eq!(config.history_file, Some(PathBuf::from("/tmp/history.json")));

        let analyzer = config.analyzer_config();
        assert_eq!(analyzer.max_retries, 2);
        assert_eq!(analyzer.extraction, ExtractionPolicy::Balanced);
    }

    #[test]
    fn test_port_takes_precedence_and_blank_is_unset() {
        let config = config_from(&[("PORT", "3000"), ("API_PORT", "9000"), ("GEMINI_MODEL", " ")]).unwrap();
        assert_eq!(config.api_port, 3000);
        assert_eq!(config.gemini_model, DEFAULT_MODEL);
    }

    #[test]
    fn test_malformed_numbers() {
        let err = config_from(&[("MODEL_TIMEOUT_SECS", "soon")]).unwrap_err();
        assert!(matches!(err, AssistantError::Configuration(_)));

        assert!(config_from(&[("PORT", "70000")]).is_err());
        assert!(config_from(&[("EXTRACTION_POLICY", "fuzzy")]).is_err());
    }

    #[test]
    fn test_retry_count_is_bounded() {
        let err = config_from(&[("MODEL_MAX_RETRIES", "4294967295")]).unwrap_err();
        assert!(matches!(err, AssistantError::Configuration(_)));
        assert!(config_from(&[("MODEL_MAX_RETRIES", "11")]).is_err());

        let config = config_from(&[("MODEL_MAX_RETRIES", "10")]).unwrap();
        assert_eq!(config.analyzer_config().max_retries, MAX_MODEL_RETRIES);
    }
}
