//! Runtime configuration.
//!
//! [`PlannerConfig`] is plain serde data with defaults for every field, so a
//! YAML file only needs to name what it changes. Environment variables are
//! applied on top of whatever was loaded.
//!
//! # Environment Variables
//!
//! - `TRIPCREW_CONFIG`: path of a YAML file loaded before the variables below
//! - `LLM_BASE_URL`, `LLM_API_KEY`, `LLM_MODEL_ID`: completion endpoint
//! - `LLM_TIMEOUT`: completion timeout in seconds
//! - `AMAP_API_KEY`: key for the AMap lookups
//! - `UNSPLASH_ACCESS_KEY`: key for attraction photos
//! - `HOST`, `PORT`: HTTP bind address

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hub::HubConfig;
use crate::planner::geofence::DestinationEntry;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// An environment variable held a value of the wrong shape.
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

// ============================================================================
// Sections
// ============================================================================

/// Completion endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    #[serde(with = "opt_secs")]
    pub timeout: Option<Duration>,
    /// Consume completions as SSE fragment streams.
    pub stream: bool,
    pub max_retries: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4-turbo".to_string(),
            temperature: 0.7,
            max_tokens: Some(4096),
            timeout: Some(Duration::from_secs(100)),
            stream: false,
            max_retries: 2,
        }
    }
}

/// AMap REST API settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmapSettings {
    pub api_key: Option<String>,
    pub base_url: String,
}

impl Default for AmapSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://restapi.amap.com".to_string(),
        }
    }
}

/// Unsplash photo search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnsplashSettings {
    pub access_key: Option<String>,
    pub base_url: String,
}

impl Default for UnsplashSettings {
    fn default() -> Self {
        Self {
            access_key: None,
            base_url: "https://api.unsplash.com".to_string(),
        }
    }
}

/// Per-unit engine limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitSettings {
    pub max_tool_iterations: usize,
    #[serde(with = "opt_secs")]
    pub tool_timeout: Option<Duration>,
}

impl Default for UnitSettings {
    fn default() -> Self {
        Self {
            max_tool_iterations: 3,
            tool_timeout: Some(Duration::from_secs(30)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl ServerSettings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ============================================================================
// PlannerConfig
// ============================================================================

/// Top-level configuration of the planner and its server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub llm: LlmSettings,
    pub amap: AmapSettings,
    pub unsplash: UnsplashSettings,
    pub units: UnitSettings,
    pub hub: HubConfig,
    /// Keep finished sessions' blackboards in the store.
    pub retain_sessions: bool,
    /// Upper bound on retained boards; the least recently updated go first.
    pub max_retained_sessions: usize,
    /// Destination boxes added to the built-in table.
    pub destinations: Vec<DestinationEntry>,
    pub server: ServerSettings,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            llm: LlmSettings::default(),
            amap: AmapSettings::default(),
            unsplash: UnsplashSettings::default(),
            units: UnitSettings::default(),
            hub: HubConfig::default(),
            retain_sessions: false,
            max_retained_sessions: 100,
            destinations: Vec::new(),
            server: ServerSettings::default(),
        }
    }
}

impl PlannerConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load `TRIPCREW_CONFIG` if set, then apply the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("TRIPCREW_CONFIG") {
            Ok(path) if !path.trim().is_empty() => {
                log::info!("Loading configuration from {}", path);
                Self::from_yaml_file(path.trim())?
            }
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay values returned by `lookup`. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = get("LLM_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get("LLM_MODEL_ID") {
            self.llm.model = v;
        }
        if let Some(v) = get("LLM_TIMEOUT") {
            let secs: u64 = parse_value("LLM_TIMEOUT", &v)?;
            self.llm.timeout = Some(Duration::from_secs(secs));
        }
        if let Some(v) = get("AMAP_API_KEY") {
            self.amap.api_key = Some(v);
        }
        if let Some(v) = get("UNSPLASH_ACCESS_KEY") {
            self.unsplash.access_key = Some(v);
        }
        if let Some(v) = get("HOST") {
            self.server.host = v;
        }
        if let Some(v) = get("PORT") {
            self.server.port = parse_value("PORT", &v)?;
        }
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Serde helper for `Option<Duration>` written as fractional seconds.
pub mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(deserializer)?;
        match secs {
            Some(s) if s.is_finite() && s >= 0.0 => Ok(Some(Duration::from_secs_f64(s))),
            Some(s) => Err(serde::de::Error::custom(format!("invalid duration: {}", s))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PlannerConfig::default();
        assert_eq!(config.llm.model, "gpt-4-turbo");
        assert_eq!(config.llm.timeout, Some(Duration::from_secs(100)));
        assert_eq!(config.units.max_tool_iterations, 3);
        assert_eq!(config.hub.max_rounds, 3);
        assert_eq!(config.server.bind_addr(), "0.0.0.0:8000");
        assert!(!config.retain_sessions);
        assert_eq!(config.max_retained_sessions, 100);
        assert_eq!(config.unsplash.base_url, "https://api.unsplash.com");
        assert!(config.unsplash.access_key.is_none());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
llm:
  model: qwen-plus
  timeout: 2.5
hub:
  max_rounds: 5
  round_timeout: 10
units:
  tool_timeout: null
retain_sessions: true
max_retained_sessions: 8
"#;
        let config = PlannerConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.llm.model, "qwen-plus");
        assert_eq!(config.llm.timeout, Some(Duration::from_millis(2500)));
        assert_eq!(config.llm.temperature, 0.7);
        assert_eq!(config.hub.max_rounds, 5);
        assert_eq!(config.hub.round_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.hub.handler_timeout, None);
        assert_eq!(config.units.tool_timeout, None);
        assert_eq!(config.units.max_tool_iterations, 3);
        assert!(config.retain_sessions);
        assert_eq!(config.max_retained_sessions, 8);
    }

    #[test]
    fn test_yaml_destinations() {
        let yaml = r#"
destinations:
  - name: lhasa
    aliases: ["拉萨"]
    bounds: { min_lat: 29.0, max_lat: 30.2, min_lng: 90.5, max_lng: 91.6 }
"#;
        let config = PlannerConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.destinations.len(), 1);
        assert_eq!(config.destinations[0].aliases, vec!["拉萨".to_string()]);
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server:\n  port: 9100").unwrap();
        let config = PlannerConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = PlannerConfig::from_yaml_file("/nonexistent/tripcrew.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_apply_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("LLM_MODEL_ID", "glm-4"),
            ("LLM_API_KEY", "sk-test"),
            ("LLM_TIMEOUT", "30"),
            ("AMAP_API_KEY", "amap-key"),
            ("UNSPLASH_ACCESS_KEY", "unsplash-key"),
            ("PORT", "8088"),
            ("HOST", ""),
        ]
        .into_iter()
        .collect();

        let mut config = PlannerConfig::default();
        config
            .apply_env(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.llm.model, "glm-4");
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.llm.timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.amap.api_key.as_deref(), Some("amap-key"));
        assert_eq!(config.unsplash.access_key.as_deref(), Some("unsplash-key"));
        assert_eq!(config.server.port, 8088);
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn test_apply_env_rejects_bad_port() {
        let mut config = PlannerConfig::default();
        let err = config
            .apply_env(|k| (k == "PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
