// ⚙️ Settings + logging bootstrap
//
// Load order: defaults → JSON file named by LTC_CONFIG → LTC_<FIELD> env vars.

use crate::pagination::{PageLimits, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub const CONFIG_PATH_VAR: &str = "LTC_CONFIG";
const ENV_PREFIX: &str = "LTC_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_path: PathBuf,
    pub api_host: String,
    pub api_port: u16,
    pub api_prefix: String,
    pub project_name: String,
    pub version: String,
    pub cache_enabled: bool,
    pub cache_ttl_secs: u64,
    pub log_level: String,
    pub log_json: bool,
    pub cors_origins: Vec<String>,
    pub default_page_limit: usize,
    pub max_page_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database_path: PathBuf::from("ltc_warehouse.db"),
            api_host: "0.0.0.0".to_string(),
            api_port: 8000,
            api_prefix: "/api/v1".to_string(),
            project_name: "LTC Insurance Data Service".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            cache_enabled: true,
            cache_ttl_secs: 300,
            log_level: "INFO".to_string(),
            log_json: false,
            cors_origins: vec![
                "http://localhost:8501".to_string(),
                "http://localhost:3000".to_string(),
            ],
            default_page_limit: DEFAULT_PAGE_LIMIT,
            max_page_limit: MAX_PAGE_LIMIT,
        }
    }
}

fn parse<T: FromStr>(key: &str, raw: &str) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("{}{}: cannot parse '{}': {}", ENV_PREFIX, key, raw, e))
}

impl Settings {
    /// Settings for this process, from the real environment
    pub fn load() -> anyhow::Result<Self> {
        let mut settings = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => Settings::from_file(Path::new(&path))?,
            Err(_) => Settings::default(),
        };
        settings.apply_overrides(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults overlaid with a JSON file (missing keys keep their default)
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Apply `LTC_<FIELD>` overrides; `lookup` receives the upper-case field name
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("API_HOST") {
            self.api_host = v;
        }
        if let Some(v) = lookup("API_PORT") {
            self.api_port = parse("API_PORT", &v)?;
        }
        if let Some(v) = lookup("API_PREFIX") {
            self.api_prefix = v;
        }
        if let Some(v) = lookup("PROJECT_NAME") {
            self.project_name = v;
        }
        if let Some(v) = lookup("VERSION") {
            self.version = v;
        }
        if let Some(v) = lookup("CACHE_ENABLED") {
            self.cache_enabled = parse("CACHE_ENABLED", &v.to_lowercase())?;
        }
        if let Some(v) = lookup("CACHE_TTL_SECS") {
            self.cache_ttl_secs = parse("CACHE_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = lookup("LOG_JSON") {
            self.log_json = parse("LOG_JSON", &v.to_lowercase())?;
        }
        if let Some(v) = lookup("CORS_ORIGINS") {
            self.cors_origins = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = lookup("DEFAULT_PAGE_LIMIT") {
            self.default_page_limit = parse("DEFAULT_PAGE_LIMIT", &v)?;
        }
        if let Some(v) = lookup("MAX_PAGE_LIMIT") {
            self.max_page_limit = parse("MAX_PAGE_LIMIT", &v)?;
        }
        Ok(())
    }

    /// Normalize the prefix and reject inconsistent paging bounds
    pub fn validate(&mut self) -> anyhow::Result<()> {
        let trimmed = self.api_prefix.trim().trim_end_matches('/');
        self.api_prefix = if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        };
        if self.api_prefix == "/" {
            bail!("api_prefix must name a path segment, got '{}'", self.api_prefix);
        }

        if self.default_page_limit == 0 || self.max_page_limit == 0 {
            bail!("page limits must be positive");
        }
        if self.default_page_limit > self.max_page_limit {
            bail!(
                "default_page_limit ({}) exceeds max_page_limit ({})",
                self.default_page_limit,
                self.max_page_limit
            );
        }
        Ok(())
    }

    pub fn page_limits(&self) -> PageLimits {
        PageLimits {
            default_limit: self.default_page_limit,
            max_limit: self.max_page_limit,
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `log_level`.
/// Safe to call twice; the second call is a no-op.
pub fn init_logging(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.to_lowercase()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let _ = if settings.log_json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.api_port, 8000);
        assert_eq!(s.api_prefix, "/api/v1");
        assert!(s.cache_enabled);
        assert_eq!(s.cache_ttl(), Duration::from_secs(300));
        assert_eq!(s.page_limits(), PageLimits::default());
    }

    #[test]
    fn test_env_overrides() {
        let mut s = Settings::default();
        s.apply_overrides(env(&[
            ("API_PORT", "9001"),
            ("CACHE_ENABLED", "FALSE"),
            ("CORS_ORIGINS", "https://a.example, https://b.example"),
            ("MAX_PAGE_LIMIT", "500"),
        ]))
        .unwrap();

        assert_eq!(s.api_port, 9001);
        assert!(!s.cache_enabled);
        assert_eq!(s.cors_origins, vec!["https://a.example", "https://b.example"]);
        assert_eq!(s.max_page_limit, 500);
    }

    #[test]
    fn test_malformed_override_fails() {
        let mut s = Settings::default();
        let err = s.apply_overrides(env(&[("API_PORT", "eighty")])).unwrap_err();
        assert!(err.to_string().contains("LTC_API_PORT"));
    }

    #[test]
    fn test_validate_normalizes_prefix() {
        let mut s = Settings { api_prefix: "api/v2/".to_string(), ..Settings::default() };
        s.validate().unwrap();
        assert_eq!(s.api_prefix, "/api/v2");

        let mut bad = Settings { default_page_limit: 2000, ..Settings::default() };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_root_prefix_is_rejected() {
        for prefix in ["/", "", "  ", "//"] {
            let mut s = Settings { api_prefix: prefix.to_string(), ..Settings::default() };
            assert!(s.validate().is_err(), "prefix {:?} accepted", prefix);
        }
    }

    #[test]
    fn test_partial_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"api_port": 8100, "log_json": true}}"#).unwrap();
        file.flush().unwrap();

        let s = Settings::from_file(file.path()).unwrap();
        assert_eq!(s.api_port, 8100);
        assert!(s.log_json);
        assert_eq!(s.api_host, "0.0.0.0");
    }
}
