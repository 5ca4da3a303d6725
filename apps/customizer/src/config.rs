use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::PipelineSettings;

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub anthropic_api_key: String,
    pub port: u16,
    pub rust_log: String,
    pub max_retries: u32,
    pub request_timeout: Duration,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub research_cache_ttl_days: i64,
    pub research_cache_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup (the environment, or a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let research_cache_ttl_days: i64 = parse_or(&lookup, "RESEARCH_CACHE_TTL_DAYS", 30)?;
        if research_cache_ttl_days < 0 {
            anyhow::bail!("RESEARCH_CACHE_TTL_DAYS must not be negative");
        }

        Ok(Config {
            anthropic_api_key: require(&lookup, "ANTHROPIC_API_KEY")?,
            port: parse_or(&lookup, "PORT", 8080)?,
            rust_log: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            max_retries: parse_or(&lookup, "MAX_RETRIES", 3)?,
            request_timeout: Duration::from_secs(parse_or(&lookup, "REQUEST_TIMEOUT", 30)?),
            retry_base_delay: Duration::from_millis(parse_or(&lookup, "RETRY_BASE_DELAY_MS", 1000)?),
            retry_max_delay: Duration::from_millis(parse_or(&lookup, "RETRY_MAX_DELAY_MS", 8000)?),
            research_cache_ttl_days,
            research_cache_dir: lookup("RESEARCH_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/company_research")),
        })
    }

    /// The knobs a pipeline run needs, detached from the environment.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_delay: self.retry_base_delay,
                max_delay: self.retry_max_delay,
                request_timeout: self.request_timeout,
            },
            research_ttl: chrono::Duration::days(self.research_cache_ttl_days),
        }
    }
}

fn require(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    lookup(key)
        .filter(|value| !value.trim().is_empty())
        .with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_lookup(lookup(&[("ANTHROPIC_API_KEY", "sk-test")])).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.rust_log, "info");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.research_cache_ttl_days, 30);
        assert_eq!(
            config.research_cache_dir,
            PathBuf::from("./data/company_research")
        );

        let settings = config.pipeline_settings();
        assert_eq!(settings.retry, RetryPolicy::default());
        assert_eq!(settings.research_ttl, chrono::Duration::days(30));
    }

    #[test]
    fn test_missing_api_key_fails() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn test_overrides_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("MAX_RETRIES", "5"),
            ("REQUEST_TIMEOUT", "10"),
            ("RESEARCH_CACHE_TTL_DAYS", "7"),
            ("RESEARCH_CACHE_DIR", "/var/cache/research"),
        ]))
        .unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(
            config.pipeline_settings().research_ttl,
            chrono::Duration::days(7)
        );
        assert_eq!(config.research_cache_dir, PathBuf::from("/var/cache/research"));
    }

    #[test]
    fn test_malformed_number_fails_with_key() {
        let err = Config::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("MAX_RETRIES", "three"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("MAX_RETRIES"));
    }
}
