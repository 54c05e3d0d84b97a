//! Application configuration.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

use crate::error::{AppError, AppResult};

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream API configuration.
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Account key to bearer token.
    #[serde(default)]
    pub accounts: BTreeMap<String, String>,
    /// Rate limit policy thresholds.
    #[serde(default)]
    pub thresholds: ThresholdsConfig,
    /// Survey blacklist: field name to regular expression.
    #[serde(default)]
    pub blacklist: BTreeMap<String, String>,
    /// Log filter directive used when `RUST_LOG` is unset.
    #[serde(default)]
    pub log_level: Option<String>,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Upstream API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL every logical path is appended to.
    #[serde(default)]
    pub base_url: String,
    /// Page size injected into collection requests that do not set one.
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    /// Timeout for a single upstream call, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Trigger ratios for one policy.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PolicyThresholds {
    /// Ratio of remaining/limit for the per-minute window.
    pub minute: f64,
    /// Ratio of remaining/limit for the per-day window.
    pub day: f64,
}

/// Thresholds for both rate limit policies.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ThresholdsConfig {
    /// Ratios at which new upstream calls are refused.
    #[serde(default = "default_request_rejection")]
    pub request_rejection: PolicyThresholds,
    /// Ratios at which upstream calls are slowed down.
    #[serde(default = "default_delayed_response")]
    pub delayed_response: PolicyThresholds,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            per_page: default_per_page(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            request_rejection: default_request_rejection(),
            delayed_response: default_delayed_response(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    5000
}

const fn default_per_page() -> u32 {
    1000
}

const fn default_timeout_secs() -> u64 {
    60
}

const fn default_request_rejection() -> PolicyThresholds {
    PolicyThresholds {
        minute: 0.1,
        day: 0.1,
    }
}

const fn default_delayed_response() -> PolicyThresholds {
    PolicyThresholds {
        minute: 0.3,
        day: 0.3,
    }
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (based on `SURVEY_PROXY_ENV`)
    /// 3. Environment variables with `SURVEY_PROXY` prefix
    /// 4. Flat variables of existing deployments (`SURVEYMONKEY_URL`, ...)
    pub fn load() -> AppResult<Self> {
        let env = std::env::var("SURVEY_PROXY_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("SURVEY_PROXY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Self = config.try_deserialize()?;
        config.apply_legacy_env(&std::env::vars().collect())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay the flat environment variables used by existing deployments.
    pub fn apply_legacy_env(&mut self, kv: &HashMap<String, String>) -> AppResult<()> {
        if let Some(url) = non_empty(kv, "SURVEYMONKEY_URL") {
            self.upstream.base_url = url.to_string();
        }

        if let Some(list) = non_empty(kv, "SURVEYMONKEY_ACCESS_TOKEN_LIST") {
            let tokens: BTreeMap<String, String> = serde_json::from_str(list).map_err(|e| {
                AppError::Config(format!(
                    "SURVEYMONKEY_ACCESS_TOKEN_LIST must be a JSON object of key to token: {e}"
                ))
            })?;
            self.accounts.extend(tokens);
        }
        if self.accounts.is_empty()
            && let Some(token) = non_empty(kv, "SURVEYMONKEY_ACCESS_TOKEN")
        {
            self.accounts
                .insert("default".to_string(), token.to_string());
        }

        if let Some(per_page) = non_empty(kv, "PER_PAGE") {
            self.upstream.per_page = per_page
                .parse()
                .map_err(|_| AppError::Config("PER_PAGE must be an integer".to_string()))?;
        }

        let overrides = [
            ("THRESHOLD_FOR_REQUEST_REJECTION_MINUTE", &mut self.thresholds.request_rejection.minute),
            ("THRESHOLD_FOR_REQUEST_REJECTION_DAY", &mut self.thresholds.request_rejection.day),
            ("THRESHOLD_FOR_DELAYED_RESPONSE_MINUTE", &mut self.thresholds.delayed_response.minute),
            ("THRESHOLD_FOR_DELAYED_RESPONSE_DAY", &mut self.thresholds.delayed_response.day),
        ];
        for (key, slot) in overrides {
            if let Some(value) = non_empty(kv, key) {
                *slot = value
                    .parse()
                    .map_err(|_| AppError::Config(format!("{key} must be a number")))?;
            }
        }

        if let Some(ids) = non_empty(kv, "SURVEY_BLACKLIST") {
            let ids = ids
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(regex::escape)
                .collect::<Vec<_>>();
            if !ids.is_empty() {
                self.blacklist
                    .insert("id".to_string(), format!("^(?:{})$", ids.join("|")));
            }
        }

        if let Some(port) = non_empty(kv, "PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| AppError::Config("PORT must be a valid port number".to_string()))?;
        }

        if let Some(level) = non_empty(kv, "LOGLEVEL") {
            let level = match level.to_lowercase().as_str() {
                "warning" => "warn".to_string(),
                "critical" | "fatal" => "error".to_string(),
                other => other.to_string(),
            };
            self.log_level = Some(level);
        }

        Ok(())
    }

    /// Check the loaded values and normalize the base URL.
    pub fn validate(&mut self) -> AppResult<()> {
        let base_url = self.upstream.base_url.trim();
        if base_url.is_empty() {
            return Err(AppError::Config(
                "upstream.base_url (or SURVEYMONKEY_URL) is required".to_string(),
            ));
        }
        url::Url::parse(base_url)
            .map_err(|e| AppError::Config(format!("upstream.base_url is not a valid URL: {e}")))?;
        let mut base_url = base_url.to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        self.upstream.base_url = base_url;

        if self.upstream.per_page == 0 {
            return Err(AppError::Config("upstream.per_page must be >= 1".to_string()));
        }

        if self.accounts.is_empty() {
            return Err(AppError::Config(
                "at least one account token must be configured".to_string(),
            ));
        }

        let thresholds = [
            self.thresholds.request_rejection.minute,
            self.thresholds.request_rejection.day,
            self.thresholds.delayed_response.minute,
            self.thresholds.delayed_response.day,
        ];
        if thresholds
            .iter()
            .any(|t| !t.is_finite() || !(0.0..=1.0).contains(t))
        {
            return Err(AppError::Config(
                "rate limit thresholds must be between 0 and 1".to_string(),
            ));
        }

        for (field, pattern) in &self.blacklist {
            regex::Regex::new(pattern).map_err(|e| {
                AppError::Config(format!("blacklist pattern for {field} does not compile: {e}"))
            })?;
        }

        Ok(())
    }
}

fn non_empty<'a>(kv: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    kv.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_config() -> Config {
        Config::default()
    }

    fn legacy_env() -> HashMap<String, String> {
        HashMap::from([
            (
                "SURVEYMONKEY_URL".to_string(),
                "https://api.surveymonkey.net/v3".to_string(),
            ),
            (
                "SURVEYMONKEY_ACCESS_TOKEN_LIST".to_string(),
                r#"{"eu": "token-eu", "us": "token-us"}"#.to_string(),
            ),
        ])
    }

    #[test]
    fn test_legacy_env_overlay() {
        let mut config = empty_config();
        let mut env = legacy_env();
        env.insert("PER_PAGE".to_string(), "50".to_string());
        env.insert("SURVEY_BLACKLIST".to_string(), " 5, 7 ".to_string());
        env.insert(
            "THRESHOLD_FOR_DELAYED_RESPONSE_DAY".to_string(),
            "0.5".to_string(),
        );

        config.apply_legacy_env(&env).unwrap();
        config.validate().unwrap();

        assert_eq!(config.upstream.base_url, "https://api.surveymonkey.net/v3/");
        assert_eq!(config.upstream.per_page, 50);
        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.accounts["us"], "token-us");
        assert_eq!(config.blacklist["id"], "^(?:5|7)$");
        assert_eq!(config.thresholds.delayed_response.day, 0.5);
        assert_eq!(config.thresholds.delayed_response.minute, 0.3);
        assert_eq!(config.thresholds.request_rejection.minute, 0.1);
    }

    #[test]
    fn test_single_token_fallback() {
        let mut config = empty_config();
        let env = HashMap::from([
            ("SURVEYMONKEY_URL".to_string(), "http://localhost/".to_string()),
            ("SURVEYMONKEY_ACCESS_TOKEN".to_string(), "abc".to_string()),
        ]);

        config.apply_legacy_env(&env).unwrap();
        config.validate().unwrap();

        assert_eq!(config.accounts["default"], "abc");
    }

    #[test]
    fn test_log_level_names_are_mapped() {
        let mut config = empty_config();
        let env = HashMap::from([("LOGLEVEL".to_string(), "WARNING".to_string())]);
        config.apply_legacy_env(&env).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("warn"));
    }

    #[test]
    fn test_missing_accounts_fails() {
        let mut config = empty_config();
        config.upstream.base_url = "http://localhost/".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_invalid_token_list_fails() {
        let mut config = empty_config();
        let env = HashMap::from([(
            "SURVEYMONKEY_ACCESS_TOKEN_LIST".to_string(),
            "[\"not\", \"a map\"]".to_string(),
        )]);
        assert!(config.apply_legacy_env(&env).is_err());
    }

    #[test]
    fn test_threshold_out_of_range_fails() {
        let mut config = empty_config();
        config.apply_legacy_env(&legacy_env()).unwrap();
        config.thresholds.request_rejection.day = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_blacklist_pattern_fails() {
        let mut config = empty_config();
        config.apply_legacy_env(&legacy_env()).unwrap();
        config
            .blacklist
            .insert("title".to_string(), "(unclosed".to_string());
        assert!(config.validate().is_err());
    }
}
