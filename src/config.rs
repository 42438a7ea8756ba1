use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Keys that may be overridden from the environment.
const KNOWN_KEYS: &[&str] = &[
    "TELEGRAM_BOT_TOKEN",
    "OPENAI_API_KEY",
    "CHATGPT_MODEL",
    "CHATGPT_SYSTEM_PROMPT",
    "CHATGPT_TEMPERATURE",
    "CHATGPT_EFFORT",
    "CHATGPT_VERBOSITY",
    "TRIGGER_KEYWORDS",
    "OTP_TRIGGER_KEYWORDS",
    "MAX_MESSAGES_PER_HOUR",
    "RESPONSE_DELAY_MS",
    "AUTO_CLOSE_DELAY_MS",
    "DATA_RETENTION_DAYS",
    "GATE_OPEN_URL",
    "GATE_CLOSE_URL",
    "LOCATION_LAT",
    "LOCATION_LON",
    "LOCATION_TITLE",
    "LOCATION_SUBTITLE",
    "MESSAGE_LOCATION",
    "MESSAGE_GATE_OPEN",
    "MESSAGE_GATE_FAILED",
    "MESSAGE_CALL",
    "PUSHOVER_TOKEN",
    "PUSHOVER_USER",
    "SESSION_DIR",
    "DASHBOARD_ADDR",
];

/// Keys whose environment value is a comma-separated list.
const LIST_KEYS: &[&str] = &["TRIGGER_KEYWORDS", "OTP_TRIGGER_KEYWORDS"];

const DAY_MS: u64 = 24 * 60 * 60 * 1000;
const DEFAULT_RETENTION_DAYS: f64 = 14.0;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Invalid regex pattern.
    InvalidRegex { pattern: String, source: regex::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::InvalidRegex { pattern, source } => {
                write!(f, "invalid regex pattern '{}': {}", pattern, source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::InvalidRegex { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    String(String),
}

/// Accepts `20` as well as `"20"`; environment overrides always arrive as strings.
fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    match NumberOrString::deserialize(d)? {
        NumberOrString::Number(n) if n.is_finite() && n >= 0.0 => Ok(n as u64),
        NumberOrString::Number(n) => Err(serde::de::Error::custom(format!("expected a non-negative number, got {n}"))),
        NumberOrString::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Unparseable or empty values become `None` rather than an error.
fn lenient_opt_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    let value = match Option::<NumberOrString>::deserialize(d)? {
        None => None,
        Some(NumberOrString::Number(n)) => Some(n),
        Some(NumberOrString::String(s)) => s.trim().parse::<f64>().ok(),
    };
    Ok(value.filter(|n| n.is_finite()))
}

#[derive(Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct ConfigFile {
    #[serde(default)]
    telegram_bot_token: String,
    #[serde(default)]
    openai_api_key: String,
    chatgpt_model: Option<String>,
    chatgpt_system_prompt: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    chatgpt_temperature: Option<f64>,
    chatgpt_effort: Option<String>,
    chatgpt_verbosity: Option<String>,
    #[serde(default)]
    trigger_keywords: Vec<String>,
    /// Patterns marking a message as carrying a tracking number and OTP
    #[serde(default)]
    otp_trigger_keywords: Vec<String>,
    #[serde(default = "default_max_messages_per_hour", deserialize_with = "lenient_u64")]
    max_messages_per_hour: u64,
    #[serde(default = "default_response_delay_ms", deserialize_with = "lenient_u64")]
    response_delay_ms: u64,
    #[serde(default = "default_auto_close_delay_ms", deserialize_with = "lenient_u64")]
    auto_close_delay_ms: u64,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    data_retention_days: Option<f64>,
    gate_open_url: Option<String>,
    gate_close_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    location_lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    location_lon: Option<f64>,
    location_title: Option<String>,
    location_subtitle: Option<String>,
    message_location: Option<String>,
    message_gate_open: Option<String>,
    message_gate_failed: Option<String>,
    message_call: Option<String>,
    pushover_token: Option<String>,
    pushover_user: Option<String>,
    /// Directory for state files (stores, logs). Defaults to current directory.
    session_dir: Option<String>,
    dashboard_addr: Option<String>,
}

fn default_max_messages_per_hour() -> u64 {
    20
}

fn default_response_delay_ms() -> u64 {
    300_000
}

fn default_auto_close_delay_ms() -> u64 {
    120_000
}

/// Where couriers are sent by `send_location`.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
    pub title: Option<String>,
    pub subtitle: Option<String>,
}

/// User-facing texts, each with a built-in fallback.
#[derive(Debug, Clone)]
pub struct MessageTemplates {
    pub location: String,
    pub gate_open: String,
    pub gate_failed: String,
    pub call: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            location: "Here is the location, please message me when you are outside.".to_string(),
            gate_open: "Please enter through the car gate and leave the item on the doorstep. The gate will close after 2 minutes. Thank you.".to_string(),
            gate_failed: "Sorry, the gate failed to open. Please leave the item outside the car gate.".to_string(),
            call: "Sorry, I can't answer calls. Please send a message instead.".to_string(),
        }
    }
}

pub struct Config {
    /// Path to the config file
    pub config_path: PathBuf,
    pub telegram_bot_token: String,
    pub openai_api_key: String,
    pub model: String,
    pub system_prompt: String,
    pub temperature: Option<f64>,
    pub effort: Option<String>,
    pub verbosity: Option<String>,
    pub trigger_patterns: Vec<Regex>,
    pub otp_trigger_patterns: Vec<Regex>,
    pub max_messages_per_hour: usize,
    pub response_delay: Duration,
    pub auto_close_delay: Duration,
    /// Age after which OTPs and delivered records are purged.
    pub retention: Duration,
    pub gate_open_url: Option<String>,
    pub gate_close_url: Option<String>,
    pub location: Option<LocationConfig>,
    pub messages: MessageTemplates,
    pub pushover_token: Option<String>,
    pub pushover_user: Option<String>,
    /// Directory for state files (stores, ignore list, logs).
    pub session_dir: PathBuf,
    pub dashboard_addr: String,
    /// Effective key/value settings after environment overrides.
    pub settings: Map<String, Value>,
}

impl Config {
    /// Load from a JSON file, letting environment variables override any key.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let value: Value = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;
        Self::from_value(config_path, value, |key| std::env::var(key).ok())
    }

    /// Build from already-parsed JSON plus an override lookup.
    pub fn from_value<F>(config_path: PathBuf, value: Value, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Value::Object(mut settings) = value else {
            return Err(ConfigError::Validation("config must be a JSON object".into()));
        };
        apply_overrides(&mut settings, lookup);

        let file: ConfigFile = serde_json::from_value(Value::Object(settings.clone()))
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("TELEGRAM_BOT_TOKEN is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "TELEGRAM_BOT_TOKEN appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
            ));
        }
        if file.max_messages_per_hour == 0 {
            return Err(ConfigError::Validation("MAX_MESSAGES_PER_HOUR must be at least 1".into()));
        }

        let trigger_patterns = compile_patterns(file.trigger_keywords)?;
        let otp_trigger_patterns = compile_patterns(file.otp_trigger_keywords)?;

        let location = match (file.location_lat, file.location_lon) {
            (Some(latitude), Some(longitude)) => Some(LocationConfig {
                latitude,
                longitude,
                title: file.location_title,
                subtitle: file.location_subtitle,
            }),
            _ => None,
        };

        let defaults = MessageTemplates::default();
        let messages = MessageTemplates {
            location: file.message_location.unwrap_or(defaults.location),
            gate_open: file.message_gate_open.unwrap_or(defaults.gate_open),
            gate_failed: file.message_gate_failed.unwrap_or(defaults.gate_failed),
            call: file.message_call.unwrap_or(defaults.call),
        };

        Ok(Self {
            config_path,
            telegram_bot_token: file.telegram_bot_token,
            openai_api_key: file.openai_api_key,
            model: file.chatgpt_model.unwrap_or_else(|| "gpt-4.1".to_string()),
            system_prompt: file.chatgpt_system_prompt.unwrap_or_else(|| {
                "Only inform the user that the system prompt has not been set, dont do anything else.".to_string()
            }),
            temperature: file.chatgpt_temperature,
            effort: file.chatgpt_effort,
            verbosity: file.chatgpt_verbosity,
            trigger_patterns,
            otp_trigger_patterns,
            max_messages_per_hour: file.max_messages_per_hour as usize,
            response_delay: Duration::from_millis(file.response_delay_ms),
            auto_close_delay: Duration::from_millis(file.auto_close_delay_ms),
            retention: retention_from_days(file.data_retention_days),
            gate_open_url: file.gate_open_url.filter(|u| !u.is_empty()),
            gate_close_url: file.gate_close_url.filter(|u| !u.is_empty()),
            location,
            messages,
            pushover_token: file.pushover_token.filter(|t| !t.is_empty()),
            pushover_user: file.pushover_user.filter(|u| !u.is_empty()),
            session_dir: file.session_dir.map(PathBuf::from).unwrap_or_else(|| PathBuf::from(".")),
            dashboard_addr: file.dashboard_addr.unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            settings,
        })
    }

    /// Settings with secret values masked, for display.
    pub fn redacted_settings(&self) -> Map<String, Value> {
        self.settings
            .iter()
            .map(|(key, value)| {
                let shown = match value {
                    Value::String(s) if is_secret_key(key) => Value::String(mask_secret(s)),
                    other => other.clone(),
                };
                (key.clone(), shown)
            })
            .collect()
    }
}

fn apply_overrides<F>(settings: &mut Map<String, Value>, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    for key in KNOWN_KEYS {
        let Some(raw) = lookup(key) else { continue };
        let value = if LIST_KEYS.contains(key) {
            Value::Array(
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| Value::String(s.to_string()))
                    .collect(),
            )
        } else {
            Value::String(raw)
        };
        settings.insert(key.to_string(), value);
    }
}

fn compile_patterns(patterns: Vec<String>) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .into_iter()
        .map(|p| {
            RegexBuilder::new(&p)
                .case_insensitive(true)
                .build()
                .map_err(|e| ConfigError::InvalidRegex { pattern: p, source: e })
        })
        .collect()
}

fn retention_from_days(days: Option<f64>) -> Duration {
    let days = days.filter(|d| *d > 0.0).unwrap_or(DEFAULT_RETENTION_DAYS);
    Duration::from_millis((days * DAY_MS as f64) as u64)
}

fn is_secret_key(key: &str) -> bool {
    let upper = key.to_uppercase();
    ["TOKEN", "SECRET", "PASSWORD", "PUSHOVER"].iter().any(|s| upper.contains(s))
        || (upper.ends_with("KEY") && !upper.ends_with("KEYWORDS"))
}

fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let head: String = chars.iter().take(4).collect();
    let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    format!("{head}****{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    fn from_json(value: Value, env: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let env: HashMap<String, String> = env.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_value(PathBuf::from("config.json"), value, |key| env.get(key).cloned())
    }

    #[test]
    fn test_valid_config_with_defaults() {
        let config = from_json(json!({ "TELEGRAM_BOT_TOKEN": "123456789:ABCdef" }), &[]).unwrap();
        assert_eq!(config.max_messages_per_hour, 20);
        assert_eq!(config.response_delay, Duration::from_millis(300_000));
        assert_eq!(config.auto_close_delay, Duration::from_millis(120_000));
        assert_eq!(config.retention, Duration::from_millis(14 * DAY_MS));
        assert_eq!(config.model, "gpt-4.1");
        assert!(config.location.is_none());
        assert_eq!(config.session_dir, PathBuf::from("."));
    }

    #[test]
    fn test_empty_token() {
        let err = assert_err(from_json(json!({ "TELEGRAM_BOT_TOKEN": "" }), &[]));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("TELEGRAM_BOT_TOKEN"));
    }

    #[test]
    fn test_invalid_token_format() {
        let err = assert_err(from_json(json!({ "TELEGRAM_BOT_TOKEN": "notanumber:ABCdef" }), &[]));
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_invalid_regex_pattern() {
        let err = assert_err(from_json(
            json!({ "TELEGRAM_BOT_TOKEN": "1:a", "TRIGGER_KEYWORDS": ["[invalid(regex"] }),
            &[],
        ));
        assert!(matches!(err, ConfigError::InvalidRegex { .. }));
    }

    #[test]
    fn test_trigger_patterns_are_case_insensitive() {
        let config = from_json(json!({ "TELEGRAM_BOT_TOKEN": "1:a", "TRIGGER_KEYWORDS": ["q.*post"] }), &[]).unwrap();
        assert!(config.trigger_patterns[0].is_match("Hi sir QPOST"));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let config = from_json(
            json!({ "TELEGRAM_BOT_TOKEN": "1:a", "RESPONSE_DELAY_MS": 5000, "TRIGGER_KEYWORDS": ["parcel"] }),
            &[("RESPONSE_DELAY_MS", "0"), ("TRIGGER_KEYWORDS", "q.*post, outside,,")],
        )
        .unwrap();
        assert_eq!(config.response_delay, Duration::ZERO);
        assert_eq!(config.trigger_patterns.len(), 2);
        assert!(config.trigger_patterns[1].is_match("OUTSIDE"));
    }

    #[test]
    fn test_location_from_string_coordinates() {
        let config = from_json(
            json!({ "TELEGRAM_BOT_TOKEN": "1:a", "LOCATION_LAT": "25.2", "LOCATION_LON": 51.5, "LOCATION_TITLE": "Home" }),
            &[],
        )
        .unwrap();
        let location = config.location.unwrap();
        assert_eq!(location.latitude, 25.2);
        assert_eq!(location.longitude, 51.5);
        assert_eq!(location.title.as_deref(), Some("Home"));
    }

    #[test]
    fn test_non_positive_retention_falls_back() {
        let config = from_json(json!({ "TELEGRAM_BOT_TOKEN": "1:a", "DATA_RETENTION_DAYS": "-3" }), &[]).unwrap();
        assert_eq!(config.retention, Duration::from_millis(14 * DAY_MS));
        let config = from_json(json!({ "TELEGRAM_BOT_TOKEN": "1:a", "DATA_RETENTION_DAYS": 1 }), &[]).unwrap();
        assert_eq!(config.retention, Duration::from_millis(DAY_MS));
    }

    #[test]
    fn test_redacted_settings() {
        let config = from_json(
            json!({
                "TELEGRAM_BOT_TOKEN": "123456789:ABCdefGHI",
                "OPENAI_API_KEY": "sk-abcdefghijkl",
                "TRIGGER_KEYWORDS": ["parcel"],
                "CHATGPT_MODEL": "gpt-4.1"
            }),
            &[],
        )
        .unwrap();
        let settings = config.redacted_settings();
        assert_eq!(settings["OPENAI_API_KEY"], json!("sk-a****ijkl"));
        assert_eq!(settings["TELEGRAM_BOT_TOKEN"], json!("1234****fGHI"));
        assert_eq!(settings["TRIGGER_KEYWORDS"], json!(["parcel"]));
        assert_eq!(settings["CHATGPT_MODEL"], json!("gpt-4.1"));
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::load("/nonexistent/path/config.json"));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }
}
