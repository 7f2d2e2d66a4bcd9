use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

const APP_JSON: &str = "app.json";
const AUTHORITY_JSON: &str = "authority.json";
const AUTHORITY_URL_ENV: &str = "ALARMS_AUTHORITY_URL";

pub const DEFAULT_AUTHORITY_URL: &str = "http://127.0.0.1:7070/";
const DEFAULT_TIMEOUT_SECONDS: u64 = 10;
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const DEFAULT_RECENT_LIMIT: usize = 50;

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigBundle {
    pub app: serde_json::Value,
    pub authority: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlarmSettings {
    pub app_name: String,
    pub timezone: Tz,
    pub recent_limit: usize,
    pub authority_base_url: String,
    pub authority_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for AlarmSettings {
    fn default() -> Self {
        Self {
            app_name: "SleepWake".to_string(),
            timezone: Tz::UTC,
            recent_limit: DEFAULT_RECENT_LIMIT,
            authority_base_url: DEFAULT_AUTHORITY_URL.to_string(),
            authority_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "SleepWake",
                "timezone": "UTC",
                "recentLimit": DEFAULT_RECENT_LIMIT
            }),
        ),
        (
            AUTHORITY_JSON,
            serde_json::json!({
                "schema": 1,
                "baseUrl": DEFAULT_AUTHORITY_URL,
                "timeoutSeconds": DEFAULT_TIMEOUT_SECONDS,
                "pollIntervalMs": DEFAULT_POLL_INTERVAL_MS
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    Ok(ConfigBundle {
        app: read_config(&config_dir.join(APP_JSON))?,
        authority: read_config(&config_dir.join(AUTHORITY_JSON))?,
    })
}

pub fn load_settings(config_dir: &Path) -> Result<AlarmSettings, InfraError> {
    load_settings_with_lookup(config_dir, |key| std::env::var(key).ok())
}

pub fn load_settings_with_lookup<F>(config_dir: &Path, lookup: F) -> Result<AlarmSettings, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let bundle = load_configs(config_dir)?;
    let defaults = AlarmSettings::default();

    let timezone = match read_str(&bundle.app, "timezone") {
        Some(name) => name.parse::<Tz>().map_err(|error| {
            InfraError::InvalidConfig(format!("invalid timezone '{name}': {error}"))
        })?,
        None => defaults.timezone,
    };

    let authority_base_url = lookup(AUTHORITY_URL_ENV)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| read_str(&bundle.authority, "baseUrl"))
        .unwrap_or(defaults.authority_base_url);
    url::Url::parse(&authority_base_url).map_err(|error| {
        InfraError::InvalidConfig(format!("invalid authority baseUrl '{authority_base_url}': {error}"))
    })?;

    let timeout_seconds = read_u64(&bundle.authority, "timeoutSeconds")
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_TIMEOUT_SECONDS);
    let poll_interval_ms = read_u64(&bundle.authority, "pollIntervalMs")
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_POLL_INTERVAL_MS);

    Ok(AlarmSettings {
        app_name: read_str(&bundle.app, "appName").unwrap_or(defaults.app_name),
        timezone,
        recent_limit: read_u64(&bundle.app, "recentLimit")
            .filter(|value| *value > 0)
            .map(|value| value as usize)
            .unwrap_or(defaults.recent_limit),
        authority_base_url,
        authority_timeout: Duration::from_secs(timeout_seconds),
        poll_interval: Duration::from_millis(poll_interval_ms),
    })
}

fn read_str(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn read_u64(value: &serde_json::Value, key: &str) -> Option<u64> {
    value.get(key).and_then(serde_json::Value::as_u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_CONFIG_DIR: AtomicUsize = AtomicUsize::new(0);

    fn temp_config_dir() -> PathBuf {
        let sequence = NEXT_CONFIG_DIR.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "sleepwake-config-tests-{}-{}",
            std::process::id(),
            sequence
        ));
        fs::create_dir_all(&path).expect("create config dir");
        path
    }

    #[test]
    fn defaults_are_written_and_loaded() {
        let dir = temp_config_dir();
        ensure_default_configs(&dir).expect("write defaults");

        let settings = load_settings_with_lookup(&dir, |_| None).expect("load settings");
        assert_eq!(settings, AlarmSettings::default());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn environment_overrides_authority_url() {
        let dir = temp_config_dir();
        ensure_default_configs(&dir).expect("write defaults");

        let settings = load_settings_with_lookup(&dir, |key| match key {
            "ALARMS_AUTHORITY_URL" => Some("http://alarmd.local:9000/".to_string()),
            _ => None,
        })
        .expect("load settings");
        assert_eq!(settings.authority_base_url, "http://alarmd.local:9000/");
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn zero_limits_fall_back_to_defaults() {
        let dir = temp_config_dir();
        ensure_default_configs(&dir).expect("write defaults");
        fs::write(dir.join(APP_JSON), r#"{"schema": 1, "recentLimit": 0}"#)
            .expect("write app config");
        fs::write(
            dir.join(AUTHORITY_JSON),
            r#"{"schema": 1, "timeoutSeconds": 0, "pollIntervalMs": 0}"#,
        )
        .expect("write authority config");

        let settings = load_settings_with_lookup(&dir, |_| None).expect("load settings");
        assert_eq!(settings.recent_limit, DEFAULT_RECENT_LIMIT);
        assert_eq!(settings.authority_timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECONDS));
        assert_eq!(settings.poll_interval, Duration::from_millis(DEFAULT_POLL_INTERVAL_MS));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn unsupported_schema_and_timezone_are_rejected() {
        let dir = temp_config_dir();
        ensure_default_configs(&dir).expect("write defaults");
        fs::write(
            dir.join(APP_JSON),
            r#"{"schema": 1, "timezone": "Mars/Olympus"}"#,
        )
        .expect("write app config");
        assert!(matches!(
            load_settings_with_lookup(&dir, |_| None),
            Err(InfraError::InvalidConfig(_))
        ));

        fs::write(dir.join(APP_JSON), r#"{"schema": 2}"#).expect("write app config");
        assert!(load_configs(&dir).is_err());
        let _ = fs::remove_dir_all(&dir);
    }
}
