use crate::application::alarm_manager::{AlarmManager, LastFailure};
use crate::application::bootstrap::{bootstrap_workspace, BootstrapResult};
use crate::domain::errors::AlarmError;
use crate::domain::models::{
    AlarmConfiguration, AlarmMetadata, AlarmSchedule, CountdownDuration, SecondaryAction,
    SleepContext, WakeUpReason, WrappedAlarm, DEFAULT_ICON,
};
use crate::infrastructure::alarm_authority::{AlarmAuthority, AuthorizationState};
use crate::infrastructure::config::AlarmSettings;
use crate::infrastructure::credential_store::KeyringCredentialStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::http_alarm_authority::ReqwestAlarmAuthority;
use crate::infrastructure::kv_store::{KeyValueStore, SqliteKeyValueStore};
use chrono::{DateTime, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

pub type SharedAlarmManager = Arc<AlarmManager<dyn AlarmAuthority, dyn KeyValueStore>>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

pub struct AppState {
    workspace_root: PathBuf,
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    settings: AlarmSettings,
    manager: SharedAlarmManager,
}

impl AppState {
    /// Bootstraps the workspace and talks to the configured alarm daemon.
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let authority: Arc<dyn AlarmAuthority> = Arc::new(ReqwestAlarmAuthority::new(
            &bootstrap.settings.authority_base_url,
            Arc::new(KeyringCredentialStore::default()),
            bootstrap.settings.poll_interval,
            bootstrap.settings.authority_timeout,
        )?);
        Ok(Self::assemble(bootstrap, authority))
    }

    pub fn with_authority(
        workspace_root: PathBuf,
        authority: Arc<dyn AlarmAuthority>,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        Ok(Self::assemble(bootstrap, authority))
    }

    fn assemble(bootstrap: BootstrapResult, authority: Arc<dyn AlarmAuthority>) -> Self {
        let store: Arc<dyn KeyValueStore> =
            Arc::new(SqliteKeyValueStore::new(&bootstrap.database_path));
        let manager = Arc::new(AlarmManager::new(authority, store, &bootstrap.settings));
        Self {
            workspace_root: bootstrap.workspace_root,
            config_dir: bootstrap.config_dir,
            database_path: bootstrap.database_path,
            logs_dir: bootstrap.logs_dir,
            settings: bootstrap.settings,
            manager,
        }
    }

    /// Loads persisted alarms, reconciles and starts the update listener.
    pub async fn start(&self) -> Option<JoinHandle<()>> {
        self.manager.start().await;
        match self.manager.spawn_update_listener().await {
            Ok(listener) => Some(listener),
            Err(error) => {
                tracing::warn!(%error, "alarm updates are not observed");
                None
            }
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn settings(&self) -> &AlarmSettings {
        &self.settings
    }

    pub fn manager(&self) -> &SharedAlarmManager {
        &self.manager
    }

    pub fn command_error(&self, command: &str, error: &AlarmError) -> String {
        tracing::error!(command, code = error.code(), %error, "command failed");
        error.to_string()
    }
}

/// Loosely typed alarm request as sent by the UI.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlarmInput {
    pub id: Option<String>,
    pub title: Option<String>,
    pub icon: Option<String>,
    /// `HH:MM` for a relative schedule, RFC3339 for a fixed one.
    pub at: Option<String>,
    pub repeats: Vec<String>,
    pub duration_seconds: Option<u32>,
    pub post_alert_seconds: Option<u32>,
    pub sleep_context: Option<String>,
    pub wake_up_reason: Option<String>,
    pub secondary_action: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AlarmsResponse {
    pub running: Vec<WrappedAlarm>,
    pub recent: Vec<WrappedAlarm>,
    pub traditional: Vec<WrappedAlarm>,
    pub timers: Vec<WrappedAlarm>,
    pub custom: Vec<WrappedAlarm>,
    pub has_upcoming_alarms: bool,
}

#[derive(Debug, Serialize)]
pub struct AuthorizationStatusResponse {
    pub state: AuthorizationState,
    pub authority_available: bool,
}

pub async fn schedule_alarm_impl(
    state: &AppState,
    input: AlarmInput,
) -> Result<WrappedAlarm, AlarmError> {
    let metadata = parse_metadata(&input)?;
    let at = required(input.at.as_deref(), "at")?;
    let schedule = parse_schedule(at, &input.repeats)?;
    let id = input.id.clone().unwrap_or_else(|| next_id("alm"));
    let title = title_or(&input, "Alarm");

    state
        .manager
        .add_alarm(&id, &title, &icon_of(&input), metadata, schedule)
        .await
}

/// Without an explicit duration the sleep context preset decides the length.
pub async fn schedule_timer_impl(
    state: &AppState,
    input: AlarmInput,
) -> Result<WrappedAlarm, AlarmError> {
    let metadata = parse_metadata(&input)?;
    let duration_seconds = input
        .duration_seconds
        .or_else(|| metadata.sleep_context.map(SleepContext::duration_seconds))
        .ok_or_else(|| {
            AlarmError::InvalidConfiguration(
                "durationSeconds or sleepContext is required".to_string(),
            )
        })?;
    let metadata = match (metadata.sleep_context, SleepContext::from_duration_seconds(duration_seconds)) {
        (None, Some(preset)) => metadata.with_sleep_context(preset),
        _ => metadata,
    };
    let id = input.id.clone().unwrap_or_else(|| next_id("tmr"));
    let default_title = metadata
        .sleep_context
        .map(SleepContext::label)
        .unwrap_or("Timer");
    let title = title_or(&input, default_title);

    state
        .manager
        .add_timer(&id, &title, &icon_of(&input), metadata, duration_seconds)
        .await
}

pub async fn schedule_custom_impl(
    state: &AppState,
    input: AlarmInput,
) -> Result<WrappedAlarm, AlarmError> {
    let metadata = parse_metadata(&input)?;
    let configuration = parse_configuration(&input, "Custom Alarm")?;
    let id = input.id.clone().unwrap_or_else(|| next_id("cst"));
    state.manager.add_custom(&id, metadata, configuration).await
}

pub async fn update_alarm_impl(
    state: &AppState,
    alarm_id: String,
    input: AlarmInput,
) -> Result<WrappedAlarm, AlarmError> {
    let configuration = parse_configuration(&input, "Alarm")?;
    state.manager.update_alarm(&alarm_id, configuration).await
}

pub async fn delete_alarm_impl(state: &AppState, alarm_id: String) -> Result<bool, AlarmError> {
    state.manager.delete_alarm(&alarm_id).await
}

pub async fn pause_alarm_impl(state: &AppState, alarm_id: String) -> Result<AlarmsResponse, AlarmError> {
    state.manager.pause_alarm(&alarm_id).await?;
    Ok(list_alarms_impl(state).await)
}

pub async fn resume_alarm_impl(state: &AppState, alarm_id: String) -> Result<AlarmsResponse, AlarmError> {
    state.manager.resume_alarm(&alarm_id).await?;
    Ok(list_alarms_impl(state).await)
}

pub async fn stop_alarm_impl(state: &AppState, alarm_id: String) -> Result<AlarmsResponse, AlarmError> {
    state.manager.stop_alarm(&alarm_id).await?;
    Ok(list_alarms_impl(state).await)
}

pub async fn repeat_alarm_impl(state: &AppState, alarm_id: String) -> Result<WrappedAlarm, AlarmError> {
    state.manager.repeat_alarm(&alarm_id).await
}

pub async fn list_alarms_impl(state: &AppState) -> AlarmsResponse {
    let manager = &state.manager;
    AlarmsResponse {
        running: manager.running_alarms().await,
        recent: manager.recent_alarms().await,
        traditional: manager.running_traditional_alarms().await,
        timers: manager.running_timers().await,
        custom: manager.running_custom_alarms().await,
        has_upcoming_alarms: manager.has_upcoming_alarms().await,
    }
}

pub async fn get_last_error_impl(state: &AppState) -> Option<LastFailure> {
    state.manager.last_error().await
}

pub async fn clear_last_error_impl(state: &AppState) {
    state.manager.clear_last_error().await;
}

pub async fn get_authorization_status_impl(state: &AppState) -> AuthorizationStatusResponse {
    AuthorizationStatusResponse {
        state: state.manager.authorization_state().await,
        authority_available: state.manager.is_available().await,
    }
}

fn required<'a>(value: Option<&'a str>, field_name: &str) -> Result<&'a str, AlarmError> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AlarmError::InvalidConfiguration(format!("{field_name} is required")))
}

fn title_or(input: &AlarmInput, default_title: &str) -> String {
    input
        .title
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(default_title)
        .to_string()
}

fn icon_of(input: &AlarmInput) -> String {
    input
        .icon
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_ICON)
        .to_string()
}

fn parse_metadata(input: &AlarmInput) -> Result<AlarmMetadata, AlarmError> {
    let mut metadata = AlarmMetadata::new(Utc::now());
    if let Some(value) = input.sleep_context.as_deref() {
        metadata = metadata.with_sleep_context(parse_sleep_context(value)?);
    }
    if let Some(value) = input.wake_up_reason.as_deref() {
        metadata = metadata.with_wake_up_reason(parse_wake_up_reason(value)?);
    }
    Ok(metadata)
}

fn parse_configuration(input: &AlarmInput, default_title: &str) -> Result<AlarmConfiguration, AlarmError> {
    let schedule = match input.at.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
        Some(at) => Some(parse_schedule(at, &input.repeats)?),
        None => None,
    };
    let countdown_duration = match (input.duration_seconds, input.post_alert_seconds) {
        (None, None) => None,
        (pre_alert_seconds, post_alert_seconds) => Some(CountdownDuration {
            pre_alert_seconds,
            post_alert_seconds,
        }),
    };
    let secondary_action = input
        .secondary_action
        .as_deref()
        .map(parse_secondary_action)
        .transpose()?;

    Ok(AlarmConfiguration {
        title: title_or(input, default_title),
        icon: icon_of(input),
        schedule,
        countdown_duration,
        secondary_action,
    })
}

fn parse_schedule(at: &str, repeats: &[String]) -> Result<AlarmSchedule, AlarmError> {
    let at = at.trim();
    if let Ok(time) = NaiveTime::parse_from_str(at, "%H:%M") {
        let repeats = repeats
            .iter()
            .map(|value| {
                parse_weekday(value).ok_or_else(|| {
                    AlarmError::InvalidConfiguration(format!("unknown weekday: {value}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(AlarmSchedule::Relative {
            hour: time.hour() as u8,
            minute: time.minute() as u8,
            repeats,
        });
    }

    let date = DateTime::parse_from_rfc3339(at)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| {
            AlarmError::InvalidConfiguration(format!(
                "at must be HH:MM or an RFC3339 date-time: {error}"
            ))
        })?;
    if !repeats.is_empty() {
        return Err(AlarmError::InvalidConfiguration(
            "repeats require an HH:MM time".to_string(),
        ));
    }
    Ok(AlarmSchedule::Fixed { date })
}

fn parse_weekday(value: &str) -> Option<Weekday> {
    match value.trim().to_ascii_lowercase().as_str() {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

fn normalized(value: &str) -> String {
    value.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}

fn parse_sleep_context(value: &str) -> Result<SleepContext, AlarmError> {
    match normalized(value).as_str() {
        "power_nap" => Ok(SleepContext::PowerNap),
        "short_nap" => Ok(SleepContext::ShortNap),
        "sleep_cycle" | "one_cycle" => Ok(SleepContext::SleepCycle),
        "two_cycles" => Ok(SleepContext::TwoCycles),
        "full_night" => Ok(SleepContext::FullNight),
        other => Err(AlarmError::InvalidConfiguration(format!(
            "unsupported sleep context: {other}"
        ))),
    }
}

fn parse_wake_up_reason(value: &str) -> Result<WakeUpReason, AlarmError> {
    match normalized(value).as_str() {
        "general" => Ok(WakeUpReason::General),
        "work" => Ok(WakeUpReason::Work),
        "school" => Ok(WakeUpReason::School),
        "exercise" => Ok(WakeUpReason::Exercise),
        "nap" => Ok(WakeUpReason::Nap),
        "appointment" => Ok(WakeUpReason::Appointment),
        other => Err(AlarmError::InvalidConfiguration(format!(
            "unsupported wake-up reason: {other}"
        ))),
    }
}

fn parse_secondary_action(value: &str) -> Result<SecondaryAction, AlarmError> {
    match normalized(value).as_str() {
        "" => Err(AlarmError::InvalidConfiguration(
            "secondary action must not be empty".to_string(),
        )),
        "repeat" => Ok(SecondaryAction::Repeat),
        "open_app" => Ok(SecondaryAction::OpenApp),
        _ => Ok(SecondaryAction::Custom {
            reference: value.trim().to_string(),
        }),
    }
}
