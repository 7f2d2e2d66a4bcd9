pub mod application;
pub mod domain;
pub mod infrastructure;

use application::commands::{
    clear_last_error_impl, delete_alarm_impl, get_authorization_status_impl, get_last_error_impl,
    list_alarms_impl, pause_alarm_impl, repeat_alarm_impl, resume_alarm_impl,
    schedule_alarm_impl, schedule_custom_impl, schedule_timer_impl, stop_alarm_impl,
    update_alarm_impl, AlarmInput, AppState,
};
use infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "alarms.log";

/// JSON log lines appended to `<logs_dir>/alarms.log`, filtered by `RUST_LOG`.
pub fn init_tracing(logs_dir: &Path) -> Result<(), InfraError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(logs_dir.join(LOG_FILE))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|error| InfraError::InvalidConfig(format!("failed to initialize logging: {error}")))
}

/// One UI command per line, e.g.
/// `{"command":"schedule_timer","input":{"sleepContext":"short_nap"}}`.
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum CommandRequest {
    ScheduleAlarm { input: AlarmInput },
    ScheduleTimer { input: AlarmInput },
    ScheduleCustom { input: AlarmInput },
    UpdateAlarm { alarm_id: String, input: AlarmInput },
    DeleteAlarm { alarm_id: String },
    PauseAlarm { alarm_id: String },
    ResumeAlarm { alarm_id: String },
    StopAlarm { alarm_id: String },
    RepeatAlarm { alarm_id: String },
    ListAlarms,
    GetLastError,
    ClearLastError,
    GetAuthorizationStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Result<serde_json::Value, String>> for CommandResponse {
    fn from(outcome: Result<serde_json::Value, String>) -> Self {
        match outcome {
            Ok(result) => Self {
                ok: true,
                result: Some(result),
                error: None,
            },
            Err(error) => Self {
                ok: false,
                result: None,
                error: Some(error),
            },
        }
    }
}

fn respond<T: Serialize>(value: T) -> Result<serde_json::Value, String> {
    serde_json::to_value(value).map_err(|error| error.to_string())
}

pub async fn dispatch_command(
    state: &AppState,
    request: CommandRequest,
) -> Result<serde_json::Value, String> {
    match request {
        CommandRequest::ScheduleAlarm { input } => respond(
            schedule_alarm_impl(state, input)
                .await
                .map_err(|error| state.command_error("schedule_alarm", &error))?,
        ),
        CommandRequest::ScheduleTimer { input } => respond(
            schedule_timer_impl(state, input)
                .await
                .map_err(|error| state.command_error("schedule_timer", &error))?,
        ),
        CommandRequest::ScheduleCustom { input } => respond(
            schedule_custom_impl(state, input)
                .await
                .map_err(|error| state.command_error("schedule_custom", &error))?,
        ),
        CommandRequest::UpdateAlarm { alarm_id, input } => respond(
            update_alarm_impl(state, alarm_id, input)
                .await
                .map_err(|error| state.command_error("update_alarm", &error))?,
        ),
        CommandRequest::DeleteAlarm { alarm_id } => respond(
            delete_alarm_impl(state, alarm_id)
                .await
                .map_err(|error| state.command_error("delete_alarm", &error))?,
        ),
        CommandRequest::PauseAlarm { alarm_id } => respond(
            pause_alarm_impl(state, alarm_id)
                .await
                .map_err(|error| state.command_error("pause_alarm", &error))?,
        ),
        CommandRequest::ResumeAlarm { alarm_id } => respond(
            resume_alarm_impl(state, alarm_id)
                .await
                .map_err(|error| state.command_error("resume_alarm", &error))?,
        ),
        CommandRequest::StopAlarm { alarm_id } => respond(
            stop_alarm_impl(state, alarm_id)
                .await
                .map_err(|error| state.command_error("stop_alarm", &error))?,
        ),
        CommandRequest::RepeatAlarm { alarm_id } => respond(
            repeat_alarm_impl(state, alarm_id)
                .await
                .map_err(|error| state.command_error("repeat_alarm", &error))?,
        ),
        CommandRequest::ListAlarms => respond(list_alarms_impl(state).await),
        CommandRequest::GetLastError => respond(get_last_error_impl(state).await),
        CommandRequest::ClearLastError => {
            clear_last_error_impl(state).await;
            Ok(serde_json::Value::Null)
        }
        CommandRequest::GetAuthorizationStatus => {
            respond(get_authorization_status_impl(state).await)
        }
    }
}

/// Answers each request line with one response line until the input closes.
pub async fn serve_commands<R, W>(state: &AppState, reader: R, mut writer: W) -> Result<(), InfraError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let outcome = match serde_json::from_str::<CommandRequest>(&line) {
            Ok(request) => dispatch_command(state, request).await,
            Err(error) => {
                tracing::warn!(%error, "rejected malformed command");
                Err(format!("invalid command: {error}"))
            }
        };
        let mut encoded = serde_json::to_string(&CommandResponse::from(outcome))?;
        encoded.push('\n');
        writer.write_all(encoded.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

pub async fn run() -> Result<(), InfraError> {
    let workspace_root = std::env::current_dir()?;
    let app_state = AppState::new(workspace_root)?;
    init_tracing(app_state.logs_dir())?;
    tracing::info!(
        workspace = %app_state.workspace_root().display(),
        database = %app_state.database_path().display(),
        authority = %app_state.settings().authority_base_url,
        "starting {}",
        app_state.settings().app_name
    );

    let listener = app_state.start().await;
    let alarms = list_alarms_impl(&app_state).await;
    tracing::info!(
        running = alarms.running.len(),
        recent = alarms.recent.len(),
        "alarm service ready"
    );

    let commands = serve_commands(
        &app_state,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    );
    tokio::select! {
        served = commands => {
            served?;
            tracing::info!("command input closed; waiting for shutdown signal");
            tokio::signal::ctrl_c().await?;
        }
        signal = tokio::signal::ctrl_c() => signal?,
    }

    if let Some(listener) = listener {
        listener.abort();
    }
    tracing::info!("alarm service stopped");
    Ok(())
}
