use crate::infrastructure::error::InfraError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlarmError {
    #[error("alarm authorization was not granted")]
    NotAuthorized,
    #[error("alarm scheduling failed: {0}")]
    SchedulingFailed(String),
    #[error("invalid alarm configuration: {0}")]
    InvalidConfiguration(String),
    #[error("alarm schedule is in the past")]
    ScheduleInPast,
    #[error("alarm authority is unavailable on this system")]
    AuthorityUnavailable,
    #[error("alarm not found: {0}")]
    AlarmNotFound(String),
}

impl AlarmError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotAuthorized => "not_authorized",
            Self::SchedulingFailed(_) => "scheduling_failed",
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::ScheduleInPast => "schedule_in_past",
            Self::AuthorityUnavailable => "authority_unavailable",
            Self::AlarmNotFound(_) => "alarm_not_found",
        }
    }
}

impl From<InfraError> for AlarmError {
    fn from(error: InfraError) -> Self {
        Self::SchedulingFailed(error.to_string())
    }
}
