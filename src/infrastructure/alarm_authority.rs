use crate::domain::models::{Alarm, AlarmConfiguration};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationState {
    NotDetermined,
    Denied,
    Authorized,
}

/// Optional primitives an authority build may expose beyond schedule/cancel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AuthorityCapabilities {
    #[serde(default)]
    pub pause: bool,
    #[serde(default)]
    pub resume: bool,
    #[serde(default)]
    pub countdown: bool,
    #[serde(default)]
    pub stop: bool,
}

impl AuthorityCapabilities {
    pub fn full() -> Self {
        Self {
            pause: true,
            resume: true,
            countdown: true,
            stop: true,
        }
    }
}

/// Full alarm lists pushed by the authority, in emission order.
pub type AlarmUpdates = mpsc::Receiver<Vec<Alarm>>;

#[async_trait]
pub trait AlarmAuthority: Send + Sync {
    /// Fails when the platform has no alarm authority at all.
    async fn probe(&self) -> Result<AuthorityCapabilities, InfraError>;

    async fn authorization_state(&self) -> Result<AuthorizationState, InfraError>;

    /// Shows the user-facing permission prompt and waits for the answer.
    async fn request_authorization(&self) -> Result<AuthorizationState, InfraError>;

    async fn schedule(&self, id: &str, configuration: &AlarmConfiguration) -> Result<Alarm, InfraError>;

    async fn cancel(&self, id: &str) -> Result<(), InfraError>;

    async fn pause(&self, _id: &str) -> Result<(), InfraError> {
        Err(InfraError::Unsupported("pause"))
    }

    async fn resume(&self, _id: &str) -> Result<(), InfraError> {
        Err(InfraError::Unsupported("resume"))
    }

    async fn countdown(&self, _id: &str) -> Result<(), InfraError> {
        Err(InfraError::Unsupported("countdown"))
    }

    async fn stop(&self, _id: &str) -> Result<(), InfraError> {
        Err(InfraError::Unsupported("stop"))
    }

    async fn current_alarms(&self) -> Result<Vec<Alarm>, InfraError>;

    async fn alarm_updates(&self) -> Result<AlarmUpdates, InfraError>;
}
