use crate::infrastructure::alarm_authority::{AlarmAuthority, AuthorizationState};
use crate::infrastructure::error::InfraError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_AUTHORIZATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Fail-closed permission check in front of every mutating alarm operation.
///
/// The permission prompt is only ever shown from `check_authorization`, which
/// the scheduling operations call; start-up and the update listener use
/// `current_state`, which never prompts. An authority that does not answer
/// within the timeout counts as denied.
pub struct AuthorizationGate<A>
where
    A: AlarmAuthority + ?Sized,
{
    authority: Arc<A>,
    timeout: Duration,
}

impl<A> AuthorizationGate<A>
where
    A: AlarmAuthority + ?Sized,
{
    pub fn new(authority: Arc<A>) -> Self {
        Self {
            authority,
            timeout: DEFAULT_AUTHORIZATION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn current_state(&self) -> AuthorizationState {
        let read = self.authority.authorization_state();
        match self.bounded("reading authorization state", read).await {
            Ok(state) => state,
            Err(error) => {
                tracing::warn!(%error, "could not read alarm authorization state");
                AuthorizationState::Denied
            }
        }
    }

    pub async fn check_authorization(&self) -> bool {
        match self.current_state().await {
            AuthorizationState::Authorized => true,
            AuthorizationState::Denied => false,
            AuthorizationState::NotDetermined => {
                let prompt = self.authority.request_authorization();
                match self.bounded("requesting authorization", prompt).await {
                    Ok(AuthorizationState::Authorized) => {
                        tracing::info!("alarm authorization granted");
                        true
                    }
                    Ok(state) => {
                        tracing::info!(?state, "alarm authorization not granted");
                        false
                    }
                    Err(error) => {
                        tracing::warn!(%error, "alarm authorization request failed");
                        false
                    }
                }
            }
        }
    }

    async fn bounded<F>(&self, action: &'static str, call: F) -> Result<AuthorizationState, InfraError>
    where
        F: Future<Output = Result<AuthorizationState, InfraError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(InfraError::Timeout(action.to_string())),
        }
    }
}
