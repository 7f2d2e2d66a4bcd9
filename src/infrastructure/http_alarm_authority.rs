use crate::domain::models::{Alarm, AlarmConfiguration, AuthorityGrant};
use crate::infrastructure::alarm_authority::{
    AlarmAuthority, AlarmUpdates, AuthorityCapabilities, AuthorizationState,
};
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

const UPDATE_CHANNEL_CAPACITY: usize = 32;

/// Alarm authority reached over the alarm daemon's JSON API.
pub struct ReqwestAlarmAuthority<S>
where
    S: CredentialStore,
{
    client: Client,
    base_url: Url,
    credential_store: Arc<S>,
    poll_interval: Duration,
}

impl<S> Clone for ReqwestAlarmAuthority<S>
where
    S: CredentialStore,
{
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            credential_store: Arc::clone(&self.credential_store),
            poll_interval: self.poll_interval,
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct AuthorizationPayload {
    state: AuthorizationState,
    #[serde(default)]
    grant: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct AlarmListPayload {
    #[serde(default)]
    alarms: Vec<Alarm>,
}

#[derive(Debug, serde::Serialize)]
struct ScheduleRequest<'a> {
    id: &'a str,
    configuration: &'a AlarmConfiguration,
}

impl<S> ReqwestAlarmAuthority<S>
where
    S: CredentialStore + 'static,
{
    /// `request_timeout` bounds every HTTP exchange with the daemon.
    pub fn new(
        base_url: &str,
        credential_store: Arc<S>,
        poll_interval: Duration,
        request_timeout: Duration,
    ) -> Result<Self, InfraError> {
        let base_url = Url::parse(base_url)
            .map_err(|error| InfraError::InvalidConfig(format!("invalid authority url: {error}")))?;
        if base_url.cannot_be_a_base() {
            return Err(InfraError::InvalidConfig(
                "authority url cannot be a base".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|error| InfraError::InvalidConfig(format!("failed to build http client: {error}")))?;
        Ok(Self {
            client,
            base_url,
            credential_store,
            poll_interval,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                InfraError::Authority("authority base URL cannot be a base".to_string())
            })?;
            path.pop_if_empty();
            path.push("v1");
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::Authority(format!("{field} must not be empty")));
        }
        Ok(())
    }

    fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, InfraError> {
        Ok(match self.credential_store.load_grant()? {
            Some(grant) => request.bearer_auth(grant.token),
            None => request,
        })
    }

    async fn send(&self, request: RequestBuilder, action: &'static str) -> Result<String, InfraError> {
        let response = self
            .authorize(request)?
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    InfraError::Timeout(action.to_string())
                } else {
                    InfraError::Authority(format!("network error while {action}: {error}"))
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::Authority(format!("failed reading response while {action}: {error}"))
        })?;

        if status == StatusCode::NOT_IMPLEMENTED {
            return Err(InfraError::Unsupported(action));
        }
        if !status.is_success() {
            return Err(if body.trim().is_empty() {
                InfraError::Authority(format!("{action} failed: http {}", status.as_u16()))
            } else {
                InfraError::Authority(format!(
                    "{action} failed: http {}; body={body}",
                    status.as_u16()
                ))
            });
        }
        Ok(body)
    }

    async fn transition(&self, id: &str, verb: &'static str) -> Result<(), InfraError> {
        Self::ensure_non_empty(id, "alarm id")?;
        let endpoint = self.endpoint(&["alarms", id, verb])?;
        self.send(self.client.post(endpoint), verb).await?;
        Ok(())
    }

    async fn read_authorization(&self, request: RequestBuilder, action: &'static str) -> Result<AuthorizationState, InfraError> {
        let body = self.send(request, action).await?;
        let parsed: AuthorizationPayload = serde_json::from_str(&body).map_err(|error| {
            InfraError::Authority(format!("invalid authorization payload: {error}; body={body}"))
        })?;
        if let Some(token) = parsed.grant.filter(|token| !token.trim().is_empty()) {
            self.credential_store.save_grant(&AuthorityGrant {
                token,
                granted_at: Utc::now(),
            })?;
        }
        if parsed.state == AuthorizationState::Denied {
            self.credential_store.delete_grant()?;
        }
        Ok(parsed.state)
    }
}

#[async_trait]
impl<S> AlarmAuthority for ReqwestAlarmAuthority<S>
where
    S: CredentialStore + 'static,
{
    async fn probe(&self) -> Result<AuthorityCapabilities, InfraError> {
        let endpoint = self.endpoint(&["capabilities"])?;
        let body = self.send(self.client.get(endpoint), "probing capabilities").await?;
        serde_json::from_str(&body).map_err(|error| {
            InfraError::Authority(format!("invalid capabilities payload: {error}; body={body}"))
        })
    }

    async fn authorization_state(&self) -> Result<AuthorizationState, InfraError> {
        let endpoint = self.endpoint(&["authorization"])?;
        self.read_authorization(self.client.get(endpoint), "reading authorization")
            .await
    }

    async fn request_authorization(&self) -> Result<AuthorizationState, InfraError> {
        let endpoint = self.endpoint(&["authorization"])?;
        self.read_authorization(self.client.post(endpoint), "requesting authorization")
            .await
    }

    async fn schedule(&self, id: &str, configuration: &AlarmConfiguration) -> Result<Alarm, InfraError> {
        Self::ensure_non_empty(id, "alarm id")?;
        let endpoint = self.endpoint(&["alarms", id])?;
        let body = self
            .send(
                self.client
                    .put(endpoint)
                    .json(&ScheduleRequest { id, configuration }),
                "scheduling alarm",
            )
            .await?;
        let alarm: Alarm = serde_json::from_str(&body).map_err(|error| {
            InfraError::Authority(format!("invalid alarm payload: {error}; body={body}"))
        })?;
        if alarm.id != id {
            return Err(InfraError::Authority(format!(
                "authority scheduled id {} instead of {id}",
                alarm.id
            )));
        }
        Ok(alarm)
    }

    async fn cancel(&self, id: &str) -> Result<(), InfraError> {
        Self::ensure_non_empty(id, "alarm id")?;
        let endpoint = self.endpoint(&["alarms", id])?;
        self.send(self.client.delete(endpoint), "cancelling alarm").await?;
        Ok(())
    }

    async fn pause(&self, id: &str) -> Result<(), InfraError> {
        self.transition(id, "pause").await
    }

    async fn resume(&self, id: &str) -> Result<(), InfraError> {
        self.transition(id, "resume").await
    }

    async fn countdown(&self, id: &str) -> Result<(), InfraError> {
        self.transition(id, "countdown").await
    }

    async fn stop(&self, id: &str) -> Result<(), InfraError> {
        self.transition(id, "stop").await
    }

    async fn current_alarms(&self) -> Result<Vec<Alarm>, InfraError> {
        let endpoint = self.endpoint(&["alarms"])?;
        let body = self.send(self.client.get(endpoint), "listing alarms").await?;
        let parsed: AlarmListPayload = serde_json::from_str(&body).map_err(|error| {
            InfraError::Authority(format!("invalid alarm list payload: {error}; body={body}"))
        })?;
        Ok(parsed.alarms)
    }

    async fn alarm_updates(&self) -> Result<AlarmUpdates, InfraError> {
        let (sender, receiver) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let authority = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(authority.poll_interval);
            let mut last_snapshot: Option<Vec<Alarm>> = None;
            loop {
                ticker.tick().await;
                if sender.is_closed() {
                    break;
                }
                match authority.current_alarms().await {
                    Ok(alarms) if last_snapshot.as_ref() != Some(&alarms) => {
                        if sender.send(alarms.clone()).await.is_err() {
                            break;
                        }
                        last_snapshot = Some(alarms);
                    }
                    Ok(_) => {}
                    Err(error) => tracing::debug!(%error, "alarm authority poll failed"),
                }
            }
            tracing::debug!("alarm authority poller stopped");
        });

        Ok(receiver)
    }
}
