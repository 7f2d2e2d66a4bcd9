use crate::application::authorization::AuthorizationGate;
use crate::application::reconciliation::{reconcile, RetryPolicy, SnapshotReader};
use crate::application::views;
use crate::domain::errors::AlarmError;
use crate::domain::models::{
    Alarm, AlarmCollections, AlarmConfiguration, AlarmKind, AlarmMetadata, AlarmSchedule,
    CountdownDuration, PresentationContext, SecondaryAction, WrappedAlarm,
};
use crate::infrastructure::alarm_authority::{AlarmAuthority, AuthorityCapabilities, AuthorizationState};
use crate::infrastructure::alarm_store::AlarmCollectionStore;
use crate::infrastructure::config::AlarmSettings;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::kv_store::KeyValueStore;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSurface {
    /// Stays visible until the user re-enables alarms in Settings.
    PersistentPrompt,
    DismissibleBanner,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastFailure {
    pub code: String,
    pub message: String,
    pub surface: FailureSurface,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Availability {
    Undetected,
    Available(AuthorityCapabilities),
    Unavailable,
}

/// Owns the running/recent collections and mediates every change to them.
///
/// User operations and reconciliation passes both take `collections` for
/// their read-modify-write, so a scheduling upsert can never be lost to a
/// concurrent snapshot replace. The lock is never held across an authority
/// round-trip.
pub struct AlarmManager<A, S>
where
    A: AlarmAuthority + ?Sized,
    S: KeyValueStore + ?Sized,
{
    authority: Arc<A>,
    gate: AuthorizationGate<A>,
    store: AlarmCollectionStore<S>,
    collections: Mutex<AlarmCollections>,
    availability: RwLock<Availability>,
    last_failure: Mutex<Option<LastFailure>>,
    changes: watch::Sender<AlarmCollections>,
    snapshot_reader: SnapshotReader,
    timezone: Tz,
    recent_limit: usize,
    authority_timeout: Duration,
    now_provider: NowProvider,
}

impl<A, S> AlarmManager<A, S>
where
    A: AlarmAuthority + ?Sized,
    S: KeyValueStore + ?Sized,
{
    pub fn new(authority: Arc<A>, store: Arc<S>, settings: &AlarmSettings) -> Self {
        let (changes, _) = watch::channel(AlarmCollections::default());
        Self {
            gate: AuthorizationGate::new(Arc::clone(&authority))
                .with_timeout(settings.authority_timeout),
            authority,
            store: AlarmCollectionStore::new(store),
            collections: Mutex::new(AlarmCollections::default()),
            availability: RwLock::new(Availability::Undetected),
            last_failure: Mutex::new(None),
            changes,
            snapshot_reader: SnapshotReader::default()
                .with_attempt_timeout(settings.authority_timeout),
            timezone: settings.timezone,
            recent_limit: settings.recent_limit,
            authority_timeout: settings.authority_timeout,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.snapshot_reader =
            SnapshotReader::new(retry_policy).with_attempt_timeout(self.authority_timeout);
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// Loads persisted collections, detects the authority's capabilities and,
    /// when alarms are already authorized, reconciles once. Never prompts.
    pub async fn start(&self) {
        let loaded = self.store.load();
        tracing::info!(
            running = loaded.running.len(),
            recent = loaded.recent.len(),
            "loaded persisted alarms"
        );
        {
            let mut collections = self.collections.lock().await;
            *collections = loaded;
            self.changes.send_replace(collections.clone());
        }

        match self.bounded("probing authority", self.authority.probe()).await {
            Ok(capabilities) => {
                tracing::info!(?capabilities, "alarm authority detected");
                *self.availability.write().await = Availability::Available(capabilities);
            }
            Err(error) => {
                tracing::warn!(%error, "alarm authority unavailable; scheduling disabled");
                *self.availability.write().await = Availability::Unavailable;
                return;
            }
        }

        match self.gate.current_state().await {
            AuthorizationState::Authorized => self.reconcile_from_authority().await,
            state => tracing::info!(?state, "skipping start-up reconciliation"),
        }
    }

    /// Consumes the authority's update stream on a background task, one
    /// reconciliation pass per emitted snapshot, in emission order.
    pub async fn spawn_update_listener(self: &Arc<Self>) -> Result<JoinHandle<()>, AlarmError>
    where
        A: 'static,
        S: 'static,
    {
        self.capabilities().await?;
        let mut updates = self.authority.alarm_updates().await.map_err(|error| {
            tracing::warn!(%error, "could not subscribe to alarm updates");
            AlarmError::from(error)
        })?;
        let manager = Arc::clone(self);

        Ok(tokio::spawn(async move {
            while let Some(snapshot) = updates.recv().await {
                manager.apply_snapshot(&snapshot).await;
            }
            tracing::info!("alarm update stream closed");
        }))
    }

    pub async fn apply_snapshot(&self, snapshot: &[Alarm]) {
        let context = self.context();
        let mut collections = self.collections.lock().await;
        let (next, summary) = reconcile(&collections, snapshot, context, self.recent_limit);
        tracing::info!(
            snapshot = snapshot.len(),
            running = next.running.len(),
            recent = next.recent.len(),
            refreshed = summary.refreshed,
            transitioned = ?summary.transitioned,
            adopted = ?summary.adopted,
            retired = ?summary.retired,
            "reconciled alarms with authority snapshot"
        );
        *collections = next;
        self.persist(&collections);
        self.changes.send_replace(collections.clone());
    }

    async fn reconcile_from_authority(&self) {
        match self.snapshot_reader.current_alarms(self.authority.as_ref()).await {
            Ok(snapshot) => self.apply_snapshot(&snapshot).await,
            Err(error) => tracing::warn!(%error, "start-up reconciliation skipped"),
        }
    }

    pub async fn add_alarm(
        &self,
        id: &str,
        title: &str,
        icon: &str,
        metadata: AlarmMetadata,
        schedule: AlarmSchedule,
    ) -> Result<WrappedAlarm, AlarmError> {
        let configuration = AlarmConfiguration {
            title: title.to_string(),
            icon: icon.to_string(),
            schedule: Some(schedule),
            countdown_duration: None,
            secondary_action: None,
        };
        let result = self
            .schedule_wrapped(id, AlarmKind::Traditional, metadata, configuration)
            .await;
        self.track("add_alarm", result).await
    }

    pub async fn add_timer(
        &self,
        id: &str,
        title: &str,
        icon: &str,
        metadata: AlarmMetadata,
        duration_seconds: u32,
    ) -> Result<WrappedAlarm, AlarmError> {
        let configuration = AlarmConfiguration {
            title: title.to_string(),
            icon: icon.to_string(),
            schedule: None,
            countdown_duration: Some(CountdownDuration::timer(duration_seconds)),
            secondary_action: Some(SecondaryAction::Repeat),
        };
        let result = self
            .schedule_wrapped(id, AlarmKind::Timer, metadata, configuration)
            .await;
        self.track("add_timer", result).await
    }

    pub async fn add_custom(
        &self,
        id: &str,
        metadata: AlarmMetadata,
        configuration: AlarmConfiguration,
    ) -> Result<WrappedAlarm, AlarmError> {
        let result = self
            .schedule_wrapped(id, AlarmKind::Custom, metadata, configuration)
            .await;
        self.track("add_custom", result).await
    }

    /// Cancels and re-schedules under the same id, keeping the alarm's
    /// metadata. Not atomic: when the re-schedule fails the alarm is already
    /// gone at the authority, and the next reconciliation pass moves the stale
    /// local copy to `recent`.
    pub async fn update_alarm(
        &self,
        id: &str,
        configuration: AlarmConfiguration,
    ) -> Result<WrappedAlarm, AlarmError> {
        let result = self.update_alarm_inner(id, configuration).await;
        self.track("update_alarm", result).await
    }

    async fn update_alarm_inner(
        &self,
        id: &str,
        configuration: AlarmConfiguration,
    ) -> Result<WrappedAlarm, AlarmError> {
        self.ensure_ready().await?;
        validate_id(id)?;
        configuration.validate(self.now())?;

        let existing = self.collections.lock().await.find(id).cloned();
        let (kind, metadata) = match existing {
            Some(wrapped) => (wrapped.kind, wrapped.metadata),
            None => (kind_of(&configuration), AlarmMetadata::new(self.now())),
        };

        self.bounded("cancelling alarm", self.authority.cancel(id)).await?;
        let alarm = match self
            .bounded("scheduling alarm", self.authority.schedule(id, &configuration))
            .await
        {
            Ok(alarm) => alarm,
            Err(error) => {
                tracing::warn!(id, %error, "alarm cancelled but re-schedule failed");
                return Err(error.into());
            }
        };

        let wrapped = WrappedAlarm::new(alarm, metadata, kind, &configuration, self.context());
        self.commit(|collections| collections.upsert_running(wrapped.clone()))
            .await;
        Ok(wrapped)
    }

    /// Removes the alarm locally; the authority cancel is best effort.
    pub async fn delete_alarm(&self, id: &str) -> Result<bool, AlarmError> {
        let result = self.delete_alarm_inner(id).await;
        self.track("delete_alarm", result).await
    }

    async fn delete_alarm_inner(&self, id: &str) -> Result<bool, AlarmError> {
        self.ensure_ready().await?;
        validate_id(id)?;
        if let Err(error) = self.bounded("cancelling alarm", self.authority.cancel(id)).await {
            tracing::info!(id, %error, "ignoring cancel failure during delete");
        }
        Ok(self.commit(|collections| collections.remove(id)).await)
    }

    pub async fn pause_alarm(&self, id: &str) -> Result<(), AlarmError> {
        let result = self.transition(id, Transition::Pause).await;
        self.track("pause_alarm", result).await
    }

    pub async fn resume_alarm(&self, id: &str) -> Result<(), AlarmError> {
        let result = self.transition(id, Transition::Resume).await;
        self.track("resume_alarm", result).await
    }

    /// Pause and resume only ask the authority; the new state arrives with the
    /// next snapshot.
    async fn transition(&self, id: &str, transition: Transition) -> Result<(), AlarmError> {
        let capabilities = self.ensure_ready().await?;
        self.running_alarm(id).await?;

        if !transition.is_supported(&capabilities) {
            tracing::info!(
                id,
                verb = transition.verb(),
                "authority has no such primitive; waiting for reconciliation"
            );
            return Ok(());
        }

        match transition {
            Transition::Pause => self.bounded("pausing alarm", self.authority.pause(id)).await?,
            Transition::Resume => self.bounded("resuming alarm", self.authority.resume(id)).await?,
        }
        Ok(())
    }

    pub async fn stop_alarm(&self, id: &str) -> Result<(), AlarmError> {
        let result = self.stop_alarm_inner(id).await;
        self.track("stop_alarm", result).await
    }

    async fn stop_alarm_inner(&self, id: &str) -> Result<(), AlarmError> {
        let capabilities = self.ensure_ready().await?;
        self.running_alarm(id).await?;

        if capabilities.stop {
            self.bounded("stopping alarm", self.authority.stop(id)).await?;
        } else {
            self.bounded("cancelling alarm", self.authority.cancel(id)).await?;
        }

        let context = self.context();
        let recent_limit = self.recent_limit;
        self.commit(|collections| collections.retire(id, context, recent_limit))
            .await;
        Ok(())
    }

    /// Restarts a countdown. Ended timers are scheduled again under the same
    /// id and return to `running`.
    pub async fn repeat_alarm(&self, id: &str) -> Result<WrappedAlarm, AlarmError> {
        let result = self.repeat_alarm_inner(id).await;
        self.track("repeat_alarm", result).await
    }

    async fn repeat_alarm_inner(&self, id: &str) -> Result<WrappedAlarm, AlarmError> {
        let capabilities = self.ensure_ready().await?;
        validate_id(id)?;

        let (existing, is_running) = {
            let collections = self.collections.lock().await;
            match collections.find(id) {
                Some(wrapped) => (wrapped.clone(), collections.running_position(id).is_some()),
                None => return Err(AlarmError::AlarmNotFound(id.to_string())),
            }
        };
        if existing.alarm.countdown_duration.is_none() {
            return Err(AlarmError::InvalidConfiguration(
                "only countdown alarms can be repeated".to_string(),
            ));
        }

        if is_running && capabilities.countdown {
            self.bounded("restarting countdown", self.authority.countdown(id))
                .await?;
            return Ok(existing);
        }

        if let Err(error) = self.bounded("cancelling alarm", self.authority.cancel(id)).await {
            tracing::debug!(id, %error, "nothing to cancel before repeat");
        }
        let configuration = existing.configuration();
        let alarm = self
            .bounded("scheduling alarm", self.authority.schedule(id, &configuration))
            .await?;
        let wrapped = WrappedAlarm::new(
            alarm,
            existing.metadata.clone(),
            existing.kind,
            &configuration,
            self.context(),
        );
        self.commit(|collections| collections.upsert_running(wrapped.clone()))
            .await;
        Ok(wrapped)
    }

    pub async fn running_alarms(&self) -> Vec<WrappedAlarm> {
        self.collections.lock().await.running.clone()
    }

    pub async fn recent_alarms(&self) -> Vec<WrappedAlarm> {
        self.collections.lock().await.recent.clone()
    }

    pub async fn running_traditional_alarms(&self) -> Vec<WrappedAlarm> {
        let collections = self.collections.lock().await;
        views::traditional_alarms(&collections.running, self.context())
    }

    pub async fn running_timers(&self) -> Vec<WrappedAlarm> {
        let collections = self.collections.lock().await;
        views::timers(&collections.running, self.context())
    }

    pub async fn running_custom_alarms(&self) -> Vec<WrappedAlarm> {
        let collections = self.collections.lock().await;
        views::custom_alarms(&collections.running, self.context())
    }

    pub async fn has_upcoming_alarms(&self) -> bool {
        views::has_upcoming_alarms(&self.collections.lock().await.running)
    }

    pub async fn last_error(&self) -> Option<LastFailure> {
        self.last_failure.lock().await.clone()
    }

    pub async fn clear_last_error(&self) {
        *self.last_failure.lock().await = None;
    }

    pub async fn authorization_state(&self) -> AuthorizationState {
        self.gate.current_state().await
    }

    pub async fn is_available(&self) -> bool {
        !matches!(*self.availability.read().await, Availability::Unavailable)
    }

    pub fn subscribe(&self) -> watch::Receiver<AlarmCollections> {
        self.changes.subscribe()
    }

    async fn schedule_wrapped(
        &self,
        id: &str,
        kind: AlarmKind,
        metadata: AlarmMetadata,
        configuration: AlarmConfiguration,
    ) -> Result<WrappedAlarm, AlarmError> {
        self.ensure_ready().await?;
        validate_id(id)?;
        configuration.validate(self.now())?;

        let alarm = self
            .bounded("scheduling alarm", self.authority.schedule(id, &configuration))
            .await?;
        let wrapped = WrappedAlarm::new(alarm, metadata, kind, &configuration, self.context());
        self.commit(|collections| collections.upsert_running(wrapped.clone()))
            .await;
        tracing::info!(id, kind = ?kind, "alarm scheduled");
        Ok(wrapped)
    }

    async fn capabilities(&self) -> Result<AuthorityCapabilities, AlarmError> {
        match *self.availability.read().await {
            Availability::Undetected => Ok(AuthorityCapabilities::default()),
            Availability::Available(capabilities) => Ok(capabilities),
            Availability::Unavailable => Err(AlarmError::AuthorityUnavailable),
        }
    }

    async fn ensure_ready(&self) -> Result<AuthorityCapabilities, AlarmError> {
        let capabilities = self.capabilities().await?;
        if !self.gate.check_authorization().await {
            return Err(AlarmError::NotAuthorized);
        }
        Ok(capabilities)
    }

    async fn running_alarm(&self, id: &str) -> Result<WrappedAlarm, AlarmError> {
        validate_id(id)?;
        let collections = self.collections.lock().await;
        collections
            .running_position(id)
            .map(|index| collections.running[index].clone())
            .ok_or_else(|| AlarmError::AlarmNotFound(id.to_string()))
    }

    async fn bounded<T, F>(&self, action: &'static str, call: F) -> Result<T, InfraError>
    where
        F: Future<Output = Result<T, InfraError>>,
    {
        match tokio::time::timeout(self.authority_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(InfraError::Timeout(action.to_string())),
        }
    }

    async fn commit<R>(&self, mutate: impl FnOnce(&mut AlarmCollections) -> R) -> R {
        let mut collections = self.collections.lock().await;
        let outcome = mutate(&mut collections);
        self.persist(&collections);
        self.changes.send_replace(collections.clone());
        outcome
    }

    fn persist(&self, collections: &AlarmCollections) {
        if let Err(error) = self.store.save(collections) {
            tracing::warn!(%error, "failed to persist alarms; keeping in-memory state");
        }
    }

    async fn track<T>(&self, operation: &str, result: Result<T, AlarmError>) -> Result<T, AlarmError> {
        if let Err(error) = &result {
            tracing::warn!(operation, code = error.code(), %error, "alarm operation failed");
            let surface = match error {
                AlarmError::NotAuthorized => FailureSurface::PersistentPrompt,
                _ => FailureSurface::DismissibleBanner,
            };
            *self.last_failure.lock().await = Some(LastFailure {
                code: error.code().to_string(),
                message: error.to_string(),
                surface,
                at: self.now(),
            });
        }
        result
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    fn context(&self) -> PresentationContext {
        PresentationContext::new(self.now(), self.timezone)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Pause,
    Resume,
}

impl Transition {
    fn verb(self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
        }
    }

    fn is_supported(self, capabilities: &AuthorityCapabilities) -> bool {
        match self {
            Self::Pause => capabilities.pause,
            Self::Resume => capabilities.resume,
        }
    }
}

fn validate_id(id: &str) -> Result<(), AlarmError> {
    if id.trim().is_empty() {
        return Err(AlarmError::InvalidConfiguration(
            "alarm id must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn kind_of(configuration: &AlarmConfiguration) -> AlarmKind {
    match (&configuration.schedule, &configuration.countdown_duration) {
        (Some(_), Some(_)) => AlarmKind::Custom,
        (None, Some(_)) => AlarmKind::Timer,
        _ => AlarmKind::Traditional,
    }
}
