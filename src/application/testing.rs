use crate::domain::models::{Alarm, AlarmConfiguration, AlarmState};
use crate::infrastructure::alarm_authority::{
    AlarmAuthority, AlarmUpdates, AuthorityCapabilities, AuthorizationState,
};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Scriptable in-process authority shared by the application tests.
pub struct FakeAlarmAuthority {
    state: Mutex<AuthorizationState>,
    prompt_answer: Mutex<AuthorizationState>,
    capabilities: Mutex<AuthorityCapabilities>,
    alarms: Mutex<Vec<Alarm>>,
    calls: Mutex<Vec<String>>,
    updates: Mutex<Option<mpsc::Sender<Vec<Alarm>>>>,
    failing_snapshots: AtomicUsize,
    fail_authorization_reads: AtomicBool,
    fail_probe: AtomicBool,
    fail_schedule: AtomicBool,
    fail_cancel: AtomicBool,
    hang_schedule: AtomicBool,
    hang_authorization_reads: AtomicBool,
    hang_prompt: AtomicBool,
    hang_snapshots: AtomicBool,
    pub prompt_calls: AtomicUsize,
    pub snapshot_calls: AtomicUsize,
}

impl FakeAlarmAuthority {
    pub fn new(state: AuthorizationState) -> Self {
        Self {
            state: Mutex::new(state),
            prompt_answer: Mutex::new(AuthorizationState::Authorized),
            capabilities: Mutex::new(AuthorityCapabilities::default()),
            alarms: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            updates: Mutex::new(None),
            failing_snapshots: AtomicUsize::new(0),
            fail_authorization_reads: AtomicBool::new(false),
            fail_probe: AtomicBool::new(false),
            fail_schedule: AtomicBool::new(false),
            fail_cancel: AtomicBool::new(false),
            hang_schedule: AtomicBool::new(false),
            hang_authorization_reads: AtomicBool::new(false),
            hang_prompt: AtomicBool::new(false),
            hang_snapshots: AtomicBool::new(false),
            prompt_calls: AtomicUsize::new(0),
            snapshot_calls: AtomicUsize::new(0),
        }
    }

    pub fn authorized() -> Self {
        Self::new(AuthorizationState::Authorized)
    }

    pub fn with_capabilities(self, capabilities: AuthorityCapabilities) -> Self {
        *self.capabilities.lock().expect("capabilities lock") = capabilities;
        self
    }

    pub fn set_prompt_answer(&self, answer: AuthorizationState) {
        *self.prompt_answer.lock().expect("prompt answer lock") = answer;
    }

    pub fn fail_authorization_reads(&self) {
        self.fail_authorization_reads.store(true, Ordering::SeqCst);
    }

    pub fn fail_probe(&self) {
        self.fail_probe.store(true, Ordering::SeqCst);
    }

    pub fn fail_schedule(&self, fail: bool) {
        self.fail_schedule.store(fail, Ordering::SeqCst);
    }

    pub fn fail_cancel(&self, fail: bool) {
        self.fail_cancel.store(fail, Ordering::SeqCst);
    }

    pub fn hang_schedule(&self) {
        self.hang_schedule.store(true, Ordering::SeqCst);
    }

    pub fn hang_authorization_reads(&self) {
        self.hang_authorization_reads.store(true, Ordering::SeqCst);
    }

    pub fn hang_prompt(&self) {
        self.hang_prompt.store(true, Ordering::SeqCst);
    }

    pub fn hang_snapshots(&self) {
        self.hang_snapshots.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_snapshots(&self, count: usize) {
        self.failing_snapshots.store(count, Ordering::SeqCst);
    }

    pub fn seed_alarms(&self, alarms: Vec<Alarm>) {
        *self.alarms.lock().expect("alarms lock") = alarms;
    }

    pub fn alarms(&self) -> Vec<Alarm> {
        self.alarms.lock().expect("alarms lock").clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Pushes a snapshot to whoever holds the update receiver.
    pub async fn emit(&self, snapshot: Vec<Alarm>) {
        let sender = self
            .updates
            .lock()
            .expect("updates lock")
            .clone()
            .expect("alarm_updates was requested");
        sender.send(snapshot).await.expect("listener alive");
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("calls lock").push(call);
    }

    fn capabilities(&self) -> AuthorityCapabilities {
        *self.capabilities.lock().expect("capabilities lock")
    }

    fn set_alarm_state(&self, id: &str, state: AlarmState) -> Result<(), InfraError> {
        let mut alarms = self.alarms.lock().expect("alarms lock");
        let alarm = alarms
            .iter_mut()
            .find(|alarm| alarm.id == id)
            .ok_or_else(|| InfraError::Authority(format!("unknown alarm {id}")))?;
        alarm.state = state;
        Ok(())
    }
}

#[async_trait]
impl AlarmAuthority for FakeAlarmAuthority {
    async fn probe(&self) -> Result<AuthorityCapabilities, InfraError> {
        if self.fail_probe.load(Ordering::SeqCst) {
            return Err(InfraError::Authority("no alarm authority".to_string()));
        }
        Ok(self.capabilities())
    }

    async fn authorization_state(&self) -> Result<AuthorizationState, InfraError> {
        if self.hang_authorization_reads.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        }
        if self.fail_authorization_reads.load(Ordering::SeqCst) {
            return Err(InfraError::Authority("network error while reading authorization".to_string()));
        }
        Ok(*self.state.lock().expect("state lock"))
    }

    async fn request_authorization(&self) -> Result<AuthorizationState, InfraError> {
        self.prompt_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_prompt.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        }
        let answer = *self.prompt_answer.lock().expect("prompt answer lock");
        *self.state.lock().expect("state lock") = answer;
        Ok(answer)
    }

    async fn schedule(&self, id: &str, configuration: &AlarmConfiguration) -> Result<Alarm, InfraError> {
        self.record(format!("schedule:{id}"));
        if self.hang_schedule.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        }
        if self.fail_schedule.load(Ordering::SeqCst) {
            return Err(InfraError::Authority("schedule rejected".to_string()));
        }

        let countdown_only = configuration.schedule.is_none();
        let fire_date = configuration
            .countdown_duration
            .as_ref()
            .and_then(|countdown| countdown.pre_alert_seconds)
            .filter(|_| countdown_only)
            .map(|seconds| Utc::now() + Duration::seconds(i64::from(seconds)));
        let alarm = Alarm {
            id: id.to_string(),
            state: if countdown_only {
                AlarmState::Countdown
            } else {
                AlarmState::Scheduled
            },
            schedule: configuration.schedule.clone(),
            countdown_duration: configuration.countdown_duration.clone(),
            fire_date,
        };

        let mut alarms = self.alarms.lock().expect("alarms lock");
        alarms.retain(|existing| existing.id != id);
        alarms.push(alarm.clone());
        Ok(alarm)
    }

    async fn cancel(&self, id: &str) -> Result<(), InfraError> {
        self.record(format!("cancel:{id}"));
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(InfraError::Authority("cancel rejected".to_string()));
        }
        let mut alarms = self.alarms.lock().expect("alarms lock");
        let before = alarms.len();
        alarms.retain(|alarm| alarm.id != id);
        if alarms.len() == before {
            return Err(InfraError::Authority(format!("unknown alarm {id}")));
        }
        Ok(())
    }

    async fn pause(&self, id: &str) -> Result<(), InfraError> {
        if !self.capabilities().pause {
            return Err(InfraError::Unsupported("pause"));
        }
        self.record(format!("pause:{id}"));
        self.set_alarm_state(id, AlarmState::Paused)
    }

    async fn resume(&self, id: &str) -> Result<(), InfraError> {
        if !self.capabilities().resume {
            return Err(InfraError::Unsupported("resume"));
        }
        self.record(format!("resume:{id}"));
        self.set_alarm_state(id, AlarmState::Countdown)
    }

    async fn countdown(&self, id: &str) -> Result<(), InfraError> {
        if !self.capabilities().countdown {
            return Err(InfraError::Unsupported("countdown"));
        }
        self.record(format!("countdown:{id}"));
        self.set_alarm_state(id, AlarmState::Countdown)
    }

    async fn stop(&self, id: &str) -> Result<(), InfraError> {
        if !self.capabilities().stop {
            return Err(InfraError::Unsupported("stop"));
        }
        self.record(format!("stop:{id}"));
        self.alarms.lock().expect("alarms lock").retain(|alarm| alarm.id != id);
        Ok(())
    }

    async fn current_alarms(&self) -> Result<Vec<Alarm>, InfraError> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_snapshots.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        }
        let remaining = self.failing_snapshots.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_snapshots.store(remaining - 1, Ordering::SeqCst);
            return Err(InfraError::Authority("network error while listing alarms".to_string()));
        }
        Ok(self.alarms())
    }

    async fn alarm_updates(&self) -> Result<AlarmUpdates, InfraError> {
        let (sender, receiver) = mpsc::channel(16);
        *self.updates.lock().expect("updates lock") = Some(sender);
        Ok(receiver)
    }
}
