use crate::domain::models::{Alarm, AlarmCollections, PresentationContext, WrappedAlarm};
use crate::infrastructure::alarm_authority::AlarmAuthority;
use crate::infrastructure::error::InfraError;
use std::collections::HashSet;
use tokio::time::{sleep, timeout, Duration as TokioDuration};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub refreshed: usize,
    pub transitioned: Vec<String>,
    pub adopted: Vec<String>,
    pub retired: Vec<String>,
}

/// Merges the local collections with a full authority snapshot.
///
/// - local running alarms still known to the authority get the authority's copy
/// - authority alarms unknown locally are wrapped with default metadata
///   (reusing a `recent` entry with the same id); alerting ones go to `recent`
/// - local running alarms missing from the snapshot move to the front of
///   `recent`, whether they fired or were cancelled elsewhere
///
/// Applying the same snapshot twice yields the same collections.
pub fn reconcile(
    local: &AlarmCollections,
    authority_alarms: &[Alarm],
    context: PresentationContext,
    recent_limit: usize,
) -> (AlarmCollections, ReconcileSummary) {
    let mut summary = ReconcileSummary::default();

    let mut seen = HashSet::new();
    let snapshot: Vec<&Alarm> = authority_alarms
        .iter()
        .filter(|alarm| seen.insert(alarm.id.as_str()))
        .collect();

    let mut running: Vec<WrappedAlarm> = Vec::with_capacity(snapshot.len());
    let mut retired: Vec<WrappedAlarm> = Vec::new();
    let mut local_ids = HashSet::new();

    for wrapped in &local.running {
        if !local_ids.insert(wrapped.id()) {
            continue;
        }
        let mut wrapped = wrapped.clone();
        match snapshot.iter().find(|alarm| alarm.id == wrapped.id()) {
            Some(alarm) => {
                if wrapped.replace_alarm((*alarm).clone(), context) {
                    summary.transitioned.push(wrapped.id().to_string());
                }
                if wrapped.is_ended() {
                    wrapped.reopen(context);
                }
                summary.refreshed += 1;
                running.push(wrapped);
            }
            None => {
                wrapped.mark_ended(context);
                summary.retired.push(wrapped.id().to_string());
                retired.push(wrapped);
            }
        }
    }

    let mut recent = local.recent.clone();
    let mut ended_orphans: Vec<WrappedAlarm> = Vec::new();

    for alarm in snapshot
        .iter()
        .filter(|alarm| !local_ids.contains(alarm.id.as_str()))
    {
        let known = recent.iter().position(|wrapped| wrapped.id() == alarm.id);
        if alarm.state.is_active() {
            let wrapped = match known {
                Some(index) => {
                    let mut wrapped = recent.remove(index);
                    wrapped.replace_alarm((*alarm).clone(), context);
                    wrapped.reopen(context);
                    wrapped
                }
                None => WrappedAlarm::orphan((*alarm).clone(), context),
            };
            summary.adopted.push(alarm.id.clone());
            running.push(wrapped);
            continue;
        }

        match known {
            Some(index) => {
                recent[index].replace_alarm((*alarm).clone(), context);
                recent[index].mark_ended(context);
            }
            None => {
                let mut wrapped = WrappedAlarm::orphan((*alarm).clone(), context);
                wrapped.mark_ended(context);
                summary.adopted.push(alarm.id.clone());
                ended_orphans.push(wrapped);
            }
        }
    }

    let running_ids: HashSet<String> = running
        .iter()
        .map(|wrapped| wrapped.id().to_string())
        .collect();
    let mut recent_ids = HashSet::new();
    let recent = retired
        .into_iter()
        .chain(ended_orphans)
        .chain(recent)
        .filter(|wrapped| !running_ids.contains(wrapped.id()))
        .filter(|wrapped| recent_ids.insert(wrapped.id().to_string()))
        .take(recent_limit)
        .collect();

    (AlarmCollections { running, recent }, summary)
}

/// Reads authority snapshots for a reconciliation pass, retrying transient
/// failures. Each attempt is bounded by `attempt_timeout`.
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    retry_policy: RetryPolicy,
    attempt_timeout: TokioDuration,
}

impl Default for SnapshotReader {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl SnapshotReader {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self {
            retry_policy,
            attempt_timeout: TokioDuration::from_secs(10),
        }
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: TokioDuration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    pub async fn current_alarms<A>(&self, authority: &A) -> Result<Vec<Alarm>, InfraError>
    where
        A: AlarmAuthority + ?Sized,
    {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            let read = match timeout(self.attempt_timeout, authority.current_alarms()).await {
                Ok(result) => result,
                Err(_) => Err(InfraError::Timeout("reading alarm snapshot".to_string())),
            };
            match read {
                Ok(alarms) => return Ok(alarms),
                Err(error) if self.should_retry(&error) && attempt + 1 < max_attempts => {
                    let delay = self
                        .retry_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(attempt as u32));
                    tracing::debug!(%error, attempt, delay, "retrying alarm snapshot read");
                    sleep(TokioDuration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn should_retry(&self, error: &InfraError) -> bool {
        match error {
            InfraError::Timeout(_) => true,
            InfraError::Authority(message) => {
                let message = message.to_ascii_lowercase();
                message.contains("network error")
                    || message.contains("timed out")
                    || message.contains("temporarily unavailable")
                    || message.contains("connection reset")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::FakeAlarmAuthority;
    use crate::domain::models::{
        AlarmKind, AlarmMetadata, AlarmSchedule, AlarmState, CountdownDuration, SleepContext,
    };
    use crate::infrastructure::alarm_authority::AuthorizationState;
    use chrono::{DateTime, Utc};
    use chrono_tz::Tz;
    use proptest::prelude::*;
    use std::sync::atomic::Ordering;

    const LIMIT: usize = 50;

    fn context() -> PresentationContext {
        let now = DateTime::parse_from_rfc3339("2026-02-16T08:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc);
        PresentationContext::new(now, Tz::UTC)
    }

    fn alarm(id: &str, state: AlarmState) -> Alarm {
        Alarm {
            id: id.to_string(),
            state,
            schedule: Some(AlarmSchedule::Relative {
                hour: 7,
                minute: 0,
                repeats: Vec::new(),
            }),
            countdown_duration: None,
            fire_date: None,
        }
    }

    fn timer(id: &str, state: AlarmState) -> Alarm {
        Alarm {
            id: id.to_string(),
            state,
            schedule: None,
            countdown_duration: Some(CountdownDuration::timer(1800)),
            fire_date: None,
        }
    }

    fn tracked(alarm: Alarm) -> WrappedAlarm {
        let mut wrapped = WrappedAlarm::orphan(alarm, context());
        wrapped.metadata = AlarmMetadata::new(context().now).with_sleep_context(SleepContext::ShortNap);
        wrapped.title = Some("Nap".to_string());
        wrapped.refresh_presentation(context());
        wrapped
    }

    fn ids(alarms: &[WrappedAlarm]) -> Vec<&str> {
        alarms.iter().map(WrappedAlarm::id).collect()
    }

    #[test]
    fn missing_local_alarm_moves_to_recent() {
        let local = AlarmCollections {
            running: vec![tracked(timer("X", AlarmState::Countdown))],
            recent: Vec::new(),
        };

        let (result, summary) = reconcile(&local, &[], context(), LIMIT);

        assert!(result.running.is_empty());
        assert_eq!(ids(&result.recent), vec!["X"]);
        assert_eq!(result.recent[0].ended_at, Some(context().now));
        assert_eq!(result.recent[0].metadata.sleep_context, Some(SleepContext::ShortNap));
        assert_eq!(summary.retired, vec!["X".to_string()]);
    }

    #[test]
    fn unknown_scheduled_alarm_is_adopted_with_default_metadata() {
        let snapshot = vec![alarm("A", AlarmState::Scheduled)];

        let (first, _) = reconcile(&AlarmCollections::default(), &snapshot, context(), LIMIT);
        let (second, summary) = reconcile(&first, &snapshot, context(), LIMIT);

        assert_eq!(first, second);
        assert!(summary.adopted.is_empty());
        assert_eq!(ids(&second.running), vec!["A"]);
        assert_eq!(second.running[0].state(), AlarmState::Scheduled);
        assert_eq!(second.running[0].metadata, AlarmMetadata::new(context().now));
        assert_eq!(second.running[0].kind, AlarmKind::Traditional);
    }

    #[test]
    fn unknown_alerting_alarm_goes_to_recent() {
        let snapshot = vec![timer("R", AlarmState::Alerting)];

        let (result, summary) = reconcile(&AlarmCollections::default(), &snapshot, context(), LIMIT);

        assert!(result.running.is_empty());
        assert_eq!(ids(&result.recent), vec!["R"]);
        assert_eq!(summary.adopted, vec!["R".to_string()]);
    }

    #[test]
    fn tracked_alarm_keeps_metadata_and_records_transition() {
        let local = AlarmCollections {
            running: vec![tracked(timer("T", AlarmState::Countdown))],
            recent: Vec::new(),
        };
        let snapshot = vec![timer("T", AlarmState::Alerting)];

        let (result, summary) = reconcile(&local, &snapshot, context(), LIMIT);

        assert_eq!(ids(&result.running), vec!["T"]);
        let wrapped = &result.running[0];
        assert_eq!(wrapped.state(), AlarmState::Alerting);
        assert_eq!(wrapped.previous_state, Some(AlarmState::Countdown));
        assert_eq!(wrapped.presentation.title, "Nap");
        assert_eq!(summary.transitioned, vec!["T".to_string()]);
    }

    #[test]
    fn recent_alarm_reappearing_returns_to_running_with_its_metadata() {
        let mut ended = tracked(timer("T", AlarmState::Countdown));
        ended.mark_ended(context());
        let local = AlarmCollections {
            running: Vec::new(),
            recent: vec![ended],
        };

        let (result, _) = reconcile(&local, &[timer("T", AlarmState::Countdown)], context(), LIMIT);

        assert!(result.recent.is_empty());
        assert_eq!(ids(&result.running), vec!["T"]);
        assert_eq!(result.running[0].ended_at, None);
        assert_eq!(result.running[0].metadata.sleep_context, Some(SleepContext::ShortNap));
    }

    #[test]
    fn recent_is_capped_newest_first() {
        let local = AlarmCollections {
            running: vec![tracked(timer("new", AlarmState::Countdown))],
            recent: (0..5)
                .map(|index| tracked(timer(&format!("old-{index}"), AlarmState::Countdown)))
                .collect(),
        };

        let (result, _) = reconcile(&local, &[], context(), 3);

        assert_eq!(ids(&result.recent), vec!["new", "old-0", "old-1"]);
    }

    fn arb_state() -> impl Strategy<Value = AlarmState> {
        prop_oneof![
            Just(AlarmState::Scheduled),
            Just(AlarmState::Countdown),
            Just(AlarmState::Paused),
            Just(AlarmState::Alerting),
        ]
    }

    fn arb_alarms() -> impl Strategy<Value = Vec<Alarm>> {
        prop::collection::vec((0u8..8, arb_state(), any::<bool>()), 0..8).prop_map(|entries| {
            entries
                .into_iter()
                .map(|(id, state, is_timer)| {
                    let id = format!("alm-{id}");
                    if is_timer {
                        timer(&id, state)
                    } else {
                        alarm(&id, state)
                    }
                })
                .collect()
        })
    }

    fn arb_local() -> impl Strategy<Value = AlarmCollections> {
        (arb_alarms(), arb_alarms()).prop_map(|(running, recent)| {
            let running: Vec<WrappedAlarm> = running.into_iter().map(tracked).collect();
            let running_ids: HashSet<String> =
                running.iter().map(|wrapped| wrapped.id().to_string()).collect();
            let recent = recent
                .into_iter()
                .filter(|alarm| !running_ids.contains(&alarm.id))
                .map(|alarm| {
                    let mut wrapped = tracked(alarm);
                    wrapped.mark_ended(context());
                    wrapped
                })
                .collect();
            AlarmCollections { running, recent }
        })
    }

    proptest! {
        #[test]
        fn reconcile_is_idempotent(local in arb_local(), snapshot in arb_alarms()) {
            let (once, _) = reconcile(&local, &snapshot, context(), LIMIT);
            let (twice, _) = reconcile(&once, &snapshot, context(), LIMIT);
            prop_assert_eq!(&twice, &once);

            let running_only = AlarmCollections { running: once.running.clone(), recent: Vec::new() };
            let (from_running, _) = reconcile(&running_only, &snapshot, context(), LIMIT);
            prop_assert_eq!(from_running.running, once.running);
        }

        #[test]
        fn running_ids_are_a_subset_of_the_snapshot(local in arb_local(), snapshot in arb_alarms()) {
            let (result, _) = reconcile(&local, &snapshot, context(), LIMIT);
            let snapshot_ids: HashSet<&str> = snapshot.iter().map(|alarm| alarm.id.as_str()).collect();
            for wrapped in &result.running {
                prop_assert!(snapshot_ids.contains(wrapped.id()));
            }
        }

        #[test]
        fn running_and_recent_are_disjoint(local in arb_local(), snapshot in arb_alarms()) {
            let (result, _) = reconcile(&local, &snapshot, context(), LIMIT);
            let running_ids: HashSet<&str> = result.running.iter().map(WrappedAlarm::id).collect();
            prop_assert_eq!(running_ids.len(), result.running.len());
            for wrapped in &result.recent {
                prop_assert!(!running_ids.contains(wrapped.id()));
            }
        }

        #[test]
        fn active_snapshot_alarms_always_end_up_running(local in arb_local(), snapshot in arb_alarms()) {
            let (result, _) = reconcile(&local, &snapshot, context(), LIMIT);
            let running_ids: HashSet<&str> = result.running.iter().map(WrappedAlarm::id).collect();
            for alarm in snapshot.iter().filter(|alarm| alarm.state.is_active()) {
                prop_assert!(running_ids.contains(alarm.id.as_str()));
            }
        }
    }

    #[tokio::test]
    async fn snapshot_reader_retries_network_errors() {
        let authority = FakeAlarmAuthority::new(AuthorizationState::Authorized);
        authority.seed_alarms(vec![alarm("A", AlarmState::Scheduled)]);
        authority.fail_next_snapshots(1);

        let reader = SnapshotReader::new(RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
        });
        let alarms = reader.current_alarms(&authority).await.expect("snapshot after retry");

        assert_eq!(alarms.len(), 1);
        assert_eq!(authority.snapshot_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn snapshot_reader_gives_up_after_max_attempts() {
        let authority = FakeAlarmAuthority::new(AuthorizationState::Authorized);
        authority.fail_next_snapshots(5);

        let reader = SnapshotReader::new(RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
        });
        assert!(reader.current_alarms(&authority).await.is_err());
        assert_eq!(authority.snapshot_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn snapshot_reader_bounds_each_attempt() {
        let authority = FakeAlarmAuthority::new(AuthorizationState::Authorized);
        authority.hang_snapshots();

        let reader = SnapshotReader::new(RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
        })
        .with_attempt_timeout(TokioDuration::from_millis(50));
        let result = timeout(TokioDuration::from_secs(2), reader.current_alarms(&authority))
            .await
            .expect("reader gives up on its own");

        assert!(matches!(result, Err(InfraError::Timeout(_))));
        assert_eq!(authority.snapshot_calls.load(Ordering::SeqCst), 2);
    }
}
