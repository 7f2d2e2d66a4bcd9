use crate::domain::errors::AlarmError;
use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlarmState {
    Scheduled,
    Countdown,
    Paused,
    Alerting,
}

impl AlarmState {
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Alerting)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Scheduled => "Scheduled",
            Self::Countdown => "Running",
            Self::Paused => "Paused",
            Self::Alerting => "Ringing",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlarmSchedule {
    Fixed {
        date: DateTime<Utc>,
    },
    Relative {
        hour: u8,
        minute: u8,
        #[serde(default)]
        repeats: Vec<Weekday>,
    },
}

impl AlarmSchedule {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), AlarmError> {
        match self {
            Self::Fixed { date } => {
                if *date <= now {
                    return Err(AlarmError::ScheduleInPast);
                }
            }
            Self::Relative { hour, minute, .. } => {
                if *hour > 23 || *minute > 59 {
                    return Err(AlarmError::InvalidConfiguration(
                        "schedule.relative must be a valid HH:MM".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Next instant this schedule fires at or after `now`, evaluated in `timezone`.
    pub fn next_fire_date(&self, now: DateTime<Utc>, timezone: Tz) -> Option<DateTime<Utc>> {
        match self {
            Self::Fixed { date } => Some(*date),
            Self::Relative {
                hour,
                minute,
                repeats,
            } => {
                let time = NaiveTime::from_hms_opt(u32::from(*hour), u32::from(*minute), 0)?;
                let local_today = now.with_timezone(&timezone).date_naive();
                (0..=7)
                    .filter_map(|offset| local_today.checked_add_signed(Duration::days(offset)))
                    .filter(|day| repeats.is_empty() || repeats.contains(&day.weekday()))
                    .filter_map(|day| {
                        timezone
                            .from_local_datetime(&day.and_time(time))
                            .earliest()
                    })
                    .map(|candidate| candidate.with_timezone(&Utc))
                    .find(|candidate| *candidate > now)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CountdownDuration {
    #[serde(default)]
    pub pre_alert_seconds: Option<u32>,
    #[serde(default)]
    pub post_alert_seconds: Option<u32>,
}

impl CountdownDuration {
    pub fn timer(seconds: u32) -> Self {
        Self {
            pre_alert_seconds: Some(seconds),
            post_alert_seconds: None,
        }
    }

    pub fn validate(&self) -> Result<(), AlarmError> {
        if self.pre_alert_seconds.is_none() && self.post_alert_seconds.is_none() {
            return Err(AlarmError::InvalidConfiguration(
                "countdown must define a pre-alert or post-alert duration".to_string(),
            ));
        }
        if self.pre_alert_seconds == Some(0) || self.post_alert_seconds == Some(0) {
            return Err(AlarmError::InvalidConfiguration(
                "countdown durations must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Authority-owned alarm. This crate never mutates one in place; it only
/// replaces its copy with what the authority reports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Alarm {
    pub id: String,
    pub state: AlarmState,
    #[serde(default)]
    pub schedule: Option<AlarmSchedule>,
    #[serde(default)]
    pub countdown_duration: Option<CountdownDuration>,
    #[serde(default)]
    pub fire_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SleepContext {
    PowerNap,
    ShortNap,
    SleepCycle,
    TwoCycles,
    FullNight,
}

impl SleepContext {
    pub const ALL: [SleepContext; 5] = [
        Self::PowerNap,
        Self::ShortNap,
        Self::SleepCycle,
        Self::TwoCycles,
        Self::FullNight,
    ];

    pub fn duration_seconds(self) -> u32 {
        match self {
            Self::PowerNap => 20 * 60,
            Self::ShortNap => 30 * 60,
            Self::SleepCycle => 90 * 60,
            Self::TwoCycles => 180 * 60,
            Self::FullNight => 450 * 60,
        }
    }

    pub fn from_duration_seconds(seconds: u32) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|context| context.duration_seconds() == seconds)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::PowerNap => "Power nap",
            Self::ShortNap => "Short nap",
            Self::SleepCycle => "One sleep cycle",
            Self::TwoCycles => "Two sleep cycles",
            Self::FullNight => "Full night",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WakeUpReason {
    #[default]
    General,
    Work,
    School,
    Exercise,
    Nap,
    Appointment,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlarmMetadata {
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sleep_context: Option<SleepContext>,
    #[serde(default)]
    pub wake_up_reason: WakeUpReason,
}

impl AlarmMetadata {
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            created_at,
            sleep_context: None,
            wake_up_reason: WakeUpReason::General,
        }
    }

    pub fn with_sleep_context(mut self, sleep_context: SleepContext) -> Self {
        self.sleep_context = Some(sleep_context);
        self
    }

    pub fn with_wake_up_reason(mut self, wake_up_reason: WakeUpReason) -> Self {
        self.wake_up_reason = wake_up_reason;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlarmKind {
    Traditional,
    Timer,
    Custom,
}

impl AlarmKind {
    /// Kind of an alarm created outside this process, judged by its shape.
    pub fn infer(alarm: &Alarm) -> Self {
        match (alarm.schedule.is_some(), alarm.countdown_duration.is_some()) {
            (true, true) => Self::Custom,
            (false, true) => Self::Timer,
            _ => Self::Traditional,
        }
    }

    fn default_title(self) -> &'static str {
        match self {
            Self::Traditional => "Alarm",
            Self::Timer => "Timer",
            Self::Custom => "Custom Alarm",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecondaryAction {
    Repeat,
    OpenApp,
    Custom { reference: String },
}

/// What the authority is asked to schedule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlarmConfiguration {
    pub title: String,
    pub icon: String,
    #[serde(default)]
    pub schedule: Option<AlarmSchedule>,
    #[serde(default)]
    pub countdown_duration: Option<CountdownDuration>,
    #[serde(default)]
    pub secondary_action: Option<SecondaryAction>,
}

impl AlarmConfiguration {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), AlarmError> {
        if self.title.trim().is_empty() {
            return Err(AlarmError::InvalidConfiguration(
                "title must not be empty".to_string(),
            ));
        }
        if self.schedule.is_none() && self.countdown_duration.is_none() {
            return Err(AlarmError::InvalidConfiguration(
                "a schedule or a countdown is required".to_string(),
            ));
        }
        if let Some(schedule) = &self.schedule {
            schedule.validate(now)?;
        }
        if let Some(countdown) = &self.countdown_duration {
            countdown.validate()?;
        }
        if let Some(SecondaryAction::Custom { reference }) = &self.secondary_action {
            if reference.trim().is_empty() {
                return Err(AlarmError::InvalidConfiguration(
                    "secondary action reference must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PresentationContext {
    pub now: DateTime<Utc>,
    pub timezone: Tz,
}

impl PresentationContext {
    pub fn new(now: DateTime<Utc>, timezone: Tz) -> Self {
        Self { now, timezone }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Presentation {
    pub title: String,
    pub subtitle: String,
    pub state_label: String,
    pub fire_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WrappedAlarm {
    pub alarm: Alarm,
    pub metadata: AlarmMetadata,
    pub kind: AlarmKind,
    #[serde(default)]
    pub title: Option<String>,
    pub icon: String,
    #[serde(default)]
    pub secondary_action: Option<SecondaryAction>,
    #[serde(default)]
    pub previous_state: Option<AlarmState>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    pub presentation: Presentation,
}

pub const DEFAULT_ICON: &str = "alarm";

impl WrappedAlarm {
    pub fn new(
        alarm: Alarm,
        metadata: AlarmMetadata,
        kind: AlarmKind,
        configuration: &AlarmConfiguration,
        context: PresentationContext,
    ) -> Self {
        let title = Some(configuration.title.trim().to_string()).filter(|value| !value.is_empty());
        let mut wrapped = Self {
            alarm,
            metadata,
            kind,
            title,
            icon: configuration.icon.clone(),
            secondary_action: configuration.secondary_action.clone(),
            previous_state: None,
            ended_at: None,
            presentation: placeholder_presentation(),
        };
        wrapped.refresh_presentation(context);
        wrapped
    }

    /// Wraps an alarm the authority knows about but this process has no metadata for.
    pub fn orphan(alarm: Alarm, context: PresentationContext) -> Self {
        let kind = AlarmKind::infer(&alarm);
        let mut wrapped = Self {
            alarm,
            metadata: AlarmMetadata::new(context.now),
            kind,
            title: None,
            icon: DEFAULT_ICON.to_string(),
            secondary_action: (kind == AlarmKind::Timer).then_some(SecondaryAction::Repeat),
            previous_state: None,
            ended_at: None,
            presentation: placeholder_presentation(),
        };
        wrapped.refresh_presentation(context);
        wrapped
    }

    pub fn id(&self) -> &str {
        &self.alarm.id
    }

    pub fn state(&self) -> AlarmState {
        self.alarm.state
    }

    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }

    pub fn configuration(&self) -> AlarmConfiguration {
        AlarmConfiguration {
            title: self.presentation.title.clone(),
            icon: self.icon.clone(),
            schedule: self.alarm.schedule.clone(),
            countdown_duration: self.alarm.countdown_duration.clone(),
            secondary_action: self.secondary_action.clone(),
        }
    }

    /// Swaps in the authority's latest copy. Returns true when the state changed.
    pub fn replace_alarm(&mut self, alarm: Alarm, context: PresentationContext) -> bool {
        let transitioned = self.alarm.state != alarm.state;
        if transitioned {
            self.previous_state = Some(self.alarm.state);
        }
        self.alarm = alarm;
        self.refresh_presentation(context);
        transitioned
    }

    /// Clears the ended marker so the alarm can live in `running` again.
    pub fn reopen(&mut self, context: PresentationContext) {
        self.ended_at = None;
        self.refresh_presentation(context);
    }

    pub fn mark_ended(&mut self, context: PresentationContext) {
        if self.ended_at.is_none() {
            self.ended_at = Some(context.now);
        }
        self.refresh_presentation(context);
    }

    pub fn refresh_presentation(&mut self, context: PresentationContext) {
        self.presentation = Presentation {
            title: self.display_title(),
            subtitle: self.subtitle(context.timezone),
            state_label: if self.is_ended() {
                "Ended".to_string()
            } else {
                self.alarm.state.label().to_string()
            },
            fire_date: if self.is_ended() {
                None
            } else {
                self.next_fire_date(context)
            },
        };
    }

    fn display_title(&self) -> String {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(self.kind.default_title())
            .to_string()
    }

    fn next_fire_date(&self, context: PresentationContext) -> Option<DateTime<Utc>> {
        match self.alarm.state {
            AlarmState::Paused => None,
            AlarmState::Countdown => self.alarm.fire_date,
            AlarmState::Scheduled | AlarmState::Alerting => self
                .alarm
                .schedule
                .as_ref()
                .and_then(|schedule| schedule.next_fire_date(context.now, context.timezone))
                .or(self.alarm.fire_date),
        }
    }

    fn subtitle(&self, timezone: Tz) -> String {
        let mut parts = Vec::new();
        if let Some(sleep_context) = self.metadata.sleep_context {
            parts.push(sleep_context.label().to_string());
        }
        if let Some(schedule) = &self.alarm.schedule {
            parts.push(describe_schedule(schedule, timezone));
        }
        if let Some(seconds) = self
            .alarm
            .countdown_duration
            .as_ref()
            .and_then(|countdown| countdown.pre_alert_seconds)
        {
            parts.push(format_duration(seconds));
        }
        parts.join(" · ")
    }
}

fn placeholder_presentation() -> Presentation {
    Presentation {
        title: String::new(),
        subtitle: String::new(),
        state_label: String::new(),
        fire_date: None,
    }
}

fn describe_schedule(schedule: &AlarmSchedule, timezone: Tz) -> String {
    match schedule {
        AlarmSchedule::Fixed { date } => date
            .with_timezone(&timezone)
            .format("%a %d %b %H:%M")
            .to_string(),
        AlarmSchedule::Relative {
            hour,
            minute,
            repeats,
        } => format!("{hour:02}:{minute:02} {}", describe_repeats(repeats)),
    }
}

fn describe_repeats(repeats: &[Weekday]) -> String {
    const WEEKDAYS: [Weekday; 5] = [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
    ];
    let mut days = repeats.to_vec();
    days.sort_by_key(|day| day.num_days_from_monday());
    days.dedup();

    if days.is_empty() {
        return "Once".to_string();
    }
    if days.len() == 7 {
        return "Every day".to_string();
    }
    if days == WEEKDAYS {
        return "Weekdays".to_string();
    }
    if days == [Weekday::Sat, Weekday::Sun] {
        return "Weekends".to_string();
    }
    days.iter()
        .map(|day| day.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn format_duration(seconds: u32) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let rest = seconds % 60;
    match (hours, minutes, rest) {
        (0, 0, rest) => format!("{rest} s"),
        (0, minutes, 0) => format!("{minutes} min"),
        (0, minutes, rest) => format!("{minutes} min {rest} s"),
        (hours, 0, 0) => format!("{hours} h"),
        (hours, minutes, _) => format!("{hours} h {minutes} min"),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AlarmCollections {
    pub running: Vec<WrappedAlarm>,
    pub recent: Vec<WrappedAlarm>,
}

impl AlarmCollections {
    pub fn running_position(&self, id: &str) -> Option<usize> {
        self.running.iter().position(|wrapped| wrapped.id() == id)
    }

    pub fn recent_position(&self, id: &str) -> Option<usize> {
        self.recent.iter().position(|wrapped| wrapped.id() == id)
    }

    pub fn find(&self, id: &str) -> Option<&WrappedAlarm> {
        self.running
            .iter()
            .chain(self.recent.iter())
            .find(|wrapped| wrapped.id() == id)
    }

    /// Inserts into `running`, replacing an entry with the same id and
    /// dropping the id from `recent`.
    pub fn upsert_running(&mut self, wrapped: WrappedAlarm) {
        self.recent.retain(|candidate| candidate.id() != wrapped.id());
        match self.running_position(wrapped.id()) {
            Some(index) => self.running[index] = wrapped,
            None => self.running.push(wrapped),
        }
    }

    /// Moves an entry from `running` to the front of `recent`, keeping at
    /// most `recent_limit` history entries.
    pub fn retire(&mut self, id: &str, context: PresentationContext, recent_limit: usize) -> bool {
        let Some(index) = self.running_position(id) else {
            return false;
        };
        let mut wrapped = self.running.remove(index);
        wrapped.mark_ended(context);
        self.recent.retain(|candidate| candidate.id() != id);
        self.recent.insert(0, wrapped);
        self.recent.truncate(recent_limit.max(1));
        true
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.running.len() + self.recent.len();
        self.running.retain(|wrapped| wrapped.id() != id);
        self.recent.retain(|wrapped| wrapped.id() != id);
        before != self.running.len() + self.recent.len()
    }
}

/// Bearer grant handed out by the authority once the user allowed alarms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorityGrant {
    pub token: String,
    pub granted_at: DateTime<Utc>,
}

impl AuthorityGrant {
    pub fn is_usable(&self) -> bool {
        !self.token.trim().is_empty()
    }
}
