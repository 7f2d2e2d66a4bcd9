use crate::domain::models::{AlarmKind, PresentationContext, WrappedAlarm};
use std::cmp::Ordering;

/// Traditional alarms, soonest first. Alarms without a next fire date sort last.
pub fn traditional_alarms(running: &[WrappedAlarm], context: PresentationContext) -> Vec<WrappedAlarm> {
    let mut alarms = of_kind(running, AlarmKind::Traditional, context);
    alarms.sort_by(|left, right| {
        match (left.presentation.fire_date, right.presentation.fire_date) {
            (Some(left), Some(right)) => left.cmp(&right),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    });
    alarms
}

/// Timers, newest first.
pub fn timers(running: &[WrappedAlarm], context: PresentationContext) -> Vec<WrappedAlarm> {
    newest_first(of_kind(running, AlarmKind::Timer, context))
}

/// Custom alarms, newest first.
pub fn custom_alarms(running: &[WrappedAlarm], context: PresentationContext) -> Vec<WrappedAlarm> {
    newest_first(of_kind(running, AlarmKind::Custom, context))
}

pub fn has_upcoming_alarms(running: &[WrappedAlarm]) -> bool {
    !running.is_empty()
}

fn of_kind(running: &[WrappedAlarm], kind: AlarmKind, context: PresentationContext) -> Vec<WrappedAlarm> {
    running
        .iter()
        .filter(|wrapped| wrapped.kind == kind)
        .cloned()
        .map(|mut wrapped| {
            wrapped.refresh_presentation(context);
            wrapped
        })
        .collect()
}

fn newest_first(mut alarms: Vec<WrappedAlarm>) -> Vec<WrappedAlarm> {
    alarms.sort_by(|left, right| right.metadata.created_at.cmp(&left.metadata.created_at));
    alarms
}
