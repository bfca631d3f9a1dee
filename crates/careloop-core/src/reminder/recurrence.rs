//! Recurrence resolution.
//!
//! Pure functions from a reminder and a reference instant to the next due
//! instant. No clock reads and no storage: the scheduler can call these again
//! after a restart and get identical answers, which is what makes occurrence
//! keys stable.
//!
//! Unusable rules (a weekly rule without days, an end date before the
//! reference) resolve to `None` rather than an error.

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};

use super::{DayOfWeek, Frequency, RecurrenceRule, Reminder};

/// Next due instant strictly after `after`, or `None` if the reminder will not
/// fire again.
///
/// A `once` reminder yields its single due time only while that time is still
/// ahead of `after`; whether it already fired is tracked by the occurrence key
/// in the store, not here.
pub fn next_occurrence(reminder: &Reminder, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if !reminder.active {
        return None;
    }
    next_for_rule(&reminder.recurrence, after)
}

/// All due instants in `(from, to]`, oldest first, at most `limit` of them.
pub fn occurrences_between(
    reminder: &Reminder,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    limit: usize,
) -> Vec<DateTime<Utc>> {
    let mut out = Vec::new();
    let mut cursor = from;
    while out.len() < limit {
        match next_occurrence(reminder, cursor) {
            Some(due) if due <= to => {
                out.push(due);
                cursor = due;
            }
            _ => break,
        }
    }
    out
}

/// Whether `at` is exactly one of the rule's due instants.
pub fn is_occurrence(reminder: &Reminder, at: DateTime<Utc>) -> bool {
    next_for_rule(&reminder.recurrence, at - chrono::Duration::nanoseconds(1)) == Some(at)
}

pub(crate) fn next_for_rule(rule: &RecurrenceRule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let after_date = after.date_naive();
    if let Some(end) = rule.end_date {
        if after_date > end {
            return None;
        }
    }

    let due_on = |date: NaiveDate| date.and_time(rule.time_of_day).and_utc();
    let first_date = rule.start_date.max(after_date);

    let candidate = match rule.frequency {
        Frequency::Once => {
            let due = due_on(rule.start_date);
            (due > after).then_some(due)
        }
        Frequency::Daily => {
            if due_on(first_date) > after {
                Some(due_on(first_date))
            } else {
                first_date.succ_opt().map(due_on)
            }
        }
        Frequency::Weekly => {
            if rule.days_of_week.is_empty() {
                return None;
            }
            (0..8u64)
                .filter_map(|offset| first_date.checked_add_days(Days::new(offset)))
                .find(|date| {
                    rule.days_of_week.contains(&DayOfWeek::from(date.weekday()))
                        && due_on(*date) > after
                })
                .map(due_on)
        }
        Frequency::Monthly => {
            let anchor_day = rule.start_date.day();
            let (mut year, mut month) = (first_date.year(), first_date.month());
            let mut found = None;
            // The candidate in the month after `first_date` always lies past
            // `after`, so two months bound the search.
            for _ in 0..2 {
                let date = clamped_date(year, month, anchor_day)?;
                if date >= rule.start_date && due_on(date) > after {
                    found = Some(due_on(date));
                    break;
                }
                (year, month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
            }
            found
        }
    }?;

    match rule.end_date {
        Some(end) if candidate.date_naive() > end => None,
        _ => Some(candidate),
    }
}

/// `day` of the given month, pulled back to the month's last day when the
/// month is shorter.
fn clamped_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    (1..=day)
        .rev()
        .find_map(|d| NaiveDate::from_ymd_opt(year, month, d))
}
