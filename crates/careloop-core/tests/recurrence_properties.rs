//! Property tests for recurrence expansion.

use careloop_core::reminder::occurrences_between;
use careloop_core::{
    next_occurrence, Author, DeliveryConfig, EscalationConfig, NewReminder, RecurrenceRule,
    Reminder, ReminderCategory,
};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use proptest::prelude::*;

fn reminder(recurrence: RecurrenceRule) -> Reminder {
    Reminder::from_new(
        "r".into(),
        NewReminder {
            owner_id: "owner".into(),
            created_by: Author::Owner,
            title: "Stretch".into(),
            description: None,
            category: ReminderCategory::Activity,
            recurrence,
            active: true,
            escalation: EscalationConfig::default(),
            delivery: DeliveryConfig::default(),
        },
        base_date().and_hms_opt(0, 0, 0).unwrap().and_utc(),
    )
}

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

prop_compose! {
    fn arb_time()(h in 0u32..24, m in 0u32..60) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }
}

prop_compose! {
    fn arb_daily()(
        time in arb_time(),
        start_offset in 0i64..400,
        span in proptest::option::of(0i64..60),
    ) -> RecurrenceRule {
        let start = base_date() + Duration::days(start_offset);
        let mut rule = RecurrenceRule::daily(time, start);
        rule.end_date = span.map(|s| start + Duration::days(s));
        rule
    }
}

fn arb_weekdays() -> impl Strategy<Value = Vec<Weekday>> {
    proptest::sample::subsequence(
        vec![
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ],
        1..=7,
    )
}

proptest! {
    #[test]
    fn daily_instants_are_a_day_apart_and_inside_the_range(
        rule in arb_daily(),
        cursor_offset in -5i64..500,
    ) {
        let r = reminder(rule.clone());
        let after = base_date().and_hms_opt(0, 0, 0).unwrap().and_utc()
            + Duration::days(cursor_offset);

        let mut cursor = after;
        let mut previous: Option<DateTime<Utc>> = None;
        for _ in 0..10 {
            let Some(due) = next_occurrence(&r, cursor) else { break };
            prop_assert!(due > cursor);
            prop_assert_eq!(due.time(), rule.time_of_day);
            prop_assert!(due.date_naive() >= rule.start_date);
            if let Some(end) = rule.end_date {
                prop_assert!(due.date_naive() <= end);
            }
            if let Some(prev) = previous {
                prop_assert_eq!(due - prev, Duration::hours(24));
            }
            previous = Some(due);
            cursor = due;
        }
    }

    #[test]
    fn weekly_instants_land_on_selected_days(
        time in arb_time(),
        days in arb_weekdays(),
        cursor_offset in 0i64..60,
    ) {
        let r = reminder(RecurrenceRule::weekly(time, base_date(), days.clone()));
        let mut cursor = base_date().and_hms_opt(0, 0, 0).unwrap().and_utc()
            + Duration::days(cursor_offset);
        for _ in 0..14 {
            let due = next_occurrence(&r, cursor).unwrap();
            prop_assert!(days.contains(&due.weekday()));
            prop_assert!(due - cursor <= Duration::days(7));
            cursor = due;
        }
    }

    #[test]
    fn window_expansion_matches_repeated_next(
        rule in arb_daily(),
        from_offset in 0i64..400,
        width_hours in 0i64..(24 * 20),
    ) {
        let r = reminder(rule);
        let from = base_date().and_hms_opt(0, 0, 0).unwrap().and_utc()
            + Duration::days(from_offset);
        let to = from + Duration::hours(width_hours);

        let listed = occurrences_between(&r, from, to, 1_000);

        let mut walked = Vec::new();
        let mut cursor = from;
        while let Some(due) = next_occurrence(&r, cursor) {
            if due > to {
                break;
            }
            walked.push(due);
            cursor = due;
        }
        prop_assert_eq!(listed, walked);
    }

    #[test]
    fn nothing_after_the_end_date(rule in arb_daily()) {
        let r = reminder(rule.clone());
        if let Some(end) = rule.end_date {
            let past_end = (end + Duration::days(1)).and_hms_opt(0, 0, 0).unwrap().and_utc();
            prop_assert_eq!(next_occurrence(&r, past_end), None);
        }
    }
}

#[test]
fn weekly_from_tuesday_midnight_is_wednesday_morning() {
    let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
    let r = reminder(RecurrenceRule::weekly(
        nine,
        base_date(),
        [Weekday::Mon, Weekday::Wed, Weekday::Fri],
    ));
    let tuesday = NaiveDate::from_ymd_opt(2024, 1, 2)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc();
    let wednesday = NaiveDate::from_ymd_opt(2024, 1, 3)
        .unwrap()
        .and_time(nine)
        .and_utc();
    assert_eq!(next_occurrence(&r, tuesday), Some(wednesday));
}

#[test]
fn past_end_date_never_fires() {
    let mut rule = RecurrenceRule::daily(NaiveTime::from_hms_opt(8, 0, 0).unwrap(), base_date());
    rule.end_date = Some(NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
    let r = reminder(rule);
    let now = NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
        .and_utc();
    assert_eq!(next_occurrence(&r, now), None);
    assert!(occurrences_between(&r, now - Duration::hours(24), now, 10).is_empty());
}

#[test]
fn inactive_reminder_has_no_next_occurrence() {
    let mut r = reminder(RecurrenceRule::daily(
        NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        base_date(),
    ));
    r.active = false;
    let now = base_date().and_hms_opt(0, 0, 0).unwrap().and_utc();
    assert_eq!(next_occurrence(&r, now), None);
}
