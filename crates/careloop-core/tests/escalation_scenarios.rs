//! End-to-end escalation scenarios, run against both store adapters.

mod common;

use std::collections::BTreeSet;
use std::sync::Barrier;
use std::thread;

use careloop_core::{
    AlertType, CoreError, Engine, EngineSettings, ManualAlert, MemoryStore, OccurrenceKey,
    OccurrenceState, OccurrenceStore, ReminderPatch, ResolveOutcome, Severity, SqliteStore,
    TickReport,
};
use chrono::{DateTime, Duration, Utc};
use common::{at, member, seeded_engine, take_medication};

fn sqlite() -> (tempfile::TempDir, SqliteStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(&dir.path().join("careloop.db")).unwrap();
    (dir, store)
}

fn missed_occurrence_alerts_only_eligible_member<S: OccurrenceStore>(store: S) {
    let engine = seeded_engine(store);
    let r = engine.create_reminder(take_medication(), at(7, 0)).unwrap();

    // Scheduler ticks every minute from 08:00 to 08:40.
    let mut alert_ids = Vec::new();
    for minute in 0..=40 {
        let report = engine.tick(at(8, 0) + Duration::minutes(minute)).unwrap();
        alert_ids.extend(report.alert_ids);
    }

    assert_eq!(alert_ids.len(), 1);
    let alert = engine.store().get_alert(&alert_ids[0]).unwrap().unwrap();
    assert_eq!(alert.targets().iter().collect::<Vec<_>>(), vec!["m1"]);
    assert_eq!(alert.occurrence, Some(OccurrenceKey::new(&r.id, at(8, 0))));

    let occ = engine
        .store()
        .get_occurrence(&OccurrenceKey::new(&r.id, at(8, 0)))
        .unwrap()
        .unwrap();
    assert_eq!(occ.state, OccurrenceState::Escalated);
    assert_eq!(occ.alert_id.as_deref(), Some(alert.id.as_str()));
}

fn resolved_before_deadline_never_alerts<S: OccurrenceStore>(store: S) {
    let engine = seeded_engine(store);
    let r = engine.create_reminder(take_medication(), at(7, 0)).unwrap();

    engine.tick(at(8, 0)).unwrap();
    assert_eq!(
        engine.resolve_occurrence(&r.id, at(8, 0), at(8, 15)).unwrap(),
        ResolveOutcome::Resolved
    );
    for minute in [30, 31, 60, 120] {
        let report = engine.tick(at(8, 0) + Duration::minutes(minute)).unwrap();
        assert_eq!(report.alerts_created, 0);
    }

    assert!(engine.store().list_alerts().unwrap().is_empty());
    let occ = engine
        .store()
        .get_occurrence(&OccurrenceKey::new(&r.id, at(8, 0)))
        .unwrap()
        .unwrap();
    assert_eq!(occ.state, OccurrenceState::Resolved);
}

fn duplicated_ticks_create_one_alert<S: OccurrenceStore>(store: S) {
    let engine = seeded_engine(store);
    engine.create_reminder(take_medication(), at(7, 0)).unwrap();

    let fired = engine.tick(at(8, 0)).unwrap();
    let fired_again = engine.tick(at(8, 0)).unwrap();
    let first = engine.tick(at(8, 45)).unwrap();
    let replay = engine.tick(at(8, 45)).unwrap();
    let later = engine.tick(at(9, 30)).unwrap();

    assert_eq!(fired.fired, 1);
    assert_eq!(fired_again.fired, 0);
    assert_eq!(fired_again.duplicates_skipped, 1);
    assert_eq!(first.alerts_created, 1);
    assert_eq!(replay.alerts_created, 0);
    assert_eq!(replay.duplicates_skipped, 1);
    assert_eq!(later.alerts_created, 0);
    assert_eq!(engine.store().list_alerts().unwrap().len(), 1);
}

fn skipped_ticks_catch_up_within_lookback<S: OccurrenceStore>(store: S) {
    let engine = seeded_engine(store);
    engine.create_reminder(take_medication(), at(7, 0)).unwrap();

    // Scheduler was down from 07:00 to 20:00. The 08:00 occurrence fires on
    // the first tick back and the owner still gets the full delay.
    let report = engine.tick(at(20, 0)).unwrap();
    assert_eq!(report.fired, 1);
    assert_eq!(report.alerts_created, 0);

    let report = engine.tick(at(20, 30)).unwrap();
    assert_eq!(report.fired, 0);
    assert_eq!(report.alerts_created, 1);
}

fn late_resolution_does_not_retract_alert<S: OccurrenceStore>(store: S) {
    let engine = seeded_engine(store);
    let r = engine.create_reminder(take_medication(), at(7, 0)).unwrap();
    engine.tick(at(8, 0)).unwrap();
    let report = engine.tick(at(8, 30)).unwrap();
    assert_eq!(report.alerts_created, 1);

    let outcome = engine.resolve_occurrence(&r.id, at(8, 0), at(8, 35)).unwrap();
    assert_eq!(
        outcome,
        ResolveOutcome::AlreadyEscalated {
            alert_id: Some(report.alert_ids[0].clone())
        }
    );
    assert_eq!(engine.store().list_alerts().unwrap().len(), 1);
}

fn edits_do_not_reach_in_flight_escalations<S: OccurrenceStore>(store: S) {
    let engine = seeded_engine(store);
    let r = engine.create_reminder(take_medication(), at(7, 0)).unwrap();
    engine.tick(at(8, 0)).unwrap();

    // Retarget to nobody and stretch the delay after the fire.
    let mut escalation = r.escalation.clone();
    escalation.targets.clear();
    escalation.delay_minutes = 240;
    let patch = ReminderPatch {
        escalation: Some(escalation),
        ..ReminderPatch::default()
    };
    engine
        .update_reminder(&r.id, patch, &careloop_core::Author::Owner, at(8, 5))
        .unwrap();

    let report = engine.tick(at(8, 30)).unwrap();
    assert_eq!(report.alerts_created, 1);
    let alert = engine
        .store()
        .get_alert(&report.alert_ids[0])
        .unwrap()
        .unwrap();
    assert_eq!(alert.targets().iter().collect::<Vec<_>>(), vec!["m1"]);

    // Next day's occurrence uses the edited rule: no targets, no alert.
    let next_day = at(8, 0) + Duration::days(1);
    engine.tick(next_day).unwrap();
    let report = engine.tick(next_day + Duration::hours(5)).unwrap();
    assert_eq!(report.escalated, 1);
    assert_eq!(report.suppressed, 1);
    assert_eq!(report.alerts_created, 0);
}

fn inactive_reminder_never_fires<S: OccurrenceStore>(store: S) {
    let engine = seeded_engine(store);
    let mut spec = take_medication();
    spec.active = false;
    let r = engine.create_reminder(spec, at(7, 0)).unwrap();

    let report = engine.tick(at(9, 0)).unwrap();
    assert_eq!(report.fired, 0);
    assert!(engine.store().list_occurrences(&r.id).unwrap().is_empty());
}

#[test]
fn memory_missed_occurrence_alerts_only_eligible_member() {
    missed_occurrence_alerts_only_eligible_member(MemoryStore::new());
}

#[test]
fn sqlite_missed_occurrence_alerts_only_eligible_member() {
    let (_dir, store) = sqlite();
    missed_occurrence_alerts_only_eligible_member(store);
}

#[test]
fn memory_resolved_before_deadline_never_alerts() {
    resolved_before_deadline_never_alerts(MemoryStore::new());
}

#[test]
fn sqlite_resolved_before_deadline_never_alerts() {
    let (_dir, store) = sqlite();
    resolved_before_deadline_never_alerts(store);
}

#[test]
fn memory_duplicated_ticks_create_one_alert() {
    duplicated_ticks_create_one_alert(MemoryStore::new());
}

#[test]
fn sqlite_duplicated_ticks_create_one_alert() {
    let (_dir, store) = sqlite();
    duplicated_ticks_create_one_alert(store);
}

#[test]
fn memory_skipped_ticks_catch_up_within_lookback() {
    skipped_ticks_catch_up_within_lookback(MemoryStore::new());
}

#[test]
fn sqlite_skipped_ticks_catch_up_within_lookback() {
    let (_dir, store) = sqlite();
    skipped_ticks_catch_up_within_lookback(store);
}

#[test]
fn memory_late_resolution_does_not_retract_alert() {
    late_resolution_does_not_retract_alert(MemoryStore::new());
}

#[test]
fn sqlite_late_resolution_does_not_retract_alert() {
    let (_dir, store) = sqlite();
    late_resolution_does_not_retract_alert(store);
}

#[test]
fn memory_edits_do_not_reach_in_flight_escalations() {
    edits_do_not_reach_in_flight_escalations(MemoryStore::new());
}

#[test]
fn sqlite_edits_do_not_reach_in_flight_escalations() {
    let (_dir, store) = sqlite();
    edits_do_not_reach_in_flight_escalations(store);
}

#[test]
fn memory_inactive_reminder_never_fires() {
    inactive_reminder_never_fires(MemoryStore::new());
}

#[test]
fn sqlite_inactive_reminder_never_fires() {
    let (_dir, store) = sqlite();
    inactive_reminder_never_fires(store);
}

#[test]
fn resolving_unknown_reminder_is_not_found() {
    let engine = seeded_engine(MemoryStore::new());
    assert!(matches!(
        engine.resolve_occurrence("missing", at(8, 0), at(8, 1)),
        Err(CoreError::NotFound { kind: "reminder", .. })
    ));
}

#[test]
fn two_engines_over_one_database_share_idempotency() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("careloop.db");
    let a = seeded_engine(SqliteStore::open(&path).unwrap());
    let b = careloop_core::Engine::new(
        SqliteStore::open(&path).unwrap(),
        careloop_core::EngineSettings::default(),
    );
    a.create_reminder(take_medication(), at(7, 0)).unwrap();

    let fa = a.tick(at(8, 0)).unwrap();
    let fb = b.tick(at(8, 0)).unwrap();
    assert_eq!(fa.fired + fb.fired, 1);
    assert_eq!(fb.duplicates_skipped, 1);

    let ra = a.tick(at(8, 45)).unwrap();
    let rb = b.tick(at(8, 45)).unwrap();
    assert_eq!(ra.alerts_created + rb.alerts_created, 1);
    assert_eq!(b.store().list_alerts().unwrap().len(), 1);
}

#[test]
fn corrupt_member_does_not_block_other_escalations() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("careloop.db");
    let engine = seeded_engine(SqliteStore::open(&path).unwrap());
    engine.add_member(member("m3", true)).unwrap();

    let mut to_m1 = take_medication();
    to_m1.escalation.targets = vec!["m1".into()];
    let a = engine.create_reminder(to_m1, at(7, 0)).unwrap();
    let mut to_m3 = take_medication();
    to_m3.title = "Evening walk".into();
    to_m3.escalation.targets = vec!["m3".into()];
    let b = engine.create_reminder(to_m3, at(7, 0)).unwrap();

    assert_eq!(engine.tick(at(8, 0)).unwrap().fired, 2);

    rusqlite::Connection::open(&path)
        .unwrap()
        .execute("UPDATE members SET body = 'not json' WHERE id = 'm1'", [])
        .unwrap();

    let report = engine.tick(at(8, 30)).unwrap();
    assert_eq!(report.errors, 1);
    assert_eq!(report.alerts_created, 1);
    let alert = engine
        .store()
        .get_alert(&report.alert_ids[0])
        .unwrap()
        .unwrap();
    assert_eq!(alert.occurrence, Some(OccurrenceKey::new(&b.id, at(8, 0))));

    // The broken occurrence stays pending and is retried, without repeating B.
    let again = engine.tick(at(8, 31)).unwrap();
    assert_eq!(again.errors, 1);
    assert_eq!(again.alerts_created, 0);
    let stuck = engine
        .store()
        .get_occurrence(&OccurrenceKey::new(&a.id, at(8, 0)))
        .unwrap()
        .unwrap();
    assert_eq!(stuck.state, OccurrenceState::Fired);
}

const CONCURRENT_ENGINES: usize = 8;

/// Separate connections to one database file, as separate scheduler
/// processes would hold. Opened one at a time so migrations do not race.
fn engines_over(path: &std::path::Path) -> Vec<Engine<SqliteStore>> {
    (0..CONCURRENT_ENGINES)
        .map(|_| Engine::new(SqliteStore::open(path).unwrap(), EngineSettings::default()))
        .collect()
}

fn tick_all_at_once(engines: &[Engine<SqliteStore>], now: DateTime<Utc>) -> Vec<TickReport> {
    let barrier = Barrier::new(engines.len());
    thread::scope(|s| {
        let handles: Vec<_> = engines
            .iter()
            .map(|engine| {
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    engine.tick(now).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

#[test]
fn simultaneous_ticks_fire_and_escalate_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("careloop.db");
    let seed = seeded_engine(SqliteStore::open(&path).unwrap());
    let r = seed.create_reminder(take_medication(), at(7, 0)).unwrap();
    let engines = engines_over(&path);

    let fires = tick_all_at_once(&engines, at(8, 0));
    assert_eq!(fires.iter().map(|t| t.fired).sum::<usize>(), 1);
    assert_eq!(
        fires.iter().map(|t| t.duplicates_skipped).sum::<usize>(),
        CONCURRENT_ENGINES - 1
    );

    let escalations = tick_all_at_once(&engines, at(8, 45));
    assert_eq!(escalations.iter().map(|t| t.alerts_created).sum::<usize>(), 1);
    assert!(escalations.iter().all(|t| t.errors == 0));

    let alerts = seed.store().list_alerts().unwrap();
    assert_eq!(alerts.len(), 1);
    let occ = seed
        .store()
        .get_occurrence(&OccurrenceKey::new(&r.id, at(8, 0)))
        .unwrap()
        .unwrap();
    assert_eq!(occ.alert_id.as_deref(), Some(alerts[0].id.as_str()));
}

#[test]
fn simultaneous_acknowledgments_all_land() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("careloop.db");
    let seed = seeded_engine(SqliteStore::open(&path).unwrap());
    let ackers: Vec<String> = (3..=8).map(|n| format!("m{n}")).collect();
    for id in &ackers {
        seed.add_member(member(id, true)).unwrap();
    }
    let alert = seed
        .generate_alert(
            ManualAlert {
                alert_type: AlertType::ConcernPattern,
                title: "Check in".into(),
                message: "Quiet for three days".into(),
                severity: Severity::Warning,
                targets: None,
            },
            at(12, 0),
        )
        .unwrap();
    let engines = engines_over(&path);

    // m1 acknowledges from two places at once; everyone else once.
    let mut who: Vec<&str> = ackers.iter().map(String::as_str).collect();
    who.extend(["m1", "m1"]);
    assert_eq!(who.len(), CONCURRENT_ENGINES);

    let barrier = Barrier::new(CONCURRENT_ENGINES);
    thread::scope(|s| {
        for (engine, member_id) in engines.iter().zip(who.iter().copied()) {
            let barrier = &barrier;
            let alert_id = alert.id.as_str();
            s.spawn(move || {
                barrier.wait();
                engine.acknowledge(alert_id, member_id).unwrap();
            });
        }
    });

    let stored = seed.store().get_alert(&alert.id).unwrap().unwrap();
    let expected: BTreeSet<String> = who.iter().map(|id| id.to_string()).collect();
    assert_eq!(expected.len(), CONCURRENT_ENGINES - 1);
    assert_eq!(stored.acknowledged_by(), &expected);
    assert_eq!(stored.acknowledged_by(), stored.targets());
}
