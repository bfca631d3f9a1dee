//! SQLite-backed occurrence store.
//!
//! Conditional transitions are `UPDATE ... WHERE state = 'fired'` with a
//! row-count check. Escalation writes the occurrence and its alert in one
//! immediate transaction.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{
    escalate_precondition, migrations, EscalatePrecondition, InsertOutcome, OccurrenceStore,
    StoreResult,
};
use crate::alert::{Alert, AlertType, DeliveryRecord, DeliveryStatus, Severity};
use crate::error::StoreError;
use crate::member::{NotificationChannel, SupportCircleMember};
use crate::occurrence::{
    EscalationSnapshot, Occurrence, OccurrenceKey, OccurrenceState, TransitionOutcome,
};
use crate::reminder::Reminder;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite store. The connection sits behind a mutex so the store can be
/// shared across the dispatcher's tasks.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run pending migrations.
    ///
    /// # Errors
    /// Returns [`StoreError::OpenFailed`] if the file cannot be opened, or
    /// [`StoreError::MigrationFailed`] if the schema cannot be brought up to date.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path).map_err(|source| StoreError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_connection(conn)
    }

    /// Open `careloop.db` under the data directory.
    pub fn open_default() -> crate::Result<Self> {
        let path = crate::config::data_dir()?.join("careloop.db");
        Ok(Self::open(&path)?)
    }

    /// In-memory database, for tests and dry runs.
    pub fn open_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        migrations::migrate(&conn).map_err(|e| StoreError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ── Encoding helpers ─────────────────────────────────────────────────────

/// Fixed-width UTC timestamps so key equality and ordering are textual.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(table: &'static str, s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            table,
            message: format!("bad timestamp '{s}': {e}"),
        })
}

fn parse_opt_ts(table: &'static str, s: Option<String>) -> StoreResult<Option<DateTime<Utc>>> {
    s.as_deref().map(|s| parse_ts(table, s)).transpose()
}

fn from_json<T: serde::de::DeserializeOwned>(table: &'static str, s: &str) -> StoreResult<T> {
    serde_json::from_str(s).map_err(|e| StoreError::Corrupt {
        table,
        message: e.to_string(),
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(|e| StoreError::QueryFailed(e.to_string()))
}

fn delivery_status_str(status: DeliveryStatus) -> &'static str {
    match status {
        DeliveryStatus::Delivered => "delivered",
        DeliveryStatus::Failed => "failed",
    }
}

fn parse_delivery_status(s: &str) -> StoreResult<DeliveryStatus> {
    match s {
        "delivered" => Ok(DeliveryStatus::Delivered),
        "failed" => Ok(DeliveryStatus::Failed),
        other => Err(StoreError::Corrupt {
            table: "deliveries",
            message: format!("unknown status '{other}'"),
        }),
    }
}

// ── Row shapes ───────────────────────────────────────────────────────────

struct OccurrenceRow {
    reminder_id: String,
    due_at: String,
    state: String,
    fired_at: Option<String>,
    deadline: Option<String>,
    targets: Option<String>,
    resolved_at: Option<String>,
    escalated_at: Option<String>,
    alert_id: Option<String>,
}

const OCCURRENCE_COLUMNS: &str = "reminder_id, due_at, state, fired_at, deadline, targets, \
                                  resolved_at, escalated_at, alert_id";

impl OccurrenceRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            reminder_id: row.get(0)?,
            due_at: row.get(1)?,
            state: row.get(2)?,
            fired_at: row.get(3)?,
            deadline: row.get(4)?,
            targets: row.get(5)?,
            resolved_at: row.get(6)?,
            escalated_at: row.get(7)?,
            alert_id: row.get(8)?,
        })
    }

    fn into_occurrence(self) -> StoreResult<Occurrence> {
        const T: &str = "occurrences";
        let state = OccurrenceState::parse(&self.state).ok_or_else(|| StoreError::Corrupt {
            table: T,
            message: format!("unknown state '{}'", self.state),
        })?;
        let escalation = match self.deadline {
            Some(deadline) => Some(EscalationSnapshot {
                deadline: parse_ts(T, &deadline)?,
                targets: match self.targets {
                    Some(t) => from_json(T, &t)?,
                    None => Vec::new(),
                },
            }),
            None => None,
        };
        Ok(Occurrence {
            key: OccurrenceKey::new(self.reminder_id, parse_ts(T, &self.due_at)?),
            state,
            fired_at: parse_opt_ts(T, self.fired_at)?,
            escalation,
            resolved_at: parse_opt_ts(T, self.resolved_at)?,
            escalated_at: parse_opt_ts(T, self.escalated_at)?,
            alert_id: self.alert_id,
        })
    }
}

fn select_occurrence(conn: &Connection, key: &OccurrenceKey) -> StoreResult<Option<Occurrence>> {
    let sql = format!(
        "SELECT {OCCURRENCE_COLUMNS} FROM occurrences WHERE reminder_id = ?1 AND due_at = ?2"
    );
    conn.query_row(&sql, params![key.reminder_id, ts(key.due_at)], OccurrenceRow::from_row)
        .optional()?
        .map(OccurrenceRow::into_occurrence)
        .transpose()
}

fn select_occurrences(
    conn: &Connection,
    filter: &str,
    param: &str,
) -> StoreResult<Vec<Occurrence>> {
    let sql = format!("SELECT {OCCURRENCE_COLUMNS} FROM occurrences WHERE {filter} ORDER BY due_at");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![param], OccurrenceRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(OccurrenceRow::into_occurrence).collect()
}

fn observed_or_missing(conn: &Connection, key: &OccurrenceKey) -> StoreResult<TransitionOutcome> {
    match select_occurrence(conn, key)? {
        Some(current) => Ok(TransitionOutcome::Observed(current)),
        None => Err(StoreError::QueryFailed(format!(
            "occurrence {key} does not exist"
        ))),
    }
}

fn insert_alert_rows(conn: &Connection, alert: &Alert) -> StoreResult<()> {
    let targets: Vec<&String> = alert.targets().iter().collect();
    conn.execute(
        "INSERT INTO alerts (id, alert_type, title, message, severity, occ_reminder_id,
                             occ_due_at, targets, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            alert.id,
            alert.alert_type.as_str(),
            alert.title,
            alert.message,
            alert.severity.as_str(),
            alert.occurrence.as_ref().map(|k| k.reminder_id.clone()),
            alert.occurrence.as_ref().map(|k| ts(k.due_at)),
            to_json(&targets)?,
            ts(alert.created_at),
        ],
    )?;
    for member_id in alert.acknowledged_by() {
        conn.execute(
            "INSERT OR IGNORE INTO acknowledgments (alert_id, member_id, acknowledged_at)
             VALUES (?1, ?2, ?3)",
            params![alert.id, member_id, ts(alert.created_at)],
        )?;
    }
    for record in &alert.deliveries {
        upsert_delivery_row(conn, &alert.id, record)?;
    }
    Ok(())
}

fn upsert_delivery_row(conn: &Connection, alert_id: &str, record: &DeliveryRecord) -> StoreResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO deliveries
            (alert_id, member_id, channel, status, attempts, delivered_at, error, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            alert_id,
            record.member_id,
            record.channel.as_str(),
            delivery_status_str(record.status),
            record.attempts,
            record.delivered_at.map(ts),
            record.error,
            ts(record.recorded_at),
        ],
    )?;
    Ok(())
}

struct AlertRow {
    id: String,
    alert_type: String,
    title: String,
    message: String,
    severity: String,
    occ_reminder_id: Option<String>,
    occ_due_at: Option<String>,
    targets: String,
    created_at: String,
}

const ALERT_COLUMNS: &str =
    "id, alert_type, title, message, severity, occ_reminder_id, occ_due_at, targets, created_at";

impl AlertRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            alert_type: row.get(1)?,
            title: row.get(2)?,
            message: row.get(3)?,
            severity: row.get(4)?,
            occ_reminder_id: row.get(5)?,
            occ_due_at: row.get(6)?,
            targets: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn into_alert(self, conn: &Connection) -> StoreResult<Alert> {
        const T: &str = "alerts";
        let alert_type = AlertType::parse(&self.alert_type).ok_or_else(|| StoreError::Corrupt {
            table: T,
            message: format!("unknown alert type '{}'", self.alert_type),
        })?;
        let severity = Severity::parse(&self.severity).ok_or_else(|| StoreError::Corrupt {
            table: T,
            message: format!("unknown severity '{}'", self.severity),
        })?;
        let occurrence = match (self.occ_reminder_id, self.occ_due_at) {
            (Some(reminder_id), Some(due)) => {
                Some(OccurrenceKey::new(reminder_id, parse_ts(T, &due)?))
            }
            _ => None,
        };
        let targets: BTreeSet<String> = from_json(T, &self.targets)?;

        let mut stmt =
            conn.prepare("SELECT member_id FROM acknowledgments WHERE alert_id = ?1")?;
        let acknowledged_by = stmt
            .query_map(params![self.id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<BTreeSet<_>>>()?;

        let deliveries = select_deliveries(conn, &self.id)?;

        Ok(Alert::from_parts(
            self.id,
            alert_type,
            self.title,
            self.message,
            severity,
            occurrence,
            targets,
            acknowledged_by,
            parse_ts(T, &self.created_at)?,
            deliveries,
        ))
    }
}

fn select_deliveries(conn: &Connection, alert_id: &str) -> StoreResult<Vec<DeliveryRecord>> {
    const T: &str = "deliveries";
    let mut stmt = conn.prepare(
        "SELECT member_id, channel, status, attempts, delivered_at, error, recorded_at
         FROM deliveries WHERE alert_id = ?1 ORDER BY member_id, channel",
    )?;
    let rows = stmt
        .query_map(params![alert_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(
            |(member_id, channel, status, attempts, delivered_at, error, recorded_at)|
             -> StoreResult<DeliveryRecord> {
                Ok(DeliveryRecord {
                    member_id,
                    channel: NotificationChannel::parse(&channel).ok_or_else(|| {
                        StoreError::Corrupt {
                            table: T,
                            message: format!("unknown channel '{channel}'"),
                        }
                    })?,
                    status: parse_delivery_status(&status)?,
                    attempts,
                    delivered_at: parse_opt_ts(T, delivered_at)?,
                    error,
                    recorded_at: parse_ts(T, &recorded_at)?,
                })
            },
        )
        .collect()
}

fn select_alert(conn: &Connection, id: &str) -> StoreResult<Option<Alert>> {
    let sql = format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?1");
    conn.query_row(&sql, params![id], AlertRow::from_row)
        .optional()?
        .map(|row| row.into_alert(conn))
        .transpose()
}

// ── Trait impl ───────────────────────────────────────────────────────────

impl OccurrenceStore for SqliteStore {
    fn insert_reminder(&self, reminder: &Reminder) -> StoreResult<()> {
        self.lock().execute(
            "INSERT INTO reminders (id, owner_id, active, body, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                reminder.id,
                reminder.owner_id,
                reminder.active,
                to_json(reminder)?,
                ts(reminder.created_at),
                ts(reminder.updated_at),
            ],
        )?;
        Ok(())
    }

    fn update_reminder(&self, reminder: &Reminder) -> StoreResult<bool> {
        let changed = self.lock().execute(
            "UPDATE reminders SET owner_id = ?2, active = ?3, body = ?4, updated_at = ?5
             WHERE id = ?1",
            params![
                reminder.id,
                reminder.owner_id,
                reminder.active,
                to_json(reminder)?,
                ts(reminder.updated_at),
            ],
        )?;
        Ok(changed == 1)
    }

    fn get_reminder(&self, id: &str) -> StoreResult<Option<Reminder>> {
        let body: Option<String> = self
            .lock()
            .query_row(
                "SELECT body FROM reminders WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|b| from_json("reminders", &b)).transpose()
    }

    fn list_reminders(&self) -> StoreResult<Vec<Reminder>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT body FROM reminders ORDER BY created_at, id")?;
        let bodies = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        bodies.iter().map(|b| from_json("reminders", b)).collect()
    }

    fn list_active_reminders(&self) -> StoreResult<Vec<Reminder>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT body FROM reminders WHERE active = 1 ORDER BY created_at, id")?;
        let bodies = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        bodies.iter().map(|b| from_json("reminders", b)).collect()
    }

    fn upsert_member(&self, member: &SupportCircleMember) -> StoreResult<()> {
        let status = if member.is_active() { "active" } else { "inactive" };
        self.lock().execute(
            "INSERT OR REPLACE INTO members (id, display_name, status, body)
             VALUES (?1, ?2, ?3, ?4)",
            params![member.id, member.display_name, status, to_json(member)?],
        )?;
        Ok(())
    }

    fn get_member(&self, id: &str) -> StoreResult<Option<SupportCircleMember>> {
        let body: Option<String> = self
            .lock()
            .query_row(
                "SELECT body FROM members WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|b| from_json("members", &b)).transpose()
    }

    fn list_members(&self) -> StoreResult<Vec<SupportCircleMember>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT body FROM members ORDER BY id")?;
        let bodies = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        bodies.iter().map(|b| from_json("members", b)).collect()
    }

    fn insert_occurrence(&self, occurrence: &Occurrence) -> StoreResult<InsertOutcome> {
        let conn = self.lock();
        let (deadline, targets) = match &occurrence.escalation {
            Some(snap) => (Some(ts(snap.deadline)), Some(to_json(&snap.targets)?)),
            None => (None, None),
        };
        let inserted = conn.execute(
            &format!(
                "INSERT OR IGNORE INTO occurrences ({OCCURRENCE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                occurrence.key.reminder_id,
                ts(occurrence.key.due_at),
                occurrence.state.as_str(),
                occurrence.fired_at.map(ts),
                deadline,
                targets,
                occurrence.resolved_at.map(ts),
                occurrence.escalated_at.map(ts),
                occurrence.alert_id,
            ],
        )?;
        if inserted == 1 {
            return Ok(InsertOutcome::Inserted);
        }
        match select_occurrence(&conn, &occurrence.key)? {
            Some(existing) => Ok(InsertOutcome::Existing(existing)),
            None => Err(StoreError::QueryFailed(format!(
                "occurrence {} neither inserted nor present",
                occurrence.key
            ))),
        }
    }

    fn get_occurrence(&self, key: &OccurrenceKey) -> StoreResult<Option<Occurrence>> {
        select_occurrence(&self.lock(), key)
    }

    fn list_occurrences(&self, reminder_id: &str) -> StoreResult<Vec<Occurrence>> {
        select_occurrences(&self.lock(), "reminder_id = ?1", reminder_id)
    }

    fn list_overdue(&self, now: DateTime<Utc>) -> StoreResult<Vec<Occurrence>> {
        let fired = select_occurrences(&self.lock(), "state = ?1", OccurrenceState::Fired.as_str())?;
        Ok(fired.into_iter().filter(|o| o.is_overdue(now)).collect())
    }

    fn resolve_occurrence(
        &self,
        key: &OccurrenceKey,
        now: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE occurrences SET state = 'resolved', resolved_at = ?3
             WHERE reminder_id = ?1 AND due_at = ?2 AND state = 'fired'",
            params![key.reminder_id, ts(key.due_at), ts(now)],
        )?;
        if changed == 1 {
            Ok(TransitionOutcome::Applied)
        } else {
            observed_or_missing(&conn, key)
        }
    }

    fn escalate_occurrence(
        &self,
        key: &OccurrenceKey,
        now: DateTime<Utc>,
        alert: Option<&Alert>,
    ) -> StoreResult<TransitionOutcome> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(current) = select_occurrence(&tx, key)? else {
            return Err(StoreError::QueryFailed(format!(
                "occurrence {key} does not exist"
            )));
        };
        match escalate_precondition(&current, alert) {
            EscalatePrecondition::Refuse => return Ok(TransitionOutcome::Observed(current)),
            EscalatePrecondition::Replay => return Ok(TransitionOutcome::Applied),
            EscalatePrecondition::Apply => {}
        }

        let changed = tx.execute(
            "UPDATE occurrences SET state = 'escalated', escalated_at = ?3, alert_id = ?4
             WHERE reminder_id = ?1 AND due_at = ?2 AND state = 'fired'",
            params![
                key.reminder_id,
                ts(key.due_at),
                ts(now),
                alert.map(|a| a.id.as_str()),
            ],
        )?;
        if changed != 1 {
            return observed_or_missing(&tx, key);
        }
        if let Some(alert) = alert {
            insert_alert_rows(&tx, alert)?;
        }
        tx.commit()?;
        Ok(TransitionOutcome::Applied)
    }

    fn insert_alert(&self, alert: &Alert) -> StoreResult<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        insert_alert_rows(&tx, alert)?;
        tx.commit()?;
        Ok(())
    }

    fn get_alert(&self, id: &str) -> StoreResult<Option<Alert>> {
        select_alert(&self.lock(), id)
    }

    fn list_alerts(&self) -> StoreResult<Vec<Alert>> {
        let conn = self.lock();
        let sql = format!("SELECT {ALERT_COLUMNS} FROM alerts ORDER BY created_at, id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], AlertRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(|row| row.into_alert(&conn)).collect()
    }

    fn add_acknowledgment(&self, alert_id: &str, member_id: &str) -> StoreResult<Option<Alert>> {
        let conn = self.lock();
        let exists: Option<String> = conn
            .query_row(
                "SELECT id FROM alerts WHERE id = ?1",
                params![alert_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Ok(None);
        }
        conn.execute(
            "INSERT OR IGNORE INTO acknowledgments (alert_id, member_id, acknowledged_at)
             VALUES (?1, ?2, ?3)",
            params![alert_id, member_id, ts(Utc::now())],
        )?;
        select_alert(&conn, alert_id)
    }

    fn record_delivery(&self, alert_id: &str, record: &DeliveryRecord) -> StoreResult<()> {
        upsert_delivery_row(&self.lock(), alert_id, record)
    }
}
