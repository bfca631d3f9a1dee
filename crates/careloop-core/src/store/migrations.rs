//! Schema migrations for the SQLite store.
//!
//! Migrations are versioned and applied when the store is opened. The
//! `schema_version` table holds the single current version row.

use rusqlite::{Connection, Result as SqliteResult};

/// Increment when adding a migration.
pub const CURRENT_VERSION: i32 = 2;

/// Bring the database up to [`CURRENT_VERSION`].
///
/// # Errors
/// Returns an error if any migration statement fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Returns 0 for a fresh database.
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or_else(|e| {
        if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            tracing::warn!(error = %e, "failed to read schema_version");
        }
        0
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: reminders, members, occurrences and alerts.
///
/// Reminders and members are stored as JSON bodies next to the columns the
/// engine filters on. Occurrences are keyed by `(reminder_id, due_at)`, which
/// is what makes firing idempotent.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS reminders (
            id          TEXT PRIMARY KEY,
            owner_id    TEXT NOT NULL,
            active      INTEGER NOT NULL DEFAULT 1,
            body        TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS members (
            id            TEXT PRIMARY KEY,
            display_name  TEXT NOT NULL,
            status        TEXT NOT NULL DEFAULT 'active',
            body          TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS occurrences (
            reminder_id   TEXT NOT NULL,
            due_at        TEXT NOT NULL,
            state         TEXT NOT NULL,
            fired_at      TEXT,
            deadline      TEXT,
            targets       TEXT,
            resolved_at   TEXT,
            escalated_at  TEXT,
            alert_id      TEXT,
            PRIMARY KEY (reminder_id, due_at)
        );

        CREATE TABLE IF NOT EXISTS alerts (
            id                TEXT PRIMARY KEY,
            alert_type        TEXT NOT NULL,
            title             TEXT NOT NULL,
            message           TEXT NOT NULL,
            severity          TEXT NOT NULL,
            occ_reminder_id   TEXT,
            occ_due_at        TEXT,
            targets           TEXT NOT NULL,
            created_at        TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS acknowledgments (
            alert_id         TEXT NOT NULL,
            member_id        TEXT NOT NULL,
            acknowledged_at  TEXT NOT NULL,
            PRIMARY KEY (alert_id, member_id)
        );

        CREATE INDEX IF NOT EXISTS idx_occurrences_state ON occurrences(state);
        CREATE INDEX IF NOT EXISTS idx_alerts_created_at ON alerts(created_at);",
    )?;

    set_schema_version(&tx, 1)?;
    tx.commit()?;
    Ok(())
}

/// Migration v2: per-recipient delivery records.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS deliveries (
            alert_id      TEXT NOT NULL,
            member_id     TEXT NOT NULL,
            channel       TEXT NOT NULL,
            status        TEXT NOT NULL,
            attempts      INTEGER NOT NULL,
            delivered_at  TEXT,
            error         TEXT,
            recorded_at   TEXT NOT NULL,
            PRIMARY KEY (alert_id, member_id, channel)
        );",
    )?;

    set_schema_version(&tx, 2)?;
    tx.commit()?;
    Ok(())
}
