//! Schema migrations.
//!
//! Each migration is an embedded SQL file applied at most once; the
//! `_migrations` table records what has run. ADD COLUMN migrations carry a
//! guard so a database that already grew the column (half-finished upgrade,
//! restored backup) records the version without failing the ALTER.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
    /// `(table, column)` for ADD COLUMN migrations; the SQL is skipped when
    /// the column is already present.
    adds_column: Option<(&'static str, &'static str)>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_tickets_table",
        sql: include_str!("sql/001_create_tickets.sql"),
        adds_column: None,
    },
    Migration {
        version: 2,
        name: "create_ticket_replies_table",
        sql: include_str!("sql/002_create_ticket_replies.sql"),
        adds_column: None,
    },
    Migration {
        version: 3,
        name: "create_attachments_table",
        sql: include_str!("sql/003_create_attachments.sql"),
        adds_column: None,
    },
    Migration {
        version: 4,
        name: "create_sync_runs_table",
        sql: include_str!("sql/004_create_sync_runs.sql"),
        adds_column: None,
    },
    Migration {
        version: 5,
        name: "add_inline_flag_to_attachments",
        sql: include_str!("sql/005_add_inline_flag.sql"),
        adds_column: Some(("attachments", "is_inline")),
    },
];

/// Brings the connected database up to the latest schema version.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let applied = latest_applied(conn)?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        apply(conn, migration)?;
    }

    Ok(())
}

fn latest_applied(conn: &Connection) -> Result<u32, DatabaseError> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;
    Ok(version)
}

fn apply(conn: &Connection, migration: &Migration) -> Result<(), DatabaseError> {
    let already_there = match migration.adds_column {
        Some((table, column)) => column_exists(conn, table, column)?,
        None => false,
    };

    if already_there {
        log::info!(
            "migration v{} ({}): column already present, recording only",
            migration.version,
            migration.name
        );
    } else {
        log::info!("applying migration v{}: {}", migration.version, migration.name);
        conn.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;
    }

    conn.execute(
        "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![migration.version, migration.name],
    )?;
    Ok(())
}

/// PRAGMA table_info cannot bind identifiers, so the table name is rejected
/// unless it is a bare `[A-Za-z0-9_]` name.
fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
    if !table.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        return Err(DatabaseError::Migration {
            version: 0,
            reason: format!("bad table identifier: {table}"),
        });
    }
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    Ok(names.any(|n| matches!(n, Ok(ref name) if name == column)))
}
