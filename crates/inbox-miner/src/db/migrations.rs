//! Schema migrations.
//!
//! Applied versions are recorded in `_migrations`. Any version missing from
//! that table is applied in ascending order, each in its own transaction
//! together with its bookkeeping row.

use std::collections::BTreeSet;

use rusqlite::{params, Connection, Transaction, TransactionBehavior};

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "raw_emails",
        sql: include_str!("sql/001_create_raw_emails.sql"),
    },
    Migration {
        version: 2,
        description: "email_processing_logs",
        sql: include_str!("sql/002_create_email_processing_logs.sql"),
    },
    Migration {
        version: 3,
        description: "oauth_tokens",
        sql: include_str!("sql/003_create_oauth_tokens.sql"),
    },
];

const BOOKKEEPING: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER PRIMARY KEY,
    description TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);";

fn applied_versions(conn: &Connection) -> Result<BTreeSet<u32>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT version FROM _migrations")?;
    let versions = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<BTreeSet<u32>, _>>()?;
    Ok(versions)
}

fn apply(conn: &Connection, migration: &Migration) -> Result<(), DatabaseError> {
    let failed = |e: rusqlite::Error| DatabaseError::Migration {
        version: migration.version,
        description: migration.description,
        reason: e.to_string(),
    };

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    tx.execute_batch(migration.sql).map_err(failed)?;
    tx.execute(
        "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
        params![migration.version, migration.description],
    )
    .map_err(failed)?;
    tx.commit()?;
    Ok(())
}

/// Brings the schema up to date. Returns how many migrations were applied.
pub fn run_all(conn: &Connection) -> Result<usize, DatabaseError> {
    conn.execute_batch(BOOKKEEPING)?;
    let applied = applied_versions(conn)?;

    let mut count = 0;
    for migration in MIGRATIONS.iter().filter(|m| !applied.contains(&m.version)) {
        log::info!(
            "Applying schema migration {} ({})",
            migration.version,
            migration.description
        );
        apply(conn, migration)?;
        count += 1;
    }
    Ok(count)
}

/// Highest applied migration version, 0 for an empty database.
pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(applied_versions(conn)?.last().copied().unwrap_or(0))
}

/// Version a fully migrated database reports.
pub fn latest_version() -> u32 {
    MIGRATIONS.iter().map(|m| m.version).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        let names = stmt
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<Vec<String>, _>>()
            .unwrap();
        names
    }

    #[test]
    fn test_fresh_database_gets_every_table() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(run_all(&conn).unwrap(), MIGRATIONS.len());

        let tables = tables(&conn);
        for expected in ["_migrations", "email_processing_logs", "oauth_tokens", "raw_emails"] {
            assert!(tables.iter().any(|t| t == expected), "missing {}", expected);
        }
        assert_eq!(schema_version(&conn).unwrap(), latest_version());
    }

    #[test]
    fn test_second_run_applies_nothing() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        assert_eq!(run_all(&conn).unwrap(), 0);
    }

    #[test]
    fn test_missing_version_is_filled_in() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        conn.execute_batch("DROP TABLE oauth_tokens; DELETE FROM _migrations WHERE version = 3;")
            .unwrap();

        assert_eq!(run_all(&conn).unwrap(), 1);
        assert!(tables(&conn).iter().any(|t| t == "oauth_tokens"));
    }

    #[test]
    fn test_message_id_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        let insert = "INSERT INTO raw_emails
            (message_id, sender, subject, received_date, created_at, updated_at)
            VALUES ('m1', 's', 'x', '2025-01-01 00:00:00', '2025-01-01 00:00:00', '2025-01-01 00:00:00')";
        conn.execute(insert, []).unwrap();
        let err = conn.execute(insert, []).unwrap_err();
        assert!(crate::db::error::is_constraint_violation(&err));
    }
}
