//! Schema versioning for the logbook database.
//!
//! The schema version lives in the `metadata` table. Opening a database
//! written by an older build applies every later step from [`MIGRATIONS`] in
//! order, each inside its own transaction.

use rusqlite::{Connection, OptionalExtension};

use crate::error::{Error, Result};

use super::schema::SCHEMA_STATEMENTS;

/// The schema version this build writes.
pub const CURRENT_VERSION: i32 = 1;

const VERSION_KEY: &str = "schema_version";

type Step = fn(&Connection) -> Result<()>;

/// Migration steps, indexed by the version they produce.
const MIGRATIONS: &[(i32, Step)] = &[(1, base_layout)];

/// Create the base tables and bring the schema up to [`CURRENT_VERSION`].
///
/// # Errors
///
/// Returns an error if the stored version is unreadable, newer than this
/// build understands, or a step fails.
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    for statement in SCHEMA_STATEMENTS {
        conn.execute(statement, [])?;
    }

    let stored = read_version(conn)?;
    if stored > CURRENT_VERSION {
        return Err(Error::DatabaseMigration {
            message: format!(
                "database schema version {stored} is newer than supported version {CURRENT_VERSION}"
            ),
        });
    }

    for (version, step) in MIGRATIONS.iter().filter(|(v, _)| *v > stored) {
        let tx = conn.unchecked_transaction()?;
        step(&tx)?;
        write_version(&tx, *version)?;
        tx.commit()?;
    }

    Ok(())
}

/// The stored schema version, or 0 for a fresh database.
fn read_version(conn: &Connection) -> Result<i32> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    raw.map_or(Ok(0), |value| {
        value.parse().map_err(|_| Error::DatabaseMigration {
            message: format!("invalid schema version: {value}"),
        })
    })
}

fn write_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        (VERSION_KEY, version.to_string()),
    )?;
    Ok(())
}

/// Version 1: the `kv_store` table created by [`SCHEMA_STATEMENTS`].
#[allow(clippy::unnecessary_wraps)]
fn base_layout(_conn: &Connection) -> Result<()> {
    Ok(())
}
