use rusqlite::Connection;

use crate::error::Result;

/// Initialise the storage schema in `conn`.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS kv (
            collection  TEXT NOT NULL,
            key         TEXT NOT NULL,
            value       BLOB NOT NULL,
            updated_at  TEXT NOT NULL,
            PRIMARY KEY (collection, key)
        );
        ",
    )?;
    Ok(())
}

/// Pragmas applied to file-backed databases.
///
/// `synchronous=FULL` makes every committed write durable before the call
/// returns, which the run flags rely on.
pub fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
    Ok(())
}
