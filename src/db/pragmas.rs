//! `SQLite` PRAGMA configuration for optimal performance.

use rusqlite::{Connection, Result as SqliteResult};

/// Applies performance-tuned PRAGMA settings.
///
/// These settings optimize for:
/// - Concurrent reads (WAL mode)
/// - Large working sets (8MB cache, 64MB mmap)
/// - A long-lived multi-session daemon tolerating writer contention
///   (busy_timeout raised from the teacher's 5s to >=15s per §4.1 — a single
///   stdio tool no longer owns the only writer)
///
/// Returns a plain `rusqlite::Result` (rather than our own `DbError`) so it
/// can be used directly as part of an r2d2 connection customizer, which only
/// understands the driver's native error type.
pub fn apply_pragmas(conn: &Connection) -> SqliteResult<()> {
    conn.prepare("PRAGMA journal_mode = WAL")?.query([])?.next()?;
    conn.prepare("PRAGMA synchronous = NORMAL")?.query([])?.next()?;
    conn.prepare("PRAGMA cache_size = -8000")?.query([])?.next()?;
    conn.prepare("PRAGMA mmap_size = 67108864")?.query([])?.next()?;
    conn.prepare("PRAGMA busy_timeout = 15000")?.query([])?.next()?;
    conn.prepare("PRAGMA foreign_keys = ON")?.query([])?.next()?;
    conn.prepare("PRAGMA temp_store = MEMORY")?.query([])?.next()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pragmas_apply() {
        let conn = Connection::open_in_memory().unwrap();
        apply_pragmas(&conn).unwrap();

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        // In-memory databases use "memory" journal mode instead of WAL
        // WAL requires a file on disk.
        assert!(journal_mode.to_lowercase() == "wal" || journal_mode.to_lowercase() == "memory");
    }

    #[test]
    fn test_busy_timeout_raised() {
        let conn = Connection::open_in_memory().unwrap();
        apply_pragmas(&conn).unwrap();
        let timeout: i64 = conn.query_row("PRAGMA busy_timeout", [], |row| row.get(0)).unwrap();
        assert!(timeout >= 15000);
    }
}
