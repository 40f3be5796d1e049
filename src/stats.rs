//! Stats store (§3): a two-table append-mostly SQLite schema tracking
//! lifetime run-minutes per mode, with an append-only audit log.

use std::path::Path;

use rusqlite::{params, Connection};

use crate::error::StatsError;

/// `mode=1` is the only mode this controller currently credits (distill
/// run-minutes); kept as an integer column because `stats_log` is an
/// audit trail, not a typed enum store.
pub const MODE_DISTILL: i64 = 1;

pub struct StatsStore {
    conn: Connection,
}

impl StatsStore {
    /// Open (creating if absent) and ensure schema + first-boot seed row
    /// exist.
    pub fn open(path: &Path, today: &str) -> Result<Self, StatsError> {
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS stats (
                date_since TEXT NOT NULL,
                mode TEXT NOT NULL PRIMARY KEY,
                value REAL NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS stats_log (
                ts INTEGER NOT NULL,
                mode INTEGER NOT NULL,
                value REAL NOT NULL
            )",
            [],
        )?;
        let store = Self { conn };
        store.seed_if_missing("distill", today)?;
        Ok(store)
    }

    fn seed_if_missing(&self, mode: &str, today: &str) -> Result<(), StatsError> {
        let exists: bool = self
            .conn
            .query_row("SELECT EXISTS(SELECT 1 FROM stats WHERE mode = ?1)", params![mode], |row| row.get(0))?;
        if !exists {
            self.conn.execute("INSERT INTO stats (date_since, mode, value) VALUES (?1, ?2, 0.0)", params![today, mode])?;
        }
        Ok(())
    }

    /// Lifetime run-minutes for `mode`, or 0.0 if never seeded.
    pub fn lifetime_minutes(&self, mode: &str) -> Result<f64, StatsError> {
        let value: Option<f64> =
            self.conn.query_row("SELECT value FROM stats WHERE mode = ?1", params![mode], |row| row.get(0)).ok();
        Ok(value.unwrap_or(0.0))
    }

    /// Credit `minutes` to `mode`'s lifetime total and append an audit
    /// row. Called by the control loop whenever DistillBulk's run-minutes
    /// increase.
    pub fn credit(&self, mode: &str, mode_code: i64, minutes: f64, now_unix: i64) -> Result<(), StatsError> {
        self.conn.execute("UPDATE stats SET value = value + ?1 WHERE mode = ?2", params![minutes, mode])?;
        self.conn.execute(
            "INSERT INTO stats_log (ts, mode, value) VALUES (?1, ?2, ?3)",
            params![now_unix, mode_code, minutes],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_boot_seeds_zero_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatsStore::open(&dir.path().join("stats.db"), "2026-01-01").unwrap();
        assert_eq!(store.lifetime_minutes("distill").unwrap(), 0.0);
    }

    #[test]
    fn credit_accumulates_and_logs() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatsStore::open(&dir.path().join("stats.db"), "2026-01-01").unwrap();
        store.credit("distill", MODE_DISTILL, 5.0, 1_700_000_000).unwrap();
        store.credit("distill", MODE_DISTILL, 2.5, 1_700_000_060).unwrap();
        assert_eq!(store.lifetime_minutes("distill").unwrap(), 7.5);

        let log_rows: i64 =
            store.conn.query_row("SELECT COUNT(*) FROM stats_log WHERE mode = ?1", params![MODE_DISTILL], |row| row.get(0)).unwrap();
        assert_eq!(log_rows, 2);
    }

    #[test]
    fn reopening_does_not_reseed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.db");
        let store = StatsStore::open(&path, "2026-01-01").unwrap();
        store.credit("distill", MODE_DISTILL, 10.0, 1_700_000_000).unwrap();
        drop(store);

        let reopened = StatsStore::open(&path, "2026-01-02").unwrap();
        assert_eq!(reopened.lifetime_minutes("distill").unwrap(), 10.0);
    }
}
