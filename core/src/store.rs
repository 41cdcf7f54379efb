//! SQLite persistence layer.
//!
//! RULE: Only store.rs talks to the database.
//! Subsystems call through the `PersistenceLayer` trait. They never
//! execute SQL directly, and they never assume a write succeeded without
//! checking the result.

use crate::{
    error::SimResult,
    event::EventLogEntry,
    types::{ActorId, SessionId, Tick},
};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

/// Persisted wanted status. Expiry is stored as remaining seconds because
/// the tick clock restarts with every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredWanted {
    pub level:          u32,
    pub reason:         String,
    pub remaining_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChaseRecord {
    pub session_id:   SessionId,
    pub enforcer:     ActorId,
    pub target:       ActorId,
    pub started_tick: Tick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Counter {
    /// Custodies completed as the enforcer.
    Arrests,
    /// Times taken into custody.
    TimesJailed,
    /// Detected violations (contraband, assault).
    Violations,
}

impl Counter {
    pub fn column_key(&self) -> &'static str {
        match self {
            Self::Arrests     => "arrests",
            Self::TimesJailed => "times_jailed",
            Self::Violations  => "violations",
        }
    }
}

/// Per-actor durable state consumed by the engine.
pub trait PersistenceLayer {
    fn load_wanted(&self, actor: &str) -> SimResult<Option<StoredWanted>>;
    fn save_wanted(&mut self, actor: &str, status: &StoredWanted) -> SimResult<()>;
    fn delete_wanted(&mut self, actor: &str) -> SimResult<()>;

    fn record_chase(&mut self, record: &ChaseRecord) -> SimResult<()>;
    fn close_chase(&mut self, session_id: &str, ended_tick: Tick, reason: &str) -> SimResult<()>;

    /// Increment and return the new value.
    fn increment_counter(&mut self, actor: &str, counter: Counter) -> SimResult<u64>;
    fn counter(&self, actor: &str, counter: Counter) -> SimResult<u64>;

    fn append_event(&mut self, entry: &EventLogEntry) -> SimResult<()>;
    fn events_for_tick(&self, run_id: &str, tick: Tick) -> SimResult<Vec<EventLogEntry>>;

    fn save_snapshot(&mut self, run_id: &str, tick: Tick, state_json: &str) -> SimResult<()>;
}

pub struct SimStore {
    conn: Connection,
}

impl SimStore {
    /// Open (or create) the incident database at `path`.
    pub fn open(path: &str) -> SimResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> SimResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> SimResult<()> {
        self.conn.execute_batch(include_str!("../../migrations/001_incident.sql"))?;
        Ok(())
    }

    // ── Run ────────────────────────────────────────────────────

    pub fn insert_run(&self, run_id: &str, seed: u64, version: &str) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO run (run_id, seed, version, started_at) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, seed as i64, version, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // ── Queries used by tooling ────────────────────────────────

    pub fn event_count(&self, run_id: &str) -> SimResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM event_log WHERE run_id = ?1",
            params![run_id],
            |r| r.get(0),
        )?)
    }

    pub fn open_chase_count(&self) -> SimResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM chase_record WHERE ended_tick IS NULL",
            [],
            |r| r.get(0),
        )?)
    }

    pub fn chase_end_reason(&self, session_id: &str) -> SimResult<Option<String>> {
        let reason = self
            .conn
            .query_row(
                "SELECT end_reason FROM chase_record WHERE session_id = ?1",
                params![session_id],
                |r| r.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(reason.flatten())
    }

    pub fn latest_snapshot_before(
        &self, run_id: &str, tick: Tick
    ) -> SimResult<Option<(Tick, String)>> {
        let result = self
            .conn
            .query_row(
                "SELECT tick, state_json FROM snapshot
                 WHERE run_id = ?1 AND tick <= ?2
                 ORDER BY tick DESC LIMIT 1",
                params![run_id, tick as i64],
                |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, String>(1)?)),
            )
            .optional()?;
        Ok(result)
    }
}

impl PersistenceLayer for SimStore {
    // ── Wanted status ──────────────────────────────────────────

    fn load_wanted(&self, actor: &str) -> SimResult<Option<StoredWanted>> {
        let row = self
            .conn
            .query_row(
                "SELECT level, reason, remaining_secs FROM wanted_status WHERE actor_id = ?1",
                params![actor],
                |r| {
                    Ok(StoredWanted {
                        level:          r.get::<_, i64>(0)? as u32,
                        reason:         r.get(1)?,
                        remaining_secs: r.get::<_, i64>(2)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn save_wanted(&mut self, actor: &str, status: &StoredWanted) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO wanted_status (actor_id, level, reason, remaining_secs, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(actor_id) DO UPDATE SET
                level = excluded.level,
                reason = excluded.reason,
                remaining_secs = excluded.remaining_secs,
                updated_at = excluded.updated_at",
            params![
                actor,
                status.level as i64,
                status.reason,
                status.remaining_secs as i64,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn delete_wanted(&mut self, actor: &str) -> SimResult<()> {
        self.conn.execute(
            "DELETE FROM wanted_status WHERE actor_id = ?1",
            params![actor],
        )?;
        Ok(())
    }

    // ── Chase records ──────────────────────────────────────────

    fn record_chase(&mut self, record: &ChaseRecord) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO chase_record (session_id, enforcer_id, target_id, started_tick, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.session_id,
                record.enforcer,
                record.target,
                record.started_tick as i64,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn close_chase(&mut self, session_id: &str, ended_tick: Tick, reason: &str) -> SimResult<()> {
        self.conn.execute(
            "UPDATE chase_record SET ended_tick = ?1, end_reason = ?2
             WHERE session_id = ?3 AND ended_tick IS NULL",
            params![ended_tick as i64, reason, session_id],
        )?;
        Ok(())
    }

    // ── Counters ───────────────────────────────────────────────

    fn increment_counter(&mut self, actor: &str, counter: Counter) -> SimResult<u64> {
        self.conn.execute(
            "INSERT INTO actor_counter (actor_id, counter, value) VALUES (?1, ?2, 1)
             ON CONFLICT(actor_id, counter) DO UPDATE SET value = value + 1",
            params![actor, counter.column_key()],
        )?;
        self.counter(actor, counter)
    }

    fn counter(&self, actor: &str, counter: Counter) -> SimResult<u64> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM actor_counter WHERE actor_id = ?1 AND counter = ?2",
                params![actor, counter.column_key()],
                |r| r.get::<_, i64>(0),
            )
            .optional()?;
        Ok(value.unwrap_or(0) as u64)
    }

    // ── Event log ──────────────────────────────────────────────

    fn append_event(&mut self, entry: &EventLogEntry) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (run_id, tick, subsystem, event_type, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.run_id,
                entry.tick as i64,
                entry.subsystem,
                entry.event_type,
                entry.payload,
            ],
        )?;
        Ok(())
    }

    fn events_for_tick(&self, run_id: &str, tick: Tick) -> SimResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, tick, subsystem, event_type, payload
             FROM event_log WHERE run_id = ?1 AND tick = ?2
             ORDER BY id ASC"
        )?;
        let entries = stmt.query_map(params![run_id, tick as i64], |row| {
            Ok(EventLogEntry {
                id:         Some(row.get(0)?),
                run_id:     row.get(1)?,
                tick:       row.get::<_, i64>(2)? as u64,
                subsystem:  row.get(3)?,
                event_type: row.get(4)?,
                payload:    row.get(5)?,
            })
        })?.collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // ── Snapshot ───────────────────────────────────────────────

    fn save_snapshot(&mut self, run_id: &str, tick: Tick, state_json: &str) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO snapshot (run_id, tick, state_json) VALUES (?1, ?2, ?3)",
            params![run_id, tick as i64, state_json],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SimStore {
        let store = SimStore::in_memory().expect("in-memory store");
        store.migrate().expect("migration");
        store
    }

    #[test]
    fn wanted_status_upserts_and_deletes() {
        let mut store = store();
        let status = StoredWanted { level: 2, reason: "assault".into(), remaining_secs: 120 };
        store.save_wanted("inmate-1", &status).unwrap();
        store.save_wanted("inmate-1", &StoredWanted { level: 3, ..status.clone() }).unwrap();

        let loaded = store.load_wanted("inmate-1").unwrap().expect("row present");
        assert_eq!(loaded.level, 3);
        assert_eq!(loaded.remaining_secs, 120);

        store.delete_wanted("inmate-1").unwrap();
        assert!(store.load_wanted("inmate-1").unwrap().is_none());
    }

    #[test]
    fn counters_start_at_zero_and_increment() {
        let mut store = store();
        assert_eq!(store.counter("guard-1", Counter::Arrests).unwrap(), 0);
        assert_eq!(store.increment_counter("guard-1", Counter::Arrests).unwrap(), 1);
        assert_eq!(store.increment_counter("guard-1", Counter::Arrests).unwrap(), 2);
        assert_eq!(store.counter("guard-1", Counter::Violations).unwrap(), 0);
    }

    #[test]
    fn chase_record_closes_once() {
        let mut store = store();
        let record = ChaseRecord {
            session_id: "s-1".into(),
            enforcer: "guard-1".into(),
            target: "inmate-1".into(),
            started_tick: 4,
        };
        store.record_chase(&record).unwrap();
        assert_eq!(store.open_chase_count().unwrap(), 1);

        store.close_chase("s-1", 90, "too far").unwrap();
        store.close_chase("s-1", 95, "captured").unwrap();
        assert_eq!(store.open_chase_count().unwrap(), 0);
        assert_eq!(store.chase_end_reason("s-1").unwrap().as_deref(), Some("too far"));
    }
}
