//! SQLite-backed record store.
//!
//! Every pipeline operation gets a `&Store` handle. Multi-row writes go through
//! `BEGIN IMMEDIATE` transactions so each import or detection run is one unit
//! and concurrent writers queue behind SQLite's lock instead of interleaving.

mod links;
mod read;
mod write;

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Transaction, TransactionBehavior, params};

pub use read::RecordCounts;
pub use write::InterfaceUpdate;

const SCHEMA_VERSION: i64 = 1;

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            ",
        )?;

        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        match version {
            0 => {
                self.create_schema_v1()?;
                self.conn
                    .execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
            }
            SCHEMA_VERSION => self.create_schema_v1()?,
            _ => return Err(rusqlite::Error::InvalidQuery),
        }
        Ok(())
    }

    fn create_schema_v1(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS devices (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE CHECK (length(trim(name)) > 0),
                mgmt_address TEXT,
                vendor TEXT,
                model TEXT,
                site TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS interfaces (
                id INTEGER PRIMARY KEY,
                device_id INTEGER NOT NULL REFERENCES devices(id),
                name TEXT NOT NULL CHECK (length(name) > 0),
                description TEXT,
                admin_status TEXT,
                oper_status TEXT,
                UNIQUE(device_id, name)
            );

            CREATE TABLE IF NOT EXISTS aggregation_groups (
                id INTEGER PRIMARY KEY,
                device_id INTEGER NOT NULL REFERENCES devices(id),
                name TEXT NOT NULL,
                mode TEXT,
                oper_status TEXT,
                UNIQUE(device_id, name)
            );

            CREATE TABLE IF NOT EXISTS aggregation_members (
                group_id INTEGER NOT NULL REFERENCES aggregation_groups(id),
                interface_id INTEGER NOT NULL UNIQUE REFERENCES interfaces(id),
                position INTEGER NOT NULL,
                status TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_members_group ON aggregation_members(group_id);

            CREATE TABLE IF NOT EXISTS neighbor_observations (
                id INTEGER PRIMARY KEY,
                device_id INTEGER NOT NULL REFERENCES devices(id),
                local_interface TEXT NOT NULL,
                neighbor_device TEXT NOT NULL,
                neighbor_interface TEXT,
                holdtime INTEGER,
                source_file TEXT NOT NULL,
                collected_at TEXT NOT NULL,
                UNIQUE(device_id, local_interface, neighbor_device)
            );

            CREATE TABLE IF NOT EXISTS neighbor_samples (
                id INTEGER PRIMARY KEY,
                observation_id INTEGER NOT NULL REFERENCES neighbor_observations(id),
                neighbor_interface TEXT,
                holdtime INTEGER,
                source_file TEXT NOT NULL,
                collected_at TEXT NOT NULL,
                UNIQUE(observation_id, collected_at, source_file)
            );

            CREATE INDEX IF NOT EXISTS idx_samples_observation ON neighbor_samples(observation_id);

            CREATE TABLE IF NOT EXISTS stp_ports (
                device_id INTEGER NOT NULL REFERENCES devices(id),
                instance INTEGER NOT NULL,
                interface TEXT NOT NULL,
                role TEXT NOT NULL,
                state TEXT NOT NULL,
                collected_at TEXT NOT NULL,
                UNIQUE(device_id, instance, interface)
            );

            CREATE TABLE IF NOT EXISTS links (
                id INTEGER PRIMARY KEY,
                src_device TEXT NOT NULL REFERENCES devices(name),
                src_interface TEXT NOT NULL,
                dst_device TEXT NOT NULL,
                dst_interface TEXT NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('physical', 'aggregated')),
                confidence TEXT NOT NULL DEFAULT 'trusted'
                    CHECK (confidence IN ('trusted', 'suspect', 'ignore')),
                confidence_source TEXT NOT NULL DEFAULT 'default'
                    CHECK (confidence_source IN ('default', 'detector', 'manual')),
                notes TEXT,
                active INTEGER NOT NULL DEFAULT 1 CHECK (active IN (0, 1)),
                updated_at TEXT NOT NULL,
                UNIQUE(src_device, src_interface, dst_device, dst_interface)
            );

            CREATE INDEX IF NOT EXISTS idx_links_src ON links(src_device);

            CREATE TABLE IF NOT EXISTS anomalies (
                id INTEGER PRIMARY KEY,
                device_id INTEGER NOT NULL REFERENCES devices(id),
                kind TEXT NOT NULL,
                severity TEXT NOT NULL CHECK (severity IN ('error', 'warning', 'info')),
                detail_json TEXT NOT NULL,
                detected_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_anomalies_device ON anomalies(device_id);

            CREATE TABLE IF NOT EXISTS imports (
                id INTEGER PRIMARY KEY,
                device_name TEXT NOT NULL,
                source_file TEXT NOT NULL,
                content_hash TEXT NOT NULL UNIQUE,
                imported_at TEXT NOT NULL,
                import_count INTEGER NOT NULL DEFAULT 1
            );
            ",
        )?;
        Ok(())
    }

    /// Starts a write unit that takes SQLite's reserved lock up front.
    pub(crate) fn begin_immediate(&self) -> rusqlite::Result<Transaction<'_>> {
        Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
    }

    #[cfg(test)]
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn device_id_on(conn: &Connection, name: &str) -> rusqlite::Result<Option<i64>> {
        let mut stmt = conn.prepare_cached("SELECT id FROM devices WHERE name = ?1")?;
        let mut rows = stmt.query(params![name])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }
}

pub(crate) fn encode_time(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn decode_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::{SCHEMA_VERSION, Store, decode_time, encode_time};
    use chrono::{TimeZone, Utc};

    #[test]
    fn fresh_store_is_versioned() {
        let store = Store::open_in_memory().expect("in-memory sqlite");
        let version: i64 = store
            .conn()
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .expect("user_version");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn reopening_a_file_store_keeps_data() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.sqlite");
        {
            let store = Store::open(&path).expect("open");
            store
                .conn()
                .execute(
                    "INSERT INTO devices (name, created_at) VALUES ('Core', '2024-01-01T00:00:00Z')",
                    [],
                )
                .expect("insert");
        }
        let store = Store::open(&path).expect("reopen");
        assert_eq!(
            Store::device_id_on(store.conn(), "Core").expect("lookup"),
            Some(1)
        );
    }

    #[test]
    fn rejects_unknown_future_schema() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.sqlite");
        {
            let conn = rusqlite::Connection::open(&path).expect("raw open");
            conn.execute_batch("PRAGMA user_version = 99;")
                .expect("bump version");
        }
        assert!(Store::open(&path).is_err());
    }

    #[test]
    fn interface_requires_existing_device() {
        let store = Store::open_in_memory().expect("in-memory sqlite");
        let err = store
            .conn()
            .execute(
                "INSERT INTO interfaces (device_id, name) VALUES (42, 'GigabitEthernet1/0/1')",
                [],
            )
            .expect_err("foreign key");
        assert!(super::is_constraint_violation(&err));
    }

    #[test]
    fn time_encoding_sorts_lexically() {
        let early = Utc.with_ymd_and_hms(2023, 12, 28, 9, 5, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2023, 12, 28, 14, 30, 0).unwrap();
        assert!(encode_time(early) < encode_time(late));
        assert_eq!(decode_time(0, &encode_time(late)).expect("decode"), late);
    }
}
