//! SQLite event store
//!
//! Timestamps are stored as RFC 3339 UTC text with millisecond precision so
//! that `strftime` can bucket them server-side.

use super::EventStore;
use crate::domain::{
    HourlyVisitorAggregate, RoomId, StoreError, ViewingBucket, ViewingRecord, VisitorBucketKey,
    VisitorCountRecord,
};
use anyhow::{bail, Context};
use chrono::SecondsFormat;
use parking_lot::Mutex;
use rusqlite::{params, Connection, Transaction};
use std::path::Path;
use tracing::{debug, error};

const CURRENT_SCHEMA_VERSION: i32 = 2;

const VIEWING_BUCKETS_SQL: &str = "SELECT
        exhibit_id,
        CAST(strftime('%Y', timestamp) AS INTEGER) AS year,
        CAST(strftime('%m', timestamp) AS INTEGER) AS month,
        CAST(strftime('%d', timestamp) AS INTEGER) AS day,
        CAST(strftime('%H', timestamp) AS INTEGER) AS hour,
        COUNT(*) AS count
    FROM viewings
    GROUP BY exhibit_id, year, month, day, hour
    ORDER BY exhibit_id ASC, year ASC, month ASC, day ASC, hour ASC";

const VISITOR_BUCKETS_SQL: &str = "SELECT
        CAST(strftime('%Y', timestamp) AS INTEGER) AS year,
        CAST(strftime('%m', timestamp) AS INTEGER) AS month,
        CAST(strftime('%d', timestamp) AS INTEGER) AS day,
        CAST(strftime('%H', timestamp) AS INTEGER) AS hour,
        room_id,
        SUM(visitor_count) AS total_visitor_count
    FROM visitor_counts
    GROUP BY year, month, day, hour, room_id
    ORDER BY year ASC, month ASC, day ASC, hour ASC, room_id ASC";

/// Single connection guarded by a mutex
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file and apply migrations
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open SQLite database {}", path.display()))?;
        if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
            error!(error = %err, "sqlite_wal_failed");
        }
        Self::from_connection(conn)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory SQLite")?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> anyhow::Result<Self> {
        run_migrations(&mut conn).context("failed to run database migrations")?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

fn run_migrations(conn: &mut Connection) -> anyhow::Result<()> {
    let mut version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;

    if version > CURRENT_SCHEMA_VERSION {
        bail!(
            "database version ({}) is newer than supported schema ({})",
            version,
            CURRENT_SCHEMA_VERSION
        );
    }

    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction().context("failed to open migration transaction")?;
    while version < CURRENT_SCHEMA_VERSION {
        let next_version = version + 1;
        apply_migration(&tx, next_version)
            .with_context(|| format!("migration to version {next_version} failed"))?;
        version = next_version;
    }
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;

    debug!(version = %CURRENT_SCHEMA_VERSION, "sqlite_migrated");
    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> anyhow::Result<()> {
    match version {
        1 => {
            tx.execute_batch(include_str!("schema_v1.sql"))
                .context("failed to execute schema_v1.sql")?;
            Ok(())
        }
        2 => {
            tx.execute_batch(include_str!("schema_v2.sql"))
                .context("failed to execute schema_v2.sql")?;
            Ok(())
        }
        other => bail!("no migration defined for version {other}"),
    }
}

fn to_u32(value: i64, field: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::InvalidValue(format!("{field} = {value}")))
}

fn to_u64(value: i64, field: &str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::InvalidValue(format!("{field} = {value}")))
}

fn to_i32(value: i64, field: &str) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::InvalidValue(format!("{field} = {value}")))
}

impl EventStore for SqliteStore {
    fn append_visitor_count(&self, record: &VisitorCountRecord) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO visitor_counts (room_id, visitor_count, timestamp) VALUES (?1, ?2, ?3)",
            params![
                record.room_id.0,
                record.visitor_count,
                record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            ],
        )?;
        Ok(())
    }

    fn append_departure_count(&self, record: &VisitorCountRecord) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO departure_counts (room_id, visitor_count, timestamp) VALUES (?1, ?2, ?3)",
            params![
                record.room_id.0,
                record.visitor_count,
                record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            ],
        )?;
        Ok(())
    }

    fn append_viewing(&self, record: &ViewingRecord) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO viewings (exhibit_id, timestamp) VALUES (?1, ?2)",
            params![record.exhibit_id, record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)],
        )?;
        Ok(())
    }

    fn aggregate_viewing_by_exhibit_hour(&self) -> Result<Vec<ViewingBucket>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(VIEWING_BUCKETS_SQL)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut buckets = Vec::new();
        for row in rows {
            let (exhibit_id, year, month, day, hour, count) = row?;
            buckets.push(ViewingBucket {
                exhibit_id,
                year: to_i32(year, "year")?,
                month: to_u32(month, "month")?,
                day: to_u32(day, "day")?,
                hour: to_u32(hour, "hour")?,
                count: to_u64(count, "count")?,
            });
        }
        Ok(buckets)
    }

    fn aggregate_visitor_by_time_room(&self) -> Result<Vec<HourlyVisitorAggregate>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(VISITOR_BUCKETS_SQL)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut aggregates = Vec::new();
        for row in rows {
            let (year, month, day, hour, room_id, total) = row?;
            aggregates.push(HourlyVisitorAggregate {
                key: VisitorBucketKey {
                    year: to_i32(year, "year")?,
                    month: to_u32(month, "month")?,
                    day: to_u32(day, "day")?,
                    hour: to_u32(hour, "hour")?,
                    room_id: RoomId(room_id),
                },
                total_visitor_count: to_u64(total, "total_visitor_count")?,
            });
        }
        Ok(aggregates)
    }
}
