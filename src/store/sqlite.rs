//! SQLite-backed implementation of the document `Store` (spec §4.1).
//!
//! One table, `documents(collection, id, version, data)`, holds every
//! collection as JSON blobs. Filtering and ordering are done in memory
//! after a per-collection scan rather than leaning on SQLite's JSON1
//! functions, so the schema stays a single flat table regardless of which
//! SQLite build this links against — the same tradeoff the teacher made in
//! `vault/user_accounts.rs`, trading a little CPU for one less runtime
//! dependency to get wrong.

use super::clock::LogicalClock;
use super::query::{apply_order, matches, EqFilter, OrderBy};
use super::TxContext;
use crate::domain::{Document, Timestamp};
use crate::error::ResolutionError;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

pub struct SqliteStore {
    conn: Mutex<Connection>,
    clock: LogicalClock,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    version INTEGER NOT NULL,
    data TEXT NOT NULL,
    PRIMARY KEY (collection, id)
);
CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
";

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, ResolutionError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, ResolutionError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, ResolutionError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock: LogicalClock::new(),
        })
    }

    /// Issues the next strictly-monotonic timestamp (spec §3).
    pub fn now(&self) -> Timestamp {
        self.clock.tick()
    }

    pub fn get<T: Document>(&self, id: &str) -> Result<Option<T>, ResolutionError> {
        let conn = self.conn.lock();
        get_within(&conn, id)
    }

    pub fn get_with_version<T: Document>(
        &self,
        id: &str,
    ) -> Result<Option<(T, u64)>, ResolutionError> {
        let conn = self.conn.lock();
        get_with_version_within(&conn, id)
    }

    pub fn put<T: Document>(
        &self,
        doc: &T,
        expected_version: Option<u64>,
    ) -> Result<u64, ResolutionError> {
        let conn = self.conn.lock();
        put_within(&conn, doc, expected_version)
    }

    pub fn query<T: Document>(
        &self,
        filters: &[EqFilter],
        order: Option<OrderBy>,
        limit: Option<usize>,
    ) -> Result<Vec<T>, ResolutionError> {
        let conn = self.conn.lock();
        query_within(&conn, filters, order, limit)
    }

    /// Runs `f` inside a serializable SQLite transaction, retrying on
    /// optimistic-concurrency conflicts up to `retry_limit` times (spec
    /// §4.1 "bounded retry"). Any other error aborts immediately.
    pub fn tx<F, T>(&self, retry_limit: u32, mut f: F) -> Result<T, ResolutionError>
    where
        F: FnMut(&TxContext) -> Result<T, ResolutionError>,
    {
        let mut conn = self.conn.lock();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let now = self.clock.tick();
            let txn = conn.transaction()?;
            let ctx = TxContext::new(&txn, now);
            match f(&ctx) {
                Ok(value) => {
                    txn.commit()?;
                    return Ok(value);
                }
                Err(e) if e.is_conflict() && attempt < retry_limit.max(1) => {
                    continue;
                }
                Err(e) if e.is_conflict() => {
                    return Err(ResolutionError::concurrency_exhausted(format!(
                        "gave up after {attempt} attempts: {e}"
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

pub(crate) fn get_within<T: Document>(
    conn: &Connection,
    id: &str,
) -> Result<Option<T>, ResolutionError> {
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
            params![T::collection(), id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(match data {
        Some(d) => Some(serde_json::from_str(&d)?),
        None => None,
    })
}

pub(crate) fn get_with_version_within<T: Document>(
    conn: &Connection,
    id: &str,
) -> Result<Option<(T, u64)>, ResolutionError> {
    let row: Option<(i64, String)> = conn
        .query_row(
            "SELECT version, data FROM documents WHERE collection = ?1 AND id = ?2",
            params![T::collection(), id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(match row {
        Some((version, data)) => Some((serde_json::from_str(&data)?, version as u64)),
        None => None,
    })
}

pub(crate) fn put_within<T: Document>(
    conn: &Connection,
    doc: &T,
    expected_version: Option<u64>,
) -> Result<u64, ResolutionError> {
    let collection = T::collection();
    let id = doc.id();
    let data = serde_json::to_string(doc)?;

    let current: Option<i64> = conn
        .query_row(
            "SELECT version FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            |row| row.get(0),
        )
        .optional()?;

    let new_version: i64 = match (current, expected_version) {
        (None, _) => 1,
        (Some(cur), None) => cur + 1,
        (Some(cur), Some(expected)) => {
            if cur as u64 != expected {
                return Err(ResolutionError::conflict(format!(
                    "version mismatch for {collection}/{id}: expected {expected}, found {cur}"
                )));
            }
            cur + 1
        }
    };

    conn.execute(
        "INSERT INTO documents (collection, id, version, data) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(collection, id) DO UPDATE SET version = excluded.version, data = excluded.data",
        params![collection, id, new_version, data],
    )?;
    Ok(new_version as u64)
}

pub(crate) fn query_within<T: Document>(
    conn: &Connection,
    filters: &[EqFilter],
    order: Option<OrderBy>,
    limit: Option<usize>,
) -> Result<Vec<T>, ResolutionError> {
    let mut stmt = conn.prepare("SELECT data FROM documents WHERE collection = ?1")?;
    let rows = stmt.query_map(params![T::collection()], |row| row.get::<_, String>(0))?;

    let mut items = Vec::new();
    for row in rows {
        let data = row?;
        let doc: T = serde_json::from_str(&data)?;
        if matches(&doc, filters) {
            items.push(doc);
        }
    }

    if let Some(order) = order {
        apply_order(&mut items, &order);
    }
    if let Some(limit) = limit {
        items.truncate(limit);
    }
    Ok(items)
}
