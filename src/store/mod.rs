//! C1 — Store: an abstract document store with multi-document serializable
//! transactions, ranged queries, batch writes, and change subscription
//! (spec §4.1), backed concretely by SQLite (`rusqlite`, bundled) the same
//! way the teacher backs `UserAccountsDB` / `UserStore` / `DbSignalStorage`.

mod clock;
mod query;
mod sqlite;

pub use clock::LogicalClock;
pub use query::{EqFilter, OrderBy, OrderDirection};
pub use sqlite::SqliteStore;

use crate::domain::{Document, Timestamp};
use crate::error::ResolutionError;
use rusqlite::Transaction;

/// Context handed to the closure passed to `Store::tx`. Wraps a raw SQLite
/// transaction with the same typed `get`/`put`/`query` surface as the
/// top-level `Store`, so callers write identical code whether or not they
/// are inside a transaction.
pub struct TxContext<'a> {
    tx: &'a Transaction<'a>,
    pub now: Timestamp,
}

impl<'a> TxContext<'a> {
    pub(crate) fn new(tx: &'a Transaction<'a>, now: Timestamp) -> Self {
        Self { tx, now }
    }

    pub fn get<T: Document>(&self, id: &str) -> Result<Option<T>, ResolutionError> {
        sqlite::get_within(self.tx, id)
    }

    pub fn get_with_version<T: Document>(
        &self,
        id: &str,
    ) -> Result<Option<(T, u64)>, ResolutionError> {
        sqlite::get_with_version_within(self.tx, id)
    }

    pub fn put<T: Document>(
        &self,
        doc: &T,
        expected_version: Option<u64>,
    ) -> Result<u64, ResolutionError> {
        sqlite::put_within(self.tx, doc, expected_version)
    }

    pub fn query<T: Document>(
        &self,
        filters: &[EqFilter],
        order: Option<OrderBy>,
        limit: Option<usize>,
    ) -> Result<Vec<T>, ResolutionError> {
        sqlite::query_within(self.tx, filters, order, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{UserBalance, Document as _};

    #[test]
    fn put_then_get_round_trips() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = store.now();
        let balance = UserBalance::initial("u1".into(), 1000, now);
        let version = store.put(&balance, None).unwrap();
        assert_eq!(version, 1);

        let (loaded, loaded_version): (UserBalance, u64) =
            store.get_with_version("u1").unwrap().unwrap();
        assert_eq!(loaded.available_tokens, 1000);
        assert_eq!(loaded_version, 1);
        assert_eq!(UserBalance::collection(), "user_balances");
    }

    #[test]
    fn put_rejects_stale_expected_version() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = store.now();
        let balance = UserBalance::initial("u1".into(), 1000, now);
        store.put(&balance, None).unwrap();

        let err = store.put(&balance, Some(0)).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn tx_commits_multi_document_writes_atomically() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = store.now();
        let a = UserBalance::initial("a".into(), 1000, now);
        let b = UserBalance::initial("b".into(), 500, now);
        store.put(&a, None).unwrap();
        store.put(&b, None).unwrap();

        store
            .tx(3, |ctx| {
                let (mut a, av): (UserBalance, u64) = ctx.get_with_version("a")?.unwrap();
                let (mut b, bv): (UserBalance, u64) = ctx.get_with_version("b")?.unwrap();
                a.available_tokens -= 100;
                b.available_tokens += 100;
                ctx.put(&a, Some(av))?;
                ctx.put(&b, Some(bv))?;
                Ok(())
            })
            .unwrap();

        let a: UserBalance = store.get("a").unwrap().unwrap();
        let b: UserBalance = store.get("b").unwrap().unwrap();
        assert_eq!(a.available_tokens, 900);
        assert_eq!(b.available_tokens, 600);
    }

    #[test]
    fn tx_rolls_back_entirely_on_mid_transaction_conflict() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = store.now();
        let a = UserBalance::initial("a".into(), 1000, now);
        store.put(&a, None).unwrap();

        let result: Result<(), ResolutionError> = store.tx(1, |ctx| {
            let (mut a, _stale_version): (UserBalance, u64) =
                ctx.get_with_version("a")?.unwrap();
            a.available_tokens -= 100;
            // Deliberately pass a wrong expected_version to force a conflict
            // after other work in the closure has already run.
            ctx.put(&a, Some(9999))?;
            Ok(())
        });
        assert!(result.is_err());
        let a: UserBalance = store.get("a").unwrap().unwrap();
        assert_eq!(a.available_tokens, 1000, "rolled-back tx must not persist partial writes");
    }
}
