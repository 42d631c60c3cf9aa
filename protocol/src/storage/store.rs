//! The storage seam the transaction engine writes through.
//!
//! [`LedgerDb`] is the production implementation. The trait exists so the
//! engine can run against any durable backend, and so its behaviour when
//! writes fail can be exercised without a broken disk.
//!
//! All methods block; the engine calls them from `spawn_blocking`.

use chrono::{DateTime, Utc};

use super::db::{DbResult, LedgerDb, NonceEntry};
use crate::transaction::{TransactionId, TransactionRecord};
use crate::validation::ReplayKey;

pub trait LedgerStore: Send + Sync + 'static {
    /// Persist a record, replacing any earlier version. Terminal and halted
    /// records must be durable when this returns.
    fn put_record(&self, record: &TransactionRecord) -> DbResult<()>;

    fn get_record(&self, id: &TransactionId) -> DbResult<Option<TransactionRecord>>;

    fn all_records(&self) -> DbResult<Vec<TransactionRecord>>;

    fn put_nonce(&self, key: &ReplayKey, retain_until: DateTime<Utc>) -> DbResult<()>;

    fn remove_nonce(&self, key: &ReplayKey) -> DbResult<()>;

    fn all_nonces(&self) -> DbResult<Vec<NonceEntry>>;

    /// Block until all pending writes are durable.
    fn flush(&self) -> DbResult<()>;
}

impl LedgerStore for LedgerDb {
    fn put_record(&self, record: &TransactionRecord) -> DbResult<()> {
        LedgerDb::put_record(self, record)
    }

    fn get_record(&self, id: &TransactionId) -> DbResult<Option<TransactionRecord>> {
        LedgerDb::get_record(self, id)
    }

    fn all_records(&self) -> DbResult<Vec<TransactionRecord>> {
        LedgerDb::all_records(self)
    }

    fn put_nonce(&self, key: &ReplayKey, retain_until: DateTime<Utc>) -> DbResult<()> {
        LedgerDb::put_nonce(self, key, retain_until)
    }

    fn remove_nonce(&self, key: &ReplayKey) -> DbResult<()> {
        LedgerDb::remove_nonce(self, key)
    }

    fn all_nonces(&self) -> DbResult<Vec<NonceEntry>> {
        LedgerDb::all_nonces(self)
    }

    fn flush(&self) -> DbResult<()> {
        LedgerDb::flush(self)
    }
}
