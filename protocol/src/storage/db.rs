//! # LedgerDb — Transaction Persistence
//!
//! Embedded sled store for transaction records and the replay-nonce set.
//!
//! ## Tree Layout
//!
//! | Tree           | Key                       | Value                        |
//! |----------------|---------------------------|------------------------------|
//! | `transactions` | transaction id (16B uuid) | `bincode(TransactionRecord)` |
//! | `nonces`       | `role/nonce` (UTF-8)      | `bincode(NonceEntry)`        |
//! | `metadata`     | key (UTF-8)               | value (bytes)                |
//!
//! ## Durability
//!
//! sled buffers writes. A record that reaches a terminal state is flushed
//! before [`LedgerDb::put_record`] returns, so a terminal state that was
//! reported to a caller is never lost on restart.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::path::Path;

use crate::config::PROTOCOL_VERSION;
use crate::transaction::{TransactionId, TransactionRecord};
use crate::validation::ReplayKey;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("key not found: {0}")]
    NotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Well-known key in the `metadata` tree holding the protocol version that
/// last wrote the database.
const META_PROTOCOL_VERSION: &[u8] = b"protocol_version";

/// A persisted replay entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceEntry {
    pub key: ReplayKey,
    pub retain_until: DateTime<Utc>,
}

fn encode<T: Serialize>(value: &T) -> DbResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| DbError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    bincode::deserialize(bytes).map_err(|e| DbError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// LedgerDb
// ---------------------------------------------------------------------------

/// Cheap to clone; sled handles are reference counted and thread-safe.
#[derive(Debug, Clone)]
pub struct LedgerDb {
    db: Db,
    transactions: Tree,
    nonces: Tree,
    metadata: Tree,
}

impl LedgerDb {
    /// Open or create a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory database, removed when dropped.
    pub fn open_temporary() -> DbResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let transactions = db.open_tree("transactions")?;
        let nonces = db.open_tree("nonces")?;
        let metadata = db.open_tree("metadata")?;
        metadata.insert(META_PROTOCOL_VERSION, PROTOCOL_VERSION.as_bytes())?;
        Ok(Self {
            db,
            transactions,
            nonces,
            metadata,
        })
    }

    // -- Transaction records ------------------------------------------------

    /// Persist a record, replacing any earlier version. Terminal records
    /// are flushed to disk before returning.
    pub fn put_record(&self, record: &TransactionRecord) -> DbResult<()> {
        let bytes = encode(record)?;
        self.transactions.insert(record.id().as_bytes(), bytes)?;
        if record.is_terminal() || record.is_halted() {
            self.db.flush()?;
            tracing::debug!(tx = %record.id(), state = %record.state(), "terminal record flushed");
        }
        Ok(())
    }

    pub fn get_record(&self, id: &TransactionId) -> DbResult<Option<TransactionRecord>> {
        match self.transactions.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Like [`get_record`](Self::get_record) but a missing record is an error.
    pub fn require_record(&self, id: &TransactionId) -> DbResult<TransactionRecord> {
        self.get_record(id)?
            .ok_or_else(|| DbError::NotFound(id.to_string()))
    }

    pub fn all_records(&self) -> DbResult<Vec<TransactionRecord>> {
        let mut records = Vec::with_capacity(self.transactions.len());
        for item in self.transactions.iter() {
            let (_key, value) = item?;
            records.push(decode(&value)?);
        }
        Ok(records)
    }

    pub fn record_count(&self) -> usize {
        self.transactions.len()
    }

    // -- Replay nonces ------------------------------------------------------

    pub fn put_nonce(&self, key: &ReplayKey, retain_until: DateTime<Utc>) -> DbResult<()> {
        let entry = NonceEntry {
            key: key.clone(),
            retain_until,
        };
        self.nonces.insert(key.to_string().as_bytes(), encode(&entry)?)?;
        Ok(())
    }

    pub fn remove_nonce(&self, key: &ReplayKey) -> DbResult<()> {
        self.nonces.remove(key.to_string().as_bytes())?;
        Ok(())
    }

    pub fn all_nonces(&self) -> DbResult<Vec<NonceEntry>> {
        let mut entries = Vec::with_capacity(self.nonces.len());
        for item in self.nonces.iter() {
            let (_key, value) = item?;
            entries.push(decode(&value)?);
        }
        Ok(entries)
    }

    pub fn nonce_count(&self) -> usize {
        self.nonces.len()
    }

    // -- Metadata -----------------------------------------------------------

    pub fn protocol_version(&self) -> DbResult<Option<String>> {
        Ok(self
            .metadata
            .get(META_PROTOCOL_VERSION)?
            .map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    /// Block until all pending writes are durable.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
