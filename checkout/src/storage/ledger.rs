//! # Purchase Ledger
//!
//! Durable record of completed purchases, built on sled.
//!
//! | Tree        | Key                      | Value                     |
//! |-------------|--------------------------|---------------------------|
//! | `purchases` | content fingerprint (UTF-8) | `bincode(PurchaseRecord)` |
//!
//! Keying by fingerprint is what makes saves idempotent: the agent may
//! report the same `FILE_SAVED` twice, the buyer may buy the same asset
//! again, and either way the tree ends up with exactly one entry holding
//! the latest purchase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::path::Path;

use crate::catalog::CatalogItem;
use crate::purchase::ProtocolMode;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid record: {0}")]
    InvalidRecord(&'static str),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

const PURCHASES_TREE: &str = "purchases";

// ---------------------------------------------------------------------------
// Purchase Record
// ---------------------------------------------------------------------------

/// One completed purchase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub content_hash: String,
    pub file_name: String,
    pub price_sats: u64,
    pub size_bytes: u64,
    /// Where the agent wrote the decrypted file.
    pub output_path: String,
    pub purchased_at: DateTime<Utc>,
    pub mode: ProtocolMode,
    pub creator_address: String,
}

impl PurchaseRecord {
    /// Build a record from the purchased listing and the agent's save event
    /// payload (`path`/`output`, `bytes`).
    pub fn from_save(
        item: &CatalogItem,
        mode: ProtocolMode,
        saved: &serde_json::Value,
        purchased_at: DateTime<Utc>,
    ) -> Self {
        let text = |key: &str| {
            saved
                .get(key)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
        };
        let output_path = text("path").or_else(|| text("output")).unwrap_or_default();

        let file_name = if !item.file_name.is_empty() {
            item.file_name.clone()
        } else {
            output_path
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .unwrap_or("unknown")
                .to_string()
        };
        let size_bytes = if item.size_bytes > 0 {
            item.size_bytes
        } else {
            saved.get("bytes").and_then(|b| b.as_u64()).unwrap_or(0)
        };

        Self {
            content_hash: item.content_hash.clone(),
            file_name,
            price_sats: item.price_sats,
            size_bytes,
            output_path: output_path.to_string(),
            purchased_at,
            mode,
            creator_address: item.creator_address.clone(),
        }
    }

    /// Last path segment of the output, as served by the agent's
    /// `/api/decrypted/` endpoint.
    pub fn output_file(&self) -> Option<&str> {
        self.output_path.rsplit('/').next().filter(|s| !s.is_empty())
    }
}

/// Whether an upsert created or overwrote the record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Fingerprint-keyed purchase store.
///
/// Cheap to clone; clones share the same sled handle.
#[derive(Debug, Clone)]
pub struct PurchaseLedger {
    db: Db,
    purchases: Tree,
}

impl PurchaseLedger {
    /// Open or create a ledger at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> LedgerResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory ledger, removed on drop.
    pub fn open_temporary() -> LedgerResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> LedgerResult<Self> {
        let purchases = db.open_tree(PURCHASES_TREE)?;
        Ok(Self { db, purchases })
    }

    /// Insert or replace the record for `record.content_hash`.
    ///
    /// A record must name its fingerprint and where the file was written.
    pub fn upsert(&self, record: &PurchaseRecord) -> LedgerResult<UpsertOutcome> {
        if record.content_hash.is_empty() {
            return Err(LedgerError::InvalidRecord("missing content hash"));
        }
        if record.output_path.is_empty() {
            return Err(LedgerError::InvalidRecord("missing output path"));
        }
        let bytes =
            bincode::serialize(record).map_err(|e| LedgerError::Serialization(e.to_string()))?;
        let previous = self.purchases.insert(record.content_hash.as_bytes(), bytes)?;
        self.db.flush()?;

        Ok(if previous.is_some() {
            UpsertOutcome::Replaced
        } else {
            UpsertOutcome::Inserted
        })
    }

    pub fn get(&self, content_hash: &str) -> LedgerResult<Option<PurchaseRecord>> {
        match self.purchases.get(content_hash.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, content_hash: &str) -> LedgerResult<bool> {
        Ok(self.purchases.contains_key(content_hash.as_bytes())?)
    }

    /// Every record, newest purchase first.
    pub fn list(&self) -> LedgerResult<Vec<PurchaseRecord>> {
        let mut records = Vec::with_capacity(self.purchases.len());
        for entry in self.purchases.iter() {
            let (_, bytes) = entry?;
            records.push(decode(&bytes)?);
        }
        records.sort_by(|a, b| b.purchased_at.cmp(&a.purchased_at));
        Ok(records)
    }

    /// Delete a record. Returns what was removed, if anything.
    pub fn remove(&self, content_hash: &str) -> LedgerResult<Option<PurchaseRecord>> {
        let removed = match self.purchases.remove(content_hash.as_bytes())? {
            Some(bytes) => Some(decode(&bytes)?),
            None => None,
        };
        self.db.flush()?;
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.purchases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.purchases.is_empty()
    }
}

fn decode(bytes: &[u8]) -> LedgerResult<PurchaseRecord> {
    bincode::deserialize(bytes).map_err(|e| LedgerError::Serialization(e.to_string()))
}
