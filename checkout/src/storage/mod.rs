//! Persistent storage for the buyer client.

mod ledger;

pub use ledger::{LedgerError, LedgerResult, PurchaseLedger, PurchaseRecord, UpsertOutcome};
