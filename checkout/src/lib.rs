// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Conduit Checkout — Buyer-Side Purchase Orchestration
//!
//! A buyer on the Conduit marketplace never talks to the payment network
//! directly. The local settlement agent does the paying, fetching and
//! decrypting; this crate tells it what to do and then watches it work.
//!
//! ## Architecture
//!
//! - **catalog** — Immutable listing snapshots handed in by the caller.
//! - **purchase** — Step plans, step tracking, the four protocol drivers,
//!   the event correlator and the orchestrator that glues them together.
//! - **remote** — Collaborator traits (creator, agent, registry, advertiser,
//!   push stream) and their HTTP implementation.
//! - **storage** — The durable purchase ledger.
//! - **config** — Timeouts, limits and client configuration.
//!
//! ## Ground Rules
//!
//! 1. Drivers never wait for settlement. They trigger and return.
//! 2. Everything after the trigger is driven by pushed events.
//! 3. A finished step stays finished. Late or stray events cannot reopen it.
//! 4. One fingerprint, one ledger record. Buying twice replaces, never appends.

pub mod catalog;
pub mod config;
pub mod purchase;
pub mod remote;
pub mod storage;

pub use catalog::{CatalogItem, PlaybackPolicy};
pub use config::CheckoutConfig;
pub use purchase::{
    CheckoutError, Orchestrator, ProtocolMode, PurchaseOptions, SourceMode, StepStatus,
};
pub use storage::{PurchaseLedger, PurchaseRecord};
