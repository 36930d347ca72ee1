//! # Step Plan Registry
//!
//! The fixed, ordered steps each protocol walks through. Plans are static
//! data; the tracker copies them into per-session state.
//!
//! | Plan           | Steps |
//! |----------------|-------|
//! | Direct         | 6     |
//! | PRE            | 8     |
//! | Chunked/Seeder | 11    |
//! | Ad-Subsidized  | 10    |
//!
//! Every plan ends with `verify`. The correlator relies on that when it
//! marks the final step on `FILE_SAVED` or a hash mismatch.

use std::collections::HashSet;

use super::error::CheckoutError;
use super::mode::{PlanKind, ProtocolMode};

/// One named step of a plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepDefinition {
    pub id: &'static str,
    /// One-based position, as displayed.
    pub ordinal: usize,
    pub description: &'static str,
}

const fn step(ordinal: usize, id: &'static str, description: &'static str) -> StepDefinition {
    StepDefinition {
        id,
        ordinal,
        description,
    }
}

static DIRECT_STEPS: [StepDefinition; 6] = [
    step(1, "invoice", "Requesting invoice from creator"),
    step(2, "pay", "Paying creator invoice"),
    step(3, "htlc", "HTLC settling"),
    step(4, "fetch", "Fetching encrypted content"),
    step(5, "decrypt", "Decrypting with K"),
    step(6, "verify", "Verifying plaintext H(F)"),
];

static PRE_STEPS: [StepDefinition; 8] = [
    step(1, "preinfo", "Getting buyer PRE public key"),
    step(2, "prepurchase", "Requesting PRE invoice from creator"),
    step(3, "pay", "Paying Lightning invoice"),
    step(4, "htlc", "HTLC settling (preimage = SHA-256(rk))"),
    step(5, "prekey", "Recovering AES key via PRE"),
    step(6, "fetch", "Downloading encrypted chunks"),
    step(7, "decrypt", "Decrypting with recovered key"),
    step(8, "verify", "Verifying plaintext H(F)"),
];

static CHUNKED_STEPS: [StepDefinition; 11] = [
    step(1, "invoice", "Requesting invoice from creator"),
    step(2, "cpay", "Paying creator (content key K)"),
    step(3, "chtlc", "Content HTLC settling"),
    step(4, "cmeta", "Fetching chunk metadata"),
    step(5, "cbit", "Querying seeder bitfields"),
    step(6, "tpay", "Paying seeders (transport)"),
    step(7, "thtlc", "Transport HTLC settling"),
    step(8, "down", "Downloading & verifying chunks"),
    step(9, "assem", "Reassembling content"),
    step(10, "decrypt", "Decrypting with K"),
    step(11, "verify", "Verifying plaintext H(F)"),
];

static AD_STEPS: [StepDefinition; 10] = [
    step(1, "adinv", "Requesting ad-subsidized invoices"),
    step(2, "adwatch", "Watching sponsored ad"),
    step(3, "adattest", "Obtaining attestation token"),
    step(4, "keypay", "Buyer paying 1 sat (learn K)"),
    step(5, "keyhtlc", "Key HTLC settling"),
    step(6, "adpay", "Advertiser paying content price"),
    step(7, "adhtlc", "Subsidy HTLC settling"),
    step(8, "fetch", "Fetching encrypted content"),
    step(9, "decrypt", "Decrypting with K"),
    step(10, "verify", "Verifying plaintext H(F)"),
];

/// An ordered step plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepPlan {
    kind: PlanKind,
    steps: &'static [StepDefinition],
}

impl StepPlan {
    pub fn for_kind(kind: PlanKind) -> Self {
        let steps: &'static [StepDefinition] = match kind {
            PlanKind::Direct => &DIRECT_STEPS,
            PlanKind::Pre => &PRE_STEPS,
            PlanKind::Chunked => &CHUNKED_STEPS,
            PlanKind::Ad => &AD_STEPS,
        };
        Self { kind, steps }
    }

    pub fn for_mode(mode: ProtocolMode) -> Self {
        Self::for_kind(mode.plan_kind())
    }

    pub fn kind(&self) -> PlanKind {
        self.kind
    }

    pub fn steps(&self) -> &'static [StepDefinition] {
        self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.steps.iter().any(|s| s.id == id)
    }

    /// The last step; marked on save or on a verification failure.
    pub fn final_step(&self) -> &'static str {
        self.steps.last().map(|s| s.id).unwrap_or("verify")
    }

    /// Plans must be non-empty, uniquely keyed and numbered 1..=n.
    pub fn validate(&self) -> Result<(), CheckoutError> {
        let broken = |reason: String| CheckoutError::Configuration {
            mode: format!("{:?}", self.kind),
            reason,
        };

        if self.steps.is_empty() {
            return Err(broken("plan has no steps".into()));
        }
        let mut seen = HashSet::new();
        for (i, s) in self.steps.iter().enumerate() {
            if !seen.insert(s.id) {
                return Err(broken(format!("duplicate step id `{}`", s.id)));
            }
            if s.ordinal != i + 1 {
                return Err(broken(format!("step `{}` has ordinal {}", s.id, s.ordinal)));
            }
        }
        Ok(())
    }
}
