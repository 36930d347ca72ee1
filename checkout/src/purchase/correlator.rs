//! # Event Correlator
//!
//! Maps one pushed event to the step moves it implies for the active plan,
//! and says whether the purchase is over. Pure: it reads the event and the
//! plan kind, touches nothing.
//!
//! ## Resolution Order
//!
//! 1. Verification failures (`HASH_MISMATCH`, `VERIFICATION_FAILED`, or a
//!    `VERIFIED`/`HASH_VERIFIED` whose `matches` is `false`) fail the final
//!    step, whatever the plan.
//! 2. `FILE_SAVED` completes the final step and reports [`Verdict::Saved`].
//! 3. Everything else goes through the `(plan, event type)` table. Missing
//!    entries yield `None`.
//!
//! The agent's vocabulary is shared by every protocol and much larger than
//! any one plan. Only the table decides which events matter for which plan;
//! `CHUNKS_DOWNLOADED`, for instance, means "chunks are in, reassemble" for
//! chunked purchases but "ciphertext is in, decrypt" for PRE.

use std::collections::HashMap;
use std::sync::OnceLock;

use super::mode::PlanKind;
use super::tracker::StepStatus;
use crate::config::format_size;
use crate::remote::PushEvent;

/// Shown for every content-integrity failure.
pub const VERIFICATION_FAILED: &str = "Verification failed: content hash mismatch";

/// One step move derived from an event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepUpdate {
    pub step: &'static str,
    pub status: StepStatus,
    /// `None` keeps the step's current detail.
    pub detail: Option<String>,
}

/// What an event means for the purchase as a whole.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    /// Terminal failure with the message the buyer sees.
    Failed(String),
    /// Content is on disk. Record it.
    Saved,
}

/// Step moves plus verdict for one event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Correlation {
    pub updates: Vec<StepUpdate>,
    pub verdict: Verdict,
}

/// Correlate `event` against a plan of kind `kind` whose last step is
/// `final_step`. `None` means the event is irrelevant to this plan.
pub fn correlate(
    kind: PlanKind,
    final_step: &'static str,
    event: &PushEvent,
) -> Option<Correlation> {
    let ty = event.event_type.as_str();

    let mismatch = matches!(ty, "HASH_MISMATCH" | "VERIFICATION_FAILED")
        || (matches!(ty, "VERIFIED" | "HASH_VERIFIED")
            && event.data.get("matches").and_then(|m| m.as_bool()) == Some(false));
    if mismatch {
        return Some(Correlation {
            updates: vec![StepUpdate {
                step: final_step,
                status: StepStatus::Fail,
                detail: Some("Mismatch!".to_string()),
            }],
            verdict: Verdict::Failed(VERIFICATION_FAILED.to_string()),
        });
    }

    if ty == "FILE_SAVED" {
        return Some(Correlation {
            updates: vec![StepUpdate {
                step: final_step,
                status: StepStatus::Done,
                detail: None,
            }],
            verdict: Verdict::Saved,
        });
    }

    let transition = table().get(&kind)?.get(ty)?;
    let updates = transition
        .moves
        .iter()
        .map(|m| StepUpdate {
            step: m.step,
            status: m.status,
            detail: m.detail.render(event),
        })
        .collect();
    let verdict = match &transition.failure {
        Some(message) => Verdict::Failed(message.render(event).unwrap_or_default()),
        None => Verdict::Continue,
    };

    Some(Correlation { updates, verdict })
}

// ---------------------------------------------------------------------------
// Transition Table
// ---------------------------------------------------------------------------

enum Detail {
    Keep,
    Text(&'static str),
    With(fn(&PushEvent) -> String),
}

impl Detail {
    fn render(&self, event: &PushEvent) -> Option<String> {
        match self {
            Detail::Keep => None,
            Detail::Text(s) => Some((*s).to_string()),
            Detail::With(f) => Some(f(event)),
        }
    }
}

struct Move {
    step: &'static str,
    status: StepStatus,
    detail: Detail,
}

struct Transition {
    moves: Vec<Move>,
    failure: Option<Detail>,
}

type Table = HashMap<PlanKind, HashMap<&'static str, Transition>>;

fn active(step: &'static str, detail: Detail) -> Move {
    Move { step, status: StepStatus::Active, detail }
}

fn done(step: &'static str, detail: Detail) -> Move {
    Move { step, status: StepStatus::Done, detail }
}

fn fail(step: &'static str, detail: Detail) -> Move {
    Move { step, status: StepStatus::Fail, detail }
}

use Detail::{Keep, Text, With};

/// A payload field as display text. Empty strings and zero count as
/// missing, the way the agent's optional fields are meant.
fn field(event: &PushEvent, key: &str) -> Option<String> {
    match event.data.get(key)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        _ => None,
    }
}

fn field_or(event: &PushEvent, key: &str, fallback: &str) -> String {
    field(event, key).unwrap_or_else(|| fallback.to_string())
}

fn chunk_count(event: &PushEvent, key: &str) -> String {
    field(event, key)
        .map(|n| format!("{} chunks", n))
        .unwrap_or_else(|| "Decrypted".to_string())
}

struct Rules<'a> {
    events: &'a mut HashMap<&'static str, Transition>,
}

impl Rules<'_> {
    fn on(&mut self, event_type: &'static str, moves: Vec<Move>) -> &mut Self {
        self.events.insert(event_type, Transition { moves, failure: None });
        self
    }

    fn fails(&mut self, event_type: &'static str, moves: Vec<Move>, failure: Detail) -> &mut Self {
        self.events.insert(
            event_type,
            Transition {
                moves,
                failure: Some(failure),
            },
        );
        self
    }
}

fn table() -> &'static Table {
    static TABLE: OnceLock<Table> = OnceLock::new();
    TABLE.get_or_init(build)
}

fn build() -> Table {
    let mut table = Table::new();

    for kind in [PlanKind::Direct, PlanKind::Pre, PlanKind::Chunked, PlanKind::Ad] {
        let events = table.entry(kind).or_default();
        let rules = &mut Rules { events };
        decrypt_and_verify(rules);
        match kind {
            PlanKind::Direct => {
                invoice_payment(rules);
                rules.on(
                    "PAYMENT_CONFIRMED",
                    vec![done("htlc", Text("Preimage received")), active("fetch", Keep)],
                );
                blob_fetch(rules);
            }
            PlanKind::Pre => {
                invoice_payment(rules);
                proxy_reencryption(rules);
            }
            PlanKind::Chunked => chunked_delivery(rules),
            PlanKind::Ad => {
                ad_subsidy(rules);
                blob_fetch(rules);
            }
        }
    }

    table
}

/// Every plan ends decrypt, verify.
fn decrypt_and_verify(rules: &mut Rules<'_>) {
    rules
        .on("DECRYPTING", vec![active("decrypt", Text("Decrypting..."))])
        .on(
            "DECRYPTED",
            vec![
                done("decrypt", With(|e| chunk_count(e, "chunks"))),
                active("verify", Text("Verifying...")),
            ],
        )
        .on(
            "CONTENT_DECRYPTED",
            vec![
                done("decrypt", With(|e| chunk_count(e, "chunks"))),
                active("verify", Text("Verifying...")),
            ],
        )
        .on(
            "CHUNKS_DECRYPTED",
            vec![
                done("decrypt", With(|e| chunk_count(e, "chunk_count"))),
                active("verify", Text("Verifying...")),
            ],
        )
        .on("VERIFYING", vec![active("verify", Text("Verifying..."))])
        .on("VERIFIED", vec![done("verify", Text("Verified"))])
        .on("HASH_VERIFIED", vec![done("verify", Text("Verified"))])
        .fails("BUY_ERROR", vec![], With(|e| field_or(e, "message", "Error")));
}

/// Single-invoice payment, reported against `pay`/`htlc`.
fn invoice_payment(rules: &mut Rules<'_>) {
    rules
        .on("COUNTDOWN", vec![active("pay", With(|e| field_or(e, "message", "")))])
        .on("PAYING_INVOICE", vec![active("pay", Text("Invoice sent"))])
        .on(
            "PAYMENT_SENT",
            vec![done("pay", Text("HTLC in flight")), active("htlc", Keep)],
        )
        .fails(
            "PAYMENT_FAILED",
            vec![fail("pay", With(|e| field_or(e, "reason", "Failed")))],
            Text("Payment failed"),
        );
}

/// Whole encrypted blob from one URL.
fn blob_fetch(rules: &mut Rules<'_>) {
    rules
        .on("FETCHING_ENC", vec![active("fetch", Text("Downloading..."))])
        .on(
            "ENC_FETCHED",
            vec![done(
                "fetch",
                With(|e| format_size(e.u64_field("bytes").unwrap_or(0))),
            )],
        )
        .fails(
            "FETCH_FAILED",
            vec![fail("fetch", With(|e| field_or(e, "error", "Failed")))],
            Text("Download failed"),
        );
}

fn proxy_reencryption(rules: &mut Rules<'_>) {
    rules
        .on("PRE_BUY_START", vec![active("pay", Text("Contacting creator..."))])
        .on(
            "PRE_PURCHASE_RECEIVED",
            // prepurchase already carries the resolved source; keep it.
            vec![
                done("prepurchase", Keep),
                active(
                    "pay",
                    With(|e| format!("Paying {} sats...", field_or(e, "price_sats", "?"))),
                ),
            ],
        )
        .on(
            "PRE_PAYMENT_CONFIRMED",
            vec![
                done("pay", Keep),
                done("htlc", Text("Preimage = SHA-256(rk)")),
                active("prekey", Text("Decrypting via PRE...")),
            ],
        )
        .on(
            "PRE_KEY_RECOVERED",
            vec![
                done("prekey", Text("AES key recovered")),
                active("fetch", Text("Downloading chunks...")),
            ],
        )
        .on(
            "SOURCES_DISCOVERED",
            vec![active(
                "fetch",
                With(|e| format!("{} sources found", field_or(e, "total", "0"))),
            )],
        )
        .on(
            "ICS_PLAN",
            vec![active(
                "fetch",
                With(|e| {
                    format!(
                        "ICS {}: {} chunks from {} sources",
                        field_or(e, "mode", "?"),
                        field_or(e, "chunk_count", "?"),
                        field_or(e, "total_sources", "?")
                    )
                }),
            )],
        )
        .on(
            "ICS_DOWNLOAD_START",
            vec![active("fetch", With(|e| field_or(e, "message", "ICS downloading...")))],
        )
        .on(
            "DOWNLOADING_CHUNKS",
            vec![active(
                "fetch",
                With(|e| {
                    format!(
                        "0/{} chunks from {}",
                        field_or(e, "chunks", "?"),
                        field_or(e, "source", "seeder")
                    )
                }),
            )],
        )
        .on(
            "CHUNK_PROGRESS",
            vec![active(
                "fetch",
                With(|e| {
                    let received = field(e, "received")
                        .or_else(|| field(e, "current"))
                        .unwrap_or_else(|| "?".to_string());
                    format!("{}/{} chunks", received, field_or(e, "total", "?"))
                }),
            )],
        )
        .on(
            "CHUNKS_DOWNLOADED",
            vec![
                done(
                    "fetch",
                    With(|e| {
                        let size = format_size(e.u64_field("total_bytes").unwrap_or(0));
                        match field(e, "ics_mode") {
                            Some(mode) => format!("{} ({})", size, mode),
                            None => size,
                        }
                    }),
                ),
                active("decrypt", Text("Decrypting...")),
            ],
        )
        .fails(
            "CHUNK_DOWNLOAD_FAILED",
            vec![fail("fetch", With(|e| field_or(e, "error", "Failed")))],
            Text("Chunk download failed"),
        );
}

/// Content key from the creator, chunks from transport peers.
fn chunked_delivery(rules: &mut Rules<'_>) {
    rules
        .on("CONTENT_PAYING", vec![active("cpay", Text("Sending payment..."))])
        .on(
            "CONTENT_PAYMENT_SENT",
            vec![done("cpay", Text("HTLC in flight")), active("chtlc", Keep)],
        )
        .on(
            "CONTENT_PAID",
            vec![done("chtlc", Text("K received")), active("cmeta", Text("Fetching..."))],
        )
        .fails(
            "CONTENT_PAYMENT_FAILED",
            vec![fail("cpay", With(|e| field_or(e, "reason", "Failed")))],
            Text("Content payment failed"),
        )
        .on(
            "CHUNK_META_RECEIVED",
            vec![
                done(
                    "cmeta",
                    With(|e| {
                        field(e, "chunk_count")
                            .map(|n| format!("{} chunks", n))
                            .unwrap_or_default()
                    }),
                ),
                active("cbit", Keep),
            ],
        )
        .on(
            "CHUNK_PLAN",
            vec![done(
                "cbit",
                With(|e| {
                    field(e, "total_chunks")
                        .map(|n| format!("{} chunks planned", n))
                        .unwrap_or_default()
                }),
            )],
        )
        .on("TRANSPORT_PAYING", vec![active("tpay", Text("Paying seeders..."))])
        .on(
            "TRANSPORT_PAYMENT_SENT",
            vec![done("tpay", Text("HTLC in flight")), active("thtlc", Keep)],
        )
        .on(
            "TRANSPORT_PAID",
            vec![done("thtlc", Text("Transport key received")), active("down", Keep)],
        )
        .fails(
            "TRANSPORT_PAYMENT_FAILED",
            vec![fail("tpay", With(|e| field_or(e, "reason", "Failed")))],
            Text("Transport payment failed"),
        )
        .on(
            "CHUNK_DOWNLOADED",
            vec![active(
                "down",
                With(|e| field(e, "progress").or_else(|| field(e, "message")).unwrap_or_default()),
            )],
        )
        .on(
            "CHUNK_VERIFIED",
            vec![active(
                "down",
                With(|e| match e.data.get("index") {
                    Some(serde_json::Value::Number(n)) => format!("Chunk {} verified", n),
                    _ => "Chunk verified".to_string(),
                }),
            )],
        )
        .fails(
            "CHUNK_DOWNLOAD_FAILED",
            vec![fail("down", With(|e| field_or(e, "error", "Failed")))],
            Text("Chunk download failed"),
        )
        .on(
            "CHUNKS_DOWNLOADING",
            vec![active("down", With(|e| field_or(e, "progress", "")))],
        )
        .on("CHUNKS_DOWNLOADED", vec![done("down", Keep), active("assem", Keep)])
        .on("ASSEMBLED", vec![done("assem", Keep), active("decrypt", Keep)]);
}

/// Nominal key payment plus the advertiser's held subsidy.
fn ad_subsidy(rules: &mut Rules<'_>) {
    rules
        .on("COUNTDOWN", vec![active("keypay", With(|e| field_or(e, "message", "")))])
        .on("PAYING_INVOICE", vec![active("keypay", Text("1 sat invoice sent"))])
        .on(
            "PAYMENT_SENT",
            vec![done("keypay", Text("HTLC in flight")), active("keyhtlc", Keep)],
        )
        .on(
            "PAYMENT_CONFIRMED",
            vec![done("keyhtlc", Text("K received")), active("fetch", Keep)],
        )
        .fails(
            "PAYMENT_FAILED",
            vec![fail("keypay", With(|e| field_or(e, "reason", "Failed")))],
            Text("Payment failed"),
        )
        .on("AD_HTLC_BUYER_ARRIVED", vec![done("keyhtlc", Text("Buyer HTLC held"))])
        .on("AD_HTLC_ADVERTISER_ARRIVED", vec![done("adhtlc", Text("Ad HTLC held"))])
        .on("AD_BOTH_HTLCS_READY", vec![done("adhtlc", Text("Both HTLCs held, claiming"))])
        .on(
            "AD_CLAIMED_BUYER",
            vec![done("keyhtlc", Text("K revealed, decrypting")), active("fetch", Keep)],
        )
        .on("AD_CLAIMED_ADVERTISER", vec![done("adhtlc", Text("Subsidy claimed"))]);
}
