//! # Purchase Orchestration
//!
//! Everything between "buy" and "saved":
//!
//! - **plan** — the fixed step list of each protocol.
//! - **tracker** — per-session step statuses, monotonic.
//! - **drivers** — setup legs of the four protocols, up to the trigger.
//! - **correlator** — pushed event to step moves, per plan.
//! - **source** — best-source and peer discovery lookups.
//! - **session** / **orchestrator** — the current purchase and its owner.
//! - **preview** / **render** — what the buyer gets to see.

pub mod correlator;
pub mod drivers;
pub mod orchestrator;
pub mod plan;
pub mod preview;
pub mod render;
pub mod session;
pub mod source;
pub mod tracker;

mod error;
mod mode;

pub use correlator::{correlate, Correlation, StepUpdate, Verdict};
pub use error::CheckoutError;
pub use mode::{PlanKind, ProtocolMode, PurchaseOptions, SourceMode};
pub use orchestrator::{EventEffect, IgnoreReason, Orchestrator};
pub use plan::{StepDefinition, StepPlan};
pub use preview::{Preview, PreviewKind};
pub use session::{Outcome, SessionHandle, SessionSnapshot};
pub use source::{ResolvedSource, SourceResolver, SourceSummary};
pub use tracker::{StepState, StepStatus, StepTracker, UpdateOutcome};
