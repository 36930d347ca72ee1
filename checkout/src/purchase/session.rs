//! # Purchase Session
//!
//! The one purchase an orchestrator is currently tracking, plus the handle
//! drivers use to write to it.
//!
//! ## Epochs
//!
//! Every `start_purchase` bumps the orchestrator's epoch and the new
//! session takes that number. A [`SessionHandle`] is bound to the epoch it
//! was issued for. Once a newer session exists, or the session has reached
//! a terminal state, the handle's writes are refused with
//! [`CheckoutError::Superseded`] and the driver unwinds.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::CheckoutError;
use super::mode::ProtocolMode;
use super::preview::Preview;
use super::tracker::{StepState, StepStatus, StepTracker, UpdateOutcome};
use crate::catalog::CatalogItem;

/// How a session ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Purchased {
        message: String,
        preview: Option<Preview>,
    },
    Failed {
        message: String,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Purchased { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Outcome::Purchased { message, .. } | Outcome::Failed { message } => message,
        }
    }
}

/// State of the current purchase.
#[derive(Debug)]
pub struct PurchaseSession {
    pub epoch: u64,
    pub mode: ProtocolMode,
    pub item: Arc<CatalogItem>,
    pub tracker: StepTracker,
    /// Output locator handed to the agent, once the driver has chosen one.
    pub output: Option<String>,
    /// Highest push event id seen before this session started. Anything at
    /// or below it belongs to an earlier purchase.
    pub watermark: u64,
    /// Step the driver is currently working on, failed if the driver errors.
    pub current_leg: Option<&'static str>,
    pub outcome: Option<Outcome>,
}

impl PurchaseSession {
    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, Some(Outcome::Failed { .. }))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            epoch: self.epoch,
            mode: self.mode,
            content_hash: self.item.content_hash.clone(),
            file_name: self.item.display_name().to_string(),
            steps: self.tracker.snapshot(),
            outcome: self.outcome.clone(),
        }
    }
}

/// Immutable view of a session for rendering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub epoch: u64,
    pub mode: ProtocolMode,
    pub content_hash: String,
    pub file_name: String,
    pub steps: Vec<StepState>,
    pub outcome: Option<Outcome>,
}

/// Orchestrator state shared with session handles.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub epoch: u64,
    pub busy: bool,
    /// Highest push event id delivered so far.
    pub last_event_id: u64,
    pub session: Option<PurchaseSession>,
}

impl Shared {
    /// The session for `epoch`, if it is still current.
    pub fn session_for(&mut self, epoch: u64) -> Option<&mut PurchaseSession> {
        self.session.as_mut().filter(|s| s.epoch == epoch)
    }

    /// Record a terminal outcome. Only the first one sticks.
    pub fn finish(&mut self, epoch: u64, outcome: Outcome) -> bool {
        let Some(session) = self.session_for(epoch) else {
            return false;
        };
        if session.outcome.is_some() {
            return false;
        }
        tracing::info!(
            epoch,
            mode = %session.mode,
            success = outcome.is_success(),
            message = outcome.message(),
            "purchase finished"
        );
        session.outcome = Some(outcome);
        self.busy = false;
        true
    }
}

/// A driver's write access to its own session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    epoch: u64,
    shared: Arc<Mutex<Shared>>,
}

impl SessionHandle {
    pub(crate) fn new(epoch: u64, shared: Arc<Mutex<Shared>>) -> Self {
        Self { epoch, shared }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether this session is current and not yet finished.
    pub fn is_live(&self) -> bool {
        let mut shared = self.shared.lock();
        shared.session_for(self.epoch).is_some_and(|s| !s.is_terminal())
    }

    fn with_live<R>(
        &self,
        f: impl FnOnce(&mut PurchaseSession) -> R,
    ) -> Result<R, CheckoutError> {
        let mut shared = self.shared.lock();
        match shared.session_for(self.epoch) {
            Some(session) if !session.is_terminal() => Ok(f(session)),
            _ => Err(CheckoutError::Superseded),
        }
    }

    /// Start a leg: `step` goes active and becomes the step an error fails.
    pub fn begin(&self, step: &'static str, detail: &str) -> Result<(), CheckoutError> {
        self.with_live(|s| {
            s.current_leg = Some(step);
            s.tracker.update(step, StepStatus::Active, Some(detail));
            tracing::debug!(epoch = s.epoch, step, detail, "leg started");
        })
    }

    /// Refresh the detail of an active step without changing the leg.
    pub fn progress(&self, step: &'static str, detail: &str) -> Result<(), CheckoutError> {
        self.with_live(|s| {
            s.tracker.update(step, StepStatus::Active, Some(detail));
        })
    }

    /// Mark `step` done. Clears the leg if it was the current one.
    pub fn complete(&self, step: &'static str, detail: &str) -> Result<(), CheckoutError> {
        self.with_live(|s| {
            if s.tracker.update(step, StepStatus::Done, Some(detail)) == UpdateOutcome::Applied
                && s.current_leg == Some(step)
            {
                s.current_leg = None;
            }
        })
    }

    /// Remember the output locator the trigger will carry.
    pub fn set_output(&self, output: &str) -> Result<(), CheckoutError> {
        self.with_live(|s| s.output = Some(output.to_string()))
    }
}
