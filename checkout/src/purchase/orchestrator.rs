//! # Purchase Orchestrator
//!
//! Owns the current [`PurchaseSession`] and is the single consumer of the
//! push stream. Drivers write through their [`SessionHandle`]; events go
//! through [`Orchestrator::handle_event`]; nothing else touches the session.
//!
//! ## Lifecycle
//!
//! ```text
//!   start_purchase ─► validate ─► new epoch, busy ─► driver setup leg ─► trigger
//!                        │                               │ error
//!                        ▼                               ▼
//!                  Input / Busy                leg step fail, terminal failure
//!
//!   handle_event ─► attribution checks ─► correlate ─► tracker updates
//!                                                         ├─ Failed ─► terminal failure
//!                                                         └─ Saved  ─► preview + ledger upsert
//! ```
//!
//! Terminal outcomes clear the busy flag. The lock around shared state is
//! only ever held for bookkeeping, never across an `.await`.
//!
//! ## Attribution
//!
//! The agent does not tag events with our session, so the orchestrator
//! decides which purchase an event belongs to:
//!
//! - events whose id is at or below the watermark taken when the session
//!   started were emitted for an earlier purchase;
//! - events from a role other than `buyer` describe the node's other jobs;
//! - until the driver sends its trigger (and with it the output locator),
//!   the agent has nothing of ours to report on;
//! - events naming another `content_hash` or another `output` file belong
//!   to a different purchase;
//! - once a session has failed, nothing revives it.
//!
//! After a successful save, events keep flowing through so a repeated
//! `FILE_SAVED` still lands in the ledger (harmlessly, it is keyed by
//! fingerprint).

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::correlator::{self, Verdict};
use super::drivers::{self, DriverContext};
use super::error::CheckoutError;
use super::mode::{ProtocolMode, PurchaseOptions};
use super::plan::StepPlan;
use super::preview;
use super::session::{Outcome, PurchaseSession, SessionHandle, SessionSnapshot, Shared};
use super::tracker::{StepStatus, StepTracker};
use crate::catalog::CatalogItem;
use crate::config::CheckoutConfig;
use crate::remote::{Collaborators, PushEvent, RemoteError};
use crate::storage::{PurchaseLedger, PurchaseRecord, UpsertOutcome};

/// Message shown when a purchase completes.
pub const PURCHASE_COMPLETE: &str = "Content purchased and verified!";

/// Outcome prefix when the file was saved but the ledger refused it.
pub const LEDGER_WRITE_FAILED: &str = "Purchase saved but could not be recorded";

/// Why an event was not applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    NoSession,
    /// Emitted before the current session started.
    BeforeSession,
    /// Not a buyer-role event.
    ForeignRole,
    /// Arrived before the agent was asked to buy anything.
    BeforeTrigger,
    /// Names another fingerprint or output file.
    OtherPurchase,
    /// The session already failed.
    SessionFailed,
}

/// What [`Orchestrator::handle_event`] did with an event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventEffect {
    Ignored(IgnoreReason),
    /// Attributed to the session but meaningless for its plan.
    Unmatched,
    Applied,
    /// The event ended the session in failure.
    Failed(String),
    /// The event reported the saved file; the ledger was written.
    Recorded(UpsertOutcome),
}

pub struct Orchestrator {
    shared: Arc<Mutex<Shared>>,
    collaborators: Collaborators,
    ledger: PurchaseLedger,
    config: Arc<CheckoutConfig>,
}

impl Orchestrator {
    pub fn new(
        collaborators: Collaborators,
        ledger: PurchaseLedger,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::default())),
            collaborators,
            ledger,
            config: Arc::new(config),
        }
    }

    pub fn ledger(&self) -> &PurchaseLedger {
        &self.ledger
    }

    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    // -- Queries ------------------------------------------------------------

    pub fn is_busy(&self) -> bool {
        self.shared.lock().busy
    }

    /// Epoch of the most recent session, zero before the first purchase.
    pub fn epoch(&self) -> u64 {
        self.shared.lock().epoch
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.shared.lock().session.as_ref().map(PurchaseSession::snapshot)
    }

    /// Terminal outcome of the current session, if it has one.
    pub fn outcome(&self) -> Option<Outcome> {
        self.shared
            .lock()
            .session
            .as_ref()
            .and_then(|s| s.outcome.clone())
    }

    pub fn is_purchased(&self, content_hash: &str) -> Result<bool, CheckoutError> {
        Ok(self.ledger.contains(content_hash)?)
    }

    // -- Purchases ----------------------------------------------------------

    /// Start a purchase and run its setup leg up to the trigger.
    ///
    /// Returns the session epoch once the agent has been triggered. Events
    /// delivered while this future is pending are not processed; callers
    /// that need both at once use [`Orchestrator::run_purchase`].
    pub async fn start_purchase(
        &self,
        item: CatalogItem,
        mode: ProtocolMode,
        options: PurchaseOptions,
    ) -> Result<u64, CheckoutError> {
        let ctx = self.open_session(item, mode, options)?;
        let epoch = ctx.handle.epoch();
        self.execute(ctx).await.map(|()| epoch)
    }

    /// Start a purchase and consume `events` until it reaches a terminal
    /// outcome.
    ///
    /// One loop owns both the driver and the event channel, so events that
    /// arrive mid-setup (the agent reports payment while the ad driver is
    /// still talking to the advertiser) are applied in order.
    pub async fn run_purchase(
        &self,
        item: CatalogItem,
        mode: ProtocolMode,
        options: PurchaseOptions,
        events: &mut mpsc::Receiver<PushEvent>,
    ) -> Result<Outcome, CheckoutError> {
        let ctx = self.open_session(item, mode, options)?;
        let epoch = ctx.handle.epoch();

        let driver = self.execute(ctx);
        tokio::pin!(driver);
        let mut driver_done = false;
        let mut stream_open = true;

        loop {
            if let Some(outcome) = self.outcome_of(epoch) {
                return Ok(outcome);
            }
            if driver_done && !stream_open {
                return Err(CheckoutError::remote(
                    "Event stream closed",
                    RemoteError::Transport("no more events from the agent".to_string()),
                ));
            }

            tokio::select! {
                result = &mut driver, if !driver_done => {
                    driver_done = true;
                    match result {
                        Ok(()) => {}
                        Err(CheckoutError::Superseded) => return Err(CheckoutError::Superseded),
                        // Already recorded as the session outcome.
                        Err(e) => tracing::debug!(epoch, error = %e, "setup leg failed"),
                    }
                }
                next = events.recv(), if stream_open => match next {
                    Some(event) => {
                        if let Err(e) = self.handle_event(&event) {
                            tracing::error!(epoch, error = %e, "failed to apply event");
                        }
                    }
                    None => {
                        tracing::warn!(epoch, "event channel closed");
                        stream_open = false;
                    }
                },
            }
        }
    }

    /// Apply one pushed event to the current session.
    pub fn handle_event(&self, event: &PushEvent) -> Result<EventEffect, CheckoutError> {
        let mut shared = self.shared.lock();
        shared.last_event_id = shared.last_event_id.max(event.id);

        let Some(session) = shared.session.as_mut() else {
            return Ok(EventEffect::Ignored(IgnoreReason::NoSession));
        };
        if let Some(reason) = ignore_reason(session, event) {
            tracing::trace!(
                epoch = session.epoch,
                event_id = event.id,
                event_type = %event.event_type,
                ?reason,
                "event ignored"
            );
            return Ok(EventEffect::Ignored(reason));
        }

        let plan = session.tracker.plan();
        let Some(correlation) = correlator::correlate(plan.kind(), plan.final_step(), event) else {
            return Ok(EventEffect::Unmatched);
        };

        let epoch = session.epoch;
        tracing::debug!(
            epoch,
            event_id = event.id,
            event_type = %event.event_type,
            updates = correlation.updates.len(),
            "event correlated"
        );
        for update in &correlation.updates {
            session
                .tracker
                .update(update.step, update.status, update.detail.as_deref());
        }

        match correlation.verdict {
            Verdict::Continue => Ok(EventEffect::Applied),
            Verdict::Failed(message) => {
                // Failures that name no step land on whatever was running.
                if !session.tracker.has_failure() {
                    if let Some(step) = session.tracker.active_step() {
                        session.tracker.update(step, StepStatus::Fail, Some(&message));
                    }
                }
                shared.finish(
                    epoch,
                    Outcome::Failed {
                        message: message.clone(),
                    },
                );
                Ok(EventEffect::Failed(message))
            }
            Verdict::Saved => {
                let record =
                    PurchaseRecord::from_save(&session.item, session.mode, &event.data, Utc::now());
                let preview = preview::resolve(&self.config.node_url, &event.data);

                // The lock stays held so no other writer sees a saved file
                // without its ledger record.
                let outcome = match self.ledger.upsert(&record) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::error!(
                            epoch,
                            content_hash = %record.content_hash,
                            error = %e,
                            "failed to record purchase"
                        );
                        shared.finish(
                            epoch,
                            Outcome::Failed {
                                message: format!("{}: {}", LEDGER_WRITE_FAILED, e),
                            },
                        );
                        return Err(e.into());
                    }
                };
                shared.finish(
                    epoch,
                    Outcome::Purchased {
                        message: PURCHASE_COMPLETE.to_string(),
                        preview,
                    },
                );
                drop(shared);

                tracing::info!(
                    epoch,
                    content_hash = %record.content_hash,
                    output = %record.output_path,
                    ?outcome,
                    "purchase recorded"
                );
                Ok(EventEffect::Recorded(outcome))
            }
        }
    }

    // -- Internals ----------------------------------------------------------

    fn outcome_of(&self, epoch: u64) -> Option<Outcome> {
        self.shared
            .lock()
            .session_for(epoch)
            .and_then(|s| s.outcome.clone())
    }

    /// Validate, claim the busy flag and install a fresh session.
    fn open_session(
        &self,
        item: CatalogItem,
        mode: ProtocolMode,
        options: PurchaseOptions,
    ) -> Result<DriverContext, CheckoutError> {
        validate_input(&item, mode, &options)?;
        let plan = StepPlan::for_mode(mode);
        plan.validate()?;

        let item = Arc::new(item);
        let epoch = {
            let mut shared = self.shared.lock();
            if shared.busy {
                return Err(CheckoutError::Busy);
            }
            shared.epoch += 1;
            shared.busy = true;
            let epoch = shared.epoch;
            let watermark = shared.last_event_id;
            shared.session = Some(PurchaseSession {
                epoch,
                mode,
                item: item.clone(),
                tracker: StepTracker::new(plan),
                output: None,
                watermark,
                current_leg: None,
                outcome: None,
            });
            epoch
        };

        tracing::info!(
            epoch,
            %mode,
            content_hash = %item.content_hash,
            price_sats = item.price_sats,
            "purchase started"
        );

        Ok(DriverContext {
            handle: SessionHandle::new(epoch, self.shared.clone()),
            item,
            mode,
            options,
            collaborators: self.collaborators.clone(),
            config: self.config.clone(),
        })
    }

    /// Run the driver; on failure, fail the leg it was on and end the
    /// session.
    async fn execute(&self, ctx: DriverContext) -> Result<(), CheckoutError> {
        let epoch = ctx.handle.epoch();
        match drivers::drive(&ctx).await {
            Ok(()) => Ok(()),
            Err(CheckoutError::Superseded) => {
                tracing::debug!(epoch, "driver stopped, session no longer current");
                Err(CheckoutError::Superseded)
            }
            Err(err) => {
                self.fail_session(epoch, &err);
                Err(err)
            }
        }
    }

    fn fail_session(&self, epoch: u64, err: &CheckoutError) {
        let mut shared = self.shared.lock();
        let Some(session) = shared.session_for(epoch) else {
            return;
        };
        if session.is_terminal() {
            return;
        }
        if let Some(step) = session.current_leg.take() {
            session
                .tracker
                .update(step, StepStatus::Fail, Some(&err.step_detail()));
        }
        tracing::warn!(epoch, error = %err, "setup leg failed");
        shared.finish(
            epoch,
            Outcome::Failed {
                message: err.to_string(),
            },
        );
    }
}

/// Reject purchases that cannot even start. No session is created.
fn validate_input(
    item: &CatalogItem,
    mode: ProtocolMode,
    options: &PurchaseOptions,
) -> Result<(), CheckoutError> {
    if item.content_hash.trim().is_empty() {
        return Err(CheckoutError::Input("No item selected".to_string()));
    }
    if item.creator_url().is_empty() {
        return Err(CheckoutError::Input(
            "No creator address available for this listing".to_string(),
        ));
    }
    if mode == ProtocolMode::Ad
        && options
            .advertiser_url
            .as_deref()
            .map_or(true, |u| u.trim().is_empty())
    {
        return Err(CheckoutError::Input("Advertiser URL required".to_string()));
    }
    Ok(())
}

fn ignore_reason(session: &PurchaseSession, event: &PushEvent) -> Option<IgnoreReason> {
    if event.id != 0 && event.id <= session.watermark {
        return Some(IgnoreReason::BeforeSession);
    }
    if !event.role.is_empty() && event.role != "buyer" {
        return Some(IgnoreReason::ForeignRole);
    }
    if session.output.is_none() {
        return Some(IgnoreReason::BeforeTrigger);
    }
    if let Some(hash) = event.str_field("content_hash") {
        let ours = hash == session.item.content_hash
            || session.item.encrypted_hash.as_deref() == Some(hash);
        if !ours {
            return Some(IgnoreReason::OtherPurchase);
        }
    }
    if let (Some(theirs), Some(ours)) = (event.str_field("output"), session.output.as_deref()) {
        if file_name(theirs) != file_name(ours) {
            return Some(IgnoreReason::OtherPurchase);
        }
    }
    if session.is_failed() {
        return Some(IgnoreReason::SessionFailed);
    }
    None
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
