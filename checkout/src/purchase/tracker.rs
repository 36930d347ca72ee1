//! # Step Tracker
//!
//! Per-session step statuses. A plain state container: it never decides
//! anything on its own, it only accepts or refuses explicit updates.
//!
//! ```text
//!   pending ──► active ──► done
//!      │          │
//!      └──────────┴──────► fail
//! ```
//!
//! `done` and `fail` are terminal. Anything trying to move a terminal step
//! is refused and logged, because it means an event arrived out of order
//! or belongs to another purchase.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::plan::StepPlan;

/// Status of one step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Active,
    Done,
    Fail,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Done | StepStatus::Fail)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Active => "active",
            StepStatus::Done => "done",
            StepStatus::Fail => "fail",
        };
        f.write_str(s)
    }
}

/// Current state of one step, as rendered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StepState {
    pub id: &'static str,
    pub ordinal: usize,
    pub description: &'static str,
    pub status: StepStatus,
    pub detail: String,
}

/// Result of [`StepTracker::update`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// The step id is not part of this plan.
    UnknownStep,
    /// The step is already terminal.
    Refused,
}

/// Mutable projection of a plan's step statuses.
#[derive(Clone, Debug)]
pub struct StepTracker {
    plan: StepPlan,
    steps: Vec<StepState>,
}

impl StepTracker {
    pub fn new(plan: StepPlan) -> Self {
        let mut tracker = Self {
            plan,
            steps: Vec::with_capacity(plan.len()),
        };
        tracker.initialize(plan);
        tracker
    }

    /// Reset to `plan`, every step pending.
    pub fn initialize(&mut self, plan: StepPlan) {
        self.plan = plan;
        self.steps = plan
            .steps()
            .iter()
            .map(|def| StepState {
                id: def.id,
                ordinal: def.ordinal,
                description: def.description,
                status: StepStatus::Pending,
                detail: String::new(),
            })
            .collect();
    }

    pub fn plan(&self) -> StepPlan {
        self.plan
    }

    /// Move `step_id` to `status`, replacing the detail when one is given.
    ///
    /// Never fails: unknown ids and moves out of a terminal status are
    /// reported through the outcome and otherwise ignored. Re-applying the
    /// same terminal status only refreshes the detail.
    pub fn update(
        &mut self,
        step_id: &str,
        status: StepStatus,
        detail: Option<&str>,
    ) -> UpdateOutcome {
        let Some(step) = self.steps.iter_mut().find(|s| s.id == step_id) else {
            tracing::trace!(step = step_id, "update for step outside plan ignored");
            return UpdateOutcome::UnknownStep;
        };

        if step.status.is_terminal() && step.status != status {
            tracing::warn!(
                step = step_id,
                from = %step.status,
                to = %status,
                "refusing transition out of terminal step"
            );
            return UpdateOutcome::Refused;
        }
        step.status = status;
        if let Some(detail) = detail {
            step.detail = detail.to_string();
        }
        UpdateOutcome::Applied
    }

    pub fn status(&self, step_id: &str) -> Option<StepStatus> {
        self.steps.iter().find(|s| s.id == step_id).map(|s| s.status)
    }

    pub fn detail(&self, step_id: &str) -> Option<&str> {
        self.steps
            .iter()
            .find(|s| s.id == step_id)
            .map(|s| s.detail.as_str())
    }

    /// First step currently `active`, in plan order.
    pub fn active_step(&self) -> Option<&'static str> {
        self.steps
            .iter()
            .find(|s| s.status == StepStatus::Active)
            .map(|s| s.id)
    }

    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.status == StepStatus::Done)
    }

    pub fn has_failure(&self) -> bool {
        self.steps.iter().any(|s| s.status == StepStatus::Fail)
    }

    pub fn snapshot(&self) -> Vec<StepState> {
        self.steps.clone()
    }
}
