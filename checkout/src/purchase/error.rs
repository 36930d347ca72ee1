//! Error types for the purchase flow.
//!
//! [`CheckoutError`] covers everything that can end a purchase before or
//! during its setup leg. Its `Display` text is what the buyer is shown;
//! [`CheckoutError::step_detail`] is the shorter text that goes next to the
//! failed step.

use thiserror::Error;

use crate::remote::RemoteError;
use crate::storage::LedgerError;

/// Errors that can occur while starting or tracking a purchase.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Missing selection or required field. No session is created.
    #[error("{0}")]
    Input(String),

    /// A purchase is already in flight on this orchestrator.
    #[error("a purchase is already in progress")]
    Busy,

    /// A step plan failed validation.
    #[error("invalid step plan for {mode}: {reason}")]
    Configuration {
        /// The protocol mode whose plan is broken.
        mode: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A collaborator call failed during the setup leg.
    #[error("{context}: {source}")]
    Remote {
        /// What the driver was doing, as the buyer would phrase it.
        context: &'static str,
        /// The underlying failure.
        #[source]
        source: RemoteError,
    },

    /// The collaborator rejected the request; its message is shown as is.
    #[error("{0}")]
    Rejected(String),

    /// Registry discovery found no transport peers (or could not be asked).
    #[error("No seeders found for this content. Try Direct mode instead.")]
    NoSeeders {
        /// Why the peer list was empty, for the step detail.
        reason: String,
    },

    /// The agent has no PRE identity key.
    #[error("Failed to get buyer PRE key. Is your node running the PRE build?")]
    MissingPreKey {
        /// What the agent actually said.
        reason: String,
    },

    /// The advertiser did not send the subsidy payment.
    #[error("Advertiser subsidy failed: {status}")]
    SubsidyRejected {
        /// The advertiser's status string.
        status: String,
    },

    /// A newer session replaced this one while its driver was running.
    #[error("purchase superseded by a newer session")]
    Superseded,

    /// The purchase ledger could not be read or written.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl CheckoutError {
    /// Wrap a remote failure, promoting in-band rejections so their text is
    /// shown verbatim.
    pub fn remote(context: &'static str, source: RemoteError) -> Self {
        match source {
            RemoteError::Rejected(message) => CheckoutError::Rejected(message),
            source => CheckoutError::Remote { context, source },
        }
    }

    /// Short text for the failed step.
    pub fn step_detail(&self) -> String {
        match self {
            CheckoutError::Remote { source, .. } => source.to_string(),
            CheckoutError::NoSeeders { reason } => reason.clone(),
            CheckoutError::MissingPreKey { reason } => reason.clone(),
            CheckoutError::SubsidyRejected { status } => status.clone(),
            other => other.to_string(),
        }
    }
}
