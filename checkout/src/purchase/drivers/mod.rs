//! # Protocol Drivers
//!
//! Each driver runs the synchronous setup leg of one protocol and sends the
//! single trigger that hands the purchase to the local agent. None of them
//! waits for settlement; from the trigger on, pushed events move the steps.
//!
//! | Driver    | Setup leg                                        | Trigger          |
//! |-----------|--------------------------------------------------|------------------|
//! | `direct`  | creator quote                                    | `/api/buy`       |
//! | `pre`     | PRE key, source resolution                       | `/api/buy-pre`   |
//! | `chunked` | registry discovery, creator quote                | `/api/buy`       |
//! | `ad`      | dual quote, ad session, countdown, attestation   | `/api/buy`, then advertiser pay |
//!
//! Drivers report progress through their [`SessionHandle`]. A step begun
//! with [`SessionHandle::begin`] is the one that fails if the driver
//! returns an error.

mod ad;
mod chunked;
mod direct;
mod pre;

use std::sync::Arc;

use super::error::CheckoutError;
use super::mode::{ProtocolMode, PurchaseOptions};
use super::session::SessionHandle;
use super::source::SourceResolver;
use crate::catalog::CatalogItem;
use crate::config::{self, CheckoutConfig};
use crate::remote::{BuyRequest, Collaborators};

/// Everything a driver needs for one purchase.
pub struct DriverContext {
    pub handle: SessionHandle,
    pub item: Arc<CatalogItem>,
    pub mode: ProtocolMode,
    pub options: PurchaseOptions,
    pub collaborators: Collaborators,
    pub config: Arc<CheckoutConfig>,
}

impl DriverContext {
    pub fn creator_url(&self) -> String {
        self.item.creator_url()
    }

    pub fn resolver(&self) -> SourceResolver {
        SourceResolver::new(
            self.collaborators.agent.clone(),
            self.collaborators.registry.clone(),
            &self.config,
        )
    }

    /// A fresh output path on the agent's host. The millisecond timestamp
    /// keeps names sortable, the random suffix keeps them unique.
    pub fn output_locator(&self, tag: &str, file_name: &str) -> String {
        let file_name = if file_name.is_empty() {
            config::FALLBACK_FILE_NAME
        } else {
            file_name
        };
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        format!(
            "{}/{}{}{}-{}-{}",
            self.config.output_dir.trim_end_matches('/'),
            config::OUTPUT_PREFIX,
            tag,
            chrono::Utc::now().timestamp_millis(),
            &nonce[..8],
            file_name
        )
    }

    /// Record the output locator and send the generic buy trigger.
    pub async fn trigger_buy(&self, request: &BuyRequest) -> Result<(), CheckoutError> {
        self.handle.set_output(request.output())?;
        let reply = self
            .collaborators
            .agent
            .trigger_buy(request)
            .await
            .map_err(|e| CheckoutError::remote("Failed to start purchase", e))?;
        tracing::info!(
            epoch = self.handle.epoch(),
            mode = %self.mode,
            output = request.output(),
            %reply,
            "buy triggered"
        );
        Ok(())
    }
}

/// Run the setup leg for `ctx.mode`.
pub async fn drive(ctx: &DriverContext) -> Result<(), CheckoutError> {
    match ctx.mode {
        ProtocolMode::Direct => direct::run(ctx).await,
        ProtocolMode::Pre => pre::run(ctx).await,
        ProtocolMode::Chunked | ProtocolMode::Seeder => chunked::run(ctx).await,
        ProtocolMode::Ad => ad::run(ctx).await,
    }
}

/// The fingerprint the creator quoted, or the listing's own.
fn quoted_hash<'a>(quoted: &'a str, item: &'a CatalogItem) -> &'a str {
    if quoted.is_empty() {
        &item.content_hash
    } else {
        quoted
    }
}
