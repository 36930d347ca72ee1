//! Ad-subsidized purchase.
//!
//! ```text
//!   creator ── dual quote ──► buyer ── start ──► advertiser
//!                               │  countdown (client-timed)
//!                               ├── complete ──► attestation
//!                               ├── trigger nominal invoice (learn K)
//!                               └── pay(subsidy invoice, attestation) ──► advertiser
//! ```
//!
//! The countdown is the one place the client itself waits on a clock. It
//! always runs to zero before the attestation is requested; the advertiser
//! only decides how long it is, up to the configured cap.

use std::time::Duration;

use super::{quoted_hash, DriverContext};
use crate::config::{ensure_http, AD_TICK, DEFAULT_AD_SESSION, SUBSIDY_SENT_STATUS};
use crate::purchase::error::CheckoutError;
use crate::remote::{BuyRequest, DirectBuy, SubsidyPayment};

pub(super) async fn run(ctx: &DriverContext) -> Result<(), CheckoutError> {
    let advertiser_url = ctx
        .options
        .advertiser_url
        .as_deref()
        .map(ensure_http)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| CheckoutError::Input("Advertiser URL required".to_string()))?;
    let creator_url = ctx.creator_url();
    let advertiser = &ctx.collaborators.advertiser;

    ctx.handle
        .begin("adinv", "Requesting invoices from creator...")?;
    let quote = ctx
        .collaborators
        .creator
        .request_ad_quote(&creator_url, &ctx.item.content_hash, &advertiser_url)
        .await
        .map_err(|e| CheckoutError::remote("Failed to get ad invoices", e))?;
    ctx.handle.complete(
        "adinv",
        &format!("Two invoices received (1 sat + {} sats)", quote.price_sats),
    )?;

    let buyer_pubkey = match ctx.collaborators.agent.node_info().await {
        Ok(info) => info.node_id,
        Err(e) => {
            tracing::debug!(error = %e, "node info unavailable, starting session anonymously");
            String::new()
        }
    };

    ctx.handle.begin("adwatch", "Starting ad session...")?;
    let session = advertiser
        .start_session(&advertiser_url, &quote.campaign_id, &buyer_pubkey)
        .await
        .map_err(|e| CheckoutError::remote("Failed to start ad session", e))?;

    let ticks = countdown_ticks(session.duration_ms, ctx.config.max_ad_session());
    watch(ctx, ticks).await?;
    ctx.handle
        .complete("adwatch", &format!("Ad viewed ({}s)", ticks))?;

    ctx.handle.begin("adattest", "Requesting token...")?;
    let attestation = advertiser
        .complete_session(
            &advertiser_url,
            &quote.campaign_id,
            &session.session_id,
            &buyer_pubkey,
        )
        .await
        .map_err(|e| CheckoutError::remote("Failed to obtain attestation", e))?;
    ctx.handle.complete("adattest", "Token received")?;

    ctx.handle.begin("keypay", "Paying 1 sat...")?;
    let file_name = if quote.file_name.is_empty() {
        ctx.item.display_name()
    } else {
        &quote.file_name
    };
    let request = BuyRequest::Direct(DirectBuy {
        invoice: quote.buyer_invoice.clone(),
        enc_url: format!("{}/api/enc/{}", creator_url, quote.enc_filename),
        hash: quoted_hash(&quote.content_hash, &ctx.item).to_string(),
        output: ctx.output_locator("", file_name),
    });
    ctx.trigger_buy(&request).await?;

    ctx.handle.begin(
        "adpay",
        &format!("Advertiser paying {} sats...", quote.price_sats),
    )?;
    let receipt = advertiser
        .pay(
            &advertiser_url,
            &SubsidyPayment {
                bolt11_invoice: quote.advertiser_invoice.clone(),
                attestation_token: attestation.token,
                attestation_payload: attestation.payload,
            },
        )
        .await
        .map_err(|e| CheckoutError::remote("Advertiser subsidy failed", e))?;

    match receipt.status.as_deref() {
        Some(SUBSIDY_SENT_STATUS) => {
            ctx.handle.complete("adpay", "Subsidy paid (K_ad, not K)")?;
            ctx.handle.begin("adhtlc", "Settling...")?;
            Ok(())
        }
        other => Err(CheckoutError::SubsidyRejected {
            status: other
                .filter(|s| !s.is_empty())
                .unwrap_or("Unknown error")
                .to_string(),
        }),
    }
}

/// Whole seconds to count down: the declared length (default when absent
/// or zero), capped, rounded up.
fn countdown_ticks(declared_ms: Option<u64>, cap: Duration) -> u64 {
    let declared = match declared_ms {
        Some(ms) if ms > 0 => Duration::from_millis(ms),
        _ => DEFAULT_AD_SESSION,
    };
    let length = declared.min(cap).max(AD_TICK);
    let tick_ms = AD_TICK.as_millis() as u64;
    (length.as_millis() as u64).div_ceil(tick_ms)
}

async fn watch(ctx: &DriverContext, ticks: u64) -> Result<(), CheckoutError> {
    tracing::debug!(epoch = ctx.handle.epoch(), ticks, "ad countdown started");
    for remaining in (0..ticks).rev() {
        tokio::time::sleep(AD_TICK).await;
        let detail = if remaining > 0 {
            format!("{}s remaining", remaining)
        } else {
            "Complete".to_string()
        };
        ctx.handle.progress("adwatch", &detail)?;
    }
    Ok(())
}
