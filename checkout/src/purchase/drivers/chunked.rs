//! Chunked and seeder purchases: the creator sells the content key, the
//! transport peers sell the chunks.
//!
//! Peers are discovered before anything else. Without them there is
//! nothing to download from, so the purchase stops before the creator is
//! even asked for a quote.

use super::{quoted_hash, DriverContext};
use crate::purchase::error::CheckoutError;
use crate::remote::{BuyRequest, ChunkedBuy};

pub(super) async fn run(ctx: &DriverContext) -> Result<(), CheckoutError> {
    let content_hash = &ctx.item.content_hash;

    let seeder_urls = if ctx.mode.requires_transport_peers() {
        ctx.resolver().discover_peers(content_hash).await?
    } else {
        Vec::new()
    };

    ctx.handle.begin("invoice", "Contacting creator...")?;
    let quote = ctx
        .collaborators
        .creator
        .request_quote(&ctx.item.creator_url(), content_hash)
        .await
        .map_err(|e| CheckoutError::remote("Failed to get invoice", e))?;
    ctx.handle
        .complete("invoice", &format!("{} sats", quote.price_sats))?;

    ctx.handle.begin(
        "cpay",
        &format!("Starting... ({} seeders)", seeder_urls.len()),
    )?;
    let encrypted_hash = quote
        .encrypted_hash
        .clone()
        .filter(|h| !h.is_empty())
        .or_else(|| ctx.item.encrypted_hash.clone())
        .unwrap_or_default();

    let request = BuyRequest::Chunked(ChunkedBuy {
        mode: ctx.mode.as_str().to_string(),
        content_invoice: quote.bolt11.clone(),
        encrypted_hash,
        hash: quoted_hash(&quote.content_hash, &ctx.item).to_string(),
        output: ctx.output_locator("", ctx.item.display_name()),
        seeder_urls,
    });
    ctx.trigger_buy(&request).await
}
