//! Proxy re-encryption purchase.
//!
//! The buyer's PRE public key goes to the creator (via the agent), the
//! content key comes back re-encrypted to it. The only client-side choice
//! is where the ciphertext is downloaded from.

use super::DriverContext;
use crate::purchase::error::CheckoutError;
use crate::purchase::mode::SourceMode;
use crate::purchase::source::ResolvedSource;
use crate::remote::PreBuyRequest;

pub(super) async fn run(ctx: &DriverContext) -> Result<(), CheckoutError> {
    let agent = &ctx.collaborators.agent;
    let content_hash = &ctx.item.content_hash;

    ctx.handle.begin("preinfo", "Fetching G2 public key...")?;
    let buyer_pk = buyer_pre_key(ctx).await?;
    ctx.handle.complete(
        "preinfo",
        &format!("G2 pk: {}...", &buyer_pk[..buyer_pk.len().min(16)]),
    )?;

    let source_mode = &ctx.options.source;
    ctx.handle.begin(
        "prepurchase",
        &format!("Contacting creator... (source: {})", source_mode),
    )?;

    let resolved = match source_mode {
        SourceMode::Smart => None,
        SourceMode::Creator => Some(ResolvedSource::Creator {
            fallback_reason: None,
        }),
        SourceMode::Peer(_) => {
            let resolved = ctx.resolver().best_source(content_hash).await;
            ctx.handle
                .progress("prepurchase", &format!("Source: {}", resolved.describe()))?;
            Some(resolved)
        }
    };
    let via = resolved
        .as_ref()
        .map(ResolvedSource::describe)
        .unwrap_or_else(|| "smart routing".to_string());
    ctx.handle.complete(
        "prepurchase",
        &format!("{} sats via {}", ctx.item.price_sats, via),
    )?;

    ctx.handle.begin("pay", "Initiating PRE payment...")?;
    let request = PreBuyRequest {
        creator_url: ctx.creator_url(),
        content_hash: content_hash.clone(),
        seeder_url: resolved
            .as_ref()
            .and_then(ResolvedSource::peer_url)
            .map(str::to_string),
        output: ctx.output_locator("pre-", ctx.item.display_name()),
        source_mode: source_mode.tag().to_string(),
    };
    ctx.handle.set_output(&request.output)?;

    let reply = agent
        .trigger_buy_pre(&request)
        .await
        .map_err(|e| CheckoutError::remote("PRE purchase failed", e))?;
    tracing::info!(
        epoch = ctx.handle.epoch(),
        seeder = request.seeder_url.as_deref().unwrap_or("creator"),
        output = %request.output,
        %reply,
        "PRE buy triggered"
    );
    Ok(())
}

/// The agent's PRE public key, hex-encoded. Agents built without PRE
/// support answer without one.
async fn buyer_pre_key(ctx: &DriverContext) -> Result<String, CheckoutError> {
    let info = ctx
        .collaborators
        .agent
        .pre_info()
        .await
        .map_err(|e| CheckoutError::MissingPreKey {
            reason: e.to_string(),
        })?;

    let key = info
        .buyer_pk_hex
        .filter(|k| !k.is_empty())
        .ok_or_else(|| CheckoutError::MissingPreKey {
            reason: "No buyer_pk_hex in response".to_string(),
        })?;
    hex::decode(&key).map_err(|e| CheckoutError::MissingPreKey {
        reason: format!("malformed buyer_pk_hex: {}", e),
    })?;
    Ok(key)
}
