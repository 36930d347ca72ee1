//! Direct purchase: pay the creator, fetch the whole blob from the creator.

use super::{quoted_hash, DriverContext};
use crate::purchase::error::CheckoutError;
use crate::remote::{BuyRequest, DirectBuy};

pub(super) async fn run(ctx: &DriverContext) -> Result<(), CheckoutError> {
    let creator_url = ctx.creator_url();

    ctx.handle.begin("invoice", "Contacting creator...")?;
    let quote = ctx
        .collaborators
        .creator
        .request_quote(&creator_url, &ctx.item.content_hash)
        .await
        .map_err(|e| CheckoutError::remote("Failed to get invoice", e))?;
    ctx.handle
        .complete("invoice", &format!("{} sats", quote.price_sats))?;

    ctx.handle.begin("pay", "Sending payment...")?;
    let file_name = if quote.file_name.is_empty() {
        ctx.item.display_name()
    } else {
        &quote.file_name
    };
    let request = BuyRequest::Direct(DirectBuy {
        invoice: quote.bolt11.clone(),
        enc_url: format!("{}/api/enc/{}", creator_url, quote.enc_filename),
        hash: quoted_hash(&quote.content_hash, &ctx.item).to_string(),
        output: ctx.output_locator("", file_name),
    });
    ctx.trigger_buy(&request).await
}
