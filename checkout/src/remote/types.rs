//! Request and response bodies exchanged with remote collaborators.
//!
//! Field names follow the services' JSON exactly. Responses default every
//! optional field so that older or newer peers with slightly different
//! payloads still decode; the drivers decide what is actually required.

use serde::{Deserialize, Serialize};

use crate::catalog::CatalogItem;

// ---------------------------------------------------------------------------
// Creator
// ---------------------------------------------------------------------------

/// A creator's price and delivery pointer for one asset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Quote {
    /// Payment request the agent should pay.
    pub bolt11: String,
    /// Name of the encrypted blob under `/api/enc/`.
    pub enc_filename: String,
    pub file_name: String,
    pub content_hash: String,
    pub encrypted_hash: Option<String>,
    pub price_sats: u64,
}

/// The two invoices of an ad-subsidized purchase.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdQuote {
    /// Nominal invoice the buyer pays to learn the content key.
    pub buyer_invoice: String,
    /// Full-price invoice the advertiser pays.
    pub advertiser_invoice: String,
    pub price_sats: u64,
    pub campaign_id: String,
    pub enc_filename: String,
    pub file_name: String,
    pub content_hash: String,
}

// ---------------------------------------------------------------------------
// Local settlement agent
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreInfo {
    pub buyer_pk_hex: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeInfo {
    pub node_id: String,
}

/// The agent's single top-ranked source for an asset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BestSource {
    /// `"seeder"` or `"creator"`.
    pub source: String,
    pub source_url: Option<String>,
    pub alias: Option<String>,
    pub latency_ms: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceCandidate {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub alias: Option<String>,
    pub latency_ms: Option<u64>,
    pub p2p: bool,
}

/// Every source the agent knows for an asset, with its ICS strategy.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveredSources {
    pub ics_mode: Option<String>,
    pub sources: Vec<SourceCandidate>,
    pub complete_sources: u64,
}

/// Trigger body for `/api/buy` in direct and ad modes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectBuy {
    pub invoice: String,
    pub enc_url: String,
    pub hash: String,
    pub output: String,
}

/// Trigger body for `/api/buy` in chunked and seeder modes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkedBuy {
    pub mode: String,
    pub content_invoice: String,
    pub encrypted_hash: String,
    pub hash: String,
    pub output: String,
    pub seeder_urls: Vec<String>,
}

/// The generic buy trigger accepts either shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BuyRequest {
    Chunked(ChunkedBuy),
    Direct(DirectBuy),
}

impl BuyRequest {
    pub fn output(&self) -> &str {
        match self {
            BuyRequest::Chunked(b) => &b.output,
            BuyRequest::Direct(b) => &b.output,
        }
    }
}

/// Trigger body for `/api/buy-pre`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreBuyRequest {
    pub creator_url: String,
    pub content_hash: String,
    /// `None` means creator-direct (or let the agent pick, in smart mode).
    pub seeder_url: Option<String>,
    pub output: String,
    pub source_mode: String,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerListing {
    pub seeder_address: String,
}

/// Registry discovery answer. Older registries call the list `items`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryResponse {
    pub seeders: Vec<PeerListing>,
    pub items: Vec<PeerListing>,
}

impl DiscoveryResponse {
    pub fn into_peers(self) -> Vec<PeerListing> {
        if self.seeders.is_empty() {
            self.items
        } else {
            self.seeders
        }
    }
}

/// Catalog answer; the registry has shipped three shapes over time.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ListingsResponse {
    Items { items: Vec<CatalogItem> },
    Listings { listings: Vec<CatalogItem> },
    Bare(Vec<CatalogItem>),
}

impl ListingsResponse {
    pub fn into_items(self) -> Vec<CatalogItem> {
        match self {
            ListingsResponse::Items { items } => items,
            ListingsResponse::Listings { listings } => listings,
            ListingsResponse::Bare(items) => items,
        }
    }
}

// ---------------------------------------------------------------------------
// Advertiser
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdSession {
    pub session_id: String,
    /// Declared session length; the client counts this down itself.
    pub duration_ms: Option<u64>,
}

/// Proof from the advertiser that the buyer sat through the session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attestation {
    pub token: String,
    pub payload: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubsidyPayment {
    pub bolt11_invoice: String,
    pub attestation_token: String,
    pub attestation_payload: serde_json::Value,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubsidyReceipt {
    pub status: Option<String>,
}
