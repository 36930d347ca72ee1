//! # Remote Collaborators
//!
//! The checkout flow coordinates four independent parties plus one event
//! feed. Each is a trait so the orchestrator can be exercised against
//! in-process doubles; [`HttpGateway`] implements all of them over HTTP.
//!
//! ```text
//!                 ┌────────────┐  quote / dual quote
//!                 │  Creator   │◄──────────────────────┐
//!                 └────────────┘                       │
//!  ┌────────────┐  discover     ┌──────────────┐  trigger, keys, sources
//!  │  Registry  │◄──────────────│ Orchestrator │──────────────►┌──────────────┐
//!  └────────────┘               └──────────────┘               │ Local agent  │
//!                                 │        ▲                   └──────┬───────┘
//!                 start/complete  │        │  events (SSE)            │
//!                 /pay            ▼        └──────────────────────────┘
//!                 ┌────────────┐
//!                 │ Advertiser │
//!                 └────────────┘
//! ```
//!
//! The orchestrator never reaches into a collaborator's state; it only
//! issues calls and reads the push stream.

pub mod http;
pub mod stream;
pub mod types;

mod error;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

pub use error::{RemoteError, RemoteResult};
pub use http::HttpGateway;
pub use stream::{EventStreamSupervisor, PushEvent, SseDecoder};
pub use types::{
    AdQuote, AdSession, Attestation, BestSource, BuyRequest, ChunkedBuy, DirectBuy,
    DiscoveredSources, NodeInfo, PeerListing, PreBuyRequest, PreInfo, Quote, SourceCandidate,
    SubsidyPayment, SubsidyReceipt,
};

use crate::catalog::CatalogItem;

/// The content creator's node.
#[async_trait]
pub trait CreatorApi: Send + Sync {
    /// Price and delivery pointer for direct and chunked purchases.
    async fn request_quote(&self, creator_url: &str, content_hash: &str) -> RemoteResult<Quote>;

    /// Nominal and subsidy invoices for an ad-subsidized purchase.
    async fn request_ad_quote(
        &self,
        creator_url: &str,
        content_hash: &str,
        advertiser_url: &str,
    ) -> RemoteResult<AdQuote>;
}

/// The buyer's own node: it pays, fetches, decrypts and reports.
#[async_trait]
pub trait SettlementAgent: Send + Sync {
    async fn pre_info(&self) -> RemoteResult<PreInfo>;

    async fn node_info(&self) -> RemoteResult<NodeInfo>;

    async fn best_source(&self, content_hash: &str) -> RemoteResult<BestSource>;

    async fn discover_sources(&self, content_hash: &str) -> RemoteResult<DiscoveredSources>;

    /// Start a direct, chunked or ad (key-learning) purchase.
    async fn trigger_buy(&self, request: &BuyRequest) -> RemoteResult<serde_json::Value>;

    /// Start a proxy re-encryption purchase.
    async fn trigger_buy_pre(&self, request: &PreBuyRequest) -> RemoteResult<serde_json::Value>;
}

/// The content registry.
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// Every transport peer holding the asset's encrypted blob.
    async fn discover(&self, content_hash: &str) -> RemoteResult<Vec<PeerListing>>;

    async fn listings(&self) -> RemoteResult<Vec<CatalogItem>>;
}

/// A sponsor paying for the buyer's purchase in exchange for attention.
#[async_trait]
pub trait AdvertiserApi: Send + Sync {
    async fn start_session(
        &self,
        advertiser_url: &str,
        campaign_id: &str,
        buyer_pubkey: &str,
    ) -> RemoteResult<AdSession>;

    async fn complete_session(
        &self,
        advertiser_url: &str,
        campaign_id: &str,
        session_id: &str,
        buyer_pubkey: &str,
    ) -> RemoteResult<Attestation>;

    async fn pay(&self, advertiser_url: &str, payment: &SubsidyPayment)
        -> RemoteResult<SubsidyReceipt>;
}

/// Ordered server-pushed events with a bounded replay window.
#[async_trait]
pub trait PushSource: Send + Sync {
    /// The most recent `limit` events, oldest first.
    async fn history(&self, limit: usize) -> RemoteResult<Vec<PushEvent>>;

    /// Live events until the connection drops.
    async fn subscribe(&self) -> RemoteResult<BoxStream<'static, RemoteResult<PushEvent>>>;
}

/// The full set of collaborators a purchase may need.
#[derive(Clone)]
pub struct Collaborators {
    pub creator: Arc<dyn CreatorApi>,
    pub agent: Arc<dyn SettlementAgent>,
    pub registry: Arc<dyn RegistryApi>,
    pub advertiser: Arc<dyn AdvertiserApi>,
}

impl Collaborators {
    /// Every role served by one gateway.
    pub fn from_gateway(gateway: Arc<HttpGateway>) -> Self {
        Self {
            creator: gateway.clone(),
            agent: gateway.clone(),
            registry: gateway.clone(),
            advertiser: gateway,
        }
    }
}
