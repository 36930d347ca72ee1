//! # HTTP Gateway
//!
//! A single `reqwest` client serving every collaborator role. Creator and
//! advertiser URLs come with each call (they vary per listing and per
//! campaign); the agent and registry URLs are fixed at construction.
//!
//! All services speak JSON and signal business failures in-band with an
//! `{"error": "..."}` body, sometimes with a 200 status. That message is
//! what the buyer sees, so it wins over the HTTP status.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;

use super::stream::{PushEvent, SseDecoder};
use super::types::{
    AdQuote, AdSession, Attestation, BestSource, BuyRequest, DiscoveredSources,
    DiscoveryResponse, ListingsResponse, NodeInfo, PeerListing, PreBuyRequest, PreInfo, Quote,
    SubsidyPayment, SubsidyReceipt,
};
use super::{
    AdvertiserApi, CreatorApi, PushSource, RegistryApi, RemoteError, RemoteResult,
    SettlementAgent,
};
use crate::catalog::CatalogItem;
use crate::config::{ensure_http, CheckoutConfig};

/// HTTP implementation of every collaborator trait.
#[derive(Clone, Debug)]
pub struct HttpGateway {
    client: Client,
    node_url: String,
    registry_url: String,
}

impl HttpGateway {
    pub fn new(config: &CheckoutConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, config: &CheckoutConfig) -> Self {
        Self {
            client,
            node_url: ensure_http(&config.node_url),
            registry_url: ensure_http(&config.registry_url),
        }
    }

    pub fn node_url(&self) -> &str {
        &self.node_url
    }

    fn endpoint(base: &str, role: &str, path: &str) -> RemoteResult<String> {
        let base = ensure_http(base);
        if base.is_empty() {
            return Err(RemoteError::InvalidUrl(format!("{} URL is not configured", role)));
        }
        Ok(format!("{}{}", base, path))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> RemoteResult<T> {
        tracing::debug!(%url, "GET");
        let response = self.client.get(&url).send().await?;
        Self::decode(url, response).await
    }

    async fn post_json<B, T>(&self, url: String, body: &B) -> RemoteResult<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        tracing::debug!(%url, "POST");
        let response = self.client.post(&url).json(body).send().await?;
        Self::decode(url, response).await
    }

    /// In-band `error` first, then HTTP status, then shape.
    async fn decode<T: DeserializeOwned>(
        url: String,
        response: reqwest::Response,
    ) -> RemoteResult<T> {
        let status = response.status();
        let body = response.bytes().await?;
        let value: Option<serde_json::Value> = serde_json::from_slice(&body).ok();

        if let Some(message) = value
            .as_ref()
            .and_then(|v| v.get("error"))
            .and_then(|e| e.as_str())
        {
            return Err(RemoteError::Rejected(message.to_string()));
        }
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let value =
            value.ok_or_else(|| RemoteError::Decode(format!("non-JSON body from {}", url)))?;
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl CreatorApi for HttpGateway {
    async fn request_quote(&self, creator_url: &str, content_hash: &str) -> RemoteResult<Quote> {
        let path = format!("/api/invoice/{}", content_hash);
        let url = Self::endpoint(creator_url, "creator", &path)?;
        self.post_json(url, &serde_json::json!({})).await
    }

    async fn request_ad_quote(
        &self,
        creator_url: &str,
        content_hash: &str,
        advertiser_url: &str,
    ) -> RemoteResult<AdQuote> {
        let url =
            Self::endpoint(creator_url, "creator", &format!("/api/ad-invoice/{}", content_hash))?;
        self.post_json(url, &serde_json::json!({ "advertiser_url": advertiser_url }))
            .await
    }
}

#[async_trait]
impl SettlementAgent for HttpGateway {
    async fn pre_info(&self) -> RemoteResult<PreInfo> {
        self.get_json(Self::endpoint(&self.node_url, "node", "/api/pre-info")?)
            .await
    }

    async fn node_info(&self) -> RemoteResult<NodeInfo> {
        self.get_json(Self::endpoint(&self.node_url, "node", "/api/info")?)
            .await
    }

    async fn best_source(&self, content_hash: &str) -> RemoteResult<BestSource> {
        let path = format!("/api/best-source/{}", content_hash);
        self.get_json(Self::endpoint(&self.node_url, "node", &path)?)
            .await
    }

    async fn discover_sources(&self, content_hash: &str) -> RemoteResult<DiscoveredSources> {
        let path = format!("/api/discover-sources/{}", content_hash);
        self.get_json(Self::endpoint(&self.node_url, "node", &path)?)
            .await
    }

    async fn trigger_buy(&self, request: &BuyRequest) -> RemoteResult<serde_json::Value> {
        let url = Self::endpoint(&self.node_url, "node", "/api/buy")?;
        self.post_json(url, request).await
    }

    async fn trigger_buy_pre(&self, request: &PreBuyRequest) -> RemoteResult<serde_json::Value> {
        let url = Self::endpoint(&self.node_url, "node", "/api/buy-pre")?;
        self.post_json(url, request).await
    }
}

#[async_trait]
impl RegistryApi for HttpGateway {
    async fn discover(&self, content_hash: &str) -> RemoteResult<Vec<PeerListing>> {
        let path = format!("/api/discover/{}", content_hash);
        let response: DiscoveryResponse = self
            .get_json(Self::endpoint(&self.registry_url, "registry", &path)?)
            .await?;
        Ok(response.into_peers())
    }

    async fn listings(&self) -> RemoteResult<Vec<CatalogItem>> {
        let response: ListingsResponse = self
            .get_json(Self::endpoint(&self.registry_url, "registry", "/api/listings")?)
            .await?;
        Ok(response.into_items())
    }
}

#[async_trait]
impl AdvertiserApi for HttpGateway {
    async fn start_session(
        &self,
        advertiser_url: &str,
        campaign_id: &str,
        buyer_pubkey: &str,
    ) -> RemoteResult<AdSession> {
        let path = format!("/api/campaigns/{}/start", campaign_id);
        let url = Self::endpoint(advertiser_url, "advertiser", &path)?;
        self.post_json(url, &serde_json::json!({ "buyer_pubkey": buyer_pubkey }))
            .await
    }

    async fn complete_session(
        &self,
        advertiser_url: &str,
        campaign_id: &str,
        session_id: &str,
        buyer_pubkey: &str,
    ) -> RemoteResult<Attestation> {
        let path = format!("/api/campaigns/{}/complete", campaign_id);
        let url = Self::endpoint(advertiser_url, "advertiser", &path)?;
        let body = serde_json::json!({ "session_id": session_id, "buyer_pubkey": buyer_pubkey });
        self.post_json(url, &body).await
    }

    async fn pay(
        &self,
        advertiser_url: &str,
        payment: &SubsidyPayment,
    ) -> RemoteResult<SubsidyReceipt> {
        let url = Self::endpoint(advertiser_url, "advertiser", "/api/campaigns/pay")?;
        self.post_json(url, payment).await
    }
}

#[async_trait]
impl PushSource for HttpGateway {
    async fn history(&self, limit: usize) -> RemoteResult<Vec<PushEvent>> {
        let path = format!("/api/events/history?limit={}", limit);
        self.get_json(Self::endpoint(&self.node_url, "node", &path)?)
            .await
    }

    async fn subscribe(&self) -> RemoteResult<BoxStream<'static, RemoteResult<PushEvent>>> {
        let url = Self::endpoint(&self.node_url, "node", "/api/events")?;
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RemoteError::Status {
                status: response.status().as_u16(),
                url,
            });
        }

        let bytes = Box::pin(response.bytes_stream());
        let events = futures::stream::unfold(
            (bytes, SseDecoder::new(), VecDeque::new()),
            |(mut bytes, mut decoder, mut pending)| async move {
                loop {
                    if let Some(event) = pending.pop_front() {
                        return Some((Ok(event), (bytes, decoder, pending)));
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => {
                            for frame in decoder.push(&chunk) {
                                match frame.into_event() {
                                    Ok(event) => pending.push_back(event),
                                    Err(e) => tracing::warn!(error = %e, "undecodable push event"),
                                }
                            }
                        }
                        Some(Err(e)) => {
                            return Some((Err(RemoteError::from(e)), (bytes, decoder, pending)))
                        }
                        None => return None,
                    }
                }
            },
        );

        Ok(events.boxed())
    }
}
