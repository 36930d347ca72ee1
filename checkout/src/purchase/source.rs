//! # Source Resolution
//!
//! Two lookups that look alike and must not be confused:
//!
//! | Lookup        | Asks       | Answer              | On error/timeout      |
//! |---------------|------------|---------------------|-----------------------|
//! | best source   | local agent | one ranked source  | creator-direct        |
//! | peer discovery | registry  | every transport peer | purchase fails       |
//!
//! PRE can always fall back to the creator, so a slow ranking only costs a
//! little bandwidth. Chunked delivery cannot start without peers, so an
//! empty or unreachable registry ends the purchase before any money moves.

use std::sync::Arc;
use std::time::Duration;

use super::error::CheckoutError;
use crate::config::{ensure_http, CheckoutConfig};
use crate::remote::{RegistryApi, RemoteError, SettlementAgent};

/// Outcome of a best-source lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolvedSource {
    /// A transport peer the agent ranked first.
    Peer {
        url: String,
        alias: Option<String>,
        latency_ms: Option<u64>,
    },
    /// Download from the creator. `fallback_reason` is set when this was
    /// not the agent's choice but the result of a failed lookup.
    Creator { fallback_reason: Option<String> },
}

impl ResolvedSource {
    pub fn peer_url(&self) -> Option<&str> {
        match self {
            ResolvedSource::Peer { url, .. } => Some(url),
            ResolvedSource::Creator { .. } => None,
        }
    }

    /// Short description for the step detail.
    pub fn describe(&self) -> String {
        match self {
            ResolvedSource::Peer {
                url,
                alias,
                latency_ms,
            } => {
                let name = alias.as_deref().unwrap_or(url);
                match latency_ms {
                    Some(ms) => format!("seeder {} ({}ms)", name, ms),
                    None => format!("seeder {}", name),
                }
            }
            ResolvedSource::Creator {
                fallback_reason: None,
            } => "creator".to_string(),
            ResolvedSource::Creator {
                fallback_reason: Some(reason),
            } => format!("creator (fallback: {})", reason),
        }
    }
}

/// Display summary of every source the agent knows for an asset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceSummary {
    pub ics_mode: String,
    pub total: usize,
    pub complete: u64,
    /// Seeder candidates, as `(url, label)`.
    pub seeders: Vec<(String, String)>,
}

impl SourceSummary {
    pub fn headline(&self) -> String {
        format!(
            "ICS mode: {} | {} sources ({} complete)",
            self.ics_mode, self.total, self.complete
        )
    }
}

pub struct SourceResolver {
    agent: Arc<dyn SettlementAgent>,
    registry: Arc<dyn RegistryApi>,
    best_source_timeout: Duration,
    discovery_timeout: Duration,
}

impl SourceResolver {
    pub fn new(
        agent: Arc<dyn SettlementAgent>,
        registry: Arc<dyn RegistryApi>,
        config: &CheckoutConfig,
    ) -> Self {
        Self {
            agent,
            registry,
            best_source_timeout: config.best_source_timeout(),
            discovery_timeout: config.discovery_timeout(),
        }
    }

    /// Single ranked source for `content_hash`. Never fails: any problem
    /// resolves to the creator with the reason attached.
    pub async fn best_source(&self, content_hash: &str) -> ResolvedSource {
        let lookup = tokio::time::timeout(
            self.best_source_timeout,
            self.agent.best_source(content_hash),
        )
        .await;

        let fallback = |reason: String| {
            tracing::info!(content_hash, %reason, "best-source lookup failed, using creator");
            ResolvedSource::Creator {
                fallback_reason: Some(reason),
            }
        };

        match lookup {
            Err(_) => fallback(
                RemoteError::Timeout(self.best_source_timeout.as_millis() as u64).to_string(),
            ),
            Ok(Err(e)) => fallback(e.to_string()),
            Ok(Ok(best)) => match (best.source.as_str(), best.source_url.as_deref()) {
                ("seeder", Some(url)) if !url.is_empty() => ResolvedSource::Peer {
                    url: ensure_http(url),
                    alias: best.alias,
                    latency_ms: best.latency_ms,
                },
                _ => ResolvedSource::Creator {
                    fallback_reason: None,
                },
            },
        }
    }

    /// Every transport peer holding `content_hash`, as base URLs.
    ///
    /// Errors, timeouts and empty answers are all [`CheckoutError::NoSeeders`].
    pub async fn discover_peers(&self, content_hash: &str) -> Result<Vec<String>, CheckoutError> {
        let lookup =
            tokio::time::timeout(self.discovery_timeout, self.registry.discover(content_hash))
                .await;

        let listings = match lookup {
            Err(_) => {
                return Err(CheckoutError::NoSeeders {
                    reason: RemoteError::Timeout(self.discovery_timeout.as_millis() as u64)
                        .to_string(),
                })
            }
            Ok(Err(e)) => {
                return Err(CheckoutError::NoSeeders {
                    reason: e.to_string(),
                })
            }
            Ok(Ok(listings)) => listings,
        };

        let mut peers: Vec<String> = listings
            .iter()
            .map(|l| ensure_http(&l.seeder_address))
            .filter(|url| !url.is_empty())
            .collect();
        peers.dedup();

        if peers.is_empty() {
            return Err(CheckoutError::NoSeeders {
                reason: "registry returned no seeders".to_string(),
            });
        }
        tracing::debug!(content_hash, count = peers.len(), "transport peers discovered");
        Ok(peers)
    }

    /// ICS summary for display. Unlike the purchase lookups this surfaces
    /// errors; callers decide whether to show them.
    pub async fn describe_sources(
        &self,
        content_hash: &str,
    ) -> Result<SourceSummary, CheckoutError> {
        let found = self
            .agent
            .discover_sources(content_hash)
            .await
            .map_err(|e| CheckoutError::remote("Failed to discover sources", e))?;

        let seeders = found
            .sources
            .iter()
            .filter(|s| s.kind == "seeder")
            .map(|s| {
                let name = s.alias.as_deref().unwrap_or(&s.url);
                let latency = s
                    .latency_ms
                    .map(|ms| format!("{}ms", ms))
                    .unwrap_or_else(|| "?ms".to_string());
                let label = if s.p2p {
                    format!("{} ({}, P2P)", name, latency)
                } else {
                    format!("{} ({})", name, latency)
                };
                (ensure_http(&s.url), label)
            })
            .collect();

        Ok(SourceSummary {
            ics_mode: found
                .ics_mode
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "RELEASE".to_string()),
            total: found.sources.len(),
            complete: found.complete_sources,
            seeders,
        })
    }
}
