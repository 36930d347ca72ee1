//! Protocol modes and the purchase options that go with them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::CheckoutError;

/// Which settlement/delivery protocol a purchase uses. Fixed per session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolMode {
    /// Pay the creator, fetch the encrypted blob from the creator.
    Direct,
    /// Proxy re-encryption: the key travels re-encrypted to the buyer.
    Pre,
    /// Creator sells the key, transport peers sell the chunks.
    Chunked,
    /// Same wire protocol as `Chunked`, seeded content only.
    Seeder,
    /// An advertiser pays the price in exchange for a viewing session.
    Ad,
}

/// The step plans. Chunked and seeder share one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlanKind {
    Direct,
    Pre,
    Chunked,
    Ad,
}

impl ProtocolMode {
    pub const ALL: [ProtocolMode; 5] = [
        ProtocolMode::Direct,
        ProtocolMode::Pre,
        ProtocolMode::Chunked,
        ProtocolMode::Seeder,
        ProtocolMode::Ad,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolMode::Direct => "direct",
            ProtocolMode::Pre => "pre",
            ProtocolMode::Chunked => "chunked",
            ProtocolMode::Seeder => "seeder",
            ProtocolMode::Ad => "ad",
        }
    }

    pub fn plan_kind(&self) -> PlanKind {
        match self {
            ProtocolMode::Direct => PlanKind::Direct,
            ProtocolMode::Pre => PlanKind::Pre,
            ProtocolMode::Chunked | ProtocolMode::Seeder => PlanKind::Chunked,
            ProtocolMode::Ad => PlanKind::Ad,
        }
    }

    /// Whether the purchase needs transport peers before it can pay.
    pub fn requires_transport_peers(&self) -> bool {
        matches!(self, ProtocolMode::Chunked | ProtocolMode::Seeder)
    }

    /// Label for listings and the collection view.
    pub fn label(&self) -> &'static str {
        match self {
            ProtocolMode::Direct => "Direct",
            ProtocolMode::Pre => "PRE",
            ProtocolMode::Chunked => "Chunked",
            ProtocolMode::Seeder => "Seeder",
            ProtocolMode::Ad => "Ad-subsidized",
        }
    }
}

impl fmt::Display for ProtocolMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolMode {
    type Err = CheckoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ProtocolMode::ALL
            .into_iter()
            .find(|m| m.as_str() == wanted)
            .ok_or_else(|| CheckoutError::Input(format!("unknown protocol mode: {}", s)))
    }
}

/// Where a PRE purchase should download from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SourceMode {
    /// Let the agent rank and pick.
    #[default]
    Smart,
    /// Go straight to the creator.
    Creator,
    /// A specific transport peer the buyer picked.
    Peer(String),
}

impl SourceMode {
    /// Tag sent to the agent with the PRE trigger.
    pub fn tag(&self) -> &str {
        match self {
            SourceMode::Smart => "smart",
            SourceMode::Creator => "creator",
            SourceMode::Peer(url) => url,
        }
    }
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for SourceMode {
    type Err = CheckoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "smart" => Ok(SourceMode::Smart),
            "creator" => Ok(SourceMode::Creator),
            peer => Ok(SourceMode::Peer(peer.to_string())),
        }
    }
}

/// Buyer choices that accompany a purchase besides the mode.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PurchaseOptions {
    /// PRE source selection.
    pub source: SourceMode,
    /// Advertiser endpoint; required in ad mode.
    pub advertiser_url: Option<String>,
}
