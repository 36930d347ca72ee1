//! Catalog listings as the registry publishes them.
//!
//! A [`CatalogItem`] is a snapshot. Sessions hold it behind an `Arc` and
//! never mutate it; if the listing changes upstream, the next fetch produces
//! a new snapshot.

use serde::{Deserialize, Serialize};

use crate::config;

/// Whether playback of a listing needs an attested device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackPolicy {
    #[default]
    None,
    DeviceRecommended,
    DeviceRequired,
}

impl PlaybackPolicy {
    /// Notice shown to the buyer when selecting a listing, if any.
    pub fn notice(&self) -> Option<&'static str> {
        match self {
            PlaybackPolicy::None => None,
            PlaybackPolicy::DeviceRecommended => {
                Some("This content is best viewed on a verified TEE device.")
            }
            PlaybackPolicy::DeviceRequired => {
                Some("This content requires a verified TEE device for playback.")
            }
        }
    }
}

/// One purchasable asset from the registry catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Plaintext content fingerprint, H(F). Primary key everywhere.
    pub content_hash: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub size_bytes: u64,
    /// Price in satoshis.
    #[serde(default)]
    pub price_sats: u64,
    /// Creator node address; may lack a scheme.
    #[serde(default)]
    pub creator_address: String,
    /// PRE ciphertext component, present when the listing supports PRE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_c1_hex: Option<String>,
    /// Fingerprint of the encrypted blob, H(E).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_hash: Option<String>,
    #[serde(default)]
    pub playback_policy: PlaybackPolicy,
}

impl CatalogItem {
    /// Creator base URL with a scheme, or an empty string if unknown.
    pub fn creator_url(&self) -> String {
        config::ensure_http(&self.creator_address)
    }

    /// File name with the fallback applied.
    pub fn display_name(&self) -> &str {
        if self.file_name.is_empty() {
            config::FALLBACK_FILE_NAME
        } else {
            &self.file_name
        }
    }

    pub fn supports_pre(&self) -> bool {
        self.pre_c1_hex.as_deref().is_some_and(|c1| !c1.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_registry_listing_with_missing_fields() {
        let item: CatalogItem = serde_json::from_str(
            r#"{"content_hash":"ab12","price_sats":500,"creator_address":"1.2.3.4:3000",
                "playback_policy":"device_required"}"#,
        )
        .unwrap();
        assert_eq!(item.price_sats, 500);
        assert_eq!(item.creator_url(), "http://1.2.3.4:3000");
        assert_eq!(item.display_name(), "content");
        assert_eq!(item.playback_policy, PlaybackPolicy::DeviceRequired);
        assert!(item.playback_policy.notice().is_some());
        assert!(!item.supports_pre());
    }

    #[test]
    fn no_policy_means_no_notice() {
        assert_eq!(PlaybackPolicy::default().notice(), None);
    }
}
