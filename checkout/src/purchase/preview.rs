//! Content preview for a freshly saved purchase.
//!
//! The agent serves decrypted output under `/api/decrypted/{file}`. Which
//! player fits is decided by extension alone.

use serde::{Deserialize, Serialize};

use crate::config::{self, ensure_http};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewKind {
    Audio,
    Video,
    Image,
    Pdf,
    /// No inline viewer; offer the file for download.
    Download,
}

impl PreviewKind {
    pub fn from_file_name(file_name: &str) -> Self {
        let ext = match file_name.rsplit_once('.') {
            Some((_, ext)) => ext.to_ascii_lowercase(),
            None => return PreviewKind::Download,
        };
        let ext = ext.as_str();
        if matches_any(config::AUDIO_EXTENSIONS, ext) {
            PreviewKind::Audio
        } else if matches_any(config::VIDEO_EXTENSIONS, ext) {
            PreviewKind::Video
        } else if matches_any(config::IMAGE_EXTENSIONS, ext) {
            PreviewKind::Image
        } else if ext == "pdf" {
            PreviewKind::Pdf
        } else {
            PreviewKind::Download
        }
    }
}

fn matches_any(set: &[&str], ext: &str) -> bool {
    set.iter().any(|candidate| *candidate == ext)
}

/// Where and how to show a saved file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preview {
    pub url: String,
    pub file_name: String,
    pub kind: PreviewKind,
}

/// Resolve a preview from a `FILE_SAVED` payload. `None` when the agent
/// URL is unknown or the payload names no file.
pub fn resolve(node_url: &str, saved: &serde_json::Value) -> Option<Preview> {
    let node = ensure_http(node_url);
    if node.is_empty() {
        return None;
    }
    let path = ["output", "path"]
        .iter()
        .filter_map(|k| saved.get(*k).and_then(|v| v.as_str()))
        .find(|s| !s.is_empty())?;
    let file_name = path.rsplit('/').next().filter(|s| !s.is_empty())?;

    Some(Preview {
        url: format!("{}/api/decrypted/{}", node, file_name),
        file_name: file_name.to_string(),
        kind: PreviewKind::from_file_name(file_name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kinds_follow_extension() {
        assert_eq!(PreviewKind::from_file_name("a.FLAC"), PreviewKind::Audio);
        assert_eq!(PreviewKind::from_file_name("a.mov"), PreviewKind::Video);
        assert_eq!(PreviewKind::from_file_name("a.svg"), PreviewKind::Image);
        assert_eq!(PreviewKind::from_file_name("a.pdf"), PreviewKind::Pdf);
        assert_eq!(PreviewKind::from_file_name("archive.tar.zst"), PreviewKind::Download);
        assert_eq!(PreviewKind::from_file_name("README"), PreviewKind::Download);
    }

    #[test]
    fn resolve_uses_last_path_segment() {
        let p = resolve("127.0.0.1:3000", &json!({ "path": "/tmp/decrypted-9-song.mp3" })).unwrap();
        assert_eq!(p.url, "http://127.0.0.1:3000/api/decrypted/decrypted-9-song.mp3");
        assert_eq!(p.kind, PreviewKind::Audio);
    }

    #[test]
    fn resolve_needs_node_and_file() {
        assert!(resolve("", &json!({ "path": "/tmp/x.mp3" })).is_none());
        assert!(resolve("http://n", &json!({})).is_none());
    }
}
