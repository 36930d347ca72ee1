//! Plain-text rendering of a session snapshot.
//!
//! A pure function of [`SessionSnapshot`]; callers re-render after every
//! transition instead of patching output in place.

use std::fmt::Write;

use super::session::{Outcome, SessionSnapshot};
use super::tracker::StepStatus;

/// Marker shown in front of a step.
pub fn status_marker(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Pending => "[ ]",
        StepStatus::Active => "[~]",
        StepStatus::Done => "[x]",
        StepStatus::Fail => "[!]",
    }
}

/// Multi-line view: header, one line per step, then the outcome if any.
pub fn render(snapshot: &SessionSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "#{} {} [{}] {}",
        snapshot.epoch,
        snapshot.file_name,
        snapshot.mode.label(),
        short_hash(&snapshot.content_hash)
    );

    for step in &snapshot.steps {
        let _ = write!(
            out,
            "  {} {:>2}. {}",
            status_marker(step.status),
            step.ordinal,
            step.description
        );
        if !step.detail.is_empty() {
            let _ = write!(out, "  ({})", step.detail);
        }
        out.push('\n');
    }

    match &snapshot.outcome {
        Some(Outcome::Purchased { message, preview }) => {
            let _ = writeln!(out, "OK: {}", message);
            if let Some(preview) = preview {
                let _ = writeln!(out, "  preview: {} ({:?})", preview.url, preview.kind);
            }
        }
        Some(Outcome::Failed { message }) => {
            let _ = writeln!(out, "FAILED: {}", message);
        }
        None => {}
    }
    out
}

fn short_hash(hash: &str) -> &str {
    hash.get(..16).unwrap_or(hash)
}
