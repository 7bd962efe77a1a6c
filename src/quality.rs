use crate::config::QualityConfig;
use crate::fetch::{FetchFailure, FetchOutcome};

/// Body marker recorded for bookmarks indexed from their title alone.
pub const PLACEHOLDER_BODY: &str = "(no readable page content)";

/// Verdict of the quality gate for one fetched bookmark.
#[derive(Debug, Clone, PartialEq)]
pub enum PageClass {
    /// Confirmed unreachable (4xx or transport failure); goes to the
    /// dead-link registry and is never fetched again.
    DeadLink,
    /// Content unusable; the bookmark is indexed from its title alone.
    SoftFailure,
    /// Extracted text passed the gate.
    Usable(String),
}

pub fn classify(outcome: FetchOutcome, quality: &QualityConfig) -> PageClass {
    match outcome {
        FetchOutcome::Text(text) => {
            if passes_quality(&text, quality) {
                PageClass::Usable(text)
            } else {
                PageClass::SoftFailure
            }
        }
        FetchOutcome::Failed(failure) => match failure {
            FetchFailure::ClientError(_) | FetchFailure::Network(_) => PageClass::DeadLink,
            FetchFailure::Timeout | FetchFailure::NotText(_) | FetchFailure::ServerError(_) => {
                PageClass::SoftFailure
            }
        },
    }
}

/// The gate itself: enough text, enough of it alphanumeric, and none of
/// the configured boilerplate phrases present (literal containment on the
/// lowercased text).
pub fn passes_quality(text: &str, quality: &QualityConfig) -> bool {
    let char_count = text.chars().count();
    if char_count < quality.min_text_chars {
        return false;
    }

    let alnum_count = text.chars().filter(|c| c.is_alphanumeric()).count();
    if (alnum_count as f32) < quality.min_alnum_ratio * char_count as f32 {
        return false;
    }

    let lower = text.to_lowercase();
    !quality
        .reject_patterns
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}
