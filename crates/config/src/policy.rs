//! Decisions about non-model files found while consolidating a folder tree.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What to do with a file type that is neither a model nor an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtraFileDecision {
    /// Gather into the library's `Misc` folder.
    MoveToMisc,
    /// Do not touch.
    LeaveInPlace,
}

/// Extension (lowercase, leading dot) to [`ExtraFileDecision`].
///
/// Absence of an entry means the user has not decided yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtraFilePolicy(BTreeMap<String, ExtraFileDecision>);
impl ExtraFilePolicy {
    /// Normalizes `"PDF"`, `"pdf"` and `".pdf"` to `".pdf"`.
    pub fn normalize(extension: &str) -> String {
        let trimmed = extension.trim().trim_start_matches('.');
        format!(".{}", trimmed.to_ascii_lowercase())
    }

    pub fn decision(&self, extension: &str) -> Option<ExtraFileDecision> {
        self.0.get(&Self::normalize(extension)).copied()
    }

    pub fn set(&mut self, extension: &str, decision: ExtraFileDecision) -> Option<ExtraFileDecision> {
        self.0.insert(Self::normalize(extension), decision)
    }

    pub fn forget(&mut self, extension: &str) -> Option<ExtraFileDecision> {
        self.0.remove(&Self::normalize(extension))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ExtraFileDecision)> {
        self.0.iter().map(|(ext, decision)| (ext.as_str(), *decision))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
impl FromIterator<(String, ExtraFileDecision)> for ExtraFilePolicy {
    fn from_iter<I: IntoIterator<Item = (String, ExtraFileDecision)>>(iter: I) -> Self {
        let mut policy = Self::default();
        for (ext, decision) in iter {
            policy.set(&ext, decision);
        }
        policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("pdf", ".pdf")]
    #[case(".PDF", ".pdf")]
    #[case("  .Mp4 ", ".mp4")]
    fn test_normalize(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(ExtraFilePolicy::normalize(input), expected);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut policy = ExtraFilePolicy::default();
        assert_eq!(policy.decision(".pdf"), None);
        policy.set("PDF", ExtraFileDecision::MoveToMisc);
        assert_eq!(policy.decision(".pdf"), Some(ExtraFileDecision::MoveToMisc));
        assert_eq!(policy.forget(".Pdf"), Some(ExtraFileDecision::MoveToMisc));
        assert!(policy.is_empty());
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let policy: ExtraFilePolicy = [
            ("mp4".to_string(), ExtraFileDecision::LeaveInPlace),
            (".txt".to_string(), ExtraFileDecision::MoveToMisc),
        ]
        .into_iter()
        .collect();
        let json = serde_json::to_string(&policy).unwrap();
        assert_eq!(json, r#"{".mp4":"leave-in-place",".txt":"move-to-misc"}"#);
    }
}
