//! Push notification wire type.
//!
//! GitHub sends far more than this in a push event; only the ref that moved
//! and the revision it now points at matter for deployments.

use serde::{Deserialize, Serialize};

use crate::revision::Revision;

/// Minimal push event: `{ "ref": ..., "after": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub ref_name: String,
    /// Head revision of the ref after the push.
    #[serde(rename = "after")]
    pub head: String,
}

impl PushEvent {
    pub fn new(ref_name: impl Into<String>, head: impl Into<String>) -> Self {
        Self {
            ref_name: ref_name.into(),
            head: head.into(),
        }
    }

    /// Parse a raw webhook body.
    pub fn from_slice(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }

    /// True if this push moved `refs/heads/<branch>`.
    pub fn targets_branch(&self, branch: &str) -> bool {
        self.ref_name == branch_ref(branch)
    }

    pub fn head_revision(&self) -> Revision {
        Revision::from(self.head.as_str())
    }
}

/// Fully qualified ref name for a branch.
pub fn branch_ref(branch: &str) -> String {
    format!("refs/heads/{}", branch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_github_push_payload_ignores_extra_fields() {
        let body = br#"{
            "ref": "refs/heads/master",
            "before": "0000000000000000000000000000000000000000",
            "after": "def4567890abcdef1234567890abcdef12345678",
            "repository": { "full_name": "owner/repo" },
            "pusher": { "name": "someone" }
        }"#;

        let event = PushEvent::from_slice(body).unwrap();
        assert_eq!(event.ref_name, "refs/heads/master");
        assert_eq!(event.head, "def4567890abcdef1234567890abcdef12345678");
        assert!(event.targets_branch("master"));
        assert!(!event.targets_branch("main"));
    }

    #[test]
    fn test_parse_rejects_missing_head() {
        let body = br#"{ "ref": "refs/heads/master" }"#;
        assert!(PushEvent::from_slice(body).is_err());
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(PushEvent::from_slice(b"ref=refs/heads/master").is_err());
    }

    #[test]
    fn test_tag_push_does_not_target_branch() {
        let event = PushEvent::new("refs/tags/master", "abc1234");
        assert!(!event.targets_branch("master"));
    }

    #[test]
    fn test_serializes_with_wire_field_names() {
        let event = PushEvent::new("refs/heads/master", "abc1234");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["ref"], "refs/heads/master");
        assert_eq!(json["after"], "abc1234");
    }
}
