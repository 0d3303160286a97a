use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::time::Duration;

/// One displayable status: the message text and the emoji shown next to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCandidate {
    pub text: String,
    pub emoji: String,
}

impl StatusCandidate {
    pub fn new(text: impl Into<String>, emoji: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            emoji: emoji.into(),
        }
    }

    /// The status published on shutdown. An empty message clears the presence indicator.
    pub fn cleared() -> Self {
        Self::new("", "")
    }
}

/// A set of alternative process names that share one priority tier and one
/// pool of display statuses.
#[derive(Debug, Clone)]
pub struct AppGroup {
    /// Process identifiers, stored lowercase so they compare directly against a snapshot.
    names: BTreeSet<String>,
    candidates: Vec<StatusCandidate>,
    /// Lower value wins.
    priority: i32,
}

impl AppGroup {
    pub fn new<I, S>(names: I, candidates: Vec<StatusCandidate>, priority: i32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|n| n.as_ref().trim().to_lowercase())
                .collect(),
            candidates,
            priority,
        }
    }

    pub fn names(&self) -> &BTreeSet<String> {
        &self.names
    }

    pub fn candidates(&self) -> &[StatusCandidate] {
        &self.candidates
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }
}

/// Validated, immutable configuration consumed by the resolver and scheduler.
#[derive(Debug, Clone)]
pub struct StatusConfig {
    pub poll_interval: Duration,
    pub fallback: StatusCandidate,
    pub groups: Vec<AppGroup>,
}

/// The value handed to the publisher for one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStatus {
    pub text: String,
    pub emoji: String,
    pub expires_at: DateTime<Utc>,
}

impl ResolvedStatus {
    pub fn new(candidate: &StatusCandidate, expires_at: DateTime<Utc>) -> Self {
        Self {
            text: candidate.text.clone(),
            emoji: candidate.emoji.clone(),
            expires_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_names_are_lowercased_and_trimmed() {
        let group = AppGroup::new(["Slack", " Code.EXE "], vec![StatusCandidate::new("x", "y")], 0);
        assert!(group.names().contains("slack"));
        assert!(group.names().contains("code.exe"));
        assert_eq!(group.names().len(), 2);
    }

    #[test]
    fn group_names_deduplicate_case_variants() {
        let group = AppGroup::new(["slack", "SLACK"], vec![StatusCandidate::new("x", "y")], 0);
        assert_eq!(group.names().len(), 1);
    }

    #[test]
    fn cleared_status_is_empty() {
        let c = StatusCandidate::cleared();
        assert!(c.text.is_empty());
        assert!(c.emoji.is_empty());
    }

    #[test]
    fn resolved_status_copies_candidate() {
        let now = Utc::now();
        let resolved = ResolvedStatus::new(&StatusCandidate::new("Coding", "👨‍💻"), now);
        assert_eq!(resolved.text, "Coding");
        assert_eq!(resolved.emoji, "👨‍💻");
        assert_eq!(resolved.expires_at, now);
    }
}
