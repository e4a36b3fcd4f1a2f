//! Sycophancy detection and the adversarial framing taxonomy for challengers.

use serde::{Deserialize, Serialize};

/// The adversarial lens assigned to a single challenger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeFraming {
    Flaw,
    Alternative,
    Risk,
    DevilsAdvocate,
}

impl ChallengeFraming {
    /// Fixed round-robin assignment order.
    pub const ORDER: [ChallengeFraming; 4] = [
        ChallengeFraming::Flaw,
        ChallengeFraming::Alternative,
        ChallengeFraming::Risk,
        ChallengeFraming::DevilsAdvocate,
    ];

    pub fn for_index(index: usize) -> Self {
        Self::ORDER[index % Self::ORDER.len()]
    }

    /// The suggested opening phrase a challenger is nudged toward, used in
    /// the system prompt to make praise-first openings harder to default to.
    pub fn suggested_opening(self) -> &'static str {
        match self {
            Self::Flaw => "The answer gets wrong...",
            Self::Alternative => "An alternative approach is...",
            Self::Risk => "A critical risk is...",
            Self::DevilsAdvocate => "I disagree because...",
        }
    }

    /// What the challenger is required to surface, used to build the
    /// per-framing system prompt.
    pub fn requirement(self) -> &'static str {
        match self {
            Self::Flaw => "a concrete factual or logical error in the answer",
            Self::Alternative => "a materially different approach the answer did not consider",
            Self::Risk => "at least two distinct failure modes the answer glosses over",
            Self::DevilsAdvocate => "the strongest possible case against the answer, even if you find it unconvincing",
        }
    }
}

impl std::fmt::Display for ChallengeFraming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flaw => write!(f, "flaw"),
            Self::Alternative => write!(f, "alternative"),
            Self::Risk => write!(f, "risk"),
            Self::DevilsAdvocate => write!(f, "devils_advocate"),
        }
    }
}

/// Phrases whose presence near the start of a challenge signal the
/// challenger deferred rather than genuinely disagreed.
pub const SYCOPHANCY_MARKERS: &[&str] = &[
    "great answer",
    "great point",
    "good answer",
    "good point",
    "well done",
    "excellent analysis",
    "excellent answer",
    "this is a good",
    "i agree with most",
    "i largely agree",
    "no significant flaws",
    "the proposal is sound",
    "the answer is sound",
    "i agree with the",
];

/// Detect whether a challenge opens with a deferential, non-adversarial
/// framing. Only the first 200 characters are inspected — a challenger that
/// opens with praise and then pivots to genuine disagreement still counts as
/// sycophantic, because the opening is the tell.
pub fn detect_sycophancy(challenge_text: &str) -> bool {
    let opening: String = challenge_text.chars().take(200).collect();
    let opening = opening.to_lowercase();
    let opening = opening.trim();
    SYCOPHANCY_MARKERS.iter().any(|marker| opening.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_round_robin_cycles() {
        assert_eq!(ChallengeFraming::for_index(0), ChallengeFraming::Flaw);
        assert_eq!(ChallengeFraming::for_index(1), ChallengeFraming::Alternative);
        assert_eq!(ChallengeFraming::for_index(2), ChallengeFraming::Risk);
        assert_eq!(ChallengeFraming::for_index(3), ChallengeFraming::DevilsAdvocate);
        assert_eq!(ChallengeFraming::for_index(4), ChallengeFraming::Flaw);
    }

    #[test]
    fn framing_display_matches_serde_rename() {
        assert_eq!(ChallengeFraming::DevilsAdvocate.to_string(), "devils_advocate");
    }

    #[test]
    fn detects_known_markers_case_insensitively() {
        assert!(detect_sycophancy("Great answer! But one nuance..."));
        assert!(detect_sycophancy("GREAT POINT, however..."));
    }

    #[test]
    fn genuine_disagreement_is_not_flagged() {
        assert!(!detect_sycophancy("The answer gets wrong the assumption about cost scaling."));
    }

    #[test]
    fn only_first_200_chars_are_inspected() {
        let padding = "x".repeat(250);
        let text = format!("{padding} great answer");
        assert!(!detect_sycophancy(&text));
    }

    #[test]
    fn whitespace_and_case_are_normalised_before_matching() {
        assert!(detect_sycophancy("   This Is A Good summary overall."));
    }
}
