//! Predicate verdicts and their composition.

/// Verdict of one predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    /// The predicate's prerequisites are missing from the request.
    Abstain,
    /// The predicate holds.
    Grant,
    /// The predicate does not hold.
    Deny,
}

impl Vote {
    /// `Grant` if `holds`, `Deny` otherwise.
    #[must_use]
    pub const fn from_bool(holds: bool) -> Self {
        if holds { Self::Grant } else { Self::Deny }
    }
}

/// Combines verdicts into an access decision.
///
/// Any `Deny` denies. Otherwise any `Grant` grants. When every predicate
/// abstained (or none was evaluated) the request is granted only if
/// `allow_if_all_abstain` is set.
#[must_use]
pub fn decide(votes: impl IntoIterator<Item = Vote>, allow_if_all_abstain: bool) -> bool {
    let mut granted = false;
    for vote in votes {
        match vote {
            Vote::Deny => return false,
            Vote::Grant => granted = true,
            Vote::Abstain => {},
        }
    }
    granted || allow_if_all_abstain
}
