use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ParsePriorityError;

/// Scheduling urgency of a request. Variants are declared in ascending
/// order, so the derived `Ord` is the total order used for admission and
/// routing decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PriorityLevel {
    /// Opportunistic work nobody is waiting on (pre-loading, warm-up).
    Background,
    /// Long-running work the user knows about but is not blocked on.
    Utility,
    /// Work the user explicitly asked for and is waiting to see.
    #[serde(alias = "user_initiated")]
    UserInitiated,
    /// Work on the interactive path (the visible history row, the paste).
    #[serde(alias = "user_interactive")]
    UserInteractive,
}

impl PriorityLevel {
    /// Every level, lowest urgency first.
    pub const ALL: [PriorityLevel; 4] = [
        PriorityLevel::Background,
        PriorityLevel::Utility,
        PriorityLevel::UserInitiated,
        PriorityLevel::UserInteractive,
    ];

    /// Position in [`PriorityLevel::ALL`].
    pub fn rank(self) -> usize {
        self as usize
    }

    /// The next level up, saturating at `UserInteractive`.
    pub fn promoted(self) -> Self {
        self.promoted_by(1)
    }

    /// Promote by `levels` steps, saturating at `UserInteractive`.
    pub fn promoted_by(self, levels: usize) -> Self {
        let rank = self.rank().saturating_add(levels).min(Self::ALL.len() - 1);
        Self::ALL[rank]
    }

    /// Effective priority after waiting `waited`: one level per full
    /// `threshold` elapsed. A zero threshold disables aging.
    pub fn aged(self, waited: Duration, threshold: Duration) -> Self {
        if threshold.is_zero() {
            return self;
        }
        let steps = waited.as_nanos() / threshold.as_nanos();
        self.promoted_by(usize::try_from(steps).unwrap_or(usize::MAX))
    }

    pub fn is_highest(self) -> bool {
        self == PriorityLevel::UserInteractive
    }

    /// Canonical name, matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            PriorityLevel::Background => "background",
            PriorityLevel::Utility => "utility",
            PriorityLevel::UserInitiated => "userInitiated",
            PriorityLevel::UserInteractive => "userInteractive",
        }
    }
}

impl fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriorityLevel {
    type Err = ParsePriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "background" | "bg" => Ok(PriorityLevel::Background),
            "utility" => Ok(PriorityLevel::Utility),
            "userinitiated" => Ok(PriorityLevel::UserInitiated),
            "userinteractive" | "interactive" => Ok(PriorityLevel::UserInteractive),
            _ => Err(ParsePriorityError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering() {
        assert!(PriorityLevel::Background < PriorityLevel::Utility);
        assert!(PriorityLevel::Utility < PriorityLevel::UserInitiated);
        assert!(PriorityLevel::UserInitiated < PriorityLevel::UserInteractive);
    }

    #[test]
    fn promotion_saturates() {
        assert_eq!(PriorityLevel::Background.promoted(), PriorityLevel::Utility);
        assert_eq!(PriorityLevel::Background.promoted_by(2), PriorityLevel::UserInitiated);
        assert_eq!(PriorityLevel::Utility.promoted_by(10), PriorityLevel::UserInteractive);
        assert_eq!(PriorityLevel::UserInteractive.promoted(), PriorityLevel::UserInteractive);
    }

    #[test]
    fn aging_promotes_one_level_per_threshold() {
        let threshold = Duration::from_secs(2);
        let bg = PriorityLevel::Background;
        assert_eq!(bg.aged(Duration::from_millis(1999), threshold), PriorityLevel::Background);
        assert_eq!(bg.aged(Duration::from_millis(2500), threshold), PriorityLevel::Utility);
        assert_eq!(bg.aged(Duration::from_secs(5), threshold), PriorityLevel::UserInitiated);
        assert_eq!(bg.aged(Duration::from_secs(600), threshold), PriorityLevel::UserInteractive);
        assert_eq!(bg.aged(Duration::from_secs(600), Duration::ZERO), PriorityLevel::Background);
    }

    #[test]
    fn parse_accepts_common_spellings() {
        assert_eq!("userInteractive".parse::<PriorityLevel>().unwrap(), PriorityLevel::UserInteractive);
        assert_eq!("user-initiated".parse::<PriorityLevel>().unwrap(), PriorityLevel::UserInitiated);
        assert_eq!("USER_INITIATED".parse::<PriorityLevel>().unwrap(), PriorityLevel::UserInitiated);
        assert_eq!("bg".parse::<PriorityLevel>().unwrap(), PriorityLevel::Background);
    }

    #[test]
    fn unknown_name_reports_what_was_given() {
        let err = "urgent".parse::<PriorityLevel>().unwrap_err();
        assert_eq!(err, ParsePriorityError("urgent".into()));
        assert!(err.to_string().starts_with("unknown priority 'urgent'"));
    }

    #[test]
    fn display_round_trips_through_parse() {
        for level in PriorityLevel::ALL {
            assert_eq!(level.to_string().parse::<PriorityLevel>().unwrap(), level);
        }
    }
}
