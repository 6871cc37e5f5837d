//! Validator strategy levels.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How aggressively the agent participates.
///
/// Ordered by aggressiveness: every higher level implies all behavior of
/// the lower ones, so comparisons like `strategy >= Strategy::StakeLatest`
/// are the normal way to gate an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Strategy {
    /// Observe only. Never stakes.
    #[default]
    Watchtower,
    /// Stay unstaked unless something is wrong, then stake.
    Defensive,
    /// Keep a stake on the latest correct node.
    StakeLatest,
    /// Also confirm or reject nodes once they are decidable.
    ResolveNodes,
    /// Also create new nodes.
    MakeNodes,
}

impl Strategy {
    /// All strategies in ascending order.
    pub const ALL: [Strategy; 5] = [
        Strategy::Watchtower,
        Strategy::Defensive,
        Strategy::StakeLatest,
        Strategy::ResolveNodes,
        Strategy::MakeNodes,
    ];

    /// Canonical name.
    pub fn name(self) -> &'static str {
        match self {
            Strategy::Watchtower => "Watchtower",
            Strategy::Defensive => "Defensive",
            Strategy::StakeLatest => "StakeLatest",
            Strategy::ResolveNodes => "ResolveNodes",
            Strategy::MakeNodes => "MakeNodes",
        }
    }

    /// Whether this level holds a stake (as opposed to only watching).
    pub fn is_active(self) -> bool {
        self >= Strategy::StakeLatest
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A strategy name did not match any known level.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown staker strategy: {0}")]
pub struct UnknownStrategy(pub String);

impl FromStr for Strategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Strategy::ALL
            .into_iter()
            .find(|strategy| strategy.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownStrategy(s.to_string()))
    }
}
