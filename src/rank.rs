//! Rank tiers derived from level
//!
//! Nine contiguous level bands. Colors are display pass-through for the client.

use spacetimedb::SpacetimeType;

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RankTier {
    Iron,
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
    Master,
    Grandmaster,
    Challenger,
}

/// Display colors for a tier (hex strings)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankColors {
    pub primary: &'static str,
    pub accent: &'static str,
    pub glow: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankInfo {
    pub tier: RankTier,
    pub colors: RankColors,
}

/// Inclusive level bands, ordered. `None` upper bound = unbounded.
const RANK_RANGES: [(u32, Option<u32>, RankTier); 9] = [
    (1, Some(5), RankTier::Iron),
    (6, Some(10), RankTier::Bronze),
    (11, Some(20), RankTier::Silver),
    (21, Some(35), RankTier::Gold),
    (36, Some(50), RankTier::Platinum),
    (51, Some(70), RankTier::Diamond),
    (71, Some(90), RankTier::Master),
    (91, Some(99), RankTier::Grandmaster),
    (100, None, RankTier::Challenger),
];

impl RankTier {
    pub fn colors(self) -> RankColors {
        match self {
            RankTier::Iron => RankColors { primary: "#6B6B6B", accent: "#9E9E9E", glow: "#B0B0B0" },
            RankTier::Bronze => RankColors { primary: "#CD7F32", accent: "#E3A36B", glow: "#F0C08F" },
            RankTier::Silver => RankColors { primary: "#C0C0C0", accent: "#E0E0E0", glow: "#F5F5F5" },
            RankTier::Gold => RankColors { primary: "#FFD700", accent: "#FFE55C", glow: "#FFF3B0" },
            RankTier::Platinum => RankColors { primary: "#3FC1C9", accent: "#7FDDE2", glow: "#B8F1F4" },
            RankTier::Diamond => RankColors { primary: "#4A90E2", accent: "#8EC5FF", glow: "#C9E4FF" },
            RankTier::Master => RankColors { primary: "#9B59B6", accent: "#C39BD3", glow: "#E8D5F0" },
            RankTier::Grandmaster => RankColors { primary: "#E74C3C", accent: "#F1948A", glow: "#FADBD8" },
            RankTier::Challenger => RankColors { primary: "#F4D03F", accent: "#5DADE2", glow: "#FDFEFE" },
        }
    }

    /// Lowercase name used in logs and client payloads
    pub fn as_str(self) -> &'static str {
        match self {
            RankTier::Iron => "iron",
            RankTier::Bronze => "bronze",
            RankTier::Silver => "silver",
            RankTier::Gold => "gold",
            RankTier::Platinum => "platinum",
            RankTier::Diamond => "diamond",
            RankTier::Master => "master",
            RankTier::Grandmaster => "grandmaster",
            RankTier::Challenger => "challenger",
        }
    }
}

/// First band containing `level`; Iron when nothing matches (level 0)
pub fn rank_tier_for_level(level: u32) -> RankTier {
    RANK_RANGES
        .iter()
        .find(|(min, max, _)| level >= *min && max.map_or(true, |max| level <= max))
        .map(|(_, _, tier)| *tier)
        .unwrap_or(RankTier::Iron)
}

pub fn classify_rank(level: u32) -> RankInfo {
    let tier = rank_tier_for_level(level);
    RankInfo {
        tier,
        colors: tier.colors(),
    }
}
