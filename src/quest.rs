//! Quest unlock rules
//!
//! Quests nest yearly ⊃ monthly ⊃ weekly ⊃ daily. A non-daily quest unlocks from
//! the child-tier tasks completed inside its current window, measured against
//! thresholds personalized by the player's classification.

use chrono::{Datelike, NaiveDate};
use spacetimedb::SpacetimeType;

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeframe {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// Personality profile used to personalize thresholds
#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    Dopamine,
    Acetylcholine,
    Gaba,
    Serotonin,
}

/// Profile used when the stored value is missing or unrecognized
pub const DEFAULT_CLASSIFICATION: Classification = Classification::Serotonin;

/// Per-difficulty completion requirement. A zero disables that tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnlockThresholds {
    pub easy: u32,
    pub medium: u32,
    pub hard: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DifficultyCounts {
    pub easy: u32,
    pub medium: u32,
    pub hard: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierProgress {
    pub completed: u32,
    pub required: u32,
    pub ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnlockBreakdown {
    pub easy: TierProgress,
    pub medium: TierProgress,
    pub hard: TierProgress,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuestUnlock {
    pub unlocked: bool,
    /// 0.0-1.0, for the progress bar only; gating uses `unlocked`
    pub progress: f64,
    /// None for daily quests (no requirement)
    pub breakdown: Option<UnlockBreakdown>,
}

impl Timeframe {
    /// Tier whose completions count toward unlocking this one
    pub fn child(self) -> Option<Timeframe> {
        match self {
            Timeframe::Daily => None,
            Timeframe::Weekly => Some(Timeframe::Daily),
            Timeframe::Monthly => Some(Timeframe::Weekly),
            Timeframe::Yearly => Some(Timeframe::Monthly),
        }
    }

    /// Tier this one feeds into
    pub fn parent(self) -> Option<Timeframe> {
        match self {
            Timeframe::Daily => Some(Timeframe::Weekly),
            Timeframe::Weekly => Some(Timeframe::Monthly),
            Timeframe::Monthly => Some(Timeframe::Yearly),
            Timeframe::Yearly => None,
        }
    }

    /// First game day of the window containing `today` (weeks start Monday)
    pub fn window_start(self, today: NaiveDate) -> NaiveDate {
        match self {
            Timeframe::Daily => today,
            Timeframe::Weekly => {
                today - chrono::Duration::days(today.weekday().num_days_from_monday() as i64)
            }
            Timeframe::Monthly => today.with_day(1).unwrap_or(today),
            Timeframe::Yearly => today.with_ordinal(1).unwrap_or(today),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::Daily => "daily",
            Timeframe::Weekly => "weekly",
            Timeframe::Monthly => "monthly",
            Timeframe::Yearly => "yearly",
        }
    }
}

/// Earliest game day any quest window can still count. Usually January 1st,
/// but a week that straddles New Year reaches back into December.
pub fn retention_start(today: NaiveDate) -> NaiveDate {
    [Timeframe::Weekly, Timeframe::Monthly, Timeframe::Yearly]
        .into_iter()
        .map(|t| t.window_start(today))
        .min()
        .unwrap_or(today)
}

impl Difficulty {
    pub fn parse(label: &str) -> Option<Difficulty> {
        match label.trim().to_ascii_lowercase().as_str() {
            "easy" => Some(Difficulty::Easy),
            "medium" => Some(Difficulty::Medium),
            "hard" => Some(Difficulty::Hard),
            _ => None,
        }
    }

    /// Lenient parse for gameplay input: malformed labels count as easy
    pub fn from_label(label: &str) -> Difficulty {
        Difficulty::parse(label).unwrap_or_else(|| {
            log::warn!("[QUEST] unknown difficulty label=\"{}\" defaulting to easy", label);
            Difficulty::Easy
        })
    }
}

impl Classification {
    pub fn parse(raw: &str) -> Option<Classification> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "dopamine" => Some(Classification::Dopamine),
            "acetylcholine" => Some(Classification::Acetylcholine),
            "gaba" => Some(Classification::Gaba),
            "serotonin" => Some(Classification::Serotonin),
            _ => None,
        }
    }

    /// Resolve the stored profile string; missing or unknown values use the default
    pub fn resolve(raw: Option<&str>) -> Classification {
        raw.and_then(Classification::parse).unwrap_or(DEFAULT_CLASSIFICATION)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Dopamine => "dopamine",
            Classification::Acetylcholine => "acetylcholine",
            Classification::Gaba => "gaba",
            Classification::Serotonin => "serotonin",
        }
    }

    /// Threshold table. Weekly counts daily completions, monthly counts weekly,
    /// yearly counts monthly. Daily has no requirement.
    pub fn thresholds(self, timeframe: Timeframe) -> Option<UnlockThresholds> {
        use Classification::*;
        use Timeframe::*;

        let (easy, medium, hard) = match (timeframe, self) {
            (Daily, _) => return None,

            // Quick wins keep dopamine profiles engaged: low counts across the board
            (Weekly, Dopamine) => (5, 3, 1),
            (Weekly, Acetylcholine) => (7, 4, 2),
            (Weekly, Gaba) => (4, 2, 1),
            (Weekly, Serotonin) => (6, 3, 1),

            (Monthly, Dopamine) => (3, 2, 1),
            (Monthly, Acetylcholine) => (4, 3, 1),
            (Monthly, Gaba) => (2, 1, 1),
            (Monthly, Serotonin) => (3, 2, 1),

            (Yearly, Dopamine) => (8, 5, 2),
            (Yearly, Acetylcholine) => (10, 6, 3),
            (Yearly, Gaba) => (6, 4, 2),
            (Yearly, Serotonin) => (9, 5, 2),
        };

        Some(UnlockThresholds { easy, medium, hard })
    }
}

impl DifficultyCounts {
    pub fn record(&mut self, difficulty: Difficulty) {
        match difficulty {
            Difficulty::Easy => self.easy = self.easy.saturating_add(1),
            Difficulty::Medium => self.medium = self.medium.saturating_add(1),
            Difficulty::Hard => self.hard = self.hard.saturating_add(1),
        }
    }
}

/// Count completed tasks by difficulty
pub fn tally_difficulties<I>(completed: I) -> DifficultyCounts
where
    I: IntoIterator<Item = Difficulty>,
{
    let mut counts = DifficultyCounts::default();
    for difficulty in completed {
        counts.record(difficulty);
    }
    counts
}

fn ratio(completed: u32, required: u32) -> f64 {
    if required == 0 {
        0.0
    } else {
        completed as f64 / required as f64
    }
}

fn tier(completed: u32, required: u32) -> TierProgress {
    TierProgress {
        completed,
        required,
        ratio: ratio(completed, required),
    }
}

/// Apply the unlock rule to explicit thresholds.
///
/// Unlocked when any single tier is complete, or when the ratios together add up
/// to one full tier. Progress is the better of the best single ratio and the
/// average over all three tiers, capped at 1.
pub fn evaluate_against(thresholds: UnlockThresholds, counts: DifficultyCounts) -> QuestUnlock {
    let breakdown = UnlockBreakdown {
        easy: tier(counts.easy, thresholds.easy),
        medium: tier(counts.medium, thresholds.medium),
        hard: tier(counts.hard, thresholds.hard),
    };

    let (re, rm, rh) = (breakdown.easy.ratio, breakdown.medium.ratio, breakdown.hard.ratio);
    let best = re.max(rm).max(rh);
    let sum = re + rm + rh;

    QuestUnlock {
        unlocked: best >= 1.0 || sum >= 1.0,
        progress: best.max(sum / 3.0).min(1.0),
        breakdown: Some(breakdown),
    }
}

pub fn evaluate_quest_unlock(
    timeframe: Timeframe,
    counts: DifficultyCounts,
    classification: Classification,
) -> QuestUnlock {
    match classification.thresholds(timeframe) {
        Some(thresholds) => evaluate_against(thresholds, counts),
        None => QuestUnlock {
            unlocked: true,
            progress: 1.0,
            breakdown: None,
        },
    }
}
