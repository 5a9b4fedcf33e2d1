//! Daily streak state machine
//!
//! Two separate operations:
//! - `evaluate_streak_decay` runs on read (connect) and only ever zeroes a broken streak
//! - `apply_streak_activity` runs on task completion and is the only path that increments
//!
//! Keeping them apart means calling both in one request can never double count.

use chrono::NaiveDate;

/// Game days roll over at midnight PST (8am UTC), same as quest windows
pub const RESET_HOUR_UTC: i64 = 8;

const HOUR_IN_MICROS: i64 = 60 * 60 * 1_000_000;
const DAY_IN_MICROS: i64 = 24 * HOUR_IN_MICROS;

/// 1970-01-01 expressed as days from 0001-01-01 (chrono's CE day numbering)
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Streak {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_activity_date: Option<NaiveDate>,
}

/// Result of a decay check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakDecay {
    pub current_streak: u32,
    pub decay_applied: bool,
}

/// Calendar day a timestamp falls on, with the reset hour applied
pub fn game_day(micros_since_epoch: i64) -> NaiveDate {
    let shifted = micros_since_epoch - RESET_HOUR_UTC * HOUR_IN_MICROS;
    let days = shifted.div_euclid(DAY_IN_MICROS);
    i32::try_from(days)
        .ok()
        .and_then(|days| days.checked_add(UNIX_EPOCH_DAYS_FROM_CE))
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .unwrap_or_default()
}

/// Check whether the streak broke. Only the stored date is read, so repeating the
/// check for the same `(last_activity_date, today)` always gives the same answer.
pub fn evaluate_streak_decay(streak: &Streak, today: NaiveDate) -> StreakDecay {
    let unchanged = StreakDecay {
        current_streak: streak.current_streak,
        decay_applied: false,
    };

    let Some(last) = streak.last_activity_date else {
        return unchanged;
    };

    // Today, yesterday, or a future date (clock skew) all leave the streak alone
    if (today - last).num_days() <= 1 {
        return unchanged;
    }

    StreakDecay {
        current_streak: 0,
        decay_applied: true,
    }
}

/// Streak after the decay check; longest is never touched
pub fn decayed(streak: &Streak, today: NaiveDate) -> Streak {
    let decay = evaluate_streak_decay(streak, today);
    Streak {
        current_streak: decay.current_streak,
        ..*streak
    }
}

/// Count one qualifying activity on `today`
pub fn apply_streak_activity(streak: &Streak, today: NaiveDate) -> Streak {
    let current_streak = match streak.last_activity_date {
        // First ever activity
        None => 1,
        Some(last) => match (today - last).num_days() {
            1 => streak.current_streak.saturating_add(1),
            // Already counted today, or the stored date is ahead of us
            d if d <= 0 => return *streak,
            // Gap of 2+ days: the old run is over, today starts a new one
            _ => 1,
        },
    };

    Streak {
        current_streak,
        longest_streak: streak.longest_streak.max(current_streak),
        last_activity_date: Some(today),
    }
}

/// Parse the stored ISO date; anything unparseable is treated as no activity
pub fn parse_activity_date(raw: Option<&str>) -> Option<NaiveDate> {
    let raw = raw?;
    match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(e) => {
            log::warn!("[STREAK] unparseable last_activity_date={} error={}", raw, e);
            None
        }
    }
}

pub fn format_activity_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
