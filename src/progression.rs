//! XP curve and level math
//!
//! Level cost grows as `100 × n^1.5`. Level is always derived from total XP,
//! never stored as its own truth.

/// Hard ceiling for the level search. Levels beyond this are not representable.
pub const MAX_LEVEL: u32 = 200;

/// Base multiplier of the XP curve
const XP_CURVE_BASE: f64 = 100.0;

/// Curve exponent
const XP_CURVE_EXPONENT: f64 = 1.5;

/// Where a player sits inside their current level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelProgress {
    pub level: u32,
    /// XP earned since reaching `level`
    pub current_xp: u64,
    /// XP needed to go from `level` to `level + 1`
    pub max_xp: u64,
    /// 0-100, clamped
    pub percentage: f64,
}

/// Incremental XP cost to advance from level `n - 1` into level `n`
pub fn xp_required_for_level(n: u32) -> u64 {
    if n <= 1 {
        return 0;
    }
    (XP_CURVE_BASE * (n as f64).powf(XP_CURVE_EXPONENT)).floor() as u64
}

/// Cumulative XP needed to reach `level`
pub fn total_xp_for_level(level: u32) -> u64 {
    (1..=level).map(xp_required_for_level).sum()
}

/// Largest level whose cumulative threshold fits in `total_xp`, capped at MAX_LEVEL
pub fn level_from_total_xp(total_xp: u64) -> u32 {
    let mut level = 1;
    // Running threshold so each step only adds the next increment
    let mut next_threshold = total_xp_for_level(level + 1);
    while level < MAX_LEVEL && next_threshold <= total_xp {
        level += 1;
        next_threshold += xp_required_for_level(level + 1);
    }
    level
}

/// Break total XP down into level, XP into the level, and percentage to the next one
pub fn progress_within_level(total_xp: u64) -> LevelProgress {
    let level = level_from_total_xp(total_xp);
    let current_xp = total_xp.saturating_sub(total_xp_for_level(level));
    let max_xp = xp_required_for_level(level + 1);

    let percentage = if max_xp == 0 {
        0.0
    } else {
        (current_xp as f64 / max_xp as f64 * 100.0).clamp(0.0, 100.0)
    };

    LevelProgress {
        level,
        current_xp,
        max_xp,
        percentage,
    }
}

/// Clamp a signed XP value (restore payloads, admin input) into the calculator's domain
pub fn sanitize_xp(raw: i64) -> u64 {
    raw.max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xp_required_for_level() {
        assert_eq!(xp_required_for_level(0), 0);
        assert_eq!(xp_required_for_level(1), 0);
        assert_eq!(xp_required_for_level(2), 282); // 100 × 2.828...
        assert_eq!(xp_required_for_level(3), 519); // 100 × 5.196...
        assert_eq!(xp_required_for_level(5), 1118); // 100 × 11.18...
        assert_eq!(xp_required_for_level(10), 3162);
    }

    #[test]
    fn test_total_xp_for_level() {
        assert_eq!(total_xp_for_level(1), 0);
        assert_eq!(total_xp_for_level(2), 282);
        assert_eq!(total_xp_for_level(3), 801);
    }

    #[test]
    fn test_level_from_total_xp() {
        assert_eq!(level_from_total_xp(0), 1);
        assert_eq!(level_from_total_xp(281), 1);
        assert_eq!(level_from_total_xp(282), 2);
        assert_eq!(level_from_total_xp(800), 2);
        assert_eq!(level_from_total_xp(801), 3);
    }

    #[test]
    fn test_level_round_trip_at_thresholds() {
        for n in 1..=MAX_LEVEL {
            assert_eq!(level_from_total_xp(total_xp_for_level(n)), n, "level {}", n);
        }
    }

    #[test]
    fn test_level_capped() {
        assert_eq!(level_from_total_xp(u64::MAX), MAX_LEVEL);
        assert_eq!(level_from_total_xp(total_xp_for_level(MAX_LEVEL + 5)), MAX_LEVEL);
    }

    #[test]
    fn test_progress_within_level() {
        let p = progress_within_level(0);
        assert_eq!(p.level, 1);
        assert_eq!(p.current_xp, 0);
        assert_eq!(p.max_xp, 282);
        assert_eq!(p.percentage, 0.0);

        // Halfway from level 2 to 3 (519 XP increment)
        let p = progress_within_level(282 + 259);
        assert_eq!(p.level, 2);
        assert_eq!(p.current_xp, 259);
        assert_eq!(p.max_xp, 519);
        assert!((p.percentage - 49.9).abs() < 0.1);
    }

    #[test]
    fn test_progress_percentage_clamped_at_cap() {
        // Past the ceiling current_xp can exceed the next increment
        let p = progress_within_level(u64::MAX / 2);
        assert_eq!(p.level, MAX_LEVEL);
        assert_eq!(p.percentage, 100.0);
    }

    #[test]
    fn test_sanitize_xp() {
        assert_eq!(sanitize_xp(-50), 0);
        assert_eq!(sanitize_xp(0), 0);
        assert_eq!(sanitize_xp(1234), 1234);
    }
}
