//! Boss encounter ledger
//!
//! Pure decisions for the shared boss: how much HP a hit removes, who gets what on
//! defeat, and whether a new boss may spawn. The persistence layer in `lib.rs`
//! owns the rows and the single-active-boss guard; nothing here touches the db.

use spacetimedb::{SpacetimeType, Timestamp};
use thiserror::Error;

use crate::{ArenaRegistry, BossContribution, BossEvent};

/// Per-hit damage bounds. Anything the caller sends is clamped into this range.
pub const MIN_DAMAGE_PER_HIT: u32 = 1;
pub const MAX_DAMAGE_PER_HIT: u32 = 100;

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BossStatus {
    Active,   // Taking damage
    Defeated, // HP hit 0, rewards paid once
    Expired,  // Window ran out (or force-expired by a new spawn)
}

/// Static definition of a boss tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BossTierConfig {
    pub tier: u8,
    pub name: &'static str,
    pub max_hp: u32,
    pub xp_reward_pool: u64,
    pub gold_reward_pool: u64,
    /// How long the boss stays up before it can be expired
    pub duration_secs: u64,
}

/// Boss tiers 1-5. HP scales faster than rewards so higher tiers need more of the guild.
static BOSS_TIERS: [BossTierConfig; 5] = [
    BossTierConfig { tier: 1, name: "Procrastination Imp", max_hp: 500, xp_reward_pool: 250, gold_reward_pool: 100, duration_secs: 3 * 24 * 60 * 60 },
    BossTierConfig { tier: 2, name: "Snooze Golem", max_hp: 1_000, xp_reward_pool: 500, gold_reward_pool: 200, duration_secs: 5 * 24 * 60 * 60 },
    BossTierConfig { tier: 3, name: "Doomscroll Hydra", max_hp: 2_000, xp_reward_pool: 1_000, gold_reward_pool: 400, duration_secs: 7 * 24 * 60 * 60 },
    BossTierConfig { tier: 4, name: "Burnout Wyrm", max_hp: 3_500, xp_reward_pool: 1_750, gold_reward_pool: 700, duration_secs: 7 * 24 * 60 * 60 },
    BossTierConfig { tier: 5, name: "Entropy Titan", max_hp: 5_000, xp_reward_pool: 2_500, gold_reward_pool: 1_000, duration_secs: 10 * 24 * 60 * 60 },
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArenaError {
    #[error("boss {boss_id} is still active for another {remaining_secs}s")]
    Conflict { boss_id: u64, remaining_secs: u64 },

    #[error("arena changed concurrently: expected active boss {expected:?}, found {found:?}")]
    Stale {
        expected: Option<u64>,
        found: Option<u64>,
    },
}

/// Result of a single hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageOutcome {
    /// Damage after clamping (0 when the boss was not active)
    pub damage: u32,
    pub new_hp: u32,
    pub defeated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardShare {
    pub player_id: String,
    pub xp_awarded: u64,
    pub gold_awarded: u64,
}

/// What a spawn request has to do before inserting the new boss
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnPlan {
    /// Active boss past its window that must be expired first
    pub expire: Option<u64>,
}

/// Tier config; out-of-range tiers clamp to the nearest defined tier
pub fn tier_config(tier: u8) -> &'static BossTierConfig {
    let idx = (tier.max(1) as usize - 1).min(BOSS_TIERS.len() - 1);
    &BOSS_TIERS[idx]
}

/// Fresh boss row for `tier`, spawned at `now`. `id` is filled by auto_inc.
pub fn new_boss_event(tier: u8, now: Timestamp) -> BossEvent {
    let config = tier_config(tier);
    BossEvent {
        id: 0,
        tier: config.tier,
        name: config.name.to_string(),
        max_hp: config.max_hp,
        current_hp: config.max_hp,
        status: BossStatus::Active,
        xp_reward_pool: config.xp_reward_pool,
        gold_reward_pool: config.gold_reward_pool,
        spawned_at: now,
        expires_at: now + std::time::Duration::from_secs(config.duration_secs),
        defeated_at: None,
        rewards_distributed: false,
    }
}

pub fn clamp_damage(raw_damage: i64) -> u32 {
    raw_damage.clamp(MIN_DAMAGE_PER_HIT as i64, MAX_DAMAGE_PER_HIT as i64) as u32
}

/// HP after one hit. Only an active boss takes damage.
pub fn apply_boss_damage(boss: &BossEvent, raw_damage: i64) -> DamageOutcome {
    if !accepts_hits(boss) {
        return DamageOutcome {
            damage: 0,
            new_hp: boss.current_hp,
            defeated: false,
        };
    }

    let damage = clamp_damage(raw_damage);
    let new_hp = boss.current_hp.saturating_sub(damage);

    DamageOutcome {
        damage,
        new_hp,
        defeated: new_hp == 0,
    }
}

/// Upsert a player's running total against one boss
pub fn record_contribution(
    existing: Option<BossContribution>,
    boss_id: u64,
    player_id: &str,
    damage: u32,
) -> BossContribution {
    match existing {
        Some(mut row) => {
            row.damage_dealt = row.damage_dealt.saturating_add(damage as u64);
            row.tasks_completed = row.tasks_completed.saturating_add(1);
            row
        }
        None => BossContribution {
            id: 0,
            boss_id,
            player_id: player_id.to_string(),
            damage_dealt: damage as u64,
            tasks_completed: 1,
        },
    }
}

/// Fold a restored contribution into the row already held for the same
/// (boss, player). Damage and task counts add up; the stored row keeps its id.
pub fn merge_contribution(existing: Option<BossContribution>, restored: BossContribution) -> BossContribution {
    match existing {
        Some(mut row) => {
            row.damage_dealt = row.damage_dealt.saturating_add(restored.damage_dealt);
            row.tasks_completed = row.tasks_completed.saturating_add(restored.tasks_completed);
            row
        }
        None => restored,
    }
}

/// Collapse rows that repeat a (boss, player) pair, keeping first-seen order
pub fn merge_contributions(rows: Vec<BossContribution>) -> Vec<BossContribution> {
    let mut merged: Vec<BossContribution> = Vec::with_capacity(rows.len());
    for row in rows {
        let existing = merged
            .iter()
            .position(|m| m.boss_id == row.boss_id && m.player_id == row.player_id)
            .map(|i| merged.remove(i));
        merged.push(merge_contribution(existing, row));
    }
    merged
}

/// A hit only lands on an active boss with HP left
pub fn accepts_hits(boss: &BossEvent) -> bool {
    boss.status == BossStatus::Active && boss.current_hp > 0
}

/// Rewards go out once: the boss must be defeated and not yet paid
pub fn payable(boss: &BossEvent) -> bool {
    boss.status == BossStatus::Defeated && !boss.rewards_distributed
}

/// Round each exact share, then take back single units from the shares that
/// were rounded up the most until the total fits the pool.
fn round_within_pool(exact: &[f64], pool: u64) -> Vec<u64> {
    let mut amounts: Vec<u64> = exact.iter().map(|a| a.round() as u64).collect();
    let mut excess = amounts.iter().sum::<u64>().saturating_sub(pool);
    if excess == 0 {
        return amounts;
    }

    let mut rounded_up: Vec<usize> = (0..exact.len())
        .filter(|&i| amounts[i] as f64 > exact[i])
        .collect();
    // Largest overshoot first; stable so ties go to the earlier contributor
    rounded_up.sort_by(|&a, &b| {
        let over_a = amounts[a] as f64 - exact[a];
        let over_b = amounts[b] as f64 - exact[b];
        over_b.total_cmp(&over_a)
    });

    for i in rounded_up {
        if excess == 0 {
            break;
        }
        amounts[i] -= 1;
        excess -= 1;
    }
    amounts
}

/// Split the pools by damage share. Each award is rounded on its own; the total
/// handed out can fall short of the pool (the remainder is dropped) but never
/// exceeds it.
pub fn distribute_boss_rewards(
    contributions: &[BossContribution],
    xp_pool: u64,
    gold_pool: u64,
) -> Vec<RewardShare> {
    if contributions.is_empty() {
        return Vec::new();
    }

    let total_damage: u64 = contributions.iter().map(|c| c.damage_dealt).sum();
    let contributors = contributions.len() as f64;

    let exact = |pool: u64| -> Vec<f64> {
        contributions
            .iter()
            .map(|c| {
                if total_damage > 0 {
                    pool as f64 * c.damage_dealt as f64 / total_damage as f64
                } else {
                    // No recorded damage: split evenly
                    pool as f64 / contributors
                }
            })
            .collect()
    };

    let xp = round_within_pool(&exact(xp_pool), xp_pool);
    let gold = round_within_pool(&exact(gold_pool), gold_pool);

    contributions
        .iter()
        .zip(xp.into_iter().zip(gold))
        .map(|(c, (xp_awarded, gold_awarded))| RewardShare {
            player_id: c.player_id.clone(),
            xp_awarded,
            gold_awarded,
        })
        .collect()
}

pub fn is_past_window(boss: &BossEvent, now: Timestamp) -> bool {
    now.to_micros_since_unix_epoch() >= boss.expires_at.to_micros_since_unix_epoch()
}

/// Decide whether a new boss may spawn given the boss the arena points at
pub fn decide_spawn(active: Option<&BossEvent>, now: Timestamp) -> Result<SpawnPlan, ArenaError> {
    let boss = match active {
        Some(boss) if boss.status == BossStatus::Active => boss,
        // Empty arena or a pointer left at a finished boss
        _ => return Ok(SpawnPlan { expire: None }),
    };

    if is_past_window(boss, now) {
        return Ok(SpawnPlan { expire: Some(boss.id) });
    }

    let remaining_micros = boss.expires_at.to_micros_since_unix_epoch() - now.to_micros_since_unix_epoch();
    Err(ArenaError::Conflict {
        boss_id: boss.id,
        remaining_secs: (remaining_micros.max(0) / 1_000_000) as u64,
    })
}

/// Compare-and-swap on the arena row: only move `expected -> next`
pub fn swap_arena(
    registry: &ArenaRegistry,
    expected: Option<u64>,
    next: Option<u64>,
) -> Result<ArenaRegistry, ArenaError> {
    if registry.active_boss_id != expected {
        return Err(ArenaError::Stale {
            expected,
            found: registry.active_boss_id,
        });
    }

    Ok(ArenaRegistry {
        id: registry.id,
        active_boss_id: next,
        version: registry.version.wrapping_add(1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000_000;

    fn ts(micros: i64) -> Timestamp {
        Timestamp::from_micros_since_unix_epoch(micros)
    }

    fn boss_with_hp(current_hp: u32) -> BossEvent {
        let mut boss = new_boss_event(1, ts(NOW));
        boss.id = 7;
        boss.current_hp = current_hp;
        boss
    }

    fn contribution(player: &str, damage: u64) -> BossContribution {
        BossContribution {
            id: 0,
            boss_id: 7,
            player_id: player.to_string(),
            damage_dealt: damage,
            tasks_completed: 1,
        }
    }

    #[test]
    fn test_damage_clamped_not_hp() {
        let outcome = apply_boss_damage(&boss_with_hp(50), 500);
        assert_eq!(outcome.damage, 100);
        assert_eq!(outcome.new_hp, 0);
        assert!(outcome.defeated);
    }

    #[test]
    fn test_damage_floor_is_one() {
        let outcome = apply_boss_damage(&boss_with_hp(50), 0);
        assert_eq!(outcome.damage, 1);
        assert_eq!(outcome.new_hp, 49);

        let outcome = apply_boss_damage(&boss_with_hp(50), -30);
        assert_eq!(outcome.damage, 1);
        assert!(!outcome.defeated);
    }

    #[test]
    fn test_exact_lethal_hit() {
        let outcome = apply_boss_damage(&boss_with_hp(25), 25);
        assert_eq!(outcome.new_hp, 0);
        assert!(outcome.defeated);

        let outcome = apply_boss_damage(&boss_with_hp(26), 25);
        assert_eq!(outcome.new_hp, 1);
        assert!(!outcome.defeated);
    }

    #[test]
    fn test_inactive_boss_takes_no_damage() {
        let mut boss = boss_with_hp(0);
        boss.status = BossStatus::Defeated;
        let outcome = apply_boss_damage(&boss, 100);
        assert_eq!(outcome.damage, 0);
        assert!(!outcome.defeated);

        let mut boss = boss_with_hp(300);
        boss.status = BossStatus::Expired;
        assert_eq!(apply_boss_damage(&boss, 50).new_hp, 300);
    }

    #[test]
    fn test_contribution_upsert() {
        let first = record_contribution(None, 7, "p1", 40);
        assert_eq!(first.damage_dealt, 40);
        assert_eq!(first.tasks_completed, 1);

        let second = record_contribution(Some(first), 7, "p1", 60);
        assert_eq!(second.damage_dealt, 100);
        assert_eq!(second.tasks_completed, 2);
        assert_eq!(second.player_id, "p1");
    }

    #[test]
    fn test_rewards_proportional() {
        let shares = distribute_boss_rewards(&[contribution("a", 60), contribution("b", 40)], 100, 50);
        assert_eq!(shares[0].xp_awarded, 60);
        assert_eq!(shares[1].xp_awarded, 40);
        assert_eq!(shares[0].gold_awarded, 30);
        assert_eq!(shares[1].gold_awarded, 20);
    }

    #[test]
    fn test_rewards_for_thirds_match_rounding() {
        let shares = distribute_boss_rewards(
            &[contribution("a", 33), contribution("b", 33), contribution("c", 34)],
            100,
            0,
        );
        let total: u64 = shares.iter().map(|s| s.xp_awarded).sum();
        assert!(total <= 100);
        assert_eq!(shares.iter().map(|s| s.xp_awarded).collect::<Vec<_>>(), vec![33, 33, 34]);
    }

    #[test]
    fn test_half_shares_capped_at_pool() {
        // 62.5 + 62.5 + 125 rounds to 251; one unit comes back off a half share
        let shares = distribute_boss_rewards(
            &[contribution("a", 1), contribution("b", 1), contribution("c", 2)],
            250,
            250,
        );
        let xp: Vec<u64> = shares.iter().map(|s| s.xp_awarded).collect();
        assert_eq!(xp, vec![62, 63, 125]);
        assert_eq!(xp.iter().sum::<u64>(), 250);
        assert_eq!(shares.iter().map(|s| s.gold_awarded).sum::<u64>(), 250);
    }

    #[test]
    fn test_rewards_never_exceed_pool() {
        let damages: [&[u64]; 5] = [&[1, 1], &[1, 1, 2], &[1, 3, 5, 7], &[2, 2, 2, 2, 2, 2, 2], &[1, 1, 1, 1, 1, 1, 1, 1, 1]];
        for pool in [1u64, 3, 7, 10, 99, 250, 1_001] {
            for set in damages {
                let rows: Vec<_> = set.iter().enumerate().map(|(i, d)| contribution(&i.to_string(), *d)).collect();
                let shares = distribute_boss_rewards(&rows, pool, pool);
                let xp: u64 = shares.iter().map(|s| s.xp_awarded).sum();
                let gold: u64 = shares.iter().map(|s| s.gold_awarded).sum();
                assert!(xp <= pool, "pool {} damages {:?} paid {}", pool, set, xp);
                assert!(gold <= pool);
            }
        }
    }

    #[test]
    fn test_payable_only_once_after_defeat() {
        let active = boss_with_hp(100);
        assert!(!payable(&active));

        let mut defeated = boss_with_hp(0);
        defeated.status = BossStatus::Defeated;
        assert!(payable(&defeated));

        let mut paid = defeated.clone();
        paid.rewards_distributed = true;
        assert!(!payable(&paid));

        let mut expired = boss_with_hp(40);
        expired.status = BossStatus::Expired;
        assert!(!payable(&expired));
    }

    #[test]
    fn test_accepts_hits() {
        assert!(accepts_hits(&boss_with_hp(1)));
        assert!(!accepts_hits(&boss_with_hp(0)));

        let mut defeated = boss_with_hp(0);
        defeated.status = BossStatus::Defeated;
        assert!(!accepts_hits(&defeated));
    }

    #[test]
    fn test_second_lethal_hit_does_not_defeat_again() {
        let boss = boss_with_hp(30);
        let first = apply_boss_damage(&boss, 50);
        assert!(first.defeated);

        let mut after = boss.clone();
        after.current_hp = first.new_hp;
        after.status = BossStatus::Defeated;
        let second = apply_boss_damage(&after, 50);
        assert!(!second.defeated);
        assert_eq!(second.damage, 0);
        assert_eq!(second.new_hp, 0);

        // A zero-HP row still flagged active takes no hit either
        let stuck = boss_with_hp(0);
        assert!(!apply_boss_damage(&stuck, 50).defeated);
    }

    #[test]
    fn test_merge_contributions_repeated_pair() {
        let mut other_boss = contribution("p", 7);
        other_boss.boss_id = 8;
        let merged = merge_contributions(vec![
            contribution("p", 10),
            contribution("q", 4),
            contribution("p", 5),
            other_boss,
        ]);

        assert_eq!(merged.len(), 3);
        let p = merged.iter().find(|c| c.boss_id == 7 && c.player_id == "p").unwrap();
        assert_eq!(p.damage_dealt, 15);
        assert_eq!(p.tasks_completed, 2);

        let shares = distribute_boss_rewards(
            &merged.iter().filter(|c| c.boss_id == 7).cloned().collect::<Vec<_>>(),
            100,
            0,
        );
        assert_eq!(shares.iter().filter(|s| s.player_id == "p").count(), 1);
    }

    #[test]
    fn test_merge_contribution_keeps_stored_id() {
        let mut stored = contribution("p", 20);
        stored.id = 42;
        let merged = merge_contribution(Some(stored), contribution("p", 5));
        assert_eq!(merged.id, 42);
        assert_eq!(merged.damage_dealt, 25);

        let fresh = merge_contribution(None, contribution("p", 5));
        assert_eq!(fresh.id, 0);
    }

    #[test]
    fn test_rounding_remainder_dropped() {
        // 10 / 3 = 3.33 each → 3 each, 1 XP lost
        let shares = distribute_boss_rewards(
            &[contribution("a", 5), contribution("b", 5), contribution("c", 5)],
            10,
            10,
        );
        let total: u64 = shares.iter().map(|s| s.xp_awarded).sum();
        assert_eq!(total, 9);
    }

    #[test]
    fn test_zero_damage_splits_evenly() {
        let shares = distribute_boss_rewards(&[contribution("a", 0), contribution("b", 0)], 100, 40);
        assert!(shares.iter().all(|s| s.xp_awarded == 50 && s.gold_awarded == 20));
    }

    #[test]
    fn test_no_contributors_no_rewards() {
        assert!(distribute_boss_rewards(&[], 1_000, 1_000).is_empty());
    }

    #[test]
    fn test_tier_config_clamped() {
        assert_eq!(tier_config(0).tier, 1);
        assert_eq!(tier_config(3).tier, 3);
        assert_eq!(tier_config(99).tier, 5);
    }

    #[test]
    fn test_new_boss_starts_full() {
        let boss = new_boss_event(2, ts(NOW));
        assert_eq!(boss.current_hp, boss.max_hp);
        assert_eq!(boss.status, BossStatus::Active);
        assert!(!boss.rewards_distributed);
        assert_eq!(
            boss.expires_at.to_micros_since_unix_epoch() - NOW,
            5 * 24 * 60 * 60 * 1_000_000
        );
    }

    #[test]
    fn test_spawn_into_empty_arena() {
        assert_eq!(decide_spawn(None, ts(NOW)), Ok(SpawnPlan { expire: None }));
    }

    #[test]
    fn test_spawn_conflicts_with_live_boss() {
        let boss = boss_with_hp(500);
        let one_hour = 60 * 60 * 1_000_000;
        match decide_spawn(Some(&boss), ts(NOW + one_hour)) {
            Err(ArenaError::Conflict { boss_id, remaining_secs }) => {
                assert_eq!(boss_id, 7);
                assert_eq!(remaining_secs, 3 * 24 * 60 * 60 - 60 * 60);
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_spawn_force_expires_stale_boss() {
        let boss = boss_with_hp(500);
        let later = boss.expires_at.to_micros_since_unix_epoch() + 1;
        assert_eq!(decide_spawn(Some(&boss), ts(later)), Ok(SpawnPlan { expire: Some(7) }));
    }

    #[test]
    fn test_spawn_ignores_finished_boss() {
        let mut boss = boss_with_hp(0);
        boss.status = BossStatus::Defeated;
        assert_eq!(decide_spawn(Some(&boss), ts(NOW)), Ok(SpawnPlan { expire: None }));
    }

    #[test]
    fn test_arena_compare_and_swap() {
        let registry = ArenaRegistry { id: 0, active_boss_id: None, version: 4 };

        let claimed = swap_arena(&registry, None, Some(9)).unwrap();
        assert_eq!(claimed.active_boss_id, Some(9));
        assert_eq!(claimed.version, 5);

        // Second spawner raced us and still expects an empty arena
        assert_eq!(
            swap_arena(&claimed, None, Some(10)),
            Err(ArenaError::Stale { expected: None, found: Some(9) })
        );

        let released = swap_arena(&claimed, Some(9), None).unwrap();
        assert_eq!(released.active_boss_id, None);
        assert_eq!(released.version, 6);
    }
}
