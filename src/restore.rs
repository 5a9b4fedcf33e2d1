// Bulk restore reducers for disaster recovery
// Accept JSON arrays exported from admin panel (TypeScript SDK format)

use spacetimedb::{reducer, ReducerContext, Timestamp, Table};
use crate::{Player, BossContribution, authorized_worker};
use crate::{player, boss_contribution, sync_progress};
use crate::boss::{merge_contribution, merge_contributions};
use crate::progression::sanitize_xp;
use crate::streak::{format_activity_date, parse_activity_date};
use serde_json::Value;

/// Parse Timestamp from SDK JSON format: {"__timestamp_micros_since_unix_epoch__": "123456"}
fn parse_timestamp_json(val: &Value) -> Result<Timestamp, String> {
    let micros_str = val.get("__timestamp_micros_since_unix_epoch__")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid timestamp field")?;

    let micros: i64 = micros_str.parse()
        .map_err(|e| format!("Invalid timestamp micros: {}", e))?;

    Ok(Timestamp::from_micros_since_unix_epoch(micros))
}

/// Counters exported as numbers or, for u64 columns, as decimal strings.
/// Negative values are clamped to zero.
fn parse_counter(val: Option<&Value>) -> Option<u64> {
    match val? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_i64().map(sanitize_xp)),
        Value::String(s) => s.parse::<i64>().ok().map(sanitize_xp),
        _ => None,
    }
}

/// Same as `parse_counter` for u32 columns; values past u32::MAX saturate
fn parse_u32_counter(val: Option<&Value>) -> Option<u32> {
    parse_counter(val).map(|n| u32::try_from(n).unwrap_or(u32::MAX))
}

fn require_authorized(ctx: &ReducerContext, reducer_name: &str) -> Result<(), String> {
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        log::warn!("Unauthorized {} attempt by {}", reducer_name, ctx.sender);
        return Err("Unauthorized".to_string());
    }
    Ok(())
}

fn parse_array(json_data: &str, what: &str) -> Result<Vec<Value>, String> {
    let data: Value = serde_json::from_str(json_data)
        .map_err(|e| format!("Invalid JSON: {}", e))?;

    match data {
        Value::Array(items) => Ok(items),
        _ => Err(format!("Expected JSON array of {}", what)),
    }
}

fn parse_player(i: usize, p: &Value) -> Result<Player, String> {
    let created_at = parse_timestamp_json(p.get("createdAt").ok_or(format!("Player {}: missing createdAt", i))?)?;
    let optional_ts = |key: &str| p.get(key).and_then(|v| parse_timestamp_json(v).ok());

    // Re-format so only clean ISO dates go back in
    let last_activity_date = p.get("lastActivityDate")
        .and_then(|v| v.as_str())
        .and_then(|s| parse_activity_date(Some(s)))
        .map(format_activity_date);

    let current_streak = parse_u32_counter(p.get("currentStreak")).unwrap_or(0);
    let longest_streak = parse_u32_counter(p.get("longestStreak")).unwrap_or(0);

    Ok(Player {
        id: p.get("id").and_then(|v| v.as_str()).ok_or(format!("Player {}: missing id", i))?.to_string(),
        name: p.get("name").and_then(|v| v.as_str()).ok_or(format!("Player {}: missing name", i))?.to_string(),
        classification: p.get("classification").and_then(|v| v.as_str()).map(|s| s.to_string()),
        total_xp: parse_counter(p.get("totalXp")).ok_or(format!("Player {}: missing totalXp", i))?,
        gold: parse_counter(p.get("gold")).unwrap_or(0),
        current_streak,
        // Old exports may carry longest < current
        longest_streak: longest_streak.max(current_streak),
        last_activity_date,
        streak_updated_at: optional_ts("streakUpdatedAt").unwrap_or(created_at),
        tasks_completed: parse_u32_counter(p.get("tasksCompleted")).unwrap_or(0),
        created_at,
        last_seen: optional_ts("lastSeen").unwrap_or(created_at),
    })
}

fn parse_contribution(i: usize, c: &Value) -> Result<BossContribution, String> {
    Ok(BossContribution {
        id: 0, // auto_inc
        boss_id: parse_counter(c.get("bossId")).ok_or(format!("Contribution {}: missing bossId", i))?,
        player_id: c.get("playerId").and_then(|v| v.as_str()).ok_or(format!("Contribution {}: missing playerId", i))?.to_string(),
        damage_dealt: parse_counter(c.get("damageDealt")).ok_or(format!("Contribution {}: missing damageDealt", i))?,
        tasks_completed: parse_u32_counter(c.get("tasksCompleted")).unwrap_or(0),
    })
}

/// Bulk restore player table from JSON array
/// Protected by authorization check - only authorized workers can call this
#[reducer]
pub fn bulk_restore_player(ctx: &ReducerContext, json_data: String) -> Result<(), String> {
    require_authorized(ctx, "bulk_restore_player")?;

    let players = parse_array(&json_data, "players")?;

    let mut count = 0;
    for (i, p) in players.iter().enumerate() {
        let player = parse_player(i, p)?;

        // Progress rows are derived, rebuild instead of restoring them
        sync_progress(ctx, &player);
        ctx.db.player().insert(player);
        count += 1;
    }

    log::info!("✅ Restored {} player records", count);
    Ok(())
}

/// Bulk restore boss_contribution table from JSON array
/// Protected by authorization check - only authorized workers can call this
#[reducer]
pub fn bulk_restore_boss_contribution(ctx: &ReducerContext, json_data: String) -> Result<(), String> {
    require_authorized(ctx, "bulk_restore_boss_contribution")?;

    let rows = parse_array(&json_data, "boss_contribution records")?;
    let contributions = rows.iter()
        .enumerate()
        .map(|(i, c)| parse_contribution(i, c))
        .collect::<Result<Vec<_>, _>>()?;

    // One row per (boss, player): fold repeats in the payload, then into live rows
    let mut count = 0;
    for restored in merge_contributions(contributions) {
        let existing = ctx.db.boss_contribution()
            .boss_id()
            .filter(&restored.boss_id)
            .find(|c| c.player_id == restored.player_id);

        match existing {
            Some(row) => {
                ctx.db.boss_contribution().id().update(merge_contribution(Some(row), restored));
            }
            None => {
                ctx.db.boss_contribution().insert(restored);
            }
        }
        count += 1;
    }

    log::info!("✅ Restored {} boss_contribution records", count);
    Ok(())
}
