use spacetimedb::{
    ReducerContext, Identity, Table, Timestamp, ScheduleAt,
    table, reducer, view,
};
use chrono::NaiveDate;

// Progression & reward engine (pure, no db access)
pub mod boss;
pub mod progression;
pub mod quest;
pub mod rank;
pub mod streak;

// Import bulk restore reducers for disaster recovery
mod restore;

use boss::{ArenaError, BossStatus, DamageOutcome};
use quest::{Classification, Difficulty, DifficultyCounts, QuestUnlock, Timeframe};
use rank::RankTier;
use streak::Streak;

// ==================== CONSTANTS ====================

/// Primary key of the single arena registry row
const ARENA_ROW_ID: u8 = 0;

/// Quest tiers re-evaluated on connect / refresh (daily has no requirement)
const GATED_TIMEFRAMES: [Timeframe; 3] = [Timeframe::Weekly, Timeframe::Monthly, Timeframe::Yearly];

/// XP awarded for completing a task
fn task_xp(difficulty: Difficulty) -> u64 {
    match difficulty {
        Difficulty::Easy => 10,
        Difficulty::Medium => 25,
        Difficulty::Hard => 50,
    }
}

/// Raw damage a completed task deals to the active boss (clamped again by the ledger)
fn task_damage(difficulty: Difficulty) -> i64 {
    match difficulty {
        Difficulty::Easy => 10,
        Difficulty::Medium => 25,
        Difficulty::Hard => 50,
    }
}

// ==================== HELPER FUNCTIONS ====================

/// First 8 chars of an id for log lines
fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn is_authorized(ctx: &ReducerContext) -> bool {
    ctx.db.authorized_worker().identity().find(&ctx.sender).is_some()
}

/// Game day for the reducer's timestamp (resets at midnight PST)
fn current_game_day(ctx: &ReducerContext) -> NaiveDate {
    streak::game_day(ctx.timestamp.to_micros_since_unix_epoch())
}

/// Get player from session using the sender's identity
fn get_player(ctx: &ReducerContext) -> Result<Player, String> {
    let session = ctx.db.session()
        .connection_id()
        .find(&ctx.sender)
        .ok_or("No session found".to_string())?;

    ctx.db.player()
        .id()
        .find(&session.player_id)
        .ok_or("Player not found".to_string())
}

impl Player {
    fn new(id: String, name: String, classification: Option<String>, now: Timestamp) -> Self {
        Player {
            id,
            name,
            classification,
            total_xp: 0,
            gold: 0,
            current_streak: 0,
            longest_streak: 0,
            last_activity_date: None,
            streak_updated_at: now,
            tasks_completed: 0,
            created_at: now,
            last_seen: now,
        }
    }

    pub fn streak(&self) -> Streak {
        Streak {
            current_streak: self.current_streak,
            longest_streak: self.longest_streak,
            last_activity_date: streak::parse_activity_date(self.last_activity_date.as_deref()),
        }
    }

    fn set_streak(&mut self, streak: Streak, now: Timestamp) {
        self.current_streak = streak.current_streak;
        self.longest_streak = streak.longest_streak;
        self.last_activity_date = streak.last_activity_date.map(streak::format_activity_date);
        self.streak_updated_at = now;
    }

    pub fn classification(&self) -> Classification {
        Classification::resolve(self.classification.as_deref())
    }
}

/// Decay check on read. Writes only when a live streak actually breaks, so running it
/// again for the same day changes nothing.
fn check_streak_decay(ctx: &ReducerContext, player: &mut Player, today: NaiveDate) -> bool {
    let decay = streak::evaluate_streak_decay(&player.streak(), today);
    if !decay.decay_applied || player.current_streak == decay.current_streak {
        return false;
    }

    log::info!("[STREAK] broken player:{} lost_streak:{} longest:{} last_activity:{}",
        short_id(&player.id), player.current_streak, player.longest_streak,
        player.last_activity_date.as_deref().unwrap_or("none"));

    player.current_streak = decay.current_streak;
    player.streak_updated_at = ctx.timestamp;
    true
}

/// Rewrite the derived progress row from total_xp. Never read back as input.
fn sync_progress(ctx: &ReducerContext, player: &Player) {
    let progress = progression::progress_within_level(player.total_xp);
    let rank = rank::classify_rank(progress.level);

    let row = PlayerProgress {
        player_id: player.id.clone(),
        total_xp: player.total_xp,
        level: progress.level,
        current_xp: progress.current_xp,
        max_xp: progress.max_xp,
        percentage: progress.percentage,
        rank: rank.tier,
        rank_primary_color: rank.colors.primary.to_string(),
        rank_accent_color: rank.colors.accent.to_string(),
        rank_glow_color: rank.colors.glow.to_string(),
        gold: player.gold,
        current_streak: player.current_streak,
        longest_streak: player.longest_streak,
        updated_at: ctx.timestamp,
    };

    if ctx.db.player_progress().player_id().find(&player.id).is_some() {
        ctx.db.player_progress().player_id().update(row);
    } else {
        ctx.db.player_progress().insert(row);
    }
}

/// Child-tier task counts inside the current window of `timeframe`
fn count_child_tasks(ctx: &ReducerContext, player_id: &String, timeframe: Timeframe, today: NaiveDate) -> DifficultyCounts {
    let Some(child) = timeframe.child() else {
        return DifficultyCounts::default();
    };

    // ISO dates compare correctly as strings
    let window_start = streak::format_activity_date(timeframe.window_start(today));
    let window_end = streak::format_activity_date(today);

    quest::tally_difficulties(
        ctx.db.completed_task()
            .player_id()
            .filter(player_id)
            .filter(|t| t.timeframe == child)
            .filter(|t| t.game_day >= window_start && t.game_day <= window_end)
            .map(|t| t.difficulty),
    )
}

/// Drop tasks no quest window can count any more (older than the yearly window)
fn prune_stale_tasks(ctx: &ReducerContext, player_id: &String, today: NaiveDate) -> usize {
    let cutoff = streak::format_activity_date(quest::retention_start(today));
    let stale: Vec<_> = ctx.db.completed_task()
        .player_id()
        .filter(player_id)
        .filter(|t| t.game_day < cutoff)
        .map(|t| t.id)
        .collect();

    let pruned = stale.len();
    for id in stale {
        ctx.db.completed_task().id().delete(&id);
    }
    if pruned > 0 {
        log::info!("[QUEST] pruned player:{} tasks:{} before:{}", short_id(player_id), pruned, cutoff);
    }
    pruned
}

/// Evaluate one quest tier and store the result for the client
fn evaluate_and_store_quest(ctx: &ReducerContext, player: &Player, timeframe: Timeframe, today: NaiveDate) -> QuestUnlock {
    let counts = count_child_tasks(ctx, &player.id, timeframe, today);
    let result = quest::evaluate_quest_unlock(timeframe, counts, player.classification());

    let existing = ctx.db.quest_progress()
        .player_id()
        .filter(&player.id)
        .find(|q| q.timeframe == timeframe);

    let row = QuestProgress {
        id: existing.as_ref().map_or(0, |q| q.id),
        player_id: player.id.clone(),
        timeframe,
        window_start: streak::format_activity_date(timeframe.window_start(today)),
        unlocked: result.unlocked,
        progress: result.progress,
        easy_completed: counts.easy,
        medium_completed: counts.medium,
        hard_completed: counts.hard,
        evaluated_at: ctx.timestamp,
    };

    match existing {
        Some(previous) => {
            let newly_unlocked = result.unlocked && (!previous.unlocked || previous.window_start != row.window_start);
            if newly_unlocked {
                log::info!("[QUEST] unlocked player:{} timeframe:{} classification:{} easy:{} medium:{} hard:{}",
                    short_id(&player.id), timeframe.as_str(), player.classification().as_str(),
                    counts.easy, counts.medium, counts.hard);
            }
            ctx.db.quest_progress().id().update(row);
        }
        None => {
            ctx.db.quest_progress().insert(row);
        }
    }

    result
}

fn refresh_quest_rows(ctx: &ReducerContext, player: &Player, today: NaiveDate) {
    for timeframe in GATED_TIMEFRAMES {
        evaluate_and_store_quest(ctx, player, timeframe, today);
    }
}

// -------------------- Arena registry --------------------
// Single row pointing at the active boss. Every change goes through a
// compare-and-swap on active_boss_id so two spawners can't both claim it.

fn load_arena(ctx: &ReducerContext) -> ArenaRegistry {
    if let Some(registry) = ctx.db.arena_registry().id().find(&ARENA_ROW_ID) {
        return registry;
    }
    ctx.db.arena_registry().insert(ArenaRegistry {
        id: ARENA_ROW_ID,
        active_boss_id: None,
        version: 0,
    })
}

fn cas_arena(ctx: &ReducerContext, expected: Option<u64>, next: Option<u64>) -> Result<(), ArenaError> {
    let registry = load_arena(ctx);
    let swapped = boss::swap_arena(&registry, expected, next)?;
    ctx.db.arena_registry().id().update(swapped);
    Ok(())
}

/// Clear the arena if it still points at `boss_id`
fn release_arena(ctx: &ReducerContext, boss_id: u64) {
    if let Err(e) = cas_arena(ctx, Some(boss_id), None) {
        log::warn!("[BOSS] release skipped boss:{} reason:{}", boss_id, e);
    }
}

fn active_boss(ctx: &ReducerContext) -> Option<BossEvent> {
    load_arena(ctx)
        .active_boss_id
        .and_then(|id| ctx.db.boss_event().id().find(&id))
}

fn cancel_expiry_schedule(ctx: &ReducerContext, boss_id: u64) {
    let schedules: Vec<_> = ctx.db.boss_expiry_schedule()
        .iter()
        .filter(|s| s.boss_id == boss_id)
        .map(|s| s.id)
        .collect();
    for id in schedules {
        ctx.db.boss_expiry_schedule().id().delete(&id);
    }
}

fn expire_boss_row(ctx: &ReducerContext, mut boss: BossEvent, reason: &str) {
    boss.status = BossStatus::Expired;
    let boss_id = boss.id;
    let hp_left = boss.current_hp;
    ctx.db.boss_event().id().update(boss);

    release_arena(ctx, boss_id);
    cancel_expiry_schedule(ctx, boss_id);

    log::info!("[BOSS] expired boss:{} hp_left:{} reason:{}", boss_id, hp_left, reason);
}

/// Apply one hit from `player_id` to the active boss, if any
fn strike_active_boss(ctx: &ReducerContext, player_id: &String, raw_damage: i64) -> Option<DamageOutcome> {
    let mut boss = active_boss(ctx)?;

    // Conditional update: only an active boss with HP left can be hit.
    // This is what stops two lethal hits from both paying out.
    if !boss::accepts_hits(&boss) {
        return None;
    }

    if boss::is_past_window(&boss, ctx.timestamp) {
        expire_boss_row(ctx, boss, "window_elapsed");
        return None;
    }

    let outcome = boss::apply_boss_damage(&boss, raw_damage);
    boss.current_hp = outcome.new_hp;
    if outcome.defeated {
        boss.status = BossStatus::Defeated;
        boss.defeated_at = Some(ctx.timestamp);
    }
    let boss_id = boss.id;
    ctx.db.boss_event().id().update(boss);

    let existing = ctx.db.boss_contribution()
        .boss_id()
        .filter(&boss_id)
        .find(|c| &c.player_id == player_id);
    let contribution = boss::record_contribution(existing, boss_id, player_id, outcome.damage);
    if contribution.id == 0 {
        ctx.db.boss_contribution().insert(contribution);
    } else {
        ctx.db.boss_contribution().id().update(contribution);
    }

    if outcome.defeated {
        log::info!("[BOSS] defeated boss:{} final_blow:{}", boss_id, short_id(player_id));
        settle_boss(ctx, boss_id);
    }

    Some(outcome)
}

/// Pay out a defeated boss exactly once
fn settle_boss(ctx: &ReducerContext, boss_id: u64) {
    let mut boss = match ctx.db.boss_event().id().find(&boss_id) {
        Some(b) => b,
        None => {
            log::error!("settle_boss: Boss {} not found", boss_id);
            return;
        }
    };

    if !boss::payable(&boss) {
        log::warn!("settle_boss: Boss {} not payable (status:{:?} distributed:{}), ignoring",
            boss_id, boss.status, boss.rewards_distributed);
        return;
    }

    // Flag first so any later defeat path sees it already settled
    boss.rewards_distributed = true;
    let xp_pool = boss.xp_reward_pool;
    let gold_pool = boss.gold_reward_pool;
    ctx.db.boss_event().id().update(boss);

    let contributions: Vec<_> = ctx.db.boss_contribution().boss_id().filter(&boss_id).collect();
    let shares = boss::distribute_boss_rewards(&contributions, xp_pool, gold_pool);

    for share in &shares {
        match ctx.db.player().id().find(&share.player_id) {
            Some(mut player) => {
                let level_before = progression::level_from_total_xp(player.total_xp);
                player.total_xp = player.total_xp.saturating_add(share.xp_awarded);
                player.gold = player.gold.saturating_add(share.gold_awarded);
                let level_after = progression::level_from_total_xp(player.total_xp);
                ctx.db.player().id().update(player.clone());
                sync_progress(ctx, &player);
                if level_after > level_before {
                    log::info!("[LEVEL] up player:{} {} → {} source:boss", short_id(&player.id), level_before, level_after);
                }
            }
            None => {
                log::warn!("settle_boss: contributor {} missing, reward recorded but not applied", share.player_id);
            }
        }

        ctx.db.boss_reward().insert(BossReward {
            id: 0,
            boss_id,
            player_id: share.player_id.clone(),
            xp_awarded: share.xp_awarded,
            gold_awarded: share.gold_awarded,
            awarded_at: ctx.timestamp,
        });
    }

    let xp_paid: u64 = shares.iter().map(|s| s.xp_awarded).sum();
    let gold_paid: u64 = shares.iter().map(|s| s.gold_awarded).sum();
    log::info!("[BOSS] settled boss:{} contributors:{} xp:{}/{} gold:{}/{}",
        boss_id, shares.len(), xp_paid, xp_pool, gold_paid, gold_pool);

    release_arena(ctx, boss_id);
    cancel_expiry_schedule(ctx, boss_id);
}

// ==================== TABLES ====================

/// Session links ephemeral connection to stable player
/// PRIVATE: Links connection identity to player ID (no PII)
#[table(name = session)]
pub struct Session {
    #[primary_key]
    pub connection_id: Identity,

    /// Stable player ID - verified by gateway
    pub player_id: String,

    /// When this session was created
    pub connected_at: Timestamp,
}

/// Identities allowed to call admin reducers (module owner, gateway)
#[table(name = authorized_worker)]
pub struct AuthorizedWorker {
    #[primary_key]
    pub identity: Identity,
}

/// Player profile: XP, gold, streak
/// PRIVATE: Clients access via my_player view
#[table(name = player)]
#[derive(Debug, Clone)]
pub struct Player {
    #[primary_key]
    pub id: String,

    pub name: String,

    /// Personality profile as stored by the profile service.
    /// Kept raw; unknown values resolve to the default profile at read time.
    pub classification: Option<String>,

    /// Cumulative XP. Level is derived from this, never stored.
    pub total_xp: u64,

    pub gold: u64,

    pub current_streak: u32,

    /// Never decreases
    pub longest_streak: u32,

    /// Last game day with a completed task (YYYY-MM-DD)
    pub last_activity_date: Option<String>,

    /// Last time a streak field changed (increment or decay)
    pub streak_updated_at: Timestamp,

    pub tasks_completed: u32,

    pub created_at: Timestamp,

    pub last_seen: Timestamp,
}

// ==================== VIEWS ====================

/// View: Returns only the current user's player data
#[view(name = my_player, public)]
fn my_player(ctx: &spacetimedb::ViewContext) -> Option<Player> {
    let session = ctx.db.session().connection_id().find(ctx.sender)?;
    ctx.db.player().id().find(&session.player_id)
}

/// Derived level/rank snapshot for display
/// Rewritten from player.total_xp on every XP change
#[table(name = player_progress, public)]
#[derive(Debug, Clone)]
pub struct PlayerProgress {
    #[primary_key]
    pub player_id: String,

    pub total_xp: u64,

    pub level: u32,

    /// XP earned inside the current level
    pub current_xp: u64,

    /// XP needed for the next level
    pub max_xp: u64,

    /// 0-100
    pub percentage: f64,

    pub rank: RankTier,

    pub rank_primary_color: String,

    pub rank_accent_color: String,

    pub rank_glow_color: String,

    pub gold: u64,

    pub current_streak: u32,

    pub longest_streak: u32,

    pub updated_at: Timestamp,
}

/// Completed tasks (the task store). Queried by window for quest unlocks.
#[table(name = completed_task)]
#[derive(Debug, Clone)]
pub struct CompletedTask {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub player_id: String,

    /// Tier of the quest this task belonged to
    pub timeframe: Timeframe,

    pub difficulty: Difficulty,

    /// Game day of completion (YYYY-MM-DD)
    pub game_day: String,

    pub completed_at: Timestamp,
}

/// Last unlock evaluation per player and quest tier
#[table(name = quest_progress, public)]
#[derive(Debug, Clone)]
pub struct QuestProgress {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub player_id: String,

    pub timeframe: Timeframe,

    /// First game day of the window this evaluation covers
    pub window_start: String,

    pub unlocked: bool,

    /// 0.0-1.0, display only
    pub progress: f64,

    pub easy_completed: u32,

    pub medium_completed: u32,

    pub hard_completed: u32,

    pub evaluated_at: Timestamp,
}

/// Shared guild boss
#[table(name = boss_event, public)]
#[derive(Debug, Clone, PartialEq)]
pub struct BossEvent {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    /// 1-5, see boss::tier_config
    pub tier: u8,

    pub name: String,

    pub max_hp: u32,

    /// Always within [0, max_hp]
    pub current_hp: u32,

    pub status: BossStatus,

    pub xp_reward_pool: u64,

    pub gold_reward_pool: u64,

    pub spawned_at: Timestamp,

    /// After this the boss can be expired (by schedule or by the next spawn)
    pub expires_at: Timestamp,

    pub defeated_at: Option<Timestamp>,

    /// Set once, before the first payout row is written
    pub rewards_distributed: bool,
}

/// One row per (boss, player), cumulative
#[table(name = boss_contribution, public)]
#[derive(Debug, Clone, PartialEq)]
pub struct BossContribution {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub boss_id: u64,

    #[index(btree)]
    pub player_id: String,

    pub damage_dealt: u64,

    pub tasks_completed: u32,
}

/// Payout ledger written when a boss is settled
#[table(name = boss_reward, public)]
#[derive(Debug, Clone)]
pub struct BossReward {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub boss_id: u64,

    pub player_id: String,

    pub xp_awarded: u64,

    pub gold_awarded: u64,

    pub awarded_at: Timestamp,
}

/// Single-row registry of the active boss
#[table(name = arena_registry)]
#[derive(Debug, Clone, PartialEq)]
pub struct ArenaRegistry {
    #[primary_key]
    pub id: u8,

    pub active_boss_id: Option<u64>,

    /// Bumped on every swap
    pub version: u64,
}

/// Fires expire_boss when a boss window closes
#[table(name = boss_expiry_schedule, scheduled(expire_boss))]
pub struct BossExpirySchedule {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    pub boss_id: u64,

    pub scheduled_at: ScheduleAt,
}

// ==================== REDUCERS ====================

/// Initialize module
#[reducer(init)]
pub fn init(ctx: &ReducerContext) {
    // In init, ctx.sender is the module owner identity
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        ctx.db.authorized_worker().insert(AuthorizedWorker {
            identity: ctx.sender,
        });
    }

    load_arena(ctx);

    log::info!("Habit Quest module initialized successfully");
}

/// Create a verified session for a client identity
/// Called by the gateway AFTER verifying the player's token
#[reducer]
pub fn create_session(ctx: &ReducerContext, client_identity: String, player_id: String) -> Result<(), String> {
    if !is_authorized(ctx) {
        log::warn!("Unauthorized create_session attempt by {}", ctx.sender);
        return Err("Unauthorized: only gateway can create sessions".to_string());
    }

    let identity = Identity::from_hex(&client_identity)
        .map_err(|e| format!("Invalid identity hex string: {}", e))?;

    // Delete stale sessions: same player (unclean reconnect) OR same connection_id
    let stale_sessions: Vec<_> = ctx.db.session()
        .iter()
        .filter(|s| s.player_id == player_id || s.connection_id == identity)
        .map(|s| s.connection_id)
        .collect();
    for conn_id in stale_sessions {
        ctx.db.session().connection_id().delete(&conn_id);
    }

    ctx.db.session().insert(Session {
        connection_id: identity,
        player_id: player_id.clone(),
        connected_at: ctx.timestamp,
    });

    log::info!("[SESSION] created player:{} ws:{}", short_id(&player_id), short_id(&client_identity));
    Ok(())
}

#[reducer(client_disconnected)]
pub fn on_disconnect(ctx: &ReducerContext) {
    if ctx.db.session().connection_id().delete(&ctx.sender) {
        log::debug!("[SESSION] closed ws:{}", ctx.sender);
    }
}

/// Player connects: get or create the profile and run the streak decay check
#[reducer]
pub fn connect(ctx: &ReducerContext, name: String, classification: Option<String>) -> Result<(), String> {
    let session = ctx.db.session()
        .connection_id()
        .find(&ctx.sender)
        .ok_or("Session not found - verify with gateway first".to_string())?;

    let player_id = session.player_id;
    let today = current_game_day(ctx);

    let player = if let Some(mut existing) = ctx.db.player().id().find(&player_id) {
        existing.name = name;
        existing.last_seen = ctx.timestamp;
        // Only overwrite when the profile service sent one
        if classification.is_some() {
            existing.classification = classification;
        }

        check_streak_decay(ctx, &mut existing, today);
        ctx.db.player().id().update(existing.clone());
        prune_stale_tasks(ctx, &player_id, today);

        let level = progression::level_from_total_xp(existing.total_xp);
        log::info!("[CONNECT] player=\"{}\" player_id={} type=returning level={} rank={} xp={} streak={} classification={}",
            existing.name, short_id(&player_id), level, rank::rank_tier_for_level(level).as_str(),
            existing.total_xp, existing.current_streak, existing.classification().as_str());

        existing
    } else {
        let new_player = Player::new(player_id.clone(), name, classification, ctx.timestamp);
        ctx.db.player().insert(new_player.clone());

        log::info!("[CONNECT] player=\"{}\" player_id={} type=new classification={}",
            new_player.name, short_id(&player_id), new_player.classification().as_str());

        new_player
    };

    sync_progress(ctx, &player);
    refresh_quest_rows(ctx, &player, today);
    Ok(())
}

/// Self-service update of the personality profile
#[reducer]
pub fn set_classification(ctx: &ReducerContext, classification: String) -> Result<(), String> {
    let mut player = get_player(ctx)?;

    let raw = classification.trim().to_string();
    let resolved = Classification::resolve(Some(raw.as_str()));
    if Classification::parse(&raw).is_none() {
        log::warn!("[PROFILE] unknown classification=\"{}\" player:{} using:{}",
            raw, short_id(&player.id), resolved.as_str());
    }

    player.classification = Some(raw);
    ctx.db.player().id().update(player.clone());

    refresh_quest_rows(ctx, &player, current_game_day(ctx));
    log::info!("[PROFILE] classification player:{} profile:{}", short_id(&player.id), resolved.as_str());
    Ok(())
}

/// Record a completed task: streak, XP, boss damage, quest unlocks
#[reducer]
pub fn complete_task(ctx: &ReducerContext, timeframe: Timeframe, difficulty: String) -> Result<(), String> {
    let mut player = get_player(ctx)?;
    let difficulty = Difficulty::from_label(&difficulty);
    let today = current_game_day(ctx);

    ctx.db.completed_task().insert(CompletedTask {
        id: 0,
        player_id: player.id.clone(),
        timeframe,
        difficulty,
        game_day: streak::format_activity_date(today),
        completed_at: ctx.timestamp,
    });

    // Streak: increment path only (decay runs on connect)
    let streak_before = player.streak();
    let streak_after = streak::apply_streak_activity(&streak_before, today);
    if streak_after != streak_before {
        player.set_streak(streak_after, ctx.timestamp);
    }

    let xp = task_xp(difficulty);
    let level_before = progression::level_from_total_xp(player.total_xp);
    player.total_xp = player.total_xp.saturating_add(xp);
    player.tasks_completed = player.tasks_completed.saturating_add(1);
    let level_after = progression::level_from_total_xp(player.total_xp);
    ctx.db.player().id().update(player.clone());

    if level_after > level_before {
        log::info!("[LEVEL] up player:{} {} → {} source:task", short_id(&player.id), level_before, level_after);
    }

    let strike = strike_active_boss(ctx, &player.id, task_damage(difficulty));

    // A lethal hit pays this player too, so re-read before syncing
    let player = ctx.db.player().id().find(&player.id).unwrap_or(player);
    sync_progress(ctx, &player);

    if let Some(parent) = timeframe.parent() {
        evaluate_and_store_quest(ctx, &player, parent, today);
    }

    let (damage, boss_hp) = match strike {
        Some(outcome) => (outcome.damage, outcome.new_hp.to_string()),
        None => (0, "none".to_string()),
    };
    log::info!("[TASK] complete player:{} timeframe:{} difficulty:{:?} xp:{} streak:{} damage:{} boss_hp:{}",
        short_id(&player.id), timeframe.as_str(), difficulty, xp, player.current_streak, damage, boss_hp);
    Ok(())
}

/// Re-evaluate weekly/monthly/yearly quest rows for the caller
#[reducer]
pub fn refresh_quests(ctx: &ReducerContext) -> Result<(), String> {
    let player = get_player(ctx)?;
    refresh_quest_rows(ctx, &player, current_game_day(ctx));
    Ok(())
}

/// Admin: spawn a new guild boss
/// Rejected while a boss is active and inside its window; a stale one is expired first
#[reducer]
pub fn spawn_boss(ctx: &ReducerContext, tier: u8) -> Result<(), String> {
    if !is_authorized(ctx) {
        log::warn!("Unauthorized spawn_boss attempt by {}", ctx.sender);
        return Err("Unauthorized".to_string());
    }

    let registry = load_arena(ctx);
    let current = registry.active_boss_id.and_then(|id| ctx.db.boss_event().id().find(&id));

    let plan = boss::decide_spawn(current.as_ref(), ctx.timestamp).map_err(|e| {
        log::warn!("[BOSS] spawn rejected tier:{} reason:{}", tier, e);
        e.to_string()
    })?;

    let mut expected = registry.active_boss_id;
    if let (Some(stale_id), Some(stale)) = (plan.expire, current) {
        expire_boss_row(ctx, stale, "replaced_by_spawn");
        if expected == Some(stale_id) {
            expected = None;
        }
    }

    let config = boss::tier_config(tier);
    if config.tier != tier {
        log::warn!("[BOSS] tier {} out of range, using {}", tier, config.tier);
    }

    let spawned = ctx.db.boss_event().insert(boss::new_boss_event(tier, ctx.timestamp));
    cas_arena(ctx, expected, Some(spawned.id)).map_err(|e| e.to_string())?;

    ctx.db.boss_expiry_schedule().insert(BossExpirySchedule {
        id: 0,
        boss_id: spawned.id,
        scheduled_at: ScheduleAt::Time(spawned.expires_at.into()),
    });

    log::info!("[BOSS] spawned boss:{} tier:{} name=\"{}\" hp:{} xp_pool:{} gold_pool:{}",
        spawned.id, spawned.tier, spawned.name, spawned.max_hp, spawned.xp_reward_pool, spawned.gold_reward_pool);
    Ok(())
}

/// Expire a boss whose window closed (scheduled reducer)
#[reducer]
pub fn expire_boss(ctx: &ReducerContext, schedule: BossExpirySchedule) {
    // Only allow scheduler to call this, not clients
    if ctx.sender != ctx.identity() {
        log::warn!("Client {} attempted to call expire_boss", ctx.sender);
        return;
    }

    match ctx.db.boss_event().id().find(&schedule.boss_id) {
        Some(b) if b.status == BossStatus::Active && boss::is_past_window(&b, ctx.timestamp) => {
            expire_boss_row(ctx, b, "schedule");
        }
        Some(b) => {
            log::debug!("expire_boss: Boss {} is {:?}, nothing to do", b.id, b.status);
        }
        None => {
            log::warn!("expire_boss: Boss {} doesn't exist", schedule.boss_id);
        }
    }

    // Clean up schedule row after handling event
    ctx.db.boss_expiry_schedule().id().delete(&schedule.id);
}

/// Admin: Reset a player's progress (keep identity, wipe stats)
#[reducer]
pub fn admin_reset_player(ctx: &ReducerContext, player_id: String) -> Result<(), String> {
    if !is_authorized(ctx) {
        log::warn!("Unauthorized admin_reset_player attempt by {}", ctx.sender);
        return Err("Unauthorized".to_string());
    }

    let mut player = ctx.db.player()
        .id()
        .find(&player_id)
        .ok_or(format!("Player {} not found", player_id))?;

    let tasks: Vec<_> = ctx.db.completed_task().player_id().filter(&player_id).map(|t| t.id).collect();
    let task_count = tasks.len();
    for id in tasks {
        ctx.db.completed_task().id().delete(&id);
    }

    let quests: Vec<_> = ctx.db.quest_progress().player_id().filter(&player_id).map(|q| q.id).collect();
    for id in quests {
        ctx.db.quest_progress().id().delete(&id);
    }

    // Boss contributions and rewards stay: they are the ledger of past encounters
    let reset = Player::new(player.id.clone(), player.name.clone(), player.classification.take(), ctx.timestamp);
    let reset = Player { created_at: player.created_at, ..reset };
    ctx.db.player().id().update(reset.clone());
    sync_progress(ctx, &reset);

    log::info!("[ADMIN] reset player:{} tasks:{}", short_id(&player_id), task_count);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_rewards_scale_with_difficulty() {
        assert!(task_xp(Difficulty::Easy) < task_xp(Difficulty::Medium));
        assert!(task_xp(Difficulty::Medium) < task_xp(Difficulty::Hard));
        assert!(task_damage(Difficulty::Easy) < task_damage(Difficulty::Hard));
    }

    #[test]
    fn test_task_damage_within_ledger_clamp() {
        for d in [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard] {
            let raw = task_damage(d);
            assert_eq!(boss::clamp_damage(raw) as i64, raw);
        }
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("abcdefghijkl"), "abcdefgh");
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id(""), "");
    }

    #[test]
    fn test_player_streak_round_trip() {
        let now = Timestamp::from_micros_since_unix_epoch(1_700_000_000_000_000);
        let mut player = Player::new("p1".to_string(), "Ada".to_string(), None, now);
        assert_eq!(player.streak(), Streak::default());

        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let after = streak::apply_streak_activity(&player.streak(), today);
        player.set_streak(after, now);
        assert_eq!(player.last_activity_date.as_deref(), Some("2024-06-01"));
        assert_eq!(player.streak(), after);
    }

    #[test]
    fn test_player_classification_fallback() {
        let now = Timestamp::from_micros_since_unix_epoch(0);
        let player = Player::new("p1".to_string(), "Ada".to_string(), Some("cortisol".to_string()), now);
        assert_eq!(player.classification(), quest::DEFAULT_CLASSIFICATION);

        let player = Player::new("p2".to_string(), "Bo".to_string(), Some("Gaba".to_string()), now);
        assert_eq!(player.classification(), Classification::Gaba);
    }
}
