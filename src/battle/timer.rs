//! Per-player time accounting: round/total/overtime budgets, once-per-second
//! broadcast, penalty accrual on overflow.

use crate::battle::state::{
    BattleState, OVERTIME_LIMIT_MS, PENALTY_MAX, PENALTY_STEP, ROUND_LIMIT_MS, TOTAL_LIMIT_MS,
};
use crate::events::{PenaltyApplied, ServerEvent, TimerSnapshot};
use crate::types::UserId;

/// Result of one logical tick.
#[derive(Default)]
pub struct TickResult {
    pub events: Vec<ServerEvent>,
    /// Set when this tick pushed the speaker to the penalty ceiling.
    pub forfeit_offender: Option<UserId>,
}

/// Open the current stage's turn: round usage restarts from zero and the
/// speaker gets a clean overtime slate.
pub fn start_turn(battle: &mut BattleState, now: i64) {
    let Some(speaker) = battle.current_speaker().cloned() else {
        return;
    };
    battle.turn_started_at = Some(now);
    battle.last_timer_broadcast = None;
    let timer = battle.timer_mut(&speaker);
    timer.is_overtime = false;
    timer.overtime_started_at = None;
}

/// Close the turn at the end of the speaker's message: elapsed round time is
/// absorbed into the total budget and the turn anchor is cleared.
pub fn absorb_turn(battle: &mut BattleState, now: i64) {
    let Some(speaker) = battle.current_speaker().cloned() else {
        return;
    };
    if let Some(started) = battle.turn_started_at.take() {
        let timer = battle.timer_mut(&speaker);
        timer.total_time_used_ms += (now - started).max(0);
        timer.is_overtime = false;
        timer.overtime_started_at = None;
    }
}

/// Live timer values for the active speaker, or None outside a turn.
pub fn snapshot(battle: &BattleState, now: i64) -> Option<TimerSnapshot> {
    let speaker = battle.current_speaker()?.clone();
    let started = battle.turn_started_at?;
    let timer = battle.timer(&speaker);

    let round_used = (now - started).max(0);
    let total_used = timer.total_time_used_ms + round_used;
    let overtime_remaining = match (timer.is_overtime, timer.overtime_started_at) {
        (true, Some(ot_start)) => (OVERTIME_LIMIT_MS - (now - ot_start)).max(0),
        _ => 0,
    };

    Some(TimerSnapshot {
        current_player_id: speaker,
        round_time_remaining_sec: (ROUND_LIMIT_MS - round_used).max(0) / 1_000,
        total_time_remaining_sec: (TOTAL_LIMIT_MS - total_used).max(0) / 1_000,
        is_overtime: timer.is_overtime,
        overtime_remaining_sec: overtime_remaining / 1_000,
        round_limit_sec: ROUND_LIMIT_MS / 1_000,
        total_limit_sec: TOTAL_LIMIT_MS / 1_000,
    })
}

/// True when the speaker has exhausted the live budget for this instant.
/// Round and total overflow only fire outside overtime; inside overtime only
/// the 30 s grace window matters.
pub fn overflow_due(battle: &BattleState, now: i64) -> bool {
    let Some(speaker) = battle.current_speaker() else {
        return false;
    };
    let Some(started) = battle.turn_started_at else {
        return false;
    };
    let timer = battle.timer(speaker);

    if timer.is_overtime {
        return match timer.overtime_started_at {
            Some(ot_start) => now - ot_start > OVERTIME_LIMIT_MS,
            None => false,
        };
    }
    let round_used = now - started;
    let total_used = timer.total_time_used_ms + round_used;
    round_used > ROUND_LIMIT_MS || total_used > TOTAL_LIMIT_MS
}

/// Adjust a player's penalty score by a signed delta, clamped to
/// `[0, PENALTY_MAX]`. Returns the notification payload and whether this
/// step first reached the ceiling. Only positive deltas count towards
/// `penalty_count`.
pub fn add_penalty(
    battle: &mut BattleState,
    user_id: &str,
    points: i32,
    by_referee: bool,
) -> (PenaltyApplied, bool) {
    let timer = battle.timer_mut(user_id);
    let before = timer.penalty_points;
    let after = (before as i64 + points as i64).clamp(0, PENALTY_MAX as i64) as u32;
    timer.penalty_points = after;
    if points > 0 {
        timer.penalty_count += 1;
    }
    let reached = before < PENALTY_MAX && after >= PENALTY_MAX;
    (
        PenaltyApplied {
            user_id: user_id.to_string(),
            points,
            penalty_points: timer.penalty_points,
            penalty_count: timer.penalty_count,
            by_referee,
        },
        reached,
    )
}

/// Apply one overflow to the current speaker: penalty step, then a fresh 30 s
/// overtime window. A later overflow inside overtime lands here again.
pub fn apply_overflow(battle: &mut BattleState, now: i64) -> TickResult {
    let Some(speaker) = battle.current_speaker().cloned() else {
        return TickResult::default();
    };
    let mut result = TickResult::default();

    let (penalty, reached) = add_penalty(battle, &speaker, PENALTY_STEP as i32, false);
    result.events.push(ServerEvent::PenaltyApplied(penalty));

    let timer = battle.timer_mut(&speaker);
    timer.is_overtime = true;
    timer.overtime_started_at = Some(now);

    if reached {
        result.forfeit_offender = Some(speaker);
    } else {
        result.events.push(ServerEvent::OvertimeGranted {
            user_id: speaker,
            overtime_limit_sec: OVERTIME_LIMIT_MS / 1_000,
        });
    }
    result
}

/// One logical tick: overflow handling first, then the `timer_update`
/// broadcast when a whole-second reading changed.
pub fn tick(battle: &mut BattleState, now: i64) -> TickResult {
    let mut result = if overflow_due(battle, now) {
        apply_overflow(battle, now)
    } else {
        TickResult::default()
    };

    if let Some(snap) = snapshot(battle, now) {
        let reading = (
            snap.round_time_remaining_sec,
            snap.total_time_remaining_sec,
            snap.overtime_remaining_sec,
        );
        if battle.last_timer_broadcast != Some(reading) {
            battle.last_timer_broadcast = Some(reading);
            result.events.push(ServerEvent::TimerUpdate(snap));
        }
    }
    result
}
