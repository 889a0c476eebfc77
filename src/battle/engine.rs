//! Match state machine: entry negotiation, the message-driven turn protocol,
//! overflow and forfeit handling, the evaluation handshake, and teardown.
//!
//! Every function here runs under the owning room's lock; the only work done
//! off-lock is the evaluator call, whose completion re-acquires the lock and
//! is dropped if the match disappeared in the meantime.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::battle::state::{
    BattleState, PENALTY_MAX, STAGE_EVALUATION, STAGE_FIRST_TURN, STAGE_LAST_TURN,
    STAGE_PENALTY_TERMINAL,
};
use crate::battle::timer::{self, TickResult};
use crate::error::EventError;
use crate::events::{RoomSnapshot, ServerEvent, TurnInfo};
use crate::rating;
use crate::rooms::{broadcast_rooms_update, RoomHandle, RoomState};
use crate::storage::{MatchRecord, ProfilePatch};
use crate::types::{
    AppState, DiscussionEntry, HumanScores, Participant, Position, Role, Sender, SideVerdict,
    UserId, Verdict,
};

fn name_map(state: &RoomState) -> HashMap<UserId, String> {
    state
        .participants
        .iter()
        .map(|p| (p.user_id.clone(), p.display_name.clone()))
        .collect()
}

fn player_list(state: &RoomState) -> Vec<Participant> {
    state.players().cloned().collect()
}

/// A player finished rendering the discussion view. When the second player
/// arrives here, positions are settled, the final line-up is broadcast, and
/// the match starts after a short settling delay.
pub async fn on_view_ready(
    app: &Arc<AppState>,
    room: &Arc<RoomHandle>,
    user_id: &str,
) -> Result<(), EventError> {
    {
        let mut state = room.state.lock().await;
        if !state.battle_started || state.battle.is_some() {
            return Ok(());
        }

        let participant = state
            .participant_mut(user_id)
            .ok_or_else(|| EventError::not_found("not in this room"))?;
        if participant.discussion_view_ready {
            // Duplicate signal; the settling task is already scheduled.
            return Ok(());
        }
        participant.discussion_view_ready = true;

        let player_idx: Vec<usize> = state
            .participants
            .iter()
            .enumerate()
            .filter(|(_, p)| p.role == Role::Player)
            .map(|(i, _)| i)
            .collect();
        if player_idx.len() != 2 {
            return Ok(());
        }
        if !player_idx
            .iter()
            .all(|&i| state.participants[i].discussion_view_ready)
        {
            return Ok(());
        }

        // Settle positions before the line-up broadcast: a single chosen side
        // fixes the other, no choice at all falls back to join order.
        let (first, second) = (player_idx[0], player_idx[1]);
        match (
            state.participants[first].position,
            state.participants[second].position,
        ) {
            (None, None) => {
                state.participants[first].position = Some(Position::Agree);
                state.participants[second].position = Some(Position::Disagree);
            }
            (Some(set), None) => {
                state.participants[second].position = Some(set.opposite());
            }
            (None, Some(set)) => {
                state.participants[first].position = Some(set.opposite());
            }
            (Some(a), Some(b)) if a == b => {
                state.participants[second].position = Some(a.opposite());
            }
            _ => {}
        }

        app.hub.broadcast(
            &room.room_id,
            ServerEvent::PlayerListUpdated {
                players: player_list(&state),
            },
        );
    }

    let app = Arc::clone(app);
    let room = Arc::clone(room);
    tokio::spawn(async move {
        tokio::time::sleep(app.settle_delay).await;
        begin_battle(&app, &room).await;
    });
    Ok(())
}

/// Create the match state and open stage 1. No-op when the match already
/// exists or the line-up fell apart during the settling delay.
pub async fn begin_battle(app: &Arc<AppState>, room: &Arc<RoomHandle>) {
    {
        let mut state = room.state.lock().await;
        if !state.battle_started || state.is_completed || state.battle.is_some() {
            return;
        }

        let agree = state
            .players()
            .find(|p| p.position == Some(Position::Agree))
            .map(|p| (p.user_id.clone(), p.display_name.clone()));
        let disagree = state
            .players()
            .find(|p| p.position == Some(Position::Disagree))
            .map(|p| (p.user_id.clone(), p.display_name.clone()));
        let (Some((agree_id, agree_name)), Some((disagree_id, _))) = (agree, disagree) else {
            warn!(room_id = %room.room_id, "cannot start battle without both sides");
            return;
        };

        let now = app.clock.now_ms();
        let mut battle = BattleState::new(agree_id.clone(), disagree_id);
        battle.messages.append(Sender::System, "토론이 시작되었습니다.", now);
        let announcement =
            BattleState::turn_announcement(STAGE_FIRST_TURN, Position::Agree, &agree_name);
        battle.messages.append(Sender::System, announcement.clone(), now);
        timer::start_turn(&mut battle, now);

        app.hub.broadcast(
            &room.room_id,
            ServerEvent::MessagesUpdated {
                messages: battle.messages.snapshot(),
            },
        );
        app.hub.broadcast(
            &room.room_id,
            ServerEvent::TurnInfo(TurnInfo {
                current_player_id: Some(agree_id),
                stage: STAGE_FIRST_TURN,
                message: announcement,
                stage_description: BattleState::stage_description(STAGE_FIRST_TURN).to_string(),
            }),
        );

        state.battle = Some(battle);
        info!(room_id = %room.room_id, "battle started");
    }

    spawn_ticker(Arc::clone(app), Arc::clone(room));
}

fn spawn_ticker(app: Arc<AppState>, room: Arc<RoomHandle>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of an interval fires immediately; the turn_info for
        // the opening stage must stay ahead of the first timer_update.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !run_tick(&app, &room).await {
                break;
            }
        }
        debug!(room_id = %room.room_id, "ticker stopped");
    });
}

/// One logical tick of the match timer. Returns false once the match is gone
/// so the ticker task can exit.
pub async fn run_tick(app: &Arc<AppState>, room: &Arc<RoomHandle>) -> bool {
    let mut state = room.state.lock().await;
    let now = app.clock.now_ms();

    let result = {
        let Some(battle) = state.battle.as_mut() else {
            return false;
        };
        if !(STAGE_FIRST_TURN..=STAGE_LAST_TURN).contains(&battle.stage) {
            return true;
        }
        timer::tick(battle, now)
    };

    dispatch_tick_result(app, room, &mut state, result, now).await;
    state.battle.is_some()
}

/// Broadcast tick outcomes: penalty notifications (with their System feed
/// entries), the overtime grant, the timer reading, and the forfeit if this
/// tick reached the ceiling.
async fn dispatch_tick_result(
    app: &Arc<AppState>,
    room: &Arc<RoomHandle>,
    state: &mut RoomState,
    result: TickResult,
    now: i64,
) {
    if result.events.is_empty() && result.forfeit_offender.is_none() {
        return;
    }

    let names = name_map(state);
    let mut feed_changed = false;
    if let Some(battle) = state.battle.as_mut() {
        for event in &result.events {
            let ServerEvent::PenaltyApplied(p) = event else {
                continue;
            };
            if p.by_referee || p.points <= 0 {
                continue;
            }
            let Some(side) = battle.side_of(&p.user_id) else {
                continue;
            };
            let name = names.get(&p.user_id).cloned().unwrap_or_default();
            let text = format!(
                "{} {}님에게 벌점 {}점이 부과되었습니다. (누적 {}점)",
                side.label(),
                name,
                p.points,
                p.penalty_points
            );
            feed_changed |= battle.messages.append(Sender::System, text, now);
        }
        if feed_changed {
            app.hub.broadcast(
                &room.room_id,
                ServerEvent::MessagesUpdated {
                    messages: battle.messages.snapshot(),
                },
            );
        }
    }

    for event in result.events {
        app.hub.broadcast(&room.room_id, event);
    }

    if let Some(offender) = result.forfeit_offender {
        forfeit_locked(app, room, state, &offender).await;
    }
}

/// A message from the current speaker closes the stage and opens the next
/// one; the ninth message hands the match to the evaluator. Messages from
/// anyone else are dropped without a reply.
pub async fn on_send_message(
    app: &Arc<AppState>,
    room: &Arc<RoomHandle>,
    user_id: &str,
    text: &str,
) {
    let mut state = room.state.lock().await;
    let now = app.clock.now_ms();
    let names = name_map(&state);
    let subject_title = state.subject.title.clone();

    enum Next {
        Turn(ServerEvent, ServerEvent),
        Evaluate(ServerEvent, ServerEvent, Vec<String>, Vec<String>),
    }

    let next = {
        let Some(battle) = state.battle.as_mut() else {
            return;
        };
        if !(STAGE_FIRST_TURN..=STAGE_LAST_TURN).contains(&battle.stage) {
            return;
        }
        let speaks = battle
            .current_speaker()
            .map(|s| s == user_id)
            .unwrap_or(false);
        if !speaks {
            debug!(room_id = %room.room_id, user_id, "message from non-current speaker ignored");
            return;
        }
        let Some(side) = battle.side_of(user_id) else {
            return;
        };

        battle.log.push(DiscussionEntry {
            user_id: user_id.to_string(),
            text: text.to_string(),
            stage: battle.stage,
        });
        battle.messages.append(side.into(), text, now);
        timer::absorb_turn(battle, now);
        battle.stage += 1;

        if battle.stage <= STAGE_LAST_TURN {
            let next_side = BattleState::speaker_side(battle.stage)
                .unwrap_or(Position::Agree);
            let next_id = battle.player_for(next_side).clone();
            let name = names.get(&next_id).cloned().unwrap_or_default();
            let announcement = BattleState::turn_announcement(battle.stage, next_side, &name);
            battle
                .messages
                .append(Sender::System, announcement.clone(), now);
            timer::start_turn(battle, now);
            Next::Turn(
                ServerEvent::MessagesUpdated {
                    messages: battle.messages.snapshot(),
                },
                ServerEvent::TurnInfo(TurnInfo {
                    current_player_id: Some(next_id),
                    stage: battle.stage,
                    message: announcement,
                    stage_description: BattleState::stage_description(battle.stage).to_string(),
                }),
            )
        } else {
            battle.stage = STAGE_EVALUATION;
            Next::Evaluate(
                ServerEvent::MessagesUpdated {
                    messages: battle.messages.snapshot(),
                },
                ServerEvent::TurnInfo(TurnInfo {
                    current_player_id: None,
                    stage: STAGE_EVALUATION,
                    message: "AI가 토론을 판정하고 있습니다.".to_string(),
                    stage_description: BattleState::stage_description(STAGE_EVALUATION)
                        .to_string(),
                }),
                battle.turns_of(Position::Agree),
                battle.turns_of(Position::Disagree),
            )
        }
    };

    match next {
        Next::Turn(messages, turn) => {
            app.hub.broadcast(&room.room_id, messages);
            app.hub.broadcast(&room.room_id, turn);
        }
        Next::Evaluate(messages, turn, agree_turns, disagree_turns) => {
            app.hub.broadcast(&room.room_id, messages);
            app.hub.broadcast(&room.room_id, turn);
            let app = Arc::clone(app);
            let room = Arc::clone(room);
            tokio::spawn(async move {
                run_evaluation(app, room, subject_title, agree_turns, disagree_turns).await;
            });
        }
    }
}

/// Client-reported overflow. The reporter must be the current speaker and the
/// server clock must agree; otherwise the report is dropped.
pub async fn on_time_overflow(app: &Arc<AppState>, room: &Arc<RoomHandle>, user_id: &str) {
    let mut state = room.state.lock().await;
    let now = app.clock.now_ms();

    let result = {
        let Some(battle) = state.battle.as_mut() else {
            return;
        };
        let speaks = battle
            .current_speaker()
            .map(|s| s == user_id)
            .unwrap_or(false);
        if !speaks || !timer::overflow_due(battle, now) {
            debug!(room_id = %room.room_id, user_id, "stale overflow report ignored");
            return;
        }
        timer::apply_overflow(battle, now)
    };

    dispatch_tick_result(app, room, &mut state, result, now).await;
}

/// Evaluator handshake, run off the room lock. The completion is applied only
/// if the match still exists.
async fn run_evaluation(
    app: Arc<AppState>,
    room: Arc<RoomHandle>,
    subject_title: String,
    agree_turns: Vec<String>,
    disagree_turns: Vec<String>,
) {
    let result = app
        .judge
        .evaluate(&subject_title, &agree_turns, &disagree_turns)
        .await;

    let mut state = room.state.lock().await;
    if state.battle.is_none() {
        debug!(room_id = %room.room_id, "late evaluator completion dropped");
        return;
    }
    let now = app.clock.now_ms();

    let (raw, narration) = match result {
        Err(e) => {
            warn!(room_id = %room.room_id, error = %e, "evaluation failed");
            app.hub.broadcast(
                &room.room_id,
                ServerEvent::BattleError {
                    message: "AI 판정에 실패하여 토론이 종료되었습니다.".to_string(),
                },
            );
            state.battle = None;
            return;
        }
        Ok(outcome) => outcome,
    };

    let referee_conn = state.referee().map(|p| p.connection_id.clone());
    let verdict = {
        let Some(battle) = state.battle.as_mut() else {
            return;
        };
        let winner_user_id = if raw.winner == "agree" {
            battle.agree_id.clone()
        } else {
            battle.disagree_id.clone()
        };
        let verdict = Verdict {
            agree: raw.agree,
            disagree: raw.disagree,
            winner_user_id,
        };
        battle.ai_verdict = Some(verdict.clone());
        battle.messages.append(Sender::Judge, narration.clone(), now);
        app.hub.broadcast(
            &room.room_id,
            ServerEvent::AiJudgeMessage {
                message: narration,
                stage: STAGE_EVALUATION,
            },
        );
        app.hub.broadcast(
            &room.room_id,
            ServerEvent::MessagesUpdated {
                messages: battle.messages.snapshot(),
            },
        );
        verdict
    };

    match referee_conn {
        Some(conn) => {
            if let Some(battle) = state.battle.as_mut() {
                battle.awaiting_referee = true;
            }
            app.hub.send(
                &conn,
                ServerEvent::ShowRefereeScoreModal {
                    room_id: room.room_id.clone(),
                },
            );
        }
        None => finalize_locked(&app, &room, &mut state, verdict).await,
    }
}

fn referee_check(state: &RoomState, referee_id: &str) -> Result<(), EventError> {
    match state.participant(referee_id) {
        Some(p) if p.role == Role::Referee => Ok(()),
        Some(_) => Err(EventError::forbidden("referee action requires referee role")),
        None => Err(EventError::not_found("not in this room")),
    }
}

/// Referee penalty adjustment. `deduct` raises the target's penalty score
/// (possibly forfeiting them); a non-deduct call waives points.
pub async fn on_referee_points(
    app: &Arc<AppState>,
    room: &Arc<RoomHandle>,
    referee_id: &str,
    target: &str,
    points: u32,
    deduct: bool,
) -> Result<(), EventError> {
    if points == 0 {
        return Err(EventError::bad_request("points must be positive"));
    }
    let mut state = room.state.lock().await;
    referee_check(&state, referee_id)?;
    let now = app.clock.now_ms();

    let result = {
        let Some(battle) = state.battle.as_mut() else {
            return Err(EventError::bad_request("no active battle"));
        };
        if !battle.timers.contains_key(target) {
            return Err(EventError::not_found("target is not a player"));
        }
        let delta = if deduct {
            points as i32
        } else {
            -(points as i32)
        };
        let (event, reached) = timer::add_penalty(battle, target, delta, true);
        TickResult {
            events: vec![ServerEvent::PenaltyApplied(event)],
            forfeit_offender: reached.then(|| target.to_string()),
        }
    };

    dispatch_tick_result(app, room, &mut state, result, now).await;
    Ok(())
}

/// Referee time adjustment on the total budget, in seconds.
pub async fn on_referee_time(
    app: &Arc<AppState>,
    room: &Arc<RoomHandle>,
    referee_id: &str,
    target: &str,
    seconds: i64,
    extend: bool,
) -> Result<(), EventError> {
    if seconds <= 0 {
        return Err(EventError::bad_request("seconds must be positive"));
    }
    let mut state = room.state.lock().await;
    referee_check(&state, referee_id)?;

    let event = {
        let Some(battle) = state.battle.as_mut() else {
            return Err(EventError::bad_request("no active battle"));
        };
        if !battle.timers.contains_key(target) {
            return Err(EventError::not_found("target is not a player"));
        }
        let timer = battle.timer_mut(target);
        if extend {
            timer.total_time_used_ms = (timer.total_time_used_ms - seconds * 1_000).max(0);
            ServerEvent::TimeExtended {
                user_id: target.to_string(),
                seconds,
                total_time_used_ms: timer.total_time_used_ms,
            }
        } else {
            timer.total_time_used_ms += seconds * 1_000;
            ServerEvent::TimeReduced {
                user_id: target.to_string(),
                seconds,
                total_time_used_ms: timer.total_time_used_ms,
            }
        }
    };
    app.hub.broadcast(&room.room_id, event);
    Ok(())
}

/// Referee score submission: blend with the AI verdict (40 % AI, 60 % human),
/// recompute the winner (ties keep the AI's call), finish the match.
pub async fn on_referee_scores(
    app: &Arc<AppState>,
    room: &Arc<RoomHandle>,
    referee_id: &str,
    scores: HumanScores,
) -> Result<(), EventError> {
    if scores.agree > 100 || scores.disagree > 100 {
        return Err(EventError::bad_request("scores must be within 0..=100"));
    }
    let mut state = room.state.lock().await;
    referee_check(&state, referee_id)?;

    let verdict = {
        let Some(battle) = state.battle.as_mut() else {
            return Err(EventError::bad_request("no active battle"));
        };
        let Some(ai) = battle.ai_verdict.clone() else {
            return Err(EventError::conflict("AI verdict not available yet"));
        };
        if !battle.awaiting_referee {
            return Err(EventError::conflict("scores were not requested"));
        }
        let final_agree = blend(ai.agree.score, scores.agree);
        let final_disagree = blend(ai.disagree.score, scores.disagree);
        let winner_user_id = if final_agree > final_disagree {
            battle.agree_id.clone()
        } else if final_disagree > final_agree {
            battle.disagree_id.clone()
        } else {
            ai.winner_user_id.clone()
        };

        battle.human_scores = Some(scores);
        battle.awaiting_referee = false;
        Verdict {
            agree: SideVerdict {
                score: final_agree,
                ..ai.agree
            },
            disagree: SideVerdict {
                score: final_disagree,
                ..ai.disagree
            },
            winner_user_id,
        }
    };

    finalize_locked(app, room, &mut state, verdict).await;
    Ok(())
}

fn blend(ai: u32, human: u32) -> u32 {
    ((ai as f64 * 0.4 + human as f64 * 0.6).round() as u32).min(100)
}

/// Penalty ceiling reached: fabricate a 100/0 verdict for the opponent and
/// finish through the normal terminal path.
async fn forfeit_locked(
    app: &Arc<AppState>,
    room: &Arc<RoomHandle>,
    state: &mut RoomState,
    offender: &str,
) {
    let names = name_map(state);
    let now = app.clock.now_ms();

    let verdict = {
        let Some(battle) = state.battle.as_mut() else {
            return;
        };
        let Some(offender_side) = battle.side_of(offender) else {
            return;
        };
        let winner_side = offender_side.opposite();
        let winner_id = battle.player_for(winner_side).clone();

        battle.stage = STAGE_PENALTY_TERMINAL;
        battle.ended_by_penalty = true;
        battle.turn_started_at = None;

        let side_verdict = |side: Position| {
            if side == winner_side {
                SideVerdict {
                    score: 100,
                    good: "상대측의 벌점 초과로 승리했습니다.".to_string(),
                    bad: String::new(),
                }
            } else {
                SideVerdict {
                    score: 0,
                    good: String::new(),
                    bad: "벌점 초과로 패배 처리되었습니다.".to_string(),
                }
            }
        };
        let verdict = Verdict {
            agree: side_verdict(Position::Agree),
            disagree: side_verdict(Position::Disagree),
            winner_user_id: winner_id,
        };

        let offender_name = names.get(offender).cloned().unwrap_or_default();
        let text = format!(
            "{} {}님의 벌점이 {}점에 도달하여 {} 승리로 판정합니다.",
            offender_side.label(),
            offender_name,
            PENALTY_MAX,
            winner_side.label()
        );
        battle.messages.append(Sender::Judge, text.clone(), now);
        app.hub.broadcast(
            &room.room_id,
            ServerEvent::AiJudgeMessage {
                message: text,
                stage: STAGE_PENALTY_TERMINAL,
            },
        );
        app.hub.broadcast(
            &room.room_id,
            ServerEvent::MessagesUpdated {
                messages: battle.messages.snapshot(),
            },
        );
        verdict
    };

    finalize_locked(app, room, state, verdict).await;
}

/// Terminal processing: `battle_result`, persisted record, one Elo update per
/// player, then teardown. After this returns, no further event reaches the
/// room channel.
async fn finalize_locked(
    app: &Arc<AppState>,
    room: &Arc<RoomHandle>,
    state: &mut RoomState,
    verdict: Verdict,
) {
    let record = {
        let Some(battle) = state.battle.as_ref() else {
            return;
        };
        MatchRecord {
            player1: battle.agree_id.clone(),
            player2: battle.disagree_id.clone(),
            subject_id: state.subject.id,
            winner_id: verdict.winner_user_id.clone(),
            log_json: serde_json::to_string(&battle.log).unwrap_or_else(|_| "[]".to_string()),
            verdict_json: serde_json::to_string(&verdict).unwrap_or_else(|_| "{}".to_string()),
        }
    };

    app.hub.broadcast(
        &room.room_id,
        ServerEvent::BattleResult {
            verdict: verdict.clone(),
        },
    );

    let loser_id = if record.player1 == verdict.winner_user_id {
        record.player2.clone()
    } else {
        record.player1.clone()
    };

    if let Err(e) = app.store.insert_match(record).await {
        warn!(room_id = %room.room_id, error = %e, "failed to persist match record");
    }
    apply_elo(app, &verdict.winner_user_id, &loser_id).await;

    state.battle = None;
    state.is_completed = true;
    app.rooms.remove(&room.room_id);
    app.hub.drop_room(&room.room_id);
    // The rooms index update must not run under this room's lock: it visits
    // every registered room in turn.
    let app_for_index = Arc::clone(app);
    tokio::spawn(async move {
        broadcast_rooms_update(&app_for_index).await;
    });
    info!(room_id = %room.room_id, winner = %verdict.winner_user_id, "battle completed");
}

async fn apply_elo(app: &Arc<AppState>, winner_id: &str, loser_id: &str) {
    let (winner, loser) = match (
        app.store.get_profile(winner_id).await,
        app.store.get_profile(loser_id).await,
    ) {
        (Ok(w), Ok(l)) => (w, l),
        (w, l) => {
            warn!(
                winner_error = w.is_err(),
                loser_error = l.is_err(),
                "skipping rating update, profiles unavailable"
            );
            return;
        }
    };

    let (new_winner, new_loser) = rating::apply_result(winner.rating, loser.rating);
    if let Err(e) = app
        .store
        .update_profile(
            winner_id,
            ProfilePatch {
                rating: Some(new_winner),
                wins: Some(winner.wins + 1),
                ..Default::default()
            },
        )
        .await
    {
        warn!(user_id = winner_id, error = %e, "failed to update winner profile");
    }
    if let Err(e) = app
        .store
        .update_profile(
            loser_id,
            ProfilePatch {
                rating: Some(new_loser),
                loses: Some(loser.loses + 1),
                ..Default::default()
            },
        )
        .await
    {
        warn!(user_id = loser_id, error = %e, "failed to update loser profile");
    }
}

/// Consolidated late-join / reconnect snapshot, targeted at one connection.
pub async fn send_room_snapshot(
    app: &Arc<AppState>,
    room: &Arc<RoomHandle>,
    conn: &str,
    user_id: &str,
) {
    let state = room.state.lock().await;
    let now = app.clock.now_ms();
    let players = state.participants.clone();

    let snapshot = match &state.battle {
        Some(battle) => RoomSnapshot {
            messages: battle.messages.snapshot(),
            stage: battle.stage,
            stage_description: BattleState::stage_description(battle.stage).to_string(),
            current_player_id: battle.current_speaker().cloned(),
            is_my_turn: battle
                .current_speaker()
                .map(|s| s == user_id)
                .unwrap_or(false),
            timer: timer::snapshot(battle, now),
            my_penalty_count: battle
                .timers
                .get(user_id)
                .map(|t| t.penalty_count)
                .unwrap_or(0),
            opponent_penalty_count: battle
                .opponent_of(user_id)
                .and_then(|opponent| battle.timers.get(opponent))
                .map(|t| t.penalty_count)
                .unwrap_or(0),
            players,
            battle_active: true,
        },
        None => RoomSnapshot {
            messages: Vec::new(),
            stage: STAGE_PENALTY_TERMINAL,
            stage_description: "토론 종료".to_string(),
            current_player_id: None,
            is_my_turn: false,
            timer: None,
            my_penalty_count: 0,
            opponent_penalty_count: 0,
            players,
            battle_active: false,
        },
    };

    app.hub
        .send(conn, ServerEvent::RoomStateUpdated(snapshot));
}

/// Current message feed for `get_messages`.
pub async fn current_messages(room: &Arc<RoomHandle>) -> Vec<crate::types::Message> {
    let state = room.state.lock().await;
    state
        .battle
        .as_ref()
        .map(|b| b.messages.snapshot())
        .unwrap_or_default()
}
