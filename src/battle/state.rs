//! Match state: the nine-phase turn protocol plus evaluation and terminal
//! stages, per-player time accounting, and the verdict handshake.

use std::collections::HashMap;

use crate::battle::log::MessageLog;
use crate::types::{DiscussionEntry, HumanScores, Position, UserId, Verdict};

pub const ROUND_LIMIT_MS: i64 = 120_000;
pub const TOTAL_LIMIT_MS: i64 = 300_000;
pub const OVERTIME_LIMIT_MS: i64 = 30_000;
pub const PENALTY_STEP: u32 = 3;
pub const PENALTY_MAX: u32 = 18;

/// First speaking stage.
pub const STAGE_FIRST_TURN: u8 = 1;
/// Last speaking stage.
pub const STAGE_LAST_TURN: u8 = 9;
/// Evaluation handshake in progress.
pub const STAGE_EVALUATION: u8 = 10;
/// Sentinel outside the 0-10 range: match ended by penalty overflow.
pub const STAGE_PENALTY_TERMINAL: u8 = 11;

#[derive(Debug, Clone, Default)]
pub struct PlayerTimer {
    pub total_time_used_ms: i64,
    pub penalty_points: u32,
    pub penalty_count: u32,
    pub is_overtime: bool,
    pub overtime_started_at: Option<i64>,
}

/// State of one running match. All access is serialised by the owning room's
/// lock; nothing here is shared across matches.
pub struct BattleState {
    pub stage: u8,
    pub log: Vec<DiscussionEntry>,
    pub messages: MessageLog,
    pub agree_id: UserId,
    pub disagree_id: UserId,
    pub timers: HashMap<UserId, PlayerTimer>,
    pub turn_started_at: Option<i64>,
    pub ended_by_penalty: bool,
    pub ai_verdict: Option<Verdict>,
    pub human_scores: Option<HumanScores>,
    /// The AI verdict arrived and a referee must submit scores before the
    /// match can finish.
    pub awaiting_referee: bool,
    /// Last whole-second (round, total, overtime) triple broadcast, to keep
    /// `timer_update` at one per visible change.
    pub last_timer_broadcast: Option<(i64, i64, i64)>,
}

impl BattleState {
    pub fn new(agree_id: UserId, disagree_id: UserId) -> Self {
        let mut timers = HashMap::new();
        timers.insert(agree_id.clone(), PlayerTimer::default());
        timers.insert(disagree_id.clone(), PlayerTimer::default());
        Self {
            stage: STAGE_FIRST_TURN,
            log: Vec::new(),
            messages: MessageLog::new(),
            agree_id,
            disagree_id,
            timers,
            turn_started_at: None,
            ended_by_penalty: false,
            ai_verdict: None,
            human_scores: None,
            awaiting_referee: false,
            last_timer_broadcast: None,
        }
    }

    /// Which side speaks at a stage. Agree: 1, 4, 6, 8. Disagree: 2, 3, 5, 7, 9.
    pub fn speaker_side(stage: u8) -> Option<Position> {
        match stage {
            1 | 4 | 6 | 8 => Some(Position::Agree),
            2 | 3 | 5 | 7 | 9 => Some(Position::Disagree),
            _ => None,
        }
    }

    pub fn player_for(&self, side: Position) -> &UserId {
        match side {
            Position::Agree => &self.agree_id,
            Position::Disagree => &self.disagree_id,
        }
    }

    pub fn side_of(&self, user_id: &str) -> Option<Position> {
        if self.agree_id == user_id {
            Some(Position::Agree)
        } else if self.disagree_id == user_id {
            Some(Position::Disagree)
        } else {
            None
        }
    }

    pub fn opponent_of(&self, user_id: &str) -> Option<&UserId> {
        self.side_of(user_id)
            .map(|side| self.player_for(side.opposite()))
    }

    pub fn current_speaker(&self) -> Option<&UserId> {
        Self::speaker_side(self.stage).map(|side| self.player_for(side))
    }

    pub fn timer(&self, user_id: &str) -> &PlayerTimer {
        self.timers.get(user_id).expect("player timer")
    }

    pub fn timer_mut(&mut self, user_id: &str) -> &mut PlayerTimer {
        self.timers.get_mut(user_id).expect("player timer")
    }

    /// The turns of one side, in order, for the judge transcript.
    pub fn turns_of(&self, side: Position) -> Vec<String> {
        let speaker = self.player_for(side).clone();
        self.log
            .iter()
            .filter(|entry| entry.user_id == speaker)
            .map(|entry| entry.text.clone())
            .collect()
    }

    pub fn stage_description(stage: u8) -> &'static str {
        match stage {
            0 => "토론 준비 중",
            1 => "찬성측 대표발언",
            2 => "반대측 대표발언",
            3 => "반대측 질문",
            4 => "찬성측 답변 및 질문",
            5 => "반대측 답변 및 질문",
            6 => "찬성측 답변 및 질문",
            7 => "반대측 답변",
            8 => "찬성측 최종발언",
            9 => "반대측 최종발언",
            STAGE_EVALUATION => "AI 판정 진행 중",
            STAGE_PENALTY_TERMINAL => "벌점 초과로 토론 종료",
            _ => "토론 종료",
        }
    }

    /// Turn announcement appended as a System message when a stage opens.
    pub fn turn_announcement(stage: u8, side: Position, display_name: &str) -> String {
        let action = match stage {
            1 | 2 => "대표발언",
            3 => "질문",
            4 | 5 | 6 => "답변 및 질문",
            7 => "답변",
            _ => "최종발언",
        };
        format!(
            "{} {}님의 {} 차례입니다.",
            side.label(),
            display_name,
            action
        )
    }
}
