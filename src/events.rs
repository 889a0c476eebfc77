//! Wire protocol: one tagged variant per named event, both directions.
//!
//! Frames are JSON objects `{"event": <name>, "data": {...}}`. Unknown client
//! events fail deserialization and are answered with a `bad_request` error.

use serde::{Deserialize, Serialize};

use crate::types::{
    HumanScores, Message, Participant, Position, Profile, Role, RoomId, RoomView, Subject, UserId,
    Verdict,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowKind {
    Round,
    Total,
    Overtime,
}

/// Client → server events.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    GetSubjects,
    GetRooms,
    #[serde(rename_all = "camelCase")]
    GetMyRoom { user_id: UserId },
    #[serde(rename_all = "camelCase")]
    GetUserProfile { user_id: UserId },
    #[serde(rename_all = "camelCase")]
    CreateRoom { user_id: UserId, subject_id: i64 },
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: RoomId, user_id: UserId },
    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_id: RoomId, user_id: UserId },
    #[serde(rename_all = "camelCase")]
    SelectRole {
        room_id: RoomId,
        user_id: UserId,
        role: Role,
    },
    #[serde(rename_all = "camelCase")]
    SelectPosition {
        room_id: RoomId,
        user_id: UserId,
        position: Option<Position>,
    },
    #[serde(rename_all = "camelCase")]
    PlayerReady { room_id: RoomId, user_id: UserId },
    #[serde(rename_all = "camelCase")]
    JoinDiscussionRoom { room_id: RoomId, user_id: UserId },
    #[serde(rename_all = "camelCase")]
    DiscussionViewReady { room_id: RoomId, user_id: UserId },
    #[serde(rename_all = "camelCase")]
    SendMessage {
        room_id: RoomId,
        user_id: UserId,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    TimeOverflow {
        room_id: RoomId,
        user_id: UserId,
        #[serde(rename = "type")]
        kind: OverflowKind,
    },
    #[serde(rename_all = "camelCase")]
    GetMessages { room_id: RoomId },
    #[serde(rename_all = "camelCase")]
    GetRoomState { room_id: RoomId, user_id: UserId },
    #[serde(rename_all = "camelCase")]
    RefereeAddPoints {
        room_id: RoomId,
        target_user_id: UserId,
        points: u32,
        referee_id: UserId,
    },
    #[serde(rename_all = "camelCase")]
    RefereeDeductPoints {
        room_id: RoomId,
        target_user_id: UserId,
        points: u32,
        referee_id: UserId,
    },
    #[serde(rename_all = "camelCase")]
    RefereeExtendTime {
        room_id: RoomId,
        target_user_id: UserId,
        seconds: i64,
        referee_id: UserId,
    },
    #[serde(rename_all = "camelCase")]
    RefereeReduceTime {
        room_id: RoomId,
        target_user_id: UserId,
        seconds: i64,
        referee_id: UserId,
    },
    #[serde(rename_all = "camelCase")]
    RefereeSubmitScores {
        room_id: RoomId,
        scores: HumanScores,
        referee_id: UserId,
    },
}

impl ClientEvent {
    /// Name used for dedup keys and error callbacks.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::GetSubjects => "get_subjects",
            ClientEvent::GetRooms => "get_rooms",
            ClientEvent::GetMyRoom { .. } => "get_my_room",
            ClientEvent::GetUserProfile { .. } => "get_user_profile",
            ClientEvent::CreateRoom { .. } => "create_room",
            ClientEvent::JoinRoom { .. } => "join_room",
            ClientEvent::LeaveRoom { .. } => "leave_room",
            ClientEvent::SelectRole { .. } => "select_role",
            ClientEvent::SelectPosition { .. } => "select_position",
            ClientEvent::PlayerReady { .. } => "player_ready",
            ClientEvent::JoinDiscussionRoom { .. } => "join_discussion_room",
            ClientEvent::DiscussionViewReady { .. } => "discussion_view_ready",
            ClientEvent::SendMessage { .. } => "send_message",
            ClientEvent::TimeOverflow { .. } => "time_overflow",
            ClientEvent::GetMessages { .. } => "get_messages",
            ClientEvent::GetRoomState { .. } => "get_room_state",
            ClientEvent::RefereeAddPoints { .. } => "referee_add_points",
            ClientEvent::RefereeDeductPoints { .. } => "referee_deduct_points",
            ClientEvent::RefereeExtendTime { .. } => "referee_extend_time",
            ClientEvent::RefereeReduceTime { .. } => "referee_reduce_time",
            ClientEvent::RefereeSubmitScores { .. } => "referee_submit_scores",
        }
    }

    /// Operations guarded by the request deduper. Read-only queries and the
    /// turn-protocol events are not guarded; duplicated reads are harmless and
    /// `send_message` is serialised by the turn protocol itself.
    pub fn deduped(&self) -> bool {
        matches!(
            self,
            ClientEvent::CreateRoom { .. }
                | ClientEvent::JoinRoom { .. }
                | ClientEvent::SelectRole { .. }
                | ClientEvent::SelectPosition { .. }
                | ClientEvent::PlayerReady { .. }
                | ClientEvent::RefereeAddPoints { .. }
                | ClientEvent::RefereeDeductPoints { .. }
                | ClientEvent::RefereeExtendTime { .. }
                | ClientEvent::RefereeReduceTime { .. }
                | ClientEvent::RefereeSubmitScores { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnInfo {
    pub current_player_id: Option<UserId>,
    pub stage: u8,
    pub message: String,
    pub stage_description: String,
}

/// Server → client events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    RoomsUpdate {
        rooms: Vec<RoomView>,
    },
    RoomUpdate {
        room: RoomView,
    },
    BattleStart {
        room: RoomView,
    },
    BattleError {
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    AiJudgeMessage {
        message: String,
        stage: u8,
    },
    MessagesUpdated {
        messages: Vec<Message>,
    },
    TurnInfo(TurnInfo),
    TimerUpdate(TimerSnapshot),
    PenaltyApplied(PenaltyApplied),
    #[serde(rename_all = "camelCase")]
    OvertimeGranted {
        user_id: UserId,
        overtime_limit_sec: i64,
    },
    #[serde(rename_all = "camelCase")]
    TimeExtended {
        user_id: UserId,
        seconds: i64,
        total_time_used_ms: i64,
    },
    #[serde(rename_all = "camelCase")]
    TimeReduced {
        user_id: UserId,
        seconds: i64,
        total_time_used_ms: i64,
    },
    PlayerListUpdated {
        players: Vec<Participant>,
    },
    #[serde(rename_all = "camelCase")]
    PositionSelected {
        user_id: UserId,
        position: Option<Position>,
    },
    #[serde(rename_all = "camelCase")]
    RoleSelected {
        user_id: UserId,
        role: Role,
    },
    BattleResult {
        verdict: Verdict,
    },
    #[serde(rename_all = "camelCase")]
    ShowRefereeScoreModal {
        room_id: RoomId,
    },
    RoomStateUpdated(RoomSnapshot),
    // Request/response pairs.
    Subjects {
        subjects: Vec<Subject>,
    },
    Rooms {
        rooms: Vec<RoomView>,
    },
    MyRoom {
        room: Option<RoomView>,
    },
    UserProfile {
        profile: Option<Profile>,
    },
    Messages {
        messages: Vec<Message>,
    },
    CreateRoomResult {
        room: Option<RoomView>,
        error: Option<String>,
    },
    JoinRoomResult {
        room: Option<RoomView>,
        error: Option<String>,
    },
    /// Callback-style rejection of a single request.
    RequestError {
        op: String,
        kind: String,
        error: String,
    },
}

/// Once-per-second timer broadcast; also embedded in resync snapshots.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub current_player_id: UserId,
    pub round_time_remaining_sec: i64,
    pub total_time_remaining_sec: i64,
    pub is_overtime: bool,
    pub overtime_remaining_sec: i64,
    pub round_limit_sec: i64,
    pub total_limit_sec: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PenaltyApplied {
    pub user_id: UserId,
    /// Signed delta: negative when a referee waives points.
    pub points: i32,
    pub penalty_points: u32,
    pub penalty_count: u32,
    pub by_referee: bool,
}

/// Consolidated late-join / reconnect state for one caller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub messages: Vec<Message>,
    pub stage: u8,
    pub stage_description: String,
    pub current_player_id: Option<UserId>,
    pub is_my_turn: bool,
    pub timer: Option<TimerSnapshot>,
    pub my_penalty_count: u32,
    pub opponent_penalty_count: u32,
    pub players: Vec<Participant>,
    pub battle_active: bool,
}
