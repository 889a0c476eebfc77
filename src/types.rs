use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::dedup::RequestDeduper;
use crate::hub::Hub;
use crate::judge::Judge;
use crate::rooms::Registry;
use crate::session::SessionMap;
use crate::storage::Store;

pub type UserId = String;
pub type RoomId = String;
pub type ConnId = String;

/// Shared service handles, owned by the composition root and passed into
/// every handler. The state machine itself never reaches for globals.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub judge: Arc<dyn Judge>,
    pub clock: Arc<dyn Clock>,
    pub hub: Hub,
    pub sessions: SessionMap,
    pub dedup: RequestDeduper,
    pub rooms: Registry,
    pub start_time: Instant,
    /// Pause between `player_list_updated` and the first turn, so clients can
    /// render the final role assignment before the opening announcement.
    pub settle_delay: Duration,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, judge: Arc<dyn Judge>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            judge,
            clock,
            hub: Hub::new(),
            sessions: SessionMap::new(),
            dedup: RequestDeduper::new(),
            rooms: Registry::new(),
            start_time: Instant::now(),
            settle_delay: Duration::from_millis(1_500),
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Player,
    Spectator,
    Referee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Agree,
    Disagree,
}

impl Position {
    pub fn opposite(self) -> Self {
        match self {
            Position::Agree => Position::Disagree,
            Position::Disagree => Position::Agree,
        }
    }

    /// Korean side label used in user-facing announcements.
    pub fn label(self) -> &'static str {
        match self {
            Position::Agree => "찬성측",
            Position::Disagree => "반대측",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: i64,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user_id: UserId,
    pub display_name: String,
    pub rating: f64,
    pub wins: i64,
    pub loses: i64,
    pub is_admin: bool,
    pub avatar_url: Option<String>,
}

/// One occupied slot in a room. A user holds at most one slot per room;
/// reconnecting rebinds `connection_id` without adding a second slot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub connection_id: ConnId,
    pub user_id: UserId,
    pub display_name: String,
    pub role: Role,
    pub position: Option<Position>,
    pub is_ready: bool,
    pub discussion_view_ready: bool,
    pub is_admin: bool,
    pub rating_snapshot: f64,
    pub wins_snapshot: i64,
    pub losses_snapshot: i64,
}

impl Participant {
    pub fn new(connection_id: ConnId, profile: &Profile, role: Role) -> Self {
        Self {
            connection_id,
            user_id: profile.user_id.clone(),
            display_name: profile.display_name.clone(),
            role,
            position: None,
            is_ready: false,
            discussion_view_ready: false,
            is_admin: profile.is_admin,
            rating_snapshot: profile.rating,
            wins_snapshot: profile.wins,
            losses_snapshot: profile.loses,
        }
    }
}

/// Wire view of a room, sent in `rooms_update` / `room_update` payloads.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub room_id: RoomId,
    pub subject: Subject,
    pub participants: Vec<Participant>,
    pub battle_started: bool,
    pub is_completed: bool,
    pub has_referee: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    System,
    Judge,
    Agree,
    Disagree,
}

impl From<Position> for Sender {
    fn from(pos: Position) -> Self {
        match pos {
            Position::Agree => Sender::Agree,
            Position::Disagree => Sender::Disagree,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender: Sender,
    pub text: String,
    pub timestamp_ms: i64,
}

/// One accepted speaker turn, kept for the judge transcript.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscussionEntry {
    pub user_id: UserId,
    pub text: String,
    #[serde(rename = "phase")]
    pub stage: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideVerdict {
    pub score: u32,
    #[serde(default)]
    pub good: String,
    #[serde(default)]
    pub bad: String,
}

/// Final evaluation as stored and broadcast: winner already resolved to a
/// concrete user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub agree: SideVerdict,
    pub disagree: SideVerdict,
    pub winner_user_id: UserId,
}

/// Referee-submitted per-side scores, blended with the AI verdict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HumanScores {
    pub agree: u32,
    pub disagree: u32,
}
