//! Room registry: the process-global set of rooms, membership, and the lobby
//! negotiation (roles, positions, readiness) that precedes a match.
//!
//! Registry critical sections are short and synchronous; per-room state sits
//! behind each room's own async mutex, which also serialises the match engine.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::battle::state::BattleState;
use crate::error::EventError;
use crate::events::ServerEvent;
use crate::types::{
    AppState, Participant, Position, Role, RoomId, RoomView, Subject, UserId,
};

pub struct RoomHandle {
    pub room_id: RoomId,
    pub state: Mutex<RoomState>,
}

pub struct RoomState {
    pub subject: Subject,
    pub participants: Vec<Participant>,
    pub battle_started: bool,
    pub is_completed: bool,
    pub battle: Option<BattleState>,
}

impl RoomState {
    pub fn has_referee(&self) -> bool {
        self.participants.iter().any(|p| p.role == Role::Referee)
    }

    pub fn referee(&self) -> Option<&Participant> {
        self.participants.iter().find(|p| p.role == Role::Referee)
    }

    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    pub fn participant_mut(&mut self, user_id: &str) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.user_id == user_id)
    }

    pub fn players(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(|p| p.role == Role::Player)
    }

    pub fn player_count(&self) -> usize {
        self.players().count()
    }

    pub fn display_name(&self, user_id: &str) -> String {
        self.participant(user_id)
            .map(|p| p.display_name.clone())
            .unwrap_or_else(|| user_id.to_string())
    }

    pub fn view(&self, room_id: &str) -> RoomView {
        RoomView {
            room_id: room_id.to_string(),
            subject: self.subject.clone(),
            participants: self.participants.clone(),
            battle_started: self.battle_started,
            is_completed: self.is_completed,
            has_referee: self.has_referee(),
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    rooms: HashMap<RoomId, Arc<RoomHandle>>,
    /// User → room index for `get_my_room` and single-room membership.
    members: HashMap<UserId, RoomId>,
}

pub struct Registry {
    inner: RwLock<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    pub fn get(&self, room_id: &str) -> Option<Arc<RoomHandle>> {
        let inner = self.inner.read().expect("registry lock");
        inner.rooms.get(room_id).cloned()
    }

    pub fn room_of(&self, user_id: &str) -> Option<Arc<RoomHandle>> {
        let inner = self.inner.read().expect("registry lock");
        let room_id = inner.members.get(user_id)?;
        inner.rooms.get(room_id).cloned()
    }

    pub fn insert(&self, handle: Arc<RoomHandle>) {
        let mut inner = self.inner.write().expect("registry lock");
        inner.rooms.insert(handle.room_id.clone(), handle);
    }

    pub fn bind_member(&self, user_id: &str, room_id: &str) {
        let mut inner = self.inner.write().expect("registry lock");
        inner
            .members
            .insert(user_id.to_string(), room_id.to_string());
    }

    pub fn unbind_member(&self, user_id: &str) {
        let mut inner = self.inner.write().expect("registry lock");
        inner.members.remove(user_id);
    }

    pub fn remove(&self, room_id: &str) {
        let mut inner = self.inner.write().expect("registry lock");
        inner.rooms.remove(room_id);
        inner.members.retain(|_, rid| rid != room_id);
    }

    /// Handles only; callers lock each room outside the registry section.
    pub fn snapshot(&self) -> Vec<Arc<RoomHandle>> {
        let inner = self.inner.read().expect("registry lock");
        inner.rooms.values().cloned().collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Public room enumeration for `get_rooms` / `rooms_update`.
pub async fn rooms_index(app: &AppState) -> Vec<RoomView> {
    let mut views = Vec::new();
    for handle in app.rooms.snapshot() {
        let state = handle.state.lock().await;
        if !state.is_completed {
            views.push(state.view(&handle.room_id));
        }
    }
    views
}

pub async fn broadcast_rooms_update(app: &AppState) {
    let rooms = rooms_index(app).await;
    app.hub.broadcast_all(ServerEvent::RoomsUpdate { rooms });
}

pub async fn my_room_view(app: &AppState, user_id: &str) -> Option<RoomView> {
    let handle = app.rooms.room_of(user_id)?;
    let state = handle.state.lock().await;
    Some(state.view(&handle.room_id))
}

/// Create a room with the caller attached: admins moderate, everyone else
/// plays.
pub async fn create_room(
    app: &Arc<AppState>,
    conn: &str,
    user_id: &str,
    subject_id: i64,
) -> Result<RoomView, EventError> {
    if app.rooms.room_of(user_id).is_some() {
        return Err(EventError::conflict("already in a room"));
    }

    let subject = app.store.get_subject(subject_id).await?;
    let profile = app.store.get_profile(user_id).await?;
    let role = if profile.is_admin {
        Role::Referee
    } else {
        Role::Player
    };

    let room_id = Uuid::new_v4().to_string();
    let participant = Participant::new(conn.to_string(), &profile, role);
    let handle = Arc::new(RoomHandle {
        room_id: room_id.clone(),
        state: Mutex::new(RoomState {
            subject,
            participants: vec![participant],
            battle_started: false,
            is_completed: false,
            battle: None,
        }),
    });

    let view = handle.state.lock().await.view(&room_id);
    app.rooms.insert(handle);
    app.rooms.bind_member(user_id, &room_id);
    app.hub.join_room_channel(conn, &room_id);
    broadcast_rooms_update(app).await;
    Ok(view)
}

/// Join an open room. The first two non-admin arrivals become Players, later
/// arrivals spectate. A user already present only refreshes their connection.
pub async fn join_room(
    app: &Arc<AppState>,
    conn: &str,
    room_id: &str,
    user_id: &str,
) -> Result<RoomView, EventError> {
    let handle = app
        .rooms
        .get(room_id)
        .ok_or_else(|| EventError::not_found("room not found"))?;

    // Profile read happens before the room lock; registry and room critical
    // sections never span a store call.
    let profile = app.store.get_profile(user_id).await?;

    let view = {
        let mut state = handle.state.lock().await;

        let slot = state
            .participants
            .iter()
            .position(|p| p.user_id == user_id);
        match slot {
            Some(i) => {
                state.participants[i].connection_id = conn.to_string();
            }
            None => {
                if state.battle_started {
                    return Err(EventError::conflict("battle already started"));
                }
                let role = if state.player_count() < 2 {
                    Role::Player
                } else {
                    Role::Spectator
                };
                state
                    .participants
                    .push(Participant::new(conn.to_string(), &profile, role));
            }
        }
        app.hub.join_room_channel(conn, room_id);
        app.rooms.bind_member(user_id, room_id);
        state.view(room_id)
    };

    app.hub.broadcast(
        room_id,
        ServerEvent::RoomUpdate { room: view.clone() },
    );
    broadcast_rooms_update(app).await;
    Ok(view)
}

/// Remove a participant. The last one out tears the room down entirely;
/// otherwise readiness resets so a changed lineup re-negotiates the start.
pub async fn leave_room(
    app: &Arc<AppState>,
    conn: &str,
    room_id: &str,
    user_id: &str,
) -> Result<(), EventError> {
    let handle = app
        .rooms
        .get(room_id)
        .ok_or_else(|| EventError::not_found("room not found"))?;

    let remaining_view = {
        let mut state = handle.state.lock().await;
        let before = state.participants.len();
        state.participants.retain(|p| p.user_id != user_id);
        if state.participants.len() == before {
            return Err(EventError::not_found("not in this room"));
        }
        app.hub.leave_room_channel(conn, room_id);
        app.rooms.unbind_member(user_id);

        if state.participants.is_empty() {
            state.battle = None;
            None
        } else {
            for p in &mut state.participants {
                p.is_ready = false;
            }
            Some(state.view(room_id))
        }
    };

    match remaining_view {
        None => {
            app.rooms.remove(room_id);
            app.hub.drop_room(room_id);
        }
        Some(view) => {
            app.hub
                .broadcast(room_id, ServerEvent::RoomUpdate { room: view });
        }
    }
    broadcast_rooms_update(app).await;
    Ok(())
}

pub async fn select_role(
    app: &Arc<AppState>,
    room_id: &str,
    user_id: &str,
    role: Role,
) -> Result<(), EventError> {
    let handle = app
        .rooms
        .get(room_id)
        .ok_or_else(|| EventError::not_found("room not found"))?;

    let view = {
        let mut state = handle.state.lock().await;
        if role == Role::Referee {
            let participant = state
                .participant(user_id)
                .ok_or_else(|| EventError::not_found("not in this room"))?;
            if !participant.is_admin {
                return Err(EventError::forbidden("referee role requires admin"));
            }
            if state
                .participants
                .iter()
                .any(|p| p.role == Role::Referee && p.user_id != user_id)
            {
                return Err(EventError::conflict("room already has a referee"));
            }
        }
        let participant = state
            .participant_mut(user_id)
            .ok_or_else(|| EventError::not_found("not in this room"))?;
        if participant.role != role {
            participant.role = role;
            participant.position = None;
            participant.is_ready = false;
        }
        app.hub.broadcast(
            room_id,
            ServerEvent::RoleSelected {
                user_id: user_id.to_string(),
                role,
            },
        );
        state.view(room_id)
    };
    app.hub
        .broadcast(room_id, ServerEvent::RoomUpdate { room: view });
    Ok(())
}

pub async fn select_position(
    app: &Arc<AppState>,
    room_id: &str,
    user_id: &str,
    position: Option<Position>,
) -> Result<(), EventError> {
    let handle = app
        .rooms
        .get(room_id)
        .ok_or_else(|| EventError::not_found("room not found"))?;

    let view = {
        let mut state = handle.state.lock().await;
        if let Some(wanted) = position {
            let taken_by_other = state
                .players()
                .any(|p| p.user_id != user_id && p.position == Some(wanted));
            if taken_by_other {
                return Err(EventError::conflict("position already taken"));
            }
        }
        let participant = state
            .participant_mut(user_id)
            .ok_or_else(|| EventError::not_found("not in this room"))?;
        if participant.role != Role::Player {
            return Err(EventError::forbidden("only players hold a position"));
        }
        // Re-choosing the held position clears it.
        participant.position = match position {
            Some(wanted) if participant.position == Some(wanted) => None,
            other => other,
        };
        let selected = participant.position;
        app.hub.broadcast(
            room_id,
            ServerEvent::PositionSelected {
                user_id: user_id.to_string(),
                position: selected,
            },
        );
        state.view(room_id)
    };
    app.hub
        .broadcast(room_id, ServerEvent::RoomUpdate { room: view });
    Ok(())
}

/// Toggle readiness. Two ready Players arm the match; spectators and the
/// referee neither block nor trigger the start.
pub async fn player_ready(
    app: &Arc<AppState>,
    room_id: &str,
    user_id: &str,
) -> Result<(), EventError> {
    let handle = app
        .rooms
        .get(room_id)
        .ok_or_else(|| EventError::not_found("room not found"))?;

    let (view, started) = {
        let mut state = handle.state.lock().await;
        let participant = state
            .participant_mut(user_id)
            .ok_or_else(|| EventError::not_found("not in this room"))?;
        participant.is_ready = !participant.is_ready;

        let ready_players = state
            .players()
            .filter(|p| p.is_ready)
            .count();
        let started = !state.battle_started && ready_players >= 2;
        if started {
            state.battle_started = true;
        }
        (state.view(room_id), started)
    };

    if started {
        app.hub.broadcast(
            room_id,
            ServerEvent::BattleStart { room: view.clone() },
        );
    }
    app.hub
        .broadcast(room_id, ServerEvent::RoomUpdate { room: view });
    if started {
        broadcast_rooms_update(app).await;
    }
    Ok(())
}

/// Rebind a (possibly reconnecting) participant to the current connection and
/// re-subscribe it to the room channel.
pub async fn join_discussion_room(
    app: &Arc<AppState>,
    conn: &str,
    room_id: &str,
    user_id: &str,
) -> Result<(), EventError> {
    let handle = app
        .rooms
        .get(room_id)
        .ok_or_else(|| EventError::not_found("room not found"))?;

    let mut state = handle.state.lock().await;
    let participant = state
        .participant_mut(user_id)
        .ok_or_else(|| EventError::not_found("not in this room"))?;
    participant.connection_id = conn.to_string();
    app.hub.join_room_channel(conn, room_id);
    app.rooms.bind_member(user_id, room_id);
    Ok(())
}
