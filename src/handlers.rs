//! HTTP surface and the websocket intake loop.
//!
//! Every connected client speaks the named-event protocol over `GET /ws`;
//! `GET /health` remains as a plain HTTP probe.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderValue, Method};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::battle::engine;
use crate::error::EventError;
use crate::events::{ClientEvent, ServerEvent};
use crate::rooms::{self, RoomHandle};
use crate::storage::subjects_or_fallback;
use crate::types::AppState;

/// Inbound frame budget per connection: events / sliding window.
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(10);
const RATE_LIMIT_MAX_EVENTS: usize = 30;

pub fn build_app(state: Arc<AppState>, frontend_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = frontend_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_upgrade))
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE]),
        )
        .with_state(state)
}

pub async fn serve(listener: TcpListener, app: Router) -> anyhow::Result<()> {
    info!("debate-arena listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "uptimeSecs": state.start_time.elapsed().as_secs(),
    }))
}

async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_loop(state, socket))
}

struct RateLimiter {
    hits: Vec<Instant>,
}

impl RateLimiter {
    fn new() -> Self {
        Self { hits: Vec::new() }
    }

    fn exceeded(&mut self) -> bool {
        let now = Instant::now();
        self.hits.retain(|t| now.duration_since(*t) < RATE_LIMIT_WINDOW);
        if self.hits.len() >= RATE_LIMIT_MAX_EVENTS {
            true
        } else {
            self.hits.push(now);
            false
        }
    }
}

async fn client_loop(app: Arc<AppState>, socket: WebSocket) {
    let conn_id = Uuid::new_v4().to_string();
    let (outbox, mut inbox) = mpsc::unbounded_channel();
    app.hub.register(&conn_id, outbox);
    debug!(conn = %conn_id, "connection opened");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(event) = inbox.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut limiter = RateLimiter::new();
    while let Some(frame) = ws_rx.next().await {
        let Ok(msg) = frame else {
            break;
        };
        let text = match msg {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        if limiter.exceeded() {
            warn!(conn = %conn_id, "event rate limit exceeded, frame dropped");
            continue;
        }
        match serde_json::from_str::<ClientEvent>(text.as_str()) {
            Ok(event) => dispatch(&app, &conn_id, event).await,
            Err(e) => {
                app.hub.send(
                    &conn_id,
                    ServerEvent::RequestError {
                        op: "parse".to_string(),
                        kind: "bad_request".to_string(),
                        error: e.to_string(),
                    },
                );
            }
        }
    }

    app.dedup.cleanup(&conn_id);
    app.hub.unregister(&conn_id);
    if let Some(user_id) = app.sessions.user_of(&conn_id) {
        debug!(conn = %conn_id, user_id, "user connection closed");
    }
    app.sessions.unbind(&conn_id);
    writer.abort();
}

fn event_user(event: &ClientEvent) -> Option<&str> {
    match event {
        ClientEvent::GetMyRoom { user_id }
        | ClientEvent::GetUserProfile { user_id }
        | ClientEvent::CreateRoom { user_id, .. }
        | ClientEvent::JoinRoom { user_id, .. }
        | ClientEvent::LeaveRoom { user_id, .. }
        | ClientEvent::SelectRole { user_id, .. }
        | ClientEvent::SelectPosition { user_id, .. }
        | ClientEvent::PlayerReady { user_id, .. }
        | ClientEvent::JoinDiscussionRoom { user_id, .. }
        | ClientEvent::DiscussionViewReady { user_id, .. }
        | ClientEvent::SendMessage { user_id, .. }
        | ClientEvent::TimeOverflow { user_id, .. }
        | ClientEvent::GetRoomState { user_id, .. } => Some(user_id),
        ClientEvent::RefereeAddPoints { referee_id, .. }
        | ClientEvent::RefereeDeductPoints { referee_id, .. }
        | ClientEvent::RefereeExtendTime { referee_id, .. }
        | ClientEvent::RefereeReduceTime { referee_id, .. }
        | ClientEvent::RefereeSubmitScores { referee_id, .. } => Some(referee_id),
        _ => None,
    }
}

/// Route one client event. Guarded operations claim their dedup token first;
/// a refused claim answers with a `conflict` callback and applies nothing.
pub async fn dispatch(app: &Arc<AppState>, conn: &str, event: ClientEvent) {
    if let Some(user_id) = event_user(&event) {
        app.sessions.bind(conn, user_id);
    }

    let op = event.name();
    let guarded = event.deduped();
    if guarded && !app.dedup.begin(conn, op) {
        app.hub.send(
            conn,
            ServerEvent::RequestError {
                op: op.to_string(),
                kind: "conflict".to_string(),
                error: "operation already in flight".to_string(),
            },
        );
        return;
    }

    let outcome = handle_event(app, conn, event).await;

    if guarded {
        app.dedup.end(conn, op);
    }
    if let Err(e) = outcome {
        app.hub.send(
            conn,
            ServerEvent::RequestError {
                op: op.to_string(),
                kind: e.kind().to_string(),
                error: e.to_string(),
            },
        );
    }
}

fn room_or_err(app: &AppState, room_id: &str) -> Result<Arc<RoomHandle>, EventError> {
    app.rooms
        .get(room_id)
        .ok_or_else(|| EventError::not_found("room not found"))
}

async fn handle_event(
    app: &Arc<AppState>,
    conn: &str,
    event: ClientEvent,
) -> Result<(), EventError> {
    match event {
        ClientEvent::GetSubjects => {
            let subjects = subjects_or_fallback(&app.store).await;
            app.hub.send(conn, ServerEvent::Subjects { subjects });
        }
        ClientEvent::GetRooms => {
            let rooms = rooms::rooms_index(app).await;
            app.hub.send(conn, ServerEvent::Rooms { rooms });
        }
        ClientEvent::GetMyRoom { user_id } => {
            let room = rooms::my_room_view(app, &user_id).await;
            app.hub.send(conn, ServerEvent::MyRoom { room });
        }
        ClientEvent::GetUserProfile { user_id } => {
            let profile = app.store.get_profile(&user_id).await.ok();
            app.hub.send(conn, ServerEvent::UserProfile { profile });
        }
        ClientEvent::CreateRoom {
            user_id,
            subject_id,
        } => {
            let result = rooms::create_room(app, conn, &user_id, subject_id).await;
            let reply = match result {
                Ok(room) => ServerEvent::CreateRoomResult {
                    room: Some(room),
                    error: None,
                },
                Err(e) => ServerEvent::CreateRoomResult {
                    room: None,
                    error: Some(e.to_string()),
                },
            };
            app.hub.send(conn, reply);
        }
        ClientEvent::JoinRoom { room_id, user_id } => {
            let result = rooms::join_room(app, conn, &room_id, &user_id).await;
            let reply = match result {
                Ok(room) => ServerEvent::JoinRoomResult {
                    room: Some(room),
                    error: None,
                },
                Err(e) => ServerEvent::JoinRoomResult {
                    room: None,
                    error: Some(e.to_string()),
                },
            };
            app.hub.send(conn, reply);
        }
        ClientEvent::LeaveRoom { room_id, user_id } => {
            rooms::leave_room(app, conn, &room_id, &user_id).await?;
        }
        ClientEvent::SelectRole {
            room_id,
            user_id,
            role,
        } => {
            rooms::select_role(app, &room_id, &user_id, role).await?;
        }
        ClientEvent::SelectPosition {
            room_id,
            user_id,
            position,
        } => {
            rooms::select_position(app, &room_id, &user_id, position).await?;
        }
        ClientEvent::PlayerReady { room_id, user_id } => {
            rooms::player_ready(app, &room_id, &user_id).await?;
        }
        ClientEvent::JoinDiscussionRoom { room_id, user_id } => {
            rooms::join_discussion_room(app, conn, &room_id, &user_id).await?;
        }
        ClientEvent::DiscussionViewReady { room_id, user_id } => {
            let room = room_or_err(app, &room_id)?;
            engine::on_view_ready(app, &room, &user_id).await?;
        }
        ClientEvent::SendMessage {
            room_id,
            user_id,
            message,
        } => {
            let message = message.trim();
            if message.is_empty() || message.len() > 4_000 {
                return Err(EventError::bad_request("message must be 1..=4000 bytes"));
            }
            let room = room_or_err(app, &room_id)?;
            engine::on_send_message(app, &room, &user_id, message).await;
        }
        ClientEvent::TimeOverflow {
            room_id, user_id, ..
        } => {
            let room = room_or_err(app, &room_id)?;
            engine::on_time_overflow(app, &room, &user_id).await;
        }
        ClientEvent::GetMessages { room_id } => {
            let room = room_or_err(app, &room_id)?;
            let messages = engine::current_messages(&room).await;
            app.hub.send(conn, ServerEvent::Messages { messages });
        }
        ClientEvent::GetRoomState { room_id, user_id } => {
            let room = room_or_err(app, &room_id)?;
            engine::send_room_snapshot(app, &room, conn, &user_id).await;
        }
        ClientEvent::RefereeAddPoints {
            room_id,
            target_user_id,
            points,
            referee_id,
        } => {
            let room = room_or_err(app, &room_id)?;
            engine::on_referee_points(app, &room, &referee_id, &target_user_id, points, false)
                .await?;
        }
        ClientEvent::RefereeDeductPoints {
            room_id,
            target_user_id,
            points,
            referee_id,
        } => {
            let room = room_or_err(app, &room_id)?;
            engine::on_referee_points(app, &room, &referee_id, &target_user_id, points, true)
                .await?;
        }
        ClientEvent::RefereeExtendTime {
            room_id,
            target_user_id,
            seconds,
            referee_id,
        } => {
            let room = room_or_err(app, &room_id)?;
            engine::on_referee_time(app, &room, &referee_id, &target_user_id, seconds, true)
                .await?;
        }
        ClientEvent::RefereeReduceTime {
            room_id,
            target_user_id,
            seconds,
            referee_id,
        } => {
            let room = room_or_err(app, &room_id)?;
            engine::on_referee_time(app, &room, &referee_id, &target_user_id, seconds, false)
                .await?;
        }
        ClientEvent::RefereeSubmitScores {
            room_id,
            scores,
            referee_id,
        } => {
            let room = room_or_err(app, &room_id)?;
            engine::on_referee_scores(app, &room, &referee_id, scores).await?;
        }
    }
    Ok(())
}
