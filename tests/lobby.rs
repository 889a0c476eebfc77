//! Lobby negotiation properties: membership uniqueness, toggle semantics,
//! and permission checks, driven through the event dispatcher.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use debate_arena::clock::ManualClock;
use debate_arena::events::{ClientEvent, ServerEvent};
use debate_arena::handlers::dispatch;
use debate_arena::testutil::{connect, test_app, MemStore, ScriptedJudge};
use debate_arena::types::{AppState, Position, Role};

fn app() -> (Arc<AppState>, Arc<MemStore>) {
    let store = Arc::new(MemStore::new());
    let judge = Arc::new(ScriptedJudge::new());
    let clock = Arc::new(ManualClock::new(0));
    (test_app(store.clone(), judge, clock), store)
}

async fn wait_for(
    rx: &mut UnboundedReceiver<ServerEvent>,
    pred: impl Fn(&ServerEvent) -> bool,
) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = rx.recv().await.expect("connection channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected event was not delivered")
}

async fn create_room(app: &Arc<AppState>, conn: &str, user: &str) -> String {
    let mut rx = connect(app, conn);
    dispatch(
        app,
        conn,
        ClientEvent::CreateRoom {
            user_id: user.into(),
            subject_id: 1,
        },
    )
    .await;
    let created = wait_for(&mut rx, |e| {
        matches!(e, ServerEvent::CreateRoomResult { .. })
    })
    .await;
    match created {
        ServerEvent::CreateRoomResult {
            room: Some(room), ..
        } => room.room_id,
        other => panic!("room creation failed: {other:?}"),
    }
}

#[tokio::test]
async fn joining_twice_keeps_a_single_participant_slot() {
    let (app, _store) = app();
    let room_id = create_room(&app, "c-u1", "u1").await;

    let _rx2 = connect(&app, "c-u2");
    for _ in 0..3 {
        dispatch(
            &app,
            "c-u2",
            ClientEvent::JoinRoom {
                room_id: room_id.clone(),
                user_id: "u2".into(),
            },
        )
        .await;
    }

    let room = app.rooms.get(&room_id).unwrap();
    let state = room.state.lock().await;
    assert_eq!(state.participants.len(), 2);
    assert_eq!(
        state
            .participants
            .iter()
            .filter(|p| p.user_id == "u2")
            .count(),
        1
    );
}

#[tokio::test]
async fn repeated_join_discussion_room_only_rebinds_the_connection() {
    let (app, _store) = app();
    let room_id = create_room(&app, "c-u1", "u1").await;

    let _rx_b = connect(&app, "c-u1-b");
    for conn in ["c-u1", "c-u1-b", "c-u1-b"] {
        dispatch(
            &app,
            conn,
            ClientEvent::JoinDiscussionRoom {
                room_id: room_id.clone(),
                user_id: "u1".into(),
            },
        )
        .await;
    }

    let room = app.rooms.get(&room_id).unwrap();
    let state = room.state.lock().await;
    assert_eq!(state.participants.len(), 1);
    assert_eq!(state.participants[0].connection_id, "c-u1-b");
}

#[tokio::test]
async fn selecting_the_held_position_clears_it() {
    let (app, _store) = app();
    let room_id = create_room(&app, "c-u1", "u1").await;

    for _ in 0..2 {
        dispatch(
            &app,
            "c-u1",
            ClientEvent::SelectPosition {
                room_id: room_id.clone(),
                user_id: "u1".into(),
                position: Some(Position::Agree),
            },
        )
        .await;
    }

    let room = app.rooms.get(&room_id).unwrap();
    let state = room.state.lock().await;
    assert_eq!(state.participants[0].position, None);
}

#[tokio::test]
async fn ready_toggle_is_an_involution() {
    let (app, _store) = app();
    let room_id = create_room(&app, "c-u1", "u1").await;

    for _ in 0..2 {
        dispatch(
            &app,
            "c-u1",
            ClientEvent::PlayerReady {
                room_id: room_id.clone(),
                user_id: "u1".into(),
            },
        )
        .await;
    }

    let room = app.rooms.get(&room_id).unwrap();
    let state = room.state.lock().await;
    assert!(!state.participants[0].is_ready);
    assert!(!state.battle_started);
}

#[tokio::test]
async fn referee_role_requires_admin() {
    let (app, store) = app();
    let room_id = create_room(&app, "c-u1", "u1").await;

    let mut rx = connect(&app, "c-u1-x");
    dispatch(
        &app,
        "c-u1-x",
        ClientEvent::SelectRole {
            room_id: room_id.clone(),
            user_id: "u1".into(),
            role: Role::Referee,
        },
    )
    .await;
    let err = wait_for(&mut rx, |e| matches!(e, ServerEvent::RequestError { .. })).await;
    let ServerEvent::RequestError { kind, .. } = err else {
        unreachable!()
    };
    assert_eq!(kind, "forbidden");

    // An admin may take the role; it resets lobby choices.
    store.put_profile(MemStore::admin("boss"));
    let _rx_boss = connect(&app, "c-boss");
    dispatch(
        &app,
        "c-boss",
        ClientEvent::JoinRoom {
            room_id: room_id.clone(),
            user_id: "boss".into(),
        },
    )
    .await;
    dispatch(
        &app,
        "c-boss",
        ClientEvent::SelectRole {
            room_id: room_id.clone(),
            user_id: "boss".into(),
            role: Role::Referee,
        },
    )
    .await;
    let room = app.rooms.get(&room_id).unwrap();
    let state = room.state.lock().await;
    let boss = state.participant("boss").unwrap();
    assert_eq!(boss.role, Role::Referee);
    assert!(state.has_referee());
}

#[tokio::test]
async fn referee_actions_from_players_are_forbidden() {
    let (app, _store) = app();
    let room_id = create_room(&app, "c-u1", "u1").await;

    let mut rx = connect(&app, "c-u1-y");
    dispatch(
        &app,
        "c-u1-y",
        ClientEvent::RefereeDeductPoints {
            room_id: room_id.clone(),
            target_user_id: "u1".into(),
            points: 3,
            referee_id: "u1".into(),
        },
    )
    .await;
    let err = wait_for(&mut rx, |e| matches!(e, ServerEvent::RequestError { .. })).await;
    let ServerEvent::RequestError { kind, op, .. } = err else {
        unreachable!()
    };
    assert_eq!(kind, "forbidden");
    assert_eq!(op, "referee_deduct_points");
}

#[tokio::test]
async fn leaving_resets_readiness_and_last_out_deletes_the_room() {
    let (app, _store) = app();
    let room_id = create_room(&app, "c-u1", "u1").await;
    let _rx2 = connect(&app, "c-u2");
    dispatch(
        &app,
        "c-u2",
        ClientEvent::JoinRoom {
            room_id: room_id.clone(),
            user_id: "u2".into(),
        },
    )
    .await;
    dispatch(
        &app,
        "c-u1",
        ClientEvent::PlayerReady {
            room_id: room_id.clone(),
            user_id: "u1".into(),
        },
    )
    .await;

    dispatch(
        &app,
        "c-u2",
        ClientEvent::LeaveRoom {
            room_id: room_id.clone(),
            user_id: "u2".into(),
        },
    )
    .await;
    {
        let room = app.rooms.get(&room_id).unwrap();
        let state = room.state.lock().await;
        assert_eq!(state.participants.len(), 1);
        // A changed line-up re-negotiates readiness.
        assert!(!state.participants[0].is_ready);
    }

    dispatch(
        &app,
        "c-u1",
        ClientEvent::LeaveRoom {
            room_id: room_id.clone(),
            user_id: "u1".into(),
        },
    )
    .await;
    assert!(app.rooms.get(&room_id).is_none());
    assert!(app.rooms.room_of("u1").is_none());
}

#[tokio::test]
async fn joining_a_started_battle_is_rejected() {
    let (app, _store) = app();
    let room_id = create_room(&app, "c-u1", "u1").await;
    let _rx2 = connect(&app, "c-u2");
    dispatch(
        &app,
        "c-u2",
        ClientEvent::JoinRoom {
            room_id: room_id.clone(),
            user_id: "u2".into(),
        },
    )
    .await;
    for (conn, user) in [("c-u1", "u1"), ("c-u2", "u2")] {
        dispatch(
            &app,
            conn,
            ClientEvent::PlayerReady {
                room_id: room_id.clone(),
                user_id: user.into(),
            },
        )
        .await;
    }

    let mut rx3 = connect(&app, "c-u3");
    dispatch(
        &app,
        "c-u3",
        ClientEvent::JoinRoom {
            room_id: room_id.clone(),
            user_id: "u3".into(),
        },
    )
    .await;
    let reply = wait_for(&mut rx3, |e| matches!(e, ServerEvent::JoinRoomResult { .. })).await;
    let ServerEvent::JoinRoomResult { room, error } = reply else {
        unreachable!()
    };
    assert!(room.is_none());
    assert!(error.is_some());
}
