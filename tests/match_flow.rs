//! End-to-end match scenarios driven through the event dispatcher with a
//! manual clock, an in-memory store, and a scripted evaluator.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use debate_arena::battle::engine;
use debate_arena::clock::ManualClock;
use debate_arena::error::JudgeError;
use debate_arena::events::{ClientEvent, ServerEvent};
use debate_arena::handlers::dispatch;
use debate_arena::storage::DEFAULT_RATING;
use debate_arena::testutil::{connect, test_app, MemStore, ScriptedJudge};
use debate_arena::types::{AppState, HumanScores, Position, Subject};

struct Arena {
    app: Arc<AppState>,
    store: Arc<MemStore>,
    judge: Arc<ScriptedJudge>,
    clock: Arc<ManualClock>,
}

fn arena() -> Arena {
    let store = Arc::new(MemStore::new());
    let judge = Arc::new(ScriptedJudge::new());
    let clock = Arc::new(ManualClock::new(0));
    let app = test_app(store.clone(), judge.clone(), clock.clone());
    Arena {
        app,
        store,
        judge,
        clock,
    }
}

async fn wait_for(
    rx: &mut UnboundedReceiver<ServerEvent>,
    pred: impl Fn(&ServerEvent) -> bool,
) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(30), async {
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

/// Lobby negotiation up to an armed, running match between `alice` (agree,
/// conn `c-alice`) and `dana` (disagree, conn `c-dana`).
async fn start_two_player_battle(
    arena: &Arena,
) -> (
    String,
    UnboundedReceiver<ServerEvent>,
    UnboundedReceiver<ServerEvent>,
) {
    let app = &arena.app;
    let mut rx_alice = connect(app, "c-alice");
    let mut rx_dana = connect(app, "c-dana");

    dispatch(
        app,
        "c-alice",
        ClientEvent::CreateRoom {
            user_id: "alice".into(),
            subject_id: 1,
        },
    )
    .await;
    let created = wait_for(&mut rx_alice, |e| {
        matches!(e, ServerEvent::CreateRoomResult { .. })
    })
    .await;
    let ServerEvent::CreateRoomResult {
        room: Some(room), ..
    } = created
    else {
        panic!("room creation failed");
    };
    let room_id = room.room_id;

    dispatch(
        app,
        "c-dana",
        ClientEvent::JoinRoom {
            room_id: room_id.clone(),
            user_id: "dana".into(),
        },
    )
    .await;
    dispatch(
        app,
        "c-alice",
        ClientEvent::SelectPosition {
            room_id: room_id.clone(),
            user_id: "alice".into(),
            position: Some(Position::Agree),
        },
    )
    .await;
    dispatch(
        app,
        "c-dana",
        ClientEvent::SelectPosition {
            room_id: room_id.clone(),
            user_id: "dana".into(),
            position: Some(Position::Disagree),
        },
    )
    .await;
    dispatch(
        app,
        "c-alice",
        ClientEvent::PlayerReady {
            room_id: room_id.clone(),
            user_id: "alice".into(),
        },
    )
    .await;
    dispatch(
        app,
        "c-dana",
        ClientEvent::PlayerReady {
            room_id: room_id.clone(),
            user_id: "dana".into(),
        },
    )
    .await;
    wait_for(&mut rx_dana, |e| matches!(e, ServerEvent::BattleStart { .. })).await;

    for (conn, user) in [("c-alice", "alice"), ("c-dana", "dana")] {
        dispatch(
            app,
            conn,
            ClientEvent::JoinDiscussionRoom {
                room_id: room_id.clone(),
                user_id: user.into(),
            },
        )
        .await;
        dispatch(
            app,
            conn,
            ClientEvent::DiscussionViewReady {
                room_id: room_id.clone(),
                user_id: user.into(),
            },
        )
        .await;
    }

    let turn = wait_for(&mut rx_alice, |e| {
        matches!(e, ServerEvent::TurnInfo(t) if t.stage == 1)
    })
    .await;
    let ServerEvent::TurnInfo(turn) = turn else {
        unreachable!()
    };
    assert_eq!(turn.current_player_id.as_deref(), Some("alice"));

    (room_id, rx_alice, rx_dana)
}

/// The nine accepted turns of the protocol, in speaking order.
const TURNS: [(&str, &str, &str); 9] = [
    ("c-alice", "alice", "A1"),
    ("c-dana", "dana", "D1"),
    ("c-dana", "dana", "D2"),
    ("c-alice", "alice", "A2"),
    ("c-dana", "dana", "D3"),
    ("c-alice", "alice", "A3"),
    ("c-dana", "dana", "D4"),
    ("c-alice", "alice", "A4"),
    ("c-dana", "dana", "D5"),
];

async fn play_turns(arena: &Arena, room_id: &str, turns: &[(&str, &str, &str)]) {
    for (conn, user, text) in turns {
        dispatch(
            &arena.app,
            conn,
            ClientEvent::SendMessage {
                room_id: room_id.to_string(),
                user_id: (*user).to_string(),
                message: (*text).to_string(),
            },
        )
        .await;
    }
}

#[tokio::test(start_paused = true)]
async fn happy_path_without_referee_persists_and_rates() {
    let arena = arena();
    let (room_id, _rx_alice, mut rx_dana) = start_two_player_battle(&arena).await;

    play_turns(&arena, &room_id, &TURNS).await;

    let result = wait_for(&mut rx_dana, |e| {
        matches!(e, ServerEvent::BattleResult { .. })
    })
    .await;
    let ServerEvent::BattleResult { verdict } = result else {
        unreachable!()
    };
    assert_eq!(verdict.winner_user_id, "alice");
    assert_eq!(verdict.agree.score, 80);
    assert_eq!(verdict.disagree.score, 70);

    let matches = arena.store.matches.lock().unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].player1, "alice");
    assert_eq!(matches[0].player2, "dana");
    assert_eq!(matches[0].winner_id, "alice");
    assert_eq!(matches[0].subject_id, 1);
    assert!(matches[0].log_json.contains("A1"));
    drop(matches);

    let alice = arena.store.profile("alice").unwrap();
    let dana = arena.store.profile("dana").unwrap();
    assert!(alice.rating > DEFAULT_RATING);
    assert!(dana.rating < DEFAULT_RATING);
    // Equal starting ratings move by the same magnitude.
    let gain = alice.rating - DEFAULT_RATING;
    let loss = DEFAULT_RATING - dana.rating;
    assert!((gain - loss).abs() < 1e-9);
    assert_eq!(alice.wins, 1);
    assert_eq!(dana.loses, 1);

    // Teardown removed the room.
    assert!(arena.app.rooms.get(&room_id).is_none());
}

#[tokio::test(start_paused = true)]
async fn six_round_overflows_forfeit_to_the_opponent() {
    let arena = arena();
    let (room_id, _rx_alice, mut rx_dana) = start_two_player_battle(&arena).await;
    let room = arena.app.rooms.get(&room_id).unwrap();

    // The opening speaker never sends; six successive overflows accrue
    // 6 x 3 = 18 penalty points.
    arena.clock.advance(120_001);
    engine::run_tick(&arena.app, &room).await;
    for _ in 0..5 {
        arena.clock.advance(30_001);
        engine::run_tick(&arena.app, &room).await;
    }

    let mut penalties = 0;
    let mut saw_result = false;
    while let Ok(event) = rx_dana.try_recv() {
        match event {
            ServerEvent::PenaltyApplied(p) => {
                assert!(!saw_result, "penalty_applied must precede battle_result");
                assert_eq!(p.user_id, "alice");
                penalties += 1;
            }
            ServerEvent::BattleResult { verdict } => {
                assert_eq!(verdict.winner_user_id, "dana");
                assert_eq!(verdict.agree.score, 0);
                assert_eq!(verdict.disagree.score, 100);
                saw_result = true;
            }
            _ => {}
        }
    }
    assert_eq!(penalties, 6);
    assert!(saw_result);

    // One persisted record, one set of rating updates.
    assert_eq!(arena.store.matches.lock().unwrap().len(), 1);
    let alice = arena.store.profile("alice").unwrap();
    let dana = arena.store.profile("dana").unwrap();
    assert_eq!(alice.loses, 1);
    assert_eq!(dana.wins, 1);
    assert!(alice.rating < DEFAULT_RATING);
    assert!(dana.rating > DEFAULT_RATING);
}

#[tokio::test(start_paused = true)]
async fn reconnect_mid_match_resyncs_and_rebinds_delivery() {
    let arena = arena();
    let (room_id, rx_alice, mut rx_dana) = start_two_player_battle(&arena).await;

    // Three accepted messages put the match at stage 4 (alice's turn).
    play_turns(&arena, &room_id, &TURNS[..3]).await;

    // The first connection drops; the same user returns on a new one.
    drop(rx_alice);
    arena.app.hub.unregister("c-alice");
    let mut rx_alice2 = connect(&arena.app, "c-alice-2");

    dispatch(
        &arena.app,
        "c-alice-2",
        ClientEvent::JoinDiscussionRoom {
            room_id: room_id.clone(),
            user_id: "alice".into(),
        },
    )
    .await;
    dispatch(
        &arena.app,
        "c-alice-2",
        ClientEvent::GetRoomState {
            room_id: room_id.clone(),
            user_id: "alice".into(),
        },
    )
    .await;

    let snapshot = wait_for(&mut rx_alice2, |e| {
        matches!(e, ServerEvent::RoomStateUpdated(_))
    })
    .await;
    let ServerEvent::RoomStateUpdated(snapshot) = snapshot else {
        unreachable!()
    };
    assert_eq!(snapshot.stage, 4);
    assert!(snapshot.battle_active);
    assert_eq!(snapshot.current_player_id.as_deref(), Some("alice"));
    assert!(snapshot.is_my_turn);
    assert!(snapshot.timer.is_some());
    assert!(!snapshot.messages.is_empty());

    // Subsequent engine events land on the new connection.
    play_turns(&arena, &room_id, &[("c-alice-2", "alice", "A2")]).await;
    let turn = wait_for(&mut rx_alice2, |e| {
        matches!(e, ServerEvent::TurnInfo(t) if t.stage == 5)
    })
    .await;
    let ServerEvent::TurnInfo(turn) = turn else {
        unreachable!()
    };
    assert_eq!(turn.current_player_id.as_deref(), Some("dana"));
    wait_for(&mut rx_dana, |e| {
        matches!(e, ServerEvent::TurnInfo(t) if t.stage == 5)
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn referee_scores_blend_and_flip_the_winner() {
    let arena = arena();
    arena.store.put_profile(MemStore::admin("ref"));
    arena.judge.push(Ok((
        ScriptedJudge::verdict(60, 80, "disagree"),
        "반대측이 우세했습니다.".to_string(),
    )));

    let app = &arena.app;
    let mut rx_ref = connect(app, "c-ref");
    let mut rx_bob = connect(app, "c-bob");
    let mut rx_carol = connect(app, "c-carol");

    dispatch(
        app,
        "c-ref",
        ClientEvent::CreateRoom {
            user_id: "ref".into(),
            subject_id: 2,
        },
    )
    .await;
    let created = wait_for(&mut rx_ref, |e| {
        matches!(e, ServerEvent::CreateRoomResult { .. })
    })
    .await;
    let ServerEvent::CreateRoomResult {
        room: Some(room), ..
    } = created
    else {
        panic!("room creation failed");
    };
    // The admin creator moderates instead of playing.
    assert!(room.has_referee);
    let room_id = room.room_id;

    for (conn, user) in [("c-bob", "bob"), ("c-carol", "carol")] {
        dispatch(
            app,
            conn,
            ClientEvent::JoinRoom {
                room_id: room_id.clone(),
                user_id: user.into(),
            },
        )
        .await;
    }
    dispatch(
        app,
        "c-bob",
        ClientEvent::SelectPosition {
            room_id: room_id.clone(),
            user_id: "bob".into(),
            position: Some(Position::Agree),
        },
    )
    .await;
    dispatch(
        app,
        "c-carol",
        ClientEvent::SelectPosition {
            room_id: room_id.clone(),
            user_id: "carol".into(),
            position: Some(Position::Disagree),
        },
    )
    .await;
    for (conn, user) in [("c-bob", "bob"), ("c-carol", "carol")] {
        dispatch(
            app,
            conn,
            ClientEvent::PlayerReady {
                room_id: room_id.clone(),
                user_id: user.into(),
            },
        )
        .await;
    }
    wait_for(&mut rx_bob, |e| matches!(e, ServerEvent::BattleStart { .. })).await;
    for (conn, user) in [("c-bob", "bob"), ("c-carol", "carol")] {
        dispatch(
            app,
            conn,
            ClientEvent::JoinDiscussionRoom {
                room_id: room_id.clone(),
                user_id: user.into(),
            },
        )
        .await;
        dispatch(
            app,
            conn,
            ClientEvent::DiscussionViewReady {
                room_id: room_id.clone(),
                user_id: user.into(),
            },
        )
        .await;
    }
    wait_for(&mut rx_bob, |e| {
        matches!(e, ServerEvent::TurnInfo(t) if t.stage == 1)
    })
    .await;

    let turns = [
        ("c-bob", "bob", "B1"),
        ("c-carol", "carol", "C1"),
        ("c-carol", "carol", "C2"),
        ("c-bob", "bob", "B2"),
        ("c-carol", "carol", "C3"),
        ("c-bob", "bob", "B3"),
        ("c-carol", "carol", "C4"),
        ("c-bob", "bob", "B4"),
        ("c-carol", "carol", "C5"),
    ];
    play_turns(&arena, &room_id, &turns).await;

    // The AI verdict lands, and the referee is asked for scores.
    wait_for(&mut rx_carol, |e| {
        matches!(e, ServerEvent::AiJudgeMessage { stage: 10, .. })
    })
    .await;
    wait_for(&mut rx_ref, |e| {
        matches!(e, ServerEvent::ShowRefereeScoreModal { .. })
    })
    .await;

    dispatch(
        app,
        "c-ref",
        ClientEvent::RefereeSubmitScores {
            room_id: room_id.clone(),
            scores: HumanScores {
                agree: 90,
                disagree: 50,
            },
            referee_id: "ref".into(),
        },
    )
    .await;

    let result = wait_for(&mut rx_bob, |e| {
        matches!(e, ServerEvent::BattleResult { .. })
    })
    .await;
    let ServerEvent::BattleResult { verdict } = result else {
        unreachable!()
    };
    // round(60*0.4 + 90*0.6) = 78, round(80*0.4 + 50*0.6) = 62.
    assert_eq!(verdict.agree.score, 78);
    assert_eq!(verdict.disagree.score, 62);
    assert_eq!(verdict.winner_user_id, "bob");

    let matches = arena.store.matches.lock().unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].winner_id, "bob");
    assert!(matches[0].verdict_json.contains("78"));
}

#[tokio::test(start_paused = true)]
async fn evaluator_failure_ends_the_match_without_stats() {
    let arena = arena();
    arena.judge.push(Err(JudgeError::Empty));
    let (room_id, mut rx_alice, _rx_dana) = start_two_player_battle(&arena).await;

    play_turns(&arena, &room_id, &TURNS).await;

    wait_for(&mut rx_alice, |e| {
        matches!(e, ServerEvent::BattleError { .. })
    })
    .await;

    // Match deleted, nothing persisted, ratings untouched.
    let room = arena.app.rooms.get(&room_id).unwrap();
    assert!(room.state.lock().await.battle.is_none());
    assert!(arena.store.matches.lock().unwrap().is_empty());
    let alice = arena.store.profile("alice").unwrap();
    assert_eq!(alice.rating, DEFAULT_RATING);
    assert_eq!(alice.wins + alice.loses, 0);
}

#[tokio::test(start_paused = true)]
async fn subject_fallback_serves_builtin_list_during_outage() {
    let arena = arena();
    let mut rx = connect(&arena.app, "c-user");

    arena.store.fail_subjects.store(true, Ordering::SeqCst);
    dispatch(&arena.app, "c-user", ClientEvent::GetSubjects).await;
    let reply = wait_for(&mut rx, |e| matches!(e, ServerEvent::Subjects { .. })).await;
    let ServerEvent::Subjects { subjects } = reply else {
        unreachable!()
    };
    assert_eq!(subjects.len(), 5);

    // After recovery the live list is served again.
    arena.store.fail_subjects.store(false, Ordering::SeqCst);
    let live: Vec<Subject> = (1..=6)
        .map(|i| Subject {
            id: i,
            title: format!("주제 {i}"),
            body: String::new(),
        })
        .collect();
    arena.store.set_subjects(live);
    dispatch(&arena.app, "c-user", ClientEvent::GetSubjects).await;
    let reply = wait_for(&mut rx, |e| matches!(e, ServerEvent::Subjects { .. })).await;
    let ServerEvent::Subjects { subjects } = reply else {
        unreachable!()
    };
    assert_eq!(subjects.len(), 6);
}

#[tokio::test(start_paused = true)]
async fn messages_from_non_current_speaker_are_silently_ignored() {
    let arena = arena();
    let (room_id, _rx_alice, mut rx_dana) = start_two_player_battle(&arena).await;

    // Stage 1 belongs to the agree side; dana's message must change nothing.
    play_turns(&arena, &room_id, &[("c-dana", "dana", "out of turn")]).await;
    let room = arena.app.rooms.get(&room_id).unwrap();
    {
        let state = room.state.lock().await;
        let battle = state.battle.as_ref().unwrap();
        assert_eq!(battle.stage, 1);
        assert!(battle.log.is_empty());
    }
    // And no error callback either: the rejection is silent.
    while let Ok(event) = rx_dana.try_recv() {
        assert!(!matches!(event, ServerEvent::RequestError { .. }));
    }
}
