//! In-memory collaborators for engine tests: a store, an evaluator with
//! scripted answers, and captured client connections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{JudgeError, StoreError};
use crate::events::ServerEvent;
use crate::judge::{Judge, RawVerdict};
use crate::storage::{builtin_subjects, MatchRecord, ProfilePatch, Store, DEFAULT_RATING};
use crate::types::{AppState, Profile, SideVerdict, Subject};

/// Store fake backed by hash maps. `fail_subjects` simulates a transient
/// outage of the subject table only, matching the fallback policy.
pub struct MemStore {
    profiles: Mutex<HashMap<String, Profile>>,
    subjects: Mutex<Vec<Subject>>,
    pub matches: Mutex<Vec<MatchRecord>>,
    pub fail_subjects: AtomicBool,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            profiles: Mutex::new(HashMap::new()),
            subjects: Mutex::new(builtin_subjects()),
            matches: Mutex::new(Vec::new()),
            fail_subjects: AtomicBool::new(false),
        }
    }

    pub fn put_profile(&self, profile: Profile) {
        self.profiles
            .lock()
            .unwrap()
            .insert(profile.user_id.clone(), profile);
    }

    pub fn admin(user_id: &str) -> Profile {
        Profile {
            user_id: user_id.to_string(),
            display_name: user_id.to_string(),
            rating: DEFAULT_RATING,
            wins: 0,
            loses: 0,
            is_admin: true,
            avatar_url: None,
        }
    }

    pub fn profile(&self, user_id: &str) -> Option<Profile> {
        self.profiles.lock().unwrap().get(user_id).cloned()
    }

    pub fn set_subjects(&self, subjects: Vec<Subject>) {
        *self.subjects.lock().unwrap() = subjects;
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn get_subject(&self, id: i64) -> Result<Subject, StoreError> {
        self.subjects
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_subjects(&self) -> Result<Vec<Subject>, StoreError> {
        if self.fail_subjects.load(Ordering::SeqCst) {
            return Err(StoreError::Transient("subject table unavailable".into()));
        }
        Ok(self.subjects.lock().unwrap().clone())
    }

    async fn get_profile(&self, user_id: &str) -> Result<Profile, StoreError> {
        let mut profiles = self.profiles.lock().unwrap();
        Ok(profiles
            .entry(user_id.to_string())
            .or_insert_with(|| Profile {
                user_id: user_id.to_string(),
                display_name: user_id.to_string(),
                rating: DEFAULT_RATING,
                wins: 0,
                loses: 0,
                is_admin: false,
                avatar_url: None,
            })
            .clone())
    }

    async fn update_profile(&self, user_id: &str, patch: ProfilePatch) -> Result<(), StoreError> {
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles.get_mut(user_id).ok_or(StoreError::NotFound)?;
        if let Some(display_name) = patch.display_name {
            profile.display_name = display_name;
        }
        if let Some(rating) = patch.rating {
            profile.rating = rating;
        }
        if let Some(wins) = patch.wins {
            profile.wins = wins;
        }
        if let Some(loses) = patch.loses {
            profile.loses = loses;
        }
        if let Some(avatar_url) = patch.avatar_url {
            profile.avatar_url = Some(avatar_url);
        }
        Ok(())
    }

    async fn insert_match(&self, record: MatchRecord) -> Result<(), StoreError> {
        self.matches.lock().unwrap().push(record);
        Ok(())
    }
}

/// Evaluator fake that replays scripted outcomes in order and falls back to a
/// fixed 80/70 agree win when the script runs dry.
pub struct ScriptedJudge {
    script: Mutex<Vec<Result<(RawVerdict, String), JudgeError>>>,
}

impl ScriptedJudge {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, outcome: Result<(RawVerdict, String), JudgeError>) {
        self.script.lock().unwrap().push(outcome);
    }

    pub fn verdict(agree: u32, disagree: u32, winner: &str) -> RawVerdict {
        RawVerdict {
            agree: SideVerdict {
                score: agree,
                good: String::new(),
                bad: String::new(),
            },
            disagree: SideVerdict {
                score: disagree,
                good: String::new(),
                bad: String::new(),
            },
            winner: winner.to_string(),
        }
    }
}

impl Default for ScriptedJudge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Judge for ScriptedJudge {
    async fn evaluate(
        &self,
        _subject_title: &str,
        _agree_turns: &[String],
        _disagree_turns: &[String],
    ) -> Result<(RawVerdict, String), JudgeError> {
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            return Ok((
                Self::verdict(80, 70, "agree"),
                "찬성측의 승리입니다.".to_string(),
            ));
        }
        script.remove(0)
    }
}

/// App state wired with the fakes and a zero settling delay.
pub fn test_app(
    store: Arc<MemStore>,
    judge: Arc<ScriptedJudge>,
    clock: Arc<crate::clock::ManualClock>,
) -> Arc<AppState> {
    Arc::new(
        AppState::new(store, judge, clock).with_settle_delay(std::time::Duration::from_millis(0)),
    )
}

/// Register a fake connection and return its capture channel.
pub fn connect(app: &AppState, conn: &str) -> mpsc::UnboundedReceiver<ServerEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    app.hub.register(conn, tx);
    rx
}
