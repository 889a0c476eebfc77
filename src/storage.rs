//! Store gateway: typed reads/writes of profiles, subjects and match records.
//!
//! No business logic lives here. The trait exists so the engine can be tested
//! against an in-memory fake; `SqliteStore` is the production implementation.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::warn;

use crate::error::StoreError;
use crate::types::{Profile, Subject, UserId};

/// Default rating assigned to a first-seen user.
pub const DEFAULT_RATING: f64 = 1500.0;

/// Partial profile update applied atomically at match end.
#[derive(Debug, Default, Clone)]
pub struct ProfilePatch {
    pub display_name: Option<String>,
    pub rating: Option<f64>,
    pub wins: Option<i64>,
    pub loses: Option<i64>,
    pub avatar_url: Option<String>,
}

/// One finished match, as persisted.
#[derive(Debug, Clone)]
pub struct MatchRecord {
    /// Agree-side player.
    pub player1: UserId,
    /// Disagree-side player.
    pub player2: UserId,
    pub subject_id: i64,
    pub winner_id: UserId,
    pub log_json: String,
    pub verdict_json: String,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_subject(&self, id: i64) -> Result<Subject, StoreError>;
    async fn list_subjects(&self) -> Result<Vec<Subject>, StoreError>;
    /// Fetches a profile, creating the default one on first sight.
    async fn get_profile(&self, user_id: &str) -> Result<Profile, StoreError>;
    async fn update_profile(&self, user_id: &str, patch: ProfilePatch) -> Result<(), StoreError>;
    async fn insert_match(&self, record: MatchRecord) -> Result<(), StoreError>;
}

/// Built-in subjects backing `get_subjects` when the store is unreachable.
pub fn builtin_subjects() -> Vec<Subject> {
    let seed = [
        (
            "인공지능은 인간의 일자리를 대체할 것인가",
            "생성형 AI의 확산이 고용 시장에 미치는 영향을 놓고 토론합니다.",
        ),
        (
            "사형제도는 폐지되어야 한다",
            "형벌의 목적과 오판 가능성을 중심으로 토론합니다.",
        ),
        (
            "청소년의 SNS 사용은 규제되어야 한다",
            "정신 건강 보호와 표현의 자유 사이의 균형을 놓고 토론합니다.",
        ),
        (
            "원자력 발전은 확대되어야 한다",
            "탄소 중립 목표와 안전성 우려를 중심으로 토론합니다.",
        ),
        (
            "동물실험은 금지되어야 한다",
            "의학 발전의 필요성과 동물권 보호를 중심으로 토론합니다.",
        ),
    ];
    seed.iter()
        .enumerate()
        .map(|(i, (title, body))| Subject {
            id: (i + 1) as i64,
            title: (*title).to_string(),
            body: (*body).to_string(),
        })
        .collect()
}

/// `get_subjects` with the transient-failure fallback: a store outage must
/// not leave the lobby without a subject list.
pub async fn subjects_or_fallback(store: &Arc<dyn Store>) -> Vec<Subject> {
    match store.list_subjects().await {
        Ok(list) if !list.is_empty() => list,
        Ok(_) => builtin_subjects(),
        Err(e) => {
            warn!(error = %e, "subject list unavailable, serving built-in subjects");
            builtin_subjects()
        }
    }
}

pub async fn init_db(db_url: &str) -> anyhow::Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
    let db = SqlitePoolOptions::new().connect_with(opts).await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS user_profile (
            userId TEXT PRIMARY KEY,
            displayName TEXT NOT NULL,
            rating REAL NOT NULL DEFAULT 1500,
            wins INTEGER NOT NULL DEFAULT 0,
            loses INTEGER NOT NULL DEFAULT 0,
            isAdmin INTEGER NOT NULL DEFAULT 0,
            avatarUrl TEXT
        )",
    )
    .execute(&db)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS subjects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            body TEXT NOT NULL
        )",
    )
    .execute(&db)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS battles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            player1 TEXT NOT NULL,
            player2 TEXT NOT NULL,
            subjectId INTEGER NOT NULL,
            winnerId TEXT NOT NULL,
            logJson TEXT NOT NULL,
            verdictJson TEXT NOT NULL,
            createdAt TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(&db)
    .await?;

    seed_subjects(&db).await?;

    Ok(db)
}

/// First boot ships the built-in subject list.
async fn seed_subjects(db: &SqlitePool) -> anyhow::Result<()> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM subjects")
        .fetch_one(db)
        .await?;
    if count > 0 {
        return Ok(());
    }
    for subject in builtin_subjects() {
        sqlx::query("INSERT INTO subjects (title, body) VALUES (?1, ?2)")
            .bind(&subject.title)
            .bind(&subject.body)
            .execute(db)
            .await?;
    }
    Ok(())
}

pub struct SqliteStore {
    db: SqlitePool,
}

impl SqliteStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    #[sqlx(rename = "userId")]
    user_id: String,
    #[sqlx(rename = "displayName")]
    display_name: String,
    rating: f64,
    wins: i64,
    loses: i64,
    #[sqlx(rename = "isAdmin")]
    is_admin: bool,
    #[sqlx(rename = "avatarUrl")]
    avatar_url: Option<String>,
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Profile {
            user_id: row.user_id,
            display_name: row.display_name,
            rating: row.rating,
            wins: row.wins,
            loses: row.loses,
            is_admin: row.is_admin,
            avatar_url: row.avatar_url,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SubjectRow {
    id: i64,
    title: String,
    body: String,
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_subject(&self, id: i64) -> Result<Subject, StoreError> {
        let row: SubjectRow =
            sqlx::query_as("SELECT id, title, body FROM subjects WHERE id = ?1")
                .bind(id)
                .fetch_one(&self.db)
                .await?;
        Ok(Subject {
            id: row.id,
            title: row.title,
            body: row.body,
        })
    }

    async fn list_subjects(&self) -> Result<Vec<Subject>, StoreError> {
        let rows: Vec<SubjectRow> =
            sqlx::query_as("SELECT id, title, body FROM subjects ORDER BY id")
                .fetch_all(&self.db)
                .await?;
        Ok(rows
            .into_iter()
            .map(|row| Subject {
                id: row.id,
                title: row.title,
                body: row.body,
            })
            .collect())
    }

    async fn get_profile(&self, user_id: &str) -> Result<Profile, StoreError> {
        let found: Option<ProfileRow> = sqlx::query_as(
            "SELECT userId, displayName, rating, wins, loses, isAdmin, avatarUrl
             FROM user_profile WHERE userId = ?1",
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        if let Some(row) = found {
            return Ok(row.into());
        }

        sqlx::query(
            "INSERT OR IGNORE INTO user_profile (userId, displayName, rating, wins, loses, isAdmin)
             VALUES (?1, ?2, ?3, 0, 0, 0)",
        )
        .bind(user_id)
        .bind(user_id)
        .bind(DEFAULT_RATING)
        .execute(&self.db)
        .await?;

        Ok(Profile {
            user_id: user_id.to_string(),
            display_name: user_id.to_string(),
            rating: DEFAULT_RATING,
            wins: 0,
            loses: 0,
            is_admin: false,
            avatar_url: None,
        })
    }

    async fn update_profile(&self, user_id: &str, patch: ProfilePatch) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE user_profile SET
                displayName = COALESCE(?2, displayName),
                rating = COALESCE(?3, rating),
                wins = COALESCE(?4, wins),
                loses = COALESCE(?5, loses),
                avatarUrl = COALESCE(?6, avatarUrl)
             WHERE userId = ?1",
        )
        .bind(user_id)
        .bind(patch.display_name)
        .bind(patch.rating)
        .bind(patch.wins)
        .bind(patch.loses)
        .bind(patch.avatar_url)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn insert_match(&self, record: MatchRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO battles (player1, player2, subjectId, winnerId, logJson, verdictJson)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&record.player1)
        .bind(&record.player2)
        .bind(record.subject_id)
        .bind(&record.winner_id)
        .bind(&record.log_json)
        .bind(&record.verdict_json)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}
