use thiserror::Error;

/// Rejection of a single client request. Recovered at the dispatch boundary
/// and surfaced to the requesting connection only.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Transient(String),
}

impl EventError {
    pub fn kind(&self) -> &'static str {
        match self {
            EventError::BadRequest(_) => "bad_request",
            EventError::NotFound(_) => "not_found",
            EventError::Forbidden(_) => "forbidden",
            EventError::Conflict(_) => "conflict",
            EventError::Transient(_) => "transient",
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        EventError::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        EventError::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        EventError::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        EventError::Conflict(msg.into())
    }
}

impl From<StoreError> for EventError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => EventError::NotFound("record not found".into()),
            StoreError::Conflict => EventError::Conflict("conflicting write".into()),
            StoreError::Transient(msg) => EventError::Transient(msg),
        }
    }
}

/// Store gateway failure kinds.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("conflicting write")]
    Conflict,
    #[error("transient store failure: {0}")]
    Transient(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict,
            other => StoreError::Transient(other.to_string()),
        }
    }
}

/// Failure of the external evaluator. Terminal for the match but never a
/// forfeit: the engine reports it to the room and deletes the match without
/// touching profiles.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("judge request failed: {0}")]
    Transport(String),
    #[error("judge returned malformed output: {0}")]
    Malformed(String),
    #[error("judge returned an empty response")]
    Empty,
}
