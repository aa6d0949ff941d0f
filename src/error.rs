use derive_more::{Display, Error};

/// Error taxonomy for the attendance engine.
///
/// `Duplicate` is a defined outcome of the debounce guard, not a failure:
/// ingestion maps it to a terse `DUPLICATE` status for the terminal, while
/// human-facing endpoints surface the other variants with the blocking
/// reason.
#[derive(Debug, Display, Error)]
pub enum EngineError {
    /// Malformed input (missing employee identifier, unparseable timestamp).
    #[display(fmt = "validation error: {}", _0)]
    Validation(#[error(not(source))] String),

    /// Employee or punch record could not be resolved.
    #[display(fmt = "not found: {}", _0)]
    NotFound(#[error(not(source))] String),

    /// Debounce match: another punch exists within the window.
    #[display(fmt = "duplicate of punch {}", existing_id)]
    Duplicate { existing_id: u64 },

    /// State-machine transition not permitted.
    #[display(fmt = "conflict: record is {}, cannot {}", current, requested)]
    Conflict { current: String, requested: String },

    /// Actor lacks rights for the requested transition.
    #[display(fmt = "unauthorized actor {}: {}", actor_id, reason)]
    UnauthorizedActor { actor_id: u64, reason: String },

    /// Directory / leave-registry lookup failed.
    #[display(fmt = "dependency error: {}", _0)]
    Dependency(#[error(not(source))] String),

    #[display(fmt = "database error: {}", _0)]
    Db(sqlx::Error),
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => EngineError::NotFound("record not found".into()),
            other => EngineError::Db(other),
        }
    }
}

impl EngineError {
    pub fn conflict(current: impl Into<String>, requested: impl Into<String>) -> Self {
        EngineError::Conflict {
            current: current.into(),
            requested: requested.into(),
        }
    }
}
