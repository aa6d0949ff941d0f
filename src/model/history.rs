use crate::model::punch::PunchType;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Transitions recorded in the append-only correction log.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
    strum_macros::Display, strum_macros::EnumString,
)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrectionAction {
    Corrected,
    Approved,
    Rejected,
    Validated,
    ValidationRejected,
    ValidationCorrected,
}

/// One entry of the audit trail attached to a punch record. Entries are only
/// ever appended; the mutable current state lives on the punch row itself.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CorrectionEntry {
    pub id: u64,
    pub punch_id: u64,
    pub tenant_id: u64,
    pub action: CorrectionAction,
    pub actor_id: u64,
    pub note: Option<String>,
    /// Values in effect before this transition, for audit and reverts.
    pub prev_type: Option<PunchType>,
    pub prev_timestamp: Option<NaiveDateTime>,
    pub new_type: Option<PunchType>,
    pub new_timestamp: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}
