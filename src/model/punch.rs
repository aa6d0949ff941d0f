use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Punch direction/kind as stored on the record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
    strum_macros::Display, strum_macros::EnumString,
)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PunchType {
    In,
    Out,
    BreakStart,
    BreakEnd,
    MissionStart,
    MissionEnd,
}

impl PunchType {
    pub fn is_break(self) -> bool {
        matches!(self, PunchType::BreakStart | PunchType::BreakEnd)
    }

    pub fn is_mission(self) -> bool {
        matches!(self, PunchType::MissionStart | PunchType::MissionEnd)
    }

    /// IN <-> OUT alternation; break/mission punches have no opposite.
    pub fn alternated(self) -> Option<PunchType> {
        match self {
            PunchType::In => Some(PunchType::Out),
            PunchType::Out => Some(PunchType::In),
            _ => None,
        }
    }
}

/// How the punch was captured on the device.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
    strum_macros::Display, strum_macros::EnumString,
)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PunchMethod {
    Fingerprint,
    Face,
    Rfid,
    Pin,
    Manual,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
    strum_macros::Display, strum_macros::EnumString,
)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyType {
    MissingOut,
    MissingIn,
    DoublePunch,
    Late,
    EarlyLeave,
    Absence,
    AbsencePartial,
    AbsenceTechnical,
    LeaveConflict,
}

impl AnomalyType {
    /// Severity rank used for the manager-notification threshold.
    /// Higher means more severe.
    pub fn priority(self) -> u8 {
        match self {
            AnomalyType::Absence => 9,
            AnomalyType::AbsenceTechnical => 8,
            AnomalyType::AbsencePartial => 7,
            AnomalyType::LeaveConflict => 7,
            AnomalyType::MissingOut => 6,
            AnomalyType::MissingIn => 6,
            AnomalyType::DoublePunch => 4,
            AnomalyType::Late => 3,
            AnomalyType::EarlyLeave => 2,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
    strum_macros::Display, strum_macros::EnumString,
)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// Lifecycle of an ambiguous punch; only the classifier creates
/// PENDING_VALIDATION records, and all three other states are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
    strum_macros::Display, strum_macros::EnumString,
)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    PendingValidation,
    Validated,
    Rejected,
    Corrected,
}

/// The persisted attendance record.
///
/// Mutated by the classifier (type), the anomaly detector (anomaly/metric
/// fields), correctors, approvers, validators and the escalation scheduler.
/// Never physically deleted except manual records removed by an authorized
/// actor, and synthetic absences superseded by a genuine punch.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PunchEvent {
    pub id: u64,
    pub tenant_id: u64,
    pub employee_id: u64,
    pub device_id: Option<String>,
    pub timestamp: NaiveDateTime,
    pub punch_type: PunchType,
    pub method: PunchMethod,
    /// Opaque device payload, stored verbatim as a JSON audit blob.
    pub raw_payload: Option<String>,

    pub has_anomaly: bool,
    pub anomaly_type: Option<AnomalyType>,
    pub anomaly_note: Option<String>,

    pub is_corrected: bool,
    pub corrected_by: Option<u64>,
    pub corrected_at: Option<NaiveDateTime>,
    pub correction_note: Option<String>,
    /// Pre-correction values, kept while an approval is pending so a
    /// rejection can restore the record exactly.
    pub prev_type: Option<PunchType>,
    pub prev_timestamp: Option<NaiveDateTime>,

    pub needs_approval: bool,
    pub approval_status: Option<ApprovalStatus>,
    pub approved_by: Option<u64>,
    pub approved_at: Option<NaiveDateTime>,

    pub validation_status: Option<ValidationStatus>,
    pub ambiguity_reason: Option<String>,
    pub escalation_level: u8,
    pub escalated_at: Option<NaiveDateTime>,

    pub hours_worked: Option<f64>,
    pub late_minutes: Option<i32>,
    pub early_leave_minutes: Option<i32>,
    pub overtime_minutes: Option<i32>,

    pub is_generated: bool,
    pub generated_by: Option<String>,

    pub created_at: NaiveDateTime,
}

impl PunchEvent {
    /// A punch that should count for alternation and day metrics: a real
    /// (non-synthetic) punch whose validation was not rejected.
    pub fn is_valid_for_sequence(&self) -> bool {
        !self.is_generated && self.validation_status != Some(ValidationStatus::Rejected)
    }
}
