use crate::engine::{fetch_punch, recompute_day};
use crate::error::EngineError;
use crate::model::history::CorrectionAction;
use crate::model::punch::{PunchEvent, PunchType, ValidationStatus};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;

/// How a privileged actor resolves an ambiguous punch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
    strum_macros::Display, strum_macros::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationAction {
    /// Confirm the classified type as-is.
    Validate,
    /// Discard the punch as a spurious signal.
    Reject,
    /// Flip the type to `corrected_type` and recompute the day.
    Correct,
}

/// Filters for the pending-validation queue. All optional; unset means no
/// constraint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ValidationFilter {
    pub employee_id: Option<u64>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub min_escalation_level: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkValidationItem {
    pub punch_id: u64,
    pub action: ValidationAction,
    pub corrected_type: Option<PunchType>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkValidationSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failures: Vec<BulkValidationFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkValidationFailure {
    pub punch_id: u64,
    pub error: String,
}

/// Only a pending punch accepts a resolution; the other states are
/// terminal.
fn resolvable(status: Option<ValidationStatus>) -> bool {
    status == Some(ValidationStatus::PendingValidation)
}

/// Map an action to the terminal state, the history entry and the type to
/// write. CORRECT without a corrected type is malformed input.
fn resolution_for(
    action: ValidationAction,
    corrected_type: Option<PunchType>,
) -> Result<(ValidationStatus, CorrectionAction, Option<PunchType>), EngineError> {
    match action {
        ValidationAction::Validate => {
            Ok((ValidationStatus::Validated, CorrectionAction::Validated, None))
        }
        ValidationAction::Reject => Ok((
            ValidationStatus::Rejected,
            CorrectionAction::ValidationRejected,
            None,
        )),
        ValidationAction::Correct => match corrected_type {
            Some(t) => Ok((
                ValidationStatus::Corrected,
                CorrectionAction::ValidationCorrected,
                Some(t),
            )),
            None => Err(EngineError::Validation(
                "CORRECT requires a corrected type".into(),
            )),
        },
    }
}

/// Pending ambiguous punches for a tenant, oldest first so the queue
/// surfaces the records closest to escalation.
pub async fn list_pending_validations(
    pool: &MySqlPool,
    tenant_id: u64,
    filter: ValidationFilter,
) -> Result<Vec<PunchEvent>, EngineError> {
    // Dynamic filter assembly; every fragment keeps its bind adjacent.
    let mut sql = String::from(
        "SELECT * FROM punches \
         WHERE tenant_id = ? AND validation_status = 'PENDING_VALIDATION'",
    );
    if filter.employee_id.is_some() {
        sql.push_str(" AND employee_id = ?");
    }
    if filter.from.is_some() {
        sql.push_str(" AND timestamp >= ?");
    }
    if filter.to.is_some() {
        sql.push_str(" AND timestamp < ?");
    }
    if filter.min_escalation_level.is_some() {
        sql.push_str(" AND escalation_level >= ?");
    }
    sql.push_str(" ORDER BY timestamp ASC");

    let mut query = sqlx::query_as::<_, PunchEvent>(&sql).bind(tenant_id);
    if let Some(id) = filter.employee_id {
        query = query.bind(id);
    }
    if let Some(from) = filter.from {
        query = query.bind(from.and_time(chrono::NaiveTime::MIN));
    }
    if let Some(to) = filter.to {
        query = query.bind(to.and_time(chrono::NaiveTime::MIN));
    }
    if let Some(level) = filter.min_escalation_level {
        query = query.bind(level);
    }

    Ok(query.fetch_all(pool).await?)
}

/// Resolve one pending punch. Only PENDING_VALIDATION records accept a
/// resolution; the three outcomes are all terminal.
pub async fn validate_punch(
    pool: &MySqlPool,
    punch_id: u64,
    actor_id: u64,
    action: ValidationAction,
    corrected_type: Option<PunchType>,
    note: Option<String>,
) -> Result<PunchEvent, EngineError> {
    let punch = fetch_punch(pool, punch_id).await?;

    if !resolvable(punch.validation_status) {
        let current = punch
            .validation_status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "NONE".into());
        return Err(EngineError::conflict(&current, &action.to_string()));
    }

    let (new_status, history_action, new_type) = resolution_for(action, corrected_type)?;

    let history = sqlx::query(
        "INSERT INTO punch_corrections \
             (punch_id, tenant_id, action, actor_id, note, \
              prev_type, prev_timestamp, new_type, new_timestamp) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(punch_id)
    .bind(punch.tenant_id)
    .bind(history_action)
    .bind(actor_id)
    .bind(&note)
    .bind(punch.punch_type)
    .bind(punch.timestamp)
    .bind(new_type)
    .bind(Option::<chrono::NaiveDateTime>::None)
    .execute(pool)
    .await;
    if let Err(e) = history {
        tracing::error!(error = %e, punch_id, %history_action, "Failed to append validation history");
    }

    // Guarded on the pending state so two racing resolutions cannot both
    // win.
    let updated = sqlx::query(
        "UPDATE punches SET \
             validation_status = ?, punch_type = ? \
         WHERE id = ? AND validation_status = 'PENDING_VALIDATION'",
    )
    .bind(new_status)
    .bind(new_type.unwrap_or(punch.punch_type))
    .bind(punch_id)
    .execute(pool)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(EngineError::conflict("RESOLVED", &action.to_string()));
    }

    // A rejection removes the punch from the valid sequence, a type flip
    // changes the pairing; either way the day's metrics moved.
    if matches!(action, ValidationAction::Reject | ValidationAction::Correct) {
        recompute_day(
            pool,
            punch.tenant_id,
            punch.employee_id,
            punch.timestamp.date(),
            punch_id,
            true,
        )
        .await?;
    }

    tracing::info!(
        punch_id,
        actor_id,
        %action,
        tenant_id = punch.tenant_id,
        "Ambiguous punch resolved"
    );

    fetch_punch(pool, punch_id).await
}

/// Resolve a batch of pending punches with per-record error isolation: one
/// failing record never rolls back or blocks the others.
pub async fn bulk_validate(
    pool: &MySqlPool,
    tenant_id: u64,
    actor_id: u64,
    items: Vec<BulkValidationItem>,
) -> BulkValidationSummary {
    let mut summary = BulkValidationSummary {
        processed: items.len(),
        succeeded: 0,
        failures: Vec::new(),
    };

    for item in items {
        let result = async {
            // Cross-tenant ids in a batch are rejected before any state
            // change.
            let punch = fetch_punch(pool, item.punch_id).await?;
            if punch.tenant_id != tenant_id {
                return Err(EngineError::UnauthorizedActor {
                    actor_id,
                    reason: "record belongs to another tenant".into(),
                });
            }
            validate_punch(
                pool,
                item.punch_id,
                actor_id,
                item.action,
                item.corrected_type,
                item.note.clone(),
            )
            .await
        }
        .await;

        match result {
            Ok(_) => summary.succeeded += 1,
            Err(e) => {
                tracing::warn!(error = %e, punch_id = item.punch_id, "Bulk validation item failed");
                summary.failures.push(BulkValidationFailure {
                    punch_id: item.punch_id,
                    error: e.to_string(),
                });
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_punches_are_resolvable() {
        assert!(resolvable(Some(ValidationStatus::PendingValidation)));
        assert!(!resolvable(None));
        assert!(!resolvable(Some(ValidationStatus::Validated)));
        assert!(!resolvable(Some(ValidationStatus::Rejected)));
        assert!(!resolvable(Some(ValidationStatus::Corrected)));
    }

    #[test]
    fn resolutions_reach_their_terminal_state() {
        let (status, action, new_type) =
            resolution_for(ValidationAction::Validate, None).unwrap();
        assert_eq!(status, ValidationStatus::Validated);
        assert_eq!(action, CorrectionAction::Validated);
        assert!(new_type.is_none());

        let (status, _, _) = resolution_for(ValidationAction::Reject, None).unwrap();
        assert_eq!(status, ValidationStatus::Rejected);

        let (status, action, new_type) =
            resolution_for(ValidationAction::Correct, Some(PunchType::Out)).unwrap();
        assert_eq!(status, ValidationStatus::Corrected);
        assert_eq!(action, CorrectionAction::ValidationCorrected);
        assert_eq!(new_type, Some(PunchType::Out));
    }

    #[test]
    fn correct_without_a_type_is_rejected() {
        let err = resolution_for(ValidationAction::Correct, None).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
