use crate::collab::directory;
use crate::collab::notify::{self, NotificationKind, Recipient};
use crate::engine::{fetch_day_punches, fetch_punch, recompute_day};
use crate::error::EngineError;
use crate::model::history::{CorrectionAction, CorrectionEntry};
use crate::model::punch::{AnomalyType, ApprovalStatus, PunchEvent, PunchType};
use crate::model::settings::load_settings;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;

/// Timestamp shifts beyond this always require sign-off.
const APPROVAL_SHIFT_MINUTES: i64 = 120;

/// A human edit of a punch record. At least one of `new_timestamp` /
/// `new_type` must be set.
#[derive(Debug, Clone, Deserialize)]
pub struct CorrectionRequest {
    pub new_timestamp: Option<NaiveDateTime>,
    pub new_type: Option<PunchType>,
    pub note: Option<String>,
}

/// Only raw records and rejected corrections (re-)enter correction; an
/// approved record is frozen.
fn correction_allowed(status: Option<ApprovalStatus>) -> bool {
    status != Some(ApprovalStatus::Approved)
}

/// Only a pending correction can be approved or rejected.
fn decision_allowed(status: Option<ApprovalStatus>) -> bool {
    status == Some(ApprovalStatus::Pending)
}

/// The revert snapshot for a correction: overwriting a still-pending
/// correction keeps the original snapshot, anything else snapshots the
/// values currently in effect.
fn snapshot_for(
    status: Option<ApprovalStatus>,
    prev: (Option<PunchType>, Option<NaiveDateTime>),
    current: (PunchType, NaiveDateTime),
) -> (Option<PunchType>, Option<NaiveDateTime>) {
    if status == Some(ApprovalStatus::Pending) {
        prev
    } else {
        (Some(current.0), Some(current.1))
    }
}

/// Values a rejection restores: the snapshot when one exists, otherwise the
/// record as it stands.
fn restore_target(
    prev: (Option<PunchType>, Option<NaiveDateTime>),
    current: (PunchType, NaiveDateTime),
) -> (PunchType, NaiveDateTime) {
    (prev.0.unwrap_or(current.0), prev.1.unwrap_or(current.1))
}

/// Sign-off rule: a large timestamp shift, or a resulting anomaly in the
/// tenant's approval-required set.
fn requires_approval(
    shift_minutes: i64,
    anomaly: Option<AnomalyType>,
    approval_set: &[AnomalyType],
) -> bool {
    shift_minutes > APPROVAL_SHIFT_MINUTES
        || anomaly.map(|k| approval_set.contains(&k)).unwrap_or(false)
}

/// A day strictly before today is over; an open IN on it is a MISSING_OUT.
fn day_closed(day: NaiveDate, today: NaiveDate) -> bool {
    day < today
}

async fn append_history(
    pool: &MySqlPool,
    punch: &PunchEvent,
    action: CorrectionAction,
    actor_id: u64,
    note: Option<&str>,
    new_type: Option<PunchType>,
    new_timestamp: Option<NaiveDateTime>,
) {
    let result = sqlx::query(
        "INSERT INTO punch_corrections \
             (punch_id, tenant_id, action, actor_id, note, \
              prev_type, prev_timestamp, new_type, new_timestamp) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(punch.id)
    .bind(punch.tenant_id)
    .bind(action)
    .bind(actor_id)
    .bind(note)
    .bind(punch.punch_type)
    .bind(punch.timestamp)
    .bind(new_type)
    .bind(new_timestamp)
    .execute(pool)
    .await;

    // The history is for audit; losing one entry must not undo the
    // transition that already happened.
    if let Err(e) = result {
        tracing::error!(error = %e, punch_id = punch.id, %action, "Failed to append correction history");
    }
}

/// Apply a correction to a punch. Allowed from the raw state, from a
/// rejected correction, or over a still-pending correction (each call fully
/// replaces the previous pending edit). An approved record is frozen.
///
/// The correction takes effect immediately; when it requires sign-off the
/// record additionally enters PENDING approval and a rejection later
/// restores the snapshotted pre-correction values.
pub async fn correct_punch(
    pool: &MySqlPool,
    punch_id: u64,
    actor_id: u64,
    req: CorrectionRequest,
) -> Result<PunchEvent, EngineError> {
    if req.new_timestamp.is_none() && req.new_type.is_none() {
        return Err(EngineError::Validation(
            "correction must change the timestamp or the type".into(),
        ));
    }

    let punch = fetch_punch(pool, punch_id).await?;

    if !correction_allowed(punch.approval_status) {
        return Err(EngineError::conflict("APPROVED", "CORRECTED"));
    }

    let settings = load_settings(pool, punch.tenant_id).await;

    let new_type = req.new_type.unwrap_or(punch.punch_type);
    let new_timestamp = req.new_timestamp.unwrap_or(punch.timestamp);

    let (snap_type, snap_timestamp) = snapshot_for(
        punch.approval_status,
        (punch.prev_type, punch.prev_timestamp),
        (punch.punch_type, punch.timestamp),
    );

    // Shift is measured from the original values so stacked pending edits
    // cannot stay under the threshold piecewise.
    let shift_minutes = (new_timestamp - snap_timestamp.unwrap_or(punch.timestamp))
        .num_minutes()
        .abs();

    append_history(
        pool,
        &punch,
        CorrectionAction::Corrected,
        actor_id,
        req.note.as_deref(),
        Some(new_type),
        Some(new_timestamp),
    )
    .await;

    sqlx::query(
        "UPDATE punches SET \
             punch_type = ?, timestamp = ?, \
             is_corrected = 1, corrected_by = ?, corrected_at = NOW(), \
             correction_note = ?, prev_type = ?, prev_timestamp = ? \
         WHERE id = ?",
    )
    .bind(new_type)
    .bind(new_timestamp)
    .bind(actor_id)
    .bind(&req.note)
    .bind(snap_type)
    .bind(snap_timestamp)
    .bind(punch_id)
    .execute(pool)
    .await?;

    let today = chrono::Local::now().date_naive();
    let old_day = punch.timestamp.date();
    let new_day = new_timestamp.date();

    let metrics = recompute_day(
        pool,
        punch.tenant_id,
        punch.employee_id,
        new_day,
        punch_id,
        day_closed(new_day, today),
    )
    .await?;
    if old_day != new_day {
        recompute_moved_day(pool, &punch, old_day, day_closed(old_day, today)).await;
    }

    let needs_approval = requires_approval(
        shift_minutes,
        metrics.anomaly.as_ref().map(|(k, _)| *k),
        &settings.approval_set(),
    );

    if needs_approval {
        sqlx::query("UPDATE punches SET needs_approval = 1, approval_status = 'PENDING' WHERE id = ?")
            .bind(punch_id)
            .execute(pool)
            .await?;

        if settings.notify_hr {
            notify::send(
                pool,
                punch.tenant_id,
                Recipient::Hr,
                NotificationKind::ApprovalRequired,
                json!({
                    "punch_id": punch_id,
                    "employee_id": punch.employee_id,
                    "actor_id": actor_id,
                    "shift_minutes": shift_minutes,
                }),
            )
            .await;
        }
    } else {
        // No sign-off needed; the snapshot has no revert to serve.
        sqlx::query(
            "UPDATE punches SET approval_status = NULL, prev_type = NULL, prev_timestamp = NULL \
             WHERE id = ?",
        )
        .bind(punch_id)
        .execute(pool)
        .await?;
    }

    // Severe anomalies alert the manager at creation time regardless of the
    // approval outcome.
    if let Some((kind, ref note)) = metrics.anomaly {
        if settings.notify_manager && kind.priority() as i32 >= settings.manager_alert_priority {
            if let Some(manager_id) =
                directory::manager_of(pool, punch.tenant_id, punch.employee_id).await
            {
                notify::send(
                    pool,
                    punch.tenant_id,
                    Recipient::Manager(manager_id),
                    NotificationKind::CorrectionApplied,
                    json!({
                        "punch_id": punch_id,
                        "employee_id": punch.employee_id,
                        "anomaly": kind.to_string(),
                        "note": note,
                    }),
                )
                .await;
            }
        }
    }

    tracing::info!(
        punch_id,
        actor_id,
        tenant_id = punch.tenant_id,
        needs_approval,
        "Punch corrected"
    );

    fetch_punch(pool, punch_id).await
}

/// Decide a pending correction. Approving freezes the record and drops the
/// revert snapshot; rejecting restores the pre-correction values and
/// recomputes the day.
pub async fn approve_correction(
    pool: &MySqlPool,
    punch_id: u64,
    actor_id: u64,
    approved: bool,
    comment: Option<String>,
) -> Result<PunchEvent, EngineError> {
    let punch = fetch_punch(pool, punch_id).await?;

    if !decision_allowed(punch.approval_status) {
        let current = punch
            .approval_status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "RAW".into());
        let requested = if approved { "APPROVED" } else { "REJECTED" };
        return Err(EngineError::conflict(&current, requested));
    }

    let today = chrono::Local::now().date_naive();

    if approved {
        append_history(
            pool,
            &punch,
            CorrectionAction::Approved,
            actor_id,
            comment.as_deref(),
            None,
            None,
        )
        .await;

        sqlx::query(
            "UPDATE punches SET \
                 approval_status = 'APPROVED', approved_by = ?, approved_at = NOW(), \
                 needs_approval = 0, prev_type = NULL, prev_timestamp = NULL \
             WHERE id = ?",
        )
        .bind(actor_id)
        .bind(punch_id)
        .execute(pool)
        .await?;

        let day = punch.timestamp.date();
        recompute_day(
            pool,
            punch.tenant_id,
            punch.employee_id,
            day,
            punch_id,
            day_closed(day, today),
        )
        .await?;
    } else {
        let (restore_type, restore_ts) = restore_target(
            (punch.prev_type, punch.prev_timestamp),
            (punch.punch_type, punch.timestamp),
        );

        append_history(
            pool,
            &punch,
            CorrectionAction::Rejected,
            actor_id,
            comment.as_deref(),
            Some(restore_type),
            Some(restore_ts),
        )
        .await;

        sqlx::query(
            "UPDATE punches SET \
                 punch_type = ?, timestamp = ?, \
                 approval_status = 'REJECTED', approved_by = ?, approved_at = NOW(), \
                 needs_approval = 0, prev_type = NULL, prev_timestamp = NULL \
             WHERE id = ?",
        )
        .bind(restore_type)
        .bind(restore_ts)
        .bind(actor_id)
        .bind(punch_id)
        .execute(pool)
        .await?;

        let rejected_day = punch.timestamp.date();
        let restored_day = restore_ts.date();
        recompute_day(
            pool,
            punch.tenant_id,
            punch.employee_id,
            restored_day,
            punch_id,
            day_closed(restored_day, today),
        )
        .await?;
        if rejected_day != restored_day {
            recompute_moved_day(pool, &punch, rejected_day, day_closed(rejected_day, today)).await;
        }
    }

    let settings = load_settings(pool, punch.tenant_id).await;
    if settings.notify_employee {
        let kind = if approved {
            NotificationKind::CorrectionApproved
        } else {
            NotificationKind::CorrectionRejected
        };
        notify::send(
            pool,
            punch.tenant_id,
            Recipient::Employee(punch.employee_id),
            kind,
            json!({ "punch_id": punch_id, "comment": comment }),
        )
        .await;
    }

    tracing::info!(punch_id, actor_id, approved, "Correction decided");

    fetch_punch(pool, punch_id).await
}

/// Read the append-only audit trail of a punch, oldest first.
pub async fn correction_history(
    pool: &MySqlPool,
    tenant_id: u64,
    punch_id: u64,
) -> Result<Vec<CorrectionEntry>, EngineError> {
    let entries = sqlx::query_as::<_, CorrectionEntry>(
        "SELECT * FROM punch_corrections \
         WHERE tenant_id = ? AND punch_id = ? \
         ORDER BY created_at ASC, id ASC",
    )
    .bind(tenant_id)
    .bind(punch_id)
    .fetch_all(pool)
    .await?;
    Ok(entries)
}

/// Re-derive metrics for a day the punch left (or returned from) after a
/// cross-day timestamp move. Best-effort; the day it landed on is already
/// recomputed through the main path.
async fn recompute_moved_day(
    pool: &MySqlPool,
    punch: &PunchEvent,
    day: NaiveDate,
    day_complete: bool,
) {
    let remaining = match fetch_day_punches(pool, punch.tenant_id, punch.employee_id, day).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, punch_id = punch.id, %day, "Failed to reload moved day");
            return;
        }
    };
    let Some(last) = remaining.last() else { return };
    if let Err(e) = recompute_day(
        pool,
        punch.tenant_id,
        punch.employee_id,
        day,
        last.id,
        day_complete,
    )
    .await
    {
        tracing::error!(error = %e, punch_id = punch.id, %day, "Failed to recompute moved day");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 8, 20)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn approved_records_are_frozen() {
        assert!(correction_allowed(None));
        assert!(correction_allowed(Some(ApprovalStatus::Rejected)));
        assert!(correction_allowed(Some(ApprovalStatus::Pending)));
        assert!(!correction_allowed(Some(ApprovalStatus::Approved)));
    }

    #[test]
    fn only_pending_corrections_accept_a_decision() {
        assert!(decision_allowed(Some(ApprovalStatus::Pending)));
        assert!(!decision_allowed(None));
        assert!(!decision_allowed(Some(ApprovalStatus::Approved)));
        assert!(!decision_allowed(Some(ApprovalStatus::Rejected)));
    }

    #[test]
    fn rejection_restores_the_original_values_exactly() {
        // Raw record corrected, then the correction is rejected: the
        // snapshot taken on entry must round-trip unchanged.
        let original = (PunchType::In, ts(8, 0));
        let snap = snapshot_for(None, (None, None), original);
        assert_eq!(snap, (Some(PunchType::In), Some(ts(8, 0))));

        let corrected = (PunchType::Out, ts(17, 30));
        let restored = restore_target(snap, corrected);
        assert_eq!(restored, original);
    }

    #[test]
    fn overwriting_a_pending_correction_keeps_the_first_snapshot() {
        // First correction snapshotted (IN, 08:00). A second correction
        // while still pending must not re-snapshot the intermediate edit.
        let first_snap = (Some(PunchType::In), Some(ts(8, 0)));
        let intermediate = (PunchType::Out, ts(16, 0));
        let snap = snapshot_for(Some(ApprovalStatus::Pending), first_snap, intermediate);
        assert_eq!(snap, first_snap);

        let restored = restore_target(snap, (PunchType::Out, ts(18, 0)));
        assert_eq!(restored, (PunchType::In, ts(8, 0)));
    }

    #[test]
    fn rejected_corrections_resnapshot_on_reentry() {
        // After a rejection the snapshot was cleared; a new correction
        // snapshots the restored values, not the old pending edit.
        let snap = snapshot_for(
            Some(ApprovalStatus::Rejected),
            (None, None),
            (PunchType::In, ts(9, 0)),
        );
        assert_eq!(snap, (Some(PunchType::In), Some(ts(9, 0))));
    }

    #[test]
    fn large_timestamp_shift_requires_approval() {
        assert!(!requires_approval(120, None, &[]));
        assert!(requires_approval(121, None, &[]));
        assert!(requires_approval(600, None, &[]));
    }

    #[test]
    fn approval_set_anomaly_requires_approval() {
        let set = [AnomalyType::Absence, AnomalyType::MissingOut];
        assert!(requires_approval(5, Some(AnomalyType::MissingOut), &set));
        assert!(!requires_approval(5, Some(AnomalyType::Late), &set));
        assert!(!requires_approval(5, None, &set));
    }

    #[test]
    fn same_day_corrections_leave_the_day_open() {
        let today = NaiveDate::from_ymd_opt(2026, 8, 20).unwrap();
        assert!(!day_closed(today, today));
        assert!(day_closed(today.pred_opt().unwrap(), today));
        assert!(!day_closed(today.succ_opt().unwrap(), today));
    }
}
