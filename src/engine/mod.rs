pub mod absence;
pub mod correction;
pub mod escalation;
pub mod ingest;
pub mod validation;

use crate::collab::{directory, leave};
use crate::db;
use crate::error::EngineError;
use crate::metrics::{DayContext, DayMetrics, evaluate_day};
use crate::model::punch::PunchEvent;
use crate::model::settings::load_settings;
use chrono::NaiveDate;
use sqlx::MySqlPool;

pub(crate) async fn fetch_punch(pool: &MySqlPool, id: u64) -> Result<PunchEvent, EngineError> {
    sqlx::query_as::<_, PunchEvent>("SELECT * FROM punches WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("punch {} not found", id)))
}

pub(crate) async fn fetch_day_punches(
    pool: &MySqlPool,
    tenant_id: u64,
    employee_id: u64,
    day: NaiveDate,
) -> Result<Vec<PunchEvent>, sqlx::Error> {
    sqlx::query_as::<_, PunchEvent>(
        "SELECT * FROM punches \
         WHERE tenant_id = ? AND employee_id = ? \
           AND timestamp >= ? AND timestamp < ? \
         ORDER BY timestamp ASC",
    )
    .bind(tenant_id)
    .bind(employee_id)
    .bind(day.and_time(chrono::NaiveTime::MIN))
    .bind(day.and_time(chrono::NaiveTime::MIN) + chrono::Duration::days(1))
    .fetch_all(pool)
    .await
}

/// Re-derive the day's metrics and write them onto `record_id`, serialized
/// per (tenant, employee, day) against concurrent corrections of the same
/// day.
pub(crate) async fn recompute_day(
    pool: &MySqlPool,
    tenant_id: u64,
    employee_id: u64,
    day: NaiveDate,
    record_id: u64,
    day_complete: bool,
) -> Result<DayMetrics, EngineError> {
    let lock = db::lock_day(pool, tenant_id, employee_id, day).await?;

    let result = async {
        let punches = fetch_day_punches(pool, tenant_id, employee_id, day).await?;
        let shift = directory::effective_shift(pool, tenant_id, employee_id, day).await?;
        let on_leave = leave::has_approved_leave(pool, tenant_id, employee_id, day).await?;
        let settings = load_settings(pool, tenant_id).await;

        let metrics = evaluate_day(&DayContext {
            punches: &punches,
            shift: shift.as_ref(),
            settings: &settings,
            on_approved_leave: on_leave,
            day_complete,
        });

        sqlx::query(
            "UPDATE punches SET \
                 has_anomaly = ?, anomaly_type = ?, anomaly_note = ?, \
                 hours_worked = ?, late_minutes = ?, early_leave_minutes = ?, \
                 overtime_minutes = ?, needs_approval = ? \
             WHERE id = ?",
        )
        .bind(metrics.anomaly.is_some())
        .bind(metrics.anomaly.as_ref().map(|(k, _)| *k))
        .bind(metrics.anomaly.as_ref().map(|(_, n)| n.clone()))
        .bind(metrics.hours_worked)
        .bind(metrics.late_minutes)
        .bind(metrics.early_leave_minutes)
        .bind(metrics.overtime_minutes)
        .bind(metrics.needs_approval)
        .bind(record_id)
        .execute(pool)
        .await?;

        Ok::<_, EngineError>(metrics)
    }
    .await;

    lock.release().await;
    result
}
