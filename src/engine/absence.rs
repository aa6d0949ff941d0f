use crate::collab::{directory, leave};
use crate::error::EngineError;
use crate::model::settings::{TenantSettings, load_settings};
use crate::model::shift::ShiftAssignment;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use sqlx::MySqlPool;

#[derive(Debug, Clone, Default, Serialize)]
pub struct AbsenceSummary {
    pub days_scanned: usize,
    pub absences_created: usize,
    pub technical_absences_created: usize,
}

/// Synthesize ABSENCE records for every tenant over the given date range
/// (inclusive). Normally invoked by the daily scheduler for yesterday;
/// callable over a wider range for backfills.
pub async fn run_absence_detection(
    pool: &MySqlPool,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<AbsenceSummary, EngineError> {
    if from > to {
        return Err(EngineError::Validation("empty date range".into()));
    }

    let tenants = directory::all_tenants(pool).await?;
    let mut summary = AbsenceSummary::default();

    for tenant_id in tenants {
        let mut day = from;
        while day <= to {
            summary.days_scanned += 1;
            match detect_tenant_day(pool, tenant_id, day, &mut summary).await {
                Ok(()) => {}
                Err(e) => {
                    // Per-tenant-day isolation; one failure does not stop
                    // the sweep.
                    tracing::error!(error = %e, tenant_id, %day, "Absence detection failed for day");
                }
            }
            day = day.succ_opt().ok_or_else(|| {
                EngineError::Validation("date range exceeds calendar".into())
            })?;
        }
    }

    tracing::info!(
        days_scanned = summary.days_scanned,
        absences_created = summary.absences_created,
        technical = summary.technical_absences_created,
        "Absence detection finished"
    );
    Ok(summary)
}

async fn detect_tenant_day(
    pool: &MySqlPool,
    tenant_id: u64,
    day: NaiveDate,
    summary: &mut AbsenceSummary,
) -> Result<(), EngineError> {
    if !claim_day(pool, tenant_id, day).await? {
        tracing::debug!(tenant_id, %day, "Absence window already claimed");
        return Ok(());
    }

    let settings = load_settings(pool, tenant_id).await;

    // A published schedule entry is an explicit expectation of presence,
    // working day or not. The default-shift fallback applies only on the
    // tenant's working days.
    let mut expected = directory::published_schedules(pool, tenant_id, day).await?;
    if settings.is_working_day(day) {
        expected.extend(
            directory::default_shift_employees_without_schedule(pool, tenant_id, day).await?,
        );
    }

    for shift in &expected {
        match synthesize_if_absent(pool, &settings, shift, day).await {
            Ok(true) => summary.absences_created += 1,
            Ok(false) => {}
            Err(e) => {
                tracing::error!(
                    error = %e,
                    tenant_id,
                    employee_id = shift.employee_id,
                    %day,
                    "Absence synthesis failed for employee"
                );
            }
        }
    }

    summary.technical_absences_created +=
        technical_absence_pass(pool, tenant_id, day).await?;

    Ok(())
}

/// Create one synthetic ABSENCE at the expected start time, unless a guard
/// proves presence (or an excuse) for the day.
async fn synthesize_if_absent(
    pool: &MySqlPool,
    settings: &TenantSettings,
    shift: &ShiftAssignment,
    day: NaiveDate,
) -> Result<bool, EngineError> {
    let tenant_id = shift.tenant_id;
    let employee_id = shift.employee_id;

    if has_generated_absence(pool, tenant_id, employee_id, day).await? {
        return Ok(false);
    }
    if leave::has_approved_leave(pool, tenant_id, employee_id, day).await? {
        return Ok(false);
    }

    let start_minutes = shift.start_minutes();
    let expected_start = day.and_time(
        NaiveTime::from_num_seconds_from_midnight_opt(start_minutes * 60, 0)
            .unwrap_or(NaiveTime::MIN),
    );

    // Any real punch that day, or one within the tolerance window around the
    // expected start (which may cross the day boundary), proves presence.
    let tolerance = Duration::minutes(settings.absence_tolerance_minutes as i64);
    if has_real_punch(
        pool,
        tenant_id,
        employee_id,
        day,
        expected_start - tolerance,
        expected_start + tolerance,
    )
    .await?
    {
        return Ok(false);
    }

    insert_synthetic(pool, shift, expected_start, "ABSENCE", "full-day absence").await?;

    tracing::info!(
        tenant_id,
        employee_id,
        %day,
        shift = %shift.shift_name,
        "Synthetic absence created"
    );
    Ok(true)
}

/// Employees whose only trace for the day is FAILED capture attempts (a
/// broken reader, an unenrolled fingerprint) get a technical absence so the
/// day still surfaces for review.
async fn technical_absence_pass(
    pool: &MySqlPool,
    tenant_id: u64,
    day: NaiveDate,
) -> Result<usize, EngineError> {
    let day_start = day.and_time(NaiveTime::MIN);
    let day_end = day_start + Duration::days(1);

    let employee_ids: Vec<u64> = sqlx::query_scalar(
        "SELECT DISTINCT pa.employee_id FROM punch_attempts pa \
         WHERE pa.tenant_id = ? AND pa.employee_id IS NOT NULL \
           AND pa.timestamp >= ? AND pa.timestamp < ? \
           AND pa.status = 'FAILED' \
           AND NOT EXISTS ( \
               SELECT 1 FROM punch_attempts ok \
               WHERE ok.tenant_id = pa.tenant_id AND ok.employee_id = pa.employee_id \
                 AND ok.timestamp >= ? AND ok.timestamp < ? AND ok.status = 'SUCCESS' \
           )",
    )
    .bind(tenant_id)
    .bind(day_start)
    .bind(day_end)
    .bind(day_start)
    .bind(day_end)
    .fetch_all(pool)
    .await?;

    let mut created = 0;
    for employee_id in employee_ids {
        let result = async {
            if has_generated_absence(pool, tenant_id, employee_id, day).await?
                || leave::has_approved_leave(pool, tenant_id, employee_id, day).await?
                || has_real_punch(pool, tenant_id, employee_id, day, day_start, day_start).await?
            {
                return Ok::<bool, EngineError>(false);
            }

            // Anchor at the shift start when one is assigned, otherwise at
            // the first failed attempt.
            let shift = directory::effective_shift(pool, tenant_id, employee_id, day).await?;
            let anchor = match &shift {
                Some(s) => day.and_time(
                    NaiveTime::from_num_seconds_from_midnight_opt(s.start_minutes() * 60, 0)
                        .unwrap_or(NaiveTime::MIN),
                ),
                None => first_failed_attempt(pool, tenant_id, employee_id, day_start, day_end)
                    .await?
                    .unwrap_or(day_start),
            };

            let placeholder = shift.unwrap_or(ShiftAssignment {
                tenant_id,
                employee_id,
                shift_name: String::new(),
                start_time: String::new(),
                end_time: String::new(),
                break_minutes: 0,
            });
            insert_synthetic(
                pool,
                &placeholder,
                anchor,
                "ABSENCE_TECHNICAL",
                "only failed capture attempts recorded",
            )
            .await?;
            Ok(true)
        }
        .await;

        match result {
            Ok(true) => {
                created += 1;
                tracing::info!(tenant_id, employee_id, %day, "Technical absence created");
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(error = %e, tenant_id, employee_id, %day, "Technical absence pass failed for employee");
            }
        }
    }

    Ok(created)
}

async fn has_generated_absence(
    pool: &MySqlPool,
    tenant_id: u64,
    employee_id: u64,
    day: NaiveDate,
) -> Result<bool, sqlx::Error> {
    let day_start = day.and_time(NaiveTime::MIN);
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM punches \
         WHERE tenant_id = ? AND employee_id = ? AND is_generated = 1 \
           AND timestamp >= ? AND timestamp < ? \
         LIMIT 1",
    )
    .bind(tenant_id)
    .bind(employee_id)
    .bind(day_start)
    .bind(day_start + Duration::days(1))
    .fetch_optional(pool)
    .await?;
    Ok(found.is_some())
}

/// True when a real (non-generated) punch exists within the day, or inside
/// the extra `[window_from, window_to]` span around the expected start.
async fn has_real_punch(
    pool: &MySqlPool,
    tenant_id: u64,
    employee_id: u64,
    day: NaiveDate,
    window_from: NaiveDateTime,
    window_to: NaiveDateTime,
) -> Result<bool, sqlx::Error> {
    let day_start = day.and_time(NaiveTime::MIN);
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM punches \
         WHERE tenant_id = ? AND employee_id = ? AND is_generated = 0 \
           AND ((timestamp >= ? AND timestamp < ?) OR (timestamp >= ? AND timestamp <= ?)) \
         LIMIT 1",
    )
    .bind(tenant_id)
    .bind(employee_id)
    .bind(day_start)
    .bind(day_start + Duration::days(1))
    .bind(window_from)
    .bind(window_to)
    .fetch_optional(pool)
    .await?;
    Ok(found.is_some())
}

async fn first_failed_attempt(
    pool: &MySqlPool,
    tenant_id: u64,
    employee_id: u64,
    from: NaiveDateTime,
    to: NaiveDateTime,
) -> Result<Option<NaiveDateTime>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT MIN(timestamp) FROM punch_attempts \
         WHERE tenant_id = ? AND employee_id = ? AND status = 'FAILED' \
           AND timestamp >= ? AND timestamp < ?",
    )
    .bind(tenant_id)
    .bind(employee_id)
    .bind(from)
    .bind(to)
    .fetch_one(pool)
    .await
}

async fn insert_synthetic(
    pool: &MySqlPool,
    shift: &ShiftAssignment,
    timestamp: NaiveDateTime,
    anomaly: &str,
    note: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO punches \
             (tenant_id, employee_id, timestamp, punch_type, method, \
              has_anomaly, anomaly_type, anomaly_note, is_generated, generated_by) \
         VALUES (?, ?, ?, 'IN', 'MANUAL', 1, ?, ?, 1, 'ABSENCE_DETECTION')",
    )
    .bind(shift.tenant_id)
    .bind(shift.employee_id)
    .bind(timestamp)
    .bind(anomaly)
    .bind(note)
    .execute(pool)
    .await?;
    Ok(())
}

async fn claim_day(pool: &MySqlPool, tenant_id: u64, day: NaiveDate) -> Result<bool, sqlx::Error> {
    let claimed = sqlx::query(
        "INSERT IGNORE INTO job_claims (job_name, tenant_id, window_key, claim_id) \
         VALUES ('absence', ?, ?, ?)",
    )
    .bind(tenant_id)
    .bind(day.to_string())
    .bind(uuid::Uuid::new_v4().to_string())
    .execute(pool)
    .await?;
    Ok(claimed.rows_affected() == 1)
}
