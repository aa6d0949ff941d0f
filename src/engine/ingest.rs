use crate::classify::{Classification, classify, detect_ambiguity};
use crate::collab::directory;
use crate::collab::notify::{self, NotificationKind, Recipient};
use crate::engine::{fetch_day_punches, recompute_day};
use crate::error::EngineError;
use crate::model::punch::{PunchMethod, PunchType, ValidationStatus};
use crate::model::settings::load_settings;
use chrono::NaiveDateTime;
use moka::future::Cache;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::MySqlPool;
use std::time::Duration;

/// One punch delivery from a terminal (or manual entry through the HTTP
/// layer). `explicit_type` is set when the terminal itself declared the
/// channel; the classifier is bypassed entirely in that case.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub tenant_id: u64,
    pub device_id: Option<String>,
    pub employee_identifier: String,
    pub timestamp: NaiveDateTime,
    pub explicit_type: Option<PunchType>,
    pub method: Option<PunchMethod>,
    pub raw_payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestOutcome {
    Created {
        record_id: u64,
        punch_type: PunchType,
        classification: Option<Classification>,
        pending_validation: bool,
    },
    Duplicate {
        existing_id: u64,
    },
    DebounceBlocked,
}

// In-process fast path of the debounce guard: last accepted punch per
// (tenant, employee). The authoritative check is the conditional insert.
static DEBOUNCE_GUARD: Lazy<Cache<(u64, u64), NaiveDateTime>> = Lazy::new(|| {
    Cache::builder()
        .max_capacity(500_000)
        .time_to_live(Duration::from_secs(180))
        .build()
});

/// True when `ts` falls inside the debounce window around the last accepted
/// punch.
fn within_debounce(last: NaiveDateTime, ts: NaiveDateTime, window_secs: i32) -> bool {
    (ts - last).num_seconds().abs() <= window_secs as i64
}

async fn log_attempt(
    pool: &MySqlPool,
    req: &IngestRequest,
    employee_id: Option<u64>,
    status: &str,
    error_code: Option<&str>,
) -> Option<u64> {
    let result = sqlx::query(
        "INSERT INTO punch_attempts \
             (tenant_id, employee_identifier, employee_id, device_id, timestamp, status, error_code) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(req.tenant_id)
    .bind(&req.employee_identifier)
    .bind(employee_id)
    .bind(&req.device_id)
    .bind(req.timestamp)
    .bind(status)
    .bind(error_code)
    .execute(pool)
    .await;

    match result {
        Ok(r) => Some(r.last_insert_id()),
        Err(e) => {
            // The attempt log must never block the punch itself.
            tracing::warn!(error = %e, tenant_id = req.tenant_id, "Failed to log punch attempt");
            None
        }
    }
}

async fn fail_attempt(pool: &MySqlPool, attempt_id: Option<u64>, code: &str) {
    let Some(id) = attempt_id else { return };
    if let Err(e) = sqlx::query("UPDATE punch_attempts SET status = 'FAILED', error_code = ? WHERE id = ?")
        .bind(code)
        .bind(id)
        .execute(pool)
        .await
    {
        tracing::warn!(error = %e, attempt_id = id, "Failed to update punch attempt");
    }
}

/// Ingest one punch: debounce, classify (unless the terminal declared the
/// type), persist, derive day metrics, and fan out best-effort
/// notifications. Safe under concurrent deliveries for the same employee;
/// the existence check and insert are a single conditional statement.
pub async fn ingest_punch(
    pool: &MySqlPool,
    req: IngestRequest,
) -> Result<IngestOutcome, EngineError> {
    if req.employee_identifier.trim().is_empty() {
        return Err(EngineError::Validation("missing employee identifier".into()));
    }

    let employee =
        match directory::resolve_employee(pool, req.tenant_id, &req.employee_identifier).await {
            Ok(emp) => emp,
            Err(e) => {
                log_attempt(pool, &req, None, "FAILED", Some("EMPLOYEE_NOT_FOUND")).await;
                return Err(e);
            }
        };

    // Logged with the resolved employee so later failures (and the
    // technical-absence pass that scans them) stay attributable.
    let attempt_id = log_attempt(pool, &req, Some(employee.id), "SUCCESS", None).await;

    let settings = load_settings(pool, req.tenant_id).await;
    let day = req.timestamp.date();

    // Fast in-process debounce before touching the punches table.
    let guard_key = (req.tenant_id, employee.id);
    if let Some(last) = DEBOUNCE_GUARD.get(&guard_key).await {
        if within_debounce(last, req.timestamp, settings.debounce_seconds) {
            fail_attempt(pool, attempt_id, "DEBOUNCE_BLOCKED").await;
            tracing::debug!(
                tenant_id = req.tenant_id,
                employee_id = employee.id,
                "Punch blocked by in-process debounce guard"
            );
            return Ok(IngestOutcome::DebounceBlocked);
        }
    }

    let today = fetch_day_punches(pool, req.tenant_id, employee.id, day).await?;
    let shift = directory::effective_shift(pool, req.tenant_id, employee.id, day).await?;

    // An explicit terminal-supplied type is authoritative; no deduction.
    let (punch_type, classification, ambiguity) = match req.explicit_type {
        Some(t) => (t, None, None),
        None => {
            let c = classify(&today, shift.as_ref(), req.timestamp);
            let ambiguity = detect_ambiguity(
                shift.as_ref(),
                req.timestamp,
                &c,
                settings.ambiguity_tolerance_minutes as u32,
            );
            (c.punch_type, Some(c), ambiguity)
        }
    };

    let record_id = match insert_guarded(
        pool,
        &req,
        employee.id,
        punch_type,
        ambiguity.as_deref(),
        settings.debounce_seconds,
    )
    .await
    {
        Ok(id) => id,
        Err(EngineError::Duplicate { existing_id }) => {
            fail_attempt(pool, attempt_id, "DUPLICATE").await;
            tracing::info!(
                tenant_id = req.tenant_id,
                employee_id = employee.id,
                existing_id,
                "Duplicate punch suppressed"
            );
            return Ok(IngestOutcome::Duplicate { existing_id });
        }
        Err(e) => {
            fail_attempt(pool, attempt_id, "STORE_ERROR").await;
            return Err(e);
        }
    };

    DEBOUNCE_GUARD.insert(guard_key, req.timestamp).await;

    let metrics =
        recompute_day(pool, req.tenant_id, employee.id, day, record_id, false).await?;

    // A genuine punch supersedes any synthetic absence the batch created for
    // the same day.
    supersede_synthetic_absence(pool, req.tenant_id, employee.id, day).await;

    if let Some((kind, ref note)) = metrics.anomaly {
        if settings.notify_manager && kind.priority() as i32 >= settings.manager_alert_priority {
            if let Some(manager_id) = employee.manager_id {
                notify::send(
                    pool,
                    req.tenant_id,
                    Recipient::Manager(manager_id),
                    NotificationKind::AttendanceAnomaly,
                    json!({
                        "employee_id": employee.id,
                        "matricule": employee.matricule,
                        "anomaly": kind.to_string(),
                        "note": note,
                        "punch_id": record_id,
                    }),
                )
                .await;
            }
        }
    }

    tracing::info!(
        tenant_id = req.tenant_id,
        employee_id = employee.id,
        record_id,
        %punch_type,
        pending_validation = ambiguity.is_some(),
        "Punch recorded"
    );

    Ok(IngestOutcome::Created {
        record_id,
        punch_type,
        classification,
        pending_validation: ambiguity.is_some(),
    })
}

/// Atomic check-and-insert. A punch already stored inside the debounce
/// window (rejected-validation ones do not count) blocks the insert and
/// surfaces as `Duplicate` carrying the id of the blocking record.
async fn insert_guarded(
    pool: &MySqlPool,
    req: &IngestRequest,
    employee_id: u64,
    punch_type: PunchType,
    ambiguity: Option<&str>,
    debounce_seconds: i32,
) -> Result<u64, EngineError> {
    let validation_status = ambiguity.map(|_| ValidationStatus::PendingValidation);
    let method = req.method.unwrap_or(PunchMethod::Manual);
    let raw = req.raw_payload.as_ref().map(|v| v.to_string());

    let inserted = sqlx::query(
        "INSERT INTO punches \
             (tenant_id, employee_id, device_id, timestamp, punch_type, method, raw_payload, \
              validation_status, ambiguity_reason) \
         SELECT ?, ?, ?, ?, ?, ?, ?, ?, ? FROM DUAL \
         WHERE NOT EXISTS ( \
             SELECT 1 FROM punches \
             WHERE tenant_id = ? AND employee_id = ? \
               AND ABS(TIMESTAMPDIFF(SECOND, timestamp, ?)) <= ? \
               AND (validation_status IS NULL OR validation_status <> 'REJECTED') \
         )",
    )
    .bind(req.tenant_id)
    .bind(employee_id)
    .bind(&req.device_id)
    .bind(req.timestamp)
    .bind(punch_type)
    .bind(method)
    .bind(raw)
    .bind(validation_status)
    .bind(ambiguity)
    .bind(req.tenant_id)
    .bind(employee_id)
    .bind(req.timestamp)
    .bind(debounce_seconds)
    .execute(pool)
    .await?;

    if inserted.rows_affected() > 0 {
        return Ok(inserted.last_insert_id());
    }

    let existing_id: u64 = sqlx::query_scalar(
        "SELECT id FROM punches \
         WHERE tenant_id = ? AND employee_id = ? \
           AND ABS(TIMESTAMPDIFF(SECOND, timestamp, ?)) <= ? \
           AND (validation_status IS NULL OR validation_status <> 'REJECTED') \
         ORDER BY ABS(TIMESTAMPDIFF(SECOND, timestamp, ?)) ASC \
         LIMIT 1",
    )
    .bind(req.tenant_id)
    .bind(employee_id)
    .bind(req.timestamp)
    .bind(debounce_seconds)
    .bind(req.timestamp)
    .fetch_one(pool)
    .await?;

    Err(EngineError::Duplicate { existing_id })
}

/// Delete generated ABSENCE records for a day once a real punch proves
/// presence. Leave-conflict checking still applies to the real punch.
async fn supersede_synthetic_absence(
    pool: &MySqlPool,
    tenant_id: u64,
    employee_id: u64,
    day: chrono::NaiveDate,
) {
    let result = sqlx::query(
        "DELETE FROM punches \
         WHERE tenant_id = ? AND employee_id = ? AND is_generated = 1 \
           AND anomaly_type = 'ABSENCE' \
           AND timestamp >= ? AND timestamp < ?",
    )
    .bind(tenant_id)
    .bind(employee_id)
    .bind(day.and_time(chrono::NaiveTime::MIN))
    .bind(day.and_time(chrono::NaiveTime::MIN) + chrono::Duration::days(1))
    .execute(pool)
    .await;

    match result {
        Ok(r) if r.rows_affected() > 0 => {
            tracing::info!(
                tenant_id,
                employee_id,
                %day,
                "Synthetic absence superseded by a real punch"
            );
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!(error = %e, tenant_id, employee_id, "Failed to supersede synthetic absence");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 8, 20)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn debounce_window_blocks_close_punches() {
        // Two scans 30 s apart with a 45 s window: the second is a repeat.
        assert!(within_debounce(at(8, 0, 0), at(8, 0, 30), 45));
        // The window is symmetric; out-of-order delivery still matches.
        assert!(within_debounce(at(8, 0, 30), at(8, 0, 0), 45));
        // Exactly at the boundary still counts as the same scan.
        assert!(within_debounce(at(8, 0, 0), at(8, 0, 45), 45));
    }

    #[test]
    fn debounce_window_passes_distinct_punches() {
        assert!(!within_debounce(at(8, 0, 0), at(8, 1, 0), 45));
        assert!(!within_debounce(at(8, 0, 0), at(12, 0, 0), 45));
    }
}
