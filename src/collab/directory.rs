use crate::error::EngineError;
use crate::model::shift::ShiftAssignment;
use chrono::NaiveDate;
use moka::future::Cache;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, MySqlPool};
use std::time::Duration;

/// What the Organization Directory resolves a terminal identifier to.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EmployeeRef {
    pub id: u64,
    pub tenant_id: u64,
    pub matricule: String,
    pub active: bool,
    pub manager_id: Option<u64>,
}

static EMPLOYEE_CACHE: Lazy<Cache<String, EmployeeRef>> = Lazy::new(|| {
    Cache::builder()
        .max_capacity(100_000)
        .time_to_live(Duration::from_secs(300))
        .build()
});

static SHIFT_CACHE: Lazy<Cache<(u64, u64), Option<ShiftAssignment>>> = Lazy::new(|| {
    Cache::builder()
        .max_capacity(100_000)
        .time_to_live(Duration::from_secs(300))
        .build()
});

/// Directory lookups are a collaborator; their failures are dependency
/// errors, not store errors of this engine.
fn dep(context: &'static str) -> impl FnOnce(sqlx::Error) -> EngineError {
    move |e| EngineError::Dependency(format!("{}: {}", context, e))
}

/// Resolve a terminal-supplied identifier (matricule, possibly with leading
/// zeros truncated by the device) to an employee. Tries, in order: numeric
/// internal id, exact matricule, matricule modulo leading zeros.
pub async fn resolve_employee(
    pool: &MySqlPool,
    tenant_id: u64,
    identifier: &str,
) -> Result<EmployeeRef, EngineError> {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return Err(EngineError::Validation("empty employee identifier".into()));
    }

    let cache_key = format!("{}:{}", tenant_id, identifier);
    if let Some(hit) = EMPLOYEE_CACHE.get(&cache_key).await {
        return Ok(hit);
    }

    let mut found: Option<EmployeeRef> = None;

    if let Ok(id) = identifier.parse::<u64>() {
        found = sqlx::query_as::<_, EmployeeRef>(
            "SELECT id, tenant_id, matricule, active, manager_id FROM employees \
             WHERE tenant_id = ? AND id = ?",
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(dep("employee lookup by id"))?;
    }

    if found.is_none() {
        found = sqlx::query_as::<_, EmployeeRef>(
            "SELECT id, tenant_id, matricule, active, manager_id FROM employees \
             WHERE tenant_id = ? AND matricule = ?",
        )
        .bind(tenant_id)
        .bind(identifier)
        .fetch_optional(pool)
        .await
        .map_err(dep("employee lookup by matricule"))?;
    }

    if found.is_none() {
        // Terminals truncate leading zeros in the field; compare with both
        // sides stripped.
        let stripped = identifier.trim_start_matches('0');
        if !stripped.is_empty() {
            found = sqlx::query_as::<_, EmployeeRef>(
                "SELECT id, tenant_id, matricule, active, manager_id FROM employees \
                 WHERE tenant_id = ? AND TRIM(LEADING '0' FROM matricule) = ?",
            )
            .bind(tenant_id)
            .bind(stripped)
            .fetch_optional(pool)
            .await
            .map_err(dep("employee lookup by stripped matricule"))?;
        }
    }

    match found {
        Some(emp) => {
            EMPLOYEE_CACHE.insert(cache_key, emp.clone()).await;
            Ok(emp)
        }
        None => Err(EngineError::NotFound(format!(
            "employee {} not found in tenant {}",
            identifier, tenant_id
        ))),
    }
}

/// Current default shift assignment for an employee, cached briefly for the
/// ingestion hot path.
pub async fn shift_for(
    pool: &MySqlPool,
    tenant_id: u64,
    employee_id: u64,
) -> Result<Option<ShiftAssignment>, EngineError> {
    if let Some(hit) = SHIFT_CACHE.get(&(tenant_id, employee_id)).await {
        return Ok(hit);
    }

    let shift = sqlx::query_as::<_, ShiftAssignment>(
        "SELECT tenant_id, employee_id, shift_name, start_time, end_time, break_minutes \
         FROM shift_assignments WHERE tenant_id = ? AND employee_id = ?",
    )
    .bind(tenant_id)
    .bind(employee_id)
    .fetch_optional(pool)
    .await
    .map_err(dep("shift assignment lookup"))?;

    SHIFT_CACHE
        .insert((tenant_id, employee_id), shift.clone())
        .await;
    Ok(shift)
}

/// A published schedule entry for a specific day overrides the default shift
/// assignment.
pub async fn schedule_for(
    pool: &MySqlPool,
    tenant_id: u64,
    employee_id: u64,
    date: NaiveDate,
) -> Result<Option<ShiftAssignment>, EngineError> {
    sqlx::query_as::<_, ShiftAssignment>(
        "SELECT tenant_id, employee_id, shift_name, start_time, end_time, break_minutes \
         FROM schedule_entries \
         WHERE tenant_id = ? AND employee_id = ? AND entry_date = ? AND status = 'PUBLISHED'",
    )
    .bind(tenant_id)
    .bind(employee_id)
    .bind(date)
    .fetch_optional(pool)
    .await
    .map_err(dep("schedule entry lookup"))
}

/// The effective shift for an employee-day: published schedule entry first,
/// default assignment as fallback.
pub async fn effective_shift(
    pool: &MySqlPool,
    tenant_id: u64,
    employee_id: u64,
    date: NaiveDate,
) -> Result<Option<ShiftAssignment>, EngineError> {
    if let Some(entry) = schedule_for(pool, tenant_id, employee_id, date).await? {
        return Ok(Some(entry));
    }
    shift_for(pool, tenant_id, employee_id).await
}

/// All published schedule entries for a tenant-day (absence synthesizer).
pub async fn published_schedules(
    pool: &MySqlPool,
    tenant_id: u64,
    date: NaiveDate,
) -> Result<Vec<ShiftAssignment>, EngineError> {
    sqlx::query_as::<_, ShiftAssignment>(
        "SELECT se.tenant_id, se.employee_id, se.shift_name, se.start_time, se.end_time, se.break_minutes \
         FROM schedule_entries se \
         JOIN employees e ON e.id = se.employee_id AND e.tenant_id = se.tenant_id \
         WHERE se.tenant_id = ? AND se.entry_date = ? AND se.status = 'PUBLISHED' AND e.active = 1",
    )
    .bind(tenant_id)
    .bind(date)
    .fetch_all(pool)
    .await
    .map_err(dep("published schedule scan"))
}

/// Active employees carrying a default shift assignment but no schedule
/// entry for the day (absence synthesizer fallback pass).
pub async fn default_shift_employees_without_schedule(
    pool: &MySqlPool,
    tenant_id: u64,
    date: NaiveDate,
) -> Result<Vec<ShiftAssignment>, EngineError> {
    sqlx::query_as::<_, ShiftAssignment>(
        "SELECT sa.tenant_id, sa.employee_id, sa.shift_name, sa.start_time, sa.end_time, sa.break_minutes \
         FROM shift_assignments sa \
         JOIN employees e ON e.id = sa.employee_id AND e.tenant_id = sa.tenant_id \
         WHERE sa.tenant_id = ? AND e.active = 1 \
           AND NOT EXISTS ( \
               SELECT 1 FROM schedule_entries se \
               WHERE se.tenant_id = sa.tenant_id AND se.employee_id = sa.employee_id \
                 AND se.entry_date = ? \
           )",
    )
    .bind(tenant_id)
    .bind(date)
    .fetch_all(pool)
    .await
    .map_err(dep("default shift scan"))
}

/// The employee's manager, when one is assigned. Lookup failures are
/// logged and read as "no manager"; notification targeting degrades rather
/// than failing the transition.
pub async fn manager_of(pool: &MySqlPool, tenant_id: u64, employee_id: u64) -> Option<u64> {
    let result: Result<Option<Option<u64>>, _> =
        sqlx::query_scalar("SELECT manager_id FROM employees WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id)
            .bind(employee_id)
            .fetch_optional(pool)
            .await;
    match result {
        Ok(row) => row.flatten(),
        Err(e) => {
            tracing::warn!(error = %e, tenant_id, employee_id, "Manager lookup failed");
            None
        }
    }
}

/// All tenant ids known to the directory (scheduler fan-out).
pub async fn all_tenants(pool: &MySqlPool) -> Result<Vec<u64>, EngineError> {
    sqlx::query_scalar::<_, u64>("SELECT id FROM tenants ORDER BY id")
        .fetch_all(pool)
        .await
        .map_err(dep("tenant scan"))
}
