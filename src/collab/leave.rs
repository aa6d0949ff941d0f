use crate::error::EngineError;
use chrono::NaiveDate;
use sqlx::MySqlPool;

/// Leave Registry contract: is the employee covered by an approved leave on
/// the given day? The leave module itself (requests, balances, approval
/// chain) lives outside this engine, so a failed lookup is a dependency
/// error.
pub async fn has_approved_leave(
    pool: &MySqlPool,
    tenant_id: u64,
    employee_id: u64,
    date: NaiveDate,
) -> Result<bool, EngineError> {
    let found: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT 1
        FROM approved_leaves
        WHERE tenant_id = ?
          AND employee_id = ?
          AND start_date <= ?
          AND end_date >= ?
        LIMIT 1
        "#,
    )
    .bind(tenant_id)
    .bind(employee_id)
    .bind(date)
    .bind(date)
    .fetch_optional(pool)
    .await
    .map_err(|e| EngineError::Dependency(format!("leave registry lookup: {}", e)))?;

    Ok(found.is_some())
}
