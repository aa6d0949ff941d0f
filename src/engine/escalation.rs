use crate::collab::directory;
use crate::collab::notify::{self, NotificationKind, Recipient};
use crate::error::EngineError;
use crate::model::punch::PunchEvent;
use crate::model::settings::load_settings;
use chrono::{NaiveDateTime, Timelike};
use serde::Serialize;
use serde_json::json;
use sqlx::MySqlPool;

#[derive(Debug, Clone, Serialize)]
pub struct EscalationRecord {
    pub punch_id: u64,
    pub tenant_id: u64,
    pub employee_id: u64,
    pub from_level: u8,
    pub to_level: u8,
    pub age_hours: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EscalationSummary {
    pub processed: usize,
    pub escalated: usize,
    pub escalations: Vec<EscalationRecord>,
}

/// Escalation level a pending punch of the given age should sit at.
/// Thresholds are the per-tenant level 1/2/3 hour marks.
pub fn target_level(age_hours: i64, thresholds: [i64; 3]) -> u8 {
    if age_hours >= thresholds[2] {
        3
    } else if age_hours >= thresholds[1] {
        2
    } else if age_hours >= thresholds[0] {
        1
    } else {
        0
    }
}

/// The bump a scan should apply, if any. The level only ever increases, so
/// a record already at (or past) its target is left alone and produces no
/// notification.
pub fn should_escalate(current_level: u8, age_hours: i64, thresholds: [i64; 3]) -> Option<u8> {
    let target = target_level(age_hours, thresholds);
    (target > current_level).then_some(target)
}

/// Scan pending validations and bump escalation levels. With `tenant_id`
/// set the pass covers that tenant only; otherwise every tenant in the
/// directory. `force` skips the per-tenant check-hour gate and the daily
/// claim (the on-demand path); the level guard still makes double runs
/// harmless.
pub async fn run_escalation_pass(
    pool: &MySqlPool,
    tenant_id: Option<u64>,
    now: NaiveDateTime,
    force: bool,
) -> Result<EscalationSummary, EngineError> {
    let tenants = match tenant_id {
        Some(id) => vec![id],
        None => directory::all_tenants(pool).await?,
    };

    let mut summary = EscalationSummary::default();

    for tenant in tenants {
        // One broken tenant never blocks the others.
        match escalate_tenant(pool, tenant, now, force, &mut summary).await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!(error = %e, tenant_id = tenant, "Escalation pass failed for tenant");
            }
        }
    }

    tracing::info!(
        processed = summary.processed,
        escalated = summary.escalated,
        forced = force,
        "Escalation pass finished"
    );
    Ok(summary)
}

async fn escalate_tenant(
    pool: &MySqlPool,
    tenant_id: u64,
    now: NaiveDateTime,
    force: bool,
    summary: &mut EscalationSummary,
) -> Result<(), EngineError> {
    let settings = load_settings(pool, tenant_id).await;
    if !settings.escalation_enabled {
        return Ok(());
    }

    if !force {
        if now.hour() as i32 != settings.escalation_check_hour {
            return Ok(());
        }
        if !claim_window(pool, tenant_id, now).await? {
            tracing::debug!(tenant_id, "Escalation window already claimed");
            return Ok(());
        }
    }

    let thresholds = settings.escalation_thresholds();

    let pending = sqlx::query_as::<_, PunchEvent>(
        "SELECT * FROM punches \
         WHERE tenant_id = ? AND validation_status = 'PENDING_VALIDATION' \
           AND escalation_level < 3 \
         ORDER BY created_at ASC",
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await?;

    for punch in pending {
        summary.processed += 1;

        let age_hours = (now - punch.created_at).num_hours();
        let Some(target) = should_escalate(punch.escalation_level, age_hours, thresholds) else {
            continue;
        };

        // Guarded on the current level so two concurrent passes produce one
        // bump and one notification.
        let bumped = sqlx::query(
            "UPDATE punches SET escalation_level = ?, escalated_at = ? \
             WHERE id = ? AND escalation_level < ? \
               AND validation_status = 'PENDING_VALIDATION'",
        )
        .bind(target)
        .bind(now)
        .bind(punch.id)
        .bind(target)
        .execute(pool)
        .await?;

        if bumped.rows_affected() == 0 {
            continue;
        }

        summary.escalated += 1;
        summary.escalations.push(EscalationRecord {
            punch_id: punch.id,
            tenant_id,
            employee_id: punch.employee_id,
            from_level: punch.escalation_level,
            to_level: target,
            age_hours,
        });

        notify_escalation(pool, &settings, &punch, target, age_hours).await;

        tracing::info!(
            punch_id = punch.id,
            tenant_id,
            employee_id = punch.employee_id,
            from_level = punch.escalation_level,
            to_level = target,
            age_hours,
            "Pending validation escalated"
        );
    }

    Ok(())
}

/// Claim the tenant's daily escalation window; false means another instance
/// already ran it.
async fn claim_window(
    pool: &MySqlPool,
    tenant_id: u64,
    now: NaiveDateTime,
) -> Result<bool, sqlx::Error> {
    let window_key = now.date().to_string();
    let claimed = sqlx::query(
        "INSERT IGNORE INTO job_claims (job_name, tenant_id, window_key, claim_id) \
         VALUES ('escalation', ?, ?, ?)",
    )
    .bind(tenant_id)
    .bind(window_key)
    .bind(uuid::Uuid::new_v4().to_string())
    .execute(pool)
    .await?;
    Ok(claimed.rows_affected() == 1)
}

async fn notify_escalation(
    pool: &MySqlPool,
    settings: &crate::model::settings::TenantSettings,
    punch: &PunchEvent,
    level: u8,
    age_hours: i64,
) {
    let payload = |urgent: bool| {
        json!({
            "punch_id": punch.id,
            "employee_id": punch.employee_id,
            "timestamp": punch.timestamp,
            "ambiguity_reason": punch.ambiguity_reason,
            "escalation_level": level,
            "age_hours": age_hours,
            "urgent": urgent,
        })
    };

    let manager = directory::manager_of(pool, punch.tenant_id, punch.employee_id).await;

    match level {
        1 => {
            if settings.notify_manager {
                if let Some(manager_id) = manager {
                    notify::send(
                        pool,
                        punch.tenant_id,
                        Recipient::Manager(manager_id),
                        NotificationKind::ValidationEscalated,
                        payload(false),
                    )
                    .await;
                }
            }
        }
        2 => {
            if settings.notify_hr {
                notify::send(
                    pool,
                    punch.tenant_id,
                    Recipient::Hr,
                    NotificationKind::ValidationEscalated,
                    payload(false),
                )
                .await;
            }
        }
        _ => {
            if settings.notify_manager {
                if let Some(manager_id) = manager {
                    notify::send(
                        pool,
                        punch.tenant_id,
                        Recipient::Manager(manager_id),
                        NotificationKind::ValidationEscalated,
                        payload(true),
                    )
                    .await;
                }
            }
            if settings.notify_hr {
                notify::send(
                    pool,
                    punch.tenant_id,
                    Recipient::Hr,
                    NotificationKind::ValidationEscalated,
                    payload(true),
                )
                .await;
            }
            if settings.notify_employee {
                notify::send(
                    pool,
                    punch.tenant_id,
                    Recipient::Employee(punch.employee_id),
                    NotificationKind::ValidationEscalated,
                    payload(true),
                )
                .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLDS: [i64; 3] = [24, 48, 72];

    #[test]
    fn below_first_threshold_stays_level_zero() {
        assert_eq!(target_level(0, THRESHOLDS), 0);
        assert_eq!(target_level(23, THRESHOLDS), 0);
    }

    #[test]
    fn threshold_boundaries_map_to_levels() {
        assert_eq!(target_level(24, THRESHOLDS), 1);
        assert_eq!(target_level(25, THRESHOLDS), 1);
        assert_eq!(target_level(47, THRESHOLDS), 1);
        assert_eq!(target_level(48, THRESHOLDS), 2);
        assert_eq!(target_level(71, THRESHOLDS), 2);
        assert_eq!(target_level(72, THRESHOLDS), 3);
        assert_eq!(target_level(1000, THRESHOLDS), 3);
    }

    #[test]
    fn rescan_at_same_level_is_a_no_op() {
        // A record created at T and scanned at T+25h bumps to level 1
        // exactly once; the T+26h scan sees level 1 and applies nothing.
        let mut level: u8 = 0;
        let first = should_escalate(level, 25, THRESHOLDS);
        assert_eq!(first, Some(1));
        level = first.unwrap();

        assert_eq!(should_escalate(level, 26, THRESHOLDS), None);
        // Only crossing the next threshold bumps again.
        assert_eq!(should_escalate(level, 48, THRESHOLDS), Some(2));
    }

    #[test]
    fn double_scan_of_one_window_applies_one_bump() {
        // Two instances scanning the same window: the second sees the
        // already-bumped level and stays silent.
        let mut level: u8 = 0;
        for _ in 0..2 {
            if let Some(target) = should_escalate(level, 49, THRESHOLDS) {
                level = target;
            }
        }
        assert_eq!(level, 2);
        assert_eq!(should_escalate(level, 49, THRESHOLDS), None);
    }

    #[test]
    fn level_never_decreases() {
        assert_eq!(should_escalate(3, 10, THRESHOLDS), None);
        assert_eq!(should_escalate(2, 24, THRESHOLDS), None);
    }

    #[test]
    fn custom_thresholds() {
        assert_eq!(target_level(5, [4, 8, 12]), 1);
        assert_eq!(target_level(9, [4, 8, 12]), 2);
        assert_eq!(target_level(12, [4, 8, 12]), 3);
    }
}
