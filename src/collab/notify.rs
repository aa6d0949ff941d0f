use serde_json::json;
use sqlx::MySqlPool;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq,
    strum_macros::Display, strum_macros::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    AttendanceAnomaly,
    CorrectionApplied,
    ApprovalRequired,
    CorrectionApproved,
    CorrectionRejected,
    ValidationEscalated,
}

/// Who a notification is addressed to. Manager carries the manager's
/// employee id; HR is resolved by the delivery layer from the tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Employee(u64),
    Manager(u64),
    Hr,
}

/// Best-effort notification: persist a row for the delivery layer and log.
/// Failures are swallowed after logging; a notification must never roll back
/// or block the state transition it accompanies.
pub async fn send(
    pool: &MySqlPool,
    tenant_id: u64,
    recipient: Recipient,
    kind: NotificationKind,
    data: serde_json::Value,
) {
    let (recipient_kind, recipient_id) = match recipient {
        Recipient::Employee(id) => ("EMPLOYEE", Some(id)),
        Recipient::Manager(id) => ("MANAGER", Some(id)),
        Recipient::Hr => ("HR", None),
    };

    let payload = json!({ "kind": kind.to_string(), "data": data }).to_string();

    let result = sqlx::query(
        "INSERT INTO notifications (tenant_id, recipient_kind, recipient_id, kind, payload) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(tenant_id)
    .bind(recipient_kind)
    .bind(recipient_id)
    .bind(kind.to_string())
    .bind(payload)
    .execute(pool)
    .await;

    match result {
        Ok(_) => {
            tracing::debug!(tenant_id, %kind, ?recipient, "Notification queued");
        }
        Err(e) => {
            tracing::error!(error = %e, tenant_id, %kind, "Failed to queue notification");
        }
    }
}
