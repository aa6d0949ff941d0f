use crate::model::punch::AnomalyType;
use chrono::{Datelike, NaiveDate};
use moka::future::Cache;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, MySqlPool};
use std::str::FromStr;
use std::time::Duration;

/// Per-tenant configuration for the engine. Every knob has a default so a
/// tenant without a settings row behaves sensibly.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TenantSettings {
    pub tenant_id: u64,
    /// ISO weekday numbers, comma separated (1 = Monday .. 7 = Sunday).
    pub working_days: String,
    pub late_grace_minutes: i32,
    pub early_grace_minutes: i32,
    pub overtime_threshold_minutes: i32,
    /// Rounding step for overtime (15, 30 or 60); 0 disables rounding.
    pub overtime_rounding_minutes: i32,
    pub double_punch_window_minutes: i32,
    pub debounce_seconds: i32,
    pub absence_tolerance_minutes: i32,
    /// An IN later than this many hours past shift start is a partial
    /// absence rather than a plain LATE.
    pub absence_partial_threshold_hours: i32,
    pub ambiguity_tolerance_minutes: i32,
    pub escalation_enabled: bool,
    /// Hour of day (tenant local) at which the escalation pass runs.
    pub escalation_check_hour: i32,
    pub escalation_level1_hours: i32,
    pub escalation_level2_hours: i32,
    pub escalation_level3_hours: i32,
    pub notify_manager: bool,
    pub notify_hr: bool,
    pub notify_employee: bool,
    /// Anomaly types whose correction requires approval, comma separated.
    pub approval_required_anomalies: String,
    /// Minimum anomaly priority that alerts managers at correction time.
    pub manager_alert_priority: i32,
}

impl TenantSettings {
    pub fn defaults_for(tenant_id: u64) -> Self {
        TenantSettings {
            tenant_id,
            working_days: "1,2,3,4,5,6".into(),
            late_grace_minutes: 10,
            early_grace_minutes: 5,
            overtime_threshold_minutes: 15,
            overtime_rounding_minutes: 15,
            double_punch_window_minutes: 10,
            debounce_seconds: 45,
            absence_tolerance_minutes: 30,
            absence_partial_threshold_hours: 2,
            ambiguity_tolerance_minutes: 30,
            escalation_enabled: true,
            escalation_check_hour: 9,
            escalation_level1_hours: 24,
            escalation_level2_hours: 48,
            escalation_level3_hours: 72,
            notify_manager: true,
            notify_hr: true,
            notify_employee: false,
            approval_required_anomalies: "ABSENCE,ABSENCE_PARTIAL,MISSING_IN,MISSING_OUT".into(),
            manager_alert_priority: 6,
        }
    }

    pub fn is_working_day(&self, date: NaiveDate) -> bool {
        let iso = date.weekday().number_from_monday(); // 1..=7
        self.working_days
            .split(',')
            .filter_map(|d| d.trim().parse::<u32>().ok())
            .any(|d| d == iso)
    }

    pub fn approval_set(&self) -> Vec<AnomalyType> {
        self.approval_required_anomalies
            .split(',')
            .filter_map(|s| AnomalyType::from_str(s.trim()).ok())
            .collect()
    }

    pub fn escalation_thresholds(&self) -> [i64; 3] {
        [
            self.escalation_level1_hours as i64,
            self.escalation_level2_hours as i64,
            self.escalation_level3_hours as i64,
        ]
    }

    /// Round overtime minutes to the configured step (nearest).
    pub fn round_overtime(&self, minutes: i32) -> i32 {
        let step = self.overtime_rounding_minutes;
        if step <= 0 || minutes <= 0 {
            return minutes.max(0);
        }
        ((minutes as f64 / step as f64).round() as i32) * step
    }
}

static SETTINGS_CACHE: Lazy<Cache<u64, TenantSettings>> = Lazy::new(|| {
    Cache::builder()
        .max_capacity(10_000)
        .time_to_live(Duration::from_secs(300))
        .build()
});

/// Load a tenant's settings, caching for a few minutes. Missing rows fall
/// back to defaults so ingestion never stalls on configuration.
pub async fn load_settings(pool: &MySqlPool, tenant_id: u64) -> TenantSettings {
    if let Some(hit) = SETTINGS_CACHE.get(&tenant_id).await {
        return hit;
    }

    let loaded = sqlx::query_as::<_, TenantSettings>(
        r#"
        SELECT tenant_id, working_days, late_grace_minutes, early_grace_minutes,
               overtime_threshold_minutes, overtime_rounding_minutes,
               double_punch_window_minutes, debounce_seconds,
               absence_tolerance_minutes, absence_partial_threshold_hours,
               ambiguity_tolerance_minutes, escalation_enabled,
               escalation_check_hour, escalation_level1_hours,
               escalation_level2_hours, escalation_level3_hours,
               notify_manager, notify_hr, notify_employee,
               approval_required_anomalies, manager_alert_priority
        FROM tenant_settings
        WHERE tenant_id = ?
        "#,
    )
    .bind(tenant_id)
    .fetch_optional(pool)
    .await;

    let settings = match loaded {
        Ok(Some(s)) => s,
        Ok(None) => TenantSettings::defaults_for(tenant_id),
        Err(e) => {
            tracing::error!(error = %e, tenant_id, "Failed to load tenant settings, using defaults");
            TenantSettings::defaults_for(tenant_id)
        }
    };

    SETTINGS_CACHE.insert(tenant_id, settings.clone()).await;
    settings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn working_days_parse() {
        let s = TenantSettings::defaults_for(1);
        // 2026-08-24 is a Monday, 2026-08-23 a Sunday
        assert!(s.is_working_day(NaiveDate::from_ymd_opt(2026, 8, 24).unwrap()));
        assert!(!s.is_working_day(NaiveDate::from_ymd_opt(2026, 8, 23).unwrap()));
    }

    #[test]
    fn approval_set_parses_csv() {
        let s = TenantSettings::defaults_for(1);
        let set = s.approval_set();
        assert!(set.contains(&AnomalyType::Absence));
        assert!(set.contains(&AnomalyType::MissingOut));
        assert!(!set.contains(&AnomalyType::Late));
    }

    #[test]
    fn overtime_rounding() {
        let mut s = TenantSettings::defaults_for(1);
        assert_eq!(s.round_overtime(22), 15);
        assert_eq!(s.round_overtime(23), 30);
        s.overtime_rounding_minutes = 0;
        assert_eq!(s.round_overtime(22), 22);
        assert_eq!(s.round_overtime(-5), 0);
    }
}
