use crate::config::Config;
use crate::engine::{absence, escalation};
use chrono::{Duration as ChronoDuration, Local};
use sqlx::MySqlPool;
use std::time::Duration;

/// Hourly escalation sweep. Each tick scans every tenant; the per-tenant
/// check-hour gate and the daily claim inside the pass decide whether a
/// tenant actually escalates on this tick.
pub async fn escalation_loop(pool: MySqlPool, config: Config) {
    let mut ticker = tokio::time::interval(Duration::from_secs(config.escalation_interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let now = Local::now().naive_local();
        match escalation::run_escalation_pass(&pool, None, now, false).await {
            Ok(summary) if summary.escalated > 0 => {
                tracing::info!(
                    escalated = summary.escalated,
                    processed = summary.processed,
                    "Scheduled escalation pass escalated records"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "Scheduled escalation pass failed");
            }
        }
    }
}

/// Daily absence sweep for the prior day, fired at the configured hour.
/// The per-(tenant, day) claim makes a second instance running the same
/// window a no-op.
pub async fn absence_loop(pool: MySqlPool, config: Config) {
    loop {
        tokio::time::sleep(until_hour(config.absence_detection_hour)).await;

        let yesterday = Local::now().date_naive() - ChronoDuration::days(1);
        match absence::run_absence_detection(&pool, yesterday, yesterday).await {
            Ok(summary) => {
                tracing::info!(
                    %yesterday,
                    absences = summary.absences_created,
                    technical = summary.technical_absences_created,
                    "Scheduled absence detection finished"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, %yesterday, "Scheduled absence detection failed");
            }
        }
    }
}

/// Duration until the next occurrence of `hour`:00 local time.
fn until_hour(hour: u32) -> Duration {
    let now = Local::now().naive_local();
    let today_at = now
        .date()
        .and_hms_opt(hour.min(23), 0, 0)
        .unwrap_or(now);
    let next = if today_at > now {
        today_at
    } else {
        today_at + ChronoDuration::days(1)
    };
    let secs = (next - now).num_seconds().max(1) as u64;
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn until_hour_is_positive_and_within_a_day() {
        for hour in [0, 1, 9, 23] {
            let d = until_hour(hour);
            assert!(d.as_secs() >= 1);
            assert!(d.as_secs() <= 86_400 + 60);
        }
    }
}
