use dotenvy::dotenv;
use std::env;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub log_dir: String,

    // Scheduler cadence
    pub escalation_interval_secs: u64,
    pub absence_detection_hour: u32,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        Self {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            log_dir: env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string()),

            escalation_interval_secs: env::var("ESCALATION_INTERVAL_SECS")
                .unwrap_or_else(|_| "3600".to_string()) // hourly
                .parse()
                .unwrap(),
            absence_detection_hour: env::var("ABSENCE_DETECTION_HOUR")
                .unwrap_or_else(|_| "1".to_string()) // 01:00 local
                .parse()
                .unwrap(),
        }
    }
}
