use chrono::{FixedOffset, Offset, Utc};
use std::env;

use crate::schedule::MissedSlotPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub frontend_url: String,
    /// Additional CORS origins, e.g. for testing from another device on the LAN.
    pub cors_extra_origins: Vec<String>,
    pub db_max_connections: u32,

    /// Shared secret of the external auth provider's access tokens.
    pub jwt_secret: String,

    // Mood check-in reminders
    pub mood_check_interval_secs: u64,
    pub schedule_store_dir: Option<String>,
    pub schedule_utc_offset: FixedOffset,
    pub student_missed_slot_policy: MissedSlotPolicy,
    pub expert_missed_slot_policy: MissedSlotPolicy,
    pub peer_missed_slot_policy: MissedSlotPolicy,
    pub welcome_check_in_enabled: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()
                .expect("PORT must be a number"),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
            cors_extra_origins: env::var("CORS_EXTRA_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".into())
                .parse()
                .expect("DB_MAX_CONNECTIONS must be a number"),

            jwt_secret: env::var("JWT_SECRET").expect("JWT_SECRET must be set"),

            mood_check_interval_secs: env::var("MOOD_CHECK_INTERVAL_SECS")
                .unwrap_or_else(|_| "1800".into()) // 30 min
                .parse()
                .unwrap_or(1800),
            schedule_store_dir: env::var("SCHEDULE_STORE_DIR").ok().filter(|s| !s.is_empty()),
            schedule_utc_offset: parse_utc_offset(
                &env::var("SCHEDULE_UTC_OFFSET_MINUTES").unwrap_or_else(|_| "0".into()),
            ),
            student_missed_slot_policy: policy_from_env("STUDENT_MISSED_SLOT_POLICY"),
            expert_missed_slot_policy: policy_from_env("EXPERT_MISSED_SLOT_POLICY"),
            peer_missed_slot_policy: policy_from_env("PEER_MISSED_SLOT_POLICY"),
            welcome_check_in_enabled: env::var("WELCOME_CHECK_IN_ENABLED")
                .unwrap_or_else(|_| "true".into())
                .parse()
                .unwrap_or(true),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests() -> Self {
        Self {
            database_url: String::new(),
            host: "127.0.0.1".into(),
            port: 0,
            frontend_url: "http://localhost:3000".into(),
            cors_extra_origins: Vec::new(),
            db_max_connections: 1,
            jwt_secret: "test-secret".into(),
            mood_check_interval_secs: 1800,
            schedule_store_dir: None,
            schedule_utc_offset: Utc.fix(),
            student_missed_slot_policy: MissedSlotPolicy::Persistent,
            expert_missed_slot_policy: MissedSlotPolicy::Persistent,
            peer_missed_slot_policy: MissedSlotPolicy::Persistent,
            welcome_check_in_enabled: true,
        }
    }
}

fn policy_from_env(var: &str) -> MissedSlotPolicy {
    match env::var(var) {
        Ok(raw) => raw.parse().unwrap_or_else(|e| {
            tracing::warn!(var = %var, error = %e, "Invalid missed slot policy; using persistent");
            MissedSlotPolicy::Persistent
        }),
        Err(_) => MissedSlotPolicy::Persistent,
    }
}

/// Minutes east of UTC; out-of-range or malformed values fall back to UTC.
fn parse_utc_offset(raw: &str) -> FixedOffset {
    raw.trim()
        .parse::<i32>()
        .ok()
        .and_then(|minutes| minutes.checked_mul(60))
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix())
}
