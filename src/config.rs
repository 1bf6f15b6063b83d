use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_ttl_hours: i64,
    /// When true, a same-day confirmation lands the visit directly in
    /// status `open` instead of `confirmed`.
    pub auto_open_same_day: bool,
    /// How long a patient-call frame stays on the boards, seconds.
    pub display_call_seconds: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let session_ttl_hours = env::var("SESSION_TTL_HOURS")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(24);
        let auto_open_same_day = env::var("AUTO_OPEN_SAME_DAY")
            .ok()
            .and_then(|s| s.parse::<bool>().ok())
            .unwrap_or(false);
        let display_call_seconds = env::var("DISPLAY_CALL_SECONDS")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(20);

        Ok(Self {
            database_url,
            bind_addr,
            session_ttl_hours,
            auto_open_same_day,
            display_call_seconds,
        })
    }
}
