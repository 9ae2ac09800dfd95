use std::path::PathBuf;

const DEV_PAYMENT_SECRET: &str = "schoold-dev-secret";
const DEFAULT_GRACE_DAYS: i64 = 7;
const MAX_GRACE_DAYS: i64 = 3650;
const DEFAULT_LOG_FILTER: &str = "schoold=info";

#[derive(Debug, Clone)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub log_filter: String,
    pub payment_secret: String,
    pub grace_days: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            payment_secret: DEV_PAYMENT_SECRET.to_string(),
            grace_days: DEFAULT_GRACE_DAYS,
        }
    }
}

impl Config {
    /// Reads `SCHOOLD_*` variables, after loading `.env` if one exists.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Config::default();
        let non_empty = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        cfg.workspace = non_empty("SCHOOLD_WORKSPACE").map(PathBuf::from);
        if let Some(filter) = non_empty("SCHOOLD_LOG").or_else(|| non_empty("RUST_LOG")) {
            cfg.log_filter = filter;
        }
        if let Some(secret) = non_empty("SCHOOLD_PAYMENT_SECRET") {
            cfg.payment_secret = secret;
        }
        if let Some(days) = non_empty("SCHOOLD_GRACE_DAYS").and_then(|v| v.parse::<i64>().ok()) {
            if days >= 0 {
                cfg.grace_days = days.min(MAX_GRACE_DAYS);
            }
        }
        cfg
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.payment_secret == DEV_PAYMENT_SECRET
    }
}
