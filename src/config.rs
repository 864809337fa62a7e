use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Debounce window after which an unrefreshed typing signal expires
pub const DEFAULT_TYPING_TIMEOUT_MS: u64 = 2000;
/// Lifetime of a one-time verification code
pub const DEFAULT_OTP_TTL_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct EmailSettings {
    /// Empty host puts the mailer in no-op mode
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: String,
    pub use_starttls: bool,
    pub app_name: String,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            smtp_host: String::new(),
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            smtp_from: "Direct Chat <no-reply@localhost>".to_string(),
            use_starttls: true,
            app_name: "Direct Chat".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// `None` selects the in-memory store
    pub database_url: Option<String>,
    pub database_max_connections: usize,
    pub jwt_secret: String,
    pub session_ttl_hours: i64,
    pub typing_timeout_ms: u64,
    pub otp_ttl_secs: i64,
    pub pending_sweep_interval_secs: u64,
    pub cors_allowed_origins: Vec<String>,
    pub email: EmailSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3001,
            database_url: None,
            database_max_connections: 16,
            jwt_secret: "dev-only-secret".to_string(),
            session_ttl_hours: 24,
            typing_timeout_ms: DEFAULT_TYPING_TIMEOUT_MS,
            otp_ttl_secs: DEFAULT_OTP_TTL_SECS,
            pending_sweep_interval_secs: 60,
            cors_allowed_origins: Vec::new(),
            email: EmailSettings::default(),
        }
    }
}

impl Config {
    fn parse_list(value: &str) -> Vec<String> {
        value
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()
    }

    fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
        env::var(key)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(default)
    }

    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        let defaults = Config::default();

        let jwt_secret = env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AppError::Config("JWT_SECRET missing".into()))?;

        let database_url = env::var("DATABASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let email = EmailSettings {
            smtp_host: env::var("SMTP_HOST").unwrap_or_default(),
            smtp_port: Self::parse_or("SMTP_PORT", defaults.email.smtp_port),
            smtp_username: env::var("SMTP_USERNAME").ok(),
            smtp_password: env::var("SMTP_PASSWORD").ok(),
            smtp_from: env::var("SMTP_FROM").unwrap_or(defaults.email.smtp_from),
            use_starttls: env::var("SMTP_STARTTLS")
                .map(|v| !(v.eq_ignore_ascii_case("false") || v == "0"))
                .unwrap_or(true),
            app_name: env::var("APP_NAME").unwrap_or(defaults.email.app_name),
        };

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .map(|v| Self::parse_list(&v))
            .unwrap_or_default();

        let config = Self {
            port: Self::parse_or("PORT", defaults.port),
            database_url,
            database_max_connections: Self::parse_or(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            jwt_secret,
            session_ttl_hours: Self::parse_or("SESSION_TTL_HOURS", defaults.session_ttl_hours),
            typing_timeout_ms: Self::parse_or("TYPING_TIMEOUT_MS", defaults.typing_timeout_ms),
            otp_ttl_secs: Self::parse_or("OTP_TTL_SECS", defaults.otp_ttl_secs),
            pending_sweep_interval_secs: Self::parse_or(
                "PENDING_SWEEP_INTERVAL_SECS",
                defaults.pending_sweep_interval_secs,
            ),
            cors_allowed_origins,
            email,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.typing_timeout_ms == 0 {
            return Err(AppError::Config("TYPING_TIMEOUT_MS must be positive".into()));
        }
        if self.otp_ttl_secs <= 0 {
            return Err(AppError::Config("OTP_TTL_SECS must be positive".into()));
        }
        if self.session_ttl_hours <= 0 {
            return Err(AppError::Config("SESSION_TTL_HOURS must be positive".into()));
        }
        Ok(())
    }

    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout_ms)
    }

    pub fn otp_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.otp_ttl_secs)
    }
}
