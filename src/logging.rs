use tracing_subscriber::{fmt, EnvFilter};

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tokio_postgres=warn,lettre=warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        fmt().with_env_filter(env_filter).json().init();
    } else {
        fmt().with_env_filter(env_filter).with_target(false).init();
    }
}

/// Mask an email address for log output
pub fn mask_email(email: &str) -> String {
    match email.find('@') {
        Some(at) => {
            let (local, domain) = email.split_at(at);
            if local.chars().count() <= 2 {
                format!("**{domain}")
            } else {
                let first: String = local.chars().take(1).collect();
                format!("{first}***{domain}")
            }
        }
        None => "***@***".to_string(),
    }
}
