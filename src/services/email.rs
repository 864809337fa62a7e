//! Outbound delivery of one-time verification codes
use crate::config::EmailSettings;
use crate::error::{AppError, AppResult};
use crate::logging::mask_email;
use async_trait::async_trait;
use lettre::message::{header, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Something that can deliver a verification code to an email address
#[async_trait]
pub trait CodeDispatcher: Send + Sync {
    async fn send_code(&self, recipient: &str, code: &str) -> AppResult<()>;
}

/// Async SMTP transport wrapper (SMTP or no-op)
#[derive(Clone)]
pub struct EmailService {
    transport: Option<Arc<AsyncSmtpTransport<Tokio1Executor>>>,
    from: Mailbox,
    app_name: String,
    code_ttl_minutes: i64,
}

impl EmailService {
    /// Build the mailer from configuration
    ///
    /// An empty SMTP host puts the service in no-op mode: codes are not sent,
    /// they are written to the debug log instead.
    pub fn new(config: &EmailSettings, code_ttl_secs: i64) -> AppResult<Self> {
        let from = config
            .smtp_from
            .parse::<Mailbox>()
            .map_err(|e| AppError::Config(format!("invalid SMTP_FROM address: {e}")))?;

        let transport = if config.smtp_host.trim().is_empty() {
            warn!("SMTP host not configured; email service will operate in no-op mode");
            None
        } else {
            let builder = if config.use_starttls {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            } else {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            }
            .map_err(|e| AppError::Config(format!("failed to configure SMTP transport: {e}")))?
            .port(config.smtp_port);

            let builder = match (&config.smtp_username, &config.smtp_password) {
                (Some(username), Some(password)) => {
                    builder.credentials(Credentials::new(username.clone(), password.clone()))
                }
                _ => builder,
            };

            Some(Arc::new(builder.build()))
        };

        Ok(Self {
            transport,
            from,
            app_name: config.app_name.clone(),
            code_ttl_minutes: (code_ttl_secs / 60).max(1),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    fn render(&self, code: &str) -> (String, String, String) {
        let subject = format!("{} verification code", self.app_name);
        let text = format!(
            "Your verification code is: {code}\n\n\
             This code will expire in {} minutes.\n\
             If you didn't request this code, please ignore this email.",
            self.code_ttl_minutes
        );
        let html = format!(
            "<h1>{app} - Verification</h1>\
             <p>Your verification code is: <strong>{code}</strong></p>\
             <p>This code will expire in {ttl} minutes.</p>\
             <p>If you didn't request this code, please ignore this email.</p>",
            app = self.app_name,
            ttl = self.code_ttl_minutes,
        );
        (subject, text, html)
    }
}

#[async_trait]
impl CodeDispatcher for EmailService {
    async fn send_code(&self, recipient: &str, code: &str) -> AppResult<()> {
        let Some(transport) = &self.transport else {
            // Development only
            debug!(
                recipient = %mask_email(recipient),
                code = %code,
                "email service in no-op mode; code not sent"
            );
            return Ok(());
        };

        let to = recipient
            .parse::<Mailbox>()
            .map_err(|e| AppError::Validation(format!("invalid recipient email address: {e}")))?;

        let (subject, text, html) = self.render(code);
        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_PLAIN)
                            .body(text),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_HTML)
                            .body(html),
                    ),
            )
            .map_err(|e| AppError::Internal(format!("failed to build email message: {e}")))?;

        transport
            .send(email)
            .await
            .map_err(|e| AppError::Upstream(format!("failed to send email: {e}")))?;
        info!(recipient = %mask_email(recipient), "verification email sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_noop_mode_logs_code_at_debug() {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let service = EmailService::new(&EmailSettings::default(), 300).unwrap();
        assert!(!service.is_enabled());
        service.send_code("alice@example.com", "123456").await.unwrap();

        let output = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("code=123456"));
        assert!(!output.contains("alice@example.com"));
    }

    #[test]
    fn test_rendered_body_carries_code_and_ttl() {
        let service = EmailService::new(&EmailSettings::default(), 300).unwrap();
        let (subject, text, html) = service.render("481516");
        assert!(subject.contains("Direct Chat"));
        assert!(text.contains("481516"));
        assert!(text.contains("5 minutes"));
        assert!(html.contains("<strong>481516</strong>"));
    }

    #[test]
    fn test_invalid_from_address_is_config_error() {
        let settings = EmailSettings {
            smtp_from: "not an address".into(),
            ..EmailSettings::default()
        };
        assert!(matches!(
            EmailService::new(&settings, 300),
            Err(AppError::Config(_))
        ));
    }
}
