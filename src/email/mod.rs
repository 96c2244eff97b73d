//! Transactional email: verification and password reset links.
//!
//! With SMTP configured, messages go out over STARTTLS. Without it they are
//! captured in an in-memory outbox so development setups and tests can read
//! the links.

use std::sync::{Arc, Mutex};

use askama::Template;
use lettre::message::{MultiPart, SinglePart, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;
use thiserror::Error;

use crate::auth::token_lifetime;
use crate::config::{ServerConfig, SmtpConfig};
use crate::types::VerificationKind;

const STORE_NAME: &str = "Souq";

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    #[error("invalid address: {0}")]
    InvalidAddress(#[from] lettre::address::AddressError),

    #[error("template error: {0}")]
    Template(#[from] askama::Error),
}

/// A message as it was handed to the transport.
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[derive(Clone)]
enum Transport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    Outbox(Arc<Mutex<Vec<OutgoingEmail>>>),
}

#[derive(Template)]
#[template(path = "email/verification.html")]
struct VerificationHtml<'a> {
    store_name: &'a str,
    name: &'a str,
    link: &'a str,
    expires_in_hours: i64,
}

#[derive(Template)]
#[template(path = "email/verification.txt")]
struct VerificationText<'a> {
    store_name: &'a str,
    name: &'a str,
    link: &'a str,
    expires_in_hours: i64,
}

#[derive(Template)]
#[template(path = "email/password_reset.html")]
struct PasswordResetHtml<'a> {
    store_name: &'a str,
    name: &'a str,
    link: &'a str,
    expires_in_hours: i64,
}

#[derive(Template)]
#[template(path = "email/password_reset.txt")]
struct PasswordResetText<'a> {
    store_name: &'a str,
    name: &'a str,
    link: &'a str,
    expires_in_hours: i64,
}

#[derive(Clone)]
pub struct Mailer {
    transport: Transport,
    from_address: String,
    base_url: String,
}

impl Mailer {
    /// SMTP when configured, otherwise the in-memory outbox.
    pub fn from_config(config: &ServerConfig) -> Result<Self, EmailError> {
        match &config.smtp {
            Some(smtp) => Self::smtp(smtp, &config.auth.base_url),
            None => {
                tracing::warn!("SMTP is not configured; emails will be kept in memory");
                Ok(Self::outbox(&config.auth.base_url))
            }
        }
    }

    pub fn smtp(config: &SmtpConfig, base_url: &str) -> Result<Self, EmailError> {
        let credentials = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            .port(config.port)
            .credentials(credentials)
            .build();

        Ok(Self {
            transport: Transport::Smtp(mailer),
            from_address: config.from_address.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn outbox(base_url: &str) -> Self {
        Self {
            transport: Transport::Outbox(Arc::new(Mutex::new(Vec::new()))),
            from_address: format!("{STORE_NAME} <no-reply@localhost>"),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Messages captured by the outbox transport. Always empty for SMTP.
    #[must_use]
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        match &self.transport {
            Transport::Outbox(outbox) => outbox
                .lock()
                .map(|messages| messages.clone())
                .unwrap_or_default(),
            Transport::Smtp(_) => Vec::new(),
        }
    }

    #[must_use]
    pub fn verification_link(&self, token: &str) -> String {
        format!(
            "{}/api/auth/verify-email?token={}",
            self.base_url,
            urlencoding::encode(token)
        )
    }

    #[must_use]
    pub fn password_reset_link(&self, token: &str) -> String {
        format!(
            "{}/reset-password?token={}",
            self.base_url,
            urlencoding::encode(token)
        )
    }

    pub async fn send_verification_email(
        &self,
        to: &str,
        name: &str,
        token: &str,
    ) -> Result<(), EmailError> {
        let link = self.verification_link(token);
        let expires_in_hours = token_lifetime(VerificationKind::EmailVerification).num_hours();

        let html = VerificationHtml {
            store_name: STORE_NAME,
            name,
            link: &link,
            expires_in_hours,
        }
        .render()?;
        let text = VerificationText {
            store_name: STORE_NAME,
            name,
            link: &link,
            expires_in_hours,
        }
        .render()?;

        self.send(to, &format!("Verify your {STORE_NAME} account"), text, html)
            .await
    }

    pub async fn send_password_reset_email(
        &self,
        to: &str,
        name: &str,
        token: &str,
    ) -> Result<(), EmailError> {
        let link = self.password_reset_link(token);
        let expires_in_hours = token_lifetime(VerificationKind::PasswordReset).num_hours();

        let html = PasswordResetHtml {
            store_name: STORE_NAME,
            name,
            link: &link,
            expires_in_hours,
        }
        .render()?;
        let text = PasswordResetText {
            store_name: STORE_NAME,
            name,
            link: &link,
            expires_in_hours,
        }
        .render()?;

        self.send(to, &format!("Reset your {STORE_NAME} password"), text, html)
            .await
    }

    async fn send(
        &self,
        to: &str,
        subject: &str,
        text: String,
        html: String,
    ) -> Result<(), EmailError> {
        match &self.transport {
            Transport::Smtp(mailer) => {
                let message = Message::builder()
                    .from(self.from_address.parse()?)
                    .to(to.parse()?)
                    .subject(subject)
                    .multipart(
                        MultiPart::alternative()
                            .singlepart(
                                SinglePart::builder()
                                    .header(ContentType::TEXT_PLAIN)
                                    .body(text),
                            )
                            .singlepart(
                                SinglePart::builder()
                                    .header(ContentType::TEXT_HTML)
                                    .body(html),
                            ),
                    )?;
                mailer.send(message).await?;
                tracing::info!(to = %to, subject = %subject, "Email sent");
            }
            Transport::Outbox(outbox) => {
                if let Ok(mut messages) = outbox.lock() {
                    messages.push(OutgoingEmail {
                        to: to.to_string(),
                        subject: subject.to_string(),
                        text,
                        html,
                    });
                }
                tracing::info!(to = %to, subject = %subject, "Email queued in memory outbox");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_outbox_captures_verification_email() {
        let mailer = Mailer::outbox("https://shop.example.com/");
        mailer
            .send_verification_email("buyer@example.com", "Layla", "tok_en")
            .await
            .unwrap();

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "buyer@example.com");
        assert!(
            sent[0]
                .text
                .contains("https://shop.example.com/api/auth/verify-email?token=tok_en")
        );
        assert!(sent[0].text.contains("24 hours"));
        assert!(sent[0].html.contains("Layla"));
    }

    #[tokio::test]
    async fn test_html_escapes_names() {
        let mailer = Mailer::outbox("https://shop.example.com");
        mailer
            .send_password_reset_email("buyer@example.com", "<b>Sam</b>", "abc")
            .await
            .unwrap();

        let sent = mailer.sent();
        assert!(sent[0].html.contains("Sam"));
        assert!(!sent[0].html.contains("<b>Sam</b>"));
        assert!(sent[0].text.contains("/reset-password?token=abc"));
    }
}
