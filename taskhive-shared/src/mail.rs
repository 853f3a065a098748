//! Outgoing email
//!
//! Verification and password reset emails go through the [`Mailer`] trait.
//! Delivery is best-effort: [`send_best_effort`] logs a failure and returns,
//! so a mail outage never fails the registration or reset request that
//! triggered it.
//!
//! - [`SmtpMailer`]: lettre async SMTP transport (STARTTLS or plaintext)
//! - [`LogMailer`]: writes messages to the log; used when SMTP is not
//!   configured

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    #[error("Failed to build email: {0}")]
    Build(String),

    #[error("Failed to deliver email: {0}")]
    Delivery(String),
}

/// A rendered email ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: MailMessage) -> Result<(), MailError>;
}

/// Sends a message, logging instead of returning any failure
pub async fn send_best_effort(mailer: &dyn Mailer, message: MailMessage) {
    let to = message.to.clone();
    let subject = message.subject.clone();

    match mailer.send(message).await {
        Ok(()) => debug!(to = %to, subject = %subject, "Email sent"),
        Err(e) => warn!(to = %to, subject = %subject, error = %e, "Failed to send email"),
    }
}

/// SMTP connection settings
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,

    /// Use STARTTLS; disable only for local test relays
    pub starttls: bool,

    pub from_address: String,
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(settings: &SmtpSettings) -> Result<Self, MailError> {
        let from: Mailbox = settings
            .from_address
            .parse()
            .map_err(|_| MailError::InvalidAddress(settings.from_address.clone()))?;

        let mut builder = if settings.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
                .map_err(|e| MailError::Build(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
        };

        builder = builder.port(settings.port);

        if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: MailMessage) -> Result<(), MailError> {
        let to: Mailbox = message
            .to
            .parse()
            .map_err(|_| MailError::InvalidAddress(message.to.clone()))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject)
            .multipart(MultiPart::alternative_plain_html(message.text, message.html))
            .map_err(|e| MailError::Build(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| MailError::Delivery(e.to_string()))?;

        Ok(())
    }
}

/// Logs messages instead of delivering them
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: MailMessage) -> Result<(), MailError> {
        info!(to = %message.to, subject = %message.subject, "Email delivery disabled; logging message");
        debug!(body = %message.text, "Email body");
        Ok(())
    }
}

fn render(to: &str, subject: &str, greeting: &str, intro: &str, action: &str, url: &str, outro: &str) -> MailMessage {
    let text = format!("{greeting}\n\n{intro}\n\n{action}: {url}\n\n{outro}\n");

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
  <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
    <p>{greeting}</p>
    <p>{intro}</p>
    <p style="text-align: center; margin: 30px 0;">
      <a href="{url}" style="background-color: #22BC66; color: #fff; padding: 12px 30px; text-decoration: none; border-radius: 5px;">{action}</a>
    </p>
    <p style="word-break: break-all;">{url}</p>
    <p>{outro}</p>
  </div>
</body>
</html>"#
    );

    MailMessage {
        to: to.to_string(),
        subject: subject.to_string(),
        text,
        html,
    }
}

/// Email asking a new user to verify their address
pub fn verification_email(to: &str, username: &str, verification_url: &str) -> MailMessage {
    render(
        to,
        "Verify your email",
        &format!("Hi {},", username),
        "Welcome to TaskHive! Please confirm your email address to start collaborating on projects.",
        "Verify your email",
        verification_url,
        "This link expires in 1 hour. If you did not create an account, you can ignore this email.",
    )
}

/// Email carrying a password reset link
pub fn password_reset_email(to: &str, username: &str, reset_url: &str) -> MailMessage {
    render(
        to,
        "Reset your password",
        &format!("Hi {},", username),
        "We received a request to reset the password for your TaskHive account.",
        "Reset password",
        reset_url,
        "This link expires in 1 hour. If you did not ask for a reset, you can ignore this email.",
    )
}
