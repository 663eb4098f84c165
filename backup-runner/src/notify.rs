//! E-mail notification of profile outcomes.

use crate::profile::NotifySpec;
use crate::utils::{BackupError, Result};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::time::Duration;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

impl Notification {
    pub fn success(profile: &str, host: &str) -> Self {
        Self {
            subject: format!("[backup-runner] {profile} on {host}: success"),
            body: format!("Backup profile {profile} on {host} completed successfully.\n"),
        }
    }

    pub fn failure(profile: &str, host: &str, err: &BackupError) -> Self {
        Self {
            subject: format!("[backup-runner] {profile} on {host}: FAILED"),
            body: format!("Backup profile {profile} on {host} failed:\n\n{err}\n"),
        }
    }
}

/// Delivers a notification to the recipients of a [`NotifySpec`].
pub trait Mailer {
    fn send(&self, spec: &NotifySpec, notification: &Notification) -> Result<()>;
}

/// SMTP delivery with STARTTLS.
#[derive(Debug, Default, Clone, Copy)]
pub struct SmtpMailer;

fn mailbox(address: &str) -> Result<Mailbox> {
    address
        .parse()
        .map_err(|e| BackupError::Mail(format!("invalid address {address:?}: {e}")))
}

impl Mailer for SmtpMailer {
    fn send(&self, spec: &NotifySpec, notification: &Notification) -> Result<()> {
        let mut builder = Message::builder()
            .from(mailbox(&spec.from)?)
            .subject(notification.subject.clone())
            .header(ContentType::TEXT_PLAIN);
        for to in &spec.to {
            builder = builder.to(mailbox(to)?);
        }
        let message = builder
            .body(notification.body.clone())
            .map_err(|e| BackupError::Mail(format!("unable to build message: {e}")))?;

        let mut transport = SmtpTransport::starttls_relay(&spec.host)
            .map_err(|e| BackupError::Mail(format!("unable to set up SMTP relay {}: {e}", spec.host)))?
            .port(spec.port)
            .timeout(Some(SMTP_TIMEOUT));
        if let Some(user) = &spec.user {
            transport = transport.credentials(Credentials::new(
                user.clone(),
                spec.password.clone().unwrap_or_default(),
            ));
        }

        transport
            .build()
            .send(&message)
            .map_err(|e| BackupError::Mail(format!("unable to send email: {e}")))?;

        tracing::info!(to = ?spec.to, subject = %notification.subject, "Notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_notification_carries_error() {
        let err = BackupError::execution("mysqldump exited with status 2");
        let n = Notification::failure("shop", "db01", &err);
        assert!(n.subject.contains("shop"));
        assert!(n.subject.contains("FAILED"));
        assert!(n.body.contains("mysqldump exited with status 2"));
    }

    #[test]
    fn test_success_notification() {
        let n = Notification::success("shop", "db01");
        assert!(n.subject.ends_with("success"));
        assert!(n.body.contains("db01"));
    }

    #[test]
    fn test_invalid_sender_is_mail_error() {
        let spec = NotifySpec {
            host: "localhost".to_string(),
            port: 587,
            user: None,
            password: None,
            from: "not an address".to_string(),
            to: vec!["ops@example.com".to_string()],
            on_success: false,
        };
        let err = SmtpMailer
            .send(&spec, &Notification::success("shop", "db01"))
            .unwrap_err();
        assert!(matches!(err, BackupError::Mail(_)));
    }
}
