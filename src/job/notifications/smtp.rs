//! SMTP delivery of failure notifications.

use crate::job::notifications::Notification;
use crate::job::redacted::Redacted;
use crate::job::result_error::error::Error;
use crate::job::result_error::result::Result;
use bon::Builder;
use getset::Getters;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt::Display;
use tracing::info;
use validator::Validate;

/// SMTP transport settings for the escalation mail.
///
/// The relay password rides in a [`Redacted`] so it cannot surface in logs
/// or re-serialized config.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct SmtpNotificationConfig {
    #[builder(into)]
    host: String,
    /// Relay port; the mode's conventional port when unset.
    port: Option<u16>,
    #[serde(default)]
    #[builder(default)]
    smtp_mode: SmtpMode,
    from: Mailbox,
    #[validate(length(min = 1))]
    to: Vec<Mailbox>,
    #[builder(into)]
    username: String,
    password: Redacted,
}

/// Connection security for the SMTP session.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum SmtpMode {
    /// Plain connection, for local relays and tests only.
    Unsecured,
    #[default]
    Ssl,
    StartTls,
}

impl Notification for SmtpNotificationConfig {
    fn send<D1: Display, D2: Display>(&self, title: D1, body: D2) -> Result<()> {
        let email = self
            .to
            .iter()
            .cloned()
            .fold(Message::builder(), |builder, mailbox| builder.to(mailbox))
            .from(self.from.clone())
            .subject(title.to_string())
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())?;

        let mut relay = match self.smtp_mode {
            SmtpMode::Unsecured => Ok(SmtpTransport::builder_dangerous(self.host.as_str())),
            SmtpMode::Ssl => SmtpTransport::relay(self.host.as_str()),
            SmtpMode::StartTls => SmtpTransport::starttls_relay(self.host.as_str()),
        }?;
        if let Some(port) = self.port {
            relay = relay.port(port);
        }
        let mailer = relay
            .credentials(Credentials::new(
                self.username.clone(),
                self.password.reveal().to_owned(),
            ))
            .build();

        info!(
            "sending failure notification to {:?} via {}",
            self.to, self.host
        );
        let response = mailer.send(&email)?;
        if response.is_positive() {
            Ok(())
        } else {
            Err(Error::NotificationRejected(response.code().to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(host: String, port: u16, mode: SmtpMode) -> SmtpNotificationConfig {
        SmtpNotificationConfig::builder()
            .host(host)
            .port(port)
            .smtp_mode(mode)
            .from("restless@example.com".parse::<Mailbox>().unwrap())
            .to(vec!["admin@example.com".parse::<Mailbox>().unwrap()])
            .username("restless")
            .password(Redacted::from("mail-password"))
            .build()
    }

    #[test]
    #[cfg(not(any(target_os = "macos", target_os = "ios")))]
    fn send_delivers_through_a_mock_relay() {
        use std::env;

        // Skip if running in CI or without network
        if env::var("CI").is_ok() {
            return;
        }

        let server = maik::MockServer::builder().no_verify_credentials().build();
        let config = config_for(
            server.host().to_string(),
            server.port(),
            SmtpMode::Unsecured,
        );

        server.start();
        std::thread::sleep(std::time::Duration::from_millis(100));

        let result = config.send("restless: backup docs failed", "command output");

        std::thread::sleep(std::time::Duration::from_millis(200));

        if result.is_ok() {
            let assertion = maik::MailAssertion::new()
                .recipients_are(["admin@example.com"])
                .body_is("command output");
            assert!(server.assert(assertion));
        }
    }

    #[test]
    fn empty_recipient_list_fails_validation() {
        let mut config = config_for("smtp.example.com".to_owned(), 465, SmtpMode::Ssl);
        assert!(config.validate().is_ok());

        config.to.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn smtp_mode_defaults_to_ssl() {
        let yaml = r#"
type: smtp
host: smtp.example.com
from: restless@example.com
to: [admin@example.com]
username: restless
password: mail-password
"#;
        let config: crate::job::notifications::NotificationConfig =
            serde_yml::from_str(yaml).unwrap();
        let crate::job::notifications::NotificationConfig::Smtp(smtp) = config;
        assert_eq!(*smtp.smtp_mode(), SmtpMode::Ssl);
        assert_eq!(smtp.password().reveal(), "mail-password");
    }
}
