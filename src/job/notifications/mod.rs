use crate::job::notifications::smtp::SmtpNotificationConfig;
use crate::job::result_error::result::Result;
use derive_more::From;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::result;
use validator::{Validate, ValidationErrors};

pub mod smtp;

/// The configured transport behind the `notifications` config section.
///
/// Tagged by `type` so further transports can slot in next to `smtp`.
#[derive(Clone, From, Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum NotificationConfig {
    Smtp(SmtpNotificationConfig),
}

impl Validate for NotificationConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            Self::Smtp(inner) => inner.validate(),
        }
    }
}

impl Notification for NotificationConfig {
    fn send<D1: Display, D2: Display>(&self, title: D1, body: D2) -> Result<()> {
        match self {
            Self::Smtp(inner) => inner.send(title, body),
        }
    }
}

/// Fire-and-forget `notify(title, body)`, called at most once per run,
/// right before a failed process terminates.
pub trait Notification {
    fn send<D1: Display, D2: Display>(&self, title: D1, body: D2) -> Result<()>;
}
