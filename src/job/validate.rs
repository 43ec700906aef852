//! Custom validation functions for configuration values.

use sanitize_filename::{is_sanitized, sanitize};
use tracing_subscriber::filter::LevelFilter;
use validator::ValidationError;

/// Job and repository names become snapshot tags and notification text, so
/// they are held to filename hygiene.
pub fn validate_job_name<S: AsRef<str>>(name: S) -> Result<(), ValidationError> {
    let name = name.as_ref();
    if name.is_empty() {
        return Err(ValidationError::new("EmptyName")
            .with_message("name must not be empty".into()));
    }
    if !is_sanitized(name) {
        return Err(ValidationError::new("InvalidName").with_message(
            format!("invalid name {name:?}, try something like {:?}", sanitize(name)).into(),
        ));
    }

    Ok(())
}

pub fn validate_repo_address<S: AsRef<str>>(address: S) -> Result<(), ValidationError> {
    if address.as_ref().trim().is_empty() {
        return Err(ValidationError::new("EmptyRepoAddress")
            .with_message("repository address must not be empty".into()));
    }

    Ok(())
}

pub fn validate_log_level<S: AsRef<str>>(level: S) -> Result<(), ValidationError> {
    let level = level.as_ref();
    if level.parse::<LevelFilter>().is_err() {
        return Err(ValidationError::new("InvalidLogLevel")
            .with_message(format!("unknown log level {level:?}").into()));
    }

    Ok(())
}
