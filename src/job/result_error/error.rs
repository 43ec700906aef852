use crate::job::result_error::WithMsg;
use derive_more::Display;
use thiserror::Error;

/// Which optional hook of a backup job was running when a failure occurred.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum HookStage {
    #[display("pre")]
    Pre,
    #[display("post")]
    Post,
}

/// Every failure mode of one job run.
///
/// Stage variants wrap the underlying executor or parse error and carry the
/// job context needed for the notification title; ambient variants cover
/// config loading and the notification transport itself.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yml::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Validation(#[from] validator::ValidationErrors),
    #[error(transparent)]
    Mail(#[from] lettre::error::Error),
    #[error(transparent)]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("command `{command}` exited non-zero:\n{}", indent::indent_all_with("  ", output.to_string()))]
    CommandFailed { command: String, output: String },
    #[error("{stage} hook for {job} failed:\n{}", indent::indent_all_with("  ", source.to_string()))]
    HookFailed {
        job: String,
        stage: HookStage,
        source: Box<Error>,
    },
    #[error("init of repository {repo} failed:\n{}", indent::indent_all_with("  ", source.to_string()))]
    InitFailed { repo: String, source: Box<Error> },
    #[error("backup {job} failed:\n{}", indent::indent_all_with("  ", source.to_string()))]
    BackupFailed { job: String, source: Box<Error> },
    #[error("snapshot listing for tag {tag} failed:\n{}", indent::indent_all_with("  ", source.to_string()))]
    SnapshotQueryFailed { tag: String, source: Box<Error> },
    #[error("copy for {job} failed:\n{}", indent::indent_all_with("  ", source.to_string()))]
    CopyFailed { job: String, source: Box<Error> },
    #[error("forget for {job} failed:\n{}", indent::indent_all_with("  ", source.to_string()))]
    ForgetFailed { job: String, source: Box<Error> },
    #[error("no {mode} job named {name} in config")]
    UnknownJob { name: String, mode: String },
    #[error("job {referenced_by} references unknown repository {name}")]
    UnknownRepo { name: String, referenced_by: String },
    #[error("mode {mode:?} is not supported")]
    UnsupportedMode { mode: String },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("notification rejected by relay: {0}")]
    NotificationRejected(String),
    #[error("{msg}:\n{}", indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
}

impl Error {
    /// The notification title for this failure.
    ///
    /// Stage failures get a title naming the job and the stage; everything
    /// else is reported as a critical error.
    pub fn title(&self) -> String {
        match self {
            Error::HookFailed { .. } => "restless: error".to_owned(),
            Error::BackupFailed { job, .. } => format!("restless: backup {job} failed"),
            Error::ForgetFailed { job, .. } => format!("restless: forget for {job} failed"),
            Error::CopyFailed { job, .. } => format!("restless: copy for {job} failed"),
            Error::SnapshotQueryFailed { .. } => "restless: snapshot listing failed".to_owned(),
            Error::WithMsg { error, .. } => error.title(),
            _ => "restless: critical error".to_owned(),
        }
    }
}

impl<S: Into<String>> WithMsg<S> for Error {
    fn with_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}
