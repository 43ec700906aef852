//! Snapshot store client.
//!
//! Each of the five repository operations is one credential-scoped
//! [`Invocation`] against the store CLI. The environment overlay is built
//! freshly per call and handed to exactly one invocation, so credentials for
//! one repository are never visible to an operation on another.

use crate::job::exec::Invocation;
use crate::job::job_config::Repository;
use crate::job::result_error::error::Error;
use crate::job::result_error::result::Result;
use crate::job::retention::KeepRule;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::debug;

/// Store CLI binary, resolved through `PATH`.
pub const STORE_PROGRAM: &str = "restic";

/// Primary credential variable for the repository an operation targets.
pub const ENV_PASSWORD: &str = "RESTIC_PASSWORD";
/// Secondary credential variable for the source side of a copy.
pub const ENV_FROM_PASSWORD: &str = "RESTIC_FROM_PASSWORD";

/// Output marker the store prints when `init` hits an existing repository.
const ALREADY_INITIALIZED: &str = "already exists";

/// One snapshot record as reported by the store's JSON listing.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub id: String,
    pub short_id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub hostname: String,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

/// `init` against an existing repository is reported as a failure by the
/// store; its output marks the only non-fatal case.
fn is_already_initialized(error: &Error) -> bool {
    matches!(error, Error::CommandFailed { output, .. } if output.contains(ALREADY_INITIALIZED))
}

impl Repository {
    /// Environment overlay for one operation targeting this repository:
    /// the store password plus every auxiliary variable.
    pub fn credential_env(&self) -> Vec<(String, String)> {
        let mut env = vec![(ENV_PASSWORD.to_owned(), self.password().reveal().to_owned())];
        env.extend(
            self.vars()
                .iter()
                .map(|(key, value)| (key.clone(), value.reveal().to_owned())),
        );
        env
    }

    /// The distinctly named source-side credential pair used by `copy`.
    fn from_credential_env(&self) -> Vec<(String, String)> {
        let mut env = vec![(
            ENV_FROM_PASSWORD.to_owned(),
            self.password().reveal().to_owned(),
        )];
        env.extend(
            self.vars()
                .iter()
                .map(|(key, value)| (key.clone(), value.reveal().to_owned())),
        );
        env
    }

    fn init_invocation(&self) -> Invocation {
        Invocation::builder()
            .program(STORE_PROGRAM)
            .args(vec![
                "init".to_owned(),
                "--repo".to_owned(),
                self.address().to_string(),
            ])
            .env(self.credential_env())
            .build()
    }

    /// Idempotent repository initialization.
    pub fn init(&self) -> Result<()> {
        match self.init_invocation().run() {
            Err(e) if is_already_initialized(&e) => {
                debug!("repository {} already initialized", self.address());
                Ok(())
            }
            result => result.map(drop),
        }
    }

    fn backup_invocation(&self, include: &[PathBuf], tag: &str, exclude: &[String]) -> Invocation {
        let mut args = vec!["backup".to_owned()];
        args.extend(include.iter().map(|path| path.display().to_string()));
        args.extend([
            "--repo".to_owned(),
            self.address().to_string(),
            "--tag".to_owned(),
            tag.to_owned(),
        ]);
        for pattern in exclude {
            args.extend(["--exclude".to_owned(), pattern.clone()]);
        }
        Invocation::builder()
            .program(STORE_PROGRAM)
            .args(args)
            .env(self.credential_env())
            .build()
    }

    /// Creates one snapshot of `include`, tagged so retention and
    /// replication can address it later.
    pub fn backup(&self, include: &[PathBuf], tag: &str, exclude: &[String]) -> Result<()> {
        self.backup_invocation(include, tag, exclude).run().map(drop)
    }

    fn snapshots_invocation(&self, tag: &str) -> Invocation {
        Invocation::builder()
            .program(STORE_PROGRAM)
            .args(vec![
                "snapshots".to_owned(),
                "--json".to_owned(),
                "--repo".to_owned(),
                self.address().to_string(),
                "--tag".to_owned(),
                tag.to_owned(),
            ])
            .env(self.credential_env())
            .build()
    }

    /// Lists snapshots carrying `tag`, preserving the store's order.
    ///
    /// The listing rides on stdout as JSON; malformed JSON is fatal because
    /// replication's selection depends on an accurate sequence.
    pub fn snapshots(&self, tag: &str) -> Result<Vec<Snapshot>> {
        let output = self.snapshots_invocation(tag).run()?;
        Ok(serde_json::from_str(output.stdout.trim())?)
    }

    fn copy_invocation(&self, from: &Repository, snapshot_ids: &[String]) -> Invocation {
        let mut env = from.from_credential_env();
        env.extend(self.credential_env());
        let mut args = vec![
            "copy".to_owned(),
            "--from-repo".to_owned(),
            from.address().to_string(),
            "--repo".to_owned(),
            self.address().to_string(),
        ];
        args.extend(snapshot_ids.iter().cloned());
        Invocation::builder()
            .program(STORE_PROGRAM)
            .args(args)
            .env(env)
            .build()
    }

    /// Copies an explicit snapshot list from `from` into this repository.
    ///
    /// Both credential pairs ride in the same single-invocation overlay;
    /// when the two repositories share auxiliary variable names, this
    /// repository's values win. Callers skip the call entirely for an empty
    /// list instead of handing the store an id-less command line.
    pub fn copy_from(&self, from: &Repository, snapshot_ids: &[String]) -> Result<()> {
        self.copy_invocation(from, snapshot_ids).run().map(drop)
    }

    fn forget_invocation(&self, tag: &str, keep: &[KeepRule]) -> Invocation {
        let mut args = vec![
            "forget".to_owned(),
            "--prune".to_owned(),
            "--group-by".to_owned(),
            "host".to_owned(),
            "--repo".to_owned(),
            self.address().to_string(),
            "--tag".to_owned(),
            tag.to_owned(),
        ];
        args.extend(keep.iter().flat_map(KeepRule::flag_args));
        Invocation::builder()
            .program(STORE_PROGRAM)
            .args(args)
            .env(self.credential_env())
            .build()
    }

    /// Drops snapshots of `tag` not matched by `keep` and reclaims space.
    ///
    /// Always grouped by host so retention on one machine cannot eat
    /// another machine's snapshots under the same tag.
    pub fn forget(&self, tag: &str, keep: &[KeepRule]) -> Result<()> {
        self.forget_invocation(tag, keep).run().map(drop)
    }
}
