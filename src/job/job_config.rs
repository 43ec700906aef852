//! Job definitions and the orchestration state machine.
//!
//! Configuration structs double as the runtime: a job definition knows how
//! to drive its own fixed stage sequence against the snapshot store, and a
//! run aborts on the first stage that fails. Escalation (one notification,
//! non-zero exit) happens once, in `main`, from the returned error.

use crate::job::exec;
use crate::job::notifications::NotificationConfig;
use crate::job::redacted::Redacted;
use crate::job::result_error::error::{Error, HookStage};
use crate::job::result_error::result::Result;
use crate::job::result_error::WithMsg;
use crate::job::retention::KeepRule;
use crate::job::select::{backup_tag, select_snapshots};
use crate::job::validate::{validate_job_name, validate_log_level, validate_repo_address};
use bon::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use validator::{Validate, ValidationError, ValidationErrors};

/// One snapshot store endpoint with everything needed to reach it.
///
/// Repositories are shared, read-only data: jobs reference them by name and
/// the store client builds a fresh credential overlay from them per
/// operation.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct Repository {
    /// Store location, e.g. `/srv/restic` or `s3:s3.amazonaws.com/bucket`.
    #[validate(custom(function = validate_repo_address))]
    #[builder(into)]
    address: Arc<str>,
    password: Redacted,
    /// Extra store-specific environment, e.g. cloud credentials.
    #[serde(default)]
    #[builder(default)]
    vars: HashMap<String, Redacted>,
}

/// A named backup definition: what to snapshot, where to, what to keep.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct BackupJobConfig {
    /// Name of the target repository in the `repos` section.
    #[builder(into)]
    repo: Arc<str>,
    /// Paths to snapshot, in the order handed to the store.
    #[validate(length(min = 1))]
    include: Vec<PathBuf>,
    /// Glob patterns excluded from every snapshot of this job.
    #[serde(default)]
    #[builder(default)]
    exclude: Vec<String>,
    /// Ordered keep-rules. An empty list would let `forget` delete every
    /// snapshot, so it is rejected up front.
    #[validate(length(min = 1))]
    keep: Vec<KeepRule>,
    /// Optional shell command run before any store operation.
    pre: Option<Arc<str>>,
    /// Optional shell command run after retention has been enforced.
    post: Option<Arc<str>>,
}

/// One source-job slice of a replication definition.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct IncludeSpecConfig {
    /// Backup job whose tag addresses the snapshots to replicate.
    #[validate(custom(function = validate_job_name))]
    #[builder(into)]
    backup: Arc<str>,
    /// How many of the most recent snapshots to carry over.
    #[validate(range(min = 1))]
    sync_last: usize,
    /// Keep-rules enforced on the destination after the copy.
    #[validate(length(min = 1))]
    keep: Vec<KeepRule>,
}

/// A named replication definition between two repositories.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct ReplicationJobConfig {
    /// Source repository name.
    #[builder(into)]
    from: Arc<str>,
    /// Destination repository name.
    #[builder(into)]
    to: Arc<str>,
    /// Source-job slices replicated in order.
    #[validate(length(min = 1), nested)]
    include: Vec<IncludeSpecConfig>,
}

/// Logging verbosity and destination, from the config's `log` section.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct LogConfig {
    /// Minimum severity written out (`trace` through `error`, or `off`).
    #[serde(default = "default_log_level")]
    #[validate(custom(function = validate_log_level))]
    #[builder(into, default = default_log_level())]
    level: Arc<str>,
    /// Optional log file appended to in addition to stderr.
    location: Option<PathBuf>,
}

fn default_log_level() -> Arc<str> {
    "info".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            location: None,
        }
    }
}

impl LogConfig {
    /// Installs the global subscriber: a console layer plus an ANSI-free
    /// file layer when a location is configured.
    pub fn init(&self) -> Result<()> {
        let level: LevelFilter = self
            .level
            .parse()
            .map_err(|_| Error::Config(format!("unknown log level {:?}", self.level)))?;
        let file_layer = match &self.location {
            Some(path) => {
                let file = File::options().create(true).append(true).open(path)?;
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Arc::new(file)),
                )
            }
            None => None,
        };
        tracing_subscriber::registry()
            .with(level)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .with(file_layer)
            .init();
        Ok(())
    }
}

/// The whole config file: repositories, jobs, notification transport and
/// logging, mirroring the YAML schema.
#[derive(Clone, Debug, Serialize, Deserialize, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct RestlessConfig {
    #[serde(default)]
    #[builder(default)]
    repos: HashMap<String, Repository>,
    #[serde(default)]
    #[builder(default)]
    backups: HashMap<String, BackupJobConfig>,
    #[serde(default)]
    #[builder(default)]
    replication: HashMap<String, ReplicationJobConfig>,
    notifications: NotificationConfig,
    #[serde(default)]
    #[builder(default)]
    log: LogConfig,
}

fn check(
    errors: &mut ValidationErrors,
    section: &'static str,
    name: &str,
    result: std::result::Result<(), ValidationError>,
) {
    if let Err(mut error) = result {
        error.message = Some(match error.message.take() {
            Some(msg) => format!("{name}: {msg}").into(),
            None => format!("{name}: {}", error.code).into(),
        });
        errors.add(section.into(), error);
    }
}

fn check_nested(
    errors: &mut ValidationErrors,
    section: &'static str,
    name: &str,
    result: std::result::Result<(), ValidationErrors>,
) {
    if let Err(nested) = result {
        check(
            errors,
            section,
            name,
            Err(ValidationError::new("InvalidEntry").with_message(nested.to_string().into())),
        );
    }
}

fn unknown_repo(name: &str) -> ValidationError {
    ValidationError::new("UnknownRepo")
        .with_message(format!("references unknown repository {name:?}").into())
}

/// Entry names are map keys and cross-references live between sections, so
/// the top level validates by hand instead of deriving.
impl Validate for RestlessConfig {
    fn validate(&self) -> std::result::Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        for (name, repo) in &self.repos {
            check(&mut errors, "repos", name, validate_job_name(name));
            check_nested(&mut errors, "repos", name, repo.validate());
        }
        for (name, job) in &self.backups {
            check(&mut errors, "backups", name, validate_job_name(name));
            check_nested(&mut errors, "backups", name, job.validate());
            if !self.repos.contains_key(job.repo().as_ref()) {
                check(&mut errors, "backups", name, Err(unknown_repo(job.repo())));
            }
        }
        for (name, job) in &self.replication {
            check(&mut errors, "replication", name, validate_job_name(name));
            check_nested(&mut errors, "replication", name, job.validate());
            for side in [job.from(), job.to()] {
                if !self.repos.contains_key(side.as_ref()) {
                    check(&mut errors, "replication", name, Err(unknown_repo(side)));
                }
            }
        }
        check_nested(
            &mut errors,
            "notifications",
            "notifications",
            self.notifications.validate(),
        );
        check_nested(&mut errors, "log", "log", self.log.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl RestlessConfig {
    /// Reads and validates a YAML config file.
    pub fn load(path: &Path) -> Result<Self> {
        File::open(path)
            .map_err(Error::from)
            .and_then(|file| serde_yml::from_reader::<_, Self>(file).map_err(Error::from))
            .and_then(|config| config.validate().map_err(Error::from).map(|_| config))
            .with_msg(format!("loading config {path:?} failed"))
    }

    fn repo(&self, name: &str, referenced_by: &str) -> Result<&Repository> {
        self.repos.get(name).ok_or_else(|| Error::UnknownRepo {
            name: name.to_owned(),
            referenced_by: referenced_by.to_owned(),
        })
    }

    /// Runs the named job in the given mode.
    ///
    /// An unsupported mode or an unknown job name errors before any hook or
    /// store operation has run.
    pub fn run_job(&self, mode: &str, name: &str) -> Result<()> {
        match mode {
            "backup" => self
                .backups
                .get(name)
                .ok_or_else(|| Error::UnknownJob {
                    name: name.to_owned(),
                    mode: mode.to_owned(),
                })?
                .run(name, self),
            "replication" => self
                .replication
                .get(name)
                .ok_or_else(|| Error::UnknownJob {
                    name: name.to_owned(),
                    mode: mode.to_owned(),
                })?
                .run(name, self),
            unsupported => Err(Error::UnsupportedMode {
                mode: unsupported.to_owned(),
            }),
        }
    }
}

impl BackupJobConfig {
    fn run_hook(&self, name: &str, stage: HookStage) -> Result<()> {
        let command = match stage {
            HookStage::Pre => &self.pre,
            HookStage::Post => &self.post,
        };
        let Some(command) = command.as_deref().filter(|line| !line.trim().is_empty()) else {
            debug!("no {stage} hook for {name}");
            return Ok(());
        };

        info!("running {stage} hook for {name}");
        exec::run_shell(command)
            .map(drop)
            .map_err(|e| Error::HookFailed {
                job: name.to_owned(),
                stage,
                source: Box::new(e),
            })
    }

    /// Drives the backup stage sequence, aborting on the first failure:
    /// pre hook, init, backup, forget, post hook.
    pub fn run(&self, name: &str, config: &RestlessConfig) -> Result<()> {
        info!("starting backup {name}");
        self.run_hook(name, HookStage::Pre)?;

        let repo = config.repo(self.repo.as_ref(), name)?;
        repo.init().map_err(|e| Error::InitFailed {
            repo: self.repo.to_string(),
            source: Box::new(e),
        })?;

        let tag = backup_tag(name);
        repo.backup(&self.include, &tag, &self.exclude)
            .map_err(|e| Error::BackupFailed {
                job: name.to_owned(),
                source: Box::new(e),
            })?;
        repo.forget(&tag, &self.keep)
            .map_err(|e| Error::ForgetFailed {
                job: name.to_owned(),
                source: Box::new(e),
            })?;

        self.run_hook(name, HookStage::Post)?;
        info!("backup {name} finished");
        Ok(())
    }
}

impl ReplicationJobConfig {
    /// Drives the replication stage sequence, aborting on the first
    /// failure: init source, select, init destination, copy, per-spec
    /// forget on the destination.
    pub fn run(&self, name: &str, config: &RestlessConfig) -> Result<()> {
        info!("starting replication {name}");
        let from = config.repo(self.from.as_ref(), name)?;
        let to = config.repo(self.to.as_ref(), name)?;

        from.init().map_err(|e| Error::InitFailed {
            repo: self.from.to_string(),
            source: Box::new(e),
        })?;
        let selected = select_snapshots(from, &self.include)?;

        to.init().map_err(|e| Error::InitFailed {
            repo: self.to.to_string(),
            source: Box::new(e),
        })?;
        if selected.is_empty() {
            info!("replication {name}: nothing to copy");
        } else {
            to.copy_from(from, &selected)
                .map_err(|e| Error::CopyFailed {
                    job: name.to_owned(),
                    source: Box::new(e),
                })?;
        }

        for spec in &self.include {
            to.forget(&backup_tag(spec.backup()), spec.keep())
                .map_err(|e| Error::ForgetFailed {
                    job: name.to_owned(),
                    source: Box::new(e),
                })?;
        }
        info!("replication {name} finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::notifications::smtp::{SmtpMode, SmtpNotificationConfig};
    use lettre::message::Mailbox;

    fn test_notifications() -> NotificationConfig {
        SmtpNotificationConfig::builder()
            .host("smtp.example.com")
            .smtp_mode(SmtpMode::Ssl)
            .from("restless@example.com".parse::<Mailbox>().unwrap())
            .to(vec!["admin@example.com".parse::<Mailbox>().unwrap()])
            .username("restless")
            .password(Redacted::from("mail-password"))
            .build()
            .into()
    }

    fn docs_job(pre: Option<&str>, post: Option<&str>) -> BackupJobConfig {
        BackupJobConfig::builder()
            .repo("primary")
            .include(vec![PathBuf::from("/tmp/docs")])
            .exclude(vec!["*.tmp".to_owned()])
            .keep(vec![KeepRule::Last(7)])
            .maybe_pre(pre.map(Arc::from))
            .maybe_post(post.map(Arc::from))
            .build()
    }

    fn test_config(pre: Option<&str>, post: Option<&str>) -> RestlessConfig {
        RestlessConfig::builder()
            .repos(HashMap::from([
                (
                    "primary".to_owned(),
                    Repository::builder()
                        .address("/srv/restless-primary")
                        .password(Redacted::from("primary-pw"))
                        .build(),
                ),
                (
                    "offsite".to_owned(),
                    Repository::builder()
                        .address("/srv/restless-offsite")
                        .password(Redacted::from("offsite-pw"))
                        .build(),
                ),
            ]))
            .backups(HashMap::from([("docs".to_owned(), docs_job(pre, post))]))
            .replication(HashMap::from([(
                "offsite-sync".to_owned(),
                ReplicationJobConfig::builder()
                    .from("primary")
                    .to("offsite")
                    .include(vec![IncludeSpecConfig::builder()
                        .backup("docs")
                        .sync_last(2)
                        .keep(vec![KeepRule::Last(14)])
                        .build()])
                    .build(),
            )]))
            .notifications(test_notifications())
            .build()
    }

    #[test]
    fn full_config_parses_from_yaml() {
        let yaml = r#"
repos:
  primary:
    address: /srv/restic
    password: store-password
    vars:
      AWS_ACCESS_KEY_ID: key-id
  offsite:
    address: s3:s3.amazonaws.com/offsite
    password: other-password
backups:
  docs:
    repo: primary
    include: [/home/docs, /etc]
    exclude: ["*.tmp"]
    keep:
      - last: 7
      - daily: 30
    pre: systemctl stop postgresql
    post: systemctl start postgresql
replication:
  offsite-sync:
    from: primary
    to: offsite
    include:
      - backup: docs
        sync_last: 2
        keep:
          - last: 14
notifications:
  type: smtp
  host: smtp.example.com
  from: restless@example.com
  to: [admin@example.com]
  username: restless
  password: mail-password
log:
  level: debug
  location: /var/log/restless.log
"#;
        let config: RestlessConfig = serde_yml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());

        let docs = &config.backups()["docs"];
        assert_eq!(docs.repo().as_ref(), "primary");
        assert_eq!(docs.keep().len(), 2);
        assert_eq!(docs.pre().as_deref(), Some("systemctl stop postgresql"));

        let sync = &config.replication()["offsite-sync"];
        assert_eq!(sync.include()[0].backup().as_ref(), "docs");
        assert_eq!(*sync.include()[0].sync_last(), 2);

        assert_eq!(config.log().level().as_ref(), "debug");
        assert_eq!(
            config.repos()["primary"].vars()["AWS_ACCESS_KEY_ID"].reveal(),
            "key-id"
        );
    }

    #[test]
    fn empty_keep_rules_are_rejected() {
        let job = BackupJobConfig::builder()
            .repo("primary")
            .include(vec![PathBuf::from("/tmp/docs")])
            .keep(vec![])
            .build();
        assert!(job.validate().is_err());
    }

    #[test]
    fn zero_sync_last_is_rejected() {
        let spec = IncludeSpecConfig::builder()
            .backup("docs")
            .sync_last(0)
            .keep(vec![KeepRule::Last(1)])
            .build();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn dangling_repo_reference_is_rejected() {
        let mut config = test_config(None, None);
        config.repos.remove("offsite");
        assert!(config.validate().is_err());
    }

    #[test]
    fn separator_in_job_name_is_rejected() {
        let mut config = test_config(None, None);
        let job = config.backups.remove("docs").unwrap();
        config.backups.insert("docs/nightly".to_owned(), job);
        assert!(config.validate().is_err());
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(test_config(None, None).validate().is_ok());
    }

    #[test]
    fn unsupported_mode_is_a_critical_config_error() {
        let err = test_config(None, None)
            .run_job("restore", "docs")
            .unwrap_err();
        match err {
            Error::UnsupportedMode { mode } => assert_eq!(mode, "restore"),
            other => panic!("expected UnsupportedMode, got {other}"),
        }
    }

    #[test]
    fn unknown_job_name_is_reported_with_its_mode() {
        let err = test_config(None, None)
            .run_job("backup", "missing")
            .unwrap_err();
        match err {
            Error::UnknownJob { name, mode } => {
                assert_eq!(name, "missing");
                assert_eq!(mode, "backup");
            }
            other => panic!("expected UnknownJob, got {other}"),
        }
    }

    #[test]
    fn absent_hooks_are_silent_no_ops() {
        let job = docs_job(None, None);
        assert!(job.run_hook("docs", HookStage::Pre).is_ok());
        assert!(job.run_hook("docs", HookStage::Post).is_ok());

        let blank = docs_job(Some("   "), None);
        assert!(blank.run_hook("docs", HookStage::Pre).is_ok());
    }

    #[test]
    fn failing_pre_hook_aborts_the_job() {
        let config = test_config(Some("false"), None);
        let err = config.run_job("backup", "docs").unwrap_err();
        match err {
            Error::HookFailed { job, stage, .. } => {
                assert_eq!(job, "docs");
                assert_eq!(stage, HookStage::Pre);
            }
            other => panic!("expected HookFailed, got {other}"),
        }
    }

    #[test]
    #[cfg(unix)]
    fn store_is_driven_in_stage_order() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let calls = dir.path().join("calls.log");
        let listing = dir.path().join("snapshots.json");
        let script = dir.path().join("restic");
        std::fs::write(
            &script,
            concat!(
                "#!/bin/sh\n",
                "printf '%s\\n' \"$*\" >> \"$RESTLESS_TEST_CALLS\"\n",
                "if [ \"$1\" = snapshots ]; then cat \"$RESTLESS_TEST_SNAPSHOTS\"; fi\n",
                "exit 0\n",
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        std::env::set_var("RESTLESS_TEST_CALLS", &calls);
        std::env::set_var("RESTLESS_TEST_SNAPSHOTS", &listing);
        let ambient_path = std::env::var("PATH").unwrap_or_default();
        std::env::set_var(
            "PATH",
            format!("{}:{ambient_path}", dir.path().display()),
        );

        let config = test_config(
            Some("printf 'hook-pre\\n' >> \"$RESTLESS_TEST_CALLS\""),
            Some("printf 'hook-post\\n' >> \"$RESTLESS_TEST_CALLS\""),
        );

        // Backup: pre hook, init, backup, forget, post hook.
        std::fs::write(&calls, "").unwrap();
        config.run_job("backup", "docs").unwrap();
        let recorded = std::fs::read_to_string(&calls).unwrap();
        assert_eq!(
            recorded.lines().collect::<Vec<_>>(),
            vec![
                "hook-pre",
                "init --repo /srv/restless-primary",
                "backup /tmp/docs --repo /srv/restless-primary --tag restless/docs --exclude *.tmp",
                "forget --prune --group-by host --repo /srv/restless-primary --tag restless/docs --keep-last 7",
                "hook-post",
            ]
        );

        // Replication: init source, list, init destination, copy the last
        // two short ids, forget on the destination.
        std::fs::write(
            &listing,
            r#"[
                {"id": "x1-full", "short_id": "x1", "tags": ["restless/docs"], "hostname": "atlas", "time": "2024-05-01T01:00:00Z"},
                {"id": "x2-full", "short_id": "x2", "tags": ["restless/docs"], "hostname": "atlas", "time": "2024-05-01T02:00:00Z"},
                {"id": "x3-full", "short_id": "x3", "tags": ["restless/docs"], "hostname": "atlas", "time": "2024-05-01T03:00:00Z"}
            ]"#,
        )
        .unwrap();
        std::fs::write(&calls, "").unwrap();
        config.run_job("replication", "offsite-sync").unwrap();
        let recorded = std::fs::read_to_string(&calls).unwrap();
        assert_eq!(
            recorded.lines().collect::<Vec<_>>(),
            vec![
                "init --repo /srv/restless-primary",
                "snapshots --json --repo /srv/restless-primary --tag restless/docs",
                "init --repo /srv/restless-offsite",
                "copy --from-repo /srv/restless-primary --repo /srv/restless-offsite x2 x3",
                "forget --prune --group-by host --repo /srv/restless-offsite --tag restless/docs --keep-last 14",
            ]
        );

        // Empty selection: the copy stage is skipped entirely.
        std::fs::write(&listing, "[]").unwrap();
        std::fs::write(&calls, "").unwrap();
        config.run_job("replication", "offsite-sync").unwrap();
        let recorded = std::fs::read_to_string(&calls).unwrap();
        assert!(recorded.lines().all(|line| !line.starts_with("copy")));
        assert!(recorded
            .lines()
            .any(|line| line.starts_with("forget") && line.contains("/srv/restless-offsite")));
    }
}
