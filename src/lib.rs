//! # restless
//!
//! A driver for scheduled backup and cross-repository replication against a
//! restic-compatible snapshot store.
//!
//! ## Features
//!
//! - **Backup Jobs**: pre hook, repository init, tagged snapshot creation,
//!   retention enforcement, post hook
//! - **Replication Jobs**: select the most recent tagged snapshots of one
//!   repository and copy them into another, then enforce retention there
//! - **Credential Scoping**: repository passwords and auxiliary variables are
//!   handed to exactly one store invocation and never leak into ambient state
//! - **Failure Escalation**: the first failed stage aborts the run, sends one
//!   notification, and exits non-zero
//!
//! Each invocation runs exactly one named job from a YAML config file; the
//! surrounding scheduler (cron, systemd timers) decides when and how often.
//!
//! ## Quick Start
//!
//! ```no_run
//! use restless::job::job_config::RestlessConfig;
//!
//! let config = RestlessConfig::load("restless.yaml".as_ref())?;
//! config.run_job("backup", "documents")?;
//! # Ok::<(), restless::job::result_error::error::Error>(())
//! ```

pub mod job;
