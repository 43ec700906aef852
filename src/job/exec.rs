//! Blocking subprocess execution with a per-invocation environment overlay.

use crate::job::result_error::error::Error;
use crate::job::result_error::result::Result;
use bon::Builder;
use getset::Getters;
use itertools::Itertools;
use std::process::{Command, Stdio};
use tracing::{debug, error, info};

/// Captured output of one finished invocation.
#[derive(Clone, Debug, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Both streams as one block, stdout first, for logs and notifications.
    pub fn combined(&self) -> String {
        let mut text = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&self.stderr);
        }
        text
    }
}

/// One external command plus the environment overlay scoped to it.
///
/// The overlay is merged over the ambient environment for this single spawn
/// and nowhere else; nothing here mutates process-global state, so
/// credentials cannot bleed into unrelated invocations. There is
/// deliberately no `Debug` impl: `env` holds revealed secrets.
#[derive(Builder, Getters)]
#[getset(get = "pub")]
pub struct Invocation {
    #[builder(into)]
    program: String,
    #[builder(default)]
    args: Vec<String>,
    #[builder(default)]
    env: Vec<(String, String)>,
}

impl Invocation {
    /// The loggable command line: program and args, never the overlay.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .join(" ")
    }

    /// Runs the command to completion, capturing stdout and stderr.
    ///
    /// A non-zero exit becomes [`Error::CommandFailed`] carrying the
    /// combined captured output; the caller classifies whether that is
    /// fatal. Spawn problems surface as [`Error::Io`].
    pub fn run(&self) -> Result<CommandOutput> {
        info!("running: {}", self.command_line());
        debug!(
            "overlay vars: [{}]",
            self.env.iter().map(|(key, _)| key.as_str()).join(", ")
        );

        let output = Command::new(&self.program)
            .args(&self.args)
            .envs(self.env.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null())
            .output()?;

        let captured = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if output.status.success() {
            debug!("{}", captured.combined());
            Ok(captured)
        } else {
            error!(
                "command failed: {}\n{}",
                self.command_line(),
                captured.combined()
            );
            Err(Error::CommandFailed {
                command: self.command_line(),
                output: captured.combined(),
            })
        }
    }
}

/// Runs one hook line through the shell.
pub fn run_shell(command: &str) -> Result<CommandOutput> {
    Invocation::builder()
        .program("sh")
        .args(vec!["-c".to_owned(), command.to_owned()])
        .build()
        .run()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_command_captures_stdout() {
        let out = run_shell("echo hello").unwrap();
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn overlay_is_visible_to_the_child() {
        let out = Invocation::builder()
            .program("sh")
            .args(vec![
                "-c".to_owned(),
                "printf %s \"$RESTLESS_OVERLAY_VAR\"".to_owned(),
            ])
            .env(vec![(
                "RESTLESS_OVERLAY_VAR".to_owned(),
                "overlay-value".to_owned(),
            )])
            .build()
            .run()
            .unwrap();
        assert_eq!(out.stdout, "overlay-value");
    }

    #[test]
    fn overlay_does_not_leak_into_later_invocations() {
        Invocation::builder()
            .program("true")
            .env(vec![(
                "RESTLESS_LEAK_VAR".to_owned(),
                "should-not-leak".to_owned(),
            )])
            .build()
            .run()
            .unwrap();

        let out = run_shell("printf %s \"${RESTLESS_LEAK_VAR:-unset}\"").unwrap();
        assert_eq!(out.stdout, "unset");
    }

    #[test]
    fn non_zero_exit_reports_command_failed_with_output() {
        let err = run_shell("echo oops; exit 3").unwrap_err();
        match err {
            Error::CommandFailed { output, .. } => assert!(output.contains("oops")),
            other => panic!("expected CommandFailed, got {other}"),
        }
    }

    #[test]
    fn stderr_is_part_of_the_captured_output() {
        let err = run_shell("echo to-stderr 1>&2; exit 1").unwrap_err();
        match err {
            Error::CommandFailed { output, .. } => assert!(output.contains("to-stderr")),
            other => panic!("expected CommandFailed, got {other}"),
        }
    }

    #[test]
    fn missing_program_is_an_io_error() {
        let err = Invocation::builder()
            .program("restless-no-such-program")
            .build()
            .run()
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn combined_output_orders_stdout_first() {
        let output = CommandOutput {
            stdout: "out".to_owned(),
            stderr: "err".to_owned(),
        };
        assert_eq!(output.combined(), "out\nerr");
    }
}
