//! External transform (ETL) command runner.
//!
//! Runs one configured command as a subprocess, capturing exit code and
//! output under a hard time limit. On Unix the child leads its own
//! process group and the whole group is killed when the limit elapses,
//! so background jobs of a shell line die with it. A run abandoned by
//! its caller only kills the direct child.

use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::core::pipeline::Reportable;
use crate::core::safety::{truncate_chars, MAX_CAPTURED_OUTPUT};
use crate::core::StepError;
use crate::domain::{StepDetail, StepKind, StepOutcome};

/// Default transform time limit in seconds
pub const DEFAULT_TRANSFORM_TIMEOUT_SECS: u64 = 120;

/// Exit status shells use for "command not found"
const SHELL_NOT_FOUND: i32 = 127;

/// How the transform is invoked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransformCommand {
    /// A command line handed to the platform shell
    Shell(String),

    /// A program and its arguments, run without a shell
    Program { program: String, args: Vec<String> },
}

impl TransformCommand {
    fn display(&self) -> String {
        match self {
            TransformCommand::Shell(line) => line.clone(),
            TransformCommand::Program { program, args } if args.is_empty() => program.clone(),
            TransformCommand::Program { program, args } => format!("{} {}", program, args.join(" ")),
        }
    }

    fn build(&self) -> Command {
        match self {
            TransformCommand::Shell(line) => {
                if cfg!(windows) {
                    let mut command = Command::new("cmd");
                    command.args(["/C", line]);
                    command
                } else {
                    let mut command = Command::new("sh");
                    command.args(["-c", line]);
                    command
                }
            }
            TransformCommand::Program { program, args } => {
                let mut command = Command::new(program);
                command.args(args);
                command
            }
        }
    }
}

/// Captured result of a successful transform
#[derive(Debug, Clone)]
pub struct TransformResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl Reportable for TransformResult {
    fn outcome(&self) -> StepOutcome {
        StepOutcome::ok(
            StepKind::Transform,
            format!("Transform completed in {:.1}s", self.elapsed.as_secs_f64()),
        )
        .with_detail(StepDetail::Transform {
            exit_code: Some(self.exit_code),
            stdout: (!self.stdout.is_empty()).then(|| self.stdout.clone()),
            stderr: (!self.stderr.is_empty()).then(|| self.stderr.clone()),
            elapsed_ms: self.elapsed.as_millis() as u64,
        })
    }
}

/// Runs the configured transform command
#[derive(Debug, Clone)]
pub struct TransformExecutor {
    command: TransformCommand,
    time_limit: Duration,
}

impl TransformExecutor {
    pub fn new(command: TransformCommand) -> Self {
        Self {
            command,
            time_limit: Duration::from_secs(DEFAULT_TRANSFORM_TIMEOUT_SECS),
        }
    }

    /// Shorthand for a shell command line
    pub fn shell(line: impl Into<String>) -> Self {
        Self::new(TransformCommand::Shell(line.into()))
    }

    pub fn with_timeout(mut self, time_limit: Duration) -> Self {
        self.time_limit = time_limit;
        self
    }

    pub fn command(&self) -> &TransformCommand {
        &self.command
    }

    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    /// Run the command to completion or until the time limit elapses
    pub async fn run(&self) -> Result<TransformResult, StepError> {
        let command_line = self.command.display();
        info!(command = %command_line, limit_secs = self.time_limit.as_secs(), "Running transform");

        let started = Instant::now();
        let mut command = self.command.build();
        #[cfg(unix)]
        command.process_group(0);

        let child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => StepError::TransformNotFound {
                    command: command_line.clone(),
                },
                _ => StepError::io(format!("Failed to spawn transform \"{}\"", command_line), e),
            })?;

        let pid = child.id();

        // Dropping the future on timeout drops the child, which kills it
        let output = match timeout(self.time_limit, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| StepError::io("Failed to wait for transform", e))?,
            Err(_) => {
                warn!(command = %command_line, "Transform timed out");
                kill_process_group(pid).await;
                return Err(StepError::TransformTimeout {
                    seconds: self.time_limit.as_secs(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }
        };

        let elapsed = started.elapsed();
        let stdout = truncate_chars(String::from_utf8_lossy(&output.stdout).trim(), MAX_CAPTURED_OUTPUT);
        let stderr = truncate_chars(String::from_utf8_lossy(&output.stderr).trim(), MAX_CAPTURED_OUTPUT);

        match output.status.code() {
            Some(0) => {
                debug!(elapsed_ms = elapsed.as_millis() as u64, "Transform succeeded");
                Ok(TransformResult {
                    exit_code: 0,
                    stdout,
                    stderr,
                    elapsed,
                })
            }
            Some(SHELL_NOT_FOUND) if matches!(self.command, TransformCommand::Shell(_)) => {
                Err(StepError::TransformNotFound { command: command_line })
            }
            exit_code => Err(StepError::TransformFailed {
                exit_code,
                stdout,
                stderr,
                elapsed_ms: elapsed.as_millis() as u64,
            }),
        }
    }

    /// Check the program can be spawned at all.
    ///
    /// Shell command lines are not probed.
    pub fn health_check(&self) -> anyhow::Result<()> {
        if let TransformCommand::Program { program, .. } = &self.command {
            let path = std::path::Path::new(program);
            if path.components().count() > 1 && !path.is_file() {
                anyhow::bail!("Transform program does not exist: {}", program);
            }
        }
        Ok(())
    }
}

/// Kill every process in the group led by `pid`
#[cfg(unix)]
async fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };

    let killed = Command::new("kill")
        .args(["-KILL", "--", &format!("-{}", pid)])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match killed {
        Ok(status) if status.success() => debug!(pid, "Killed transform process group"),
        Ok(status) => debug!(pid, %status, "Transform process group already gone"),
        Err(e) => warn!(pid, error = %e, "Failed to kill transform process group"),
    }
}

#[cfg(not(unix))]
async fn kill_process_group(_pid: Option<u32>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FailureKind;

    #[test]
    fn test_command_deserializes_both_forms() {
        let shell: TransformCommand = serde_yaml::from_str("\"etl --run\"").unwrap();
        assert_eq!(shell, TransformCommand::Shell("etl --run".to_string()));

        let program: TransformCommand =
            serde_yaml::from_str("program: /opt/etl/run\nargs: [\"--job\", \"orders\"]").unwrap();
        assert_eq!(program.display(), "/opt/etl/run --job orders");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_success_captures_output() {
        let result = TransformExecutor::shell("echo converted").run().await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "converted");
        assert_eq!(result.outcome().kind, StepKind::Transform);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let err = TransformExecutor::shell("echo broken >&2; exit 3")
            .run()
            .await
            .unwrap_err();

        match err {
            StepError::TransformFailed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_command_is_distinct() {
        let shell = TransformExecutor::shell("definitely-not-a-real-etl-binary")
            .run()
            .await
            .unwrap_err();
        assert!(matches!(shell, StepError::TransformNotFound { .. }));

        let program = TransformExecutor::new(TransformCommand::Program {
            program: "/nonexistent/etl".to_string(),
            args: vec!["--job".to_string(), "orders".to_string()],
        })
        .run()
        .await
        .unwrap_err();
        assert_eq!(program.kind(), FailureKind::ExternalProcess);
        match program {
            StepError::TransformNotFound { command } => {
                assert_eq!(command, "/nonexistent/etl --job orders")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_exit_127_names_command_line() {
        let err = TransformExecutor::shell("no-such-etl-tool --all")
            .run()
            .await
            .unwrap_err();
        match err {
            StepError::TransformNotFound { command } => assert_eq!(command, "no-such-etl-tool --all"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_background_jobs() {
        let temp = tempfile::TempDir::new().unwrap();
        let pid_file = temp.path().join("job.pid");
        let line = format!("sleep 30 & echo $! > '{}'; wait", pid_file.display());

        let err = TransformExecutor::shell(line)
            .with_timeout(Duration::from_secs(1))
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::TransformTimeout { .. }));

        tokio::time::sleep(Duration::from_millis(300)).await;
        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let alive = std::fs::read_to_string(format!("/proc/{}/stat", pid.trim()))
            .ok()
            .and_then(|stat| stat.rsplit_once(") ").map(|(_, rest)| rest.to_string()))
            .map_or(false, |rest| !rest.starts_with('Z') && !rest.starts_with('X'));
        assert!(!alive, "background job {} survived the timeout", pid.trim());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_is_truncated() {
        let result = TransformExecutor::shell("head -c 2000 /dev/zero | tr '\\0' 'x'")
            .run()
            .await
            .unwrap();
        assert_eq!(result.stdout.chars().count(), MAX_CAPTURED_OUTPUT);
    }
}
