use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Output and status of one command execution.
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Executes external commands under allow/deny checks with a per-call
/// timeout. Process-level failures (spawn, timeout, cancellation) surface
/// as errors; completed processes return their real exit code.
#[derive(Debug, Clone)]
pub struct Terminal {
    pub working_dir: String,
    pub allowed: Vec<String>,
    pub denied: Vec<String>,
    pub timeout: Duration,
    pub allow_execution: bool,
}

impl Terminal {
    pub async fn exec(
        &self,
        cancel: &CancellationToken,
        command: &str,
        args: &[String],
    ) -> anyhow::Result<ExecResult> {
        if !self.allow_execution {
            bail!("execution disabled by configuration");
        }
        if command.is_empty() {
            bail!("command is required");
        }
        self.validate_command(command)?;

        let timeout = if self.timeout.is_zero() {
            Duration::from_secs(30)
        } else {
            self.timeout
        };

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !self.working_dir.is_empty() {
            cmd.current_dir(&self.working_dir);
        }

        let output = tokio::select! {
            out = cmd.output() => {
                out.with_context(|| format!("failed to execute {command:?}"))?
            }
            _ = tokio::time::sleep(timeout) => {
                return Err(anyhow!("command {command:?} timed out after {}s", timeout.as_secs()));
            }
            _ = cancel.cancelled() => {
                return Err(anyhow!("cancelled"));
            }
        };

        Ok(ExecResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    fn validate_command(&self, command: &str) -> anyhow::Result<()> {
        let lower = command.to_lowercase();
        if self.denied.iter().any(|d| d.to_lowercase() == lower) {
            bail!("command {command:?} is denied");
        }
        if !self.allowed.is_empty()
            && !self.allowed.iter().any(|a| a.to_lowercase() == lower)
        {
            bail!("command {command:?} is not in allowlist");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terminal() -> Terminal {
        Terminal {
            working_dir: String::new(),
            allowed: Vec::new(),
            denied: Vec::new(),
            timeout: Duration::from_secs(5),
            allow_execution: true,
        }
    }

    #[tokio::test]
    async fn captures_stdout_and_zero_exit() {
        let t = terminal();
        let res = t
            .exec(&CancellationToken::new(), "echo", &["hi".to_string()])
            .await
            .expect("exec");
        assert_eq!(res.stdout.trim(), "hi");
        assert_eq!(res.exit_code, 0);
    }

    #[tokio::test]
    async fn nonzero_exit_reported_with_real_code() {
        let t = terminal();
        let res = t
            .exec(
                &CancellationToken::new(),
                "sh",
                &["-c".to_string(), "echo oops >&2; exit 3".to_string()],
            )
            .await
            .expect("exec");
        assert_eq!(res.exit_code, 3);
        assert!(res.stderr.contains("oops"));
    }

    #[tokio::test]
    async fn disabled_execution_rejected() {
        let mut t = terminal();
        t.allow_execution = false;
        let err = t
            .exec(&CancellationToken::new(), "echo", &[])
            .await
            .expect_err("should fail");
        assert!(err.to_string().contains("disabled"));
    }

    #[tokio::test]
    async fn denied_command_rejected_case_insensitively() {
        let mut t = terminal();
        t.denied = vec!["CURL".to_string()];
        let err = t
            .exec(&CancellationToken::new(), "curl", &[])
            .await
            .expect_err("should fail");
        assert!(err.to_string().contains("denied"));
    }

    #[tokio::test]
    async fn allowlist_blocks_unlisted_commands() {
        let mut t = terminal();
        t.allowed = vec!["echo".to_string()];
        assert!(t
            .exec(&CancellationToken::new(), "echo", &[])
            .await
            .is_ok());
        let err = t
            .exec(&CancellationToken::new(), "ls", &[])
            .await
            .expect_err("should fail");
        assert!(err.to_string().contains("allowlist"));
    }

    #[tokio::test]
    async fn deny_takes_precedence_over_allow() {
        let mut t = terminal();
        t.allowed = vec!["echo".to_string()];
        t.denied = vec!["echo".to_string()];
        assert!(t
            .exec(&CancellationToken::new(), "echo", &[])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn timeout_kills_long_running_command() {
        let mut t = terminal();
        t.timeout = Duration::from_millis(100);
        let err = t
            .exec(
                &CancellationToken::new(),
                "sleep",
                &["5".to_string()],
            )
            .await
            .expect_err("should time out");
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn cancellation_interrupts_execution() {
        let t = terminal();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = t
            .exec(&cancel, "sleep", &["5".to_string()])
            .await
            .expect_err("should cancel");
        assert!(err.to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let t = terminal();
        assert!(t
            .exec(&CancellationToken::new(), "definitely-not-a-binary", &[])
            .await
            .is_err());
    }
}
