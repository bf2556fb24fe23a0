//! SSH execution primitives for driving component processes.
//!
//! Uses `tokio::process::Command` to shell out to `ssh`. Keys must be
//! pre-configured for the component hosts; the session runs in batch mode.

use chaos_core::TaskError;
use chaos_types::Host;
use thiserror::Error;

/// Errors from SSH operations.
#[derive(Debug, Error)]
pub enum SshError {
    /// SSH command failed to execute (process spawn error).
    #[error("ssh spawn error: {0}")]
    Spawn(#[from] std::io::Error),

    /// SSH command returned non-zero exit code.
    #[error("ssh command failed on {host}: exit={exit_code}, stderr={stderr}")]
    CommandFailed {
        /// Target host.
        host: String,
        /// Exit code.
        exit_code: i32,
        /// Standard error output.
        stderr: String,
    },

    /// The ssh process was killed by a signal.
    #[error("ssh to {host} killed by signal")]
    Interrupted {
        /// Target host.
        host: String,
    },
}

impl From<SshError> for TaskError {
    fn from(err: SshError) -> Self {
        match err {
            SshError::Spawn(e) => TaskError::Transport(e.to_string()),
            SshError::Interrupted { host } => TaskError::Cancelled(format!("ssh to {}", host)),
            other => TaskError::other(other),
        }
    }
}

/// Result of executing a command via SSH.
#[derive(Debug, Clone)]
pub struct SshResult {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Exit code (0 = success).
    pub exit_code: i32,
}

impl SshResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A host reachable over SSH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    /// Host address.
    pub host: String,
    /// SSH username.
    pub user: String,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl SshTarget {
    /// Target for a component host.
    pub fn for_host(host: &Host, connect_timeout_secs: u64) -> Self {
        Self {
            host: host.address.clone(),
            user: host.user.clone(),
            connect_timeout_secs,
        }
    }

    /// Arguments passed to `ssh` to run `cmd`.
    pub fn ssh_args(&self, cmd: &str) -> Vec<String> {
        vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            format!("{}@{}", self.user, self.host),
            cmd.to_string(),
        ]
    }

    /// Execute a command on the remote machine via SSH.
    ///
    /// Returns the raw result including exit code, stdout, and stderr.
    /// Does NOT fail on non-zero exit; use `exec_ok` for that.
    pub async fn exec(&self, cmd: &str) -> Result<SshResult, SshError> {
        let output = tokio::process::Command::new("ssh")
            .args(self.ssh_args(cmd))
            .kill_on_drop(true)
            .output()
            .await?;

        // No exit code means a signal ended ssh, e.g. ctrl-c on our process group
        let exit_code = output.status.code().ok_or_else(|| SshError::Interrupted {
            host: self.host.clone(),
        })?;
        Ok(SshResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code,
        })
    }

    /// Execute a command on the remote machine, failing on non-zero exit.
    pub async fn exec_ok(&self, cmd: &str) -> Result<SshResult, SshError> {
        let result = self.exec(cmd).await?;
        if !result.success() {
            return Err(SshError::CommandFailed {
                host: self.host.clone(),
                exit_code: result.exit_code,
                stderr: result.stderr.trim().to_string(),
            });
        }
        Ok(result)
    }
}
