//! SSH command runner built on the system `ssh` client.
//!
//! Key-based logins call `ssh` directly in batch mode. Password logins go
//! through `sshpass -e`, which reads the password from `SSHPASS` so it never
//! appears on a command line.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::CommandRunner;
use super::error::{RemoteError, Result};

/// Default SSH connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where and how to log in.
#[derive(Clone)]
pub struct SshTarget {
    pub host: String,
    pub username: String,
    pub port: Option<u16>,
    pub password: Option<String>,
    pub private_key: Option<PathBuf>,
    pub connect_timeout: Duration,
}

impl SshTarget {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            port: None,
            password: None,
            private_key: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    pub fn with_private_key(mut self, key: Option<PathBuf>) -> Self {
        self.private_key = key;
        self
    }

    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    fn uses_password(&self) -> bool {
        self.private_key.is_none() && self.password.is_some()
    }
}

impl fmt::Debug for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshTarget")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("private_key", &self.private_key)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Runs commands on one host over SSH.
#[derive(Debug, Clone)]
pub struct SshRunner {
    target: SshTarget,
}

impl SshRunner {
    pub fn new(target: SshTarget) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &SshTarget {
        &self.target
    }

    fn program(&self) -> &'static str {
        if self.target.uses_password() {
            "sshpass"
        } else {
            "ssh"
        }
    }

    fn build_command(&self, remote_cmd: &str) -> Command {
        let target = &self.target;
        let mut cmd = Command::new(self.program());

        if let (true, Some(password)) = (target.uses_password(), &target.password) {
            cmd.arg("-e").arg("ssh").env("SSHPASS", password);
        } else {
            cmd.arg("-o").arg("BatchMode=yes");
        }

        cmd.arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-o")
            .arg("UserKnownHostsFile=/dev/null")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", target.connect_timeout.as_secs().max(1)));
        if let Some(port) = target.port {
            cmd.arg("-p").arg(port.to_string());
        }
        if let Some(key) = &target.private_key {
            cmd.arg("-i").arg(key);
        }
        cmd.arg("-l").arg(&target.username).arg(&target.host).arg(remote_cmd);

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl CommandRunner for SshRunner {
    async fn execute(&self, command: &str) -> Result<String> {
        debug!(host = %self.target.host, "Executing remote command");

        let output = self
            .build_command(command)
            .output()
            .await
            .map_err(|source| RemoteError::Spawn {
                program: self.program().to_string(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        warn!(
            host = %self.target.host,
            exit_code = ?output.status.code(),
            stderr = %stderr.trim(),
            "Remote command failed"
        );
        Err(RemoteError::CommandFailed {
            command: command.to_string(),
            exit_code: output.status.code(),
            stdout,
            stderr,
        })
    }
}
