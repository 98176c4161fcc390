// Copyright 2025 Neutree Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Remote command execution for node probes.
//!
//! Every probe runs `uptime` first. If that fails the node is unreachable and
//! the caller gets [`Error::ConnectionFailed`]; a failure of the real command
//! after that is [`Error::CommandFailed`]. Discovery code relies on the two
//! being distinct.

use crate::types::v1::cluster::SshAuth;
use async_trait::async_trait;
use base64::Engine as _;
use snafu::{ResultExt, Snafu};
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::debug;

const LIVENESS_COMMAND: &str = "uptime";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("invalid ssh private key encoding: {}", source))]
    InvalidKey { source: base64::DecodeError },

    #[snafu(display("failed to write ssh key file: {}", source))]
    KeyFile { source: std::io::Error },

    #[snafu(display("failed to spawn ssh: {}", source))]
    Spawn { source: std::io::Error },

    #[snafu(display("connection to {} failed: {}", node_ip, message))]
    ConnectionFailed { node_ip: String, message: String },

    #[snafu(display(
        "command '{}' on {} exited with {:?}: {}",
        command,
        node_ip,
        code,
        stderr
    ))]
    CommandFailed {
        node_ip: String,
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

impl Error {
    /// The node could not be reached. Worth retrying.
    pub fn is_connection_failed(&self) -> bool {
        matches!(self, Error::ConnectionFailed { .. })
    }

    /// The node was reached but the command itself failed.
    pub fn is_command_failed(&self) -> bool {
        matches!(self, Error::CommandFailed { .. })
    }
}

/// Runs a shell command on a node and returns its stdout.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, node_ip: &str, auth: &SshAuth, command: &str) -> Result<String, Error>;
}

/// [`CommandRunner`] backed by the system `ssh` binary.
#[derive(Clone, Debug)]
pub struct SshRunner {
    connect_timeout: Duration,
}

impl Default for SshRunner {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl SshRunner {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn exec(
        &self,
        key_file: &Path,
        node_ip: &str,
        auth: &SshAuth,
        command: &str,
    ) -> Result<std::process::Output, Error> {
        let args = ssh_args(key_file, &auth.ssh_user, node_ip, self.connect_timeout);
        debug!(node_ip = %node_ip, command = %command, "running remote command");

        Command::new("ssh")
            .args(&args)
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .context(SpawnSnafu)
    }
}

#[async_trait]
impl CommandRunner for SshRunner {
    async fn run(&self, node_ip: &str, auth: &SshAuth, command: &str) -> Result<String, Error> {
        // Removed when dropped, on every return path.
        let key_file = write_key_file(&auth.ssh_private_key)?;

        let liveness = self
            .exec(key_file.path(), node_ip, auth, LIVENESS_COMMAND)
            .await?;
        if !liveness.status.success() {
            return ConnectionFailedSnafu {
                node_ip,
                message: String::from_utf8_lossy(&liveness.stderr).trim().to_owned(),
            }
            .fail();
        }

        let output = self.exec(key_file.path(), node_ip, auth, command).await?;
        if !output.status.success() {
            return CommandFailedSnafu {
                node_ip,
                command,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            }
            .fail();
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Options shared by every invocation: no host-key pinning, only the given
/// identity, and keepalives every 5s with at most 3 missed.
fn ssh_args(key_file: &Path, user: &str, node_ip: &str, connect_timeout: Duration) -> Vec<String> {
    vec![
        "-o".to_owned(),
        "StrictHostKeyChecking=no".to_owned(),
        "-o".to_owned(),
        "UserKnownHostsFile=/dev/null".to_owned(),
        "-o".to_owned(),
        "IdentitiesOnly=yes".to_owned(),
        "-o".to_owned(),
        "ServerAliveInterval=5".to_owned(),
        "-o".to_owned(),
        "ServerAliveCountMax=3".to_owned(),
        "-o".to_owned(),
        format!("ConnectTimeout={}", connect_timeout.as_secs().max(1)),
        "-o".to_owned(),
        "LogLevel=ERROR".to_owned(),
        "-i".to_owned(),
        key_file.to_string_lossy().into_owned(),
        format!("{user}@{node_ip}"),
    ]
}

/// Decodes the base64 key into a fresh 0600 temp file.
fn write_key_file(encoded: &str) -> Result<NamedTempFile, Error> {
    let mut key = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .context(InvalidKeySnafu)?;
    if !key.ends_with(b"\n") {
        key.push(b'\n');
    }

    let mut file = NamedTempFile::new().context(KeyFileSnafu)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600))
            .context(KeyFileSnafu)?;
    }

    file.write_all(&key).context(KeyFileSnafu)?;
    file.flush().context(KeyFileSnafu)?;
    Ok(file)
}
