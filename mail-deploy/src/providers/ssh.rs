//! Remote sessions over the system OpenSSH client
//!
//! `connect` starts a ControlMaster in the background; every command and
//! upload then multiplexes over its control socket, and `close` tells the
//! master to exit.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{CommandOutput, RemoteConnector, RemoteSession};
use crate::error::{DeployError, Result};
use crate::templates::shell_quote;

/// Opens OpenSSH control-master sessions
pub struct OpenSshConnector {
    user: String,
    connect_timeout: Duration,
    control_dir: PathBuf,
}

impl OpenSshConnector {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            connect_timeout: Duration::from_secs(10),
            control_dir: std::env::temp_dir(),
        }
    }

    pub fn with_control_dir(mut self, dir: PathBuf) -> Self {
        self.control_dir = dir;
        self
    }

    fn master_args(&self, socket: &str, target: &str) -> Vec<String> {
        vec![
            "-M".to_string(),
            "-S".to_string(),
            socket.to_string(),
            "-fN".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs()),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            target.to_string(),
        ]
    }
}

#[async_trait::async_trait]
impl RemoteConnector for OpenSshConnector {
    async fn connect(&self, host: Ipv4Addr) -> Result<Box<dyn RemoteSession>> {
        let target = format!("{}@{}", self.user, host);
        let socket = self
            .control_dir
            .join(format!("mail-deploy-{}.sock", host))
            .to_string_lossy()
            .into_owned();

        debug!("Opening SSH control master to {}", target);
        let output = Command::new("ssh")
            .args(self.master_args(&socket, &target))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(DeployError::Remote(format!(
                "SSH to {} failed: {}",
                target,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        info!("SSH session established with {}", target);
        Ok(Box::new(OpenSshSession { target, socket }))
    }
}

/// Session multiplexed over a control socket
pub struct OpenSshSession {
    target: String,
    socket: String,
}

impl OpenSshSession {
    fn command(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-S")
            .arg(&self.socket)
            .arg("-o")
            .arg("BatchMode=yes")
            .arg(&self.target);
        cmd
    }
}

fn command_output(output: std::process::Output) -> CommandOutput {
    CommandOutput {
        // killed by a signal has no code
        exit_status: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }
}

#[async_trait::async_trait]
impl RemoteSession for OpenSshSession {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        debug!("[{}] $ {}", self.target, command);
        let output = self
            .command()
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        // ssh itself reports transport failures as 255
        if output.status.code() == Some(255) {
            return Err(DeployError::Remote(format!(
                "SSH transport to {} failed: {}",
                self.target,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(command_output(output))
    }

    async fn upload(&self, path: &str, content: &str) -> Result<()> {
        debug!("[{}] upload {} ({} bytes)", self.target, path, content.len());
        let mut child = self
            .command()
            .arg(format!("cat > {}", shell_quote(path)))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(content.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(DeployError::Remote(format!(
                "Upload of {} to {} failed: {}",
                path,
                self.target,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let output = Command::new("ssh")
            .arg("-S")
            .arg(&self.socket)
            .arg("-O")
            .arg("exit")
            .arg(&self.target)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            warn!(
                "SSH control master for {} did not exit cleanly: {}",
                self.target,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        info!("SSH session with {} closed", self.target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_args() {
        let connector = OpenSshConnector::new("root");
        let args = connector.master_args("/tmp/s.sock", "root@192.0.2.1");
        assert_eq!(args[0], "-M");
        assert_eq!(args[2], "/tmp/s.sock");
        assert!(args.contains(&"ConnectTimeout=10".to_string()));
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("root@192.0.2.1"));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_output_conversion() {
        use std::os::unix::process::ExitStatusExt;

        let output = std::process::Output {
            status: std::process::ExitStatus::from_raw(1 << 8),
            stdout: b"ready\n".to_vec(),
            stderr: Vec::new(),
        };
        let converted = command_output(output);
        assert_eq!(converted.exit_status, 1);
        assert_eq!(converted.stdout, "ready\n");
    }
}
