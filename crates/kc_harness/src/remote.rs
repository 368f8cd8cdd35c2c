//! Shell and file primitives for the node a service runs on.
//!
//! [`RemoteNode`] is the seam between the service controller and the machine
//! it drives. [`SshNode`] reaches a test host through the `ssh`/`scp` client
//! binaries; [`LocalNode`] runs everything on this machine through `sh -c`.

use crate::error::{HarnessError, Result};
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::debug;

/// Primitives a service controller needs from its node.
///
/// Every command runs to completion before returning; a non-zero exit status
/// surfaces as [`HarnessError::Remote`].
pub trait RemoteNode {
    /// Human-readable node name used in logs.
    fn name(&self) -> &str;

    /// Network name other hosts use to reach this node.
    fn hostname(&self) -> &str;

    /// Run a shell command on the node.
    fn ssh(&self, cmd: &str) -> Result<()>;

    /// Run a shell command on the node and return its stdout.
    fn ssh_output(&self, cmd: &str) -> Result<String>;

    /// Copy a local file to a path on the node.
    fn copy_to(&self, local: &Path, remote: &str) -> Result<()>;

    /// Copy a file on the node to a local path.
    fn copy_from(&self, remote: &str, local: &Path) -> Result<()>;

    /// Create a directory and its parents on the node.
    fn mkdirs(&self, path: &str) -> Result<()> {
        self.ssh(&format!("mkdir -p {}", shell_quote(path)?))
    }

    /// Current size of a file on the node, in bytes.
    fn file_size(&self, path: &str) -> Result<u64> {
        let cmd = format!("wc -c < {}", shell_quote(path)?);
        let out = self.ssh_output(&cmd)?;
        out.trim().parse::<u64>().map_err(|_| HarnessError::Remote {
            command: cmd,
            status: Some(0),
            stderr: format!("unexpected output: {}", out.trim()),
        })
    }

    /// Contents of a file on the node starting at a byte offset.
    fn read_from(&self, path: &str, offset: u64) -> Result<String> {
        self.ssh_output(&format!("tail -c +{} {}", offset + 1, shell_quote(path)?))
    }

    /// Process ids of JVMs whose command line contains `marker`.
    fn java_pids(&self, marker: &str) -> Result<Vec<u32>> {
        let cmd = format!(
            "ps ax -o pid= -o args= | grep java | grep -e {} | grep -v grep | awk '{{print $1}}'",
            shell_quote(marker)?
        );
        Ok(parse_pids(&self.ssh_output(&cmd)?))
    }
}

impl<T: RemoteNode + ?Sized> RemoteNode for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn hostname(&self) -> &str {
        (**self).hostname()
    }

    fn ssh(&self, cmd: &str) -> Result<()> {
        (**self).ssh(cmd)
    }

    fn ssh_output(&self, cmd: &str) -> Result<String> {
        (**self).ssh_output(cmd)
    }

    fn copy_to(&self, local: &Path, remote: &str) -> Result<()> {
        (**self).copy_to(local, remote)
    }

    fn copy_from(&self, remote: &str, local: &Path) -> Result<()> {
        (**self).copy_from(remote, local)
    }

    fn mkdirs(&self, path: &str) -> Result<()> {
        (**self).mkdirs(path)
    }

    fn file_size(&self, path: &str) -> Result<u64> {
        (**self).file_size(path)
    }

    fn read_from(&self, path: &str, offset: u64) -> Result<String> {
        (**self).read_from(path, offset)
    }

    fn java_pids(&self, marker: &str) -> Result<Vec<u32>> {
        (**self).java_pids(marker)
    }
}

/// Quote a value for interpolation into a POSIX shell command.
pub fn shell_quote(value: &str) -> Result<String> {
    shlex::try_quote(value)
        .map(|quoted| quoted.into_owned())
        .map_err(|e| HarnessError::InvalidInput(format!("cannot quote {:?}: {}", value, e)))
}

pub(crate) fn parse_pids(output: &str) -> Vec<u32> {
    output
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .collect()
}

fn run(mut command: Command, shown: &str) -> Result<Output> {
    debug!("Running: {}", shown);
    let output = command.output()?;
    if !output.status.success() {
        return Err(HarnessError::Remote {
            command: shown.to_string(),
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

/// A node reached over SSH with the system `ssh`/`scp` clients.
#[derive(Debug, Clone)]
pub struct SshNode {
    name: String,
    hostname: String,
    user: Option<String>,
    port: Option<u16>,
    identity_file: Option<PathBuf>,
    options: Vec<String>,
}

impl SshNode {
    /// Create a node for `hostname`, named after it.
    pub fn new(hostname: impl Into<String>) -> Self {
        let hostname = hostname.into();
        Self {
            name: hostname.clone(),
            hostname,
            user: None,
            port: None,
            identity_file: None,
            options: vec!["BatchMode=yes".to_string()],
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// Add an `-o` option passed to both `ssh` and `scp`.
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.hostname),
            None => self.hostname.clone(),
        }
    }

    fn common_args(&self, port_flag: &str) -> Vec<String> {
        let mut args = Vec::new();
        for option in &self.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        if let Some(port) = self.port {
            args.push(port_flag.to_string());
            args.push(port.to_string());
        }
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args
    }

    /// Arguments passed to `ssh` to run `remote_cmd`.
    pub fn ssh_args(&self, remote_cmd: &str) -> Vec<String> {
        let mut args = self.common_args("-p");
        args.push(self.destination());
        args.push(remote_cmd.to_string());
        args
    }

    /// Arguments passed to `scp` to copy `from` to `to`.
    pub fn scp_args(&self, from: &str, to: &str) -> Vec<String> {
        let mut args = self.common_args("-P");
        args.push(from.to_string());
        args.push(to.to_string());
        args
    }

    fn remote_spec(&self, path: &str) -> String {
        format!("{}:{}", self.destination(), path)
    }

    fn run_ssh(&self, cmd: &str) -> Result<Output> {
        let mut command = Command::new("ssh");
        command.args(self.ssh_args(cmd));
        run(command, &format!("ssh {}: {}", self.hostname, cmd))
    }

    fn run_scp(&self, from: &str, to: &str) -> Result<()> {
        let mut command = Command::new("scp");
        command.args(self.scp_args(from, to));
        run(command, &format!("scp {} {}", from, to))?;
        Ok(())
    }
}

impl RemoteNode for SshNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn hostname(&self) -> &str {
        &self.hostname
    }

    fn ssh(&self, cmd: &str) -> Result<()> {
        self.run_ssh(cmd)?;
        Ok(())
    }

    fn ssh_output(&self, cmd: &str) -> Result<String> {
        let output = self.run_ssh(cmd)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn copy_to(&self, local: &Path, remote: &str) -> Result<()> {
        self.run_scp(&local.display().to_string(), &self.remote_spec(remote))
    }

    fn copy_from(&self, remote: &str, local: &Path) -> Result<()> {
        self.run_scp(&self.remote_spec(remote), &local.display().to_string())
    }
}

/// A node that is this machine.
#[derive(Debug, Clone)]
pub struct LocalNode {
    name: String,
    hostname: String,
}

impl Default for LocalNode {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalNode {
    pub fn new() -> Self {
        Self {
            name: "local".to_string(),
            hostname: "localhost".to_string(),
        }
    }

    fn run_sh(&self, cmd: &str) -> Result<Output> {
        let mut command = Command::new("sh");
        command.arg("-c").arg(cmd);
        run(command, cmd)
    }
}

impl RemoteNode for LocalNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn hostname(&self) -> &str {
        &self.hostname
    }

    fn ssh(&self, cmd: &str) -> Result<()> {
        self.run_sh(cmd)?;
        Ok(())
    }

    fn ssh_output(&self, cmd: &str) -> Result<String> {
        let output = self.run_sh(cmd)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn copy_to(&self, local: &Path, remote: &str) -> Result<()> {
        debug!("Copying {} to {}", local.display(), remote);
        fs::copy(local, remote)?;
        Ok(())
    }

    fn copy_from(&self, remote: &str, local: &Path) -> Result<()> {
        debug!("Copying {} to {}", remote, local.display());
        fs::copy(remote, local)?;
        Ok(())
    }

    fn mkdirs(&self, path: &str) -> Result<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn file_size(&self, path: &str) -> Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn read_from(&self, path: &str, offset: u64) -> Result<String> {
        let mut file = fs::File::open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
