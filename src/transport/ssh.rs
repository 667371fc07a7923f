// src/transport/ssh.rs

//! Remote execution through the system `ssh` client.
//!
//! The client runs in batch mode (no prompts) with keep-alives, so a dead
//! link surfaces as a process failure instead of a hang. Killing the local
//! `ssh` process tears the session down.

use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

use crate::errors::{DutrunError, Result};
use crate::transport::{ProcessSpec, Transport, shell_quote};

pub const PROTO: &str = "ssh";

const DEFAULT_PORT: u16 = 22;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshOptions {
    pub host: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub identity_file: Option<String>,
    /// Seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

impl SshOptions {
    pub fn decode(options: &Value) -> Result<Self> {
        let opts: SshOptions = serde_json::from_value(options.clone())
            .map_err(|e| DutrunError::Transport(format!("ssh options: {e}")))?;
        if opts.host.trim().is_empty() {
            return Err(DutrunError::Transport("ssh options: empty host".to_string()));
        }
        Ok(opts)
    }
}

#[derive(Debug, Clone)]
pub struct SshTransport {
    options: SshOptions,
}

impl SshTransport {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    fn destination(&self) -> String {
        match &self.options.user {
            Some(user) => format!("{}@{}", user, self.options.host),
            None => self.options.host.clone(),
        }
    }

    /// Remote command line, quoted for the remote login shell.
    fn remote_command(spec: &ProcessSpec) -> String {
        let mut words = Vec::with_capacity(spec.args.len() + 1);
        words.push(shell_quote(&spec.executable));
        words.extend(spec.args.iter().map(|a| shell_quote(a)));
        let line = words.join(" ");
        match &spec.working_dir {
            Some(dir) => format!("cd {} && {}", shell_quote(dir), line),
            None => line,
        }
    }

    pub(crate) fn build_args(&self, spec: &ProcessSpec) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(identity_file) = &self.options.identity_file {
            args.push("-i".to_string());
            args.push(identity_file.clone());
        }

        if self.options.port != DEFAULT_PORT {
            args.push("-p".to_string());
            args.push(self.options.port.to_string());
        }

        args.extend([
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.options.connect_timeout),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
            "-o".to_string(),
            "ServerAliveCountMax=3".to_string(),
        ]);

        args.push(self.destination());
        args.push("--".to_string());
        args.push(Self::remote_command(spec));
        args
    }
}

impl Transport for SshTransport {
    fn name(&self) -> &'static str {
        PROTO
    }

    fn command(&self, spec: &ProcessSpec) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(self.build_args(spec));
        cmd
    }
}
