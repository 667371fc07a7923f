// src/transport/mod.rs

//! Process execution over pluggable transports.
//!
//! A [`Transport`] only decides *how* a [`ProcessSpec`] becomes an OS
//! command: directly on this host ([`local`]) or through the system `ssh`
//! client ([`ssh`]). [`run_process`] owns everything else: piping, line
//! streaming, and killing the child when the step context is cancelled or
//! its deadline passes.

pub mod local;
pub mod ssh;

use std::fmt;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::{DutrunError, Result};
use crate::exec::{StepContext, TargetError};
use crate::expand::ParamExpander;

pub use local::LocalTransport;
pub use ssh::{SshOptions, SshTransport};

/// What to run. Interpreted by the transport, never by a shell on this host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub executable: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

impl ProcessSpec {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Expand target templates in every field.
    pub fn expand(&self, pe: &ParamExpander<'_>) -> std::result::Result<Self, TargetError> {
        let field = |s: &str| pe.expand(s).map(|c| c.into_owned()).map_err(TargetError::failed);
        Ok(Self {
            executable: field(&self.executable)?,
            args: self.args.iter().map(|a| field(a)).collect::<std::result::Result<_, _>>()?,
            working_dir: self.working_dir.as_deref().map(field).transpose()?,
        })
    }
}

/// Turns a [`ProcessSpec`] into a ready-to-spawn command.
pub trait Transport: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn command(&self, spec: &ProcessSpec) -> Command;
}

/// `transport` step parameter: `{ "proto": "ssh", "options": { ... } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    pub proto: String,
    #[serde(default)]
    pub options: Value,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            proto: local::PROTO.to_string(),
            options: Value::Null,
        }
    }
}

/// Submission-time check: known protocol and well-formed options.
pub fn validate_config(config: &TransportConfig) -> Result<()> {
    match config.proto.as_str() {
        local::PROTO => Ok(()),
        ssh::PROTO => SshOptions::decode(&config.options).map(|_| ()),
        other => Err(DutrunError::Transport(format!("unknown transport '{other}'"))),
    }
}

/// Build the transport for one target, expanding templates in its options.
pub fn from_config(config: &TransportConfig, pe: &ParamExpander<'_>) -> Result<Box<dyn Transport>> {
    match config.proto.as_str() {
        local::PROTO => Ok(Box::new(LocalTransport)),
        ssh::PROTO => {
            let options = pe
                .expand_value(&config.options)
                .map_err(|e| DutrunError::Transport(e.to_string()))?;
            Ok(Box::new(SshTransport::new(SshOptions::decode(&options)?)))
        }
        other => Err(DutrunError::Transport(format!("unknown transport '{other}'"))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Collected result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run `spec` over `transport` until it exits or `ctx` is done.
///
/// Every output line is handed to `on_line` as it arrives and is also
/// accumulated into the returned [`ProcessOutput`]. An error from `on_line`
/// aborts the run. On cancellation or timeout the child is killed and the
/// matching [`TargetError`] is returned.
pub async fn run_process<F>(
    ctx: &StepContext,
    transport: &dyn Transport,
    spec: &ProcessSpec,
    mut on_line: F,
) -> std::result::Result<ProcessOutput, TargetError>
where
    F: FnMut(OutputStream, &str) -> std::result::Result<(), TargetError> + Send,
{
    let mut cmd = transport.command(spec);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| {
        TargetError::failed(format!(
            "spawning '{}' over {}: {e}",
            spec.executable,
            transport.name()
        ))
    })?;

    debug!(
        transport = transport.name(),
        executable = %spec.executable,
        pid = child.id(),
        "process started"
    );

    let (tx, mut rx) = mpsc::channel::<(OutputStream, String)>(64);
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, OutputStream::Stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, OutputStream::Stderr, tx.clone()));
    }
    drop(tx);

    let mut output = ProcessOutput::default();
    let mut status = None;
    let mut streams_open = true;

    while status.is_none() || streams_open {
        tokio::select! {
            biased;
            interrupt = ctx.done() => {
                info!(
                    transport = transport.name(),
                    executable = %spec.executable,
                    ?interrupt,
                    "interrupting process; killing child"
                );
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill child process");
                }
                return Err(interrupt.into());
            }
            line = rx.recv(), if streams_open => match line {
                Some((stream, line)) => {
                    let sink = match stream {
                        OutputStream::Stdout => &mut output.stdout,
                        OutputStream::Stderr => &mut output.stderr,
                    };
                    sink.push_str(&line);
                    sink.push('\n');
                    on_line(stream, &line)?;
                }
                None => streams_open = false,
            },
            res = child.wait(), if status.is_none() => {
                let exit = res.map_err(|e| TargetError::failed(format!("waiting for process: {e}")))?;
                status = Some(exit);
            }
        }
    }

    output.exit_code = status.and_then(|s| s.code());
    debug!(
        transport = transport.name(),
        executable = %spec.executable,
        exit_code = ?output.exit_code,
        "process exited"
    );
    Ok(output)
}

async fn forward_lines<R>(reader: R, stream: OutputStream, tx: mpsc::Sender<(OutputStream, String)>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send((stream, line)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(?stream, error = %e, "output stream read error");
                break;
            }
        }
    }
}

/// Quote one argument for a POSIX shell.
pub(crate) fn shell_quote(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    let plain = arg
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
