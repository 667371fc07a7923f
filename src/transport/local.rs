// src/transport/local.rs

use tokio::process::Command;

use crate::transport::{ProcessSpec, Transport};

pub const PROTO: &str = "local";

/// Runs processes directly on the orchestrator host.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransport;

impl Transport for LocalTransport {
    fn name(&self) -> &'static str {
        PROTO
    }

    fn command(&self, spec: &ProcessSpec) -> Command {
        let mut cmd = Command::new(&spec.executable);
        cmd.args(&spec.args);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}
