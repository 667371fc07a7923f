// src/lib.rs

pub mod api;
pub mod buffer;
pub mod cli;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod errors;
pub mod event;
pub mod exec;
pub mod expand;
pub mod logging;
pub mod registry;
pub mod report;
pub mod step;
pub mod steps;
pub mod target;
pub mod transport;
pub mod types;
pub mod util;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, warn};

use crate::api::Api;
use crate::cli::CliArgs;
use crate::config::{ConfigFile, default_config_path, load_and_validate, load_or_default};
use crate::descriptor::JobDescriptor;
use crate::engine::{Orchestrator, build_pipeline};
use crate::registry::PluginRegistry;
use crate::types::{DescriptorFormat, JobState};
use crate::util::format_duration;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the built-in plugin registry and the orchestrator
/// - job submission and the status stream (JSON lines on stdout)
/// - Ctrl-C handling (cancels the job)
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = match &args.config {
        Some(path) => load_and_validate(path)
            .with_context(|| format!("failed to load config from {path}"))?,
        None => load_or_default(default_config_path())?,
    };

    let descriptor_path = Path::new(&args.descriptor);
    let bytes = std::fs::read(descriptor_path)
        .with_context(|| format!("failed to read descriptor {}", descriptor_path.display()))?;
    let format = descriptor_format(args.format.as_deref(), descriptor_path)?;

    let registry = Arc::new(PluginRegistry::with_builtins());
    let orchestrator = Arc::new(Orchestrator::new(registry, cfg.engine));

    if args.dry_run {
        let descriptor = descriptor::parse(&bytes, format)?;
        orchestrator.validate(&descriptor)?;
        print_dry_run(&descriptor, &orchestrator, &cfg)?;
        return Ok(());
    }

    let api = Api::new(Arc::clone(&orchestrator));
    let job_id = api.start_job(&args.requestor, &bytes, &format.to_string())?;
    info!(%job_id, descriptor = %descriptor_path.display(), "job started");

    // Ctrl-C → cancel the job; the status stream then runs to its end.
    {
        let api = api.clone();
        let requestor = args.requestor.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            warn!(%job_id, "interrupted; cancelling job");
            if let Err(e) = api.cancel_job(&requestor, job_id) {
                warn!(%job_id, error = %e, "cancel after Ctrl+C failed");
            }
        });
    }

    let mut updates = api.status_job(&args.requestor, job_id)?;
    while let Some(update) = updates.recv().await {
        println!("{}", serde_json::to_string(&update)?);
    }

    let status = orchestrator.wait(job_id).await?;
    let failed = status.failed_targets().count();
    info!(%job_id, state = %status.state, failed_targets = failed, "job finished");

    match status.state {
        JobState::Completed => Ok(()),
        state => bail!(
            "job {job_id} ended {state}: {}",
            status.error.as_deref().unwrap_or("no error recorded")
        ),
    }
}

/// `--format` if given, otherwise the descriptor's file extension.
fn descriptor_format(flag: Option<&str>, path: &Path) -> Result<DescriptorFormat> {
    if let Some(raw) = flag {
        return Ok(raw.parse()?);
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(DescriptorFormat::from_extension)
        .ok_or_else(|| {
            anyhow!(
                "cannot infer descriptor format from {}; pass --format json|yaml",
                path.display()
            )
        })
}

/// Simple dry-run output: print the resolved pipeline without running it.
fn print_dry_run(
    descriptor: &JobDescriptor,
    orchestrator: &Orchestrator,
    cfg: &ConfigFile,
) -> Result<()> {
    let pipeline = build_pipeline(descriptor, orchestrator.registry())?;
    let engine = &cfg.engine;

    println!("dutrun dry-run");
    println!("  job_name = {}", descriptor.job_name);
    println!("  target_manager = {}", descriptor.target_manager.name);
    println!(
        "  engine.default_step_timeout = {}",
        format_duration(engine.default_step_timeout)
    );
    println!("  engine.max_parallel_targets = {}", engine.max_parallel_targets);
    println!();

    println!("steps ({}):", pipeline.len());
    for step in &pipeline {
        println!("  {}. {}", step.index, step.label);
        println!("      step: {}", step.name);
        let timeout = step.timeout.unwrap_or(engine.default_step_timeout);
        println!("      timeout: {}", format_duration(timeout));
        if step.report_only {
            println!("      report_only: true");
        }
        if !step.params.is_empty() {
            println!("      parameters: {}", serde_json::to_string(&step.params)?);
        }
        let events: Vec<&str> = step.events.iter().map(String::as_str).collect();
        if !events.is_empty() {
            println!("      events: {}", events.join(", "));
        }
    }

    if !descriptor.reporters.is_empty() {
        println!();
        println!("reporters ({}):", descriptor.reporters.len());
        for reporter in &descriptor.reporters {
            println!("  - {}", reporter.name);
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_flag_wins_over_extension() {
        let f = descriptor_format(Some("yaml"), Path::new("job.json")).unwrap();
        assert_eq!(f, DescriptorFormat::Yaml);
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(
            descriptor_format(None, Path::new("jobs/smoke.yml")).unwrap(),
            DescriptorFormat::Yaml
        );
        assert!(descriptor_format(None, Path::new("jobs/smoke")).is_err());
    }
}
