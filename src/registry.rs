// src/registry.rs

//! Explicit plugin registry.
//!
//! Built once by the composing application and handed to the
//! [`Orchestrator`](crate::engine::Orchestrator). Maps names to step
//! factories (with the events each step may emit), target managers and
//! reporters. Step names are matched case-insensitively.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::errors::{DutrunError, Result};
use crate::report::{self, Reporter};
use crate::step::TestStep;
use crate::steps;
use crate::target::{self, TargetManager};

/// Builds a step instance for one job.
pub type StepFactory = Arc<dyn Fn() -> Arc<dyn TestStep> + Send + Sync>;

struct StepEntry {
    name: String,
    factory: StepFactory,
    events: Arc<BTreeSet<String>>,
}

/// A step resolved from the registry for one pipeline position.
#[derive(Clone)]
pub struct ResolvedStep {
    /// Name as registered, regardless of the case used in the descriptor.
    pub name: String,
    pub step: Arc<dyn TestStep>,
    pub events: Arc<BTreeSet<String>>,
}

impl fmt::Debug for ResolvedStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedStep")
            .field("name", &self.name)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct PluginRegistry {
    steps: HashMap<String, StepEntry>,
    target_managers: HashMap<String, Arc<dyn TargetManager>>,
    reporters: HashMap<String, Arc<dyn Reporter>>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("steps", &self.step_names())
            .field("target_managers", &self.target_managers.keys().collect::<Vec<_>>())
            .field("reporters", &self.reporters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in step, target manager and reporter.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register_step(steps::cmd::NAME, steps::cmd::EVENTS, || Arc::new(steps::CmdStep))
            .register_step(steps::sleep::NAME, steps::sleep::EVENTS, || {
                Arc::new(steps::SleepStep)
            })
            .register_step(steps::echo::NAME, steps::echo::EVENTS, || Arc::new(steps::EchoStep))
            .register_target_manager(target::list::NAME, Arc::new(target::TargetList))
            .register_target_manager(target::file::NAME, Arc::new(target::TargetFile))
            .register_reporter(report::noop::NAME, Arc::new(report::NoopReporter))
            .register_reporter(
                report::target_success::NAME,
                Arc::new(report::TargetSuccessReporter),
            );
        registry
    }

    /// Register a step and the event names it may emit. Replaces any step
    /// already registered under the same (case-insensitive) name.
    pub fn register_step<F>(&mut self, name: &str, events: &[&str], factory: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn TestStep> + Send + Sync + 'static,
    {
        let events: BTreeSet<String> = events.iter().map(|e| e.to_string()).collect();
        debug!(step = name, events = ?events, "registering step");
        self.steps.insert(
            name.to_lowercase(),
            StepEntry {
                name: name.to_string(),
                factory: Arc::new(factory),
                events: Arc::new(events),
            },
        );
        self
    }

    pub fn register_target_manager(
        &mut self,
        name: &str,
        manager: Arc<dyn TargetManager>,
    ) -> &mut Self {
        self.target_managers.insert(name.to_string(), manager);
        self
    }

    pub fn register_reporter(&mut self, name: &str, reporter: Arc<dyn Reporter>) -> &mut Self {
        self.reporters.insert(name.to_string(), reporter);
        self
    }

    pub fn step(&self, name: &str) -> Result<ResolvedStep> {
        let entry = self
            .steps
            .get(&name.to_lowercase())
            .ok_or_else(|| DutrunError::UnknownStep(name.to_string()))?;
        Ok(ResolvedStep {
            name: entry.name.clone(),
            step: (entry.factory)(),
            events: Arc::clone(&entry.events),
        })
    }

    pub fn target_manager(&self, name: &str) -> Result<Arc<dyn TargetManager>> {
        self.target_managers
            .get(name)
            .cloned()
            .ok_or_else(|| DutrunError::UnknownTargetManager(name.to_string()))
    }

    pub fn reporter(&self, name: &str) -> Result<Arc<dyn Reporter>> {
        self.reporters
            .get(name)
            .cloned()
            .ok_or_else(|| DutrunError::UnknownReporter(name.to_string()))
    }

    /// Registered step names, sorted.
    pub fn step_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.steps.values().map(|e| e.name.clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_lookup_is_case_insensitive() {
        let registry = PluginRegistry::with_builtins();
        let step = registry.step("CMD").unwrap();
        assert_eq!(step.name, "cmd");
        assert!(step.events.contains("Stdout"));
    }

    #[test]
    fn unknown_names_are_errors() {
        let registry = PluginRegistry::with_builtins();
        assert!(matches!(registry.step("flash"), Err(DutrunError::UnknownStep(_))));
        assert!(matches!(
            registry.target_manager("inventory"),
            Err(DutrunError::UnknownTargetManager(_))
        ));
        assert!(matches!(registry.reporter("mail"), Err(DutrunError::UnknownReporter(_))));
    }

    #[test]
    fn builtins_are_listed() {
        assert_eq!(
            PluginRegistry::with_builtins().step_names(),
            vec!["cmd", "echo", "sleep"]
        );
    }
}
