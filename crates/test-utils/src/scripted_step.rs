use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dutrun::errors::Result;
use dutrun::event::StepEmitter;
use dutrun::exec::{StepContext, TargetError, for_each_target};
use dutrun::registry::PluginRegistry;
use dutrun::step::{ResumeState, StepOutcome, StepParameters, TestStep};
use dutrun::target::{Target, TargetId};
use serde_json::json;

/// Event every scripted invocation emits before acting.
pub const EVENT_RAN: &str = "ScriptedRan";

/// What a [`ScriptedStep`] does for one target.
#[derive(Debug, Clone, PartialEq)]
pub enum Behaviour {
    Pass,
    Fail(String),
    Panic,
    /// Never returns; only cancellation or the step timeout ends it.
    Hang,
    /// Sleep, then pass.
    Delay(Duration),
    /// Emit an event with this name (declared or not), then pass.
    Emit(String),
}

/// A fake step with per-target behaviour.
///
/// Records which targets it was invoked for, in invocation order.
pub struct ScriptedStep {
    name: String,
    default: Behaviour,
    behaviours: HashMap<TargetId, Behaviour>,
    invocations: Arc<Mutex<Vec<TargetId>>>,
}

impl ScriptedStep {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            default: Behaviour::Pass,
            behaviours: HashMap::new(),
            invocations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn default_behaviour(mut self, behaviour: Behaviour) -> Self {
        self.default = behaviour;
        self
    }

    pub fn on(mut self, target: &str, behaviour: Behaviour) -> Self {
        self.behaviours.insert(target.to_string(), behaviour);
        self
    }

    /// Shared log of invoked target ids.
    pub fn invocations(&self) -> Arc<Mutex<Vec<TargetId>>> {
        Arc::clone(&self.invocations)
    }

    /// Register under its name, declaring [`EVENT_RAN`] plus `extra_events`.
    pub fn register(self, registry: &mut PluginRegistry, extra_events: &[&str]) {
        let mut events = vec![EVENT_RAN];
        events.extend_from_slice(extra_events);
        let name = self.name.clone();
        let step: Arc<dyn TestStep> = Arc::new(self);
        registry.register_step(&name, &events, move || Arc::clone(&step));
    }
}

#[async_trait]
impl TestStep for ScriptedStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate_parameters(&self, _params: &StepParameters) -> Result<()> {
        Ok(())
    }

    async fn run(
        &self,
        ctx: &StepContext,
        targets: Vec<Arc<Target>>,
        _params: &StepParameters,
        emitter: &StepEmitter,
        _resume: Option<ResumeState>,
    ) -> Result<StepOutcome> {
        let script = Arc::new((self.default.clone(), self.behaviours.clone()));
        let invocations = Arc::clone(&self.invocations);
        let emitter = emitter.clone();

        let results = for_each_target(ctx, &targets, move |_ctx, target| {
            let script = Arc::clone(&script);
            let invocations = Arc::clone(&invocations);
            let emitter = emitter.clone();
            async move {
                invocations.lock().unwrap().push(target.id.clone());
                let behaviour = script.1.get(&target.id).unwrap_or(&script.0).clone();
                emitter.emit(&target, EVENT_RAN, json!({ "behaviour": format!("{behaviour:?}") }))?;

                match behaviour {
                    Behaviour::Pass => Ok(()),
                    Behaviour::Fail(msg) => Err(TargetError::failed(msg)),
                    Behaviour::Panic => panic!("scripted panic on {}", target.id),
                    Behaviour::Hang => {
                        std::future::pending::<()>().await;
                        Ok(())
                    }
                    Behaviour::Delay(d) => {
                        tokio::time::sleep(d).await;
                        Ok(())
                    }
                    Behaviour::Emit(name) => {
                        emitter.emit(&target, &name, json!({}))?;
                        Ok(())
                    }
                }
            }
        })
        .await;

        Ok(StepOutcome::new(results))
    }
}
