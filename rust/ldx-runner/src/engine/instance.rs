use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;

use super::{EngineError, ExecutionOutcome, Phase, PluginRuntimeError};
use crate::config::{ConfigError, ResolvedConfig, SCHEDULE_SECTION};
use crate::logging::OpTimer;
use crate::plugin::{
    LifecycleContext, Plugin, PluginRegistry, PluginSlot, PluginStep, split_slot,
};

/// Delay between poll-stop cycles unless configured otherwise.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// One run of a fixed set of plugins.
///
/// The plugin set is built at construction and never changes. Each
/// instance is owned by whoever created it and runs at most once; calling
/// [`run`](Self::run) again returns the recorded outcome.
pub struct ExecutionInstance {
    config: ResolvedConfig,
    slots: Vec<PluginSlot>,
    phase: Phase,
    started: usize,
    poll_interval: Duration,
    outcome: Option<ExecutionOutcome>,
}

impl std::fmt::Debug for ExecutionInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionInstance")
            .field("plugins", &self.plugin_keys())
            .field("phase", &self.phase)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl ExecutionInstance {
    /// Instantiate and configure the plugins named by `config`.
    ///
    /// Sections are taken in order. Sections with no registered plugin are
    /// skipped, as is the `schedule` section.
    ///
    /// # Errors
    ///
    /// Fails if a plugin section is not a table or a plugin rejects its
    /// section in parse-config.
    pub fn new(config: ResolvedConfig, registry: &PluginRegistry) -> Result<Self, EngineError> {
        let mut slots = Vec::new();

        for (env_key, section) in config.sections() {
            if env_key == SCHEDULE_SECTION {
                continue;
            }
            if !registry.contains(env_key) {
                tracing::debug!(env_key, "No plugin registered for section, ignoring");
                continue;
            }
            if !(section.is_object() || section.is_null()) {
                return Err(ConfigError::InvalidSection {
                    key: env_key.to_string(),
                    reason: "plugin section must be a table".to_string(),
                }
                .into());
            }

            let mut plugin = registry.create(env_key)?;
            plugin
                .parse_config(section)
                .map_err(|e| EngineError::ParseConfig {
                    env_key: env_key.to_string(),
                    message: format!("{e:#}"),
                })?;
            slots.push(PluginSlot::new(env_key, plugin));
        }

        Ok(Self {
            config,
            slots,
            phase: Phase::Loaded,
            started: 0,
            poll_interval: DEFAULT_POLL_INTERVAL,
            outcome: None,
        })
    }

    /// Set the delay between poll-stop cycles.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Resolved configuration of the run.
    #[must_use]
    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Section keys of the loaded plugins, in start order.
    #[must_use]
    pub fn plugin_keys(&self) -> Vec<&str> {
        self.slots.iter().map(|slot| slot.env_key.as_str()).collect()
    }

    /// Number of loaded plugins.
    #[must_use]
    pub fn plugin_count(&self) -> usize {
        self.slots.len()
    }

    /// Look up a loaded plugin by section key.
    #[must_use]
    pub fn plugin(&self, env_key: &str) -> Option<&dyn Plugin> {
        self.slots
            .iter()
            .find(|slot| slot.env_key == env_key)
            .map(|slot| slot.plugin.as_ref())
    }

    /// Outcome of the run, once finished.
    #[must_use]
    pub fn outcome(&self) -> Option<&ExecutionOutcome> {
        self.outcome.as_ref()
    }

    /// Drive the plugins through the lifecycle until a terminal phase.
    ///
    /// Never returns an error: plugin failures, including panics, are
    /// captured in the outcome.
    pub async fn run(&mut self) -> ExecutionOutcome {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }

        let timer = OpTimer::new("engine", "run");
        let outcome = self.drive().await;
        self.enter(outcome.phase());
        timer.finish();

        match &outcome {
            ExecutionOutcome::Completed { stopped_by } => {
                tracing::info!(stopped_by = ?stopped_by, "Run completed");
            }
            ExecutionOutcome::Aborted { rejected_by } => {
                tracing::warn!(rejected_by = ?rejected_by, "Run aborted by validation");
            }
            ExecutionOutcome::Failed { error } => {
                tracing::error!(
                    env_key = %error.env_key,
                    step = %error.step,
                    error = %error.message,
                    "Run failed"
                );
            }
        }

        self.outcome = Some(outcome.clone());
        outcome
    }

    async fn drive(&mut self) -> ExecutionOutcome {
        if self.slots.is_empty() {
            tracing::warn!("Configuration has no plugins, nothing to run");
            return ExecutionOutcome::Completed { stopped_by: None };
        }

        let rejected_by = self.validate_all().await;
        if !rejected_by.is_empty() {
            return ExecutionOutcome::Aborted { rejected_by };
        }
        self.enter(Phase::Validated);

        let mut failure = self.start_all().await.err();
        let mut stopped_by = None;
        if failure.is_none() {
            match self.poll_until_stop().await {
                Ok(key) => stopped_by = Some(key),
                Err(e) => failure = Some(e),
            }
        }

        if let Some(stop_error) = self.stop_started().await {
            failure.get_or_insert(stop_error);
        }

        match failure {
            Some(error) => ExecutionOutcome::Failed { error },
            None => ExecutionOutcome::Completed { stopped_by },
        }
    }

    /// Ask every plugin; returns the keys of those that refused.
    async fn validate_all(&mut self) -> Vec<String> {
        let mut rejected = Vec::new();
        for index in 0..self.slots.len() {
            let Some((slot, siblings)) = split_slot(&mut self.slots, index) else {
                break;
            };
            let ctx = LifecycleContext::new(&self.config, siblings);
            let accepted = AssertUnwindSafe(slot.plugin.validate(&ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    tracing::error!(
                        env_key = %slot.env_key,
                        panic = %panic_message(panic.as_ref()),
                        "Plugin panicked during validate"
                    );
                    false
                });
            if !accepted {
                tracing::warn!(env_key = %slot.env_key, "Plugin rejected the run");
                rejected.push(slot.env_key.clone());
            }
        }
        rejected
    }

    async fn start_all(&mut self) -> Result<(), PluginRuntimeError> {
        self.enter(Phase::Running);
        for index in 0..self.slots.len() {
            // Counted before the call: a plugin whose start fails is still stopped.
            self.started = index + 1;
            let Some((slot, siblings)) = split_slot(&mut self.slots, index) else {
                break;
            };
            let ctx = LifecycleContext::new(&self.config, siblings);
            tracing::debug!(env_key = %slot.env_key, "Starting plugin");
            guarded(slot.plugin.start(&ctx))
                .await
                .map_err(|e| PluginRuntimeError::new(&slot.env_key, PluginStep::Start, &e))?;
        }
        Ok(())
    }

    /// Poll in section order until a plugin asks to stop; returns its key.
    async fn poll_until_stop(&mut self) -> Result<String, PluginRuntimeError> {
        self.enter(Phase::Polling);
        loop {
            for index in 0..self.slots.len() {
                let Some((slot, siblings)) = split_slot(&mut self.slots, index) else {
                    break;
                };
                let ctx = LifecycleContext::new(&self.config, siblings);
                let stop = guarded(slot.plugin.poll_stop(&ctx))
                    .await
                    .map_err(|e| PluginRuntimeError::new(&slot.env_key, PluginStep::PollStop, &e))?;
                if stop {
                    tracing::info!(env_key = %slot.env_key, "Plugin requested stop");
                    return Ok(slot.env_key.clone());
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Stop started plugins in reverse order; returns the first error.
    async fn stop_started(&mut self) -> Option<PluginRuntimeError> {
        self.enter(Phase::Stopping);
        let mut first_error = None;
        for index in (0..self.started).rev() {
            let Some((slot, siblings)) = split_slot(&mut self.slots, index) else {
                continue;
            };
            let ctx = LifecycleContext::new(&self.config, siblings);
            tracing::debug!(env_key = %slot.env_key, "Stopping plugin");
            if let Err(e) = guarded(slot.plugin.stop(&ctx)).await {
                tracing::warn!(env_key = %slot.env_key, error = %e, "Plugin stop failed");
                first_error.get_or_insert_with(|| {
                    PluginRuntimeError::new(&slot.env_key, PluginStep::Stop, &e)
                });
            }
        }
        first_error
    }

    fn enter(&mut self, phase: Phase) {
        tracing::debug!(from = %self.phase, to = %phase, "Phase transition");
        self.phase = phase;
    }
}

/// Run a plugin step, turning a panic into an error.
async fn guarded<T>(step: impl Future<Output = anyhow::Result<T>>) -> anyhow::Result<T> {
    match AssertUnwindSafe(step).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(anyhow::anyhow!(
            "panicked: {}",
            panic_message(panic.as_ref())
        )),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct Counters {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    struct Scripted {
        counters: Arc<Counters>,
        accept: bool,
        stop_after: Option<usize>,
        polls: usize,
    }

    #[async_trait]
    impl Plugin for Scripted {
        fn parse_config(&mut self, section: &serde_json::Value) -> anyhow::Result<()> {
            self.accept = section["accept"].as_bool().unwrap_or(true);
            self.stop_after = section["stop_after"]
                .as_u64()
                .and_then(|n| usize::try_from(n).ok());
            Ok(())
        }

        async fn validate(&mut self, _ctx: &LifecycleContext<'_>) -> bool {
            self.accept
        }

        async fn start(&mut self, _ctx: &LifecycleContext<'_>) -> anyhow::Result<()> {
            self.counters.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn poll_stop(&mut self, _ctx: &LifecycleContext<'_>) -> anyhow::Result<bool> {
            self.polls += 1;
            Ok(self.stop_after.is_some_and(|n| self.polls >= n))
        }

        async fn stop(&mut self, _ctx: &LifecycleContext<'_>) -> anyhow::Result<()> {
            self.counters.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn registry(counters: &Arc<Counters>) -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        for key in ["p1", "p2"] {
            let counters = Arc::clone(counters);
            registry
                .register(key, move || {
                    Box::new(Scripted {
                        counters: Arc::clone(&counters),
                        accept: true,
                        stop_after: None,
                        polls: 0,
                    })
                })
                .unwrap();
        }
        registry
    }

    fn config(value: serde_json::Value) -> ResolvedConfig {
        ResolvedConfig::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_sections_ignored() {
        let counters = Arc::new(Counters::default());
        let instance = ExecutionInstance::new(
            config(json!({ "p1": {}, "mystery": { "x": 1 }, "schedule": { "trigger": "interval" } })),
            &registry(&counters),
        )
        .unwrap();
        assert_eq!(instance.plugin_keys(), vec!["p1"]);
        assert_eq!(instance.phase(), Phase::Loaded);
    }

    #[tokio::test]
    async fn test_non_table_section_rejected() {
        let counters = Arc::new(Counters::default());
        let err = ExecutionInstance::new(config(json!({ "p1": 5 })), &registry(&counters))
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(ConfigError::InvalidSection { .. })));
    }

    #[tokio::test]
    async fn test_no_plugins_completes() {
        let counters = Arc::new(Counters::default());
        let mut instance =
            ExecutionInstance::new(config(json!({ "other": {} })), &registry(&counters)).unwrap();
        let outcome = instance.run().await;
        assert_eq!(outcome, ExecutionOutcome::Completed { stopped_by: None });
        assert_eq!(instance.phase(), Phase::Completed);
    }

    #[tokio::test]
    async fn test_second_run_returns_recorded_outcome() {
        let counters = Arc::new(Counters::default());
        let mut instance = ExecutionInstance::new(
            config(json!({ "p1": { "stop_after": 1 } })),
            &registry(&counters),
        )
        .unwrap()
        .with_poll_interval(Duration::from_millis(1));

        let first = instance.run().await;
        let second = instance.run().await;
        assert_eq!(first, second);
        assert_eq!(counters.starts.load(Ordering::SeqCst), 1);
        assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
    }
}
