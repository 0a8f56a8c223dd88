//! Lifecycle engine behaviour: all-or-nothing validation, ordering and
//! guaranteed cleanup.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use proptest::prelude::*;
use serde::Deserialize;
use serde_json::json;

use ldx_runner::config::{ConfigResolver, ResolvedConfig};
use ldx_runner::engine::{ExecutionInstance, ExecutionOutcome, Phase};
use ldx_runner::plugin::{LifecycleContext, Plugin, PluginRegistry, PluginStep};

type Events = Arc<Mutex<Vec<String>>>;

/// Behaviour of a scripted plugin, read from its own section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ScriptedSettings {
    reject: bool,
    stop_after: Option<u32>,
    fail_start: bool,
    fail_poll: bool,
    fail_stop: bool,
    panic_start: bool,
}

struct Scripted {
    key: String,
    events: Events,
    settings: ScriptedSettings,
    polls: u32,
}

impl Scripted {
    fn record(&self, step: &str) {
        self.events.lock().push(format!("{}:{step}", self.key));
    }
}

#[async_trait]
impl Plugin for Scripted {
    fn parse_config(&mut self, section: &serde_json::Value) -> anyhow::Result<()> {
        self.settings = serde_json::from_value(section.clone())?;
        Ok(())
    }

    async fn validate(&mut self, _ctx: &LifecycleContext<'_>) -> bool {
        self.record("validate");
        !self.settings.reject
    }

    async fn start(&mut self, _ctx: &LifecycleContext<'_>) -> anyhow::Result<()> {
        self.record("start");
        if self.settings.panic_start {
            panic!("plugin exploded");
        }
        if self.settings.fail_start {
            anyhow::bail!("start refused");
        }
        Ok(())
    }

    async fn poll_stop(&mut self, _ctx: &LifecycleContext<'_>) -> anyhow::Result<bool> {
        self.polls += 1;
        if self.settings.fail_poll {
            anyhow::bail!("poll broke");
        }
        Ok(self.settings.stop_after.is_some_and(|n| self.polls >= n))
    }

    async fn stop(&mut self, _ctx: &LifecycleContext<'_>) -> anyhow::Result<()> {
        self.record("stop");
        if self.settings.fail_stop {
            anyhow::bail!("stop refused");
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn registry(keys: &[&str], events: &Events) -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    for key in keys {
        let key = (*key).to_string();
        let events = Arc::clone(events);
        registry
            .register(key.clone(), move || {
                Box::new(Scripted {
                    key: key.clone(),
                    events: Arc::clone(&events),
                    settings: ScriptedSettings::default(),
                    polls: 0,
                })
            })
            .unwrap();
    }
    registry
}

fn instance(config: serde_json::Value, registry: &PluginRegistry) -> ExecutionInstance {
    ExecutionInstance::new(ResolvedConfig::from_value(config).unwrap(), registry)
        .unwrap()
        .with_poll_interval(Duration::from_millis(1))
}

fn steps(events: &Events, step: &str) -> Vec<String> {
    events
        .lock()
        .iter()
        .filter(|e| e.ends_with(&format!(":{step}")))
        .cloned()
        .collect()
}

#[tokio::test]
async fn test_rejected_validation_aborts_before_any_start() {
    let events = Events::default();
    let registry = registry(&["p1", "p2"], &events);
    let mut run = instance(json!({ "p1": { "reject": true }, "p2": {} }), &registry);

    let outcome = run.run().await;

    assert_eq!(
        outcome,
        ExecutionOutcome::Aborted {
            rejected_by: vec!["p1".to_string()]
        }
    );
    assert_eq!(run.phase(), Phase::Aborted);
    assert!(steps(&events, "start").is_empty());
    assert!(steps(&events, "stop").is_empty());
    // Every plugin is still asked.
    assert_eq!(steps(&events, "validate"), vec!["p1:validate", "p2:validate"]);
}

#[tokio::test]
async fn test_stop_on_second_poll_completes_and_stops_in_reverse() {
    let events = Events::default();
    let registry = registry(&["p1", "p2"], &events);
    let mut run = instance(json!({ "p1": {}, "p2": { "stop_after": 2 } }), &registry);

    let outcome = run.run().await;

    assert_eq!(
        outcome,
        ExecutionOutcome::Completed {
            stopped_by: Some("p2".to_string())
        }
    );
    assert_eq!(run.phase(), Phase::Completed);
    assert_eq!(steps(&events, "start"), vec!["p1:start", "p2:start"]);
    assert_eq!(steps(&events, "stop"), vec!["p2:stop", "p1:stop"]);
}

#[tokio::test]
async fn test_first_plugin_to_signal_stop_wins() {
    let events = Events::default();
    let registry = registry(&["p1", "p2"], &events);
    let mut run = instance(
        json!({ "p1": { "stop_after": 1 }, "p2": { "stop_after": 1 } }),
        &registry,
    );

    let outcome = run.run().await;
    assert_eq!(
        outcome,
        ExecutionOutcome::Completed {
            stopped_by: Some("p1".to_string())
        }
    );
}

#[tokio::test]
async fn test_failed_start_still_stops_started_plugins() {
    let events = Events::default();
    let registry = registry(&["p1", "p2", "p3"], &events);
    let mut run = instance(
        json!({ "p1": {}, "p2": { "fail_start": true }, "p3": { "stop_after": 1 } }),
        &registry,
    );

    let outcome = run.run().await;

    let ExecutionOutcome::Failed { error } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(error.env_key, "p2");
    assert_eq!(error.step, PluginStep::Start);
    assert!(error.message.contains("start refused"));

    assert_eq!(steps(&events, "start"), vec!["p1:start", "p2:start"]);
    assert_eq!(steps(&events, "stop"), vec!["p2:stop", "p1:stop"]);
}

#[tokio::test]
async fn test_poll_error_stops_everything() {
    let events = Events::default();
    let registry = registry(&["p1", "p2"], &events);
    let mut run = instance(json!({ "p1": {}, "p2": { "fail_poll": true } }), &registry);

    let outcome = run.run().await;

    assert_eq!(outcome.phase(), Phase::Failed);
    assert_eq!(steps(&events, "stop"), vec!["p2:stop", "p1:stop"]);
}

#[tokio::test]
async fn test_stop_error_does_not_skip_other_stops() {
    let events = Events::default();
    let registry = registry(&["p1", "p2", "p3"], &events);
    let mut run = instance(
        json!({
            "p1": { "fail_stop": true },
            "p2": { "fail_stop": true },
            "p3": { "stop_after": 1 }
        }),
        &registry,
    );

    let outcome = run.run().await;

    assert_eq!(steps(&events, "stop"), vec!["p3:stop", "p2:stop", "p1:stop"]);
    let ExecutionOutcome::Failed { error } = outcome else {
        panic!("expected failure");
    };
    // First error encountered, in stop order.
    assert_eq!(error.env_key, "p2");
    assert_eq!(error.step, PluginStep::Stop);
}

#[tokio::test]
async fn test_panicking_start_is_contained() {
    let events = Events::default();
    let registry = registry(&["p1", "p2"], &events);
    let mut run = instance(json!({ "p1": {}, "p2": { "panic_start": true } }), &registry);

    let outcome = run.run().await;

    let ExecutionOutcome::Failed { error } = outcome else {
        panic!("expected failure");
    };
    assert!(error.message.contains("plugin exploded"));
    assert_eq!(steps(&events, "stop"), vec!["p2:stop", "p1:stop"]);
}

#[tokio::test]
async fn test_template_feeds_plugin_section() {
    let events = Events::default();
    let registry = registry(&["p1"], &events);
    let resolver = ConfigResolver::new().with_template("quick", json!({ "stop_after": 1 }));

    let sections = json!({ "p1": "template::quick" });
    let config = resolver
        .resolve(sections.as_object().unwrap().clone(), None)
        .unwrap();
    assert_eq!(config.section("p1"), Some(&json!({ "stop_after": 1 })));

    let mut run = ExecutionInstance::new(config, &registry)
        .unwrap()
        .with_poll_interval(Duration::from_millis(1));
    assert!(run.run().await.is_success());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_start_only_when_every_validate_passes(accepts in prop::collection::vec(any::<bool>(), 1..6)) {
        let keys: Vec<String> = (0..accepts.len()).map(|i| format!("p{i}")).collect();
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let events = Events::default();
        let registry = registry(&key_refs, &events);

        let mut sections = serde_json::Map::new();
        for (i, (key, accept)) in keys.iter().zip(&accepts).enumerate() {
            let stop_after = (i + 1 == keys.len()).then_some(1);
            sections.insert(key.clone(), json!({ "reject": !accept, "stop_after": stop_after }));
        }
        let mut run = instance(serde_json::Value::Object(sections), &registry);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let outcome = runtime.block_on(run.run());

        let started = steps(&events, "start");
        let stopped = steps(&events, "stop");
        if accepts.iter().all(|a| *a) {
            prop_assert!(outcome.is_success());
            prop_assert_eq!(started.len(), keys.len());
            prop_assert_eq!(stopped.len(), keys.len());
        } else {
            prop_assert_eq!(outcome.phase(), Phase::Aborted);
            prop_assert!(started.is_empty());
            prop_assert!(stopped.is_empty());
        }
    }
}
