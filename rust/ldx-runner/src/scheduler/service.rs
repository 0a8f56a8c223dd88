use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use super::{ExecutionContext, ExecutionIdGenerator, ExecutionStatus, ScheduleSpec, ScheduleSummary, Trigger};
use crate::config::{ConfigError, ConfigResolver, ResolvedConfig, SchedulerConfig};
use crate::engine::{EngineError, ExecutionInstance};
use crate::plugin::PluginRegistry;
use crate::registry::{JobDefinition, JobFilter, JobRegistry, RegistryError};

/// Scheduler errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Another job already fires on the same trigger.
    #[error("schedule '{signature}' for job '{job_id}' conflicts with job '{existing}'")]
    ScheduleConflict {
        /// Job being registered.
        job_id: String,
        /// Job already holding the trigger.
        existing: String,
        /// Shared signature.
        signature: String,
    },

    /// Job id taken and replace not requested.
    #[error("job '{0}' is already registered")]
    DuplicateJob(String),

    /// No job or execution with this id.
    #[error("no job or execution named '{0}'")]
    UnknownJob(String),

    /// Operation not allowed in the current state.
    #[error("{0}")]
    InvalidState(String),

    /// Configuration problem.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Registry persistence failure.
    #[error(transparent)]
    Registry(RegistryError),

    /// Plugin instantiation failure.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<RegistryError> for SchedulerError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::DuplicateJob(id) => Self::DuplicateJob(id),
            RegistryError::UnknownJob(id) => Self::UnknownJob(id),
            other => Self::Registry(other),
        }
    }
}

/// Result of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Registered job.
    pub job_id: String,
    /// Trigger, `None` for on-demand jobs.
    pub schedule: Option<ScheduleSpec>,
    /// First firing of a scheduled job.
    pub next_run: Option<DateTime<Local>>,
}

impl Registration {
    /// Whether a trigger was installed.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.schedule.is_some()
    }
}

/// What [`SchedulerService::cancel`] removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancelled {
    /// Future firings of a scheduled job.
    Schedule,
    /// A finished execution's tracking entry.
    Execution,
}

struct ScheduleHandle {
    spec: ScheduleSpec,
    signature: String,
    next_run: Arc<Mutex<Option<DateTime<Local>>>>,
    cancel: CancellationToken,
}

struct Inner {
    registry: Arc<JobRegistry>,
    plugins: Arc<PluginRegistry>,
    contexts: RwLock<HashMap<String, ExecutionContext>>,
    schedules: RwLock<HashMap<String, ScheduleHandle>>,
    workers: Semaphore,
    max_workers: usize,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    ids: ExecutionIdGenerator,
    poll_interval: Duration,
    registration: tokio::sync::Mutex<()>,
}

impl Inner {
    fn update(&self, execution_id: &str, apply: impl FnOnce(&mut ExecutionContext)) {
        if let Some(ctx) = self.contexts.write().get_mut(execution_id) {
            apply(ctx);
        }
    }
}

/// Fires jobs and tracks their executions.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct SchedulerService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SchedulerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerService")
            .field("max_workers", &self.inner.max_workers)
            .field("scheduled", &self.inner.schedules.read().len())
            .field("executions", &self.inner.contexts.read().len())
            .finish()
    }
}

impl SchedulerService {
    /// Create a scheduler over `registry`. Nothing fires until
    /// [`start`](Self::start) or a registration.
    #[must_use]
    pub fn new(registry: Arc<JobRegistry>, plugins: Arc<PluginRegistry>, config: &SchedulerConfig) -> Self {
        let max_workers = config.max_workers.max(1);
        Self {
            inner: Arc::new(Inner {
                registry,
                plugins,
                contexts: RwLock::new(HashMap::new()),
                schedules: RwLock::new(HashMap::new()),
                workers: Semaphore::new(max_workers),
                max_workers,
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                ids: ExecutionIdGenerator::new(),
                poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
                registration: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Underlying job registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.inner.registry
    }

    /// Re-install triggers for every scheduled job in the registry.
    ///
    /// Returns the number of triggers installed. Jobs that no longer build
    /// (for example a plugin type that was removed) are skipped, and so is
    /// a job whose signature is already installed for an earlier-registered
    /// job.
    pub fn start(&self) -> usize {
        let mut jobs = self.inner.registry.list(JobFilter::Scheduled);
        jobs.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });

        let mut recovered = 0;
        for job in jobs {
            match self.recover(&job) {
                Ok(()) => recovered += 1,
                Err(e) => {
                    tracing::warn!(job_id = %job.job_id, error = %e, "Skipping scheduled job during recovery");
                }
            }
        }
        tracing::info!(recovered, "Scheduler started");
        recovered
    }

    fn recover(&self, job: &JobDefinition) -> Result<(), SchedulerError> {
        let Some(spec) = job.schedule.clone() else {
            return Ok(());
        };
        self.build_instance(job.config.clone())?;
        let trigger = spec.compile()?;
        let signature = trigger.signature();
        if let Some(existing) = self.installed_with(&job.job_id, &signature) {
            return Err(SchedulerError::ScheduleConflict {
                job_id: job.job_id.clone(),
                existing,
                signature,
            });
        }
        self.install_trigger(&job.job_id, spec, &trigger);
        Ok(())
    }

    /// Register a job and, when `schedule` is set, install its trigger.
    ///
    /// # Errors
    ///
    /// - [`SchedulerError::Config`] / [`SchedulerError::Engine`] if the
    ///   configuration does not build a runnable instance
    /// - [`SchedulerError::ScheduleConflict`] if another registered job has
    ///   the same trigger signature, whether its trigger is installed or
    ///   was cancelled; the registry is left unchanged
    /// - [`SchedulerError::DuplicateJob`] if the id is taken and `replace`
    ///   is false
    pub async fn register_job(
        &self,
        job_id: &str,
        config: ResolvedConfig,
        schedule: Option<ScheduleSpec>,
        source: &str,
        replace: bool,
    ) -> Result<Registration, SchedulerError> {
        let _registration = self.inner.registration.lock().await;

        self.build_instance(config.clone())?;
        let trigger = schedule.as_ref().map(ScheduleSpec::compile).transpose()?;
        if let Some(trigger) = &trigger {
            let signature = trigger.signature();
            if let Some(existing) = self.conflicting_job(job_id, &signature) {
                tracing::warn!(job_id, existing = %existing, signature = %signature, "Schedule conflict");
                return Err(SchedulerError::ScheduleConflict {
                    job_id: job_id.to_string(),
                    existing,
                    signature,
                });
            }
        }
        if !replace && self.inner.registry.contains(job_id) {
            return Err(SchedulerError::DuplicateJob(job_id.to_string()));
        }

        self.inner
            .registry
            .register(job_id, config, schedule.clone(), source, replace)
            .await?;
        self.cancel_trigger(job_id);

        let next_run = match (&schedule, &trigger) {
            (Some(spec), Some(trigger)) => self.install_trigger(job_id, spec.clone(), trigger),
            _ => None,
        };
        Ok(Registration {
            job_id: job_id.to_string(),
            schedule,
            next_run,
        })
    }

    /// Remove a job from the registry and drop its trigger.
    pub async fn unregister(&self, job_id: &str) -> Result<JobDefinition, SchedulerError> {
        let _registration = self.inner.registration.lock().await;
        self.cancel_trigger(job_id);
        Ok(self.inner.registry.unregister(job_id).await?)
    }

    /// Fire a registered job now, whether or not it has a schedule.
    ///
    /// The registry records the trigger before the run is queued. Returns
    /// the new execution id.
    pub async fn trigger_job(&self, job_id: &str) -> Result<String, SchedulerError> {
        let job = self
            .inner
            .registry
            .get(job_id)
            .ok_or_else(|| SchedulerError::UnknownJob(job_id.to_string()))?;
        let instance = self.build_instance(job.config)?;
        self.inner.registry.mark_triggered(job_id).await?;

        let execution_id = self.inner.ids.next(job_id);
        self.inner.contexts.write().insert(
            execution_id.clone(),
            ExecutionContext::pending(&execution_id, job_id, instance.plugin_count()),
        );
        tracing::info!(job_id, execution_id = %execution_id, "Job triggered");

        self.dispatch(job_id, &execution_id, instance);
        Ok(execution_id)
    }

    /// Queue `instance` on the worker pool. Its outcome always lands in the
    /// execution's context, panics included.
    fn dispatch(&self, job_id: &str, execution_id: &str, mut instance: ExecutionInstance) {
        let inner = Arc::clone(&self.inner);
        let execution_id = execution_id.to_string();
        let span = tracing::info_span!("execution", job_id = %job_id, execution_id = %execution_id);

        self.inner.tracker.spawn(
            async move {
                let Ok(_permit) = inner.workers.acquire().await else {
                    inner.update(&execution_id, |ctx| ctx.fail("scheduler is shutting down"));
                    return;
                };
                inner.update(&execution_id, ExecutionContext::mark_running);

                let run = tokio::spawn(async move { instance.run().await }.in_current_span());
                match run.await {
                    Ok(outcome) => inner.update(&execution_id, |ctx| ctx.finish(&outcome)),
                    Err(e) => {
                        tracing::error!(error = %e, "Execution task died");
                        inner.update(&execution_id, |ctx| ctx.fail(format!("execution task failed: {e}")));
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Cancel a scheduled job or drop a finished execution.
    ///
    /// `id` is first looked up as a scheduled job id, then as an execution
    /// id. Running executions are never interrupted.
    pub fn cancel(&self, id: &str) -> Result<Cancelled, SchedulerError> {
        if self.inner.schedules.read().contains_key(id) {
            let running = self
                .inner
                .contexts
                .read()
                .values()
                .any(|ctx| ctx.job_id == id && ctx.status == ExecutionStatus::Running);
            if running {
                return Err(SchedulerError::InvalidState(format!(
                    "job '{id}' has a running execution and cannot be cancelled"
                )));
            }
            self.cancel_trigger(id);
            tracing::info!(job_id = id, "Schedule cancelled");
            return Ok(Cancelled::Schedule);
        }

        self.remove_execution(id)?;
        Ok(Cancelled::Execution)
    }

    /// Stop tracking a finished execution.
    pub fn remove_execution(&self, execution_id: &str) -> Result<ExecutionContext, SchedulerError> {
        let mut contexts = self.inner.contexts.write();
        let status = contexts
            .get(execution_id)
            .map(|ctx| ctx.status)
            .ok_or_else(|| SchedulerError::UnknownJob(execution_id.to_string()))?;
        if !status.is_terminal() {
            return Err(SchedulerError::InvalidState(format!(
                "execution '{execution_id}' is {status} and cannot be removed"
            )));
        }
        contexts
            .remove(execution_id)
            .ok_or_else(|| SchedulerError::UnknownJob(execution_id.to_string()))
    }

    /// Look up an execution.
    #[must_use]
    pub fn execution(&self, execution_id: &str) -> Option<ExecutionContext> {
        self.inner.contexts.read().get(execution_id).cloned()
    }

    /// Every tracked execution, oldest first.
    #[must_use]
    pub fn executions(&self) -> Vec<ExecutionContext> {
        let mut all: Vec<ExecutionContext> = self.inner.contexts.read().values().cloned().collect();
        all.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.execution_id.cmp(&b.execution_id))
        });
        all
    }

    /// Executions currently running.
    #[must_use]
    pub fn active(&self) -> Vec<ExecutionContext> {
        self.executions()
            .into_iter()
            .filter(|ctx| ctx.status == ExecutionStatus::Running)
            .collect()
    }

    /// Installed trigger of `job_id`.
    #[must_use]
    pub fn schedule(&self, job_id: &str) -> Option<ScheduleSummary> {
        self.inner
            .schedules
            .read()
            .get(job_id)
            .map(|handle| summarize(job_id, handle))
    }

    /// Every installed trigger, by job id.
    #[must_use]
    pub fn schedules(&self) -> Vec<ScheduleSummary> {
        let mut all: Vec<ScheduleSummary> = self
            .inner
            .schedules
            .read()
            .iter()
            .map(|(job_id, handle)| summarize(job_id, handle))
            .collect();
        all.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        all
    }

    /// Register every instance config found by `resolver` as a job.
    ///
    /// Job ids are file stems; existing jobs are replaced. Files that fail
    /// to resolve or register are logged and skipped. Returns the number of
    /// jobs registered.
    pub async fn load_config_directory(&self, resolver: &ConfigResolver) -> usize {
        let files = match resolver.instance_files() {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot list config directory");
                return 0;
            }
        };

        let mut loaded = 0;
        for path in files {
            let Some(job_id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            let file_name = path.file_name().and_then(|s| s.to_str()).unwrap_or(job_id.as_str());
            let source = format!("config:{file_name}");

            let result = async {
                let mut config = resolver.resolve_file(&path)?;
                let schedule = config.take_schedule()?;
                self.register_job(&job_id, config, schedule, &source, true).await
            }
            .await;

            match result {
                Ok(registration) => {
                    loaded += 1;
                    tracing::info!(
                        job_id = %job_id,
                        scheduled = registration.is_scheduled(),
                        "Imported job from config directory"
                    );
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping config file");
                }
            }
        }
        loaded
    }

    /// Stop every trigger and wait for in-flight executions.
    ///
    /// Executions still waiting for a worker are marked failed.
    pub async fn shutdown(&self) {
        tracing::info!("Scheduler shutting down");
        self.inner.shutdown.cancel();
        self.inner.schedules.write().clear();
        self.inner.workers.close();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        tracing::info!("Scheduler stopped");
    }

    fn build_instance(&self, config: ResolvedConfig) -> Result<ExecutionInstance, SchedulerError> {
        let instance = ExecutionInstance::new(config, &self.inner.plugins)?
            .with_poll_interval(self.inner.poll_interval);
        if instance.plugin_count() == 0 {
            return Err(ConfigError::NoPlugins.into());
        }
        Ok(instance)
    }

    /// Another scheduled job in the registry with `signature`.
    fn conflicting_job(&self, job_id: &str, signature: &str) -> Option<String> {
        self.inner
            .registry
            .list(JobFilter::Scheduled)
            .into_iter()
            .find(|job| {
                job.job_id != job_id
                    && job.schedule.as_ref().is_some_and(|spec| spec.signature() == signature)
            })
            .map(|job| job.job_id)
    }

    /// Another job whose trigger is currently installed with `signature`.
    fn installed_with(&self, job_id: &str, signature: &str) -> Option<String> {
        self.inner
            .schedules
            .read()
            .iter()
            .find(|(other, handle)| other.as_str() != job_id && handle.signature == signature)
            .map(|(other, _)| other.clone())
    }

    fn cancel_trigger(&self, job_id: &str) -> bool {
        match self.inner.schedules.write().remove(job_id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Install a trigger task; returns the first firing time.
    fn install_trigger(&self, job_id: &str, spec: ScheduleSpec, trigger: &Trigger) -> Option<DateTime<Local>> {
        let first = trigger.next_after(&Local::now());
        let next_run = Arc::new(Mutex::new(first));
        let cancel = self.inner.shutdown.child_token();

        let previous = self.inner.schedules.write().insert(
            job_id.to_string(),
            ScheduleHandle {
                signature: trigger.signature(),
                spec,
                next_run: Arc::clone(&next_run),
                cancel: cancel.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }

        tracing::info!(job_id, signature = %trigger.signature(), next_run = ?first, "Trigger installed");
        let span = tracing::info_span!("trigger", job_id = %job_id);
        self.inner.tracker.spawn(
            self.clone()
                .fire_on_schedule(job_id.to_string(), trigger.clone(), next_run, cancel)
                .instrument(span),
        );
        first
    }

    async fn fire_on_schedule(
        self,
        job_id: String,
        trigger: Trigger,
        next_run: Arc<Mutex<Option<DateTime<Local>>>>,
        cancel: CancellationToken,
    ) {
        loop {
            let Some(next) = *next_run.lock() else {
                tracing::info!("Trigger has no future firing");
                break;
            };
            let wait = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(wait) => {}
            }

            if let Err(e) = self.trigger_job(&job_id).await {
                tracing::warn!(error = %e, "Scheduled firing failed");
            }
            let base = next.max(Local::now());
            *next_run.lock() = trigger.next_after(&base);
        }
    }
}

fn summarize(job_id: &str, handle: &ScheduleHandle) -> ScheduleSummary {
    ScheduleSummary {
        job_id: job_id.to_string(),
        trigger: handle.spec.kind().to_string(),
        signature: handle.signature.clone(),
        schedule: handle.spec.clone(),
        next_run: *handle.next_run.lock(),
    }
}
