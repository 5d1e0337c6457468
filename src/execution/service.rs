//! Process-wide pipeline registry and chain orchestration

use crate::core::error::PipelineError;
use crate::core::importer::{PipelineImporter, PipelineSource, YamlImporter};
use crate::core::state::{PipelineKind, PipelineStatus};
use crate::execution::pipeline::Pipeline;
use crate::runtime::RuntimeExecutor;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Alias moved to every newly added pipeline
pub const LATEST_ALIAS: &str = "latest";

/// Statuses a resumed pipeline can settle in
const SETTLED: &[PipelineStatus] = &[
    PipelineStatus::Paused,
    PipelineStatus::Failed,
    PipelineStatus::Skipped,
    PipelineStatus::Successful,
];

/// Builds a fresh runtime executor for each pipeline
pub type RuntimeFactory = Arc<dyn Fn() -> Arc<dyn RuntimeExecutor> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Each pipeline gets `<workspace_root>/<id>` unless it names its own workspace
    pub workspace_root: PathBuf,
    /// Bound on kill-all at shutdown
    pub shutdown_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir);
        Self {
            workspace_root: data_dir.join("pipeline-engine").join("workspaces"),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl ServiceConfig {
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Options for [`PipelineService::add_pipeline`]
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub alias: Option<String>,
    pub kind: PipelineKind,
    /// Id or alias of the pipeline to run after this one
    pub next: Option<String>,
    pub workspace: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub id: Uuid,
    pub name: String,
    pub kind: PipelineKind,
    pub status: PipelineStatus,
    pub aliases: Vec<String>,
}

#[derive(Default)]
struct Registry {
    pipelines: HashMap<Uuid, Arc<Pipeline>>,
    order: Vec<Uuid>,
    aliases: HashMap<String, Uuid>,
}

pub struct PipelineService {
    registry: RwLock<Registry>,
    config: ServiceConfig,
    importer: Arc<dyn PipelineImporter>,
    runtime_factory: RuntimeFactory,
}

impl PipelineService {
    pub fn new(config: ServiceConfig, runtime_factory: RuntimeFactory) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            config,
            importer: Arc::new(YamlImporter),
            runtime_factory,
        }
    }

    pub fn with_importer(mut self, importer: Arc<dyn PipelineImporter>) -> Self {
        self.importer = importer;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Register a pipeline; it becomes `latest`
    pub async fn add_pipeline(
        &self,
        source: PipelineSource,
        options: PipelineOptions,
    ) -> Result<Arc<Pipeline>, PipelineError> {
        if let Some(alias) = options.alias.as_deref() {
            if alias == LATEST_ALIAS {
                return Err(PipelineError::InvalidOptions(format!(
                    "alias '{}' is assigned automatically",
                    LATEST_ALIAS
                )));
            }
            if alias.trim().is_empty() || Uuid::parse_str(alias).is_ok() {
                return Err(PipelineError::InvalidOptions(format!(
                    "'{}' cannot be used as an alias",
                    alias
                )));
            }
        }

        let next = match options.next.as_deref() {
            Some(key) => Some(self.get_pipeline(key).await?),
            None => None,
        };

        let id = Uuid::new_v4();
        let workspace = options
            .workspace
            .clone()
            .unwrap_or_else(|| self.config.workspace_root.join(id.to_string()));
        let pipeline = Pipeline::new(
            id,
            source,
            options.kind,
            workspace,
            Arc::clone(&self.importer),
            (self.runtime_factory)(),
        );
        pipeline.set_next(next.as_ref());

        let mut registry = self.registry.write().await;
        registry.pipelines.insert(id, Arc::clone(&pipeline));
        registry.order.push(id);
        registry.aliases.insert(LATEST_ALIAS.to_string(), id);
        if let Some(alias) = options.alias {
            registry.aliases.insert(alias, id);
        }

        info!(
            "Added {:?} pipeline {} from {}",
            options.kind,
            id,
            pipeline.source()
        );
        Ok(pipeline)
    }

    /// Look a pipeline up by id or alias
    pub async fn get_pipeline(&self, key: &str) -> Result<Arc<Pipeline>, PipelineError> {
        let registry = self.registry.read().await;
        let id = match Uuid::parse_str(key) {
            Ok(id) => Some(id),
            Err(_) => registry.aliases.get(key).copied(),
        };
        id.and_then(|id| registry.pipelines.get(&id).cloned())
            .ok_or_else(|| PipelineError::PipelineNotFound(key.to_string()))
    }

    /// Point `alias` at a pipeline, replacing any previous target
    pub async fn set_alias(&self, alias: &str, key: &str) -> Result<(), PipelineError> {
        if alias == LATEST_ALIAS || alias.trim().is_empty() {
            return Err(PipelineError::InvalidOptions(format!(
                "'{}' cannot be used as an alias",
                alias
            )));
        }
        let pipeline = self.get_pipeline(key).await?;
        self.registry
            .write()
            .await
            .aliases
            .insert(alias.to_string(), pipeline.id());
        Ok(())
    }

    /// Run `next` after `key` in the chain (`None` unlinks)
    pub async fn link(&self, key: &str, next: Option<&str>) -> Result<(), PipelineError> {
        let pipeline = self.get_pipeline(key).await?;
        let Some(next_key) = next else {
            pipeline.set_next(None);
            return Ok(());
        };

        let next = self.get_pipeline(next_key).await?;
        let mut cursor = Some(Arc::clone(&next));
        while let Some(current) = cursor {
            if current.id() == pipeline.id() {
                return Err(PipelineError::InvalidOptions(format!(
                    "linking {} to {} would create a cycle",
                    pipeline.id(),
                    next.id()
                )));
            }
            cursor = current.next();
        }

        pipeline.set_next(Some(&next));
        Ok(())
    }

    /// Registered pipelines in insertion order
    pub async fn list_pipelines(&self) -> Vec<PipelineSummary> {
        let registry = self.registry.read().await;
        registry
            .order
            .iter()
            .filter_map(|id| registry.pipelines.get(id))
            .map(|pipeline| {
                let mut aliases: Vec<String> = registry
                    .aliases
                    .iter()
                    .filter(|(_, target)| **target == pipeline.id())
                    .map(|(alias, _)| alias.clone())
                    .collect();
                aliases.sort();
                PipelineSummary {
                    id: pipeline.id(),
                    name: pipeline.name(),
                    kind: pipeline.kind(),
                    status: pipeline.status(),
                    aliases,
                }
            })
            .collect()
    }

    pub async fn status(&self, key: &str, chained: bool) -> Result<PipelineStatus, PipelineError> {
        let pipeline = self.get_pipeline(key).await?;
        Ok(if chained {
            pipeline.chained_status()
        } else {
            pipeline.status()
        })
    }

    /// Start a pipeline and everything chained after it; returns the chain's status
    ///
    /// After a failure, standard pipelines down the chain are skipped while
    /// teardown pipelines still run.
    pub async fn start_pipeline(&self, key: &str) -> Result<PipelineStatus, PipelineError> {
        let first = self.get_pipeline(key).await?;
        let status = first.status();
        if !status.is_startable() {
            return Err(PipelineError::InvalidState {
                id: first.id(),
                action: "start",
                status,
            });
        }

        run_chain(Some(Arc::clone(&first)), false).await;
        Ok(first.chained_status())
    }

    /// Run the pipelines chained after `key`, which must have finished
    pub async fn finish_chain(&self, key: &str) -> Result<PipelineStatus, PipelineError> {
        let first = self.get_pipeline(key).await?;
        let status = first.status();
        if !status.is_terminal() {
            return Err(PipelineError::InvalidState {
                id: first.id(),
                action: "continue the chain of",
                status,
            });
        }

        run_chain(first.next(), status != PipelineStatus::Successful).await;
        Ok(first.chained_status())
    }

    /// Resume and wait until the pipeline pauses or finishes
    pub async fn resume_pipeline(
        &self,
        key: &str,
        step: Option<&str>,
    ) -> Result<PipelineStatus, PipelineError> {
        let pipeline = self.settleable(key, "resume").await?;
        let settled = pipeline.await_status_change(Some(SETTLED));
        pipeline.resume(step)?;
        Ok(settled.await)
    }

    /// Run the next ready step and wait until the pipeline pauses or finishes
    pub async fn next_step_in_pipeline(&self, key: &str) -> Result<PipelineStatus, PipelineError> {
        let pipeline = self.settleable(key, "advance").await?;
        let settled = pipeline.await_status_change(Some(SETTLED));
        pipeline.next_step()?;
        Ok(settled.await)
    }

    async fn settleable(
        &self,
        key: &str,
        action: &'static str,
    ) -> Result<Arc<Pipeline>, PipelineError> {
        let pipeline = self.get_pipeline(key).await?;
        let status = pipeline.status();
        if status.is_terminal() {
            return Err(PipelineError::InvalidState {
                id: pipeline.id(),
                action,
                status,
            });
        }
        Ok(pipeline)
    }

    /// Kill every active pipeline
    pub async fn kill_all(&self) {
        let pipelines: Vec<Arc<Pipeline>> =
            self.registry.read().await.pipelines.values().cloned().collect();
        for pipeline in pipelines {
            pipeline.kill().await;
        }
    }

    /// `kill_all` bounded by the shutdown timeout; false when it did not finish
    pub async fn shutdown(&self) -> bool {
        match tokio::time::timeout(self.config.shutdown_timeout, self.kill_all()).await {
            Ok(()) => true,
            Err(_) => {
                error!(
                    "Pipelines still running after {:?}, giving up",
                    self.config.shutdown_timeout
                );
                false
            }
        }
    }

    /// On ctrl-c, kill everything and exit the process
    pub fn install_shutdown_handler(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Unable to listen for shutdown signal: {}", e);
                return;
            }
            warn!("Shutdown requested, killing all pipelines");
            let code = if service.shutdown().await { 130 } else { 1 };
            std::process::exit(code);
        })
    }
}

async fn run_chain(mut current: Option<Arc<Pipeline>>, mut failed: bool) {
    while let Some(pipeline) = current {
        if failed && pipeline.kind() == PipelineKind::Standard {
            info!("Skipping pipeline {} after an earlier failure", pipeline.id());
            pipeline.skip();
        } else {
            if let Err(e) = pipeline.start().await {
                debug!("Pipeline {} ended with error: {}", pipeline.id(), e);
            }
            if pipeline.status() != PipelineStatus::Successful {
                failed = true;
            }
        }
        current = pipeline.next();
    }
}
