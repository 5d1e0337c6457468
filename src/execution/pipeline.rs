//! Pipeline aggregate: owns the environment, the node tree and the status state machine

use crate::core::definition::RegistryDefinition;
use crate::core::environment::{Environment, Variable};
use crate::core::error::PipelineError;
use crate::core::importer::{PipelineImporter, PipelineSource};
use crate::core::state::{PipelineKind, PipelineStatus};
use crate::core::tree::{NodeDescription, Tree};
use crate::execution::node::NodeHandle;
use crate::runtime::{RuntimeContext, RuntimeExecutor};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Internal variable holding the pipeline id
pub const PIPELINE_ID_VAR: &str = "PIPELINE_ID";
/// Internal variable holding the workspace path
pub const PIPELINE_WORKSPACE_VAR: &str = "PIPELINE_WORKSPACE";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State available once the definition has been loaded and validated
#[derive(Debug)]
struct LoadedPipeline {
    name: String,
    registries: Vec<RegistryDefinition>,
    tree: Arc<Mutex<Tree>>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Timestamps {
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Snapshot returned by [`Pipeline::describe_sequence`]
#[derive(Debug, Clone, Serialize)]
pub struct SequenceDescription {
    pub id: Uuid,
    pub name: String,
    pub status: PipelineStatus,
    pub breakpoint: Option<String>,
    pub sequence: Option<NodeDescription>,
    pub environment_keys: BTreeSet<String>,
    pub timestamps: Timestamps,
}

pub struct Pipeline {
    id: Uuid,
    kind: PipelineKind,
    source: PipelineSource,
    workspace: PathBuf,
    importer: Arc<dyn PipelineImporter>,
    runtime: Arc<dyn RuntimeExecutor>,
    status: watch::Sender<PipelineStatus>,
    environment: Mutex<Environment>,
    loaded: OnceLock<LoadedPipeline>,
    load_guard: Mutex<()>,
    breakpoint: Mutex<Option<String>>,
    next: Mutex<Option<Weak<Pipeline>>>,
    errors: Mutex<Vec<String>>,
    timestamps: Mutex<Timestamps>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("status", &self.status())
            .field("workspace", &self.workspace)
            .finish()
    }
}

impl Pipeline {
    pub fn new(
        id: Uuid,
        source: PipelineSource,
        kind: PipelineKind,
        workspace: PathBuf,
        importer: Arc<dyn PipelineImporter>,
        runtime: Arc<dyn RuntimeExecutor>,
    ) -> Arc<Self> {
        let mut environment = Environment::new();
        environment
            .add_variable(Variable::internal(PIPELINE_ID_VAR, id.to_string()))
            .ok();
        environment
            .add_variable(Variable::internal(
                PIPELINE_WORKSPACE_VAR,
                workspace.display().to_string(),
            ))
            .ok();

        let (status, _) = watch::channel(PipelineStatus::Ready);
        Arc::new(Self {
            id,
            kind,
            source,
            workspace,
            importer,
            runtime,
            status,
            environment: Mutex::new(environment),
            loaded: OnceLock::new(),
            load_guard: Mutex::new(()),
            breakpoint: Mutex::new(None),
            next: Mutex::new(None),
            errors: Mutex::new(Vec::new()),
            timestamps: Mutex::new(Timestamps {
                created_at: Some(Utc::now()),
                ..Timestamps::default()
            }),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    pub fn source(&self) -> &PipelineSource {
        &self.source
    }

    /// Definition name once loaded, otherwise a label for the source
    pub fn name(&self) -> String {
        match self.loaded.get() {
            Some(loaded) => loaded.name.clone(),
            None => self.source.to_string(),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn runtime(&self) -> Arc<dyn RuntimeExecutor> {
        Arc::clone(&self.runtime)
    }

    pub fn registries(&self) -> Vec<RegistryDefinition> {
        self.loaded
            .get()
            .map(|l| l.registries.clone())
            .unwrap_or_default()
    }

    pub fn status(&self) -> PipelineStatus {
        *self.status.borrow()
    }

    pub fn breakpoint(&self) -> Option<String> {
        lock(&self.breakpoint).clone()
    }

    pub fn timestamps(&self) -> Timestamps {
        *lock(&self.timestamps)
    }

    /// Copy of the pipeline environment
    pub fn environment(&self) -> Environment {
        lock(&self.environment).clone()
    }

    /// Add or overwrite a pipeline variable
    pub fn set_variable(&self, variable: Variable) -> Result<(), PipelineError> {
        lock(&self.environment).add_variable(variable)
    }

    pub fn next(&self) -> Option<Arc<Pipeline>> {
        lock(&self.next).as_ref().and_then(Weak::upgrade)
    }

    pub fn set_next(&self, next: Option<&Arc<Pipeline>>) {
        *lock(&self.next) = next.map(Arc::downgrade);
    }

    /// Own status, or for `successful` pipelines the first non-successful status down the chain
    pub fn chained_status(&self) -> PipelineStatus {
        let mut status = self.status();
        let mut next = self.next();
        while status == PipelineStatus::Successful {
            match next {
                Some(pipeline) => {
                    status = pipeline.status();
                    next = pipeline.next();
                }
                None => break,
            }
        }
        status
    }

    /// Pipeline-level errors followed by every node's definition and run errors
    pub fn errors(&self) -> Vec<String> {
        let mut errors = lock(&self.errors).clone();
        if let Some(loaded) = self.loaded.get() {
            errors.extend(lock(&loaded.tree).errors());
        }
        errors
    }

    fn record_error(&self, error: String) {
        lock(&self.errors).push(error);
    }

    fn set_status(&self, status: PipelineStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            debug!("Pipeline {} {} -> {}", self.id, previous, status);
        }
    }

    /// Change status unless the pipeline already reached a terminal one
    fn advance(&self, status: PipelineStatus) -> bool {
        let id = self.id;
        self.status.send_if_modified(|current| {
            if current.is_terminal() || *current == status {
                return false;
            }
            debug!("Pipeline {} {} -> {}", id, current, status);
            *current = status;
            true
        })
    }

    /// Import, validate and build the tree; a no-op once loaded
    pub fn load_and_validate(&self) -> Result<(), PipelineError> {
        let _guard = lock(&self.load_guard);

        if self.loaded.get().is_some() {
            return Ok(());
        }
        if self.status() != PipelineStatus::Ready {
            return Err(PipelineError::Validation {
                errors: self.errors(),
            });
        }

        let imported = self.importer.import(&self.source);
        let mut errors = imported.errors;

        let Some(definition) = imported.definition else {
            return Err(self.fail_validation(errors));
        };

        let tree = Tree::build(&definition);
        errors.extend(tree.errors());

        {
            let mut environment = lock(&self.environment);
            for variable in definition.variables() {
                if let Err(e) = environment.add_variable(variable) {
                    errors.push(e.to_string());
                }
            }
        }

        if !errors.is_empty() {
            return Err(self.fail_validation(errors));
        }

        let name = definition
            .name
            .clone()
            .unwrap_or_else(|| self.source.to_string());
        info!("Loaded pipeline '{}' ({})", name, self.id);

        // Still empty: loaders hold the guard
        let _ = self.loaded.set(LoadedPipeline {
            name,
            registries: definition.registries.clone(),
            tree: Arc::new(Mutex::new(tree)),
        });
        self.set_status(PipelineStatus::Loaded);
        Ok(())
    }

    fn fail_validation(&self, errors: Vec<String>) -> PipelineError {
        for e in &errors {
            warn!("Pipeline {} definition error: {}", self.id, e);
        }
        lock(&self.errors).extend(errors.iter().cloned());
        self.set_status(PipelineStatus::Failed);
        PipelineError::Validation { errors }
    }

    fn loaded(&self) -> Result<&LoadedPipeline, PipelineError> {
        self.loaded.get().ok_or(PipelineError::InvalidState {
            id: self.id,
            action: "inspect",
            status: self.status(),
        })
    }

    /// Handle on the root group
    pub fn root(self: &Arc<Self>) -> Result<NodeHandle, PipelineError> {
        let loaded = self.loaded()?;
        let root = lock(&loaded.tree).root();
        Ok(NodeHandle::new(Arc::clone(self), Arc::clone(&loaded.tree), root))
    }

    /// Handle on the first reachable node with the given name
    pub fn node(self: &Arc<Self>, name: &str) -> Result<NodeHandle, PipelineError> {
        let loaded = self.loaded()?;
        let id = lock(&loaded.tree)
            .find_by_name(name)
            .ok_or_else(|| PipelineError::NodeNotFound(name.to_string()))?;
        Ok(NodeHandle::new(Arc::clone(self), Arc::clone(&loaded.tree), id))
    }

    fn runtime_context(&self) -> RuntimeContext {
        RuntimeContext {
            pipeline_id: self.id,
            pipeline_name: self.name(),
            workspace: self.workspace.clone(),
            environment: self.environment(),
            registries: self.registries(),
        }
    }

    /// Run the whole tree: initializing -> running -> successful | failed
    ///
    /// The runtime is torn down whatever the outcome.
    pub async fn start(self: &Arc<Self>) -> Result<(), PipelineError> {
        self.load_and_validate()?;

        let claimed = self.status.send_if_modified(|status| {
            if status.is_startable() {
                *status = PipelineStatus::Initializing;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(PipelineError::InvalidState {
                id: self.id,
                action: "start",
                status: self.status(),
            });
        }

        lock(&self.timestamps).started_at = Some(Utc::now());
        info!("Starting pipeline '{}' ({})", self.name(), self.id);

        let result = self.run().await;
        match &result {
            Ok(()) => {
                self.advance(PipelineStatus::Successful);
            }
            Err(e) => {
                error!("Pipeline '{}' ({}) failed: {}", self.name(), self.id, e);
                self.record_error(e.to_string());
                self.advance(PipelineStatus::Failed);
            }
        }

        if let Err(e) = self.runtime.tear_down().await {
            warn!("Runtime teardown for pipeline {} failed: {}", self.id, e);
        }
        lock(&self.timestamps).finished_at = Some(Utc::now());
        info!("Pipeline '{}' finished: {}", self.name(), self.status());

        result
    }

    async fn run(self: &Arc<Self>) -> Result<(), PipelineError> {
        self.runtime.init(&self.runtime_context()).await?;
        self.advance(PipelineStatus::Running);
        self.root()?.start().await
    }

    /// Set status `paused`
    pub fn pause(&self) {
        self.set_status(PipelineStatus::Paused);
    }

    /// Pause if `name` is the current breakpoint
    pub(crate) fn pause_at_breakpoint(&self, name: &str) {
        if lock(&self.breakpoint).as_deref() != Some(name) {
            return;
        }
        if self.advance(PipelineStatus::Paused) {
            info!("Pipeline {} paused at '{}'", self.id, name);
        }
    }

    /// Move a breakpoint on one of `children` up to `group`
    pub(crate) fn widen_breakpoint(&self, children: &[String], group: &str) {
        let mut breakpoint = lock(&self.breakpoint);
        if let Some(current) = breakpoint.as_ref() {
            if children.contains(current) {
                debug!("Breakpoint '{}' widened to parallel group '{}'", current, group);
                *breakpoint = Some(group.to_string());
            }
        }
    }

    /// Run until `step` (or to the end) from `ready`, `loaded` or `paused`
    pub fn resume(self: &Arc<Self>, step: Option<&str>) -> Result<(), PipelineError> {
        let status = self.status();
        if status.is_terminal() {
            return Err(PipelineError::InvalidState {
                id: self.id,
                action: "resume",
                status,
            });
        }
        self.load_and_validate()?;

        let breakpoint = match step {
            Some(name) => {
                let loaded = self.loaded()?;
                let tree = lock(&loaded.tree);
                let id = tree
                    .find_by_name(name)
                    .ok_or_else(|| PipelineError::NodeNotFound(name.to_string()))?;
                // Resuming to the last node is running to completion
                (!tree.is_last(id)).then(|| name.to_string())
            }
            None => None,
        };
        info!(
            "Resuming pipeline {} until {}",
            self.id,
            breakpoint.as_deref().unwrap_or("the end")
        );
        *lock(&self.breakpoint) = breakpoint;

        if self.status().is_startable() {
            let pipeline = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = pipeline.start().await {
                    debug!("Pipeline {} run ended with error: {}", pipeline.id, e);
                }
            });
        } else {
            let id = self.id;
            self.status.send_if_modified(|status| {
                if *status == PipelineStatus::Paused {
                    debug!("Pipeline {} paused -> running", id);
                    *status = PipelineStatus::Running;
                    true
                } else {
                    false
                }
            });
        }
        Ok(())
    }

    /// Advance to the next `ready` step by placing the breakpoint on it
    pub fn next_step(self: &Arc<Self>) -> Result<(), PipelineError> {
        let status = self.status();
        if status.is_terminal() {
            return Err(PipelineError::InvalidState {
                id: self.id,
                action: "advance",
                status,
            });
        }
        self.load_and_validate()?;

        let next = {
            let tree = lock(&self.loaded()?.tree);
            tree.first_ready_step().map(|id| tree.name(id).to_string())
        };
        self.resume(next.as_deref())
    }

    /// Stop an active pipeline: pause, tear the runtime down, then `skipped`
    pub async fn kill(&self) {
        let paused = self.status.send_if_modified(|status| {
            if status.is_active() {
                *status = PipelineStatus::Paused;
                true
            } else {
                false
            }
        });
        if !paused {
            return;
        }

        warn!("Killing pipeline {}", self.id);
        if let Err(e) = self.runtime.tear_down().await {
            warn!("Runtime teardown for pipeline {} failed: {}", self.id, e);
        }
        self.advance(PipelineStatus::Skipped);
    }

    /// Mark a pipeline that will never run as `skipped`
    pub(crate) fn skip(&self) {
        if self.status().is_startable() {
            self.set_status(PipelineStatus::Skipped);
        }
    }

    /// Suspend until the pipeline is no longer paused
    pub(crate) async fn wait_while_paused(&self) {
        let mut rx = self.status.subscribe();
        if rx.wait_for(|s| *s != PipelineStatus::Paused).await.is_err() {
            warn!("Pipeline {} status channel closed", self.id);
        }
    }

    /// Resolves on the next change to one of `statuses` (any change when `None`)
    ///
    /// Resolves immediately when the pipeline is already terminal, and when it
    /// becomes terminal without matching.
    pub fn await_status_change(
        &self,
        statuses: Option<&[PipelineStatus]>,
    ) -> impl Future<Output = PipelineStatus> + Send + 'static {
        let mut rx = self.status.subscribe();
        let wanted: Option<Vec<PipelineStatus>> = statuses.map(<[PipelineStatus]>::to_vec);
        // Baseline is taken now, not on first poll; later transitions mark the receiver changed
        let initial = *rx.borrow_and_update();

        async move {
            if initial.is_terminal() {
                return initial;
            }
            loop {
                if rx.changed().await.is_err() {
                    return *rx.borrow();
                }
                let status = *rx.borrow_and_update();
                let matched = wanted.as_ref().map_or(true, |w| w.contains(&status));
                if matched || status.is_terminal() {
                    return status;
                }
            }
        }
    }

    /// Id, status, breakpoint and the nested node view
    pub fn describe_sequence(&self) -> SequenceDescription {
        let (sequence, environment_keys) = match self.loaded.get() {
            Some(loaded) => {
                let tree = lock(&loaded.tree);
                (Some(tree.describe(tree.root())), tree.environment_keys())
            }
            None => (None, BTreeSet::new()),
        };

        SequenceDescription {
            id: self.id,
            name: self.name(),
            status: self.status(),
            breakpoint: self.breakpoint(),
            sequence,
            environment_keys,
            timestamps: self.timestamps(),
        }
    }
}
