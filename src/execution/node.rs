//! Handle on one node of a pipeline's tree

use crate::core::definition::{Condition, RegistryDefinition, RetryDefinition, StepDefinition};
use crate::core::environment::Environment;
use crate::core::error::PipelineError;
use crate::core::state::{NodeType, StepStatus};
use crate::core::tree::{NodeId, Tree};
use crate::execution::pipeline::Pipeline;
use crate::execution::{step, steps};
use crate::runtime::RuntimeExecutor;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub type NodeFuture = Pin<Box<dyn Future<Output = Result<(), PipelineError>> + Send>>;

/// Decorator settings of a node, with `$$` tokens resolved
#[derive(Debug, Clone, Default)]
pub struct NodeSettings {
    pub when: Option<Vec<Condition>>,
    pub retry: Option<RetryDefinition>,
    pub timeout: Option<String>,
    pub loop_count: Option<String>,
    pub continue_on_fail: bool,
}

/// A Step or Steps node, addressed by id inside its pipeline's tree
#[derive(Clone)]
pub struct NodeHandle {
    pipeline: Arc<Pipeline>,
    tree: Arc<Mutex<Tree>>,
    id: NodeId,
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("pipeline", &self.pipeline.id())
            .field("id", &self.id)
            .field("name", &self.name())
            .finish()
    }
}

impl NodeHandle {
    pub(crate) fn new(pipeline: Arc<Pipeline>, tree: Arc<Mutex<Tree>>, id: NodeId) -> Self {
        Self { pipeline, tree, id }
    }

    fn tree(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self, id: NodeId) -> NodeHandle {
        NodeHandle::new(Arc::clone(&self.pipeline), Arc::clone(&self.tree), id)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> String {
        self.tree().name(self.id).to_string()
    }

    /// Enclosing group; `None` at the root, whose parent is the pipeline itself
    pub fn parent(&self) -> Option<NodeHandle> {
        let parent = self.tree().parent(self.id)?;
        Some(self.handle(parent))
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn node_type(&self) -> NodeType {
        self.tree().node_type(self.id).unwrap_or(NodeType::Step)
    }

    pub fn descendants(&self, include_self: bool) -> Vec<NodeHandle> {
        let ids = self.tree().descendants(self.id, include_self);
        ids.into_iter().map(|id| self.handle(id)).collect()
    }

    pub fn children(&self) -> Vec<NodeHandle> {
        let ids = self.tree().children(self.id).to_vec();
        ids.into_iter().map(|id| self.handle(id)).collect()
    }

    /// Child at `index`, read fresh so loop expansion is seen
    pub fn child(&self, index: usize) -> Option<NodeHandle> {
        let id = self.tree().children(self.id).get(index).copied()?;
        Some(self.handle(id))
    }

    pub fn is_parallel(&self) -> bool {
        self.tree()
            .group(self.id)
            .is_some_and(|g| g.definition.parallel)
    }

    pub fn errors(&self) -> Vec<String> {
        self.tree()
            .node(self.id)
            .map(|n| n.errors.clone())
            .unwrap_or_default()
    }

    pub(crate) fn push_error(&self, error: String) {
        if let Some(node) = self.tree().node_mut(self.id) {
            node.errors.push(error);
        }
    }

    pub fn environment(&self) -> Environment {
        self.pipeline.environment()
    }

    pub fn exec(&self) -> Arc<dyn RuntimeExecutor> {
        self.pipeline.runtime()
    }

    pub fn workspace_path(&self) -> PathBuf {
        self.pipeline.workspace().to_path_buf()
    }

    pub fn registries(&self) -> Vec<RegistryDefinition> {
        self.pipeline.registries()
    }

    pub fn status(&self) -> StepStatus {
        self.tree().status(self.id)
    }

    /// On a group this cascades to every child
    pub fn set_status(&self, status: StepStatus) {
        self.tree().set_status(self.id, status);
    }

    pub(crate) fn begin(&self) -> bool {
        self.tree().begin(self.id)
    }

    /// `running` -> `successful`; any other status is left alone
    pub(crate) fn complete(&self) {
        let mut tree = self.tree();
        if let Some(step) = tree.step_mut(self.id) {
            if step.status == StepStatus::Running {
                step.status = StepStatus::Successful;
            }
        }
    }

    /// Skip every `ready` step in the pipeline
    pub(crate) fn skip_remaining_steps(&self) -> usize {
        let mut tree = self.tree();
        let root = tree.root();
        tree.skip_ready_steps(root)
    }

    /// Skip the `ready` steps below this node
    pub(crate) fn skip_ready_steps(&self) -> usize {
        self.tree().skip_ready_steps(self.id)
    }

    /// Working definition of a step
    pub fn definition(&self) -> Option<StepDefinition> {
        self.tree().step(self.id).map(|s| s.definition.clone())
    }

    /// Definition as it was when the tree was built
    pub fn original_definition(&self) -> Option<StepDefinition> {
        self.tree().step(self.id).map(|s| s.original.clone())
    }

    pub(crate) fn update_definition(&self, update: impl FnOnce(&mut StepDefinition)) -> Option<StepDefinition> {
        let mut tree = self.tree();
        let step = tree.step_mut(self.id)?;
        update(&mut step.definition);
        Some(step.definition.clone())
    }

    pub(crate) fn set_exit_code(&self, code: Option<i32>) {
        if let Some(step) = self.tree().step_mut(self.id) {
            step.definition.exit_code = code;
        }
    }

    /// Pipeline environment overlaid with a step's own entries
    pub fn scoped_environment(&self) -> Environment {
        let environment = self.environment();
        match self.definition() {
            Some(definition) => definition.scoped_environment(&environment),
            None => environment,
        }
    }

    /// Substitute `$$` tokens in the working definition
    pub(crate) fn apply_environment(&self) {
        let environment = self.environment();
        let registries = self.registries();
        self.update_definition(|d| d.apply_environment(&environment, &registries));
    }

    /// Definition checks on the working definition
    pub(crate) fn validate(&self) -> Vec<String> {
        let registries = self.registries();
        let tree = self.tree();
        match tree.step(self.id) {
            Some(step) => step.definition.validate(&registries),
            None => tree
                .group(self.id)
                .map(|g| g.definition.validate_settings())
                .unwrap_or_default(),
        }
    }

    /// Decorator settings, read at call time
    pub fn settings(&self) -> NodeSettings {
        let environment = self.environment();
        let registries = self.registries();
        let tree = self.tree();

        if let Some(step) = tree.step(self.id) {
            let mut definition = step.definition.clone();
            drop(tree);
            definition.apply_environment(&environment, &registries);
            return NodeSettings {
                when: definition.when,
                retry: definition.retry,
                timeout: definition.timeout,
                loop_count: definition.loop_count,
                continue_on_fail: definition.continue_on_fail,
            };
        }

        let Some(group) = tree.group(self.id) else {
            return NodeSettings::default();
        };
        let substitute = |v: &Option<String>| v.as_ref().map(|s| environment.substitute(s));
        NodeSettings {
            when: group.definition.when.clone(),
            retry: group.definition.retry.as_ref().map(|r| RetryDefinition {
                iterations: substitute(&r.iterations),
                backoff: substitute(&r.backoff),
            }),
            timeout: substitute(&group.definition.timeout),
            loop_count: None,
            continue_on_fail: false,
        }
    }

    /// Replace this step by a group of its iterations and return the group
    pub(crate) fn expand(&self, iterations: Vec<StepDefinition>) -> Option<NodeHandle> {
        let registries = self.registries();
        let group = self.tree().expand(self.id, iterations, &registries)?;
        Some(self.handle(group))
    }

    /// Run the node: Step or Steps semantics depending on its type
    pub fn start(&self) -> NodeFuture {
        match self.node_type() {
            NodeType::Step => Box::pin(step::start(self.clone())),
            NodeType::Steps => Box::pin(steps::start(self.clone())),
        }
    }
}
