//! Arena-backed Steps/Step tree
//!
//! Nodes are never removed. Loop and for-each expansion appends a group
//! and swaps it into the parent's child list, so the original step stays
//! in the arena but is no longer reachable from the root.

use crate::core::definition::{
    GroupDefinition, NodeDefinition, PipelineDefinition, RegistryDefinition, StepDefinition,
};
use crate::core::state::{NodeType, StepStatus};
use serde::Serialize;
use std::collections::BTreeSet;

pub type NodeId = usize;

/// Name given to the implicit top-level group
pub const ROOT_NAME: &str = "root";

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    /// `None` only for the root
    pub parent: Option<NodeId>,
    /// Definition errors accumulated while building or running the node
    pub errors: Vec<String>,
    pub kind: NodeKind,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Step(StepNode),
    Steps(StepsNode),
}

#[derive(Debug, Clone)]
pub struct StepNode {
    /// Snapshot taken when the tree was built
    pub original: StepDefinition,
    /// Working copy mutated by decorators
    pub definition: StepDefinition,
    pub status: StepStatus,
}

#[derive(Debug, Clone)]
pub struct StepsNode {
    /// Group settings; the children live in `children`
    pub definition: GroupDefinition,
    pub children: Vec<NodeId>,
}

/// Nested name/status view of a subtree
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeDescription {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<NodeDescription>>,
}

#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Tree {
    /// Build the tree and run the definition checks of every node
    pub fn build(definition: &PipelineDefinition) -> Self {
        let mut tree = Tree {
            nodes: Vec::new(),
            root: 0,
        };

        let root = GroupDefinition {
            name: ROOT_NAME.to_string(),
            steps: definition.steps.clone(),
            ..GroupDefinition::default()
        };
        tree.root = tree.add_group(&root, None, &definition.registries);
        tree
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn add_group(
        &mut self,
        group: &GroupDefinition,
        parent: Option<NodeId>,
        registries: &[RegistryDefinition],
    ) -> NodeId {
        let errors = if parent.is_some() { group.validate() } else { Vec::new() };
        let settings = GroupDefinition {
            steps: Vec::new(),
            ..group.clone()
        };

        let id = self.push(Node {
            name: group.name.clone(),
            parent,
            errors,
            kind: NodeKind::Steps(StepsNode {
                definition: settings,
                children: Vec::new(),
            }),
        });

        let children: Vec<NodeId> = group
            .steps
            .iter()
            .map(|child| match child {
                NodeDefinition::Group(g) => self.add_group(g, Some(id), registries),
                NodeDefinition::Step(s) => self.add_step(s, id, registries),
            })
            .collect();

        if let NodeKind::Steps(steps) = &mut self.nodes[id].kind {
            steps.children = children;
        }
        id
    }

    fn add_step(
        &mut self,
        step: &StepDefinition,
        parent: NodeId,
        registries: &[RegistryDefinition],
    ) -> NodeId {
        self.push(Node {
            name: step.name.clone(),
            parent: Some(parent),
            errors: step.validate(registries),
            kind: NodeKind::Step(StepNode {
                original: step.clone(),
                definition: step.clone(),
                status: StepStatus::Ready,
            }),
        })
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn name(&self, id: NodeId) -> &str {
        self.nodes.get(id).map(|n| n.name.as_str()).unwrap_or_default()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id).and_then(|n| n.parent)
    }

    pub fn node_type(&self, id: NodeId) -> Option<NodeType> {
        self.nodes.get(id).map(|n| match n.kind {
            NodeKind::Step(_) => NodeType::Step,
            NodeKind::Steps(_) => NodeType::Steps,
        })
    }

    pub fn step(&self, id: NodeId) -> Option<&StepNode> {
        match self.nodes.get(id).map(|n| &n.kind) {
            Some(NodeKind::Step(step)) => Some(step),
            _ => None,
        }
    }

    pub fn step_mut(&mut self, id: NodeId) -> Option<&mut StepNode> {
        match self.nodes.get_mut(id).map(|n| &mut n.kind) {
            Some(NodeKind::Step(step)) => Some(step),
            _ => None,
        }
    }

    pub fn group(&self, id: NodeId) -> Option<&StepsNode> {
        match self.nodes.get(id).map(|n| &n.kind) {
            Some(NodeKind::Steps(steps)) => Some(steps),
            _ => None,
        }
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.group(id).map(|g| g.children.as_slice()).unwrap_or_default()
    }

    /// Depth-first, pre-order; a step yields just itself
    pub fn descendants(&self, id: NodeId, include_self: bool) -> Vec<NodeId> {
        let mut out = Vec::new();
        match self.nodes.get(id).map(|n| &n.kind) {
            Some(NodeKind::Step(_)) => out.push(id),
            Some(NodeKind::Steps(group)) => {
                if include_self {
                    out.push(id);
                }
                for &child in &group.children {
                    out.extend(self.descendants(child, true));
                }
            }
            None => {}
        }
        out
    }

    /// Flattened leaf steps under `id`, in declaration order
    pub fn steps(&self, id: NodeId) -> Vec<NodeId> {
        self.descendants(id, true)
            .into_iter()
            .filter(|&n| self.step(n).is_some())
            .collect()
    }

    /// Ancestors of `id`, nearest first, ending at the root
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.parent(id);
        while let Some(parent) = current {
            out.push(parent);
            current = self.parent(parent);
        }
        out
    }

    /// First reachable node with the given name
    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.descendants(self.root, true)
            .into_iter()
            .find(|&id| self.name(id) == name)
    }

    /// Whether `id` is the last leaf or a group that ends with it
    pub fn is_last(&self, id: NodeId) -> bool {
        match self.steps(self.root).last() {
            Some(&last) => last == id || self.ancestors(last).contains(&id),
            None => false,
        }
    }

    pub fn first_ready_step(&self) -> Option<NodeId> {
        self.steps(self.root)
            .into_iter()
            .find(|&id| self.status(id) == StepStatus::Ready)
    }

    /// Step status, or the status a group derives from its leaves
    pub fn status(&self, id: NodeId) -> StepStatus {
        match self.nodes.get(id).map(|n| &n.kind) {
            Some(NodeKind::Step(step)) => step.status,
            Some(NodeKind::Steps(_)) => {
                let statuses: Vec<StepStatus> =
                    self.steps(id).into_iter().map(|s| self.status(s)).collect();
                derive_group_status(&statuses)
            }
            None => StepStatus::Ready,
        }
    }

    /// Set a step's status; on a group, cascade to every child
    pub fn set_status(&mut self, id: NodeId, status: StepStatus) {
        let children = match self.nodes.get_mut(id).map(|n| &mut n.kind) {
            Some(NodeKind::Step(step)) => {
                step.status = status;
                return;
            }
            Some(NodeKind::Steps(group)) => group.children.clone(),
            None => return,
        };
        for child in children {
            self.set_status(child, status);
        }
    }

    /// Mark every `ready` step under `id` `skipped`; returns how many changed
    pub fn skip_ready_steps(&mut self, id: NodeId) -> usize {
        let ready: Vec<NodeId> = self
            .steps(id)
            .into_iter()
            .filter(|&id| self.status(id) == StepStatus::Ready)
            .collect();
        for &id in &ready {
            self.set_status(id, StepStatus::Skipped);
        }
        ready.len()
    }

    /// Move a step to `running` unless it was already skipped
    pub fn begin(&mut self, id: NodeId) -> bool {
        match self.step_mut(id) {
            Some(step) if step.status == StepStatus::Skipped => false,
            Some(step) => {
                step.status = StepStatus::Running;
                true
            }
            None => false,
        }
    }

    /// Replace a loop/for-each step by a group of its iterations
    ///
    /// The group inherits the step's name, `parallel` and `when`; it takes
    /// the step's place in the parent's child list.
    pub fn expand(
        &mut self,
        id: NodeId,
        iterations: Vec<StepDefinition>,
        registries: &[RegistryDefinition],
    ) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let step = self.step(id)?.definition.clone();

        let group = GroupDefinition {
            name: step.name.clone(),
            parallel: step.parallel,
            when: step.when.clone(),
            ..GroupDefinition::default()
        };
        let group_id = self.push(Node {
            name: group.name.clone(),
            parent: Some(parent),
            errors: Vec::new(),
            kind: NodeKind::Steps(StepsNode {
                definition: group,
                children: Vec::new(),
            }),
        });

        let children: Vec<NodeId> = iterations
            .iter()
            .map(|iteration| self.add_step(iteration, group_id, registries))
            .collect();
        if let NodeKind::Steps(g) = &mut self.nodes[group_id].kind {
            g.children = children;
        }

        if let NodeKind::Steps(p) = &mut self.nodes[parent].kind {
            if let Some(slot) = p.children.iter_mut().find(|c| **c == id) {
                *slot = group_id;
            }
        }
        Some(group_id)
    }

    /// Definition errors of every reachable node
    pub fn errors(&self) -> Vec<String> {
        self.descendants(self.root, true)
            .into_iter()
            .flat_map(|id| self.nodes[id].errors.iter().cloned())
            .collect()
    }

    pub fn describe(&self, id: NodeId) -> NodeDescription {
        let node_type = self.node_type(id).unwrap_or(NodeType::Step);
        let group = self.group(id);
        NodeDescription {
            name: self.name(id).to_string(),
            node_type,
            status: self.status(id),
            parallel: group.map(|g| g.definition.parallel),
            steps: group.map(|g| g.children.iter().map(|&c| self.describe(c)).collect()),
        }
    }

    /// Union of the step-level environment names across the tree
    pub fn environment_keys(&self) -> BTreeSet<String> {
        self.steps(self.root)
            .into_iter()
            .filter_map(|id| self.step(id))
            .flat_map(|step| step.original.environment_keys().map(str::to_string))
            .collect()
    }
}

fn derive_group_status(statuses: &[StepStatus]) -> StepStatus {
    let any = |wanted: StepStatus| statuses.contains(&wanted);

    if any(StepStatus::Running) {
        StepStatus::Running
    } else if any(StepStatus::Failed) {
        StepStatus::Failed
    } else if any(StepStatus::Ready) {
        StepStatus::Ready
    } else if !statuses.is_empty() && statuses.iter().all(|s| *s == StepStatus::Skipped) {
        StepStatus::Skipped
    } else if statuses.is_empty() {
        StepStatus::Ready
    } else {
        StepStatus::Successful
    }
}
