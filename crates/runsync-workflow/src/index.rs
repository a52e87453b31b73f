use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::error::WorkflowError;
use crate::node::{Node, NodeRuntime};
use crate::workflow::Workflow;

/// One hop from a node (or from the root node list) towards a descendant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
  /// Index into the current node list: the root list for the first step,
  /// the current node's subgraph node list afterwards.
  Node(usize),
  /// Index into the current node's middleware chain.
  Middleware(usize),
}

/// Which kind of container owns a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeSlot {
  Root,
  Middleware { host_id: String },
  Subgraph { container_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLocation {
  pub slot: NodeSlot,
  pub path: Vec<Step>,
}

/// Flat lookup table from node id to its position in the workflow tree.
#[derive(Debug, Clone, Default)]
pub struct NodeIndex {
  locations: HashMap<String, NodeLocation>,
}

impl NodeIndex {
  /// Index every node of the workflow, including middleware and nested
  /// subgraph nodes at any depth.
  pub fn build(workflow: &Workflow) -> Result<Self, WorkflowError> {
    let mut index = Self::default();
    for (i, node) in workflow.nodes.iter().enumerate() {
      index.visit(node, vec![Step::Node(i)], NodeSlot::Root)?;
    }
    Ok(index)
  }

  fn visit(&mut self, node: &Node, path: Vec<Step>, slot: NodeSlot) -> Result<(), WorkflowError> {
    for (j, middleware) in node.middleware.iter().enumerate() {
      let mut child_path = path.clone();
      child_path.push(Step::Middleware(j));
      self.visit(
        middleware,
        child_path,
        NodeSlot::Middleware {
          host_id: node.node_id.clone(),
        },
      )?;
    }

    if let Some(children) = node.subgraph_nodes() {
      for (k, child) in children.iter().enumerate() {
        let mut child_path = path.clone();
        child_path.push(Step::Node(k));
        self.visit(
          child,
          child_path,
          NodeSlot::Subgraph {
            container_id: node.node_id.clone(),
          },
        )?;
      }
    }

    match self.locations.entry(node.node_id.clone()) {
      Entry::Occupied(_) => Err(WorkflowError::DuplicateNode {
        node_id: node.node_id.clone(),
      }),
      Entry::Vacant(entry) => {
        entry.insert(NodeLocation { slot, path });
        Ok(())
      }
    }
  }

  pub fn locate(&self, node_id: &str) -> Option<&NodeLocation> {
    self.locations.get(node_id)
  }

  pub fn len(&self) -> usize {
    self.locations.len()
  }

  pub fn is_empty(&self) -> bool {
    self.locations.is_empty()
  }
}

fn resolve<'a>(nodes: &'a [Node], path: &[Step]) -> Option<&'a Node> {
  let (first, rest) = path.split_first()?;
  let Step::Node(i) = first else {
    return None;
  };
  let mut node = nodes.get(*i)?;
  for step in rest {
    node = match step {
      Step::Middleware(j) => node.middleware.get(*j)?,
      Step::Node(k) => node.subgraph_nodes()?.get(*k)?,
    };
  }
  Some(node)
}

fn resolve_mut<'a>(nodes: &'a mut [Node], path: &[Step]) -> Option<&'a mut Node> {
  let (first, rest) = path.split_first()?;
  let Step::Node(i) = first else {
    return None;
  };
  let mut node = nodes.get_mut(*i)?;
  for step in rest {
    node = match step {
      Step::Middleware(j) => node.middleware.get_mut(*j)?,
      Step::Node(k) => node.subgraph_nodes_mut()?.get_mut(*k)?,
    };
  }
  Some(node)
}

/// A workflow paired with an index that is rebuilt whenever the definition
/// is replaced.
#[derive(Debug, Clone)]
pub struct IndexedWorkflow {
  workflow: Workflow,
  index: NodeIndex,
}

impl IndexedWorkflow {
  /// Index a workflow after checking its edges.
  pub fn new(workflow: Workflow) -> Result<Self, WorkflowError> {
    workflow.validate_edges()?;
    let index = NodeIndex::build(&workflow)?;
    Ok(Self { workflow, index })
  }

  pub fn workflow(&self) -> &Workflow {
    &self.workflow
  }

  pub fn index(&self) -> &NodeIndex {
    &self.index
  }

  /// Swap in a new definition. On error the current one is kept.
  pub fn replace(&mut self, workflow: Workflow) -> Result<(), WorkflowError> {
    workflow.validate_edges()?;
    let index = NodeIndex::build(&workflow)?;
    self.workflow = workflow;
    self.index = index;
    Ok(())
  }

  pub fn node(&self, node_id: &str) -> Option<&Node> {
    let location = self.index.locate(node_id)?;
    resolve(&self.workflow.nodes, &location.path).filter(|n| n.node_id == node_id)
  }

  pub fn node_mut(&mut self, node_id: &str) -> Option<&mut Node> {
    let location = self.index.locate(node_id)?;
    resolve_mut(&mut self.workflow.nodes, &location.path).filter(|n| n.node_id == node_id)
  }

  /// Reset the runtime of every node. Returns whether any node had one.
  pub fn clear_runtime(&mut self) -> bool {
    clear_runtime(&mut self.workflow.nodes)
  }
}

fn clear_runtime(nodes: &mut [Node]) -> bool {
  let mut changed = false;
  for node in nodes {
    if node.runtime != NodeRuntime::default() {
      node.runtime = NodeRuntime::default();
      changed = true;
    }
    changed |= clear_runtime(&mut node.middleware);
    if let Some(children) = node.subgraph_nodes_mut() {
      changed |= clear_runtime(children);
    }
  }
  changed
}
