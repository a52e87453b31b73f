use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;
use crate::node::{Node, NodeType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
  pub from: String,
  pub to: String,
}

/// A workflow definition loaded into the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
  pub workflow_id: String,
  pub name: String,
  pub nodes: Vec<Node>,
  #[serde(default)]
  pub edges: Vec<Edge>,
}

impl Workflow {
  pub fn from_json(json: &str) -> Result<Self, WorkflowError> {
    Ok(serde_json::from_str(json)?)
  }

  /// Check that every edge, at every nesting level, joins nodes of that level.
  pub fn validate_edges(&self) -> Result<(), WorkflowError> {
    validate_level(&self.nodes, &self.edges)
  }
}

fn validate_level(nodes: &[Node], edges: &[Edge]) -> Result<(), WorkflowError> {
  let ids: HashSet<&str> = nodes.iter().map(|n| n.node_id.as_str()).collect();
  if let Some(edge) = edges
    .iter()
    .find(|e| !ids.contains(e.from.as_str()) || !ids.contains(e.to.as_str()))
  {
    return Err(WorkflowError::InvalidEdge {
      from: edge.from.clone(),
      to: edge.to.clone(),
    });
  }

  for node in nodes {
    if let NodeType::Subgraph { nodes, edges } = &node.node_type {
      validate_level(nodes, edges)?;
    }
  }
  Ok(())
}
