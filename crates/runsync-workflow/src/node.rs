use chrono::{DateTime, Utc};
use runsync_events::NodeStage;
use serde::{Deserialize, Serialize};

use crate::workflow::Edge;

/// A node in the editor's workflow tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
  pub node_id: String,
  #[serde(flatten)]
  pub node_type: NodeType,
  /// Nodes chained around this one. They are separate entities with their
  /// own runtime, addressed by their own ids.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub middleware: Vec<Node>,
  #[serde(default)]
  pub runtime: NodeRuntime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeType {
  Trigger,
  Task {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    component: Option<String>,
  },
  /// A container holding a nested workflow.
  Subgraph {
    nodes: Vec<Node>,
    #[serde(default)]
    edges: Vec<Edge>,
  },
}

/// Live runtime fields the editor renders on a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRuntime {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub stage: Option<NodeStage>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub progress: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_updated_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result: Option<serde_json::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub artifacts: Option<Vec<serde_json::Value>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub summary: Option<String>,
}

impl Node {
  pub fn task(node_id: impl Into<String>) -> Self {
    Self {
      node_id: node_id.into(),
      node_type: NodeType::Task { component: None },
      middleware: Vec::new(),
      runtime: NodeRuntime::default(),
    }
  }

  pub fn subgraph(node_id: impl Into<String>, nodes: Vec<Node>) -> Self {
    Self {
      node_id: node_id.into(),
      node_type: NodeType::Subgraph {
        nodes,
        edges: Vec::new(),
      },
      middleware: Vec::new(),
      runtime: NodeRuntime::default(),
    }
  }

  pub fn with_middleware(mut self, middleware: Vec<Node>) -> Self {
    self.middleware = middleware;
    self
  }

  pub fn subgraph_nodes(&self) -> Option<&[Node]> {
    match &self.node_type {
      NodeType::Subgraph { nodes, .. } => Some(nodes),
      _ => None,
    }
  }

  pub fn subgraph_nodes_mut(&mut self) -> Option<&mut Vec<Node>> {
    match &mut self.node_type {
      NodeType::Subgraph { nodes, .. } => Some(nodes),
      _ => None,
    }
  }
}
