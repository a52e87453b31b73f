use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
  /// The same node id appears in more than one place in the tree.
  #[error("duplicate node id '{node_id}'")]
  DuplicateNode { node_id: String },

  #[error("edge references unknown node: from={from}, to={to}")]
  InvalidEdge { from: String, to: String },

  #[error("invalid workflow definition: {0}")]
  Parse(#[from] serde_json::Error),
}
