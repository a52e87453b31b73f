//! Runsync Workflow
//!
//! The workflow-authoring model as the editor sees it, reduced to what the
//! sync engine needs: a tree of nodes where any node may carry
//!
//! - a middleware chain (nodes wrapped around the host node), and
//! - a nested subgraph with its own nodes and edges, which may nest further.
//!
//! All of these share one flat node id namespace. [`NodeIndex`] maps every id
//! to its location so runtime updates can be applied without walking the tree.
//! [`IndexedWorkflow`] keeps a workflow and its index in step.

mod error;
mod index;
mod node;
mod workflow;

pub use error::WorkflowError;
pub use index::{IndexedWorkflow, NodeIndex, NodeLocation, NodeSlot, Step};
pub use node::{Node, NodeRuntime, NodeType};
pub use workflow::{Edge, Workflow};
