//! Object Model
//!
//! Arena-backed tree with generation-checked handles. Nodes carry a
//! completeness flag so a builder can attach children incrementally; sourced
//! elements hold a data source in place of materialized children.

pub mod document;
pub mod namespace;
pub mod node;

pub use document::{ChildIter, Declaration, Document};
pub use namespace::{ns, NamespaceResolver};
pub use node::{
    BinaryText, Completeness, ElementBody, ElementData, Node, NodeData, NodeId, NodeKind, QName,
    SourcedState, TextContent,
};
