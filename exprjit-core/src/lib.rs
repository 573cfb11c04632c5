//! Expression graph construction, structural hashing, and traversal.
//!
//! This crate owns spec components A (graph builder & hash algebra) and B
//! (graph traversal & leaf discovery): the shared, immutable DAG that the
//! scheduler, allocator, and encoder crates consume downstream.

pub mod builder;
pub mod error;
pub mod hash;
pub mod node;
pub mod traversal;

pub use builder::{constant, cos, ext_func, one, sin, var, zero};
pub use error::GraphError;
pub use node::{Node, OpKind, Payload};
