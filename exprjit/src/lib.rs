//! Expression-graph JIT compiler: construct a DAG of arithmetic and
//! transcendental operations, then compile it either to native x86-64
//! machine code (the primary, in-process backend) or to a textual
//! translation unit handed off to an external compiler.
//!
//! Graph construction (`var`, `constant`, `sin`, `cos`, `ext_func`, and the
//! `+`/`-`/`*`/unary `-` operators) is re-exported from `exprjit_core`;
//! `compile`/`jit_compile` here are the two entry points of §6.

pub mod api;
pub mod disas;
pub mod dot;
pub mod error;
mod textual;

pub use api::{compile, compile_with_options, jit_compile, NativeOptions};
pub use dot::to_dot;
pub use error::CompileError;
pub use textual::TextualFn;

pub use exprjit_codegen::CompiledFn;
pub use exprjit_core::{constant, cos, ext_func, one, sin, var, zero, Node, OpKind};
