//! The public error facade: every crate-boundary error aggregated behind
//! one type, each per-crate `thiserror` enum folded in via `#[from]`.

/// Raised when `inputs`/`outputs` overlap or an input variable is
/// duplicated, checked at the textual backend's entry point (the native
/// path never needs `outputs` to be disjoint from `inputs`, but emitting
/// `out[k] = in[k]` verbatim for a shared C temporary is a case the
/// original textual unroller never exercised, so it is surfaced
/// separately from the native backend's own `InvalidGraph`).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Graph(#[from] exprjit_core::GraphError),

    #[error(transparent)]
    Schedule(#[from] exprjit_schedule::ScheduleError),

    #[error("an input also appears in `outputs`: {0}")]
    OverlappingIo(i32),

    #[error("native codegen failed: {0}")]
    Codegen(String),

    #[error("external compilation failed: {0}")]
    ExternalCompileFailed(String),
}

impl From<exprjit_codegen::CodegenError> for CompileError {
    fn from(err: exprjit_codegen::CodegenError) -> Self {
        CompileError::Codegen(err.to_string())
    }
}
