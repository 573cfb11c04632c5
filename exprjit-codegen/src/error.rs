/// Errors raised by register allocation, encoding, or memory installation.
#[derive(Debug, thiserror::Error)]
pub enum AllocError {
    #[error("simultaneously live values exceed the configured stack capacity ({0} slots)")]
    StackOverflow(usize),

    #[error("allocator requested a location for hash {0} that was never recorded (internal bug)")]
    MissingLocation(i32),
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("encoder cannot emit code for operation kind {0:?}")]
    UnsupportedOp(exprjit_core::OpKind),
}

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("failed to map executable memory: {0}")]
    MemoryMapFailed(String),
}

/// Aggregates the three stage-specific error types behind the single
/// `compile_native` entry point, the way `exprjit::CompileError` aggregates
/// every crate's errors one level up.
#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Install(#[from] InstallError),
}
