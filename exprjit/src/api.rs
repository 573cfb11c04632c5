//! Compilation entry points (§6): `compile` for the native backend with
//! default knobs, `jit_compile` for choosing either backend explicitly.

use exprjit_codegen::CompiledFn;
use exprjit_core::Node;

use crate::error::CompileError;
use crate::textual::{self, TextualFn};

/// Knobs the native backend exposes as plain arguments rather than a
/// config layer (§5 ambient-stack note: "Persistent state: None" rules
/// out a config file, so these are `Default`-able constructor fields
/// instead).
#[derive(Debug, Clone, Copy)]
pub struct NativeOptions {
    /// Register pool size, including the reserved scratch register.
    pub n_reg: usize,
    /// Stack slot capacity; `None` derives it from the schedule length
    /// (the worst case where every step spills is always representable).
    pub n_stack: Option<usize>,
    /// §4.C's optional ExtCall-first scheduling heuristic.
    pub ext_call_first: bool,
}

impl Default for NativeOptions {
    fn default() -> Self {
        NativeOptions {
            n_reg: exprjit_codegen::DEFAULT_N_REG,
            n_stack: None,
            ext_call_first: false,
        }
    }
}

/// Compile `outputs` (over `inputs`, in the given order) into a native
/// x86-64 routine, using [`NativeOptions::default`].
pub fn compile(inputs: &[Node], outputs: &[Node]) -> Result<CompiledFn, CompileError> {
    compile_with_options(inputs, outputs, NativeOptions::default())
}

/// Compile with explicit register-pool size, stack capacity, and
/// scheduling heuristic.
pub fn compile_with_options(
    inputs: &[Node],
    outputs: &[Node],
    options: NativeOptions,
) -> Result<CompiledFn, CompileError> {
    let schedule = exprjit_schedule::linearize(inputs, outputs, options.ext_call_first)?;
    let n_stack = options
        .n_stack
        .unwrap_or(schedule.len() + exprjit_codegen::alloc::DEFAULT_N_STACK_MARGIN);
    let compiled = exprjit_codegen::compile_native(&schedule, options.n_reg, n_stack)?;
    Ok(compiled)
}

/// Compile via the named external compiler's textual backend (§4.H).
/// `backend_name` is the compiler executable (`"g++"`, `"clang++"`, ...);
/// `disas` requests a one-shot disassembly dump of the produced symbol's
/// machine code to stdout (§6).
pub fn jit_compile(
    inputs: &[Node],
    outputs: &[Node],
    backend_name: &str,
    disas: bool,
) -> Result<TextualFn, CompileError> {
    for output in outputs {
        if inputs.iter().any(|input| input.ptr_eq(output)) {
            return Err(CompileError::OverlappingIo(output.hash()));
        }
    }
    let schedule = exprjit_schedule::linearize(inputs, outputs, false)?;
    textual::compile_textual(&schedule, backend_name, disas)
}
