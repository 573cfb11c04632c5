//! Register allocation, x86-64 encoding, and executable installation:
//! spec components E, F, and G — the in-process native JIT backend that
//! is the primary focus of this workspace.

pub mod alloc;
pub mod encode;
pub mod error;
pub mod install;
pub mod location;

use exprjit_schedule::Schedule;

pub use encode::ExternPointers;
pub use error::CodegenError;
pub use install::CompiledFn;

/// Number of argument registers this encoder's call-site preparation
/// supports (the usable pool minus the reserved scratch register); see
/// §9's note that arbitrary `ExtCall` arities are a known limitation.
pub use alloc::DEFAULT_N_REG;

unsafe extern "C" {
    fn sin(x: f64) -> f64;
    fn cos(x: f64) -> f64;
}

/// Run the full native pipeline over an already-linearized schedule:
/// allocate registers, encode x86-64, and install the result as
/// executable memory.
///
/// `n_reg` includes the reserved scratch register; `n_stack` bounds the
/// number of simultaneously spilled values. `sin`/`cos` are resolved here,
/// at compile time, to the host libm's addresses, so a graph using only
/// `Sin`/`Cos` (no `ExtCall`) can pass a null/empty `extfns`.
pub fn compile_native(
    schedule: &Schedule,
    n_reg: usize,
    n_stack: usize,
) -> Result<CompiledFn, CodegenError> {
    let disappear = exprjit_schedule::disappear_table(schedule);
    let (transition_sets, stack_high_water) = alloc::allocate(schedule, &disappear, n_reg, n_stack)?;
    let externs = ExternPointers {
        sin: sin as usize,
        cos: cos as usize,
    };
    let code = encode::encode(schedule, &transition_sets, stack_high_water, &externs)?;
    let compiled = CompiledFn::install(&code, schedule.inputs.len(), schedule.outputs.len())?;
    Ok(compiled)
}
