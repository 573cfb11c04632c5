//! Location/Transition data model shared by the allocator and encoder (§3).

/// Where a value currently resides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Input(usize),
    Output(usize),
    Register(usize),
    Stack(usize),
}

/// A single recorded action the allocator emits at a schedule step. The
/// encoder lowers these mechanically — it makes no placement decisions of
/// its own (§4.F).
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Pure data movement, no computation.
    RawMove {
        hash: i32,
        src: Location,
        dst: Location,
    },
    /// Materialize an immediate constant into a register.
    ConstLoad { hash: i32, value: f64, dst: Location },
    /// Perform the step's operation, reading operands from the given
    /// registers in declared order and writing the result to `dst`.
    OpResult {
        hash: i32,
        operand_registers: Vec<usize>,
        dst: Location,
    },
}

/// One schedule step's ordered list of transitions. Order within a set is
/// significant: spills precede reloads precede the op (§3).
pub type TransitionSet = Vec<Transition>;
