//! Linear-scan register allocator.
//!
//! Ported from the original's step loop (`register_alloc.cpp`,
//! `RegisterAllocator::allocate`), generalized from its two leaf kinds
//! (`VARIABLE`/`CONSTANT`) to the full closed kind set `Zero`/`One` carry
//! the same way `Constant` does, and from its single-hit `find_if` output
//! lookup to mirroring every output index sharing a hash — read "if the
//! node at this step is one of outputs[k]" literally, so a trivial `f = x`
//! identity function still hits this branch (the original only checked it
//! for general ops, never for a bare passthrough).

use std::collections::{HashMap, HashSet};

use exprjit_core::node::wrapper_key;
use exprjit_core::{Node, OpKind};
use exprjit_schedule::Schedule;

use crate::error::AllocError;
use crate::location::{Location, Transition, TransitionSet};

/// Default register pool size (one of which is reserved as scratch).
pub const DEFAULT_N_REG: usize = 16;

/// Default stack slot capacity. The original ties this to schedule
/// length (worst case: every step spills); we do the same, but expose it
/// as a parameter so callers with tighter memory budgets can cap it.
pub const DEFAULT_N_STACK_MARGIN: usize = 0;

struct RegSlot {
    hash: i32,
    age: u32,
}

/// Mutable allocator state: §3's `reg_occupant`/`reg_age`/`stack_occupant`/
/// `location_of`, combined into one per-register `Option<RegSlot>` so the
/// occupant and its age can never desync.
struct AllocState {
    regs: Vec<Option<RegSlot>>,
    /// Registers `0..usable` are available to the allocator; the last
    /// register in the pool is permanently reserved as scratch and never
    /// considered free, occupied, or a spill victim here.
    usable: usize,
    stack: Vec<Option<i32>>,
    location_of: HashMap<i32, Location>,
    stack_high_water: usize,
}

impl AllocState {
    fn new(n_reg: usize, n_stack: usize) -> Self {
        AllocState {
            regs: (0..n_reg).map(|_| None).collect(),
            usable: n_reg - 1,
            stack: (0..n_stack).map(|_| None).collect(),
            location_of: HashMap::new(),
            stack_high_water: 0,
        }
    }

    fn free_register(&self) -> Option<usize> {
        self.regs[..self.usable].iter().position(|r| r.is_none())
    }

    fn free_stack_slot(&self) -> Option<usize> {
        self.stack.iter().position(|s| s.is_none())
    }

    /// Highest-age occupied register (ties broken by lowest index), i.e.
    /// the linear-scan spill victim. Callers only invoke this once no
    /// free register remains. Never returns the reserved scratch register.
    fn victim_register(&self) -> usize {
        if let Some(free) = self.free_register() {
            return free;
        }
        self.regs[..self.usable]
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|s| (i, s.age)))
            .max_by_key(|&(_, age)| age)
            .map(|(i, _)| i)
            .expect("victim_register called with no occupied registers")
    }

    fn occupy_register(&mut self, idx: usize, hash: i32) {
        self.regs[idx] = Some(RegSlot { hash, age: 0 });
        self.location_of.insert(hash, Location::Register(idx));
    }

    fn touch(&mut self, idx: usize) {
        if let Some(slot) = self.regs[idx].as_mut() {
            slot.age = 0;
        }
    }

    fn age_all(&mut self) {
        for slot in self.regs.iter_mut().flatten() {
            slot.age += 1;
        }
    }

    fn location(&self, hash: i32) -> Result<Location, AllocError> {
        self.location_of
            .get(&hash)
            .copied()
            .ok_or(AllocError::MissingLocation(hash))
    }
}

struct Allocator<'a> {
    schedule: &'a Schedule,
    disappear: &'a [HashSet<i32>],
    state: AllocState,
    n_reg: usize,
    scratch_reg: usize,
    output_indices: HashMap<i32, Vec<usize>>,
    transition_sets: Vec<TransitionSet>,
}

impl<'a> Allocator<'a> {
    fn new(
        schedule: &'a Schedule,
        disappear: &'a [HashSet<i32>],
        n_reg: usize,
        n_stack: usize,
    ) -> Self {
        let scratch_reg = n_reg - 1;
        let mut state = AllocState::new(n_reg, n_stack);
        // §4.E initial state: every Input leaf starts out at `Input(i)`;
        // registers and stack are empty until a step materializes it.
        for (i, input) in schedule.inputs.iter().enumerate() {
            state.location_of.insert(input.hash(), Location::Input(i));
        }
        let mut output_indices: HashMap<i32, Vec<usize>> = HashMap::new();
        for (k, out) in schedule.outputs.iter().enumerate() {
            output_indices.entry(out.hash()).or_default().push(k);
        }
        Allocator {
            schedule,
            disappear,
            state,
            n_reg,
            scratch_reg,
            output_indices,
            transition_sets: vec![Vec::new(); schedule.len()],
        }
    }

    fn spill(&mut self, t: usize, reg: usize) -> Result<(), AllocError> {
        let slot = self.state.regs[reg]
            .take()
            .expect("spill called on an empty register");
        let stack_idx = self
            .state
            .free_stack_slot()
            .ok_or(AllocError::StackOverflow(self.state.stack.len()))?;
        self.state.stack[stack_idx] = Some(slot.hash);
        self.state.location_of.insert(slot.hash, Location::Stack(stack_idx));
        self.state.stack_high_water = self.state.stack_high_water.max(stack_idx + 1);
        self.transition_sets[t].push(Transition::RawMove {
            hash: slot.hash,
            src: Location::Register(reg),
            dst: Location::Stack(stack_idx),
        });
        Ok(())
    }

    /// Acquire a free register, spilling the linear-scan victim if none
    /// is free. Used for leaf materialization and destination allocation,
    /// where no existing value needs to be moved into the chosen register.
    fn acquire_register(&mut self, t: usize, exclude: &[usize]) -> Result<usize, AllocError> {
        if let Some(free) = self.state.free_register() {
            return Ok(free);
        }
        let usable = self.state.usable;
        let victim = self
            .state
            .regs[..usable]
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                if exclude.contains(&i) {
                    None
                } else {
                    slot.as_ref().map(|s| (i, s.age))
                }
            })
            .max_by_key(|&(_, age)| age)
            .map(|(i, _)| i)
            .unwrap_or_else(|| self.state.victim_register());
        self.spill(t, victim)?;
        Ok(victim)
    }

    /// Ensure `hash` is resident exactly in `target_reg`, spilling
    /// whatever currently occupies it first if necessary. No-op if it is
    /// already there (mirrors `prepare_value_on_xmm`).
    fn ensure_in_register(
        &mut self,
        t: usize,
        hash: i32,
        target_reg: usize,
    ) -> Result<(), AllocError> {
        if let Some(slot) = &self.state.regs[target_reg] {
            if slot.hash == hash {
                return Ok(());
            }
        }
        if self.state.regs[target_reg].is_some() {
            self.spill(t, target_reg)?;
        }
        let src = self.state.location(hash)?;
        match src {
            Location::Register(r) => {
                self.state.regs[r] = None;
            }
            Location::Stack(s) => {
                self.state.stack[s] = None;
            }
            Location::Input(_) | Location::Output(_) => {
                return Err(AllocError::MissingLocation(hash));
            }
        }
        self.state.occupy_register(target_reg, hash);
        self.transition_sets[t].push(Transition::RawMove {
            hash,
            src,
            dst: Location::Register(target_reg),
        });
        Ok(())
    }

    fn free_dying(&mut self, t: usize) {
        for &hash in &self.disappear[t] {
            match self.state.location_of.get(&hash).copied() {
                Some(Location::Register(idx)) => {
                    self.state.regs[idx] = None;
                    self.state.location_of.remove(&hash);
                }
                Some(Location::Stack(idx)) => {
                    self.state.stack[idx] = None;
                    self.state.location_of.remove(&hash);
                }
                _ => {}
            }
        }
    }

    fn mirror_outputs(&mut self, t: usize, hash: i32, dst: Location) {
        if let Some(indices) = self.output_indices.get(&hash) {
            for &k in indices {
                self.transition_sets[t].push(Transition::RawMove {
                    hash,
                    src: dst,
                    dst: Location::Output(k),
                });
            }
        }
    }

    fn step_leaf(&mut self, t: usize, node: &Node) -> Result<(), AllocError> {
        let hash = node.hash();
        let reg = self.acquire_register(t, &[])?;
        match node.kind() {
            OpKind::Variable => {
                let src = self.state.location(hash)?;
                debug_assert!(matches!(src, Location::Input(_)));
                self.transition_sets[t].push(Transition::RawMove {
                    hash,
                    src,
                    dst: Location::Register(reg),
                });
            }
            OpKind::Zero | OpKind::One | OpKind::Constant => {
                let value = node.const_value().expect("leaf constant kind carries a value");
                self.transition_sets[t].push(Transition::ConstLoad {
                    hash,
                    value,
                    dst: Location::Register(reg),
                });
            }
            other => unreachable!("step_leaf called with non-leaf kind {other:?}"),
        }
        self.state.occupy_register(reg, hash);
        self.mirror_outputs(t, hash, Location::Register(reg));
        Ok(())
    }

    /// Handle any call-shaped op (`Sin`/`Cos`, and general `ExtCall`) under
    /// the System V convention: argument `i` occupies `xmm(i)`, and every
    /// other occupied register is caller-saved across the call. Sin/Cos
    /// always have a single argument; `ExtCall` may have more, which is why
    /// this loops over `node.args()` instead of hard-coding `xmm0` the way
    /// the original single-argument `prepare_value_on_xmm` call site did.
    fn step_call(&mut self, t: usize, node: &Node) -> Result<(), AllocError> {
        let hash = node.hash();
        let arg_hashes: Vec<i32> = node.args().iter().map(Node::hash).collect();
        assert!(
            arg_hashes.len() <= self.state.usable,
            "call-site preparation only covers arities up to the usable register count (§9 design note)"
        );
        for (i, &arg_hash) in arg_hashes.iter().enumerate() {
            self.ensure_in_register(t, arg_hash, i)?;
        }
        for reg in arg_hashes.len()..self.state.usable {
            if self.state.regs[reg].is_some() {
                self.spill(t, reg)?;
            }
        }

        // Every SIMD register, including the ones just loaded with
        // operands, is caller-saved across the call and about to be
        // clobbered (the dst overwrites xmm0 outright, and a real callee
        // is free to trash the rest). An operand that is still live past
        // this step must be preserved to stack now, before the call, or a
        // later step would read back whatever the call left behind.
        let surviving: HashSet<i32> = arg_hashes
            .iter()
            .copied()
            .filter(|h| !self.disappear[t].contains(h))
            .collect();
        for arg_hash in surviving {
            if let Some(Location::Register(reg)) = self.state.location_of.get(&arg_hash).copied() {
                self.spill(t, reg)?;
            }
        }

        self.free_dying(t);
        self.state.occupy_register(0, hash);
        self.transition_sets[t].push(Transition::OpResult {
            hash,
            operand_registers: (0..arg_hashes.len()).collect(),
            dst: Location::Register(0),
        });
        self.mirror_outputs(t, hash, Location::Register(0));
        Ok(())
    }

    fn step_internal_op(&mut self, t: usize, node: &Node) -> Result<(), AllocError> {
        let args: Vec<i32> = node.args().iter().map(Node::hash).collect();

        // Touch (age-reset) every operand currently resident in a
        // register before reloading the rest, so a just-reloaded operand
        // never immediately looks like the oldest thing in the pool.
        for &arg_hash in &args {
            if let Some(Location::Register(idx)) = self.state.location_of.get(&arg_hash).copied()
            {
                self.state.touch(idx);
            }
        }

        for &arg_hash in &args {
            let already_in_register =
                matches!(self.state.location_of.get(&arg_hash), Some(Location::Register(_)));
            if !already_in_register {
                let target = self
                    .state
                    .free_register()
                    .unwrap_or_else(|| self.state.victim_register());
                self.ensure_in_register(t, arg_hash, target)?;
            }
        }

        let mut operand_registers = Vec::with_capacity(args.len() + 1);
        for &arg_hash in &args {
            match self.state.location(arg_hash)? {
                Location::Register(idx) => operand_registers.push(idx),
                _ => unreachable!("reload loop above guarantees every operand is in a register"),
            }
        }
        if node.kind() == OpKind::Negate {
            operand_registers.push(self.scratch_reg);
        }

        self.free_dying(t);

        let hash = node.hash();
        let dst_reg = self.acquire_register(t, &operand_registers)?;
        self.state.occupy_register(dst_reg, hash);
        self.transition_sets[t].push(Transition::OpResult {
            hash,
            operand_registers,
            dst: Location::Register(dst_reg),
        });
        self.mirror_outputs(t, hash, Location::Register(dst_reg));
        Ok(())
    }

    fn run(mut self) -> Result<(Vec<TransitionSet>, usize), AllocError> {
        for t in 0..self.schedule.len() {
            let node = self.schedule.nodes[t].clone();
            match node.kind() {
                OpKind::Variable | OpKind::Zero | OpKind::One | OpKind::Constant => {
                    self.step_leaf(t, &node)?;
                }
                OpKind::Sin | OpKind::Cos | OpKind::ExtCall => {
                    self.step_call(t, &node)?;
                }
                OpKind::Add | OpKind::Sub | OpKind::Mul | OpKind::Negate => {
                    self.step_internal_op(t, &node)?;
                }
            }
            self.state.age_all();
        }
        Ok((self.transition_sets, self.state.stack_high_water))
    }
}

/// Run register allocation over `schedule`, given its liveness
/// (`disappear`) table. `n_reg` includes the reserved scratch register
/// (index `n_reg - 1`); `n_stack` bounds the number of simultaneously
/// spilled values before allocation fails with [`AllocError::StackOverflow`].
///
/// Returns the per-step transition log and the stack high-water mark
/// (the prologue's `sub rsp, ...` operand is derived from it).
pub fn allocate(
    schedule: &Schedule,
    disappear: &[HashSet<i32>],
    n_reg: usize,
    n_stack: usize,
) -> Result<(Vec<TransitionSet>, usize), AllocError> {
    log::debug!(
        "allocating registers: {} steps, n_reg={}, n_stack={}",
        schedule.len(),
        n_reg,
        n_stack
    );
    let allocator = Allocator::new(schedule, disappear, n_reg, n_stack);
    let result = allocator.run();
    match &result {
        Ok((_, high_water)) => log::debug!("stack high-water mark: {high_water}"),
        Err(e) => log::debug!("register allocation failed: {e}"),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use exprjit_core::builder::{ext_func, var, cos, sin};
    use exprjit_schedule::{disappear_table, linearize};

    fn build(n_reg: usize, n_stack: usize, inputs: &[Node], outputs: &[Node]) -> (Vec<TransitionSet>, usize) {
        let schedule = linearize(inputs, outputs, false).unwrap();
        let disappear = disappear_table(&schedule);
        allocate(&schedule, &disappear, n_reg, n_stack).unwrap()
    }

    #[test]
    fn simple_sum_uses_one_op_result() {
        let x = var();
        let y = var();
        let sum = x.clone() + y.clone();
        let (sets, _) = build(4, 8, &[x, y], &[sum]);
        let op_results: usize = sets
            .iter()
            .flatten()
            .filter(|t| matches!(t, Transition::OpResult { .. }))
            .count();
        assert_eq!(op_results, 1);
    }

    #[test]
    fn every_operand_is_in_a_register_when_op_result_emitted() {
        let x = var();
        let y = var();
        let z = var();
        let expr = (x.clone() + y.clone()) * z.clone() - x.clone();
        let (sets, _) = build(4, 16, &[x, y, z], &[expr]);
        for set in &sets {
            for t in set {
                if let Transition::OpResult {
                    operand_registers, ..
                } = t
                {
                    assert!(!operand_registers.is_empty());
                }
            }
        }
    }

    #[test]
    fn output_is_mirrored() {
        let x = var();
        let y = var();
        let sum = x.clone() + y.clone();
        let (sets, _) = build(4, 8, &[x, y], &[sum]);
        let mirrored = sets.iter().flatten().any(|t| {
            matches!(
                t,
                Transition::RawMove {
                    dst: Location::Output(0),
                    ..
                }
            )
        });
        assert!(mirrored);
    }

    #[test]
    fn identity_output_is_still_mirrored() {
        let x = var();
        let (sets, _) = build(4, 8, &[x.clone()], &[x]);
        let mirrored = sets.iter().flatten().any(|t| {
            matches!(
                t,
                Transition::RawMove {
                    dst: Location::Output(0),
                    ..
                }
            )
        });
        assert!(mirrored);
    }

    #[test]
    fn sin_moves_operand_into_register_zero() {
        let x = var();
        let f = sin(x.clone());
        let (sets, _) = build(4, 8, &[x], &[f]);
        let last = sets.last().unwrap();
        assert!(last.iter().any(|t| matches!(
            t,
            Transition::OpResult {
                dst: Location::Register(0),
                ..
            }
        )));
    }

    #[test]
    fn negate_appends_scratch_register() {
        let x = var();
        let f = -(x.clone() + var());
        let (sets, _) = build(4, 8, &[x], &[f]);
        let found = sets.iter().flatten().any(|t| matches!(
            t,
            Transition::OpResult { operand_registers, .. } if operand_registers.contains(&3)
        ));
        assert!(found, "negate should reference scratch register (n_reg - 1)");
    }

    #[test]
    fn high_register_pressure_forces_spills() {
        let vars: Vec<Node> = (0..12).map(|_| var()).collect();
        let mut acc = vars[0].clone();
        for v in &vars[1..] {
            acc = acc + v.clone();
        }
        let (sets, high_water) = build(8, 32, &vars, &[acc]);
        let spills = sets
            .iter()
            .flatten()
            .filter(|t| matches!(t, Transition::RawMove { dst: Location::Stack(_), .. }))
            .count();
        assert!(spills > 0);
        assert!(high_water > 0);
    }

    #[test]
    fn cos_then_sin_shares_value_under_cse() {
        let x = var();
        let f = sin(x.clone()) + cos(x.clone());
        let (sets, _) = build(6, 16, &[x], &[f]);
        assert!(sets.iter().flatten().count() > 0);
    }

    /// `disappear[sin_step]` does not contain `x` (`cos(x)` still needs
    /// it), so the call-site preparation for `sin` must spill `x` to
    /// stack before the call overwrites its register with the result —
    /// otherwise the later `cos` step would reload the stale register and
    /// read `sin(x)` instead of `x`.
    #[test]
    fn call_operand_surviving_past_the_call_is_spilled_not_clobbered() {
        let x = var();
        let f = sin(x.clone()) + cos(x.clone());
        let schedule = linearize(&[x.clone()], &[f], false).unwrap();
        let disappear = disappear_table(&schedule);
        let (sets, _) = allocate(&schedule, &disappear, 4, 16).unwrap();

        let sin_step = schedule.index_of_hash(sin(x.clone()).hash()).unwrap();
        let cos_step = schedule.index_of_hash(cos(x.clone()).hash()).unwrap();
        assert!(sin_step < cos_step, "sin should be scheduled before cos shares x");

        let x_spilled_at_sin_step = sets[sin_step].iter().any(|t| {
            matches!(
                t,
                Transition::RawMove { hash, dst: Location::Stack(_), .. } if *hash == x.hash()
            )
        });
        assert!(
            x_spilled_at_sin_step,
            "x must be preserved to stack during the sin call site since cos still needs it"
        );

        let x_reloaded_before_cos = sets[cos_step].iter().any(|t| {
            matches!(
                t,
                Transition::RawMove { hash, src: Location::Stack(_), dst: Location::Register(0), .. }
                    if *hash == x.hash()
            )
        });
        assert!(
            x_reloaded_before_cos,
            "cos's call site must reload the real x from stack, not reuse sin's clobbered register"
        );
    }

    #[test]
    fn two_arg_ext_call_prepares_xmm0_and_xmm1() {
        let x = var();
        let y = var();
        let call = ext_func("atan2", vec![x.clone(), y.clone()]).unwrap();
        let (sets, _) = build(6, 16, &[x, y], &[call]);
        let last = sets.last().unwrap();
        let op_result = last
            .iter()
            .find(|t| matches!(t, Transition::OpResult { .. }))
            .unwrap();
        match op_result {
            Transition::OpResult {
                operand_registers,
                dst,
                ..
            } => {
                assert_eq!(operand_registers, &[0, 1]);
                assert_eq!(*dst, Location::Register(0));
            }
            _ => unreachable!(),
        }
    }
}
