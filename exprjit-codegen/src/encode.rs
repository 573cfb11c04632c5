//! x86-64 instruction encoder (§4.F).
//!
//! Strictly mechanical: this module makes no placement decisions of its
//! own, it only lowers the allocator's [`Transition`] log plus the
//! schedule's op kinds into bytes. Grounded on the original's
//! `compiler::generate_code` (`examples/original_source/src/compile.cpp`),
//! which drives `Xbyak::CodeGenerator` through the identical
//! prologue/transition-walk/epilogue shape; here the instruction bytes are
//! produced directly since no assembler-library dependency is in the
//! corpus for this job (VEX-prefixed `vmovsd`/`vaddsd`/`vsubsd`/`vmulsd`/
//! `vxorpd`, legacy SSE2 `movq` for the negate mask, and ordinary
//! push/pop/mov/call for integer-register bookkeeping).

use exprjit_core::OpKind;
use exprjit_schedule::Schedule;

use crate::error::EncodeError;
use crate::location::{Location, Transition, TransitionSet};

// Register numbers, x86-64 numbering (0..=15; 8..=15 need a REX/VEX
// extension bit set).
const RAX: u8 = 0;
const RDX: u8 = 2;
const RSP: u8 = 4;
const RBP: u8 = 5;
const RSI: u8 = 6;
const RDI: u8 = 7;
const R12: u8 = 12;
const R13: u8 = 13;
const R14: u8 = 14;

fn is_ext(r: u8) -> bool {
    r >= 8
}

fn low3(r: u8) -> u8 {
    r & 0x7
}

fn modrm(md: u8, reg: u8, rm: u8) -> u8 {
    (md << 6) | (low3(reg) << 3) | low3(rm)
}

fn rex(w: bool, r_ext: bool, x_ext: bool, b_ext: bool) -> u8 {
    0x40 | ((w as u8) << 3) | ((r_ext as u8) << 2) | ((x_ext as u8) << 1) | (b_ext as u8)
}

fn push_r64(buf: &mut Vec<u8>, r: u8) {
    if is_ext(r) {
        buf.push(rex(false, false, false, true));
    }
    buf.push(0x50 + low3(r));
}

fn pop_r64(buf: &mut Vec<u8>, r: u8) {
    if is_ext(r) {
        buf.push(rex(false, false, false, true));
    }
    buf.push(0x58 + low3(r));
}

/// `mov dst, src` for two 64-bit general-purpose registers.
fn mov_r64_r64(buf: &mut Vec<u8>, dst: u8, src: u8) {
    buf.push(rex(true, is_ext(src), false, is_ext(dst)));
    buf.push(0x89);
    buf.push(modrm(0b11, src, dst));
}

fn sub_rsp_imm32(buf: &mut Vec<u8>, imm: i32) {
    buf.push(rex(true, false, false, false));
    buf.push(0x81);
    buf.push(modrm(0b11, 5, RSP)); // /5 = SUB
    buf.extend_from_slice(&imm.to_le_bytes());
}

fn mov_rax_imm64(buf: &mut Vec<u8>, imm: u64) {
    buf.push(rex(true, false, false, false));
    buf.push(0xB8 + low3(RAX));
    buf.extend_from_slice(&imm.to_le_bytes());
}

/// `mov rax, [r14 + disp32]` — reads one entry of the `extfns` array the
/// caller passed in `rdx`, preserved across calls in `r14` (see the
/// prologue comment on why a third callee-saved register is needed beyond
/// the original's `r12`/`r13` pair).
fn mov_rax_extfns_slot(buf: &mut Vec<u8>, disp: i32) {
    buf.push(rex(true, false, false, true));
    buf.push(0x8B);
    buf.push(modrm(0b10, RAX, R14));
    buf.extend_from_slice(&disp.to_le_bytes());
}

/// `movq xmm, rax` (legacy SSE2 encoding, matching the original's
/// `gen.movq(...)` call sites rather than the VEX form — harmless to mix
/// with the VEX arithmetic below beyond a microarchitectural transition
/// bubble, never a correctness concern).
fn movq_xmm_rax(buf: &mut Vec<u8>, xmm: u8) {
    buf.push(0x66);
    buf.push(rex(true, is_ext(xmm), false, false));
    buf.push(0x0F);
    buf.push(0x6E);
    buf.push(modrm(0b11, xmm, RAX));
}

fn call_rax(buf: &mut Vec<u8>) {
    buf.push(0xFF);
    buf.push(modrm(0b11, 2, RAX)); // /2 = CALL r/m64
}

fn ret(buf: &mut Vec<u8>) {
    buf.push(0xC3);
}

fn endbr64(buf: &mut Vec<u8>) {
    buf.extend_from_slice(&[0xF3, 0x0F, 0x1E, 0xFA]);
}

// --- VEX-prefixed SSE2/AVX scalar-double encodings -------------------------

const PP_NONE: u8 = 0b00;
const PP_66: u8 = 0b01;
const PP_F2: u8 = 0b11;

fn vex3_byte1(r_ext: bool, x_ext: bool, b_ext: bool) -> u8 {
    ((!r_ext as u8) << 7) | ((!x_ext as u8) << 6) | ((!b_ext as u8) << 5) | 0b0_0001 // map 0F
}

fn vex3_byte2(vvvv_reg: u8, pp: u8) -> u8 {
    // W=0 (WIG), L=0 (scalar/128-bit) for every instruction this encoder emits.
    ((!vvvv_reg & 0xF) << 3) | pp
}

/// Register-register-register form: `op dst, src1, src2` (src1 is VEX.vvvv).
fn vex_rrr(buf: &mut Vec<u8>, opcode: u8, pp: u8, dst: u8, src1: u8, src2: u8) {
    buf.push(0xC4);
    buf.push(vex3_byte1(is_ext(dst), false, is_ext(src2)));
    buf.push(vex3_byte2(src1, pp));
    buf.push(opcode);
    buf.push(modrm(0b11, dst, src2));
}

/// `vmovsd dst, src` as a pure register move: both VEX source operands
/// name `src`, the standard idiom for "copy low 64 bits, keep upper 64
/// from the same register" with no third operand available.
fn vex_movsd_rr(buf: &mut Vec<u8>, dst: u8, src: u8) {
    vex_rrr(buf, 0x10, PP_F2, dst, src, src);
}

/// A memory operand's addressing-mode fragment: whether its base register
/// needs a REX/VEX extension bit, the ModRM.rm field to use, an optional
/// mandatory SIB byte (`r12` collides with the "SIB follows" encoding),
/// and the `disp32`.
fn mem_parts(mem: MemOperand) -> (bool, u8, Option<u8>, i32) {
    match mem {
        MemOperand::Input(i) => (true, 0b100, Some(0x24), 8 * i as i32),
        MemOperand::Output(k) => (true, 0b101, None, 8 * k as i32),
        MemOperand::Stack(s) => (false, 0b101, None, -(8 * (s as i32 + 1))),
    }
}

#[derive(Clone, Copy)]
enum MemOperand {
    Input(usize),
    Output(usize),
    Stack(usize),
}

fn vex_movsd_load(buf: &mut Vec<u8>, dst: u8, mem: MemOperand) {
    let (b_ext, rm, sib, disp) = mem_parts(mem);
    buf.push(0xC4);
    buf.push(vex3_byte1(is_ext(dst), false, b_ext));
    buf.push(vex3_byte2(0b1111, PP_F2));
    buf.push(0x10);
    buf.push(modrm(0b10, dst, rm));
    if let Some(sib) = sib {
        buf.push(sib);
    }
    buf.extend_from_slice(&disp.to_le_bytes());
}

fn vex_movsd_store(buf: &mut Vec<u8>, mem: MemOperand, src: u8) {
    let (b_ext, rm, sib, disp) = mem_parts(mem);
    buf.push(0xC4);
    buf.push(vex3_byte1(is_ext(src), false, b_ext));
    buf.push(vex3_byte2(0b1111, PP_F2));
    buf.push(0x11);
    buf.push(modrm(0b10, src, rm));
    if let Some(sib) = sib {
        buf.push(sib);
    }
    buf.extend_from_slice(&disp.to_le_bytes());
}

fn location_to_reg(loc: Location) -> Option<u8> {
    match loc {
        Location::Register(r) => Some(r as u8),
        _ => None,
    }
}

fn location_to_mem(loc: Location) -> Option<MemOperand> {
    match loc {
        Location::Input(i) => Some(MemOperand::Input(i)),
        Location::Output(k) => Some(MemOperand::Output(k)),
        Location::Stack(s) => Some(MemOperand::Stack(s)),
        Location::Register(_) => None,
    }
}

/// External function pointers resolved at compile time: `sin`/`cos` are
/// the only ones the native backend hard-codes (§9's "known and
/// deliberate limitation" — extending this to arbitrary arities/functions
/// is the `extfns` runtime-indexed path below, not this one).
pub struct ExternPointers {
    pub sin: usize,
    pub cos: usize,
}

/// Lower the allocator's transition log into executable x86-64 bytes.
///
/// `stack_high_water` sizes the prologue's `sub rsp, ...`; the prologue
/// preserves `rdi`/`rsi` into `r12`/`r13` as the original does, plus `rdx`
/// (the `extfns` base) into `r14` — needed once a schedule contains more
/// than one call site, since `rdx` is caller-saved and would otherwise be
/// clobbered by the first `sin`/`cos`/`extfn` call before a later one
/// could read it.
pub fn encode(
    schedule: &Schedule,
    transition_sets: &[TransitionSet],
    stack_high_water: usize,
    externs: &ExternPointers,
) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::with_capacity(256 + transition_sets.iter().map(Vec::len).sum::<usize>() * 16);

    endbr64(&mut buf);
    push_r64(&mut buf, R12);
    push_r64(&mut buf, R13);
    push_r64(&mut buf, R14);
    push_r64(&mut buf, RBP);
    mov_r64_r64(&mut buf, RBP, RSP);
    sub_rsp_imm32(&mut buf, frame_size(stack_high_water));
    mov_r64_r64(&mut buf, R12, RDI);
    mov_r64_r64(&mut buf, R13, RSI);
    mov_r64_r64(&mut buf, R14, RDX);

    let mut ext_call_index = 0usize;
    for (t, set) in transition_sets.iter().enumerate() {
        let kind = schedule.nodes[t].kind();
        for transition in set {
            lower_transition(&mut buf, transition, kind, externs, &mut ext_call_index)?;
        }
        if kind == OpKind::ExtCall {
            ext_call_index += 1;
        }
    }

    mov_r64_r64(&mut buf, RSP, RBP);
    pop_r64(&mut buf, RBP);
    pop_r64(&mut buf, R14);
    pop_r64(&mut buf, R13);
    pop_r64(&mut buf, R12);
    ret(&mut buf);

    log::debug!(
        "encoded {} bytes for {} schedule steps (stack_high_water={stack_high_water})",
        buf.len(),
        schedule.len()
    );

    Ok(buf)
}

/// Round the requested spill-slot byte count up so the prologue's
/// `sub rsp` leaves `rsp % 16 == 0` at every call site inside the
/// function body. With four pushes ahead of `mov rbp, rsp` (`r12`, `r13`,
/// `r14`, `rbp`), `rsp` sits at `entry_rsp - 32`; since the System V ABI
/// guarantees `entry_rsp % 16 == 8`, that leaves `rsp % 16 == 8` right
/// before this `sub`, so the subtracted amount must itself be `≡ 8 (mod
/// 16)` to land on a 16-byte boundary.
fn frame_size(stack_high_water: usize) -> i32 {
    let mut slots = stack_high_water + 1;
    if slots % 2 == 0 {
        slots += 1;
    }
    (8 * slots) as i32
}

fn lower_transition(
    buf: &mut Vec<u8>,
    transition: &Transition,
    kind: OpKind,
    externs: &ExternPointers,
    ext_call_index: &mut usize,
) -> Result<(), EncodeError> {
    match transition {
        Transition::RawMove { src, dst, .. } => lower_raw_move(buf, *src, *dst),
        Transition::ConstLoad { value, dst, .. } => {
            let reg = location_to_reg(*dst).expect("ConstLoad destination is always a register");
            mov_rax_imm64(buf, value.to_bits());
            movq_xmm_rax(buf, reg);
            Ok(())
        }
        Transition::OpResult {
            operand_registers,
            dst,
            ..
        } => lower_op_result(buf, kind, operand_registers, *dst, externs, *ext_call_index),
    }
}

fn lower_raw_move(buf: &mut Vec<u8>, src: Location, dst: Location) -> Result<(), EncodeError> {
    match (location_to_reg(src), location_to_reg(dst)) {
        (Some(s), Some(d)) => {
            vex_movsd_rr(buf, d, s);
            Ok(())
        }
        (None, Some(d)) => {
            let mem = location_to_mem(src).expect("RawMove source is a register or memory");
            vex_movsd_load(buf, d, mem);
            Ok(())
        }
        (Some(s), None) => {
            let mem = location_to_mem(dst).expect("RawMove destination is a register or memory");
            vex_movsd_store(buf, mem, s);
            Ok(())
        }
        (None, None) => unreachable!("a RawMove never moves directly between two memory locations"),
    }
}

fn lower_op_result(
    buf: &mut Vec<u8>,
    kind: OpKind,
    operand_registers: &[usize],
    dst: Location,
    externs: &ExternPointers,
    ext_call_index: usize,
) -> Result<(), EncodeError> {
    let dst_reg = location_to_reg(dst).expect("OpResult destination is always a register");
    match kind {
        OpKind::Add | OpKind::Sub | OpKind::Mul => {
            let opcode = match kind {
                OpKind::Add => 0x58,
                OpKind::Sub => 0x5C,
                OpKind::Mul => 0x59,
                _ => unreachable!(),
            };
            let op0 = operand_registers[0] as u8;
            let op1 = operand_registers[1] as u8;
            vex_rrr(buf, opcode, PP_F2, dst_reg, op0, op1);
            Ok(())
        }
        OpKind::Negate => {
            let op0 = operand_registers[0] as u8;
            let scratch = *operand_registers.last().expect("negate carries a scratch register") as u8;
            mov_rax_imm64(buf, 0x8000_0000_0000_0000);
            movq_xmm_rax(buf, scratch);
            vex_rrr(buf, 0x57, PP_66, dst_reg, op0, scratch);
            Ok(())
        }
        OpKind::Sin => {
            mov_rax_imm64(buf, externs.sin as u64);
            call_rax(buf);
            Ok(())
        }
        OpKind::Cos => {
            mov_rax_imm64(buf, externs.cos as u64);
            call_rax(buf);
            Ok(())
        }
        OpKind::ExtCall => {
            mov_rax_extfns_slot(buf, 8 * ext_call_index as i32);
            call_rax(buf);
            Ok(())
        }
        other => Err(EncodeError::UnsupportedOp(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prologue_matches_the_spec_byte_sequence() {
        let mut buf = Vec::new();
        endbr64(&mut buf);
        push_r64(&mut buf, R12);
        push_r64(&mut buf, R13);
        assert_eq!(buf, vec![0xF3, 0x0F, 0x1E, 0xFA, 0x41, 0x54, 0x41, 0x55]);
    }

    #[test]
    fn mov_r12_rdi_matches_expected_bytes() {
        let mut buf = Vec::new();
        mov_r64_r64(&mut buf, R12, RDI);
        assert_eq!(buf, vec![0x49, 0x89, 0xFC]);
    }

    #[test]
    fn mov_r13_rsi_matches_expected_bytes() {
        let mut buf = Vec::new();
        mov_r64_r64(&mut buf, R13, RSI);
        assert_eq!(buf, vec![0x49, 0x89, 0xF5]);
    }

    #[test]
    fn ret_is_a_single_byte() {
        let mut buf = Vec::new();
        ret(&mut buf);
        assert_eq!(buf, vec![0xC3]);
    }

    #[test]
    fn frame_size_is_always_a_16_byte_aligned_call_site() {
        for high_water in 0..20usize {
            let size = frame_size(high_water);
            // Four pushes ahead of `sub rsp` leave rsp%16==8; the chosen
            // frame size must restore 16-byte alignment at call sites.
            assert_eq!((8 - size) % 16, 0, "high_water={high_water}");
        }
    }

    #[test]
    fn call_rax_is_ff_d0() {
        let mut buf = Vec::new();
        call_rax(&mut buf);
        assert_eq!(buf, vec![0xFF, 0xD0]);
    }
}
