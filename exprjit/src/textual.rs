//! Textual backend (§4.H): emit a C translation unit, shell out to a
//! user-named compiler, and dynamically load the resulting symbol.
//!
//! Grounded in the original's own source-text emitters
//! (`examples/original_source/src/flatten.cpp`, `unroller.cpp`): walk the
//! schedule in order, name each step after its remapped `in[i]`/`out[k]`
//! role or a plain temporary, and print the arithmetic infix / call form
//! per op kind. The shell-out and dynamic-load plumbing follows
//! `examples/isabella232-compiler-solidity`'s `solc::Compiler::standard_json`
//! (std::process::Command, anyhow-wrapped spawn errors) and its
//! `generator::action::yul_directory` randomized temp-path pattern.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::Command;

use exprjit_core::{traversal, OpKind};
use exprjit_schedule::Schedule;
use itertools::Itertools;
use rand::distr::Alphanumeric;
use rand::Rng;

use crate::error::CompileError;

/// A routine produced by the textual backend. Owns the loaded shared
/// object; the symbol is only valid as long as `library` stays loaded, so
/// the two are kept in the same struct (the standard `libloading` idiom).
pub struct TextualFn {
    library: libloading::Library,
    inputs_len: usize,
    outputs_len: usize,
}

impl TextualFn {
    pub fn inputs_len(&self) -> usize {
        self.inputs_len
    }

    pub fn outputs_len(&self) -> usize {
        self.outputs_len
    }

    /// Invoke the compiled routine. See
    /// [`exprjit_codegen::CompiledFn::call`] for the shared ABI contract;
    /// this backend's `extfns` entries are resolved the same way.
    ///
    /// # Safety
    /// The loaded symbol must still match the stable ABI (it does, as
    /// long as `compile_textual` produced this value), and every pointer
    /// in `extfns` must be a valid `extern "C" fn(f64) -> f64` matching
    /// the arity the graph's `ExtCall` nodes were built with.
    pub unsafe fn call(&self, inputs: &[f64], outputs: &mut [f64], extfns: &mut [*mut std::ffi::c_void]) {
        assert_eq!(inputs.len(), self.inputs_len, "input length mismatch");
        assert_eq!(outputs.len(), self.outputs_len, "output length mismatch");
        // SAFETY: resolved from the shared object this backend just built
        // for exactly this ABI, via `compile_textual`.
        let f: libloading::Symbol<
            unsafe extern "C" fn(*const f64, *mut f64, *mut *mut std::ffi::c_void),
        > = unsafe { self.library.get(SYMBOL_NAME.as_bytes()) }.expect("symbol resolved at load time");
        let extfns_ptr = if extfns.is_empty() {
            std::ptr::null_mut()
        } else {
            extfns.as_mut_ptr()
        };
        unsafe { f(inputs.as_ptr(), outputs.as_mut_ptr(), extfns_ptr) };
    }
}

const SYMBOL_NAME: &str = "exprjit_textual_entry";

fn temp_source_path() -> PathBuf {
    let mut path = std::env::temp_dir();
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    path.push(format!("exprjit-{suffix}.c"));
    path
}

/// Assign every scheduled node a C identifier: remapped `in[i]`/`out[k]`
/// roles take priority (mirroring `flatten.cpp`'s `remapped_name`), else a
/// plain `t{step}` temporary. Keyed by structural hash, not by `Rc`
/// pointer identity: CSE keeps only one `Rc` per hash in `schedule.nodes`,
/// but an op's `args()` may still reference a different, hash-equal `Rc`
/// that was elided by the schedule (e.g. two independent `constant(5.0)`
/// calls, or any other repeated sub-expression) — the allocator's
/// `output_indices` (`exprjit-codegen::alloc`) keys the same way for the
/// same reason.
fn node_names(schedule: &Schedule) -> HashMap<i32, String> {
    let mut names = HashMap::with_capacity(schedule.len());
    let input_index: HashMap<i32, usize> = schedule
        .inputs
        .iter()
        .enumerate()
        .map(|(i, input)| (input.hash(), i))
        .collect();
    for (step, node) in schedule.nodes.iter().enumerate() {
        let hash = node.hash();
        if let Some(&i) = input_index.get(&hash) {
            names.insert(hash, format!("in[{i}]"));
            continue;
        }
        names.insert(hash, format!("t{step}"));
    }
    names
}

fn render_source(schedule: &Schedule) -> String {
    let names = node_names(schedule);
    // Two distinct output nodes can share a structural hash (the native
    // allocator's `output_indices` has the same shape, `alloc.rs:132-134`)
    // so every output sharing a schedule entry's hash must be mirrored,
    // not just the first match.
    let mut output_indices: HashMap<i32, Vec<usize>> = HashMap::new();
    for (k, output) in schedule.outputs.iter().enumerate() {
        output_indices.entry(output.hash()).or_default().push(k);
    }
    let mut ext_index: HashMap<i32, usize> = HashMap::new();
    let mut src = String::new();
    src.push_str("#include <math.h>\n\n");
    src.push_str(&format!(
        "extern \"C\" void {SYMBOL_NAME}(const double* in, double* out, void** extfns) {{\n"
    ));

    for node in &schedule.nodes {
        let hash = node.hash();
        let name = &names[&hash];
        if name.starts_with("in[") {
            // Input leaves read straight from `in`; no temporary needed.
            continue;
        }
        let arg_name = |arg: &exprjit_core::Node| names[&arg.hash()].clone();
        let expr = match node.kind() {
            OpKind::Variable => unreachable!("variable leaves are always remapped to in[i]"),
            OpKind::Zero => "0.0".to_string(),
            OpKind::One => "1.0".to_string(),
            OpKind::Constant => format!("{:?}", node.const_value().unwrap()),
            OpKind::Add => format!("{} + {}", arg_name(&node.args()[0]), arg_name(&node.args()[1])),
            OpKind::Sub => format!("{} - {}", arg_name(&node.args()[0]), arg_name(&node.args()[1])),
            OpKind::Mul => format!("{} * {}", arg_name(&node.args()[0]), arg_name(&node.args()[1])),
            OpKind::Negate => format!("-{}", arg_name(&node.args()[0])),
            OpKind::Sin => format!("sin({})", arg_name(&node.args()[0])),
            OpKind::Cos => format!("cos({})", arg_name(&node.args()[0])),
            OpKind::ExtCall => {
                let n = ext_index.len();
                let index = *ext_index.entry(hash).or_insert(n);
                let args = node.args();
                let fn_ty = format!("double (*)({})", std::iter::repeat("double").take(args.len()).join(", "));
                format!(
                    "(({fn_ty})extfns[{index}])({})",
                    args.iter().map(arg_name).join(", ")
                )
            }
        };
        src.push_str(&format!("    double {name} = {expr};\n"));

        if let Some(indices) = output_indices.get(&hash) {
            for &k in indices {
                src.push_str(&format!("    out[{k}] = {name};\n"));
            }
        }
    }

    src.push_str("}\n");
    src
}

/// Verify every node in `schedule` (not just direct inputs/outputs) is
/// reachable in a single DFS, matching §4.B's "must not recurse" contract
/// reused here to sanity-check the emitted order before shelling out.
fn assert_topologically_sound(schedule: &Schedule) {
    debug_assert_eq!(
        traversal::reachable_post_order(&schedule.outputs).len(),
        schedule.len(),
        "textual backend received a schedule with unreachable or duplicate nodes"
    );
}

/// Shell the named compiler over `source_path`, producing `object_path` as
/// a shared object. `anyhow` is the right tool at exactly this boundary:
/// attaching context to an arbitrary external process's failure, the way
/// `examples/isabella232-compiler-solidity/src/solc/mod.rs` wraps `solc`
/// spawn/exit failures. The public error type returned by `compile_textual`
/// is still the crate's own `CompileError`, built from this at the call site.
fn run_compiler(backend_name: &str, source_path: &std::path::Path, object_path: &std::path::Path) -> anyhow::Result<()> {
    let output = Command::new(backend_name)
        .arg("-O3")
        .arg("-shared")
        .arg("-fPIC")
        .arg("-x")
        .arg("c++")
        .arg("-o")
        .arg(object_path)
        .arg(source_path)
        .output()
        .map_err(|e| anyhow::anyhow!("{backend_name} subprocess spawning error: {e}"))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "{backend_name} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    Ok(())
}

pub fn compile_textual(
    schedule: &Schedule,
    backend_name: &str,
    disas: bool,
) -> Result<TextualFn, CompileError> {
    assert_topologically_sound(schedule);

    let source = render_source(schedule);
    let source_path = temp_source_path();
    let object_path = source_path.with_extension("so");

    let mut file = std::fs::File::create(&source_path)
        .map_err(|e| CompileError::ExternalCompileFailed(format!("writing temp source: {e}")))?;
    file.write_all(source.as_bytes())
        .map_err(|e| CompileError::ExternalCompileFailed(format!("writing temp source: {e}")))?;
    drop(file);

    log::debug!(
        "textual backend: emitting {} schedule steps via {backend_name}",
        schedule.len()
    );

    let spawn_result = run_compiler(backend_name, &source_path, &object_path);
    let _ = std::fs::remove_file(&source_path);
    if let Err(e) = spawn_result {
        let _ = std::fs::remove_file(&object_path);
        return Err(CompileError::ExternalCompileFailed(e.to_string()));
    }

    if disas {
        dump_disassembly(&object_path);
    }

    let library = unsafe { libloading::Library::new(&object_path) }.map_err(|e| {
        let _ = std::fs::remove_file(&object_path);
        CompileError::ExternalCompileFailed(format!("dynamic load failed: {e}"))
    })?;
    let _ = std::fs::remove_file(&object_path);

    // Resolve once up front so a missing symbol fails at compile time,
    // not on first call.
    let _: libloading::Symbol<unsafe extern "C" fn(*const f64, *mut f64, *mut *mut std::ffi::c_void)> =
        unsafe { library.get(SYMBOL_NAME.as_bytes()) }.map_err(|e| {
            CompileError::ExternalCompileFailed(format!("symbol resolution failed: {e}"))
        })?;

    Ok(TextualFn {
        library,
        inputs_len: schedule.inputs.len(),
        outputs_len: schedule.outputs.len(),
    })
}

fn dump_disassembly(object_path: &std::path::Path) {
    match Command::new("objdump").arg("-d").arg(object_path).output() {
        Ok(output) => {
            print!("{}", String::from_utf8_lossy(&output.stdout));
        }
        Err(e) => {
            log::warn!("disassembly dump skipped: objdump unavailable ({e})");
        }
    }
}
