//! Executable installer: copy emitted bytes into writable memory,
//! reprotect read+execute, and hand back a typed function pointer whose
//! lifetime is tied to the mapping.
//!
//! `memmap2::MmapMut::map_anon` plus `.make_exec()` gives an explicit
//! scoped resource with guaranteed unmap on drop, rather than hand-rolling
//! `libc::mmap`/`mprotect`/`munmap` and leaking the mapping for the
//! process lifetime.

use std::mem;

use crate::error::InstallError;

/// The compiled function's stable ABI: `in` has length
/// `inputs.len()`, `out` has length `outputs.len()`, `extfns` is indexed in
/// schedule order by any `ExtCall` nodes (may be null/empty when the graph
/// has none).
pub type RawFn = unsafe extern "C" fn(*const f64, *mut f64, *mut *mut std::ffi::c_void);

/// An installed, callable routine. Owns the executable mapping; the
/// mapping (and the code it holds) is unmapped on drop, so the function
/// pointer this type hands out never outlives its backing memory.
pub struct CompiledFn {
    mapping: memmap2::Mmap,
    inputs_len: usize,
    outputs_len: usize,
}

impl CompiledFn {
    /// Map `code` read+write, copy it in, then reprotect read+execute.
    pub fn install(code: &[u8], inputs_len: usize, outputs_len: usize) -> Result<Self, InstallError> {
        let mut writable = memmap2::MmapOptions::new()
            .len(code.len().max(1))
            .map_anon()
            .map_err(|e| InstallError::MemoryMapFailed(e.to_string()))?;
        writable[..code.len()].copy_from_slice(code);
        let mapping = writable
            .make_exec()
            .map_err(|e| InstallError::MemoryMapFailed(e.to_string()))?;
        log::debug!(
            "installed {} bytes of executable code ({inputs_len} inputs, {outputs_len} outputs)",
            code.len()
        );
        Ok(CompiledFn {
            mapping,
            inputs_len,
            outputs_len,
        })
    }

    pub fn inputs_len(&self) -> usize {
        self.inputs_len
    }

    pub fn outputs_len(&self) -> usize {
        self.outputs_len
    }

    /// The raw installed machine code, for disassembly or inspection.
    /// Reading an executable mapping is sound; only writing to it after
    /// `make_exec` would not be.
    pub fn code(&self) -> &[u8] {
        &self.mapping
    }

    fn as_raw_fn(&self) -> RawFn {
        // SAFETY: `mapping` was produced by `install` from bytes this
        // crate encoded for exactly this ABI, and is read+execute for its
        // whole lifetime (never written to again after `make_exec`).
        unsafe { mem::transmute::<*const u8, RawFn>(self.mapping.as_ptr()) }
    }

    /// Invoke the compiled routine. `inputs.len()` and `outputs.len()`
    /// must match the lengths fixed at compile time; `extfns` must carry
    /// one entry per distinct `ExtCall` node in the schedule, in the order
    /// those nodes first appear there (empty is fine when the graph has
    /// no `ExtCall` nodes — `Sin`/`Cos` never read this array).
    ///
    /// # Safety
    /// The caller must ensure every pointer in `extfns` is a valid
    /// `extern "C" fn(f64) -> f64` matching the arity the graph's
    /// `ExtCall` nodes were built with; the compiled code will call
    /// through them without further validation.
    pub unsafe fn call(&self, inputs: &[f64], outputs: &mut [f64], extfns: &mut [*mut std::ffi::c_void]) {
        assert_eq!(inputs.len(), self.inputs_len, "input length mismatch");
        assert_eq!(outputs.len(), self.outputs_len, "output length mismatch");
        let f = self.as_raw_fn();
        let extfns_ptr = if extfns.is_empty() {
            std::ptr::null_mut()
        } else {
            extfns.as_mut_ptr()
        };
        unsafe { f(inputs.as_ptr(), outputs.as_mut_ptr(), extfns_ptr) };
    }
}
