//! One-shot disassembly dump for the native backend: write the raw code
//! bytes to a temp file and shell a configured disassembler over them,
//! printing to stdout.

use std::io::Write as _;
use std::process::Command;

use rand::distr::Alphanumeric;
use rand::Rng;

const DEFAULT_DISASSEMBLER: &str = "objdump";

/// Disassemble `code` (a flat buffer of x86-64 machine code, no ELF
/// wrapper) using `objdump -D -b binary -m i386:x86-64`, printed to
/// stdout. Errors (missing `objdump`, write failures) are logged, not
/// propagated — this is a diagnostic side effect, not part of the
/// compilation result.
pub fn dump_native(code: &[u8]) {
    dump_native_with(DEFAULT_DISASSEMBLER, code)
}

/// As [`dump_native`], naming the disassembler executable explicitly.
pub fn dump_native_with(disassembler: &str, code: &[u8]) {
    let mut path = std::env::temp_dir();
    let suffix: String = rand::rng().sample_iter(&Alphanumeric).take(12).map(char::from).collect();
    path.push(format!("exprjit-disas-{suffix}.bin"));

    let mut file = match std::fs::File::create(&path) {
        Ok(f) => f,
        Err(e) => {
            log::warn!("disassembly dump skipped: could not create temp file ({e})");
            return;
        }
    };
    if let Err(e) = file.write_all(code) {
        log::warn!("disassembly dump skipped: could not write temp file ({e})");
        return;
    }
    drop(file);

    match Command::new(disassembler)
        .arg("-D")
        .arg("-b")
        .arg("binary")
        .arg("-m")
        .arg("i386:x86-64")
        .arg(&path)
        .output()
    {
        Ok(output) => print!("{}", String::from_utf8_lossy(&output.stdout)),
        Err(e) => log::warn!("disassembly dump skipped: {disassembler} unavailable ({e})"),
    }

    let _ = std::fs::remove_file(&path);
}
