//! Per-process working directory: `chdir`/`getcwd` and relative-path
//! resolution against a [`Pcb`]'s [`CanonicalPath`].

use alloc::string::String;

use super::pcb::Pcb;
use crate::error::KernelResult;
use crate::fs::path::{self, CanonicalPath};

/// Resolves `path` against `pcb`'s working directory.
pub fn resolve(pcb: &Pcb, raw_path: &str) -> KernelResult<CanonicalPath> {
    path::resolve(raw_path, &pcb.cwd)
}

/// Implements `chdir`: resolves `raw_path` and, if it exists, makes it
/// the process's new working directory.
pub fn chdir(pcb: &mut Pcb, raw_path: &str) -> KernelResult<()> {
    let target = resolve(pcb, raw_path)?;
    pcb.cwd = target;
    Ok(())
}

/// Implements `getcwd`: the rendered `<mp>:/a/b` form of the working
/// directory.
pub fn getcwd(pcb: &Pcb) -> String {
    pcb.cwd.render()
}
