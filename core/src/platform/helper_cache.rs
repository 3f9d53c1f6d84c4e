//! Process-wide cache for the compiled native helper binaries (Swift on
//! macOS, C# on Windows) invoked as subprocesses (§9 "Subprocess helper
//! compilation", §5 "Shared resources").
//!
//! Compilation is lazy, on first use, and crash-safe: write to a temp file
//! then rename into place. A caller that finds the binary present just uses
//! it; concurrent compilers racing to the same path both produce
//! functionally identical output, so last-writer-wins is an acceptable
//! strategy rather than something that needs a cross-process lock.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::CupError;

static CACHE_DIR: OnceLock<PathBuf> = OnceLock::new();

fn cache_dir() -> &'static Path {
    CACHE_DIR.get_or_init(|| {
        let mut dir = std::env::temp_dir();
        dir.push("cup-core-helpers");
        dir
    })
}

/// Returns the cached path for `name`, compiling via `compile` if absent.
/// `compile` receives the destination temp path to write its output to and
/// must not write directly to the final path (atomic rename handles that).
pub fn ensure_compiled(
    name: &str,
    compile: impl FnOnce(&Path) -> Result<(), CupError>,
) -> Result<PathBuf, CupError> {
    let dir = cache_dir();
    std::fs::create_dir_all(dir).map_err(CupError::from)?;
    let final_path = dir.join(name);

    if final_path.exists() && is_executable(&final_path) {
        return Ok(final_path);
    }

    let tmp_path = dir.join(format!("{name}.tmp-{}", std::process::id()));
    compile(&tmp_path)?;
    std::fs::rename(&tmp_path, &final_path).map_err(CupError::from)?;
    Ok(final_path)
}

/// Delete a corrupted cached helper so the next call recompiles it (§9
/// "Corruption recovery").
pub fn invalidate(name: &str) {
    let path = cache_dir().join(name);
    let _ = std::fs::remove_file(path);
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_compiled_writes_then_renames() {
        let name = format!("test-helper-{}", std::process::id());
        let path = ensure_compiled(&name, |tmp| {
            std::fs::write(tmp, b"#!/bin/sh\necho ok\n").map_err(CupError::from)
        })
        .expect("compile should succeed");
        assert!(path.exists());
        invalidate(&name);
        assert!(!path.exists());
    }

    #[test]
    fn ensure_compiled_reuses_existing_binary() {
        let name = format!("test-helper-reuse-{}", std::process::id());
        let calls = std::cell::Cell::new(0);
        for _ in 0..2 {
            ensure_compiled(&name, |tmp| {
                calls.set(calls.get() + 1);
                std::fs::write(tmp, b"#!/bin/sh\necho ok\n").map_err(CupError::from)
            })
            .expect("compile should succeed");
        }
        assert_eq!(calls.get(), 1);
        invalidate(&name);
    }
}
