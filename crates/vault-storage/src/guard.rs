//! Path safety: keep every derived path inside its storage root
//!
//! Both paths are made absolute and normalised lexically, then the longest
//! existing prefix is canonicalised so symlinks are followed. The candidate is
//! accepted only if it equals the base or is nested under it, checked twice:
//! by stripping the base as a path prefix and by a plain string prefix test
//! against `base + separator`.

use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("path traversal detected: {candidate} is outside {base}")]
    Escape { base: PathBuf, candidate: PathBuf },

    #[error("resolving path {path}: {source}")]
    Resolve {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Verify `candidate` resolves inside `base`; returns the resolved candidate.
pub fn ensure_inside(base: &Path, candidate: &Path) -> Result<PathBuf, GuardError> {
    let resolved_base = resolve(base)?;
    let resolved = resolve(candidate)?;

    let escape = || GuardError::Escape {
        base: resolved_base.clone(),
        candidate: resolved.clone(),
    };

    let relative = resolved.strip_prefix(&resolved_base).map_err(|_| escape())?;
    if relative.is_absolute()
        || relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
    {
        return Err(escape());
    }

    let base_str = resolved_base.to_string_lossy();
    let target_str = resolved.to_string_lossy();
    let mut prefix = base_str.to_string();
    if !prefix.ends_with(MAIN_SEPARATOR) {
        prefix.push(MAIN_SEPARATOR);
    }
    if target_str != base_str && !target_str.starts_with(&prefix) {
        return Err(escape());
    }

    Ok(resolved)
}

/// Join an untrusted relative name onto `base` and guard the result.
pub fn join_inside(base: &Path, untrusted: &str) -> Result<PathBuf, GuardError> {
    ensure_inside(base, &base.join(untrusted))
}

fn resolve(path: &Path) -> Result<PathBuf, GuardError> {
    let absolute = std::path::absolute(path).map_err(|source| GuardError::Resolve {
        path: path.to_path_buf(),
        source,
    })?;
    let lexical = normalize(&absolute);

    // Canonicalise the deepest existing ancestor, then re-append the rest.
    let mut existing = lexical.as_path();
    let mut tail: Vec<OsString> = Vec::new();
    loop {
        match std::fs::canonicalize(existing) {
            Ok(mut canon) => {
                for name in tail.iter().rev() {
                    canon.push(name);
                }
                return Ok(canon);
            }
            Err(_) => match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    tail.push(name.to_os_string());
                    existing = parent;
                }
                _ => return Ok(lexical),
            },
        }
    }
}

/// Collapse `.` and `..` without touching the filesystem. `..` never climbs
/// above the root.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(name) => out.push(name),
        }
    }
    out
}
