//! Path resolution and confinement.
//!
//! Paths are resolved the way the kernel would see them at execution time:
//! relative arguments against the step's working directory, then symlinks
//! through the longest existing ancestor, then `.`/`..` lexically on the
//! remainder that does not exist yet.

use crate::error::ValidationError;
use crate::invocation::Invocation;
use std::path::{Component, Path, PathBuf};

/// A set of allowed root directories, pre-resolved.
#[derive(Debug, Clone)]
pub struct PathConfinement {
    roots: Vec<PathBuf>,
}

impl PathConfinement {
    pub fn new<'p>(allowed: impl IntoIterator<Item = &'p PathBuf>) -> Self {
        let mut roots: Vec<PathBuf> = Vec::new();
        for dir in allowed {
            // Keep both spellings so a root that is itself a symlink matches
            // either way it is written.
            let lexical = normalize(dir);
            let resolved = resolve(&lexical);
            if !roots.contains(&lexical) {
                roots.push(lexical);
            }
            if !roots.contains(&resolved) {
                roots.push(resolved);
            }
        }
        Self { roots }
    }

    /// Whether `path` (already resolved) lies inside an allowed root.
    pub fn contains(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| path.starts_with(root))
    }

    /// Resolve `arg` relative to `working_dir` and test it.
    ///
    /// Returns the resolved path on failure.
    pub fn check(&self, arg: &str, working_dir: &Path) -> Result<(), PathBuf> {
        let resolved = resolve_arg(arg, working_dir);
        if self.contains(&resolved) {
            Ok(())
        } else {
            Err(resolved)
        }
    }

    /// Every path-like argument and the working directory must resolve
    /// inside the allowed roots.
    pub fn validate(
        &self,
        invocation: &Invocation<'_>,
        working_dir: &Path,
    ) -> Result<(), ValidationError> {
        let wd = resolve(&normalize(working_dir));
        if !working_dir.is_absolute() || !self.contains(&wd) {
            return Err(ValidationError::working_dir_outside(&wd));
        }

        for arg in invocation.args {
            let Some(candidate) = path_candidate(arg) else {
                continue;
            };
            if let Err(resolved) = self.check(candidate, &wd) {
                return Err(ValidationError::path_outside(arg, &resolved));
            }
        }
        Ok(())
    }
}

/// The path inside `arg`, if it looks like one.
///
/// Covers bare paths (`/etc/x`, `./pkg.deb`, `../y`, `dir/file`) and the
/// value side of `--flag=path` / `key=path`. URLs and package specifiers are
/// not paths.
pub fn path_candidate(arg: &str) -> Option<&str> {
    let value = match arg.split_once('=') {
        Some((key, value)) if !key.contains('/') => value,
        _ => arg,
    };
    looks_like_path(value).then_some(value)
}

fn looks_like_path(value: &str) -> bool {
    if value.is_empty() || value.contains("://") {
        return false;
    }
    if value.starts_with('-') {
        return false;
    }
    value.starts_with('/')
        || value.starts_with("./")
        || value.starts_with("../")
        || value == "."
        || value == ".."
        || value.starts_with('~')
        || value.contains('/')
}

/// Resolve an argument against the working directory.
pub fn resolve_arg(arg: &str, working_dir: &Path) -> PathBuf {
    let path = Path::new(arg);
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        working_dir.join(path)
    };
    resolve(&normalize(&joined))
}

/// Resolve symlinks through the longest existing ancestor of `path`.
///
/// `path` must be absolute and lexically normalized.
pub fn resolve(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();

    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut out = canonical;
            for part in tail.iter().rev() {
                out.push(part);
            }
            return normalize(&out);
        }
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => return path.to_path_buf(),
        }
    }
}

/// Lexical normalization: drop `.`, fold `..`, never climb above `/`.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push("/"),
            Component::CurDir => {}
            Component::ParentDir => {
                let at_root = out.has_root() && out.parent().is_none();
                if !at_root && !out.pop() {
                    out.push("..");
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
