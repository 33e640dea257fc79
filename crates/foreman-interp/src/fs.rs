// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Component, Path, PathBuf};

use crate::{ToolError, ToolErrorCode};

/// Base-path-scoped view of the filesystem.
///
/// Every file-touching host function resolves its paths here.  Script paths
/// must be absolute and are interpreted *inside* the base directory, so a
/// task whose project directory is `/work/proj` sees `/src/main.rs` as
/// `/work/proj/src/main.rs` and has no way to name anything outside the
/// base.  `..` components that would climb past the virtual root are
/// refused rather than clamped.
#[derive(Debug, Clone)]
pub struct ScopedFs {
    root: PathBuf,
}

impl ScopedFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// An unscoped view (base `/`).  Used when a task has no project
    /// directory.
    pub fn unscoped() -> Self {
        Self { root: PathBuf::from("/") }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a script-visible path to a real one.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        let p = Path::new(path);
        if !p.is_absolute() {
            return Err(ToolError::invalid(format!(
                "path must be absolute, got: {path}"
            )));
        }

        let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
        for comp in p.components() {
            match comp {
                Component::RootDir | Component::Prefix(_) => {}
                Component::CurDir => {}
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(ToolError::new(
                            ToolErrorCode::PermissionDenied,
                            format!("path escapes the project directory: {path}"),
                        ));
                    }
                }
                Component::Normal(seg) => parts.push(seg),
            }
        }

        let mut out = self.root.clone();
        for seg in parts {
            out.push(seg);
        }
        Ok(out)
    }

    /// Map a real path back to its script-visible form.  Paths outside the
    /// base are returned as-is (lossy, but only reachable through symlinks).
    pub fn virtualize(&self, real: &Path) -> String {
        match real.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => "/".to_string(),
            Ok(rel) => format!("/{}", rel.display()),
            Err(_) => real.display().to_string(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_path_maps_into_root() {
        let fs = ScopedFs::new("/work/proj");
        assert_eq!(fs.resolve("/src/main.rs").unwrap(), PathBuf::from("/work/proj/src/main.rs"));
    }

    #[test]
    fn relative_path_is_refused() {
        let fs = ScopedFs::new("/work/proj");
        let err = fs.resolve("src/main.rs").unwrap_err();
        assert_eq!(err.code, ToolErrorCode::InvalidArgument);
    }

    #[test]
    fn escape_via_dotdot_is_refused() {
        let fs = ScopedFs::new("/work/proj");
        let err = fs.resolve("/../etc/passwd").unwrap_err();
        assert_eq!(err.code, ToolErrorCode::PermissionDenied);
    }

    #[test]
    fn internal_dotdot_is_normalized() {
        let fs = ScopedFs::new("/work/proj");
        assert_eq!(
            fs.resolve("/a/b/../c.txt").unwrap(),
            PathBuf::from("/work/proj/a/c.txt")
        );
    }

    #[test]
    fn unscoped_view_is_identity() {
        let fs = ScopedFs::unscoped();
        assert_eq!(fs.resolve("/tmp/x").unwrap(), PathBuf::from("/tmp/x"));
    }

    #[test]
    fn curdir_components_are_dropped() {
        let fs = ScopedFs::new("/base");
        assert_eq!(fs.resolve("/./a/./b").unwrap(), PathBuf::from("/base/a/b"));
    }

    #[test]
    fn virtualize_inverts_resolve() {
        let fs = ScopedFs::new("/work/proj");
        let real = fs.resolve("/src/lib.rs").unwrap();
        assert_eq!(fs.virtualize(&real), "/src/lib.rs");
        assert_eq!(fs.virtualize(Path::new("/work/proj")), "/");
    }
}
