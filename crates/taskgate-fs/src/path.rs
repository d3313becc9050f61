use std::path::{Path, PathBuf};

use thiserror::Error;

use taskgate_redacted::Shielded;

use crate::ValidationPolicy;

/// Prefix of a reference into another app's (or this app's) installation area.
pub const FILE_SCHEME: &str = "file://";

/// Prefix of a reference relative to the caller's private cache directory.
pub const INTERNAL_CACHE_SCHEME: &str = "internal://cache/";

/// Prefix of an explicitly relative reference, resolved against the private cache directory.
pub const CURRENT_DIR_PREFIX: &str = "./";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("Path is empty")]
    Empty,
    #[error("Path contains a NUL byte")]
    Nul,
    #[error("Path `{}` escapes its root", Path::new(.0).shielded())]
    EscapesRoot(String),
    #[error("Path `{}` is not inside a sandbox root", .0.shielded())]
    NotInSandbox(PathBuf),
    #[error("`file://` reference names bundle `{found}`, but the caller is `{expected}`")]
    CrossBundleReference { expected: String, found: String },
    #[error("Path `{}` passes through a symbolic link", .0.shielded())]
    Symlink(PathBuf),
    #[error("`{scheme}` references are not supported under the {policy} validation policy")]
    UnsupportedScheme {
        scheme: &'static str,
        policy: ValidationPolicy,
    },
}

/// The caller-specific inputs to [`standardize`].
#[derive(Debug, Clone, Copy)]
pub struct PathContext<'a> {
    /// The owning bundle of the task, matched against `file://<bundle>/...` references.
    pub bundle: &'a str,
    /// The caller's private cache directory, the base of relative and `internal://cache/`
    /// references.
    pub cache_dir: &'a Path,
}

/// How a raw reference was interpreted before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Absolute,
    File,
    InternalCache,
    Relative,
}

impl PathKind {
    /// Classify a raw reference by its scheme prefix.
    ///
    /// The checks are ordered: absolute paths first, then `file://`, then `internal://cache/`, and
    /// anything else (including `./`) is relative.
    pub fn classify(raw: &str) -> Self {
        if raw.starts_with('/') {
            Self::Absolute
        } else if raw.starts_with(FILE_SCHEME) {
            Self::File
        } else if raw.starts_with(INTERNAL_CACHE_SCHEME) {
            Self::InternalCache
        } else {
            Self::Relative
        }
    }
}

/// Rewrite a user-supplied reference into a canonical absolute path under one of `roots`.
///
/// `..` segments are collapsed against the segments that precede them *within the reference*.
/// A `..` with nothing left to pop is an error rather than being clamped: clamping would let a
/// crafted reference alias an arbitrary directory under the base.
///
/// The result is guaranteed to be absolute, free of `.`/`..` segments, strictly below one of the
/// sandbox roots, and free of symbolic links in every component that already exists.
pub fn standardize(
    raw: &str,
    roots: &[PathBuf],
    context: PathContext<'_>,
    policy: ValidationPolicy,
) -> Result<PathBuf, PathError> {
    if raw.is_empty() {
        return Err(PathError::Empty);
    }
    if raw.contains('\0') {
        return Err(PathError::Nul);
    }

    let path = match PathKind::classify(raw) {
        PathKind::Absolute => normalize_segments(Path::new("/"), raw)?,
        PathKind::File => {
            if !policy.allows_file_scheme() {
                return Err(PathError::UnsupportedScheme {
                    scheme: FILE_SCHEME,
                    policy,
                });
            }
            let rest = &raw[FILE_SCHEME.len()..];
            let (bundle, rest) = rest.split_once('/').unwrap_or((rest, ""));
            if bundle != context.bundle {
                return Err(PathError::CrossBundleReference {
                    expected: context.bundle.to_string(),
                    found: bundle.to_string(),
                });
            }
            normalize_segments(Path::new("/"), rest)?
        }
        PathKind::InternalCache => {
            normalize_segments(context.cache_dir, &raw[INTERNAL_CACHE_SCHEME.len()..])?
        }
        PathKind::Relative => normalize_segments(
            context.cache_dir,
            raw.strip_prefix(CURRENT_DIR_PREFIX).unwrap_or(raw),
        )?,
    };

    let Some(root) = sandbox_root(&path, roots) else {
        return Err(PathError::NotInSandbox(path));
    };
    reject_symlinks(&path, root)?;
    Ok(path)
}

/// Fail if any existing component of `path` below `root` is a symbolic link.
///
/// The lexical checks above say nothing about where a link points, so a link anywhere below the
/// root could lead outside of it. Components that do not exist yet are not checked.
pub fn reject_symlinks(path: &Path, root: &Path) -> Result<(), PathError> {
    for component in ancestor_chain(path, root) {
        match fs_err::symlink_metadata(&component) {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                return Err(PathError::Symlink(component));
            }
            Ok(_) => {}
            // Nothing below a missing (or unreadable) component can exist for us either.
            Err(_) => break,
        }
    }
    Ok(())
}

/// Return the sandbox root that strictly contains `path`, if any.
///
/// When roots nest, the deepest match wins.
pub fn sandbox_root<'a>(path: &Path, roots: &'a [PathBuf]) -> Option<&'a Path> {
    roots
        .iter()
        .filter(|root| path.starts_with(root) && path != root.as_path())
        .max_by_key(|root| root.components().count())
        .map(PathBuf::as_path)
}

/// Join the `/`-separated `relative` onto `base`, collapsing `.` and `..`.
fn normalize_segments(base: &Path, relative: &str) -> Result<PathBuf, PathError> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(PathError::EscapesRoot(relative.to_string()));
                }
            }
            segment => segments.push(segment),
        }
    }

    let mut path = base.to_path_buf();
    path.extend(segments);
    Ok(path)
}

/// Split `path` at the last occurrence of `separator`.
///
/// Returns `None` when the separator is absent or is the final character, so that callers can
/// apply their own fallback (e.g., "no derivable filename", "no extension").
///
/// ```text
/// split_last_segment("/a/b/report.pdf", '/') => Some(("/a/b", "report.pdf"))
/// split_last_segment("report.pdf", '.')      => Some(("report", "pdf"))
/// split_last_segment("/a/b/", '/')           => None
/// ```
pub fn split_last_segment(path: &str, separator: char) -> Option<(&str, &str)> {
    let index = path.rfind(separator)?;
    let tail = &path[index + separator.len_utf8()..];
    if tail.is_empty() {
        return None;
    }
    Some((&path[..index], tail))
}

/// The ancestor chain of `path` strictly below `root`, outermost first, ending at `path` itself.
///
/// ```text
/// ancestor_chain("/root/a/b/c", "/root") => ["/root/a", "/root/a/b", "/root/a/b/c"]
/// ```
///
/// Returns an empty chain if `path` is not strictly below `root`.
pub fn ancestor_chain(path: &Path, root: &Path) -> Vec<PathBuf> {
    let Ok(relative) = path.strip_prefix(root) else {
        return Vec::new();
    };
    let mut current = root.to_path_buf();
    relative
        .components()
        .map(|component| {
            current.push(component);
            current.clone()
        })
        .collect()
}
