use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use taskgate_redacted::Shielded;

pub use crate::path::*;
pub use crate::policy::ValidationPolicy;
pub use crate::task_file::{OverwritePolicy, TaskFile};

mod path;
mod policy;
mod task_file;

/// Return a [`NamedTempFile`] in the specified directory.
///
/// Sets the permissions of the temporary file to `0o644`, so that the transfer executor can read
/// it once granted access. ([`NamedTempFile`] defaults to `0o600`.)
#[cfg(unix)]
pub fn tempfile_in(path: &Path) -> std::io::Result<NamedTempFile> {
    use std::os::unix::fs::PermissionsExt;
    tempfile::Builder::new()
        .permissions(std::fs::Permissions::from_mode(0o644))
        .tempfile_in(path)
}

/// Return a [`NamedTempFile`] in the specified directory.
#[cfg(not(unix))]
pub fn tempfile_in(path: &Path) -> std::io::Result<NamedTempFile> {
    tempfile::Builder::new().tempfile_in(path)
}

/// Copy `from` to `to` atomically using a temporary file and atomic rename.
///
/// Concurrent copies to the same destination are safe: each writes its own temporary file and
/// the last rename wins, so readers never observe a partially written file.
pub fn copy_atomic_sync(from: impl AsRef<Path>, to: impl AsRef<Path>) -> std::io::Result<()> {
    let to = to.as_ref();
    let Some(parent) = to.parent() else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("Copy destination has no parent: {}", to.shielded()),
        ));
    };
    let temp_file = tempfile_in(parent)?;
    fs_err::copy(from.as_ref(), temp_file.path())?;
    temp_file.persist(to).map_err(|err| {
        std::io::Error::other(format!(
            "Failed to persist temporary file to {}: {}",
            to.shielded(),
            err.error
        ))
    })?;
    debug!("Copied `{}` to `{}`", from.as_ref().shielded(), to.shielded());
    Ok(())
}

/// Create `path` and every missing ancestor directory, returning the directories that were
/// created by this call (outermost first).
pub fn create_dir_all_tracked(path: &Path) -> std::io::Result<Vec<std::path::PathBuf>> {
    let mut missing = Vec::new();
    for ancestor in path.ancestors() {
        if ancestor.as_os_str().is_empty() || ancestor.is_dir() {
            break;
        }
        missing.push(ancestor.to_path_buf());
    }
    missing.reverse();

    let mut created = Vec::with_capacity(missing.len());
    for dir in missing {
        match fs_err::create_dir(&dir) {
            Ok(()) => {
                debug!("Created directory `{}`", dir.shielded());
                created.push(dir);
            }
            // Another task may have created it concurrently.
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(err) => return Err(err),
        }
    }
    Ok(created)
}
