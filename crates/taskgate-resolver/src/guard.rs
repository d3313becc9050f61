use std::path::PathBuf;

use tracing::{debug, warn};

use taskgate_acl::AclGrantRegistry;
use taskgate_redacted::Shielded;

/// What an admitted task holds until it is released.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Holdings {
    /// Leaf paths passed to [`AclGrantRegistry::add_path`], in acquisition order.
    pub grants: Vec<PathBuf>,
    /// Temporary upload bodies created for the task.
    pub body_files: Vec<PathBuf>,
}

impl Holdings {
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty() && self.body_files.is_empty()
    }

    /// Drop every grant and delete every body file.
    ///
    /// Failures are logged and skipped, so that one stuck path never keeps the rest alive.
    /// Returns the number of failures.
    pub fn release(self, registry: &AclGrantRegistry) -> usize {
        let mut failures = 0;
        for path in self.grants.iter().rev() {
            if let Err(err) = registry.sub_path(path) {
                warn!("Failed to release grant on `{}`: {err}", path.shielded());
                failures += 1;
            }
        }
        for path in &self.body_files {
            match fs_err::remove_file(path) {
                Ok(()) => debug!("Removed body file `{}`", path.shielded()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!("Failed to remove body file `{}`: {err}", path.shielded());
                    failures += 1;
                }
            }
        }
        failures
    }
}

/// Filesystem entries created during a single resolution pass.
#[derive(Debug)]
enum Created {
    File(PathBuf),
    Dir(PathBuf),
}

/// Tracks everything acquired while resolving one task and gives it all back on drop, unless the
/// resolution is committed.
pub(crate) struct ResolutionGuard<'a> {
    registry: &'a AclGrantRegistry,
    holdings: Holdings,
    created: Vec<Created>,
    committed: bool,
}

impl<'a> ResolutionGuard<'a> {
    pub(crate) fn new(registry: &'a AclGrantRegistry) -> Self {
        Self {
            registry,
            holdings: Holdings::default(),
            created: Vec::new(),
            committed: false,
        }
    }

    /// Record a successful [`AclGrantRegistry::add_path`].
    pub(crate) fn granted(&mut self, path: PathBuf) {
        self.holdings.grants.push(path);
    }

    /// Record a body file, deleted on rollback and on release.
    pub(crate) fn body_file(&mut self, path: PathBuf) {
        self.holdings.body_files.push(path);
    }

    /// Record a file this pass created, deleted on rollback only.
    pub(crate) fn created_file(&mut self, path: PathBuf) {
        self.created.push(Created::File(path));
    }

    /// Record directories this pass created, removed on rollback if still empty.
    pub(crate) fn created_dirs(&mut self, dirs: impl IntoIterator<Item = PathBuf>) {
        self.created.extend(dirs.into_iter().map(Created::Dir));
    }

    pub(crate) fn commit(mut self) -> Holdings {
        self.committed = true;
        std::mem::take(&mut self.holdings)
    }
}

impl Drop for ResolutionGuard<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }

        let holdings = std::mem::take(&mut self.holdings);
        debug!(
            "Rolling back {} grant(s) and {} body file(s)",
            holdings.grants.len(),
            holdings.body_files.len()
        );
        holdings.release(self.registry);

        for created in self.created.drain(..).rev() {
            let (path, result) = match &created {
                Created::File(path) => (path, fs_err::remove_file(path)),
                Created::Dir(path) => (path, fs_err::remove_dir(path)),
            };
            if let Err(err) = result {
                debug!(
                    "Left `{}` in place during rollback: {}",
                    path.shielded(),
                    err.kind()
                );
            }
        }
    }
}
