use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, error, trace, warn};

use taskgate_fs::{ancestor_chain, sandbox_root};
use taskgate_redacted::Shielded;

use crate::{GrantKind, GrantPrimitive, LeafKind};

#[derive(Debug, Error)]
pub enum GrantError {
    #[error("Cannot grant access to `{}`: not inside a sandbox root", .0.shielded())]
    OutsideSandbox(PathBuf),
    #[error("Failed to grant {kind} access on `{}`", .path.shielded())]
    Install {
        path: PathBuf,
        kind: GrantKind,
        #[source]
        source: std::io::Error,
    },
    #[error("No grant is held on `{}`", .0.shielded())]
    NotHeld(PathBuf),
}

/// A live grant: the access installed on disk and the number of holders that need it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AclEntry {
    pub kind: GrantKind,
    pub refcount: u32,
}

impl AclEntry {
    /// Whether this path was granted as a leaf file (rather than a traversable directory).
    pub fn is_leaf_file(&self) -> bool {
        self.kind == GrantKind::ReadWrite
    }
}

/// The outcome of [`AclGrantRegistry::reinstall_all`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReinstallReport {
    pub reinstalled: usize,
    pub failed: Vec<PathBuf>,
}

/// One applied change within a single [`AclGrantRegistry::add_path`] call, recorded so that a
/// later failure in the same call can be undone.
enum Step {
    Installed(PathBuf),
    Incremented(PathBuf),
    Upgraded { path: PathBuf, previous: GrantKind },
}

/// Maps each granted path to its [`AclEntry`], installing an OS-level grant when a path gains its
/// first holder and revoking it when the last holder lets go.
///
/// A single mutex covers the map. The primitive is invoked while holding it, so that the on-disk
/// state and the refcount for a path can never be observed out of step.
pub struct AclGrantRegistry {
    roots: Vec<PathBuf>,
    primitive: Box<dyn GrantPrimitive>,
    entries: Mutex<FxHashMap<PathBuf, AclEntry>>,
}

impl AclGrantRegistry {
    /// Create a registry for paths below `roots`.
    pub fn new(roots: Vec<PathBuf>, primitive: impl GrantPrimitive + 'static) -> Self {
        Self {
            roots,
            primitive: Box::new(primitive),
            entries: Mutex::default(),
        }
    }

    /// The sandbox roots this registry grants below.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<PathBuf, AclEntry>> {
        // Every mutation leaves the map consistent before any call that may panic, so a poisoned
        // lock still guards valid data.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn chain(&self, path: &Path) -> Result<Vec<PathBuf>, GrantError> {
        let Some(root) = sandbox_root(path, &self.roots) else {
            return Err(GrantError::OutsideSandbox(path.to_path_buf()));
        };
        Ok(ancestor_chain(path, root))
    }

    /// Take a hold on `path` and every directory between its sandbox root and it.
    ///
    /// Ancestors are granted [`GrantKind::Traverse`]; the leaf is granted according to `leaf`. If
    /// the primitive fails partway through, every change made by this call is undone before the
    /// error is returned; holds taken by other calls are never touched.
    pub fn add_path(&self, path: &Path, leaf: LeafKind) -> Result<(), GrantError> {
        let chain = self.chain(path)?;
        let mut entries = self.lock();
        let mut steps = Vec::with_capacity(chain.len());

        for (index, dir) in chain.iter().enumerate() {
            let is_leaf = index + 1 == chain.len();
            let wanted = if is_leaf {
                leaf.grant_kind()
            } else {
                GrantKind::Traverse
            };

            let result = match entries.get_mut(dir) {
                Some(entry) => {
                    let joined = if is_leaf {
                        entry.kind.join(wanted)
                    } else {
                        entry.kind
                    };
                    if joined == entry.kind {
                        entry.refcount += 1;
                        trace!(
                            "Grant on `{}` now has {} holders",
                            dir.shielded(),
                            entry.refcount
                        );
                        steps.push(Step::Incremented(dir.clone()));
                        Ok(())
                    } else {
                        match self.primitive.set_grant(dir, joined) {
                            Ok(()) => {
                                debug!(
                                    "Upgraded grant on `{}` from {} to {joined}",
                                    dir.shielded(),
                                    entry.kind
                                );
                                steps.push(Step::Upgraded {
                                    path: dir.clone(),
                                    previous: entry.kind,
                                });
                                entry.kind = joined;
                                entry.refcount += 1;
                                Ok(())
                            }
                            Err(source) => Err((joined, source)),
                        }
                    }
                }
                None => match self.primitive.set_grant(dir, wanted) {
                    Ok(()) => {
                        debug!("Granted {wanted} on `{}`", dir.shielded());
                        entries.insert(
                            dir.clone(),
                            AclEntry {
                                kind: wanted,
                                refcount: 1,
                            },
                        );
                        steps.push(Step::Installed(dir.clone()));
                        Ok(())
                    }
                    Err(source) => Err((wanted, source)),
                },
            };

            if let Err((kind, source)) = result {
                warn!(
                    "Failed to grant {kind} on `{}`, rolling back {} step(s): {source}",
                    dir.shielded(),
                    steps.len()
                );
                self.rollback(&mut entries, steps);
                return Err(GrantError::Install {
                    path: dir.clone(),
                    kind,
                    source,
                });
            }
        }

        Ok(())
    }

    /// Undo `steps` in reverse order.
    fn rollback(&self, entries: &mut FxHashMap<PathBuf, AclEntry>, steps: Vec<Step>) {
        for step in steps.into_iter().rev() {
            match step {
                Step::Installed(path) => {
                    entries.remove(&path);
                    if let Err(err) = self.primitive.revoke_grant(&path) {
                        warn!(
                            "Failed to revoke grant on `{}` during rollback: {err}",
                            path.shielded()
                        );
                    }
                }
                Step::Incremented(path) => {
                    if let Some(entry) = entries.get_mut(&path) {
                        entry.refcount -= 1;
                    }
                }
                Step::Upgraded { path, previous } => {
                    if let Some(entry) = entries.get_mut(&path) {
                        entry.refcount -= 1;
                        entry.kind = previous;
                    }
                    if let Err(err) = self.primitive.set_grant(&path, previous) {
                        warn!(
                            "Failed to restore {previous} grant on `{}` during rollback: {err}",
                            path.shielded()
                        );
                    }
                }
            }
        }
    }

    /// Release a hold previously taken with [`AclGrantRegistry::add_path`].
    ///
    /// Entries whose last holder is released are removed and their OS grant revoked. A failed
    /// revoke is logged and the entry is removed regardless: a leaked grant can be reconciled
    /// later, while an entry that can never reach zero cannot.
    ///
    /// Releasing a path that is not held is a caller bug: [`GrantError::NotHeld`] reports the first
    /// missing entry and nothing is released.
    pub fn sub_path(&self, path: &Path) -> Result<(), GrantError> {
        let chain = self.chain(path)?;
        let mut entries = self.lock();

        if let Some(missing) = chain.iter().find(|dir| !entries.contains_key(*dir)) {
            error!("Released `{}` without holding a grant", missing.shielded());
            return Err(GrantError::NotHeld(missing.clone()));
        }

        for dir in chain {
            let Some(entry) = entries.get_mut(&dir) else {
                continue;
            };

            if entry.refcount > 1 {
                entry.refcount -= 1;
                trace!(
                    "Grant on `{}` now has {} holders",
                    dir.shielded(),
                    entry.refcount
                );
                continue;
            }

            entries.remove(&dir);
            match self.primitive.revoke_grant(&dir) {
                Ok(()) => debug!("Revoked grant on `{}`", dir.shielded()),
                Err(err) => warn!("Failed to revoke grant on `{}`: {err}", dir.shielded()),
            }
        }

        Ok(())
    }

    /// Re-apply every currently held grant, e.g., after the grant service restarted and lost
    /// state. Safe to call at any time.
    pub fn reinstall_all(&self) -> ReinstallReport {
        let entries = self.lock();
        let mut report = ReinstallReport::default();
        for (path, entry) in entries.iter() {
            match self.primitive.set_grant(path, entry.kind) {
                Ok(()) => report.reinstalled += 1,
                Err(err) => {
                    error!(
                        "Failed to reinstall {} grant on `{}`: {err}",
                        entry.kind,
                        path.shielded()
                    );
                    report.failed.push(path.clone());
                }
            }
        }
        debug!(
            "Reinstalled {} grant(s), {} failure(s)",
            report.reinstalled,
            report.failed.len()
        );
        report
    }

    /// Re-apply the held grant on `path` alone, e.g., after the file was replaced by a rename.
    pub fn reinstall(&self, path: &Path) -> Result<(), GrantError> {
        let entries = self.lock();
        let Some(entry) = entries.get(path) else {
            return Err(GrantError::NotHeld(path.to_path_buf()));
        };
        self.primitive
            .set_grant(path, entry.kind)
            .map_err(|source| GrantError::Install {
                path: path.to_path_buf(),
                kind: entry.kind,
                source,
            })?;
        trace!("Reinstalled {} grant on `{}`", entry.kind, path.shielded());
        Ok(())
    }

    /// The entry for `path`, if any holder has it granted.
    pub fn entry(&self, path: &Path) -> Option<AclEntry> {
        self.lock().get(path).copied()
    }

    /// The number of holders of `path`, or zero if it is not granted.
    pub fn refcount(&self, path: &Path) -> u32 {
        self.entry(path).map_or(0, |entry| entry.refcount)
    }

    /// The number of granted paths.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl std::fmt::Debug for AclGrantRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AclGrantRegistry")
            .field("roots", &self.roots)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
