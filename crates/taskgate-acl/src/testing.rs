//! An in-memory [`GrantPrimitive`] that records every call.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{GrantKind, GrantPrimitive};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantCall {
    Set(PathBuf, GrantKind),
    Revoke(PathBuf),
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<GrantCall>,
    installed: FxHashMap<PathBuf, GrantKind>,
    fail_set: FxHashSet<PathBuf>,
    fail_revoke: FxHashSet<PathBuf>,
}

/// Records calls and tracks which grants are currently installed. Cloning shares the state, so a
/// test can keep a handle after moving one into a registry.
#[derive(Debug, Default, Clone)]
pub struct RecordingGrants {
    state: Arc<Mutex<State>>,
}

impl RecordingGrants {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every subsequent [`GrantPrimitive::set_grant`] on `path` fail.
    pub fn fail_set_on(&self, path: impl Into<PathBuf>) {
        self.state().fail_set.insert(path.into());
    }

    /// Make every subsequent [`GrantPrimitive::revoke_grant`] on `path` fail.
    pub fn fail_revoke_on(&self, path: impl Into<PathBuf>) {
        self.state().fail_revoke.insert(path.into());
    }

    /// Clear injected failures.
    pub fn heal(&self) {
        let mut state = self.state();
        state.fail_set.clear();
        state.fail_revoke.clear();
    }

    pub fn calls(&self) -> Vec<GrantCall> {
        self.state().calls.clone()
    }

    /// The grant currently installed on `path`, if any.
    pub fn installed(&self, path: &Path) -> Option<GrantKind> {
        self.state().installed.get(path).copied()
    }

    /// The number of paths that currently carry a grant.
    pub fn installed_count(&self) -> usize {
        self.state().installed.len()
    }

    pub fn set_count(&self, path: &Path) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call, GrantCall::Set(p, _) if p == path))
            .count()
    }

    pub fn revoke_count(&self, path: &Path) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call, GrantCall::Revoke(p) if p == path))
            .count()
    }

    /// Forget installed grants without recording revokes, as if the grant service restarted.
    pub fn wipe(&self) {
        self.state().installed.clear();
    }
}

impl GrantPrimitive for RecordingGrants {
    fn set_grant(&self, path: &Path, kind: GrantKind) -> std::io::Result<()> {
        let mut state = self.state();
        state.calls.push(GrantCall::Set(path.to_path_buf(), kind));
        if state.fail_set.contains(path) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "injected set failure",
            ));
        }
        state.installed.insert(path.to_path_buf(), kind);
        Ok(())
    }

    fn revoke_grant(&self, path: &Path) -> std::io::Result<()> {
        let mut state = self.state();
        state.calls.push(GrantCall::Revoke(path.to_path_buf()));
        if state.fail_revoke.contains(path) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "injected revoke failure",
            ));
        }
        state.installed.remove(path);
        Ok(())
    }
}
