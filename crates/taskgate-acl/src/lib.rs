//! Reference-counted access-control grants for the transfer executor.
//!
//! The executor runs as a separate principal and can only reach task files through access-control
//! entries installed on every directory along the way. Entries on shared directories (the cache
//! directory, for example) are needed by many tasks at once, while the OS primitive that installs
//! them keeps no count of its own. [`AclGrantRegistry`] supplies that count: an entry is installed
//! on disk exactly while at least one holder needs it.

use std::fmt;
use std::path::Path;

pub use crate::registry::{AclEntry, AclGrantRegistry, GrantError, ReinstallReport};

#[cfg(target_os = "linux")]
pub use crate::posix::PosixAclGrants;

mod registry;

#[cfg(target_os = "linux")]
mod posix;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// The access a grant confers on its path.
///
/// Variants are ordered by strength; see [`GrantKind::join`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GrantKind {
    /// Execute-only, allowing the grantee to traverse a directory on the way to a leaf.
    Traverse,
    /// Read and write on a leaf file.
    ReadWrite,
    /// Read, write and traverse on a leaf directory.
    ReadWriteTraverse,
}

impl GrantKind {
    /// The weakest kind that confers everything both `self` and `other` do.
    #[must_use]
    pub fn join(self, other: Self) -> Self {
        match (self, other) {
            (Self::ReadWrite, Self::Traverse) | (Self::Traverse, Self::ReadWrite) => {
                Self::ReadWriteTraverse
            }
            (lhs, rhs) => lhs.max(rhs),
        }
    }

    /// The `rwx` permission bits this kind maps to.
    pub fn permission_bits(self) -> u16 {
        match self {
            Self::Traverse => 0o1,
            Self::ReadWrite => 0o6,
            Self::ReadWriteTraverse => 0o7,
        }
    }
}

impl fmt::Display for GrantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Traverse => f.write_str("--x"),
            Self::ReadWrite => f.write_str("rw-"),
            Self::ReadWriteTraverse => f.write_str("rwx"),
        }
    }
}

/// What the final path of a grant request refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeafKind {
    File,
    Directory,
}

impl LeafKind {
    pub fn grant_kind(self) -> GrantKind {
        match self {
            Self::File => GrantKind::ReadWrite,
            Self::Directory => GrantKind::ReadWriteTraverse,
        }
    }
}

/// The OS primitive that installs and removes a single access-control entry.
///
/// Implementations need not be idempotent-safe with respect to counting: the registry guarantees
/// that [`GrantPrimitive::revoke_grant`] is only called once no holder remains. They must, however,
/// tolerate [`GrantPrimitive::set_grant`] being re-applied to a path that already carries the same
/// grant (see [`AclGrantRegistry::reinstall_all`]).
pub trait GrantPrimitive: Send + Sync {
    fn set_grant(&self, path: &Path, kind: GrantKind) -> std::io::Result<()>;

    fn revoke_grant(&self, path: &Path) -> std::io::Result<()>;
}

impl<T: GrantPrimitive + ?Sized> GrantPrimitive for std::sync::Arc<T> {
    fn set_grant(&self, path: &Path, kind: GrantKind) -> std::io::Result<()> {
        (**self).set_grant(path, kind)
    }

    fn revoke_grant(&self, path: &Path) -> std::io::Result<()> {
        (**self).revoke_grant(path)
    }
}
