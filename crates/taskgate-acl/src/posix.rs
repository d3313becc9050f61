//! A [`GrantPrimitive`] backed by POSIX access ACLs.
//!
//! The access ACL of a file lives in the `system.posix_acl_access` extended attribute, encoded as a
//! little-endian version header followed by `(tag: u16, perm: u16, id: u32)` entries sorted by tag
//! and then id. A grant is a single `ACL_USER` entry for the executor's uid.
//!
//! Symbolic links are never followed, so a link can never carry a grant to its target.

use std::path::Path;

use rustix::fs::XattrFlags;
use rustix::io::Errno;
use tracing::trace;

use taskgate_redacted::Shielded;

use crate::{GrantKind, GrantPrimitive};

const XATTR_NAME: &str = "system.posix_acl_access";
const ACL_VERSION: u32 = 2;
const ACL_UNDEFINED_ID: u32 = u32::MAX;

const ACL_USER_OBJ: u16 = 0x01;
const ACL_USER: u16 = 0x02;
const ACL_GROUP_OBJ: u16 = 0x04;
const ACL_GROUP: u16 = 0x08;
const ACL_MASK: u16 = 0x10;
const ACL_OTHER: u16 = 0x20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AclXattrEntry {
    tag: u16,
    perm: u16,
    id: u32,
}

/// Grants access to `uid` by editing POSIX access ACLs in place.
#[derive(Debug, Clone, Copy)]
pub struct PosixAclGrants {
    uid: u32,
}

impl PosixAclGrants {
    pub fn new(uid: u32) -> Self {
        Self { uid }
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    fn edit(
        &self,
        path: &Path,
        apply: impl FnOnce(&mut Vec<AclXattrEntry>),
    ) -> std::io::Result<()> {
        let mut entries = read_acl(path)?;
        apply(&mut entries);
        recompute_mask(&mut entries);
        entries.sort_by_key(|entry| (entry.tag, entry.id));
        rustix::fs::lsetxattr(path, XATTR_NAME, &encode(&entries), XattrFlags::empty())?;
        Ok(())
    }
}

impl GrantPrimitive for PosixAclGrants {
    fn set_grant(&self, path: &Path, kind: GrantKind) -> std::io::Result<()> {
        let uid = self.uid;
        self.edit(path, |entries| {
            entries.retain(|entry| !(entry.tag == ACL_USER && entry.id == uid));
            entries.push(AclXattrEntry {
                tag: ACL_USER,
                perm: kind.permission_bits(),
                id: uid,
            });
        })?;
        trace!("Set ACL_USER:{uid}:{kind} on `{}`", path.shielded());
        Ok(())
    }

    fn revoke_grant(&self, path: &Path) -> std::io::Result<()> {
        let uid = self.uid;
        self.edit(path, |entries| {
            entries.retain(|entry| !(entry.tag == ACL_USER && entry.id == uid));
        })?;
        trace!("Removed ACL_USER:{uid} from `{}`", path.shielded());
        Ok(())
    }
}

/// Read the access ACL of `path`, synthesizing the minimal ACL from the mode bits if none is set.
fn read_acl(path: &Path) -> std::io::Result<Vec<AclXattrEntry>> {
    let mut empty = [0u8; 0];
    let size = match rustix::fs::lgetxattr(path, XATTR_NAME, &mut empty[..]) {
        Ok(size) => size,
        Err(Errno::NODATA) => return minimal_acl(path),
        Err(err) => return Err(err.into()),
    };

    let mut buf = vec![0u8; size];
    let len = rustix::fs::lgetxattr(path, XATTR_NAME, &mut buf[..])?;
    decode(&buf[..len])
}

#[cfg(unix)]
fn minimal_acl(path: &Path) -> std::io::Result<Vec<AclXattrEntry>> {
    use std::os::unix::fs::PermissionsExt;

    let mode = fs_err::symlink_metadata(path)?.permissions().mode();
    let bits = |shift: u32| u16::try_from((mode >> shift) & 0o7).unwrap_or(0);
    Ok(vec![
        AclXattrEntry {
            tag: ACL_USER_OBJ,
            perm: bits(6),
            id: ACL_UNDEFINED_ID,
        },
        AclXattrEntry {
            tag: ACL_GROUP_OBJ,
            perm: bits(3),
            id: ACL_UNDEFINED_ID,
        },
        AclXattrEntry {
            tag: ACL_OTHER,
            perm: bits(0),
            id: ACL_UNDEFINED_ID,
        },
    ])
}

/// Keep `ACL_MASK` equal to the union of the group-class entries, and drop it once the ACL is
/// minimal again so the kernel can fold the ACL back into the mode bits.
fn recompute_mask(entries: &mut Vec<AclXattrEntry>) {
    entries.retain(|entry| entry.tag != ACL_MASK);
    let extended = entries
        .iter()
        .any(|entry| matches!(entry.tag, ACL_USER | ACL_GROUP));
    if !extended {
        return;
    }
    let perm = entries
        .iter()
        .filter(|entry| matches!(entry.tag, ACL_USER | ACL_GROUP | ACL_GROUP_OBJ))
        .fold(0, |acc, entry| acc | entry.perm);
    entries.push(AclXattrEntry {
        tag: ACL_MASK,
        perm,
        id: ACL_UNDEFINED_ID,
    });
}

fn decode(buf: &[u8]) -> std::io::Result<Vec<AclXattrEntry>> {
    let invalid = || std::io::Error::from(Errno::INVAL);

    let (header, body) = buf.split_first_chunk::<4>().ok_or_else(invalid)?;
    if u32::from_le_bytes(*header) != ACL_VERSION || body.len() % 8 != 0 {
        return Err(invalid());
    }

    Ok(body
        .chunks_exact(8)
        .map(|chunk| AclXattrEntry {
            tag: u16::from_le_bytes([chunk[0], chunk[1]]),
            perm: u16::from_le_bytes([chunk[2], chunk[3]]),
            id: u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]),
        })
        .collect())
}

fn encode(entries: &[AclXattrEntry]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + entries.len() * 8);
    buf.extend_from_slice(&ACL_VERSION.to_le_bytes());
    for entry in entries {
        buf.extend_from_slice(&entry.tag.to_le_bytes());
        buf.extend_from_slice(&entry.perm.to_le_bytes());
        buf.extend_from_slice(&entry.id.to_le_bytes());
    }
    buf
}
