//! Interfaces to the services admission depends on but does not own.

use std::path::PathBuf;

use thiserror::Error;

/// Who is submitting a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerIdentity {
    pub bundle: String,
    /// The caller's private cache directory; the base of relative references.
    pub cache_dir: PathBuf,
    pub persistent_dir: PathBuf,
}

#[derive(Debug, Error)]
#[error("Failed to resolve the caller's identity: {reason}")]
pub struct IdentityError {
    pub reason: String,
}

impl IdentityError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

pub trait IdentityProvider: Send + Sync {
    fn resolve_caller_identity(&self) -> Result<CallerIdentity, IdentityError>;
}

/// Looks up user-installed trust anchors that apply to a host.
pub trait TrustAnchorLookup: Send + Sync {
    fn trust_anchors_for(&self, host: &str) -> Vec<PathBuf>;
}

/// Decides whether clear-text `http://` is acceptable for a host.
pub trait CleartextPolicy: Send + Sync {
    fn is_cleartext_permitted(&self, host: &str) -> bool;
}

/// An identity provider that always returns the same identity.
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub CallerIdentity);

impl IdentityProvider for StaticIdentity {
    fn resolve_caller_identity(&self) -> Result<CallerIdentity, IdentityError> {
        Ok(self.0.clone())
    }
}

/// A trust-anchor lookup with no anchors.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTrustAnchors;

impl TrustAnchorLookup for NoTrustAnchors {
    fn trust_anchors_for(&self, _host: &str) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// A clear-text policy that permits every host except those listed.
#[derive(Debug, Clone, Default)]
pub struct CleartextDenyList {
    pub permitted: bool,
    pub denied_hosts: Vec<String>,
}

impl CleartextPolicy for CleartextDenyList {
    fn is_cleartext_permitted(&self, host: &str) -> bool {
        self.permitted
            && !self
                .denied_hosts
                .iter()
                .any(|denied| denied.eq_ignore_ascii_case(host))
    }
}
