//! Admission of transfer tasks: configuration validation, sandboxed file resolution and
//! reference-counted access grants for the transfer executor.
//!
//! [`TaskGate`] is the entry point. It validates a [`RawConfig`], resolves every file it names
//! under the sandbox roots, grants the executor access to them, and records the task in a
//! [`TaskResourceLedger`] until [`TaskGate::release_task`] gives everything back.

pub use taskgate_acl::{AclGrantRegistry, GrantPrimitive, ReinstallReport};
pub use taskgate_config::{
    Action, CallerIdentity, CleartextDenyList, CleartextPolicy, Config, FileSpec, IdentityError,
    IdentityProvider, Method, Mode, Network, NoTrustAnchors, RawConfig, RawFileSpec,
    StaticIdentity, TrustAnchorLookup, ValidationPolicy,
};
pub use taskgate_logging::{LogLevel, setup_logging};
pub use taskgate_resolver::{
    Attempt, ExternalFileProvider, Holdings, NoExternalFiles, ResolvedTask,
};
pub use taskgate_settings::Settings;

pub use crate::error::{ErrorKind, TaskError};
pub use crate::gate::TaskGate;
pub use crate::ledger::TaskResourceLedger;

mod error;
mod gate;
mod ledger;
