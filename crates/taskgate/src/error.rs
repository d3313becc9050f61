use std::fmt;

use thiserror::Error;

use taskgate_acl::GrantError;
use taskgate_config::ValidationError;
use taskgate_fs::PathError;
use taskgate_resolver::ResolveError;

/// The caller-facing category of an admission failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A malformed, oversized or out-of-range field.
    ParameterInvalid,
    PathEscapesSandbox,
    CrossBundleReference,
    /// The download destination exists and may not be replaced.
    AlreadyExists,
    /// A user file was referenced by a background task.
    ForegroundOnly,
    FileIoFailure,
    GrantFailure,
    /// The task id is unknown to the ledger.
    NotFound,
    IdentityUnavailable,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ParameterInvalid => "parameter-invalid",
            Self::PathEscapesSandbox => "path-escapes-sandbox",
            Self::CrossBundleReference => "cross-bundle-reference",
            Self::AlreadyExists => "already-exists",
            Self::ForegroundOnly => "foreground-only",
            Self::FileIoFailure => "file-io-failure",
            Self::GrantFailure => "grant-failure",
            Self::NotFound => "not-found",
            Self::IdentityUnavailable => "identity-unavailable",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Invalid `{field}`: {0}", field = .0.field())]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("Task {0} is already admitted")]
    AlreadyAdmitted(u32),
    #[error("Task {0} is not admitted")]
    NotFound(u32),
}

impl TaskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(ValidationError::Identity(_)) => ErrorKind::IdentityUnavailable,
            Self::Validation(_) | Self::AlreadyAdmitted(_) => ErrorKind::ParameterInvalid,
            Self::Resolve(err) => resolve_kind(err),
            Self::NotFound(_) => ErrorKind::NotFound,
        }
    }
}

fn resolve_kind(err: &ResolveError) -> ErrorKind {
    match err {
        ResolveError::Path(err) => match err {
            PathError::EscapesRoot(_) | PathError::NotInSandbox(_) | PathError::Symlink(_) => {
                ErrorKind::PathEscapesSandbox
            }
            PathError::CrossBundleReference { .. } => ErrorKind::CrossBundleReference,
            PathError::Empty | PathError::Nul | PathError::UnsupportedScheme { .. } => {
                ErrorKind::ParameterInvalid
            }
        },
        ResolveError::Grant(GrantError::OutsideSandbox(_)) => ErrorKind::PathEscapesSandbox,
        ResolveError::Grant(GrantError::Install { .. } | GrantError::NotHeld(_)) => {
            ErrorKind::GrantFailure
        }
        ResolveError::AlreadyExists(_) => ErrorKind::AlreadyExists,
        ResolveError::ForegroundOnly(_) => ErrorKind::ForegroundOnly,
        ResolveError::Io { .. } => ErrorKind::FileIoFailure,
        ResolveError::NotAFile(_)
        | ResolveError::MissingFileName(_)
        | ResolveError::DirectoryDestination(_) => ErrorKind::ParameterInvalid,
    }
}
