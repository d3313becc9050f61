use std::path::{Component, Path, PathBuf};

use taskgate_fs::sandbox_root;
use taskgate_redacted::Shielded;

use crate::Settings;

pub(crate) trait Validator<Context = (), Err = ValidationError> {
    fn validate(&self, ctx: &Context) -> Result<(), Err>;
}

pub(crate) struct Context<'p> {
    pub path: &'p Path,
}

impl<'path> Validator<Context<'path>> for Settings {
    /// Validate that a [`Settings`] struct has correct values.
    fn validate(&self, ctx: &Context<'path>) -> Result<(), ValidationError> {
        let Self {
            sandbox_roots,
            cert_staging_dir,
            ..
        } = self;

        if sandbox_roots.is_empty() {
            return Err(ValidationError::NoSandboxRoots(ctx.path.to_path_buf()));
        }
        for root in sandbox_roots {
            if !is_normalized_absolute(root) {
                return Err(ValidationError::SandboxRoot(
                    ctx.path.to_path_buf(),
                    root.clone(),
                ));
            }
        }
        if !is_normalized_absolute(cert_staging_dir)
            || sandbox_root(cert_staging_dir, sandbox_roots).is_none()
        {
            return Err(ValidationError::CertStagingDir(
                ctx.path.to_path_buf(),
                cert_staging_dir.clone(),
            ));
        }
        Ok(())
    }
}

/// Whether `path` is absolute and contains no `.` or `..` segments.
fn is_normalized_absolute(path: &Path) -> bool {
    path.is_absolute()
        && path
            .components()
            .all(|component| matches!(component, Component::RootDir | Component::Normal(_)))
}

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("Failed to parse: `{}`. At least one `sandbox-roots` entry is required.", _0.shielded())]
    NoSandboxRoots(PathBuf),
    #[error("Failed to parse: `{}`. The sandbox root `{}` must be an absolute path without `.` or `..` segments.", _0.shielded(), _1.display())]
    SandboxRoot(PathBuf, PathBuf),
    #[error("Failed to parse: `{}`. The `cert-staging-dir` `{}` must be an absolute path strictly below a sandbox root.", _0.shielded(), _1.display())]
    CertStagingDir(PathBuf, PathBuf),
}
