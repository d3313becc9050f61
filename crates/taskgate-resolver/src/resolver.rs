use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use taskgate_acl::{AclGrantRegistry, GrantError, LeafKind};
use taskgate_config::{Action, CallerIdentity, Config, FileSpec};
use taskgate_fs::{
    CURRENT_DIR_PREFIX, OverwritePolicy, PathContext, PathError, TaskFile, copy_atomic_sync,
    create_dir_all_tracked, split_last_segment, standardize,
};
use taskgate_redacted::Shielded;

use crate::content_type::content_type_for;
use crate::guard::{Holdings, ResolutionGuard};

/// Prefix of synthesized upload body file names.
const BODY_FILE_PREFIX: &str = "tmp_";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Grant(#[from] GrantError),
    #[error("Download destination `{}` already exists", .0.shielded())]
    AlreadyExists(PathBuf),
    #[error("User file `{}` can only be uploaded by a foreground task", Path::new(.0).shielded())]
    ForegroundOnly(String),
    #[error("Failed to access `{}`", .path.shielded())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("`{}` is not a regular file", .0.shielded())]
    NotAFile(PathBuf),
    #[error("`{}` does not name a file", .0.shielded())]
    MissingFileName(PathBuf),
    #[error("The download destination `{}` names a directory", Path::new(.0).shielded())]
    DirectoryDestination(String),
}

impl ResolveError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Whether this is the first time a task is resolved, or a restart of an earlier attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Fresh,
    /// The destination may hold a partial transfer and is never truncated.
    Resumed,
}

/// Opens files owned by external content providers.
pub trait ExternalFileProvider: Send + Sync {
    fn open_external(
        &self,
        uri: &str,
        caller: &CallerIdentity,
    ) -> std::io::Result<std::fs::File>;
}

/// An [`ExternalFileProvider`] that refuses every reference.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExternalFiles;

impl ExternalFileProvider for NoExternalFiles {
    fn open_external(
        &self,
        uri: &str,
        _caller: &CallerIdentity,
    ) -> std::io::Result<std::fs::File> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("no provider is available for `{}`", Path::new(uri).shielded()),
        ))
    }
}

/// A task whose file references all resolved.
#[derive(Debug)]
pub struct ResolvedTask {
    pub config: Config,
    pub holdings: Holdings,
}

/// Turns a validated [`Config`] into one whose every file endpoint is an open descriptor on a
/// granted sandbox path.
pub struct SandboxedFileResolver {
    registry: Arc<AclGrantRegistry>,
    external: Arc<dyn ExternalFileProvider>,
    cert_staging_dir: PathBuf,
}

impl SandboxedFileResolver {
    pub fn new(
        registry: Arc<AclGrantRegistry>,
        external: Arc<dyn ExternalFileProvider>,
        cert_staging_dir: PathBuf,
    ) -> Self {
        Self {
            registry,
            external,
            cert_staging_dir,
        }
    }

    pub fn registry(&self) -> &Arc<AclGrantRegistry> {
        &self.registry
    }

    /// Resolve every file endpoint of `config`.
    ///
    /// Either every endpoint resolves, or the task is left holding nothing: grants taken, body
    /// files created and directories made during this call are all given back before the error is
    /// returned.
    pub fn resolve(
        &self,
        mut config: Config,
        attempt: Attempt,
    ) -> Result<ResolvedTask, ResolveError> {
        let mut guard = ResolutionGuard::new(&self.registry);

        match config.action {
            Action::Download => {
                let destination = self.resolve_destination(&config, attempt, &mut guard)?;
                config.files = vec![destination];
            }
            Action::Upload => {
                let files = std::mem::take(&mut config.files);
                config.files = files
                    .into_iter()
                    .map(|file| self.resolve_source(file, &config, &mut guard))
                    .collect::<Result<_, _>>()?;
                config.body_files = self.create_body_files(&config, &mut guard)?;
            }
        }

        config.certs_path = self.stage_certs(&config.certs_path, &mut guard)?;

        let holdings = guard.commit();
        debug!(
            "Resolved {} task for `{}`: {} grant(s), {} body file(s)",
            config.action,
            config.caller.bundle,
            holdings.grants.len(),
            holdings.body_files.len()
        );
        Ok(ResolvedTask { config, holdings })
    }

    fn standardize(&self, raw: &str, config: &Config) -> Result<PathBuf, PathError> {
        let context = PathContext {
            bundle: &config.caller.bundle,
            cache_dir: &config.caller.cache_dir,
        };
        standardize(raw, self.registry.roots(), context, config.policy)
    }

    fn grant(&self, path: &Path, guard: &mut ResolutionGuard<'_>) -> Result<(), ResolveError> {
        self.registry.add_path(path, LeafKind::File)?;
        guard.granted(path.to_path_buf());
        Ok(())
    }

    fn resolve_destination(
        &self,
        config: &Config,
        attempt: Attempt,
        guard: &mut ResolutionGuard<'_>,
    ) -> Result<FileSpec, ResolveError> {
        if config.saveas.ends_with('/') {
            return Err(ResolveError::DirectoryDestination(config.saveas.clone()));
        }
        let path = self.standardize(&config.saveas, config)?;
        if path.is_dir() {
            return Err(ResolveError::NotAFile(path));
        }
        let Some(parent) = path.parent() else {
            return Err(ResolveError::MissingFileName(path.clone()));
        };

        let created =
            create_dir_all_tracked(parent).map_err(|err| ResolveError::io(parent, err))?;
        guard.created_dirs(created);

        let overwrite = match attempt {
            Attempt::Fresh if config.overwrite => OverwritePolicy::Truncate,
            Attempt::Fresh => OverwritePolicy::Refuse,
            Attempt::Resumed => OverwritePolicy::Keep,
        };
        let existed = path.symlink_metadata().is_ok();
        let file = match TaskFile::create_destination(&path, overwrite) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(ResolveError::AlreadyExists(path));
            }
            Err(err) => return Err(ResolveError::io(path, err)),
        };
        if !existed {
            guard.created_file(path.clone());
        }
        trace!(
            "Opened download destination `{}` ({overwrite:?})",
            path.shielded()
        );

        self.grant(&path, guard)?;

        let uri = path.to_string_lossy().into_owned();
        let mut spec = FileSpec {
            uri,
            file: Some(Arc::new(file)),
            ..FileSpec::default()
        };
        backfill(&mut spec);
        spec.name.clone_from(&spec.filename);
        Ok(spec)
    }

    fn resolve_source(
        &self,
        mut file: FileSpec,
        config: &Config,
        guard: &mut ResolutionGuard<'_>,
    ) -> Result<FileSpec, ResolveError> {
        if file.is_user_file {
            if config.background {
                return Err(ResolveError::ForegroundOnly(file.uri));
            }
            let external = self
                .external
                .open_external(&file.uri, &config.caller)
                .map_err(|err| ResolveError::io(&file.uri, err))?;
            trace!(
                "Opened user file `{}` through its provider",
                Path::new(&file.uri).shielded()
            );
            file.file = Some(Arc::new(TaskFile::from_external(external, &file.uri)));
            backfill(&mut file);
            return Ok(file);
        }

        let path = self.standardize(&file.uri, config)?;
        let metadata =
            fs_err::symlink_metadata(&path).map_err(|err| ResolveError::io(&path, err))?;
        if !metadata.is_file() {
            return Err(ResolveError::NotAFile(path));
        }
        let source = TaskFile::open_read(&path).map_err(|err| ResolveError::io(&path, err))?;

        self.grant(&path, guard)?;

        file.uri = path.to_string_lossy().into_owned();
        file.file = Some(Arc::new(source));
        backfill(&mut file);
        Ok(file)
    }

    /// Create the temporary request bodies: one shared body for multipart uploads, otherwise one
    /// per source file.
    fn create_body_files(
        &self,
        config: &Config,
        guard: &mut ResolutionGuard<'_>,
    ) -> Result<Vec<FileSpec>, ResolveError> {
        let count = if config.multipart {
            1
        } else {
            config.files.len()
        };

        (0..count)
            .map(|_| -> Result<FileSpec, ResolveError> {
                let name = format!("{BODY_FILE_PREFIX}{}", nanoid::nanoid!());
                // Synthesized, but still confined like any caller-supplied reference.
                let path = self.standardize(&format!("{CURRENT_DIR_PREFIX}{name}"), config)?;
                let body =
                    TaskFile::create_new(&path).map_err(|err| ResolveError::io(&path, err))?;
                guard.body_file(path.clone());

                self.grant(&path, guard)?;

                Ok(FileSpec {
                    name: name.clone(),
                    uri: path.to_string_lossy().into_owned(),
                    filename: name,
                    file: Some(Arc::new(body)),
                    ..FileSpec::default()
                })
            })
            .collect()
    }

    /// Copy each trust anchor into the shared staging directory and grant it.
    ///
    /// Returns the staging directory alone, or nothing if the task has no trust anchors.
    fn stage_certs(
        &self,
        anchors: &[PathBuf],
        guard: &mut ResolutionGuard<'_>,
    ) -> Result<Vec<PathBuf>, ResolveError> {
        if anchors.is_empty() {
            return Ok(Vec::new());
        }

        fs_err::create_dir_all(&self.cert_staging_dir)
            .map_err(|err| ResolveError::io(&self.cert_staging_dir, err))?;

        for anchor in anchors {
            let Some(name) = anchor.file_name() else {
                return Err(ResolveError::MissingFileName(anchor.clone()));
            };
            let staged = self.cert_staging_dir.join(name);

            let replaced = if same_contents(anchor, &staged)? {
                false
            } else {
                copy_atomic_sync(anchor, &staged)
                    .map_err(|err| ResolveError::io(&staged, err))?;
                true
            };

            self.grant(&staged, guard)?;

            // The copy is renamed into place, so other holders' grant went away with the old file.
            if replaced && self.registry.refcount(&staged) > 1 {
                self.registry.reinstall(&staged)?;
            }
        }

        Ok(vec![self.cert_staging_dir.clone()])
    }
}

/// Whether `staged` exists with the same bytes as `anchor`.
fn same_contents(anchor: &Path, staged: &Path) -> Result<bool, ResolveError> {
    // A link planted at the staged name is replaced, never read through.
    match fs_err::symlink_metadata(staged) {
        Ok(metadata) if metadata.file_type().is_symlink() => return Ok(false),
        _ => {}
    }
    let existing = match fs_err::read(staged) {
        Ok(existing) => existing,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(ResolveError::io(staged, err)),
    };
    let wanted = fs_err::read(anchor).map_err(|err| ResolveError::io(anchor, err))?;
    Ok(existing == wanted)
}

/// Fill in the filename and content type from the resolved URI, unless already given.
fn backfill(spec: &mut FileSpec) {
    if spec.filename.is_empty() {
        if let Some((_, name)) = split_last_segment(&spec.uri, '/') {
            spec.filename = name.to_string();
        }
    }
    if !spec.has_explicit_content_type {
        if let Some(content_type) = content_type_for(&spec.filename) {
            spec.content_type = content_type.to_string();
        }
    }
}
