use std::fmt;
use std::path::Path;

use tracing::{debug, trace};

use taskgate_redacted::Shielded;

/// Whether an existing download destination may be replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwritePolicy {
    /// Truncate an existing file.
    Truncate,
    /// Fail with [`std::io::ErrorKind::AlreadyExists`] if the file exists.
    Refuse,
    /// Open an existing file as-is (resuming a previously started transfer).
    Keep,
}

/// An open file descriptor owned by a task, closed when the last handle is dropped.
///
/// Every file a task references (download destination, upload source, temporary body, external
/// user file) is held through a [`TaskFile`], so that early returns during resolution never leak a
/// descriptor.
pub struct TaskFile {
    file: fs_err::File,
    label: &'static str,
}

impl TaskFile {
    /// Open `path` read-only.
    pub fn open_read(path: &Path) -> std::io::Result<Self> {
        let mut options = fs_err::OpenOptions::new();
        options.read(true);
        no_follow(&mut options);
        let file = options.open(path)?;
        Ok(Self::new(file, "source"))
    }

    /// Open (or create) a download destination at `path` with mode `0o644`.
    pub fn create_destination(path: &Path, overwrite: OverwritePolicy) -> std::io::Result<Self> {
        let mut options = fs_err::OpenOptions::new();
        options.read(true).write(true);
        match overwrite {
            OverwritePolicy::Truncate => {
                options.create(true).truncate(true);
            }
            OverwritePolicy::Refuse => {
                options.create_new(true);
            }
            OverwritePolicy::Keep => {
                options.create(true);
            }
        }
        no_follow(&mut options);
        let file = options.open(path)?;
        set_mode(&file, 0o644)?;
        Ok(Self::new(file, "destination"))
    }

    /// Create a new file at `path`, failing if anything already exists there.
    pub fn create_new(path: &Path) -> std::io::Result<Self> {
        let mut options = fs_err::OpenOptions::new();
        options.read(true).write(true).create_new(true);
        no_follow(&mut options);
        let file = options.open(path)?;
        set_mode(&file, 0o644)?;
        Ok(Self::new(file, "body"))
    }

    /// Adopt a descriptor handed out by an external provider.
    pub fn from_external(file: std::fs::File, reference: &str) -> Self {
        Self::new(fs_err::File::from_parts(file, reference), "external")
    }

    fn new(file: fs_err::File, label: &'static str) -> Self {
        trace!("Opened {label} descriptor for `{}`", file.path().shielded());
        Self { file, label }
    }

    /// The path (or external reference) this descriptor was opened from.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn metadata(&self) -> std::io::Result<std::fs::Metadata> {
        self.file.metadata()
    }

    /// The raw descriptor, for handoff to the transfer executor.
    #[cfg(unix)]
    pub fn fd(&self) -> std::os::fd::RawFd {
        use std::os::fd::AsRawFd;
        self.file.file().as_raw_fd()
    }
}

/// Refuse to open a symbolic link in the final component.
#[cfg(unix)]
fn no_follow(options: &mut fs_err::OpenOptions) {
    use fs_err::os::unix::fs::OpenOptionsExt;
    #[allow(clippy::cast_possible_wrap)]
    options.custom_flags(rustix::fs::OFlags::NOFOLLOW.bits() as i32);
}

#[cfg(not(unix))]
fn no_follow(_options: &mut fs_err::OpenOptions) {}

#[cfg(unix)]
fn set_mode(file: &fs_err::File, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_file: &fs_err::File, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

impl fmt::Debug for TaskFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFile")
            .field("label", &self.label)
            .field("path", &self.file.path().shielded())
            .finish()
    }
}

impl Drop for TaskFile {
    fn drop(&mut self) {
        debug!(
            "Closed {} descriptor for `{}`",
            self.label,
            self.file.path().shielded()
        );
    }
}
