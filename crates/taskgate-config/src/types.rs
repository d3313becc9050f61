use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use taskgate_fs::{TaskFile, ValidationPolicy};
use taskgate_redacted::DisplaySafeUrl;

use crate::CallerIdentity;

/// The direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Download,
    Upload,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Download => f.write_str("download"),
            Self::Upload => f.write_str("upload"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    #[default]
    Background,
    Foreground,
}

/// Which networks a task may transfer over.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    #[default]
    Any,
    Wifi,
    Cellular,
}

impl Network {
    /// Map the front end's numeric network code to a known value; unknown codes mean
    /// [`Network::Any`].
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Wifi,
            2 => Self::Cellular,
            _ => Self::Any,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Put,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Abort the transfer if it stays below `speed` bytes/s for `duration` seconds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MinSpeed {
    pub speed: i64,
    pub duration: i64,
}

/// Timeouts in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timeout {
    pub connection: u64,
    pub total: u64,
}

impl Timeout {
    pub const DEFAULT_CONNECTION: u64 = 60;
    /// One week.
    pub const MAX_TOTAL: u64 = 7 * 24 * 60 * 60;
}

impl Default for Timeout {
    fn default() -> Self {
        Self {
            connection: Self::DEFAULT_CONNECTION,
            total: Self::MAX_TOTAL,
        }
    }
}

/// A non-file field of a multipart upload form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FormItem {
    pub name: String,
    pub value: String,
}

/// A file endpoint as declared by the caller, before validation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RawFileSpec {
    pub name: String,
    pub uri: String,
    pub filename: String,
    /// The content type; empty when the caller did not supply one.
    pub content_type: String,
    /// Marked by the front end as owned by an external content provider.
    pub is_user_file: bool,
}

/// A task configuration as built by the front end from caller input.
///
/// Nothing here has been checked; see [`crate::TaskConfigValidator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawConfig {
    /// `None` is the "any" sentinel, which is never admissible.
    pub action: Option<Action>,
    pub url: String,
    pub mode: Mode,
    /// The numeric network code, see [`Network::from_code`].
    pub network: u8,
    pub index: u32,
    pub begins: i64,
    pub ends: i64,
    pub title: String,
    pub description: String,
    /// `None` when no token was supplied.
    pub token: Option<String>,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub saveas: String,
    pub overwrite: bool,
    pub files: Vec<RawFileSpec>,
    pub form_items: Vec<FormItem>,
    pub multipart: bool,
    pub proxy: Option<String>,
    pub connection_timeout: Option<u64>,
    pub total_timeout: Option<u64>,
    pub min_speed: MinSpeed,
    pub priority: u32,
    pub retry: bool,
    pub redirect: bool,
    pub gauge: bool,
    pub precise: bool,
    pub roaming: bool,
    pub metered: bool,
    pub extras: BTreeMap<String, String>,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            action: None,
            url: String::new(),
            mode: Mode::default(),
            network: 0,
            index: 0,
            begins: 0,
            ends: -1,
            title: String::new(),
            description: String::new(),
            token: None,
            method: String::new(),
            headers: BTreeMap::new(),
            saveas: String::new(),
            overwrite: false,
            files: Vec::new(),
            form_items: Vec::new(),
            multipart: false,
            proxy: None,
            connection_timeout: None,
            total_timeout: None,
            min_speed: MinSpeed::default(),
            priority: 0,
            retry: true,
            redirect: true,
            gauge: false,
            precise: false,
            roaming: true,
            metered: false,
            extras: BTreeMap::new(),
        }
    }
}

/// One file endpoint of a task.
#[derive(Debug, Clone, Default)]
pub struct FileSpec {
    pub name: String,
    /// Before resolution, the caller's reference. After resolution, the absolute sandbox path, or
    /// the provider reference for user files.
    pub uri: String,
    pub filename: String,
    pub content_type: String,
    /// Owned by an external content provider; never confined to the sandbox.
    pub is_user_file: bool,
    pub has_explicit_content_type: bool,
    /// The open descriptor, populated by resolution.
    pub file: Option<Arc<TaskFile>>,
}

impl FileSpec {
    /// The raw descriptor handed to the transfer executor, once resolved.
    #[cfg(unix)]
    pub fn fd(&self) -> Option<std::os::fd::RawFd> {
        self.file.as_ref().map(|file| file.fd())
    }
}

/// A validated task configuration.
///
/// Produced by [`crate::TaskConfigValidator`] and completed in place by file resolution; once
/// admitted it is never mutated.
#[derive(Debug, Clone)]
pub struct Config {
    pub caller: CallerIdentity,
    pub policy: ValidationPolicy,
    pub action: Action,
    pub url: DisplaySafeUrl,
    pub mode: Mode,
    pub background: bool,
    pub network: Network,
    pub index: u32,
    pub begins: i64,
    pub ends: i64,
    pub title: String,
    pub description: String,
    pub token: Option<String>,
    pub method: Method,
    pub headers: BTreeMap<String, String>,
    /// The download destination reference, always naming a file. Empty for uploads.
    pub saveas: String,
    pub overwrite: bool,
    /// Upload sources, or the single download destination once resolved.
    pub files: Vec<FileSpec>,
    pub form_items: Vec<FormItem>,
    pub multipart: bool,
    /// Temporary upload body files, populated by resolution.
    pub body_files: Vec<FileSpec>,
    /// Trust anchors for the URL's host. After resolution, the shared staging directory.
    pub certs_path: Vec<PathBuf>,
    pub proxy: Option<String>,
    pub timeout: Timeout,
    pub min_speed: MinSpeed,
    pub priority: u32,
    pub retry: bool,
    pub redirect: bool,
    pub gauge: bool,
    pub precise: bool,
    pub roaming: bool,
    pub metered: bool,
    pub extras: BTreeMap<String, String>,
}

impl Config {
    /// The host of the task URL.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }
}
