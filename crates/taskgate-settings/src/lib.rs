use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use taskgate_fs::ValidationPolicy;
use taskgate_redacted::Shielded;
use taskgate_static::EnvVars;

use crate::validation::{Context, Validator};
pub use crate::validation::ValidationError;

mod validation;

/// The settings file read when `TASKGATE_CONFIG_FILE` is unset.
pub const DEFAULT_SETTINGS_FILE: &str = "/etc/taskgate/taskgate.toml";

/// Service-wide settings, read from `taskgate.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Settings {
    /// The directories under which task files may live.
    ///
    /// The roots themselves are provisioned out of band and are never granted to the executor.
    pub sandbox_roots: Vec<PathBuf>,
    /// Where trust anchors are copied for the executor to read.
    pub cert_staging_dir: PathBuf,
    /// The uid of the transfer executor.
    pub grantee_uid: u32,
    pub policy: ValidationPolicy,
    /// Whether clear-text `http://` task URLs are accepted at all.
    pub cleartext_permitted: bool,
    /// Hosts for which clear-text HTTP is refused even when otherwise permitted.
    pub cleartext_denied_hosts: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sandbox_roots: vec![
                PathBuf::from("/data/storage/el1/base"),
                PathBuf::from("/data/storage/el2/base"),
                PathBuf::from("/data/storage/el5/base"),
            ],
            cert_staging_dir: PathBuf::from("/data/storage/el2/base/cache/.certs"),
            grantee_uid: 1097,
            policy: ValidationPolicy::Current,
            cleartext_permitted: true,
            cleartext_denied_hosts: Vec::new(),
        }
    }
}

impl Settings {
    /// Load the settings from `TASKGATE_CONFIG_FILE`, falling back to [`DEFAULT_SETTINGS_FILE`],
    /// then apply environment overrides.
    ///
    /// A missing settings file yields the defaults.
    pub fn discover() -> Result<Self, Error> {
        let path = std::env::var_os(EnvVars::TASKGATE_CONFIG_FILE)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));

        let settings = match Self::from_file(&path) {
            Ok(settings) => settings,
            Err(Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings file at `{}`, using defaults", path.shielded());
                Self::default()
            }
            Err(err) => return Err(err),
        };

        let settings = settings.with_env_overrides()?;
        settings.validate(&Context { path: &path })?;
        Ok(settings)
    }

    /// Read and validate a `taskgate.toml` file, without environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        debug!("Reading settings from: `{}`", path.shielded());

        let content = fs_err::read_to_string(path)?;
        Self::from_toml(path, &content)
    }

    fn from_toml(path: &Path, content: &str) -> Result<Self, Error> {
        let settings = toml::from_str::<Self>(content)
            .map_err(|err| Error::TaskgateToml(path.to_path_buf(), Box::new(err)))?;
        settings.validate(&Context { path })?;
        Ok(settings)
    }

    /// Apply `TASKGATE_POLICY` and `TASKGATE_GRANTEE_UID`.
    pub fn with_env_overrides(mut self) -> Result<Self, Error> {
        if let Some(value) = read_env(EnvVars::TASKGATE_POLICY) {
            self.policy = value
                .parse()
                .map_err(|err| Error::InvalidEnvironmentVariable {
                    name: EnvVars::TASKGATE_POLICY.to_string(),
                    value: value.clone(),
                    err,
                })?;
        }
        if let Some(value) = read_env(EnvVars::TASKGATE_GRANTEE_UID) {
            self.grantee_uid = value.trim().parse().map_err(|err: std::num::ParseIntError| {
                Error::InvalidEnvironmentVariable {
                    name: EnvVars::TASKGATE_GRANTEE_UID.to_string(),
                    value: value.clone(),
                    err: err.to_string(),
                }
            })?;
        }
        Ok(self)
    }
}

fn read_env(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to parse: `{}`", _0.shielded())]
    TaskgateToml(PathBuf, #[source] Box<toml::de::Error>),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Failed to parse environment variable `{name}` with invalid value `{value}`: {err}")]
    InvalidEnvironmentVariable {
        name: String,
        value: String,
        err: String,
    },
}
