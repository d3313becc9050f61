use std::fmt;
use std::str::FromStr;

/// Selects between the two admission rule sets the service supports.
///
/// Callers built against the older task API are admitted under [`ValidationPolicy::Legacy`]; all
/// others under [`ValidationPolicy::Current`]. The policy is threaded through validation, path
/// normalization and file resolution rather than being re-derived at each call site.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum ValidationPolicy {
    /// No trimming of user-supplied paths, no `file://` references, and upload sources must live in
    /// the private cache (`internal://cache/`).
    Legacy,
    /// Trims user-supplied paths and accepts every reference form.
    #[default]
    Current,
}

impl ValidationPolicy {
    /// Whether surrounding whitespace is stripped from `saveas` and file URIs.
    pub fn trims_paths(self) -> bool {
        matches!(self, Self::Current)
    }

    /// Whether `file://<bundle>/...` references are understood.
    pub fn allows_file_scheme(self) -> bool {
        matches!(self, Self::Current)
    }

    /// Whether upload sources are restricted to the private cache directory.
    pub fn requires_cache_uploads(self) -> bool {
        matches!(self, Self::Legacy)
    }
}

impl fmt::Display for ValidationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => f.write_str("legacy"),
            Self::Current => f.write_str("current"),
        }
    }
}

impl FromStr for ValidationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "legacy" => Ok(Self::Legacy),
            "current" => Ok(Self::Current),
            other => Err(format!(
                "unknown validation policy `{other}` (expected `legacy` or `current`)"
            )),
        }
    }
}
