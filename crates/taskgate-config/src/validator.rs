use std::sync::{Arc, LazyLock};

use regex::Regex;
use thiserror::Error;
use tracing::{debug, trace};
use url::Url;

use taskgate_fs::{INTERNAL_CACHE_SCHEME, ValidationPolicy, split_last_segment};
use taskgate_redacted::{DisplaySafeUrl, DisplaySafeUrlError};

use crate::{
    Action, CleartextPolicy, Config, FileSpec, IdentityError, IdentityProvider, Method, Network,
    RawConfig, RawFileSpec, Timeout, TrustAnchorLookup,
};

pub const MAX_URL_LEN: usize = 8192;
pub const MAX_TITLE_LEN: usize = 256;
pub const MAX_DESCRIPTION_LEN: usize = 1024;
pub const MIN_TOKEN_LEN: usize = 8;
pub const MAX_TOKEN_LEN: usize = 2048;
pub const MAX_PROXY_LEN: usize = 512;
pub const MAX_HEADERS: usize = 256;
pub const MAX_FORM_ITEMS: usize = 256;

/// `saveas` values that name a directory rather than a file; the filename is then derived from
/// the URL.
const BARE_DIRECTORY_MARKERS: [&str; 2] = ["./", INTERNAL_CACHE_SCHEME];

/// URI prefixes of files owned by external content providers.
const USER_FILE_PREFIXES: [&str; 2] = ["file://media/", "file://docs/"];

static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^https?://.+").unwrap());
static PROXY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^http://[^/:\s]+:\d{1,5}/?$").unwrap());

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("The task action must be `download` or `upload`")]
    MissingAction,
    #[error("The task URL is empty")]
    EmptyUrl,
    #[error("The task URL is {0} bytes long, which exceeds the limit of {max}", max = MAX_URL_LEN)]
    UrlTooLong(usize),
    #[error("The task URL must use the `http://` or `https://` scheme")]
    UnsupportedUrlScheme,
    #[error("The task URL could not be parsed: {0}")]
    InvalidUrl(#[source] DisplaySafeUrlError),
    #[error("Clear-text HTTP is not permitted for `{0}`")]
    CleartextNotPermitted(String),
    #[error("An upload must reference at least one file")]
    NoUploadFiles,
    #[error("The file index {index} is out of range for {len} file(s)")]
    IndexOutOfRange { index: u32, len: usize },
    #[error("The title is {0} bytes long, which exceeds the limit of {max}", max = MAX_TITLE_LEN)]
    TitleTooLong(usize),
    #[error(
        "The token is {0} bytes long, but must be between {min} and {max}",
        min = MIN_TOKEN_LEN,
        max = MAX_TOKEN_LEN
    )]
    TokenLength(usize),
    #[error(
        "The description is {0} bytes long, which exceeds the limit of {max}",
        max = MAX_DESCRIPTION_LEN
    )]
    DescriptionTooLong(usize),
    #[error("No file name can be derived from the URL `{0}`")]
    NoDerivableFileName(DisplaySafeUrl),
    #[error("saveas is a directory")]
    SaveasIsDirectory,
    #[error("saveas must not end with a path separator")]
    SaveasTrailingSeparator,
    #[error("The byte range {begins}..{ends} is invalid")]
    InvalidRange { begins: i64, ends: i64 },
    #[error("The proxy is {0} bytes long, which exceeds the limit of {max}", max = MAX_PROXY_LEN)]
    ProxyTooLong(usize),
    #[error("The proxy must have the form `http://<host>:<port>`")]
    InvalidProxy,
    #[error("The connection timeout must be at least one second")]
    ConnectionTimeout,
    #[error("The total timeout must be between 1 and {max} seconds", max = Timeout::MAX_TOTAL)]
    TotalTimeout,
    #[error("The minimum speed and its duration must not be negative")]
    InvalidMinSpeed,
    #[error("{0} headers exceed the limit of {max}", max = MAX_HEADERS)]
    TooManyHeaders(usize),
    #[error("A header name is empty")]
    EmptyHeaderName,
    #[error("{0} form items exceed the limit of {max}", max = MAX_FORM_ITEMS)]
    TooManyFormItems(usize),
    #[error("A form item name is empty")]
    EmptyFormItemName,
    #[error(
        "Upload sources must be referenced through `{scheme}` under the {0} validation policy",
        scheme = INTERNAL_CACHE_SCHEME
    )]
    UploadOutsideCache(ValidationPolicy),
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

impl ValidationError {
    /// The name of the offending field, for caller-facing messages.
    pub fn field(&self) -> &'static str {
        match self {
            Self::MissingAction => "action",
            Self::EmptyUrl
            | Self::UrlTooLong(_)
            | Self::UnsupportedUrlScheme
            | Self::InvalidUrl(_)
            | Self::CleartextNotPermitted(_) => "url",
            Self::NoUploadFiles | Self::UploadOutsideCache(_) => "files",
            Self::IndexOutOfRange { .. } => "index",
            Self::TitleTooLong(_) => "title",
            Self::TokenLength(_) => "token",
            Self::DescriptionTooLong(_) => "description",
            Self::NoDerivableFileName(_)
            | Self::SaveasIsDirectory
            | Self::SaveasTrailingSeparator => "saveas",
            Self::InvalidRange { .. } => "begins",
            Self::ProxyTooLong(_) | Self::InvalidProxy => "proxy",
            Self::ConnectionTimeout | Self::TotalTimeout => "timeout",
            Self::InvalidMinSpeed => "minSpeed",
            Self::TooManyHeaders(_) | Self::EmptyHeaderName => "headers",
            Self::TooManyFormItems(_) | Self::EmptyFormItemName => "data",
            Self::Identity(_) => "bundle",
        }
    }
}

/// Derive a file name from the last path segment of `url`.
///
/// Returns `None` when the URL path is empty or ends in a separator.
pub fn derive_file_name(url: &Url) -> Option<&str> {
    split_last_segment(url.path(), '/').map(|(_, name)| name)
}

/// Checks a [`RawConfig`] and completes it into a [`Config`].
///
/// Checks run in a fixed order and the first violation is returned.
pub struct TaskConfigValidator {
    identity: Arc<dyn IdentityProvider>,
    trust_anchors: Arc<dyn TrustAnchorLookup>,
    cleartext: Arc<dyn CleartextPolicy>,
    policy: ValidationPolicy,
}

impl TaskConfigValidator {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        trust_anchors: Arc<dyn TrustAnchorLookup>,
        cleartext: Arc<dyn CleartextPolicy>,
        policy: ValidationPolicy,
    ) -> Self {
        Self {
            identity,
            trust_anchors,
            cleartext,
            policy,
        }
    }

    pub fn policy(&self) -> ValidationPolicy {
        self.policy
    }

    pub fn validate(&self, raw: RawConfig) -> Result<Config, ValidationError> {
        let policy = self.policy;

        let action = raw.action.ok_or(ValidationError::MissingAction)?;
        let url = self.check_url(&raw.url)?;

        let files = match action {
            Action::Upload => upload_files(raw.files, policy)?,
            Action::Download => Vec::new(),
        };

        let index = match action {
            Action::Download => 0,
            Action::Upload => {
                if raw.index as usize >= files.len() {
                    return Err(ValidationError::IndexOutOfRange {
                        index: raw.index,
                        len: files.len(),
                    });
                }
                raw.index
            }
        };

        if raw.title.len() > MAX_TITLE_LEN {
            return Err(ValidationError::TitleTooLong(raw.title.len()));
        }
        let title = if raw.title.is_empty() {
            action.to_string()
        } else {
            raw.title
        };

        if let Some(token) = &raw.token {
            if !(MIN_TOKEN_LEN..=MAX_TOKEN_LEN).contains(&token.len()) {
                return Err(ValidationError::TokenLength(token.len()));
            }
        }

        if raw.description.len() > MAX_DESCRIPTION_LEN {
            return Err(ValidationError::DescriptionTooLong(raw.description.len()));
        }

        let saveas = match action {
            Action::Download => saveas(&raw.saveas, &url, policy)?,
            Action::Upload => String::new(),
        };

        if raw.begins < 0 || (raw.ends != -1 && raw.ends < raw.begins) {
            return Err(ValidationError::InvalidRange {
                begins: raw.begins,
                ends: raw.ends,
            });
        }

        let proxy = match raw.proxy {
            Some(proxy) if !proxy.is_empty() => {
                if proxy.len() > MAX_PROXY_LEN {
                    return Err(ValidationError::ProxyTooLong(proxy.len()));
                }
                if !PROXY_RE.is_match(&proxy) {
                    return Err(ValidationError::InvalidProxy);
                }
                Some(proxy)
            }
            _ => None,
        };

        let timeout = Timeout {
            connection: raw
                .connection_timeout
                .unwrap_or(Timeout::DEFAULT_CONNECTION),
            total: raw.total_timeout.unwrap_or(Timeout::MAX_TOTAL),
        };
        if timeout.connection < 1 {
            return Err(ValidationError::ConnectionTimeout);
        }
        if !(1..=Timeout::MAX_TOTAL).contains(&timeout.total) {
            return Err(ValidationError::TotalTimeout);
        }

        if raw.min_speed.speed < 0 || raw.min_speed.duration < 0 {
            return Err(ValidationError::InvalidMinSpeed);
        }

        if raw.headers.len() > MAX_HEADERS {
            return Err(ValidationError::TooManyHeaders(raw.headers.len()));
        }
        if raw.headers.keys().any(String::is_empty) {
            return Err(ValidationError::EmptyHeaderName);
        }

        if raw.form_items.len() > MAX_FORM_ITEMS {
            return Err(ValidationError::TooManyFormItems(raw.form_items.len()));
        }
        if raw.form_items.iter().any(|item| item.name.is_empty()) {
            return Err(ValidationError::EmptyFormItemName);
        }

        let caller = self.identity.resolve_caller_identity()?;

        let host = url.host_str().unwrap_or_default();
        let certs_path = self.trust_anchors.trust_anchors_for(host);
        let method = method(action, &raw.method);
        let background = matches!(raw.mode, crate::Mode::Background);

        debug!(
            "Validated {action} task for `{}` to `{url}` ({method}, {} file(s), {} trust anchor(s))",
            caller.bundle,
            files.len(),
            certs_path.len()
        );

        Ok(Config {
            caller,
            policy,
            action,
            url,
            mode: raw.mode,
            background,
            network: Network::from_code(raw.network),
            index,
            begins: raw.begins,
            ends: raw.ends,
            title,
            description: raw.description,
            token: raw.token,
            method,
            headers: raw.headers,
            saveas,
            overwrite: raw.overwrite,
            files,
            form_items: raw.form_items,
            multipart: raw.multipart,
            body_files: Vec::new(),
            certs_path,
            proxy,
            timeout,
            min_speed: raw.min_speed,
            priority: raw.priority,
            retry: raw.retry,
            redirect: raw.redirect,
            gauge: raw.gauge,
            precise: raw.precise,
            roaming: raw.roaming,
            metered: raw.metered,
            extras: raw.extras,
        })
    }

    fn check_url(&self, raw: &str) -> Result<DisplaySafeUrl, ValidationError> {
        if raw.is_empty() {
            return Err(ValidationError::EmptyUrl);
        }
        if raw.len() > MAX_URL_LEN {
            return Err(ValidationError::UrlTooLong(raw.len()));
        }
        if !URL_RE.is_match(raw) {
            return Err(ValidationError::UnsupportedUrlScheme);
        }
        let url = DisplaySafeUrl::parse(raw).map_err(ValidationError::InvalidUrl)?;

        if url.scheme() == "http" {
            let host = url.host_str().unwrap_or_default();
            if !self.cleartext.is_cleartext_permitted(host) {
                return Err(ValidationError::CleartextNotPermitted(host.to_string()));
            }
        }
        Ok(url)
    }
}

fn upload_files(
    raw: Vec<RawFileSpec>,
    policy: ValidationPolicy,
) -> Result<Vec<FileSpec>, ValidationError> {
    let files: Vec<FileSpec> = raw
        .into_iter()
        .map(|file| {
            let uri = if policy.trims_paths() {
                file.uri.trim().to_string()
            } else {
                file.uri
            };
            let is_user_file = file.is_user_file
                || USER_FILE_PREFIXES
                    .iter()
                    .any(|prefix| uri.starts_with(prefix));
            FileSpec {
                name: file.name,
                has_explicit_content_type: !file.content_type.is_empty(),
                content_type: file.content_type,
                filename: file.filename,
                is_user_file,
                uri,
                file: None,
            }
        })
        .collect();

    if !files.iter().any(|file| !file.uri.is_empty()) {
        return Err(ValidationError::NoUploadFiles);
    }

    if policy.requires_cache_uploads()
        && files
            .iter()
            .any(|file| !file.is_user_file && !file.uri.starts_with(INTERNAL_CACHE_SCHEME))
    {
        return Err(ValidationError::UploadOutsideCache(policy));
    }

    Ok(files)
}

fn saveas(
    raw: &str,
    url: &DisplaySafeUrl,
    policy: ValidationPolicy,
) -> Result<String, ValidationError> {
    let saveas = if policy.trims_paths() { raw.trim() } else { raw };

    if saveas.is_empty() || BARE_DIRECTORY_MARKERS.contains(&saveas) {
        let Some(name) = derive_file_name(url) else {
            return Err(ValidationError::NoDerivableFileName(url.clone()));
        };
        trace!("Derived saveas `{name}` from the task URL");
        return Ok(format!("./{name}"));
    }

    if saveas.ends_with('/') {
        return Err(match policy {
            ValidationPolicy::Legacy => ValidationError::SaveasIsDirectory,
            ValidationPolicy::Current => ValidationError::SaveasTrailingSeparator,
        });
    }

    Ok(saveas.to_string())
}

fn method(action: Action, raw: &str) -> Method {
    let explicit_post = raw.trim().eq_ignore_ascii_case("POST");
    match action {
        _ if explicit_post => Method::Post,
        Action::Upload => Method::Put,
        Action::Download => Method::Get,
    }
}
