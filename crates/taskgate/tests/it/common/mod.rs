use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use taskgate::{
    Action, CallerIdentity, Mode, NoExternalFiles, NoTrustAnchors, RawConfig, RawFileSpec,
    Settings, StaticIdentity, TaskGate,
};
use taskgate_acl::testing::RecordingGrants;

pub(crate) const BUNDLE: &str = "com.example.notes";

/// A throwaway sandbox root with a gate whose grants are recorded in memory.
pub(crate) struct TestContext {
    _dir: TempDir,
    pub(crate) root: PathBuf,
    pub(crate) cache: PathBuf,
    pub(crate) grants: RecordingGrants,
    pub(crate) gate: TaskGate,
}

impl TestContext {
    pub(crate) fn new() -> Self {
        Self::with_settings(|_| {})
    }

    /// Like [`TestContext::new`], with `configure` applied to the settings.
    pub(crate) fn with_settings(configure: impl FnOnce(&mut Settings)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("el2").join("base");
        let cache = root.join("cache");
        fs_err::create_dir_all(&cache).unwrap();

        let mut settings = Settings {
            sandbox_roots: vec![root.clone()],
            cert_staging_dir: cache.join(".certs"),
            ..Settings::default()
        };
        configure(&mut settings);

        let identity = CallerIdentity {
            bundle: BUNDLE.to_string(),
            cache_dir: cache.clone(),
            persistent_dir: root.join("files"),
        };
        let grants = RecordingGrants::new();
        let gate = TaskGate::from_settings(
            &settings,
            Arc::new(StaticIdentity(identity)),
            Arc::new(NoTrustAnchors),
            Arc::new(NoExternalFiles),
            grants.clone(),
        );
        Self {
            _dir: dir,
            root,
            cache,
            grants,
            gate,
        }
    }

    /// Write `contents` to `relative` under the cache directory.
    pub(crate) fn touch(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.cache.join(relative);
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent).unwrap();
        }
        fs_err::write(&path, contents).unwrap();
        path
    }

    /// Whether the gate holds no grants at all, and none are installed.
    pub(crate) fn holds_nothing(&self) -> bool {
        self.gate.registry().is_empty() && self.grants.installed_count() == 0
    }

    pub(crate) fn refcount(&self, path: &Path) -> u32 {
        self.gate.registry().refcount(path)
    }
}

pub(crate) fn download(url: &str, saveas: &str) -> RawConfig {
    RawConfig {
        action: Some(Action::Download),
        url: url.to_string(),
        saveas: saveas.to_string(),
        ..RawConfig::default()
    }
}

pub(crate) fn upload(uris: &[&str]) -> RawConfig {
    RawConfig {
        action: Some(Action::Upload),
        url: "https://example.com/upload".to_string(),
        mode: Mode::Foreground,
        files: uris
            .iter()
            .enumerate()
            .map(|(index, uri)| RawFileSpec {
                name: format!("file{index}"),
                uri: (*uri).to_string(),
                ..RawFileSpec::default()
            })
            .collect(),
        ..RawConfig::default()
    }
}
