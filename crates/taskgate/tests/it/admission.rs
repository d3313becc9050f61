use std::path::Path;

use insta::assert_snapshot;
use test_case::test_case;

use taskgate::{ErrorKind, RawConfig};
use taskgate_acl::GrantKind;

use crate::common::{TestContext, download, upload};

#[test]
fn download_is_admitted_and_queryable() {
    let context = TestContext::new();

    let config = context
        .gate
        .admit(1, download("https://example.com/a/b/report.pdf", ""))
        .unwrap();
    let destination = context.cache.join("report.pdf");
    assert_eq!(config.saveas, "./report.pdf");
    assert_eq!(Path::new(&config.files[0].uri), destination);
    assert!(destination.is_file());

    let stored = context.gate.config(1).unwrap();
    assert_eq!(stored.files[0].uri, config.files[0].uri);
    assert_eq!(
        context.grants.installed(&destination),
        Some(GrantKind::ReadWrite)
    );
    assert_eq!(context.grants.installed(&context.root), None);
}

#[test]
fn unknown_task_is_not_found() {
    let context = TestContext::new();
    let err = context.gate.config(42).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_snapshot!(err, @"Task 42 is not admitted");
}

#[test]
fn duplicate_task_id_is_refused() {
    let context = TestContext::new();
    context
        .gate
        .admit(7, download("https://example.com/one.bin", ""))
        .unwrap();

    let err = context
        .gate
        .admit(7, download("https://example.com/two.bin", ""))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ParameterInvalid);

    // The first admission is untouched, and the second took nothing.
    let stored = context.gate.config(7).unwrap();
    assert_eq!(stored.saveas, "./one.bin");
    assert!(!context.cache.join("two.bin").exists());
    assert_eq!(context.gate.registry().len(), 2);
}

#[test]
fn saveas_derivation_and_directory_refusal() {
    let context = TestContext::new();

    let config = context
        .gate
        .admit(1, download("https://example.com/a/b/report.pdf", ""))
        .unwrap();
    assert_eq!(config.files[0].filename, "report.pdf");

    let err = context
        .gate
        .admit(2, download("https://example.com/a/b/report.pdf", "x/"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ParameterInvalid);
    assert_snapshot!(err, @"Invalid `saveas`: saveas must not end with a path separator");
}

#[test_case(None, true ; "absent")]
#[test_case(Some(7), false ; "seven bytes")]
#[test_case(Some(8), true ; "eight bytes")]
#[test_case(Some(2048), true ; "2048 bytes")]
#[test_case(Some(2049), false ; "2049 bytes")]
fn token_bounds(len: Option<usize>, admitted: bool) {
    let context = TestContext::new();
    let raw = RawConfig {
        token: len.map(|len| "k".repeat(len)),
        ..download("https://example.com/a.bin", "")
    };
    match context.gate.admit(1, raw) {
        Ok(_) => assert!(admitted),
        Err(err) => {
            assert!(!admitted);
            assert_eq!(err.kind(), ErrorKind::ParameterInvalid);
        }
    }
}

#[test_case("../../etc/passwd" ; "dot dot slash")]
#[test_case("a/../../b" ; "escape after descent")]
#[test_case("/etc/passwd" ; "absolute outside")]
fn traversal_is_rejected(uri: &str) {
    let context = TestContext::new();
    let err = context.gate.admit(1, upload(&[uri])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PathEscapesSandbox);
    assert!(context.holds_nothing());
}

#[cfg(unix)]
#[test]
fn symlinked_files_are_rejected() {
    let context = TestContext::new();
    let outside = context.root.parent().unwrap().join("secret.txt");
    fs_err::write(&outside, "secret").unwrap();
    std::os::unix::fs::symlink(&outside, context.cache.join("link.txt")).unwrap();

    let err = context.gate.admit(1, upload(&["./link.txt"])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PathEscapesSandbox);
    assert!(err.to_string().ends_with("passes through a symbolic link"));

    let mut raw = download("https://example.com/a/report.pdf", "./link.txt");
    raw.overwrite = true;
    let err = context.gate.admit(2, raw).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PathEscapesSandbox);

    assert_eq!(fs_err::read_to_string(&outside).unwrap(), "secret");
    assert!(context.holds_nothing());
}

#[test]
fn collapsed_traversal_stays_inside() {
    let context = TestContext::new();
    let source = context.touch("b", "contents");
    let config = context.gate.admit(1, upload(&["a/../b"])).unwrap();
    assert_eq!(Path::new(&config.files[0].uri), source);
}

#[test]
fn cross_bundle_reference() {
    let context = TestContext::new();
    let err = context
        .gate
        .admit(1, upload(&["file://com.other.app/data/notes.txt"]))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CrossBundleReference);
    assert!(context.holds_nothing());
}

#[test]
fn existing_destination() {
    let context = TestContext::new();
    context.touch("report.pdf", "partial");

    let err = context
        .gate
        .admit(1, download("https://example.com/report.pdf", ""))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    // Resuming keeps the partial file.
    context
        .gate
        .resume(1, download("https://example.com/report.pdf", ""))
        .unwrap();
    assert_eq!(
        fs_err::read_to_string(context.cache.join("report.pdf")).unwrap(),
        "partial"
    );
}

#[test]
fn background_user_file() {
    let context = TestContext::new();
    let raw = RawConfig {
        mode: taskgate::Mode::Background,
        ..upload(&["file://media/Photo/1/IMG_0001.jpg"])
    };
    let err = context.gate.admit(1, raw).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ForegroundOnly);
}

#[test]
fn missing_source_is_an_io_failure() {
    let context = TestContext::new();
    let err = context.gate.admit(1, upload(&["./missing.txt"])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FileIoFailure);
}

#[test]
fn grant_failure_on_third_endpoint_leaves_no_grants() {
    let context = TestContext::new();
    context.touch("a.txt", "a");
    context.touch("b/b.txt", "b");
    let third = context.touch("c/c.txt", "c");

    // Another task's hold on a shared ancestor must survive the rollback.
    let other = context.touch("b/other.txt", "other");
    context
        .gate
        .registry()
        .add_path(&other, taskgate_acl::LeafKind::File)
        .unwrap();
    let before = context.refcount(&context.cache);

    context.grants.fail_set_on(third.clone());
    let err = context
        .gate
        .admit(1, upload(&["./a.txt", "./b/b.txt", "./c/c.txt"]))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::GrantFailure);

    assert_eq!(context.refcount(&context.cache), before);
    assert_eq!(context.refcount(&context.cache.join("b")), 1);
    assert_eq!(context.refcount(&context.cache.join("a.txt")), 0);
    assert_eq!(context.refcount(&context.cache.join("c")), 0);
    assert_eq!(context.gate.registry().len(), 3);
    assert!(!context.gate.ledger().contains(1));
}

#[test]
fn identity_is_required() {
    use std::sync::Arc;

    use taskgate::{
        CallerIdentity, IdentityError, IdentityProvider, NoExternalFiles, NoTrustAnchors,
        Settings, TaskGate,
    };
    use taskgate_acl::testing::RecordingGrants;

    struct Unknown;

    impl IdentityProvider for Unknown {
        fn resolve_caller_identity(&self) -> Result<CallerIdentity, IdentityError> {
            Err(IdentityError::new("caller has no bundle"))
        }
    }

    let gate = TaskGate::from_settings(
        &Settings::default(),
        Arc::new(Unknown),
        Arc::new(NoTrustAnchors),
        Arc::new(NoExternalFiles),
        RecordingGrants::new(),
    );
    let err = gate
        .admit(1, download("https://example.com/a.bin", ""))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IdentityUnavailable);
}

#[test]
fn cleartext_follows_settings() {
    let context = TestContext::new();
    context
        .gate
        .admit(1, download("http://example.com/a.bin", ""))
        .unwrap();

    let context = TestContext::with_settings(|settings| {
        settings.cleartext_denied_hosts = vec!["example.com".to_string()];
    });
    let err = context
        .gate
        .admit(1, download("http://example.com/a.bin", ""))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ParameterInvalid);
    context
        .gate
        .admit(2, download("http://other.example.com/a.bin", ""))
        .unwrap();

    let context = TestContext::with_settings(|settings| settings.cleartext_permitted = false);
    let err = context
        .gate
        .admit(1, download("http://other.example.com/a.bin", ""))
        .unwrap_err();
    assert_snapshot!(err, @"Invalid `url`: Clear-text HTTP is not permitted for `other.example.com`");
}

#[test]
fn legacy_policy_refuses_file_references() {
    let context = TestContext::with_settings(|settings| {
        settings.policy = taskgate::ValidationPolicy::Legacy;
    });
    context.touch("a.txt", "a");

    let err = context
        .gate
        .admit(1, upload(&["./a.txt"]))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ParameterInvalid);

    context
        .gate
        .admit(2, upload(&["internal://cache/a.txt"]))
        .unwrap();

    let raw = RawConfig {
        saveas: "file://com.example.notes/data/x.bin".to_string(),
        ..download("https://example.com/x.bin", "")
    };
    let err = context.gate.admit(3, raw).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ParameterInvalid);
}
