use taskgate::ErrorKind;

use crate::common::{TestContext, download};

#[test]
fn failures_are_isolated_per_task() {
    let context = TestContext::new();

    let results = context.gate.admit_batch([
        (1, download("https://example.com/one.bin", "")),
        (2, download("ftp://example.com/two.bin", "")),
        (3, download("https://example.com/three.bin", "")),
    ]);

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert_eq!(
        results[1].as_ref().unwrap_err().kind(),
        ErrorKind::ParameterInvalid
    );
    assert!(results[2].is_ok());

    assert!(context.gate.config(1).is_ok());
    assert!(context.gate.config(2).is_err());
    assert!(context.gate.config(3).is_ok());
}

#[test]
fn grants_are_reinstalled_once_per_batch() {
    let context = TestContext::new();
    context
        .gate
        .admit(1, download("https://example.com/before.bin", ""))
        .unwrap();
    let before = context.cache.join("before.bin");

    // The grant service lost its state.
    context.grants.wipe();
    assert_eq!(context.grants.installed(&before), None);

    context.gate.admit_batch([
        (2, download("https://example.com/a.bin", "")),
        (3, download("https://example.com/b.bin", "")),
    ]);

    assert!(context.grants.installed(&before).is_some());
    // Installed on admission, then reinstalled exactly once.
    assert_eq!(context.grants.set_count(&before), 2);
    assert_eq!(context.grants.set_count(&context.cache.join("a.bin")), 2);
}

#[test]
fn duplicate_ids_within_a_batch() {
    let context = TestContext::new();
    let results = context.gate.admit_batch([
        (1, download("https://example.com/one.bin", "")),
        (1, download("https://example.com/two.bin", "")),
    ]);
    assert!(results[0].is_ok());
    assert_eq!(
        results[1].as_ref().unwrap_err().kind(),
        ErrorKind::ParameterInvalid
    );
}
