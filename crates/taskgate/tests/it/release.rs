use std::path::PathBuf;
use std::sync::Arc;

use taskgate::Attempt;

use crate::common::{TestContext, download, upload};

#[test]
fn release_gives_back_every_grant() {
    let context = TestContext::new();
    context.touch("notes.txt", "hello");

    let config = context.gate.admit(1, upload(&["./notes.txt"])).unwrap();
    let body = PathBuf::from(&config.body_files[0].uri);
    assert!(body.is_file());
    drop(config);

    context.gate.release_task(1);

    assert!(context.holds_nothing());
    assert!(!body.exists());
    assert!(context.gate.config(1).is_err());
    assert!(context.gate.ledger().is_empty());
}

#[test]
fn release_is_idempotent() {
    let context = TestContext::new();
    context
        .gate
        .admit(1, download("https://example.com/a.bin", ""))
        .unwrap();

    context.gate.release_task(1);
    context.gate.release_task(1);
    context.gate.release_task(99);

    assert!(context.holds_nothing());
}

#[test]
fn shared_ancestors_outlive_one_task() {
    let context = TestContext::new();
    context
        .gate
        .admit(1, download("https://example.com/a.bin", "./shared/a.bin"))
        .unwrap();
    context
        .gate
        .admit(2, download("https://example.com/b.bin", "./shared/b.bin"))
        .unwrap();
    let shared = context.cache.join("shared");
    assert_eq!(context.refcount(&shared), 2);

    context.gate.release_task(1);
    assert_eq!(context.refcount(&shared), 1);
    assert!(context.grants.installed(&shared).is_some());
    assert!(
        context
            .grants
            .installed(&context.cache.join("shared/a.bin"))
            .is_none()
    );

    context.gate.release_task(2);
    assert!(context.holds_nothing());
}

#[test]
fn revoke_failure_does_not_keep_the_task() {
    let context = TestContext::new();
    context
        .gate
        .admit(1, download("https://example.com/a.bin", ""))
        .unwrap();
    context.grants.fail_revoke_on(context.cache.join("a.bin"));

    context.gate.release_task(1);

    assert!(context.gate.ledger().is_empty());
    assert!(context.gate.registry().is_empty());
    // The leaked grant is still installed, for a later audit to find.
    assert_eq!(context.grants.installed_count(), 1);
}

#[test]
fn unrecorded_resolution_is_released_by_its_holder() {
    let context = TestContext::new();
    let task = context
        .gate
        .validate_and_resolve(download("https://example.com/a.bin", ""), Attempt::Fresh)
        .unwrap();
    assert!(context.gate.ledger().is_empty());
    assert_eq!(context.gate.registry().len(), 2);

    task.holdings.release(context.gate.registry());
    assert!(context.holds_nothing());
}

#[test]
fn concurrent_admission_and_release() {
    let context = Arc::new(TestContext::new());

    let handles: Vec<_> = (0..8u32)
        .map(|thread| {
            let context = Arc::clone(&context);
            std::thread::spawn(move || {
                for round in 0..16u32 {
                    let task_id = thread * 100 + round;
                    let saveas = format!("./shared/t{thread}/r{round}.bin");
                    context
                        .gate
                        .admit(task_id, download("https://example.com/a.bin", &saveas))
                        .unwrap();
                    if round % 2 == 1 {
                        context.gate.release_task(task_id - 1);
                        context.gate.release_task(task_id);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(context.holds_nothing());
    assert!(context.gate.ledger().is_empty());
}
