use std::sync::Arc;

use insta::assert_snapshot;

use super::*;
use crate::testing::{GrantCall, RecordingGrants};

const ROOT: &str = "/data/storage/el2/base";

fn registry() -> (AclGrantRegistry, RecordingGrants) {
    let grants = RecordingGrants::new();
    let registry = AclGrantRegistry::new(vec![PathBuf::from(ROOT)], grants.clone());
    (registry, grants)
}

fn p(path: &str) -> PathBuf {
    PathBuf::from(path)
}

#[test]
fn add_grants_ancestor_chain() {
    let (registry, grants) = registry();
    let file = p("/data/storage/el2/base/cache/a/report.pdf");

    registry.add_path(&file, LeafKind::File).unwrap();

    assert_eq!(
        grants.calls(),
        vec![
            GrantCall::Set(p("/data/storage/el2/base/cache"), GrantKind::Traverse),
            GrantCall::Set(p("/data/storage/el2/base/cache/a"), GrantKind::Traverse),
            GrantCall::Set(file.clone(), GrantKind::ReadWrite),
        ]
    );
    assert!(registry.entry(&file).unwrap().is_leaf_file());
    assert!(
        !registry
            .entry(Path::new("/data/storage/el2/base/cache"))
            .unwrap()
            .is_leaf_file()
    );
    // The root itself is never granted.
    assert_eq!(registry.refcount(Path::new(ROOT)), 0);
}

#[test]
fn add_then_sub_k_times_installs_and_revokes_once() {
    let (registry, grants) = registry();
    let file = p("/data/storage/el2/base/cache/report.pdf");

    for _ in 0..5 {
        registry.add_path(&file, LeafKind::File).unwrap();
    }
    assert_eq!(registry.refcount(&file), 5);

    for _ in 0..5 {
        registry.sub_path(&file).unwrap();
    }

    assert!(registry.is_empty());
    assert_eq!(grants.installed_count(), 0);
    assert_eq!(grants.set_count(&file), 1);
    assert_eq!(grants.revoke_count(&file), 1);
}

#[test]
fn no_premature_revoke() {
    let (registry, grants) = registry();
    let file = p("/data/storage/el2/base/cache/report.pdf");

    registry.add_path(&file, LeafKind::File).unwrap();
    registry.add_path(&file, LeafKind::File).unwrap();
    registry.sub_path(&file).unwrap();

    assert_eq!(registry.refcount(&file), 1);
    assert_eq!(grants.installed(&file), Some(GrantKind::ReadWrite));
    assert_eq!(grants.revoke_count(&file), 0);
}

#[test]
fn shared_ancestors_outlive_siblings() {
    let (registry, grants) = registry();
    let cache = p("/data/storage/el2/base/cache");
    let first = p("/data/storage/el2/base/cache/one.txt");
    let second = p("/data/storage/el2/base/cache/two.txt");

    registry.add_path(&first, LeafKind::File).unwrap();
    registry.add_path(&second, LeafKind::File).unwrap();
    assert_eq!(registry.refcount(&cache), 2);

    registry.sub_path(&first).unwrap();
    assert_eq!(registry.refcount(&cache), 1);
    assert_eq!(grants.installed(&cache), Some(GrantKind::Traverse));
    assert_eq!(grants.installed(&first), None);

    registry.sub_path(&second).unwrap();
    assert!(registry.is_empty());
    assert_eq!(grants.installed_count(), 0);
}

#[test]
fn failed_install_rolls_back_only_this_call() {
    let (registry, grants) = registry();
    let cache = p("/data/storage/el2/base/cache");
    let held = p("/data/storage/el2/base/cache/held.txt");
    registry.add_path(&held, LeafKind::File).unwrap();

    let deep = p("/data/storage/el2/base/cache/a/b/c.txt");
    grants.fail_set_on("/data/storage/el2/base/cache/a/b");

    let err = registry.add_path(&deep, LeafKind::File).unwrap_err();
    assert_snapshot!(err, @"Failed to grant --x access on `/data/storage/el2/base/*/*/*`");

    // The unrelated holder is untouched; everything this call added is gone.
    assert_eq!(registry.refcount(&cache), 1);
    assert_eq!(registry.refcount(&held), 1);
    assert_eq!(registry.refcount(Path::new("/data/storage/el2/base/cache/a")), 0);
    assert_eq!(grants.installed(&cache), Some(GrantKind::Traverse));
    assert_eq!(
        grants.installed(Path::new("/data/storage/el2/base/cache/a")),
        None
    );
    assert_eq!(registry.len(), 2);
}

#[test]
fn leaf_upgrade_and_rollback() {
    let (registry, grants) = registry();
    let dir = p("/data/storage/el2/base/cache/dir");
    let inner = p("/data/storage/el2/base/cache/dir/file.txt");

    // `dir` first appears as an ancestor.
    registry.add_path(&inner, LeafKind::File).unwrap();
    assert_eq!(registry.entry(&dir).unwrap().kind, GrantKind::Traverse);

    // Requested as a leaf directory, it is upgraded.
    registry.add_path(&dir, LeafKind::Directory).unwrap();
    assert_eq!(
        registry.entry(&dir).unwrap(),
        AclEntry {
            kind: GrantKind::ReadWriteTraverse,
            refcount: 2,
        }
    );
    assert_eq!(grants.installed(&dir), Some(GrantKind::ReadWriteTraverse));

    // A second leaf-directory request that fails on upgrade leaves the entry as it was.
    let other = p("/data/storage/el2/base/cache/other");
    registry.add_path(&other, LeafKind::File).unwrap();
    grants.fail_set_on(other.clone());
    let err = registry.add_path(&other, LeafKind::Directory).unwrap_err();
    assert!(matches!(err, GrantError::Install { .. }));
    assert_eq!(
        registry.entry(&other).unwrap(),
        AclEntry {
            kind: GrantKind::ReadWrite,
            refcount: 1,
        }
    );
    assert_eq!(
        registry.refcount(Path::new("/data/storage/el2/base/cache")),
        3
    );
}

#[test]
fn revoke_failure_still_removes_entry() {
    let (registry, grants) = registry();
    let file = p("/data/storage/el2/base/cache/report.pdf");
    registry.add_path(&file, LeafKind::File).unwrap();

    grants.fail_revoke_on(file.clone());
    registry.sub_path(&file).unwrap();

    assert!(registry.is_empty());
    // The grant leaked on disk, to be reconciled later.
    assert_eq!(grants.installed(&file), Some(GrantKind::ReadWrite));
}

#[test]
fn sub_without_add_is_reported() {
    let (registry, _grants) = registry();
    let err = registry
        .sub_path(Path::new("/data/storage/el2/base/cache/x"))
        .unwrap_err();
    assert!(matches!(err, GrantError::NotHeld(_)));
    assert!(registry.is_empty());
}

#[test]
fn sub_of_unheld_sibling_leaves_holders_alone() {
    let (registry, grants) = registry();
    let cache = p("/data/storage/el2/base/cache");
    let held = p("/data/storage/el2/base/cache/a.txt");
    registry.add_path(&held, LeafKind::File).unwrap();

    let err = registry
        .sub_path(Path::new("/data/storage/el2/base/cache/never.txt"))
        .unwrap_err();
    assert_snapshot!(err, @"No grant is held on `/data/storage/el2/base/*/*.txt`");

    assert_eq!(registry.refcount(&cache), 1);
    assert_eq!(registry.refcount(&held), 1);
    assert_eq!(grants.installed(&cache), Some(GrantKind::Traverse));
    assert_eq!(grants.revoke_count(&cache), 0);
}

#[test]
fn outside_sandbox_is_rejected() {
    let (registry, grants) = registry();
    let err = registry
        .add_path(Path::new("/etc/passwd"), LeafKind::File)
        .unwrap_err();
    assert_snapshot!(err, @"Cannot grant access to `/etc/passwd`: not inside a sandbox root");
    assert!(grants.calls().is_empty());
}

#[test]
fn reinstall_reapplies_held_grants() {
    let (registry, grants) = registry();
    let file = p("/data/storage/el2/base/cache/report.pdf");
    let dir = p("/data/storage/el2/base/files/dir");
    registry.add_path(&file, LeafKind::File).unwrap();
    registry.add_path(&dir, LeafKind::Directory).unwrap();

    grants.wipe();
    let report = registry.reinstall_all();

    assert_eq!(report.reinstalled, 4);
    assert!(report.failed.is_empty());
    assert_eq!(grants.installed(&file), Some(GrantKind::ReadWrite));
    assert_eq!(grants.installed(&dir), Some(GrantKind::ReadWriteTraverse));
    assert_eq!(
        grants.installed(Path::new("/data/storage/el2/base/files")),
        Some(GrantKind::Traverse)
    );

    // Reinstalling does not change refcounts.
    assert_eq!(registry.refcount(&file), 1);

    grants.fail_set_on(dir.clone());
    let report = registry.reinstall_all();
    assert_eq!(report.reinstalled, 3);
    assert_eq!(report.failed, vec![dir]);
}

#[test]
fn reinstall_single_path() {
    let (registry, grants) = registry();
    let file = p("/data/storage/el2/base/cache/.certs/ca.pem");
    registry.add_path(&file, LeafKind::File).unwrap();

    grants.wipe();
    registry.reinstall(&file).unwrap();
    assert_eq!(grants.installed(&file), Some(GrantKind::ReadWrite));
    assert_eq!(grants.installed_count(), 1);

    let err = registry
        .reinstall(Path::new("/data/storage/el2/base/cache/other.pem"))
        .unwrap_err();
    assert!(matches!(err, GrantError::NotHeld(_)));
}

#[test]
fn concurrent_holders_balance() {
    let grants = RecordingGrants::new();
    let registry = Arc::new(AclGrantRegistry::new(
        vec![PathBuf::from(ROOT)],
        grants.clone(),
    ));
    let shared = p("/data/storage/el2/base/cache/shared.bin");

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let registry = Arc::clone(&registry);
            let shared = shared.clone();
            std::thread::spawn(move || {
                let own = PathBuf::from(format!("/data/storage/el2/base/cache/t{i}/body"));
                for _ in 0..50 {
                    registry.add_path(&shared, LeafKind::File).unwrap();
                    registry.add_path(&own, LeafKind::File).unwrap();
                    registry.sub_path(&own).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(registry.refcount(&shared), 400);
    for _ in 0..400 {
        registry.sub_path(&shared).unwrap();
    }
    assert!(registry.is_empty());
    assert_eq!(grants.installed_count(), 0);
}
