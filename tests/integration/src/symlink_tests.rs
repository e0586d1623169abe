//! Two nodes syncing a tree full of symlinks and type changes, under each
//! versioning policy.
#![cfg(unix)]

mod common;

use std::fs;
use std::os::unix::fs::symlink;

use common::{Home, link, stop, sync};
use sync_test_utils::{assert_trees_equal, generate_files};

const NO_VERSIONING: &str = r#"type = "none""#;
const SIMPLE_VERSIONING: &str = r#"type = "simple"
params = { keep = "5" }"#;
const STAGGERED_VERSIONING: &str = r#"type = "staggered""#;

fn populate(home: &Home) {
    generate_files(home.root(), 100, 20);

    // A file that becomes a link.
    fs::write(home.path("fileToReplace"), "").unwrap();

    // A directory that becomes a link.
    fs::create_dir(home.path("dirToReplace")).unwrap();
    fs::write(home.path("dirToReplace/inside"), "inside").unwrap();

    // Links to a file and to a directory.
    fs::write(home.path("file"), "").unwrap();
    symlink("file", home.path("fileLink")).unwrap();
    fs::create_dir(home.path("dir")).unwrap();
    symlink("dir", home.path("dirLink")).unwrap();

    // Dangling links, some of which change type later.
    symlink("does/not/exist", home.path("noneLink")).unwrap();
    symlink("does/not/exist", home.path("repFileLink")).unwrap();
    symlink("does/not/exist", home.path("repDirLink")).unwrap();
    symlink("does/not/exist", home.path("removeLink")).unwrap();
}

fn change(home: &Home) {
    // Remove a link.
    fs::remove_file(home.path("fileLink")).unwrap();

    // Retarget a link.
    fs::remove_file(home.path("dirLink")).unwrap();
    symlink("file", home.path("dirLink")).unwrap();

    // Link to file.
    fs::remove_file(home.path("repFileLink")).unwrap();
    fs::write(home.path("repFileLink"), "").unwrap();

    // Link to directory.
    fs::remove_file(home.path("repDirLink")).unwrap();
    fs::create_dir(home.path("repDirLink")).unwrap();

    // File to link.
    fs::remove_file(home.path("fileToReplace")).unwrap();
    symlink("somewhere/non/existent", home.path("fileToReplace")).unwrap();

    // Directory to link.
    fs::remove_dir_all(home.path("dirToReplace")).unwrap();
    symlink("somewhere/non/existent", home.path("dirToReplace")).unwrap();

    // Remove a dangling link.
    fs::remove_file(home.path("removeLink")).unwrap();
}

fn assert_link(home: &Home, rel: &str, target: &str) {
    let path = home.path(rel);
    assert!(
        fs::symlink_metadata(&path).unwrap().file_type().is_symlink(),
        "{rel} should be a symlink"
    );
    assert_eq!(fs::read_link(&path).unwrap().to_str(), Some(target), "{rel}");
}

async fn sync_symlinks(versioning: &str) {
    let _ = sync_core::logging::init();

    let s1 = Home::new(1);
    let s2 = Home::new(2);
    populate(&s1);

    let sender = s1.start(&s2, versioning).await;
    let receiver = s2.start(&s1, versioning).await;
    let links = link(&sender, &receiver);
    sync(&sender, &receiver).await;
    stop([&sender, &receiver], links).await;

    assert_trees_equal(s1.root(), s2.root());
    assert_link(&s2, "noneLink", "does/not/exist");
    assert_link(&s2, "dirLink", "dir");

    change(&s1);

    // Restart from the persisted indexes.
    let sender = s1.start(&s2, versioning).await;
    let receiver = s2.start(&s1, versioning).await;
    let links = link(&sender, &receiver);
    sync(&sender, &receiver).await;
    let folder = receiver.folder(common::FOLDER).unwrap();
    assert!(folder.failures().is_empty(), "{:?}", folder.failures());
    stop([&sender, &receiver], links).await;

    assert_trees_equal(s1.root(), s2.root());
    assert!(fs::symlink_metadata(s2.path("fileLink")).is_err());
    assert!(fs::symlink_metadata(s2.path("removeLink")).is_err());
    assert_link(&s2, "dirLink", "file");
    assert_link(&s2, "fileToReplace", "somewhere/non/existent");
    assert_link(&s2, "dirToReplace", "somewhere/non/existent");
    assert!(s2.path("repFileLink").is_file());
    assert!(s2.path("repDirLink").is_dir());
    assert!(s2.path("file").is_file());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn symlinks_without_versioning() {
    sync_symlinks(NO_VERSIONING).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn symlinks_with_simple_versioning() {
    sync_symlinks(SIMPLE_VERSIONING).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn symlinks_with_staggered_versioning() {
    sync_symlinks(STAGGERED_VERSIONING).await;
}
