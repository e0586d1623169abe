//! [`TestTree`] builder for folder test scenarios.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary folder root with helpers for building and checking trees.
///
/// # Example
///
/// ```rust,no_run
/// use sync_test_utils::TestTree;
///
/// let tree = TestTree::new();
/// tree.file("a/file", "content");
/// tree.symlink("a/fileLink", "file");
/// tree.assert_symlink("a/fileLink", "file");
/// ```
pub struct TestTree {
    temp_dir: TempDir,
}

impl Default for TestTree {
    fn default() -> Self {
        Self::new()
    }
}

impl TestTree {
    /// Create an empty temporary directory.
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().unwrap(),
        }
    }

    /// Return the root path of the temporary directory.
    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Native path of `rel` under the root.
    pub fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    /// Write a regular file, creating parents.
    pub fn file(&self, rel: &str, content: &str) -> &Self {
        let full = self.path(rel);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&full, content)
            .unwrap_or_else(|e| panic!("TestTree::file: failed to write {rel}: {e}"));
        self
    }

    /// Create a directory, creating parents.
    pub fn dir(&self, rel: &str) -> &Self {
        fs::create_dir_all(self.path(rel))
            .unwrap_or_else(|e| panic!("TestTree::dir: failed to create {rel}: {e}"));
        self
    }

    /// Create a symlink at `rel` pointing at `target`, creating parents.
    ///
    /// # Panics
    /// Panics on platforms without symlinks.
    pub fn symlink(&self, rel: &str, target: &str) -> &Self {
        let full = self.path(rel);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        make_symlink(target, &full)
            .unwrap_or_else(|e| panic!("TestTree::symlink: failed to link {rel} -> {target}: {e}"));
        self
    }

    /// Remove whatever is at `rel` without following links.
    pub fn remove(&self, rel: &str) -> &Self {
        let full = self.path(rel);
        let meta = fs::symlink_metadata(&full)
            .unwrap_or_else(|e| panic!("TestTree::remove: {rel} does not exist: {e}"));
        if meta.file_type().is_dir() {
            fs::remove_dir_all(&full).unwrap();
        } else {
            fs::remove_file(&full).unwrap();
        }
        self
    }

    /// Assert that `rel` is a regular file with `content`.
    ///
    /// # Panics
    /// Panics with a descriptive message otherwise.
    pub fn assert_file(&self, rel: &str, content: &str) {
        let full = self.path(rel);
        let meta = fs::symlink_metadata(&full)
            .unwrap_or_else(|_| panic!("Expected file to exist: {rel}"));
        assert!(meta.file_type().is_file(), "Expected a regular file at {rel}, got {meta:?}");
        assert_eq!(fs::read_to_string(&full).unwrap(), content, "Content of {rel}");
    }

    /// Assert that `rel` is a real directory.
    pub fn assert_dir(&self, rel: &str) {
        let meta = fs::symlink_metadata(self.path(rel))
            .unwrap_or_else(|_| panic!("Expected directory to exist: {rel}"));
        assert!(meta.file_type().is_dir(), "Expected a directory at {rel}");
    }

    /// Assert that `rel` is a symlink with exactly `target`.
    pub fn assert_symlink(&self, rel: &str, target: &str) {
        let full = self.path(rel);
        let meta = fs::symlink_metadata(&full)
            .unwrap_or_else(|_| panic!("Expected symlink to exist: {rel}"));
        assert!(meta.file_type().is_symlink(), "Expected a symlink at {rel}");
        assert_eq!(
            fs::read_link(&full).unwrap(),
            PathBuf::from(target),
            "Target of {rel}"
        );
    }

    /// Assert that nothing at all exists at `rel`, not even a dangling link.
    pub fn assert_missing(&self, rel: &str) {
        assert!(
            fs::symlink_metadata(self.path(rel)).is_err(),
            "Expected nothing at {rel}"
        );
    }
}

#[cfg(unix)]
fn make_symlink(target: &str, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn make_symlink(target: &str, link: &Path) -> std::io::Result<()> {
    let resolved = link.parent().map(|p| p.join(target));
    if resolved.is_some_and(|p| p.is_dir()) {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}

#[cfg(not(any(unix, windows)))]
fn make_symlink(_target: &str, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symlinks are not supported",
    ))
}

/// Fill `dir` with `count` small files of pseudo-random content.
///
/// The content is derived from `seed`, so two calls with the same arguments
/// produce identical trees.
pub fn generate_files(dir: &Path, count: usize, seed: u64) -> Vec<PathBuf> {
    fs::create_dir_all(dir).unwrap();
    let mut state = seed | 1;
    let mut next = move || {
        // xorshift64
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };

    (0..count)
        .map(|i| {
            let sub = dir.join(format!("d{}", i % 4));
            fs::create_dir_all(&sub).unwrap();
            let path = sub.join(format!("f{i:04}"));
            let len = (next() % 4096) as usize;
            let content: Vec<u8> = (0..len).map(|_| (next() & 0xff) as u8).collect();
            fs::write(&path, content).unwrap();
            path
        })
        .collect()
}
