//! Structural comparison of two folder roots.
//!
//! Walks both trees without following symlinks and reports every path whose
//! kind, content or link target differs. The retention area and staging
//! leftovers are ignored.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

const IGNORED_DIR: &str = ".stversions";
const TEMP_SUFFIX: &str = ".sync-tmp";

#[derive(Debug, PartialEq, Eq)]
enum Node {
    File(Vec<u8>),
    Dir,
    Link(String),
}

fn collect(root: &Path, rel: &str, out: &mut BTreeMap<String, Node>) {
    let dir = if rel.is_empty() {
        root.to_path_buf()
    } else {
        root.join(rel)
    };
    let Ok(entries) = fs::read_dir(&dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if rel.is_empty() && name == IGNORED_DIR {
            continue;
        }
        if name.starts_with('.') && name.ends_with(TEMP_SUFFIX) {
            continue;
        }
        let child = if rel.is_empty() {
            name
        } else {
            format!("{rel}/{name}")
        };
        let Ok(meta) = fs::symlink_metadata(entry.path()) else {
            continue;
        };
        let file_type = meta.file_type();
        if file_type.is_symlink() {
            let target = fs::read_link(entry.path())
                .map(|t| t.to_string_lossy().into_owned())
                .unwrap_or_default();
            out.insert(child, Node::Link(target));
        } else if file_type.is_dir() {
            out.insert(child.clone(), Node::Dir);
            collect(root, &child, out);
        } else {
            out.insert(child, Node::File(fs::read(entry.path()).unwrap_or_default()));
        }
    }
}

/// Differences between the trees at `a` and `b`, one line per path.
///
/// An empty result means the trees are identical.
pub fn compare_directories(a: &Path, b: &Path) -> Vec<String> {
    let mut left = BTreeMap::new();
    let mut right = BTreeMap::new();
    collect(a, "", &mut left);
    collect(b, "", &mut right);

    let mut diffs = Vec::new();
    for (path, node) in &left {
        match right.get(path) {
            None => diffs.push(format!("{path}: only in {}", a.display())),
            Some(other) if other != node => {
                diffs.push(format!("{path}: {} vs {}", describe(node), describe(other)))
            }
            Some(_) => {}
        }
    }
    for path in right.keys() {
        if !left.contains_key(path) {
            diffs.push(format!("{path}: only in {}", b.display()));
        }
    }
    diffs
}

fn describe(node: &Node) -> String {
    match node {
        Node::File(bytes) => format!("file ({} bytes)", bytes.len()),
        Node::Dir => "directory".to_string(),
        Node::Link(target) => format!("symlink -> {target:?}"),
    }
}

/// Assert the trees at `a` and `b` are identical.
///
/// # Panics
/// Panics listing every difference.
pub fn assert_trees_equal(a: &Path, b: &Path) {
    let diffs = compare_directories(a, b);
    assert!(
        diffs.is_empty(),
        "Trees differ:\n  {}",
        diffs.join("\n  ")
    );
}
