//! Node lifecycle across several folders.

mod common;

use std::fs;
use std::sync::Arc;

use sync_core::{ContentSource, Error, Node, NodeConfig, PeerId, TreeSource};
use sync_fs::NativeSymlinks;
use tempfile::TempDir;

fn two_folder_config(peer: PeerId, roots: [&TempDir; 2], state: &TempDir) -> String {
    format!(
        r#"
peer_id = "{peer}"

[[folders]]
id = "photos"
path = '{photos}'
index_path = '{photos_index}'
rescan_interval_secs = 3600

[[folders]]
id = "docs"
path = '{docs}'
index_path = '{docs_index}'
rescan_interval_secs = 3600
"#,
        photos = roots[0].path().display(),
        docs = roots[1].path().display(),
        photos_index = state.path().join("photos.json").display(),
        docs_index = state.path().join("docs.json").display(),
    )
}

async fn start(config: &NodeConfig, sources: [&TempDir; 2]) -> sync_core::Result<Node> {
    let photos = sources[0].path().to_path_buf();
    let docs = sources[1].path().to_path_buf();
    Node::start(
        config,
        move |folder| {
            let root = if folder.id == "photos" { photos.clone() } else { docs.clone() };
            Arc::new(TreeSource::new([root])) as Arc<dyn ContentSource>
        },
        Arc::new(NativeSymlinks),
    )
    .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_folder_converges() {
    let dirs: Vec<TempDir> = (0..4).map(|_| TempDir::new().unwrap()).collect();
    let a_roots = [&dirs[0], &dirs[1]];
    let b_roots = [&dirs[2], &dirs[3]];
    let (a_state, b_state) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    let (a_peer, b_peer) = (PeerId::from_u128(1), PeerId::from_u128(2));

    fs::write(a_roots[0].path().join("cat.jpg"), "meow").unwrap();
    fs::create_dir(a_roots[1].path().join("drafts")).unwrap();
    fs::write(a_roots[1].path().join("drafts/plan.md"), "# plan").unwrap();

    let a_config = NodeConfig::parse(&two_folder_config(a_peer, a_roots, &a_state)).unwrap();
    let b_config = NodeConfig::parse(&two_folder_config(b_peer, b_roots, &b_state)).unwrap();
    let a = start(&a_config, b_roots).await.unwrap();
    let b = start(&b_config, a_roots).await.unwrap();
    assert_eq!(a.folders().len(), 2);
    assert!(a.folder("photos").is_some());
    assert!(a.folder("music").is_none());

    let links = common::link(&a, &b);
    common::sync(&a, &b).await;

    assert_eq!(b.completion(&a_peer).await.percent, 100.0);
    assert_eq!(fs::read_to_string(b_roots[0].path().join("cat.jpg")).unwrap(), "meow");
    assert_eq!(
        fs::read_to_string(b_roots[1].path().join("drafts/plan.md")).unwrap(),
        "# plan"
    );
    common::stop([&a, &b], links).await;

    assert!(a_state.path().join("photos.json").exists());
    assert!(b_state.path().join("docs.json").exists());
}

#[tokio::test]
async fn failed_start_stops_earlier_folders() {
    let photos = TempDir::new().unwrap();
    let docs = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let mut config = NodeConfig::parse(&two_folder_config(PeerId::from_u128(1), [&photos, &docs], &state)).unwrap();
    config.folders[1].path = docs.path().join("missing");

    let result = start(&config, [&photos, &docs]).await;

    assert!(result.is_err());
    // The first folder was stopped again, which persists its index.
    assert!(state.path().join("photos.json").exists());
}

#[test]
fn duplicate_folder_ids_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("node.toml");
    fs::write(
        &path,
        r#"
[[folders]]
id = "default"
path = "/a"

[[folders]]
id = "default"
path = "/b"
"#,
    )
    .unwrap();

    assert!(matches!(NodeConfig::load(&path), Err(Error::Config { .. })));
}

#[test]
fn unknown_versioning_type_is_a_config_error() {
    let config = NodeConfig::parse(
        r#"
[[folders]]
id = "default"
path = "."

[folders.versioning]
type = "external"
"#,
    )
    .unwrap();

    let rt = tokio::runtime::Runtime::new().unwrap();
    let result = rt.block_on(Node::start(
        &config,
        |_| Arc::new(TreeSource::new(Vec::new())) as Arc<dyn ContentSource>,
        Arc::new(NativeSymlinks),
    ));

    assert!(matches!(result, Err(Error::Config { .. })));
}
