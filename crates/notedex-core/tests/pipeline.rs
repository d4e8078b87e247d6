use std::path::PathBuf;
use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use notedex_core::collect::CollectOptions;
use notedex_core::search;
use notedex_core::service::http::{AppState, router};
use notedex_core::source::LocalSource;
use notedex_core::state::{BuildOptions, IndexState, build_snapshot};
use notedex_core::tree::{TreeEntry, TreeOptions, build_tree};
use serde_json::Value;
use tempfile::tempdir;
use tower::ServiceExt;

fn fixture_root() -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.pop(); // notedex-core
    path.pop(); // crates
    path.join("fixtures/notes")
}

#[tokio::test]
async fn tree_skips_hidden_and_dependency_dirs() {
    let source = LocalSource::new(fixture_root());
    let tree = build_tree(&source, "", &TreeOptions::default()).await;

    let top: Vec<_> = tree.keys().map(String::as_str).collect();
    assert_eq!(top, vec!["README.md", "papers", "python", "rust"]);

    let Some(TreeEntry::Directory(rust)) = tree.get("rust") else {
        panic!("rust folder missing");
    };
    let Some(TreeEntry::Directory(nested)) = rust.get("async") else {
        panic!("rust/async folder missing");
    };
    assert_eq!(
        nested.get("tokio.md"),
        Some(&TreeEntry::File("rust/async/tokio.md".to_string()))
    );
}

#[tokio::test]
async fn fixture_pipeline_indexes_text_and_scopes_folders() {
    let source = LocalSource::new(fixture_root());
    let snapshot = build_snapshot(&source, &BuildOptions::default())
        .await
        .expect("build should succeed");

    let mut ids: Vec<_> = snapshot.documents().iter().map(|d| d.id.as_str()).collect();
    ids.sort();
    assert_eq!(
        ids,
        vec![
            "README.md",
            "python/decorators.py",
            "rust/async/tokio.md",
            "rust/ownership.md",
        ]
    );

    let results = search::search(&snapshot, "borrow", None, 50).unwrap();
    assert_eq!(results[0].id, "rust/ownership.md");
    assert!(results[0].snippet.to_lowercase().contains("borrow"));
    assert!(results.iter().all(|r| r.id != "papers/borrowck.pdf"));

    let scoped = search::search(&snapshot, "spawn", Some("rust"), 50).unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].id, "rust/async/tokio.md");
    assert_eq!(scoped[0].folder, "rust/async");

    let elsewhere = search::search(&snapshot, "spawn", Some("python"), 50).unwrap();
    assert!(elsewhere.is_empty());
}

#[tokio::test]
async fn size_and_extension_filters_apply_to_local_files() {
    let temp = tempdir().expect("failed to create tempdir");
    std::fs::write(temp.path().join("small.md"), "tiny note").unwrap();
    std::fs::write(temp.path().join("large.md"), "y".repeat(4096)).unwrap();
    std::fs::write(temp.path().join("image.png"), [0x89, 0x50, 0x4e, 0x47]).unwrap();

    let options = BuildOptions {
        tree: TreeOptions::default(),
        collect: CollectOptions {
            max_file_size: 1024,
            ..CollectOptions::default()
        },
    };
    let snapshot = build_snapshot(&LocalSource::new(temp.path()), &options)
        .await
        .unwrap();

    let ids: Vec<_> = snapshot.documents().iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["small.md"]);
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, bytes.to_vec())
}

#[tokio::test]
async fn http_surface_over_local_source() {
    let source = Arc::new(LocalSource::new(fixture_root()));
    let build = Arc::new(BuildOptions::default());
    let index = IndexState::new();
    index.publish(build_snapshot(source.as_ref(), &build).await.unwrap());
    let app = router(AppState {
        source,
        index,
        build,
        max_results: 50,
    });

    let (status, _, body) = get(app.clone(), "/folders").await;
    assert_eq!(status, StatusCode::OK);
    let folders: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(folders, serde_json::json!(["papers", "python", "rust"]));

    let (status, headers, body) = get(app.clone(), "/note/papers/borrowck.pdf").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "application/pdf");
    assert!(body.starts_with(b"%PDF"));

    let (status, headers, _) = get(app.clone(), "/note/rust/ownership.md").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "text/plain; charset=utf-8");

    let (status, _, body) = get(app.clone(), "/files/rust/ownership.md").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let error: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["error"], "Folder not found");

    let (status, _, body) = get(app.clone(), "/search?q=owner&folder=rust").await;
    assert_eq!(status, StatusCode::OK);
    let results: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(results[0]["id"], "rust/ownership.md");
    assert_eq!(results[0]["filename"], "ownership.md");

    let (status, _, body) = get(app, "/search?q=%20%20").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["error"], "Missing search query");
}
