//! Integration tests for gitrip
//!
//! Every test runs the real `reqwest` client against a local axum server
//! exposing a fixture repository.

use crate::support::FixtureServer;
use ::gitrip::error::{EntryError, MaterializeError, RetrievalError};
use ::gitrip::*;
use axum::http::StatusCode;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use walkdir::WalkDir;

/// Every file under `root`, keyed by its path relative to `root`
fn read_tree(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e.path().strip_prefix(root).unwrap().to_path_buf();
            (relative, fs::read(e.path()).unwrap())
        })
        .collect()
}

const PROJECT: &[(&str, &[u8])] = &[
    ("main.go", b"package main\n\nfunc main() {}\n"),
    ("go.mod", b"module example.com/app\n"),
    ("internal/db/db.go", b"package db\n"),
    ("internal/db/db_test.go", b"package db\n\nimport \"testing\"\n"),
    ("web/static/app.js", b"console.log('hi');\n"),
];

fn scraper_for(server: &FixtureServer, output: &Path, config: ScrapeConfig) -> Scraper {
    ScraperBuilder::new()
        .config(config)
        .output_dir(output)
        .build(&server.target())
        .unwrap()
}

#[tokio::test]
async fn test_scrape_rebuilds_project() {
    let server = FixtureServer::spawn(PROJECT).await;
    let output = TempDir::new().unwrap();

    let summary = scraper_for(&server, output.path(), ScrapeConfig::default())
        .scrape(Arc::new(OutcomeCollector::new()))
        .await
        .unwrap();

    assert!(summary.is_complete());
    assert_eq!(summary.total, PROJECT.len());
    let expected_bytes: usize = PROJECT.iter().map(|(_, content)| content.len()).sum();
    assert_eq!(summary.bytes_written, expected_bytes as u64);

    let tree = read_tree(&output.path().join(server.host()));
    assert_eq!(tree.len(), PROJECT.len());
    for (path, content) in PROJECT {
        assert_eq!(tree[Path::new(path)], *content, "{}", path);
    }
}

#[tokio::test]
async fn test_object_layout_and_host_directory() {
    let server = FixtureServer::spawn(&[("main.go", b"package main\n")]).await;
    let output = TempDir::new().unwrap();

    scraper_for(&server, output.path(), ScrapeConfig::default())
        .scrape(Arc::new(OutcomeCollector::new()))
        .await
        .unwrap();

    let hex = server.id(0).to_hex();
    assert_eq!(
        server.requests(),
        vec![
            "/.git/index".to_string(),
            format!("/.git/objects/{}/{}", &hex[..2], &hex[2..]),
        ]
    );
    assert!(output.path().join(server.host()).join("main.go").is_file());
}

#[tokio::test]
async fn test_scraping_twice_is_idempotent() {
    let server = FixtureServer::spawn(PROJECT).await;
    let output = TempDir::new().unwrap();
    let scraper = scraper_for(&server, output.path(), ScrapeConfig::default());
    let root = output.path().join(server.host());

    let first = scraper.scrape(Arc::new(OutcomeCollector::new())).await.unwrap();
    let first_tree: BTreeMap<_, _> = read_tree(&root);

    let second = scraper.scrape(Arc::new(OutcomeCollector::new())).await.unwrap();
    let second_tree = read_tree(&root);

    assert_eq!(first.persisted, second.persisted);
    assert_eq!(first.bytes_written, second.bytes_written);
    assert_eq!(first_tree, second_tree);
}

#[tokio::test]
async fn test_missing_object_does_not_stop_the_batch() {
    let server = FixtureServer::spawn(PROJECT).await;
    server.set_status(&server.object_route(2), StatusCode::NOT_FOUND);
    let output = TempDir::new().unwrap();
    let collector = Arc::new(OutcomeCollector::new());

    let summary = scraper_for(&server, output.path(), ScrapeConfig::default())
        .scrape(collector.clone())
        .await
        .unwrap();

    assert_eq!(summary.persisted, 4);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures[0].path, "internal/db/db.go");

    let outcomes = collector.take();
    assert_eq!(outcomes.len(), 5);
    match &outcomes[2] {
        ScrapeOutcome::Failed {
            entry,
            cause: EntryError::Retrieval(RetrievalError::Status { status, url }),
            ..
        } => {
            assert_eq!(entry.path, "internal/db/db.go");
            assert_eq!(*status, StatusCode::NOT_FOUND);
            assert!(url.ends_with(&server.object_route(2)));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(!output.path().join(server.host()).join("internal/db/db.go").exists());
}

#[tokio::test]
async fn test_corrupt_object_is_skipped() {
    let server = FixtureServer::spawn(PROJECT).await;
    server.set_body(&server.object_route(0), b"<html>oops</html>".to_vec());
    let output = TempDir::new().unwrap();
    let collector = Arc::new(OutcomeCollector::new());

    let summary = scraper_for(&server, output.path(), ScrapeConfig::default())
        .scrape(collector.clone())
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert!(matches!(
        &collector.take()[0],
        ScrapeOutcome::Failed {
            cause: EntryError::Materialize(MaterializeError::Decompress(_)),
            ..
        }
    ));
    assert!(!output.path().join(server.host()).join("main.go").exists());
}

#[tokio::test]
async fn test_list_fetches_only_the_index() {
    let server = FixtureServer::spawn(PROJECT).await;
    let output = TempDir::new().unwrap();

    let entries = scraper_for(&server, output.path(), ScrapeConfig::default())
        .list()
        .await
        .unwrap();

    let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
    let expected: Vec<_> = PROJECT.iter().map(|(path, _)| *path).collect();
    assert_eq!(paths, expected);
    assert_eq!(entries[3].id, server.id(3));
    assert_eq!(server.requests(), vec!["/.git/index".to_string()]);
    assert_eq!(fs::read_dir(output.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_unavailable_index_is_fatal() {
    let server = FixtureServer::spawn(PROJECT).await;
    server.set_status("/.git/index", StatusCode::FORBIDDEN);
    let output = TempDir::new().unwrap();
    let collector = Arc::new(OutcomeCollector::new());

    let err = scraper_for(&server, output.path(), ScrapeConfig::default())
        .scrape(collector.clone())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ScrapeError::IndexFetch(RetrievalError::Status { status: StatusCode::FORBIDDEN, .. })
    ));
    assert!(err.user_message().contains("403"));
    assert!(collector.is_empty());
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn test_unreachable_host_is_fatal() {
    // Bind then drop to get a port with nothing listening.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let output = TempDir::new().unwrap();

    let err = ScraperBuilder::new()
        .output_dir(output.path())
        .build(&format!("http://{}/.git", addr))
        .unwrap()
        .list()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ScrapeError::IndexFetch(RetrievalError::Transport { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_limit_over_http() {
    let files: Vec<(String, Vec<u8>)> = (0..12)
        .map(|i| (format!("file{}.txt", i), format!("content {}", i).into_bytes()))
        .collect();
    let borrowed: Vec<(&str, &[u8])> = files
        .iter()
        .map(|(path, content)| (path.as_str(), content.as_slice()))
        .collect();
    let server = FixtureServer::spawn(&borrowed).await;
    server.set_delay(Duration::from_millis(30));
    let output = TempDir::new().unwrap();

    let config = ScrapeConfig {
        concurrency_limit: 3,
        ..Default::default()
    };
    let summary = scraper_for(&server, output.path(), config)
        .scrape(Arc::new(OutcomeCollector::new()))
        .await
        .unwrap();

    assert!(summary.is_complete());
    assert!(summary.peak_in_flight <= 3);
    assert!(server.peak_concurrency() <= 3);
}

#[tokio::test]
async fn test_verify_rejects_swapped_objects() {
    let server = FixtureServer::spawn(&[("a.txt", b"alpha"), ("b.txt", b"bravo")]).await;
    // Serve b's object where a's should be.
    server.set_body(&server.object_route(0), server.body(&server.object_route(1)));
    let output = TempDir::new().unwrap();

    let verifying = ScrapeConfig {
        verify_hashes: true,
        ..Default::default()
    };
    let collector = Arc::new(OutcomeCollector::new());
    let summary = scraper_for(&server, output.path(), verifying)
        .scrape(collector.clone())
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert!(matches!(
        &collector.take()[0],
        ScrapeOutcome::Failed {
            cause: EntryError::Materialize(MaterializeError::HashMismatch { .. }),
            ..
        }
    ));

    // Without verification the wrong content is written as served.
    let summary = scraper_for(&server, output.path(), ScrapeConfig::default())
        .scrape(Arc::new(OutcomeCollector::new()))
        .await
        .unwrap();
    assert!(summary.is_complete());
    assert_eq!(
        fs::read_to_string(output.path().join(server.host()).join("a.txt")).unwrap(),
        "bravo"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn test_milestones_are_logged() {
        let server = FixtureServer::spawn(PROJECT).await;
        let output = TempDir::new().unwrap();

        scraper_for(&server, output.path(), ScrapeConfig::default())
            .scrape(Arc::new(OutcomeCollector::new()))
            .await
            .unwrap();

        assert!(logs_contain("Scraping"));
        assert!(logs_contain("Found index with 5 entries"));
        assert!(logs_contain("Finished"));
    }
}
