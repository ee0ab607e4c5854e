//! Main test module for gitrip
//!
//! This module includes all test suites:
//! - Integration tests against a real HTTP fixture server
//! - Property-based tests for the index decoder
//! - Edge cases around hostile or unusual repositories

pub mod integration;
pub mod support;

#[cfg(test)]
mod edge_cases {
    use crate::support::FixtureServer;
    use ::gitrip::error::{EntryError, MaterializeError};
    use ::gitrip::*;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_empty_index() {
        let server = FixtureServer::spawn(&[]).await;
        let output = TempDir::new().unwrap();

        let scraper = ScraperBuilder::new()
            .output_dir(output.path())
            .build(&server.target())
            .unwrap();
        let summary = scraper.scrape(Arc::new(OutcomeCollector::new())).await.unwrap();

        assert_eq!(summary.total, 0);
        assert!(summary.is_complete());
        // The root is still created.
        assert!(output.path().join(server.host()).is_dir());
    }

    #[tokio::test]
    async fn test_traversal_paths_stay_inside_root() {
        let server = FixtureServer::spawn(&[
            ("../../escaped.txt", b"gotcha"),
            ("/etc/cron.d/evil", b"gotcha"),
            ("safe.txt", b"fine"),
        ])
        .await;
        let output = TempDir::new().unwrap();
        let nested = output.path().join("a/b");

        let scraper = ScraperBuilder::new()
            .output_dir(&nested)
            .build(&server.target())
            .unwrap();
        let collector = Arc::new(OutcomeCollector::new());
        let summary = scraper.scrape(collector.clone()).await.unwrap();

        assert_eq!(summary.persisted, 1);
        assert_eq!(summary.failed, 2);
        assert!(!output.path().join("escaped.txt").exists());
        assert!(!output.path().join("a/escaped.txt").exists());
        let written: Vec<_> = walkdir::WalkDir::new(output.path())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        assert_eq!(written, vec![nested.join(server.host()).join("safe.txt")]);

        let outcomes = collector.take();
        for outcome in &outcomes[..2] {
            assert!(matches!(
                outcome,
                ScrapeOutcome::Failed {
                    cause: EntryError::Materialize(MaterializeError::UnsafePath(_)),
                    ..
                }
            ));
        }
        // Refused entries are never requested.
        assert_eq!(server.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_content_shares_one_object() {
        let server = FixtureServer::spawn(&[("one.txt", b"same"), ("two/one.txt", b"same")]).await;
        let output = TempDir::new().unwrap();

        let scraper = ScraperBuilder::new()
            .output_dir(output.path())
            .build(&server.target())
            .unwrap();
        let summary = scraper.scrape(Arc::new(OutcomeCollector::new())).await.unwrap();

        assert!(summary.is_complete());
        let root = output.path().join(server.host());
        assert_eq!(fs::read_to_string(root.join("one.txt")).unwrap(), "same");
        assert_eq!(fs::read_to_string(root.join("two/one.txt")).unwrap(), "same");
    }

    #[tokio::test]
    async fn test_unicode_and_spaces_in_paths() {
        let server = FixtureServer::spawn(&[("docs/read me.md", b"x"), ("src/héllo.rs", b"y")]).await;
        let output = TempDir::new().unwrap();

        let scraper = ScraperBuilder::new()
            .output_dir(output.path())
            .build(&server.target())
            .unwrap();
        let summary = scraper.scrape(Arc::new(OutcomeCollector::new())).await.unwrap();

        assert!(summary.is_complete());
        let root = output.path().join(server.host());
        assert!(root.join("docs/read me.md").is_file());
        assert!(root.join("src/héllo.rs").is_file());
    }
}
