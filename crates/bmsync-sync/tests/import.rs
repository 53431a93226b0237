use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bmsync_core::{BookmarkRecord, ImportSummary};
use bmsync_podio::{AppField, AppId, MemoryStore, PodioCredentials};
use bmsync_storage::{FeedFetcher, FetchError, FetchedResponse};
use bmsync_sync::{FailureKind, ImportWriter, SyncConfig, SyncPipeline};

const APP: AppId = AppId(1001);

struct StaticFetcher {
    body: Option<Vec<u8>>,
}

#[async_trait]
impl FeedFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        match &self.body {
            Some(body) => Ok(FetchedResponse::ok(url, body.clone())),
            None => Err(FetchError::HttpStatus {
                status: 502,
                url: url.to_string(),
            }),
        }
    }
}

fn config() -> SyncConfig {
    SyncConfig {
        feed_url: "http://feeds.example.com/v2/rss/user".to_string(),
        app_id: APP,
        http_timeout_secs: 5,
        user_agent: "bmsync-test".to_string(),
        podio: PodioCredentials {
            endpoint: "podio.example.com".to_string(),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            username: "user".to_string(),
            password: "password".to_string(),
        },
    }
}

fn bookmark_fields() -> Vec<AppField> {
    vec![
        AppField::new(1, "Title"),
        AppField::new(2, "URL"),
        AppField::new(3, "Notes"),
    ]
}

fn fixture_feed() -> Vec<u8> {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..");
    std::fs::read(root.join("fixtures/delicious/sample.xml")).expect("fixture")
}

const SINGLE_ENTRY_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>bookmarks</title>
    <item>
      <title>Podio</title>
      <guid isPermaLink="false">http://feeds.example.com/v2/rss/url/abc123#user</guid>
      <link>http://podio.com/</link>
      <description>My note</description>
      <category>podio</category>
    </item>
  </channel>
</rss>"#;

fn pipeline(feed: Option<Vec<u8>>, store: &Arc<MemoryStore>) -> SyncPipeline {
    SyncPipeline::with_parts(
        config(),
        Box::new(StaticFetcher { body: feed }),
        Box::new(Arc::clone(store)),
    )
}

#[tokio::test]
async fn single_bookmark_is_created_once_then_skipped() {
    let store = Arc::new(MemoryStore::new(bookmark_fields()));
    let pipeline = pipeline(Some(SINGLE_ENTRY_FEED.as_bytes().to_vec()), &store);

    let first = pipeline.run_once().await.expect("first run");
    assert_eq!(first.bookmarks_read, 1);
    assert_eq!(first.import, ImportSummary { created: 1, skipped: 0 });
    assert_eq!(store.create_calls(), 1);

    let stored = store.items();
    let created = &stored[0];
    assert_eq!(created.app_id, APP);
    assert!(created.silent);
    assert_eq!(created.item.external_id, "abc123");
    assert_eq!(created.item.value_of(1), Some("Podio"));
    assert_eq!(created.item.value_of(2), Some("http://podio.com/"));
    assert_eq!(created.item.value_of(3), Some("My note"));
    assert_eq!(created.item.fields.len(), 3);
    assert_eq!(created.item.tags, vec!["podio".to_string()]);

    let second = pipeline.run_once().await.expect("second run");
    assert_eq!(second.import, ImportSummary { created: 0, skipped: 1 });
    assert_eq!(store.create_calls(), 1);
    assert_ne!(first.run_id, second.run_id);
}

#[tokio::test]
async fn rerunning_the_fixture_feed_creates_nothing_new() {
    let store = Arc::new(MemoryStore::new(bookmark_fields()));
    let pipeline = pipeline(Some(fixture_feed()), &store);

    let first = pipeline.run_once().await.expect("first run");
    let after_first = store.items().len();
    let second = pipeline.run_once().await.expect("second run");

    assert_eq!(first.import.created, 2);
    assert_eq!(second.import.created, 0);
    assert_eq!(second.import.skipped, 2);
    assert_eq!(store.items().len(), after_first);

    let without_notes = store
        .items()
        .into_iter()
        .find(|s| s.item.external_id == "5a1c0de2f00dfeed0000000000000001")
        .expect("second bookmark imported");
    assert_eq!(without_notes.item.value_of(3), None);
}

#[tokio::test]
async fn created_ids_do_not_depend_on_input_order() {
    let bookmarks: Vec<BookmarkRecord> = ["a", "b", "c", "d"]
        .iter()
        .map(|id| BookmarkRecord::new(*id, *id, format!("http://example.com/{id}"), vec![], None))
        .collect();
    let mut reversed = bookmarks.clone();
    reversed.reverse();

    let mut created_sets = Vec::new();
    for input in [bookmarks, reversed] {
        let store = MemoryStore::new(bookmark_fields())
            .with_existing(APP, "b")
            .with_existing(APP, "d");
        let summary = ImportWriter::new(&store, APP).write(&input).await.expect("write");
        assert_eq!(summary, ImportSummary { created: 2, skipped: 2 });

        let mut ids: Vec<String> = store
            .items()
            .into_iter()
            .filter(|s| !s.item.fields.is_empty())
            .map(|s| s.item.external_id)
            .collect();
        ids.sort();
        created_sets.push(ids);
    }

    assert_eq!(created_sets[0], vec!["a".to_string(), "c".to_string()]);
    assert_eq!(created_sets[0], created_sets[1]);
}

#[tokio::test]
async fn missing_url_field_fails_before_any_create() {
    let store = Arc::new(MemoryStore::new(vec![
        AppField::new(1, "Title"),
        AppField::new(3, "Notes"),
    ]));
    let err = pipeline(Some(SINGLE_ENTRY_FEED.as_bytes().to_vec()), &store)
        .run_once()
        .await
        .expect_err("schema should not resolve");

    assert_eq!(err.kind(), FailureKind::SchemaMapping);
    assert!(err.to_string().contains("\"URL\""));
    assert_eq!(store.create_calls(), 0);
}

#[tokio::test]
async fn malformed_entry_uri_aborts_before_touching_the_store() {
    let feed = SINGLE_ENTRY_FEED.replace("abc123#user", "abc123");
    let store = Arc::new(MemoryStore::new(bookmark_fields()));
    let err = pipeline(Some(feed.into_bytes()), &store)
        .run_once()
        .await
        .expect_err("uri without fragment should fail");

    assert_eq!(err.kind(), FailureKind::FeedParse);
    assert_eq!(store.lookup_calls(), 0);
    assert_eq!(store.create_calls(), 0);
}

#[tokio::test]
async fn unreachable_feed_is_a_fetch_failure() {
    let store = Arc::new(MemoryStore::new(bookmark_fields()));
    let err = pipeline(None, &store).run_once().await.expect_err("fetch fails");

    assert_eq!(err.kind(), FailureKind::FeedFetch);
    assert_eq!(err.kind().exit_code(), 3);
    assert_eq!(store.lookup_calls(), 0);
}

#[tokio::test]
async fn run_after_partial_failure_picks_up_the_rest() {
    let store = Arc::new(MemoryStore::new(bookmark_fields()).fail_on_create(2));
    let pipeline = pipeline(Some(fixture_feed()), &store);

    let err = pipeline.run_once().await.expect_err("second create fails");
    assert_eq!(err.kind(), FailureKind::RemoteStore);
    assert_eq!(store.items().len(), 1);

    let retry = pipeline.run_once().await.expect("re-run");
    assert_eq!(retry.import, ImportSummary { created: 1, skipped: 1 });
    assert_eq!(store.items().len(), 2);
}
