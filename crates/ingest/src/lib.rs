use cache::LocalCache;
use chrono::Utc;
use core_model::{CaseStore, MessageFeed};
use tracing::info;

pub mod load;
pub mod merge;
pub mod walk;
pub mod writer;

pub use load::{SnapshotSource, load_initial, read_snapshot};
pub use merge::{CaseCollection, Source, assign_fallback_ids, merge_sources};
pub use walk::{PAGE_LIMIT, WalkConfig, WalkError, WalkPhase, latest_message_id, walk_feed};
pub use writer::{ImportOutcome, clear_all, import_cases};

/// One ingestion run: walk the feed past the newest known case, then write
/// whatever was found. Holds the cache's sync lock for the duration so two
/// processes never walk at once. A failed walk commits nothing.
pub async fn sync_feed<F, S>(
    feed: &F,
    collection: &mut CaseCollection,
    store: &mut S,
    cache: &LocalCache,
    config: &WalkConfig,
    on_progress: impl Fn(WalkPhase),
) -> anyhow::Result<ImportOutcome>
where
    F: MessageFeed + Sync,
    S: CaseStore + ?Sized,
{
    let _lock = cache.acquire_sync_lock()?;
    let found = walk_feed(feed, collection.records(), config, on_progress).await?;
    if found.is_empty() {
        info!("feed has no new cases");
        return Ok(ImportOutcome::default());
    }
    Ok(import_cases(collection, store, cache, found, Utc::now()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_model::{CaseRecord, FeedMessage, FeedPage};
    use std::sync::Mutex;
    use store_sqlite::SqliteStore;

    const BODY: &str = "X ถูกจำคุก เป็นเวลา 5 นาที และถูกปรับเป็นจำนวน 500$\nชื่อ: Officer B";

    struct ScriptedFeed {
        pages: Mutex<Vec<FeedPage>>,
    }

    impl ScriptedFeed {
        fn new(mut pages: Vec<FeedPage>) -> Self {
            pages.reverse();
            Self {
                pages: Mutex::new(pages),
            }
        }
    }

    impl MessageFeed for ScriptedFeed {
        async fn fetch_page(&self, _after: Option<&str>, _limit: usize) -> anyhow::Result<FeedPage> {
            Ok(self
                .pages
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(FeedPage::Messages(Vec::new())))
        }

        fn extract_case(&self, message: &FeedMessage) -> Option<CaseRecord> {
            discord::parse_case(message)
        }
    }

    fn message(id: &str) -> FeedMessage {
        FeedMessage {
            id: id.to_string(),
            content: BODY.to_string(),
            timestamp: format!("2024-05-0{id}T08:00:00.000000+00:00"),
            embeds: Vec::new(),
        }
    }

    fn memory_store() -> SqliteStore {
        let store = SqliteStore::open(":memory:").unwrap();
        store.init_schema().unwrap();
        store
    }

    #[tokio::test(start_paused = true)]
    async fn sync_feed_imports_new_cases() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::open(dir.path()).unwrap();
        let mut store = memory_store();
        let mut collection = CaseCollection::from_records(vec![CaseRecord::new(
            "1",
            "Officer A",
            "2024-05-01T08:00:00Z",
        )]);
        let feed = ScriptedFeed::new(vec![FeedPage::Messages(vec![
            message("1"),
            message("2"),
            message("3"),
        ])]);

        let outcome = sync_feed(
            &feed,
            &mut collection,
            &mut store,
            &cache,
            &WalkConfig::default(),
            |_| {},
        )
        .await
        .unwrap();

        assert_eq!(outcome.accepted, 2);
        assert_eq!(outcome.persisted, 2);
        assert_eq!(collection.len(), 3);
        assert_eq!(store.count_cases().unwrap(), 2);
        assert!(!cache.sync_lock_held());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_walk_commits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::open(dir.path()).unwrap();
        let mut store = memory_store();
        let mut collection = CaseCollection::new();
        let feed = ScriptedFeed::new(vec![FeedPage::Unauthorized { status: 401 }]);

        let err = sync_feed(
            &feed,
            &mut collection,
            &mut store,
            &cache,
            &WalkConfig::default(),
            |_| {},
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<WalkError>(),
            Some(WalkError::Unauthorized { status: 401 })
        ));
        assert!(collection.is_empty());
        assert_eq!(store.count_cases().unwrap(), 0);
        assert!(!cache.sync_lock_held());
    }

    #[tokio::test]
    async fn concurrent_sync_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::open(dir.path()).unwrap();
        let _held = cache.acquire_sync_lock().unwrap();
        let mut store = memory_store();
        let mut collection = CaseCollection::new();
        let feed = ScriptedFeed::new(Vec::new());

        let result = sync_feed(
            &feed,
            &mut collection,
            &mut store,
            &cache,
            &WalkConfig::default(),
            |_| {},
        )
        .await;
        assert!(result.is_err());
    }
}
