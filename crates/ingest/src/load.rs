use std::fmt;
use std::path::PathBuf;

use anyhow::Context;
use cache::LocalCache;
use core_model::{CaseRecord, CaseStore, parse_case_array};
use tracing::{info, warn};

use crate::merge::CaseCollection;

/// Where the static seed file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotSource {
    Path(PathBuf),
    Url(String),
}

impl SnapshotSource {
    pub fn parse(location: &str) -> Self {
        let location = location.trim();
        if location.starts_with("http://") || location.starts_with("https://") {
            SnapshotSource::Url(location.to_string())
        } else {
            SnapshotSource::Path(PathBuf::from(location))
        }
    }
}

impl fmt::Display for SnapshotSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotSource::Path(path) => write!(f, "{}", path.display()),
            SnapshotSource::Url(url) => f.write_str(url),
        }
    }
}

pub async fn read_snapshot(source: &SnapshotSource) -> anyhow::Result<Vec<CaseRecord>> {
    let raw = match source {
        SnapshotSource::Path(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading snapshot {}", path.display()))?,
        SnapshotSource::Url(url) => reqwest::get(url)
            .await
            .and_then(reqwest::Response::error_for_status)
            .with_context(|| format!("fetching snapshot {url}"))?
            .text()
            .await
            .with_context(|| format!("reading snapshot body from {url}"))?,
    };
    let (records, _skipped) =
        parse_case_array(&raw).with_context(|| format!("parsing snapshot {source}"))?;
    Ok(records)
}

/// Builds the session's canonical collection from the store, the snapshot
/// and the cache mirror. Only a snapshot failure is an error.
pub async fn load_initial<S>(
    store: &S,
    snapshot: Option<&SnapshotSource>,
    cache: &LocalCache,
) -> anyhow::Result<CaseCollection>
where
    S: CaseStore + ?Sized,
{
    let remote = store.list_cases().unwrap_or_else(|err| {
        warn!(error = %format!("{err:#}"), "store unavailable; continuing without it");
        Vec::new()
    });
    let seed = match snapshot {
        Some(source) => read_snapshot(source).await?,
        None => Vec::new(),
    };
    let cached = cache.load_cases().unwrap_or_else(|err| {
        warn!(error = %format!("{err:#}"), "case cache unreadable; ignoring it");
        Vec::new()
    });

    let (remote_count, seed_count, cached_count) = (remote.len(), seed.len(), cached.len());
    let collection = CaseCollection::from_sources(remote, seed, cached);
    info!(
        remote = remote_count,
        snapshot = seed_count,
        cache = cached_count,
        total = collection.len(),
        "loaded cases"
    );
    Ok(collection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use store_sqlite::SqliteStore;

    struct OfflineStore;

    impl CaseStore for OfflineStore {
        fn list_cases(&self) -> anyhow::Result<Vec<CaseRecord>> {
            anyhow::bail!("offline")
        }
        fn upsert_cases(&mut self, _: &[CaseRecord], _: &str) -> anyhow::Result<usize> {
            anyhow::bail!("offline")
        }
    }

    fn write_snapshot(dir: &std::path::Path, body: &str) -> SnapshotSource {
        let path = dir.join("cases.json");
        std::fs::write(&path, body).unwrap();
        SnapshotSource::Path(path)
    }

    #[test]
    fn parses_snapshot_locations() {
        assert_eq!(
            SnapshotSource::parse("https://example.test/cases.json"),
            SnapshotSource::Url("https://example.test/cases.json".to_string())
        );
        assert_eq!(
            SnapshotSource::parse(" data/cases.json "),
            SnapshotSource::Path(PathBuf::from("data/cases.json"))
        );
    }

    #[tokio::test]
    async fn merges_store_snapshot_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::open(dir.path().join("cache")).unwrap();
        cache
            .store_cases(&[CaseRecord::new("3", "C", "2024-01-03T00:00:00Z")])
            .unwrap();
        let snapshot = write_snapshot(
            dir.path(),
            r#"[{"id":"a","officerName":"Snap","timestamp":"2024-01-01T00:00:00Z"},
                {"messageId":"2","officerName":"B","timestamp":"2024-01-02T00:00:00Z"}]"#,
        );

        let mut store = SqliteStore::open(":memory:").unwrap();
        store.init_schema().unwrap();
        let mut remote = CaseRecord::new("", "Remote", "2024-01-02T00:00:00Z");
        remote.id = "a".to_string();
        let stamp = chrono::Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        store
            .upsert_cases(&[remote], &core_model::iso_timestamp(stamp))
            .unwrap();

        let collection = load_initial(&store, Some(&snapshot), &cache).await.unwrap();
        let view: Vec<_> = collection
            .records()
            .iter()
            .map(|c| (c.id.as_str(), c.officer_name.as_str()))
            .collect();
        assert_eq!(view, vec![("3", "C"), ("a", "Remote"), ("2", "B")]);
    }

    #[tokio::test]
    async fn store_and_cache_failures_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::open(dir.path().join("cache")).unwrap();
        cache.set(cache::CASES_KEY, "garbage").unwrap();
        let snapshot = write_snapshot(
            dir.path(),
            r#"[{"messageId":"1","officerName":"A","timestamp":"2024-01-01T00:00:00Z"}, 7]"#,
        );

        let collection = load_initial(&OfflineStore, Some(&snapshot), &cache)
            .await
            .unwrap();
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.records()[0].id, "1");
    }

    #[tokio::test]
    async fn missing_snapshot_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::open(dir.path().join("cache")).unwrap();
        let missing = SnapshotSource::Path(dir.path().join("nope.json"));

        let err = load_initial(&OfflineStore, Some(&missing), &cache)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("reading snapshot"));
    }

    #[tokio::test]
    async fn snapshot_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::open(dir.path().join("cache")).unwrap();
        let collection = load_initial(&OfflineStore, None, &cache).await.unwrap();
        assert!(collection.is_empty());
    }
}
