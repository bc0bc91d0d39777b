use cache::LocalCache;
use chrono::{DateTime, Utc};
use core_model::{CaseRecord, CaseStore, iso_timestamp};
use tracing::{error, info, warn};

use crate::merge::{CaseCollection, assign_fallback_ids, upsert_by_key};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOutcome {
    /// Records taken in as new.
    pub accepted: usize,
    /// Documents the store acknowledged; 0 when the write failed.
    pub persisted: usize,
}

fn mirror_key(record: &CaseRecord) -> Option<String> {
    if !record.id.is_empty() {
        Some(record.id.clone())
    } else if record.has_message_id() {
        Some(record.message_id.clone())
    } else {
        None
    }
}

/// Writes newly found cases to the store, the in-memory collection and the
/// cache mirror. Store and cache failures are logged and do not stop the
/// remaining steps; the collection always advances.
pub fn import_cases<S>(
    collection: &mut CaseCollection,
    store: &mut S,
    cache: &LocalCache,
    mut new_cases: Vec<CaseRecord>,
    now: DateTime<Utc>,
) -> ImportOutcome
where
    S: CaseStore + ?Sized,
{
    if new_cases.is_empty() {
        return ImportOutcome::default();
    }
    assign_fallback_ids(&mut new_cases, now);
    let accepted = new_cases.len();

    let created_at = iso_timestamp(now);
    let persisted = match store.upsert_cases(&new_cases, &created_at) {
        Ok(n) => n,
        Err(err) => {
            error!(error = %format!("{err:#}"), cases = accepted, "failed to persist cases");
            0
        }
    };

    collection.merge_new(new_cases.clone());

    match cache.load_cases() {
        Ok(existing) => {
            let mirror = upsert_by_key(existing, new_cases, mirror_key);
            if let Err(err) = cache.store_cases(&mirror) {
                error!(error = %format!("{err:#}"), "failed to update case cache");
            }
        }
        Err(err) => {
            error!(error = %format!("{err:#}"), "case cache unreadable; mirror not updated");
        }
    }

    info!(accepted, persisted, total = collection.len(), "imported cases");
    ImportOutcome {
        accepted,
        persisted,
    }
}

/// Empties the collection and the cache mirror. The store keeps its copy.
pub fn clear_all(collection: &mut CaseCollection, cache: &LocalCache) -> usize {
    let cleared = collection.clear();
    if let Err(err) = cache.clear_cases() {
        warn!(error = %format!("{err:#}"), "failed to clear case cache");
    }
    info!(cleared, "cleared cases");
    cleared
}
