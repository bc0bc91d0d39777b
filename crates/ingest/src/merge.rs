use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use core_model::{CaseRecord, deterministic_id};

/// Where a record came from. Declaration order is precedence: when two
/// sources carry the same id the later variant wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Source {
    Snapshot,
    Cache,
    Remote,
}

/// Sets `id` to the record's identity, or `c_<position>` when it has none.
pub fn resolve_identity(record: &mut CaseRecord, position: usize) {
    let id = record
        .identity()
        .map(str::to_owned)
        .unwrap_or_else(|| format!("c_{position}"));
    record.id = id;
}

/// Gives every record without an `id` its message id, or a stable
/// `import_` id derived from the write time and its position.
pub fn assign_fallback_ids(records: &mut [CaseRecord], now: DateTime<Utc>) {
    let millis = now.timestamp_millis().to_string();
    for (index, record) in records.iter_mut().enumerate() {
        if !record.id.is_empty() {
            continue;
        }
        record.id = if record.has_message_id() {
            record.message_id.clone()
        } else {
            let hash = deterministic_id(&["import", &millis, &index.to_string()]);
            format!("import_{}", &hash[..16])
        };
    }
}

/// Newest first by plain string comparison; empty timestamps sink to the end.
pub fn sort_newest_first(records: &mut [CaseRecord]) {
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

/// Combines the three sources into one deduplicated, sorted collection.
///
/// Positional fallback ids count through the concatenation remote, snapshot,
/// cache. Within a source the last record for an id wins; across sources the
/// one with higher [`Source`] precedence does.
pub fn merge_sources(
    remote: Vec<CaseRecord>,
    snapshot: Vec<CaseRecord>,
    cache: Vec<CaseRecord>,
) -> Vec<CaseRecord> {
    let tagged = remote
        .into_iter()
        .map(|c| (Source::Remote, c))
        .chain(snapshot.into_iter().map(|c| (Source::Snapshot, c)))
        .chain(cache.into_iter().map(|c| (Source::Cache, c)));

    let mut slots: Vec<(Source, CaseRecord)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for (position, (source, mut record)) in tagged.enumerate() {
        resolve_identity(&mut record, position);
        match index.get(&record.id) {
            Some(&slot) => {
                if source >= slots[slot].0 {
                    slots[slot] = (source, record);
                }
            }
            None => {
                index.insert(record.id.clone(), slots.len());
                slots.push((source, record));
            }
        }
    }

    let mut out: Vec<CaseRecord> = slots.into_iter().map(|(_, r)| r).collect();
    sort_newest_first(&mut out);
    out
}

/// Appends `incoming` onto `existing`, replacing in place any entry whose key
/// is already present. `key` returning `None` always appends.
pub fn upsert_by_key(
    existing: Vec<CaseRecord>,
    incoming: impl IntoIterator<Item = CaseRecord>,
    key: impl Fn(&CaseRecord) -> Option<String>,
) -> Vec<CaseRecord> {
    let mut out = Vec::with_capacity(existing.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    for record in existing.into_iter().chain(incoming) {
        match key(&record) {
            Some(k) => match index.get(&k) {
                Some(&slot) => out[slot] = record,
                None => {
                    index.insert(k, out.len());
                    out.push(record);
                }
            },
            None => out.push(record),
        }
    }
    out
}

/// The canonical in-memory collection for a session: unique ids, newest
/// first after every mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaseCollection {
    records: Vec<CaseRecord>,
}

impl CaseCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sources(
        remote: Vec<CaseRecord>,
        snapshot: Vec<CaseRecord>,
        cache: Vec<CaseRecord>,
    ) -> Self {
        Self {
            records: merge_sources(remote, snapshot, cache),
        }
    }

    /// One collection from a single list, e.g. a store read on its own.
    pub fn from_records(records: Vec<CaseRecord>) -> Self {
        Self::from_sources(records, Vec::new(), Vec::new())
    }

    pub fn records(&self) -> &[CaseRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Non-empty message ids already held, for "seen before" checks.
    pub fn message_ids(&self) -> HashSet<&str> {
        self.records
            .iter()
            .filter(|c| c.has_message_id())
            .map(|c| c.message_id.as_str())
            .collect()
    }

    /// Merges records by `id`, the incoming copy replacing an existing one.
    /// Records without an id get one from [`assign_fallback_ids`].
    pub fn merge_new(&mut self, mut incoming: Vec<CaseRecord>) -> usize {
        assign_fallback_ids(&mut incoming, Utc::now());
        let existing = std::mem::take(&mut self.records);
        self.records = upsert_by_key(existing, incoming, |c| Some(c.id.clone()));
        sort_newest_first(&mut self.records);
        self.records.len()
    }

    /// Drops every record; returns how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.records.len();
        self.records.clear();
        count
    }
}
