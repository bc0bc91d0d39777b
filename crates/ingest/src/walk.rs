use std::collections::HashSet;
use std::time::Duration;

use core_model::{CaseRecord, FeedPage, MessageFeed, message_id_value};
use rayon::prelude::*;
use tokio::time::sleep;
use tracing::{info, warn};

/// Largest page the feed serves.
pub const PAGE_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct WalkConfig {
    pub page_limit: usize,
    pub page_delay: Duration,
    pub default_retry_after: Duration,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            page_limit: PAGE_LIMIT,
            page_delay: Duration::from_millis(500),
            default_retry_after: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WalkPhase {
    Connecting { resuming: bool },
    PageFetched { page: usize, fetched: usize },
    RateLimited { retry_after: Duration },
    Parsing { message_count: usize },
    Done { new_cases: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum WalkError {
    #[error("feed credentials expired or cannot read the channel (status {status})")]
    Unauthorized { status: u16 },
    #[error("feed transport error, status {status}")]
    Transport { status: u16 },
    #[error("feed request failed: {0:#}")]
    Request(anyhow::Error),
}

/// The newest feed message already ingested, by numeric id.
pub fn latest_message_id(known: &[CaseRecord]) -> Option<&str> {
    known
        .iter()
        .filter(|c| message_id_value(&c.message_id) > 0)
        .max_by_key(|c| message_id_value(&c.message_id))
        .map(|c| c.message_id.as_str())
}

/// Pages forward from the newest known message and returns the cases not
/// already in `known`. An empty vec means the feed had nothing new; an
/// aborted walk is always an `Err`.
pub async fn walk_feed<F>(
    feed: &F,
    known: &[CaseRecord],
    config: &WalkConfig,
    on_progress: impl Fn(WalkPhase),
) -> Result<Vec<CaseRecord>, WalkError>
where
    F: MessageFeed + Sync,
{
    let limit = config.page_limit.clamp(1, PAGE_LIMIT);
    let mut cursor = latest_message_id(known).map(str::to_owned);
    on_progress(WalkPhase::Connecting {
        resuming: cursor.is_some(),
    });
    info!(cursor = cursor.as_deref(), limit, "walking feed");

    let mut buffer = Vec::new();
    let mut page = 0;
    loop {
        let fetched = feed
            .fetch_page(cursor.as_deref(), limit)
            .await
            .map_err(WalkError::Request)?;
        match fetched {
            FeedPage::Messages(messages) => {
                page += 1;
                let count = messages.len();
                let page_max = messages
                    .iter()
                    .max_by_key(|m| message_id_value(&m.id))
                    .map(|m| m.id.clone());
                buffer.extend(messages);
                info!(page, count, fetched = buffer.len(), "feed page fetched");
                on_progress(WalkPhase::PageFetched {
                    page,
                    fetched: buffer.len(),
                });
                if count < limit {
                    break;
                }
                let Some(next) = page_max else {
                    break;
                };
                let current = cursor.as_deref().map(message_id_value).unwrap_or(0);
                if message_id_value(&next) <= current {
                    warn!(cursor = cursor.as_deref(), next = %next, "feed cursor did not advance; stopping");
                    break;
                }
                cursor = Some(next);
                sleep(config.page_delay).await;
            }
            FeedPage::RateLimited { retry_after } => {
                let wait = retry_after
                    .filter(|s| s.is_finite() && *s >= 0.0)
                    .map(Duration::from_secs_f64)
                    .unwrap_or(config.default_retry_after);
                warn!(retry_after = ?wait, cursor = cursor.as_deref(), "feed rate limited");
                on_progress(WalkPhase::RateLimited { retry_after: wait });
                sleep(wait).await;
            }
            FeedPage::Unauthorized { status } => {
                return Err(WalkError::Unauthorized { status });
            }
            FeedPage::Failed { status } => {
                return Err(WalkError::Transport { status });
            }
        }
    }

    on_progress(WalkPhase::Parsing {
        message_count: buffer.len(),
    });
    let known_ids: HashSet<&str> = known
        .iter()
        .map(|c| c.message_id.as_str())
        .filter(|id| !id.is_empty())
        .collect();
    let parsed: Vec<CaseRecord> = buffer
        .par_iter()
        .filter_map(|m| feed.extract_case(m))
        .filter(|c| !known_ids.contains(c.message_id.as_str()))
        .collect();

    let mut seen = HashSet::new();
    let new_cases: Vec<CaseRecord> = parsed
        .into_iter()
        .filter(|c| c.message_id.is_empty() || seen.insert(c.message_id.clone()))
        .collect();

    info!(messages = buffer.len(), new_cases = new_cases.len(), "feed walk done");
    on_progress(WalkPhase::Done {
        new_cases: new_cases.len(),
    });
    Ok(new_cases)
}
