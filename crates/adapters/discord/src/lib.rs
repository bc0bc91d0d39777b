use std::time::Duration;

use anyhow::Context;
use core_model::{CaseRecord, FeedMessage, FeedPage, MessageFeed};
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use serde_json::Value;
use tracing::debug;

mod parse;

pub use parse::{message_text, parse_case};

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v9";

#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub api_base: String,
    pub channel_id: String,
    pub token: String,
    pub timeout: Duration,
}

/// Reads a channel's message history through the REST API.
#[derive(Debug, Clone)]
pub struct DiscordFeed {
    http: reqwest::Client,
    messages_url: String,
    token: String,
}

impl DiscordFeed {
    pub fn new(settings: FeedSettings) -> anyhow::Result<Self> {
        let token = settings.token.trim().to_string();
        if token.is_empty() {
            anyhow::bail!("feed token is not configured");
        }
        let channel_id = settings.channel_id.trim();
        if channel_id.is_empty() {
            anyhow::bail!("feed channel_id is not configured");
        }
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("building feed http client")?;
        Ok(Self {
            http,
            messages_url: messages_url(&settings.api_base, channel_id),
            token,
        })
    }
}

impl MessageFeed for DiscordFeed {
    async fn fetch_page(&self, after: Option<&str>, limit: usize) -> anyhow::Result<FeedPage> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }
        debug!(after, limit, "requesting feed page");
        let response = self
            .http
            .get(&self.messages_url)
            .header(AUTHORIZATION, &self.token)
            .header("accept", "application/json")
            .query(&query)
            .send()
            .await
            .context("requesting feed page")?;
        let status = response.status().as_u16();
        let retry_header = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<f64>().ok());
        let body = response.text().await.context("reading feed page body")?;
        classify_response(status, &body, retry_header)
    }

    fn extract_case(&self, message: &FeedMessage) -> Option<CaseRecord> {
        parse_case(message)
    }
}

pub fn messages_url(api_base: &str, channel_id: &str) -> String {
    format!(
        "{}/channels/{}/messages",
        api_base.trim_end_matches('/'),
        channel_id
    )
}

/// Maps a raw HTTP outcome onto a feed page. Only a 2xx body that is not a
/// message array is an error here; every other status is a page variant the
/// walker decides about.
pub fn classify_response(
    status: u16,
    body: &str,
    retry_header: Option<f64>,
) -> anyhow::Result<FeedPage> {
    match status {
        200..=299 => {
            let messages: Vec<FeedMessage> =
                serde_json::from_str(body).context("decoding feed page")?;
            Ok(FeedPage::Messages(messages))
        }
        429 => {
            let from_body = serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|v| v.get("retry_after").and_then(Value::as_f64));
            Ok(FeedPage::RateLimited {
                retry_after: from_body.or(retry_header),
            })
        }
        401 | 403 => Ok(FeedPage::Unauthorized { status }),
        _ => Ok(FeedPage::Failed { status }),
    }
}
