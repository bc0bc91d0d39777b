use std::fmt;
use std::future::Future;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

/// Officer label for records whose name is missing or unreadable.
pub const UNSPECIFIED_OFFICER: &str = "Unspecified";

/// Officer label for case messages without a "Name:" line.
pub const UNKNOWN_OFFICER: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseRecord {
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub id: String,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub message_id: String,
    #[serde(default = "unspecified_officer", deserialize_with = "lenient_officer")]
    pub officer_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl CaseRecord {
    pub fn new(
        message_id: impl Into<String>,
        officer_name: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        let message_id = message_id.into();
        Self {
            id: message_id.clone(),
            message_id,
            officer_name: officer_name.into(),
            timestamp: timestamp.into(),
            created_at: None,
        }
    }

    /// Identity used when reconciling sources: the feed message id wins over
    /// any externally supplied id.
    pub fn identity(&self) -> Option<&str> {
        if !self.message_id.is_empty() {
            Some(&self.message_id)
        } else if !self.id.is_empty() {
            Some(&self.id)
        } else {
            None
        }
    }

    pub fn has_message_id(&self) -> bool {
        !self.message_id.is_empty()
    }
}

fn unspecified_officer() -> String {
    UNSPECIFIED_OFFICER.to_string()
}

/// Reads an explicit `null` as the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_officer<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) if !s.trim().is_empty() => s,
        _ => unspecified_officer(),
    })
}

/// Feed message ids are snowflakes; anything that is not an unsigned integer
/// compares as zero.
pub fn message_id_value(id: &str) -> u128 {
    id.trim().parse::<u128>().unwrap_or(0)
}

/// Parses a JSON array of case records. Entries that are not objects or that
/// carry mistyped fields are skipped; the second value is how many were.
pub fn parse_case_array(raw: &str) -> anyhow::Result<(Vec<CaseRecord>, usize)> {
    let value: Value = serde_json::from_str(raw)?;
    let Value::Array(items) = value else {
        anyhow::bail!("expected a JSON array of cases");
    };
    let mut out = Vec::with_capacity(items.len());
    let mut skipped = 0;
    for item in items {
        if !item.is_object() {
            skipped += 1;
            continue;
        }
        match serde_json::from_value::<CaseRecord>(item) {
            Ok(record) => out.push(record),
            Err(err) => {
                skipped += 1;
                tracing::debug!(error = %err, "skipping malformed case entry");
            }
        }
    }
    if skipped > 0 {
        warn!(skipped, kept = out.len(), "quarantined malformed case entries");
    }
    Ok((out, skipped))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedMessage {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub timestamp: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedPage {
    Messages(Vec<FeedMessage>),
    RateLimited { retry_after: Option<f64> },
    Unauthorized { status: u16 },
    Failed { status: u16 },
}

/// A paged, cursor-addressed source of chat messages, plus the rule that
/// turns one of its messages into a case.
pub trait MessageFeed {
    fn fetch_page(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> impl Future<Output = anyhow::Result<FeedPage>> + Send;

    fn extract_case(&self, message: &FeedMessage) -> Option<CaseRecord>;
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::SuperAdmin => "superadmin",
        }
    }

    /// Stored roles are free text; anything unrecognised is a plain user.
    pub fn from_stored(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            "superadmin" => Ok(Role::SuperAdmin),
            _ => anyhow::bail!("unknown role: {s}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub uid: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub role: Role,
    pub created_at: Option<String>,
}

/// The `cases` collection of the document store.
pub trait CaseStore {
    /// All stored cases, newest `timestamp` first.
    fn list_cases(&self) -> anyhow::Result<Vec<CaseRecord>>;
    /// Atomic merge-upsert keyed by `id`, stamping `created_at` on every
    /// written document.
    fn upsert_cases(&mut self, records: &[CaseRecord], created_at: &str)
    -> anyhow::Result<usize>;
}

/// The `users` collection of the document store.
pub trait UserDirectory {
    fn get_user(&self, id: &str) -> anyhow::Result<Option<UserRecord>>;
    fn list_users(&self) -> anyhow::Result<Vec<UserRecord>>;
    fn upsert_user(&self, user: &UserRecord) -> anyhow::Result<()>;
    fn set_user_role(&self, id: &str, role: Role) -> anyhow::Result<bool>;
    fn delete_user(&self, id: &str) -> anyhow::Result<bool>;
}

/// Millisecond-precision UTC timestamp, e.g. `2024-01-02T03:04:05.000Z`.
pub fn iso_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn deterministic_id(parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(&[0x1f]);
    }
    hasher.finalize().to_hex().to_string()
}
