use std::sync::OnceLock;

use core_model::{CaseRecord, FeedMessage, UNKNOWN_OFFICER};
use regex::Regex;

/// "<name> was jailed for <minutes> minutes and fined <amount>$" as the
/// city's bot phrases it.
fn jail_re() -> &'static Regex {
    static JAIL_RE: OnceLock<Regex> = OnceLock::new();
    JAIL_RE.get_or_init(|| {
        Regex::new(
            r"(.+?)\s+ถูกจำคุก\s+เป็นเวลา\s+(\d+)\s+นาที\s+และถูกปรับเป็นจำนวน\s+([\d,]+)\$",
        )
        .expect("valid jail regex")
    })
}

/// The "Name:" line naming the arresting officer.
fn officer_re() -> &'static Regex {
    static OFFICER_RE: OnceLock<Regex> = OnceLock::new();
    OFFICER_RE.get_or_init(|| Regex::new(r"ชื่อ\s*:\s*(.+)").expect("valid officer regex"))
}

/// Message body, falling back to the first embed's description.
pub fn message_text(msg: &FeedMessage) -> Option<&str> {
    if !msg.content.is_empty() {
        return Some(&msg.content);
    }
    msg.embeds
        .first()
        .and_then(|e| e.description.as_deref())
        .filter(|d| !d.is_empty())
}

/// Classifies one feed message. `None` means "not a case", never an error.
pub fn parse_case(msg: &FeedMessage) -> Option<CaseRecord> {
    let text = message_text(msg)?;
    if !jail_re().is_match(text) {
        return None;
    }
    let officer = officer_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_OFFICER);
    Some(CaseRecord::new(
        msg.id.clone(),
        officer,
        msg.timestamp.clone(),
    ))
}
