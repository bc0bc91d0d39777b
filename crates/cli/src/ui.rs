use std::io::{self, IsTerminal};

use core_model::{CaseRecord, UserRecord};
use owo_colors::OwoColorize;
use serde::Serialize;
use stats::{OfficerStats, QuickStats, Trend, WindowKey, trend};

const NAME_WIDTH: usize = 28;

pub fn color_enabled() -> bool {
    io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

pub fn truncate_text(input: &str, max: usize) -> String {
    let mut out = String::new();
    for (i, ch) in input.chars().enumerate() {
        if i >= max {
            out.push_str("...");
            return out;
        }
        out.push(ch);
    }
    out
}

/// Left-aligns by character count, which `format!` width does not do for
/// multi-byte names.
fn pad(text: &str, width: usize) -> String {
    let len = text.chars().count();
    if len >= width {
        text.to_string()
    } else {
        format!("{text}{}", " ".repeat(width - len))
    }
}

pub fn trend_cell(t: Trend) -> String {
    match t {
        Trend::Increase(n) => format!("▲{n}"),
        Trend::Decrease(n) => format!("▼{n}"),
        Trend::Unchanged => "–".to_string(),
    }
}

fn paint_trend(t: Trend, cell: String, use_color: bool) -> String {
    if !use_color {
        return cell;
    }
    match t {
        Trend::Increase(_) => cell.green().to_string(),
        Trend::Decrease(_) => cell.red().to_string(),
        Trend::Unchanged => cell.dimmed().to_string(),
    }
}

/// Trend shown for a row: the selected window's comparison pair, or
/// today against yesterday when viewing all time.
pub fn row_trend(stats: &OfficerStats, window: WindowKey) -> Trend {
    let (current, previous) = window
        .comparison()
        .unwrap_or((WindowKey::Today, WindowKey::Yesterday));
    trend(stats.count(current), stats.count(previous))
}

pub fn print_quick_stats(quick: &QuickStats) {
    let use_color = color_enabled();
    let parts = [
        ("today", quick.today_count),
        ("this week", quick.week_count),
        ("officers", quick.officer_count),
        ("total", quick.total_count),
    ];
    let line = parts
        .iter()
        .map(|(label, n)| {
            if use_color {
                format!("{} {}", n.bold(), label.dimmed())
            } else {
                format!("{n} {label}")
            }
        })
        .collect::<Vec<_>>()
        .join("  ");
    println!("{line}");
}

const COLUMNS: [WindowKey; 7] = WindowKey::EVERY;

pub fn print_officer_table(rows: &[&OfficerStats], window: WindowKey) {
    let use_color = color_enabled();
    let mut header = pad("Officer", NAME_WIDTH);
    for key in COLUMNS {
        header.push_str(&format!(" {:>10}", column_title(key)));
    }
    header.push_str(&format!(" {:>6}", "Trend"));
    if use_color {
        println!("{}", header.bold());
    } else {
        println!("{header}");
    }

    for row in rows {
        let mut line = pad(&truncate_text(&row.officer_name, NAME_WIDTH - 3), NAME_WIDTH);
        for key in COLUMNS {
            let cell = format!(" {:>10}", row.count(key));
            if use_color && key == window {
                line.push_str(&cell.cyan().bold().to_string());
            } else {
                line.push_str(&cell);
            }
        }
        let t = row_trend(row, window);
        let cell = format!(" {:>6}", trend_cell(t));
        line.push_str(&paint_trend(t, cell, use_color));
        println!("{line}");
    }
}

fn column_title(key: WindowKey) -> &'static str {
    match key {
        WindowKey::All => "Total",
        other => other.label(),
    }
}

pub fn print_cases(cases: &[&CaseRecord]) {
    let use_color = color_enabled();
    for case in cases {
        let ts = if case.timestamp.is_empty() {
            "-"
        } else {
            case.timestamp.as_str()
        };
        if use_color {
            println!(
                "{}  {}  {}",
                pad(ts, 32).dimmed(),
                pad(&case.officer_name, NAME_WIDTH).bold(),
                case.id.dimmed()
            );
        } else {
            println!("{}  {}  {}", pad(ts, 32), pad(&case.officer_name, NAME_WIDTH), case.id);
        }
    }
}

pub fn print_users(users: &[UserRecord]) {
    let use_color = color_enabled();
    for user in users {
        let role = user.role.as_str();
        let role = if use_color && user.role.is_admin() {
            pad(role, 10).yellow().to_string()
        } else {
            pad(role, 10)
        };
        println!(
            "{}  {}  {}  {}  {}",
            pad(&user.id, 24),
            role,
            pad(user.display_name.as_deref().unwrap_or("-"), 20),
            pad(user.email.as_deref().unwrap_or("-"), 28),
            user.created_at.as_deref().unwrap_or("-")
        );
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonOfficer<'a> {
    #[serde(flatten)]
    pub stats: &'a OfficerStats,
    pub trend: Trend,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonStatsOutput<'a> {
    pub window: WindowKey,
    pub search: Option<&'a str>,
    pub quick: QuickStats,
    pub officers: Vec<JsonOfficer<'a>>,
}

pub fn stats_json<'a>(
    window: WindowKey,
    search: Option<&'a str>,
    quick: QuickStats,
    rows: &[&'a OfficerStats],
) -> JsonStatsOutput<'a> {
    JsonStatsOutput {
        window,
        search,
        quick,
        officers: rows
            .iter()
            .map(|stats| JsonOfficer {
                stats,
                trend: row_trend(stats, window),
            })
            .collect(),
    }
}
