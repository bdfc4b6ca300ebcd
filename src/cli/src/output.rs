//! Table formatting helpers for CLI output.

use comfy_table::{ContentArrangement, Table};
use modcache_core::model::{ModuleReport, SyncSummary};

/// Create a styled table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a chrono timestamp as a relative "ago" string.
pub fn format_ago(dt: &chrono::DateTime<chrono::Utc>) -> String {
    let secs = chrono::Utc::now().signed_duration_since(*dt).num_seconds();
    if secs < 0 {
        return "just now".to_string();
    }

    match secs {
        0..=59 => format!("{secs} seconds ago"),
        60..=3_599 => format!("{} minutes ago", secs / 60),
        3_600..=86_399 => format!("{} hours ago", secs / 3_600),
        _ => format!("{} days ago", secs / 86_400),
    }
}

/// Per-module report table.
pub fn report_table(reports: &[ModuleReport]) -> Table {
    let mut table = new_table(&["MODULE", "IMAGE", "OUTCOME", "DETAIL"]);
    for report in reports {
        table.add_row(vec![
            report.module_id.clone(),
            report.image.clone().unwrap_or_else(|| "-".to_string()),
            report.outcome.to_string(),
            report.detail.clone().unwrap_or_default(),
        ]);
    }
    table
}

/// One-line batch summary, e.g. `3 modules: 2 resolved, 1 fetch failed`.
pub fn summary_line(summary: &SyncSummary) -> String {
    let counts = [
        (summary.resolved, "resolved"),
        (summary.skipped_no_image, "skipped (no image)"),
        (summary.fetch_failed, "fetch failed"),
        (summary.archive_failed, "archive failed"),
        (summary.runtime_failed, "runtime failed"),
    ];
    let parts: Vec<String> = counts
        .iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, label)| format!("{n} {label}"))
        .collect();

    let noun = if summary.total() == 1 { "module" } else { "modules" };
    if parts.is_empty() {
        format!("{} {noun}", summary.total())
    } else {
        format!("{} {noun}: {}", summary.total(), parts.join(", "))
    }
}
