//! CLI output formatting for all subcommands.
//!
//! # Information-First Display
//!
//! Output is **link-centric**: the primary line for every link is its
//! positional index and public id, with the file it points at after an
//! arrow. Lifetime, disposition, owner and hit count follow as indented
//! context lines, so the output reads as an inventory of what is shared and
//! for how long.
//!
//! # Output Format
//!
//! ## Issue / Edit
//!
//! ```text
//! 001 k3Xa9 → photos:trip/dawn.jpg
//!     Expires: 1700003600 (in 1h 0m)
//!     Disposition: inline
//!     Owner: alice
//!     Hits: 0
//!
//! Unknown: q9Zzz
//! Invalid: ???
//! ```
//!
//! ## Thumbnail
//!
//! ```text
//! Ready: /var/cache/archive-share/thumbnail/Qm9v….jpg
//! Unavailable: no animated variant for non-video /srv/photos/dawn.jpg
//! ```
//!
//! ## Sweep
//!
//! ```text
//! Links: removed 12
//! Cache: removed 3, kept 140, failed 0
//! ```
//!
//! # Architecture
//!
//! Each entity has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no clock.

use crate::links::EditReport;
use crate::store::LinkRow;
use crate::sweep::CacheSweep;
use crate::thumbnail::Thumbnail;
use std::path::Path;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Time left until `expires`, coarsened for display.
///
/// ```text
/// in 2d 3h     // more than a day
/// in 1h 0m
/// in 45s
/// expired
/// ```
fn format_remaining(expires: i64, now: i64) -> String {
    let left = expires.saturating_sub(now);
    if left <= 0 {
        return "expired".to_string();
    }
    let (days, hours, minutes) = (left / 86_400, left % 86_400 / 3600, left % 3600 / 60);
    if days > 0 {
        format!("in {days}d {hours}h")
    } else if hours > 0 {
        format!("in {hours}h {minutes}m")
    } else if minutes > 0 {
        format!("in {minutes}m")
    } else {
        format!("in {left}s")
    }
}

fn disposition(download: bool) -> &'static str {
    if download { "attachment" } else { "inline" }
}

// ============================================================================
// Links
// ============================================================================

/// Header plus context lines for one link.
pub fn format_link(index: usize, row: &LinkRow, now: i64) -> Vec<String> {
    vec![
        format!(
            "{} {} → {}:{}",
            format_index(index),
            row.id,
            row.mount,
            row.path.display()
        ),
        format!(
            "{}Expires: {} ({})",
            indent(1),
            row.expires,
            format_remaining(row.expires, now)
        ),
        format!("{}Disposition: {}", indent(1), disposition(row.download)),
        format!("{}Owner: {}", indent(1), row.owner),
        format!("{}Hits: {}", indent(1), row.hits),
    ]
}

pub fn format_links(rows: &[LinkRow], now: i64) -> Vec<String> {
    rows.iter()
        .enumerate()
        .flat_map(|(i, row)| format_link(i + 1, row, now))
        .collect()
}

pub fn print_links(rows: &[LinkRow], now: i64) {
    for line in format_links(rows, now) {
        println!("{}", line);
    }
}

pub fn format_edit_report(report: &EditReport, now: i64) -> Vec<String> {
    let mut lines = format_links(&report.updated, now);
    if !report.unknown.is_empty() || !report.invalid.is_empty() {
        lines.push(String::new());
    }
    for id in &report.unknown {
        lines.push(format!("Unknown: {}", id));
    }
    for id in &report.invalid {
        lines.push(format!("Invalid: {}", id));
    }
    lines
}

pub fn print_edit_report(report: &EditReport, now: i64) {
    for line in format_edit_report(report, now) {
        println!("{}", line);
    }
}

// ============================================================================
// Thumbnails and sweeps
// ============================================================================

pub fn format_thumbnail(thumbnail: &Thumbnail, cache_directory: &Path) -> Vec<String> {
    match thumbnail {
        Thumbnail::Ready(name) => vec![format!("Ready: {}", cache_directory.join(name).display())],
        Thumbnail::Unavailable(reason) => vec![format!("Unavailable: {}", reason)],
    }
}

pub fn format_sweep(links_removed: Option<usize>, cache: Option<&CacheSweep>) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(removed) = links_removed {
        lines.push(format!("Links: removed {}", removed));
    }
    if let Some(sweep) = cache {
        lines.push(format!(
            "Cache: removed {}, kept {}, failed {}",
            sweep.removed,
            sweep.kept,
            sweep.failed.len()
        ));
        for path in &sweep.failed {
            lines.push(format!("{}Failed: {}", indent(1), path.display()));
        }
    }
    lines
}

pub fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thumbnail::ThumbnailError;
    use std::path::PathBuf;

    fn row(id: &str, expires: i64, download: bool) -> LinkRow {
        LinkRow {
            id: id.into(),
            expires,
            owner: "alice".into(),
            download,
            hits: 4,
            mount: "photos".into(),
            path: PathBuf::from("trip/dawn.jpg"),
        }
    }

    // =========================================================================
    // Helper tests
    // =========================================================================

    #[test]
    fn format_index_pads() {
        assert_eq!(format_index(1), "001");
        assert_eq!(format_index(1234), "1234");
    }

    #[test]
    fn remaining_units() {
        assert_eq!(format_remaining(100, 100), "expired");
        assert_eq!(format_remaining(100, 200), "expired");
        assert_eq!(format_remaining(145, 100), "in 45s");
        assert_eq!(format_remaining(100 + 600, 100), "in 10m");
        assert_eq!(format_remaining(3600, 0), "in 1h 0m");
        assert_eq!(format_remaining(2 * 86_400 + 3 * 3600 + 59, 0), "in 2d 3h");
    }

    // =========================================================================
    // Links
    // =========================================================================

    #[test]
    fn link_block() {
        let lines = format_link(1, &row("k3Xa9", 3600, false), 0);
        assert_eq!(
            lines,
            vec![
                "001 k3Xa9 → photos:trip/dawn.jpg",
                "    Expires: 3600 (in 1h 0m)",
                "    Disposition: inline",
                "    Owner: alice",
                "    Hits: 4",
            ]
        );
    }

    #[test]
    fn links_are_numbered() {
        let lines = format_links(&[row("a", 0, true), row("b", 0, true)], 10);
        assert!(lines[0].starts_with("001 a"));
        assert!(lines[5].starts_with("002 b"));
        assert_eq!(lines[1], "    Expires: 0 (expired)");
        assert_eq!(lines[2], "    Disposition: attachment");
    }

    #[test]
    fn edit_report_lists_rejects_after_blank_line() {
        let report = EditReport {
            updated: vec![row("a", 0, false)],
            unknown: vec!["zz".into()],
            invalid: vec!["??".into()],
        };
        let lines = format_edit_report(&report, 0);
        assert_eq!(&lines[5..], ["", "Unknown: zz", "Invalid: ??"]);
    }

    #[test]
    fn edit_report_without_rejects_has_no_trailer() {
        let report = EditReport {
            updated: vec![row("a", 0, false)],
            ..EditReport::default()
        };
        assert_eq!(format_edit_report(&report, 0).len(), 5);
    }

    // =========================================================================
    // Thumbnails and sweeps
    // =========================================================================

    #[test]
    fn thumbnail_lines() {
        let dir = Path::new("/cache");
        assert_eq!(
            format_thumbnail(&Thumbnail::Ready("x.jpg".into()), dir),
            vec!["Ready: /cache/x.jpg"]
        );
        let missing = Thumbnail::Unavailable(ThumbnailError::SourceMissing("/m/a.jpg".into()));
        assert_eq!(
            format_thumbnail(&missing, dir),
            vec!["Unavailable: source is not a regular file: /m/a.jpg"]
        );
    }

    #[test]
    fn sweep_lines() {
        let cache = CacheSweep {
            removed: 3,
            kept: 140,
            failed: vec![PathBuf::from("/cache/locked.jpg")],
        };
        assert_eq!(
            format_sweep(Some(12), Some(&cache)),
            vec![
                "Links: removed 12",
                "Cache: removed 3, kept 140, failed 1",
                "    Failed: /cache/locked.jpg",
            ]
        );
        assert_eq!(format_sweep(None, None), Vec::<String>::new());
    }
}
