//! Per-extension roll-up of a walked subtree.
//!
//! The summary is stored as JSON on the walked root's listing row and served
//! back by the `count` command without re-walking. Field names match the
//! rows written by earlier versions of the tool, so stored summaries keep
//! deserializing across upgrades.

use cli_table::{Cell, CellStruct, Style, Table};
use serde::{Deserialize, Serialize};

use crate::remote::RemoteObject;

/// Size units for [`format_size`].
const SIZE_UNITS: [&str; 9] = ["B", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

/// Extensions longer than this are lumped into the no-extension bucket.
const MAX_EXT_LEN: usize = 10;

/// Sort order for summary detail rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SummarySort {
    /// Ascending by file count.
    #[default]
    Count,
    /// Ascending by extension name.
    Name,
    /// Ascending by total size.
    Size,
}

impl SummarySort {
    /// Parses a user-supplied sort name, defaulting to count order.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "name" => Self::Name,
            "size" => Self::Size,
            _ => Self::Count,
        }
    }
}

/// One detail row: every file sharing an extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryItem {
    #[serde(rename = "Ext")]
    pub ext: String,
    #[serde(rename = "Count")]
    pub count: usize,
    #[serde(rename = "Size")]
    pub size: String,
    #[serde(rename = "RawSize", default)]
    pub raw_size: i64,
}

/// Roll-up of a subtree listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingSummary {
    #[serde(rename = "FileCount")]
    pub file_count: usize,
    #[serde(rename = "FolderCount")]
    pub folder_count: usize,
    #[serde(rename = "TotalSize")]
    pub total_size: String,
    #[serde(rename = "Details")]
    pub details: Vec<SummaryItem>,
}

impl ListingSummary {
    /// True when the summary describes nothing at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.file_count == 0 && self.folder_count == 0
    }

    /// Renders the summary as a bordered terminal table with a total row.
    #[must_use]
    pub fn render_table(&self) -> String {
        let mut rows: Vec<Vec<CellStruct>> = self
            .details
            .iter()
            .map(|item| {
                vec![
                    item.ext.as_str().cell(),
                    item.count.cell(),
                    item.size.as_str().cell(),
                ]
            })
            .collect();
        rows.push(vec![
            "Total".cell().bold(true),
            (self.file_count + self.folder_count).cell().bold(true),
            self.total_size.as_str().cell().bold(true),
        ]);

        let table = rows.table().title(vec![
            "Type".cell().bold(true),
            "Count".cell().bold(true),
            "Size".cell().bold(true),
        ]);
        table.display().map(|d| d.to_string()).unwrap_or_default()
    }
}

/// File extension including the leading dot, or empty when there is none.
fn extension(name: &str) -> &str {
    name.rfind('.').map_or("", |idx| &name[idx..])
}

/// Formats a byte count with two decimals and the closest unit.
#[must_use]
pub fn format_size(mut n: f64) -> String {
    if n < 0.0 {
        return "invalid size".to_owned();
    }
    let mut unit = 0;
    while n >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        n /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", n, SIZE_UNITS[unit])
}

/// Rolls a flat listing up into per-extension counts and sizes.
#[must_use]
pub fn summarize(objects: &[RemoteObject], sort: SummarySort) -> ListingSummary {
    use std::collections::HashMap;

    let files: Vec<&RemoteObject> = objects.iter().filter(|o| !o.is_folder()).collect();
    let folder_count = objects.len() - files.len();
    let total_size: i64 = files.iter().map(|f| f.size).sum();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut sizes: HashMap<&str, i64> = HashMap::new();
    let mut no_ext_count = 0;
    let mut no_ext_size = 0i64;

    for file in &files {
        let ext = extension(&file.name);
        if ext.is_empty() || ext.len() > MAX_EXT_LEN {
            no_ext_count += 1;
            no_ext_size += file.size;
            continue;
        }
        *counts.entry(ext).or_default() += 1;
        *sizes.entry(ext).or_default() += file.size;
    }

    let mut details: Vec<SummaryItem> = counts
        .into_iter()
        .map(|(ext, count)| {
            let raw_size = sizes.get(ext).copied().unwrap_or(0);
            SummaryItem {
                ext: ext.to_owned(),
                count,
                size: format_size(raw_size as f64),
                raw_size,
            }
        })
        .collect();

    match sort {
        SummarySort::Size => details.sort_by_key(|d| d.raw_size),
        SummarySort::Name => details.sort_by(|a, b| a.ext.cmp(&b.ext)),
        SummarySort::Count => details.sort_by_key(|d| d.count),
    }

    if no_ext_count > 0 {
        details.push(SummaryItem {
            ext: "No Extension".to_owned(),
            count: no_ext_count,
            size: format_size(no_ext_size as f64),
            raw_size: no_ext_size,
        });
    }
    if folder_count > 0 {
        details.push(SummaryItem {
            ext: "Folder".to_owned(),
            count: folder_count,
            size: "0".to_owned(),
            raw_size: 0,
        });
    }

    ListingSummary {
        file_count: files.len(),
        folder_count,
        total_size: format_size(total_size as f64),
        details,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::ObjectKind;

    fn obj(name: &str, kind: ObjectKind, size: i64) -> RemoteObject {
        RemoteObject {
            id: name.to_owned(),
            name: name.to_owned(),
            kind,
            size,
            checksum: None,
            parent: None,
            modified: None,
            team_drive_id: None,
        }
    }

    #[test]
    fn test_format_size_units() {
        assert_eq!(format_size(0.0), "0.00 B");
        assert_eq!(format_size(1023.0), "1023.00 B");
        assert_eq!(format_size(1024.0), "1.00 KB");
        assert_eq!(format_size(1536.0), "1.50 KB");
        assert_eq!(format_size(1024.0 * 1024.0), "1.00 MB");
        assert_eq!(format_size(-1.0), "invalid size");
    }

    #[test]
    fn test_extension_rules() {
        assert_eq!(extension("a.pdf"), ".pdf");
        assert_eq!(extension("archive.tar.gz"), ".gz");
        assert_eq!(extension("noext"), "");
        assert_eq!(extension(".hidden"), ".hidden");
    }

    #[test]
    fn test_summarize_counts_and_sizes() {
        let objects = vec![
            obj("a.pdf", ObjectKind::File, 100),
            obj("b.pdf", ObjectKind::File, 200),
            obj("c.txt", ObjectKind::File, 50),
            obj("noext", ObjectKind::File, 10),
            obj("docs", ObjectKind::Folder, 0),
        ];
        let summary = summarize(&objects, SummarySort::Count);

        assert_eq!(summary.file_count, 4);
        assert_eq!(summary.folder_count, 1);
        assert_eq!(summary.total_size, "360.00 B");

        let pdf = summary.details.iter().find(|d| d.ext == ".pdf").unwrap();
        assert_eq!(pdf.count, 2);
        assert_eq!(pdf.raw_size, 300);

        assert!(summary.details.iter().any(|d| d.ext == "No Extension"));
        assert!(summary.details.iter().any(|d| d.ext == "Folder"));
    }

    #[test]
    fn test_summarize_sort_orders() {
        let objects = vec![
            obj("a.zz", ObjectKind::File, 1),
            obj("b.aa", ObjectKind::File, 100),
            obj("c.aa", ObjectKind::File, 100),
        ];

        let by_name = summarize(&objects, SummarySort::Name);
        assert_eq!(by_name.details[0].ext, ".aa");

        let by_count = summarize(&objects, SummarySort::Count);
        assert_eq!(by_count.details[0].ext, ".zz");

        let by_size = summarize(&objects, SummarySort::Size);
        assert_eq!(by_size.details[0].ext, ".zz");
    }

    #[test]
    fn test_summary_json_round_trip_uses_legacy_field_names() {
        let summary = summarize(&[obj("a.pdf", ObjectKind::File, 5)], SummarySort::Count);
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"FileCount\""));
        assert!(json.contains("\"Details\""));
        let back: ListingSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(summary, back);
    }

    #[test]
    fn test_is_empty() {
        let summary = summarize(&[], SummarySort::Count);
        assert!(summary.is_empty());
    }

    #[test]
    fn test_render_table_contains_rows() {
        let summary = summarize(&[obj("a.pdf", ObjectKind::File, 5)], SummarySort::Count);
        let table = summary.render_table();
        assert!(table.contains(".pdf"));
        assert!(table.contains("Total"));
    }
}
