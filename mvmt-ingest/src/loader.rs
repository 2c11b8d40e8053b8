//! Reload stored recordings as one table
//!
//! Pipeline, each stage a plain function over [`Table`]:
//! 1. [`parse_table`]: object bytes to header + rows
//! 2. [`append_tag_columns`]: add the five filename-derived columns
//! 3. concatenation of all tables sharing the first header
//! 4. [`normalize_time_column`]: rewrite `time` values as RFC 3339
//!
//! Objects that cannot be decoded or parsed are skipped with a warning and
//! listed in the [`LoadReport`].

use crate::decoder::decode;
use crate::error::FormatError;
use crate::models::{FileRecordMetadata, TAG_KEYS};
use crate::store::{RemoteStore, StoreError};
use chrono::{DateTime, NaiveDateTime};
use std::io::Write;
use thiserror::Error;
use tracing::{info, warn};

/// Column rewritten by [`normalize_time_column`]
pub const TIME_COLUMN: &str = "time";

const TIME_OUTPUT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";
const NAIVE_TIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("'{name}' is not valid UTF-8")]
    NotUtf8 { name: String },

    #[error("'{name}' has no header line")]
    Empty { name: String },

    #[error("'{name}' line {line}: {found} cells, header has {expected}")]
    TooManyCells {
        name: String,
        line: usize,
        found: usize,
        expected: usize,
    },

    #[error("'{name}' header does not match the first table")]
    HeaderMismatch { name: String },

    #[error("Row {row}: cannot parse time value '{value}'")]
    BadTime { row: usize, value: String },

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Header plus rows; every row has one cell per column
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// An object left out of the loaded table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedObject {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub dataset: Table,
    /// Objects whose rows are in `dataset`, in load order
    pub loaded: Vec<String>,
    pub skipped: Vec<SkippedObject>,
}

/// Parse delimited text.
///
/// The first non-blank line is the header. Tab-delimited if the header has a
/// tab, otherwise comma-delimited. Blank lines are skipped, short rows are
/// padded with empty cells and long rows are rejected.
pub fn parse_table(name: &str, content: &[u8]) -> Result<Table, LoadError> {
    let text = std::str::from_utf8(content).map_err(|_| LoadError::NotUtf8 {
        name: name.to_string(),
    })?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim_end_matches('\r')))
        .filter(|(_, l)| !l.trim().is_empty());

    let (_, header) = lines.next().ok_or_else(|| LoadError::Empty {
        name: name.to_string(),
    })?;
    let delimiter = if header.contains('\t') { '\t' } else { ',' };
    let split = |line: &str| -> Vec<String> {
        line.split(delimiter).map(|c| c.trim().to_string()).collect()
    };

    let columns = split(header);
    let mut rows = Vec::new();
    for (line_no, line) in lines {
        let mut cells = split(line);
        if cells.len() > columns.len() {
            return Err(LoadError::TooManyCells {
                name: name.to_string(),
                line: line_no,
                found: cells.len(),
                expected: columns.len(),
            });
        }
        cells.resize(columns.len(), String::new());
        rows.push(cells);
    }

    Ok(Table { columns, rows })
}

/// Add one column per tag key holding the decoded value on every row.
/// A column that already exists is overwritten.
pub fn append_tag_columns(mut table: Table, metadata: &FileRecordMetadata) -> Table {
    for (key, value) in TAG_KEYS.iter().zip(metadata.values()) {
        match table.column_index(key) {
            Some(idx) => {
                for row in &mut table.rows {
                    row[idx] = value.to_string();
                }
            }
            None => {
                table.columns.push(key.to_string());
                for row in &mut table.rows {
                    row.push(value.to_string());
                }
            }
        }
    }
    table
}

/// Rewrite every `time` cell as `YYYY-MM-DDTHH:MM:SS.mmm`.
///
/// Accepts RFC 3339 (converted to UTC) and naive timestamps with a space or
/// `T` separator. Tables without a `time` column pass through unchanged.
pub fn normalize_time_column(mut table: Table) -> Result<Table, LoadError> {
    let Some(idx) = table.column_index(TIME_COLUMN) else {
        return Ok(table);
    };

    for (row_no, row) in table.rows.iter_mut().enumerate() {
        let parsed = parse_time(&row[idx]).ok_or_else(|| LoadError::BadTime {
            row: row_no + 1,
            value: row[idx].clone(),
        })?;
        row[idx] = parsed.format(TIME_OUTPUT_FORMAT).to_string();
    }
    Ok(table)
}

fn parse_time(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    NAIVE_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

/// Load every object in `store` into one table
pub async fn load_dataset(store: &dyn RemoteStore) -> Result<LoadReport, LoadError> {
    let objects = store.list().await?;
    info!(location = %store.location(), objects = objects.len(), "Loading dataset");

    let mut report = LoadReport::default();

    for (name, content) in objects {
        let table = match decode(&name)
            .map_err(LoadError::from)
            .and_then(|metadata| Ok(append_tag_columns(parse_table(&name, &content)?, &metadata)))
        {
            Ok(table) => table,
            Err(e) => {
                warn!(object = %name, error = %e, "Skipping object");
                report.skipped.push(SkippedObject {
                    name,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        if report.loaded.is_empty() {
            report.dataset.columns = table.columns;
        } else if report.dataset.columns != table.columns {
            let e = LoadError::HeaderMismatch { name: name.clone() };
            warn!(object = %name, error = %e, "Skipping object");
            report.skipped.push(SkippedObject {
                name,
                reason: e.to_string(),
            });
            continue;
        }

        report.dataset.rows.extend(table.rows);
        report.loaded.push(name);
    }

    report.dataset = normalize_time_column(report.dataset)?;

    info!(
        loaded = report.loaded.len(),
        skipped = report.skipped.len(),
        rows = report.dataset.rows.len(),
        "Dataset loaded"
    );
    Ok(report)
}

/// Write `table` as comma-separated text with a header line
pub fn write_csv<W: Write>(table: &Table, mut out: W) -> std::io::Result<()> {
    write_csv_line(&mut out, &table.columns)?;
    for row in &table.rows {
        write_csv_line(&mut out, row)?;
    }
    out.flush()
}

fn write_csv_line<W: Write>(out: &mut W, cells: &[String]) -> std::io::Result<()> {
    let line = cells
        .iter()
        .map(|c| csv_escape(c))
        .collect::<Vec<_>>()
        .join(",");
    writeln!(out, "{}", line)
}

fn csv_escape(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Tags};

    #[test]
    fn test_parse_comma_table() {
        let table = parse_table("a.txt", b"time,x,y\n2024-01-15 10:00:00,1,2\n\n2024-01-15 10:00:01,3\n").unwrap();
        assert_eq!(table.columns, vec!["time", "x", "y"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1], vec!["2024-01-15 10:00:01", "3", ""]);
    }

    #[test]
    fn test_parse_tab_table_with_crlf() {
        let table = parse_table("a.txt", b"time\tx\r\n1\t2\r\n").unwrap();
        assert_eq!(table.columns, vec!["time", "x"]);
        assert_eq!(table.rows, vec![vec!["1".to_string(), "2".to_string()]]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_table("e.txt", b"\n\n"), Err(LoadError::Empty { .. })));
        assert!(matches!(
            parse_table("l.txt", b"a,b\n1,2,3\n"),
            Err(LoadError::TooManyCells { line: 2, .. })
        ));
        assert!(matches!(parse_table("u.txt", &[0xff, 0xfe]), Err(LoadError::NotUtf8 { .. })));
    }

    #[test]
    fn test_append_tag_columns() {
        let table = parse_table("a.txt", b"x\n1\n2\n").unwrap();
        let meta = decode("20240115_3_1_Anna_07.txt").unwrap();

        let table = append_tag_columns(table, &meta);
        assert_eq!(
            table.columns,
            vec!["x", "date", "exercise", "position", "name", "daily_count"]
        );
        for row in &table.rows {
            assert_eq!(&row[1..], ["20240115", "Bizeps Curl", "Wrist", "Anna", "07"]);
        }
    }

    #[test]
    fn test_append_overwrites_existing_column() {
        let table = parse_table("a.txt", b"name,x\nold,1\n").unwrap();
        let meta = decode("20240115_0_0_Ben_1.txt").unwrap();

        let table = append_tag_columns(table, &meta);
        assert_eq!(table.columns.len(), 6);
        assert_eq!(table.rows[0][0], "Ben");
    }

    #[test]
    fn test_normalize_time_formats() {
        let table = Table {
            columns: vec!["time".into()],
            rows: vec![
                vec!["2024-01-15 10:00:00".into()],
                vec!["2024-01-15T10:00:00.5".into()],
                vec!["2024-01-15T11:00:00+01:00".into()],
            ],
        };
        let table = normalize_time_column(table).unwrap();
        assert_eq!(table.rows[0][0], "2024-01-15T10:00:00.000");
        assert_eq!(table.rows[1][0], "2024-01-15T10:00:00.500");
        assert_eq!(table.rows[2][0], "2024-01-15T10:00:00.000");
    }

    #[test]
    fn test_normalize_bad_time_names_row() {
        let table = Table {
            columns: vec!["time".into()],
            rows: vec![vec!["2024-01-15 10:00:00".into()], vec!["yesterday".into()]],
        };
        match normalize_time_column(table) {
            Err(LoadError::BadTime { row, value }) => {
                assert_eq!(row, 2);
                assert_eq!(value, "yesterday");
            }
            other => panic!("expected BadTime, got {:?}", other),
        }
    }

    #[test]
    fn test_no_time_column_passes_through() {
        let table = parse_table("a.txt", b"x\n1\n").unwrap();
        assert_eq!(normalize_time_column(table.clone()).unwrap(), table);
    }

    #[tokio::test]
    async fn test_load_dataset_skips_bad_objects() {
        let store = MemoryStore::new("memory://t");
        store.insert("20240115_1_0_Anna_07.txt", "time,x\n2024-01-15 10:00:00,1\n", Tags::new());
        store.insert("20240116_2_1_Ben_1.txt", "time,x\n2024-01-16 09:00:00,2\n", Tags::new());
        store.insert("notes.txt", "time,x\n", Tags::new());
        store.insert("20240117_0_0_Cem_1.txt", "t,y\n1,2\n", Tags::new());

        let report = load_dataset(&store).await.unwrap();

        assert_eq!(
            report.loaded,
            vec!["20240115_1_0_Anna_07.txt", "20240116_2_1_Ben_1.txt"]
        );
        let skipped: Vec<_> = report.skipped.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(skipped, vec!["20240117_0_0_Cem_1.txt", "notes.txt"]);

        assert_eq!(report.dataset.rows.len(), 2);
        assert_eq!(report.dataset.columns.len(), 7);
        assert_eq!(report.dataset.rows[0][0], "2024-01-15T10:00:00.000");
        assert_eq!(report.dataset.rows[1][3], "Sit-Ups");
    }

    #[tokio::test]
    async fn test_load_dataset_keeps_unicode_names() {
        let store = MemoryStore::new("memory://t");
        store.insert("20240115_1_0_Jörg_07.txt", "time,x\n2024-01-15 10:00:00,1\n", Tags::new());

        let report = load_dataset(&store).await.unwrap();

        assert_eq!(report.loaded, vec!["20240115_1_0_Jörg_07.txt"]);
        assert!(report.skipped.is_empty());
        assert_eq!(report.dataset.rows[0][5], "Jörg");
    }

    #[test]
    fn test_write_csv_quotes() {
        let table = Table {
            columns: vec!["a".into(), "b".into()],
            rows: vec![vec!["1,5".into(), "say \"hi\"".into()]],
        };
        let mut out = Vec::new();
        write_csv(&table, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "a,b\n\"1,5\",\"say \"\"hi\"\"\"\n"
        );
    }
}
