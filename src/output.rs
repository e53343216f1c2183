//! CSV and JSON snapshot files.
//!
//! Every CSV starts with a UTF-8 BOM so spreadsheet apps pick up Turkish characters.

use anyhow::{anyhow, Context, Result};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

const BOM: &[u8] = b"\xEF\xBB\xBF";

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

/// Write `rows` to `path`, replacing whatever was there.
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    ensure_parent(path)?;
    let mut file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(BOM)?;

    let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    debug!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}

/// Append `rows`, writing the header only when the file is new.
pub fn append_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    ensure_parent(path)?;
    let is_new = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    if is_new {
        file.write_all(BOM)?;
    }

    let mut writer = WriterBuilder::new().has_headers(is_new).from_writer(file);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read every record of a CSV, header first.
pub fn read_records(path: &Path) -> Result<Vec<StringRecord>> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    reader
        .records()
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Malformed CSV in {}", path.display()))
}

/// Write raw records (header included) with a BOM.
pub fn write_records(path: &Path, records: &[StringRecord]) -> Result<()> {
    ensure_parent(path)?;
    let mut file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(BOM)?;

    let mut writer = WriterBuilder::new().flexible(true).from_writer(file);
    for record in records {
        writer.write_record(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Drop rows whose `column` value was already seen, keeping the first.
/// Returns the number of data rows left.
pub fn dedup_csv(path: &Path, column: &str) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }
    let mut records = read_records(path)?;
    if records.is_empty() {
        return Ok(0);
    }
    let header = records.remove(0);
    let idx = header
        .iter()
        .position(|h| h == column)
        .ok_or_else(|| anyhow!("Column '{}' not found in {}", column, path.display()))?;

    let before = records.len();
    let mut seen = HashSet::new();
    records.retain(|r| seen.insert(r.get(idx).unwrap_or_default().to_string()));

    let removed = before - records.len();
    if removed > 0 {
        info!("Removed {} duplicate rows. Final count: {}", removed, records.len());
    }

    let kept = records.len();
    records.insert(0, header);
    write_records(path, &records)?;
    Ok(kept)
}

/// Count data rows (header excluded).
pub fn count_rows(path: &Path) -> Result<usize> {
    Ok(read_records(path)?.len().saturating_sub(1))
}

fn to_record<T: Serialize>(row: &T) -> Result<StringRecord> {
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    writer.serialize(row)?;
    let bytes = writer.into_inner().map_err(|e| anyhow!("{}", e))?;

    let mut reader = ReaderBuilder::new().has_headers(false).from_reader(bytes.as_slice());
    Ok(reader.records().next().transpose()?.unwrap_or_default())
}

/// Append only rows whose first `key_columns` fields are not already in the file.
/// Returns how many rows were appended.
pub fn append_unique<T: Serialize>(path: &Path, rows: &[T], key_columns: usize) -> Result<usize> {
    let key_of = |record: &StringRecord| -> Vec<String> {
        record.iter().take(key_columns).map(str::to_string).collect()
    };

    let mut existing: HashSet<Vec<String>> = HashSet::new();
    if path.exists() {
        // Skip the header row
        existing.extend(read_records(path)?.iter().skip(1).map(key_of));
    }

    let mut fresh = Vec::new();
    for row in rows {
        if existing.insert(key_of(&to_record(row)?)) {
            fresh.push(row);
        }
    }

    append_csv(path, &fresh)?;
    Ok(fresh.len())
}

/// Extend a JSON array file; the whole array is rewritten each time.
pub fn append_json<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    ensure_parent(path)?;

    let mut existing: Vec<serde_json::Value> = match fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!("Ignoring unreadable JSON in {}: {}", path.display(), e);
            Vec::new()
        }),
        Err(_) => Vec::new(),
    };
    for row in rows {
        existing.push(serde_json::to_value(row)?);
    }

    fs::write(path, serde_json::to_string_pretty(&existing)?)
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Drop JSON array items whose `key` field repeats.
/// Length of the JSON array file.
pub fn count_json(path: &Path) -> Result<usize> {
    let items: Vec<serde_json::Value> = serde_json::from_str(&fs::read_to_string(path)?)
        .with_context(|| format!("Malformed JSON in {}", path.display()))?;
    Ok(items.len())
}

pub fn dedup_json(path: &Path, key: &str) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }
    let items: Vec<serde_json::Value> = serde_json::from_str(&fs::read_to_string(path)?)
        .with_context(|| format!("Malformed JSON in {}", path.display()))?;

    let mut seen = HashSet::new();
    let deduped: Vec<_> = items
        .into_iter()
        .filter(|item| {
            let value = match item.get(key) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            seen.insert(value)
        })
        .collect();

    fs::write(path, serde_json::to_string_pretty(&deduped)?)?;
    Ok(deduped.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use tempfile::TempDir;

    #[derive(Serialize)]
    struct Row {
        id: String,
        name: String,
        price: f64,
    }

    fn row(id: &str, name: &str, price: f64) -> Row {
        Row { id: id.into(), name: name.into(), price }
    }

    #[test]
    fn write_starts_with_bom_and_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Markets/Test/test_2026-10-16.csv");
        write_csv(&path, &[row("1", "Domates", 114.9)]).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert!(bytes.starts_with(BOM));
        let text = String::from_utf8(bytes[3..].to_vec()).unwrap();
        assert_eq!(text, "id,name,price\n1,Domates,114.9\n");
    }

    #[test]
    fn append_writes_header_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        append_csv(&path, &[row("1", "Elma", 10.0)]).unwrap();
        append_csv(&path, &[row("2", "Armut", 12.5)]).unwrap();

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(&records[0][0], "id");
        assert_eq!(&records[2][1], "Armut");
        assert_eq!(count_rows(&path).unwrap(), 2);
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        write_csv(&path, &[row("1", "Elma", 10.0), row("2", "Armut", 12.5), row("1", "Elma", 11.0)]).unwrap();

        assert_eq!(dedup_csv(&path, "id").unwrap(), 2);
        let records = read_records(&path).unwrap();
        assert_eq!(&records[1][2], "10.0");
        assert!(dedup_csv(&path, "missing").is_err());
    }

    #[test]
    fn append_unique_skips_known_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        assert_eq!(append_unique(&path, &[row("1", "Elma", 10.0)], 2).unwrap(), 1);
        let added = append_unique(&path, &[row("1", "Elma", 99.0), row("1", "Kiraz", 40.0)], 2).unwrap();
        assert_eq!(added, 1);
        assert_eq!(count_rows(&path).unwrap(), 2);
    }

    #[test]
    fn json_append_and_dedup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        append_json(&path, &[row("1", "Elma", 10.0)]).unwrap();
        append_json(&path, &[row("1", "Elma", 10.0), row("2", "Armut", 3.0)]).unwrap();
        assert_eq!(count_json(&path).unwrap(), 3);
        assert_eq!(dedup_json(&path, "id").unwrap(), 2);
        assert_eq!(count_json(&path).unwrap(), 2);
    }
}
