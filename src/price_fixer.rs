//! Rewrite the price column of old snapshots from Turkish text ("1.249,90")
//! to plain floats ("1249.9").

use crate::output::{read_records, write_records};
use crate::price::format_price;
use anyhow::{Context, Result};
use csv::StringRecord;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::info;

/// Zero-based index of the price column (Brand, productName, Price)
const PRICE_COLUMN: usize = 2;

static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\d.,]+").expect("valid regex"));

/// First number in the cell, read with dot thousands and comma decimals
fn fix_price(cell: &str) -> Option<String> {
    let token = NUMBER.find(cell)?.as_str();
    let value: f64 = token.replace('.', "").replace(',', ".").parse().ok()?;
    Some(format_price(value))
}

fn fix_record(record: &StringRecord) -> Option<StringRecord> {
    let cell = record.get(PRICE_COLUMN)?;
    if cell.trim().parse::<f64>().is_ok() {
        return None;
    }
    let fixed = fix_price(cell).filter(|f| f != cell)?;
    Some(
        record
            .iter()
            .enumerate()
            .map(|(i, field)| if i == PRICE_COLUMN { fixed.as_str() } else { field })
            .collect(),
    )
}

/// Fix one file in place. Returns how many rows changed.
/// Cells that already hold a plain float are left alone, so a second run is a no-op.
pub fn fix_file(path: &Path) -> Result<usize> {
    let mut records = read_records(path)?;
    let mut fixed = 0;

    for record in records.iter_mut().skip(1) {
        if let Some(new) = fix_record(record) {
            *record = new;
            fixed += 1;
        }
    }

    if fixed > 0 {
        let tmp = path.with_extension("csv.tmp");
        write_records(&tmp, &records)?;
        fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    }
    Ok(fixed)
}

/// Fix every `*.csv` in `dir`, in name order
pub fn fix_dir(dir: &Path) -> Result<Vec<(PathBuf, usize)>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    files.sort();

    let mut results = Vec::with_capacity(files.len());
    for file in files {
        let fixed = fix_file(&file)?;
        info!("{}: {} rows fixed", file.display(), fixed);
        results.push((file, fixed));
    }

    let total: usize = results.iter().map(|(_, n)| n).sum();
    info!("✅ Total: {} rows fixed in {} files", total, results.len());
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, text: &str) {
        fs::write(path, format!("\u{feff}{}", text)).unwrap();
    }

    #[test]
    fn price_cells() {
        assert_eq!(fix_price("1.249,90 TL").as_deref(), Some("1249.9"));
        assert_eq!(fix_price("₺42,50").as_deref(), Some("42.5"));
        assert_eq!(fix_price("yok"), None);
    }

    #[test]
    fn rewrites_only_changed_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("onur_2026-10-16.csv");
        write(
            &path,
            "Brand,productName,Price\n\
             Eti,Burçak,\"1.249,90\"\n\
             Ülker,Çikolata,24.5\n\
             Kısa,satır\n\
             Torku,Banada,fiyat yok\n",
        );

        assert_eq!(fix_file(&path).unwrap(), 1);

        let records = read_records(&path).unwrap();
        assert_eq!(records[0], vec!["Brand", "productName", "Price"]);
        assert_eq!(records[1].get(2), Some("1249.9"));
        assert_eq!(records[2].get(2), Some("24.5"));
        assert_eq!(records[3].len(), 2);
        assert_eq!(records[4].get(2), Some("fiyat yok"));
        assert!(fs::read(&path).unwrap().starts_with(b"\xEF\xBB\xBF"));
        assert!(!dir.path().join("onur_2026-10-16.csv.tmp").exists());
    }

    #[test]
    fn fixes_every_csv_in_name_order() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("b.csv"), "Brand,productName,Price\nA,B,\"3,50\"\nC,D,\"4,00\"\n");
        write(&dir.path().join("a.csv"), "Brand,productName,Price\nA,B,3.5\n");
        fs::write(dir.path().join("notes.txt"), "1,2,3,4").unwrap();

        let results = fix_dir(dir.path()).unwrap();
        let summary: Vec<_> = results
            .iter()
            .map(|(p, n)| (p.file_name().unwrap().to_string_lossy().into_owned(), *n))
            .collect();
        assert_eq!(summary, vec![("a.csv".to_string(), 0), ("b.csv".to_string(), 2)]);
    }
}
