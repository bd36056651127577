use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::Serialize;

pub fn now_utc_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn utc_compact_string(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn compact_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

pub fn ensure_directory(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))
}

pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_directory(parent)?;
        }
    }

    let data = serde_json::to_vec_pretty(value)
        .with_context(|| format!("failed to serialize json: {}", path.display()))?;

    let mut file = File::create(path)
        .with_context(|| format!("failed to create json file: {}", path.display()))?;
    file.write_all(&data)
        .with_context(|| format!("failed to write json file: {}", path.display()))?;
    file.write_all(b"\n")
        .with_context(|| format!("failed to finalize json file: {}", path.display()))?;

    Ok(())
}

/// One title per line; blank lines and `#` comments are ignored.
pub fn read_titles_file(path: &Path) -> Result<Vec<String>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read titles file: {}", path.display()))?;

    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToOwned::to_owned)
        .collect())
}

pub fn truncate_at_char_boundary(input: &str, max_bytes: usize) -> &str {
    if input.len() <= max_bytes {
        return input;
    }

    let mut end = max_bytes;
    while !input.is_char_boundary(end) {
        end -= 1;
    }
    &input[..end]
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::NaiveDate;

    use super::{compact_date, read_titles_file, truncate_at_char_boundary};

    #[test]
    fn compact_date_uses_yyyymmdd() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 5).expect("valid date");
        assert_eq!(compact_date(date), "20240505");
    }

    #[test]
    fn truncate_backs_off_to_char_boundary() {
        let text = "ab\u{0645}cd";
        assert_eq!(truncate_at_char_boundary(text, 3), "ab");
        assert_eq!(truncate_at_char_boundary(text, 4), "ab\u{0645}");
        assert_eq!(truncate_at_char_boundary(text, 64), text);
    }

    #[test]
    fn read_titles_file_skips_blank_and_comment_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("titles.txt");
        fs::write(&path, "# seed list\nBarack Obama\n\n  Switchcraft  \nBarack Obama\n")
            .expect("write titles");

        let titles = read_titles_file(&path).expect("titles should load");
        assert_eq!(titles, vec!["Barack Obama", "Switchcraft", "Barack Obama"]);
    }
}
