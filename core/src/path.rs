//! Parsing and formatting of `_delta_log` file names: commit files are
//! `<20-digit version>.json`, single-part checkpoints are
//! `<20-digit version>.checkpoint.parquet`, and multi-part checkpoints are
//! `<20-digit version>.checkpoint.<part>.<total>.parquet`.

use object_store::path::Path as StorePath;

use crate::Version;

pub const LOG_DIR: &str = "_delta_log";
pub const LAST_CHECKPOINT_FILE: &str = "_last_checkpoint";

/// 20-digit zero-padded version, the only encoding the log recognizes.
pub fn commit_file_name(version: Version) -> String {
    format!("{version:020}.json")
}

pub fn single_part_checkpoint_file_name(version: Version) -> String {
    format!("{version:020}.checkpoint.parquet")
}

pub fn multi_part_checkpoint_file_name(version: Version, part: u32, total: u32) -> String {
    format!("{version:020}.checkpoint.{part:010}.{total:010}.parquet")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFileKind {
    Commit,
    SinglePartCheckpoint,
    MultiPartCheckpoint { part: u32, total: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLogPath {
    pub version: Version,
    pub kind: LogFileKind,
    pub file_name: String,
}

impl ParsedLogPath {
    /// Parse a bare file name (no directory component) under `_delta_log/`.
    /// Returns `None` for anything that doesn't match a recognized pattern
    /// (e.g. `_last_checkpoint`, a `.crc` file, or junk) — such entries are
    /// simply ignored for version discovery.
    pub fn parse(file_name: &str) -> Option<Self> {
        if let Some(stem) = file_name.strip_suffix(".json") {
            let version = parse_20_digit(stem)?;
            return Some(ParsedLogPath {
                version,
                kind: LogFileKind::Commit,
                file_name: file_name.to_string(),
            });
        }

        if let Some(stem) = file_name.strip_suffix(".checkpoint.parquet") {
            let version = parse_20_digit(stem)?;
            return Some(ParsedLogPath {
                version,
                kind: LogFileKind::SinglePartCheckpoint,
                file_name: file_name.to_string(),
            });
        }

        if let Some(stem) = file_name.strip_suffix(".parquet") {
            // <version>.checkpoint.<part>.<total>
            let mut parts = stem.rsplitn(4, '.');
            let total: u32 = parts.next()?.parse().ok()?;
            let part: u32 = parts.next()?.parse().ok()?;
            let checkpoint_tag = parts.next()?;
            if checkpoint_tag != "checkpoint" {
                return None;
            }
            let version_str = parts.next()?;
            let version = parse_20_digit(version_str)?;
            if part == 0 || total == 0 || part > total {
                return None;
            }
            return Some(ParsedLogPath {
                version,
                kind: LogFileKind::MultiPartCheckpoint { part, total },
                file_name: file_name.to_string(),
            });
        }

        None
    }

    pub fn is_commit(&self) -> bool {
        matches!(self.kind, LogFileKind::Commit)
    }

    pub fn is_checkpoint(&self) -> bool {
        !self.is_commit()
    }
}

fn parse_20_digit(s: &str) -> Option<Version> {
    if s.len() != 20 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<Version>().ok()
}

pub fn log_root(table_root: &StorePath) -> StorePath {
    table_root.child(LOG_DIR)
}

pub fn commit_path(table_root: &StorePath, version: Version) -> StorePath {
    log_root(table_root).child(commit_file_name(version))
}

pub fn last_checkpoint_path(table_root: &StorePath) -> StorePath {
    log_root(table_root).child(LAST_CHECKPOINT_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commit_file() {
        let p = ParsedLogPath::parse("00000000000000000001.json").unwrap();
        assert_eq!(p.version, 1);
        assert_eq!(p.kind, LogFileKind::Commit);
    }

    #[test]
    fn parses_single_part_checkpoint() {
        let p = ParsedLogPath::parse("00000000000000000009.checkpoint.parquet").unwrap();
        assert_eq!(p.version, 9);
        assert_eq!(p.kind, LogFileKind::SinglePartCheckpoint);
    }

    #[test]
    fn parses_multi_part_checkpoint() {
        let p =
            ParsedLogPath::parse("00000000000000000009.checkpoint.0000000001.0000000003.parquet")
                .unwrap();
        assert_eq!(p.version, 9);
        assert_eq!(
            p.kind,
            LogFileKind::MultiPartCheckpoint { part: 1, total: 3 }
        );
    }

    #[test]
    fn ignores_unrelated_files() {
        assert!(ParsedLogPath::parse("_last_checkpoint").is_none());
        assert!(ParsedLogPath::parse("00000000000000000001.crc").is_none());
        assert!(ParsedLogPath::parse("notes.txt").is_none());
        // too few digits
        assert!(ParsedLogPath::parse("001.json").is_none());
    }

    #[test]
    fn commit_file_name_is_20_digit_zero_padded() {
        assert_eq!(commit_file_name(0), "00000000000000000000.json");
        assert_eq!(commit_file_name(42), "00000000000000000042.json");
    }
}
