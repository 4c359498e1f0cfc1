//! NDJSON transaction log commits: reading and writing `<version>.json`
//! files under `_delta_log/`.

use bytes::Bytes;
use object_store::path::Path as StorePath;

use crate::actions::{validate_actions, LogAction};
use crate::error::{DeltaResult, Error};
use crate::path::{commit_path, log_root, ParsedLogPath};
use crate::storage::{StorageBackend, VersionToken};
use crate::Version;

/// Serializes actions into the NDJSON body of a commit file, enforcing
/// commit-order (Protocol → MetaData → Add/Remove → CommitInfo) and
/// rejecting an empty action list.
pub fn encode_commit(actions: &[LogAction]) -> DeltaResult<Bytes> {
    if actions.is_empty() {
        return Err(Error::invalid_input("a commit must contain at least one action"));
    }
    validate_actions(actions)?;

    let mut ordered: Vec<&LogAction> = actions.iter().collect();
    ordered.sort_by_key(|a| a.order_rank());

    let mut body = String::new();
    for action in ordered {
        let line = serde_json::to_string(action)?;
        body.push_str(&line);
        body.push('\n');
    }
    Ok(Bytes::from(body))
}

/// Parses NDJSON commit file contents into actions. Tolerates CRLF and
/// blank lines on read.
pub fn decode_commit(bytes: &Bytes, path_hint: &str) -> DeltaResult<Vec<LogAction>> {
    let text = std::str::from_utf8(bytes).map_err(|e| Error::Corruption {
        path: path_hint.to_string(),
        reason: format!("commit file is not valid UTF-8: {e}"),
    })?;

    let mut actions = Vec::new();
    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let action: LogAction = serde_json::from_str(line).map_err(|e| Error::Corruption {
            path: path_hint.to_string(),
            reason: format!("invalid action JSON: {e}"),
        })?;
        actions.push(action);
    }
    if actions.is_empty() {
        return Err(Error::Corruption {
            path: path_hint.to_string(),
            reason: "commit file contains no actions".to_string(),
        });
    }
    Ok(actions)
}

/// Attempts to atomically write a new commit at `version`, failing with
/// [`Error::Concurrency`] if a commit already exists there.
pub async fn write_commit(
    storage: &dyn StorageBackend,
    table_root: &StorePath,
    version: Version,
    actions: &[LogAction],
) -> DeltaResult<()> {
    let bytes = encode_commit(actions)?;
    let path = commit_path(table_root, version);
    let result: DeltaResult<VersionToken> =
        storage.write_conditional(&path, bytes, None).await;
    match result {
        Ok(_) => {
            tracing::debug!(version, "committed new version");
            Ok(())
        }
        Err(Error::VersionMismatch { .. }) => {
            let actual = discover_latest_version(storage, table_root).await?;
            // `version` is the target we tried to commit; the version we
            // expected to be the latest before this commit is `version - 1`,
            // or nothing at all if we were attempting the very first commit.
            let expected_version = version.checked_sub(1);
            tracing::warn!(
                expected_version = ?expected_version,
                actual_version = actual,
                "commit lost the race to a concurrent writer"
            );
            Err(Error::Concurrency {
                expected_version,
                actual_version: actual.unwrap_or_else(|| version.saturating_sub(1)),
            })
        }
        Err(e) => Err(e),
    }
}

pub async fn read_commit(
    storage: &dyn StorageBackend,
    table_root: &StorePath,
    version: Version,
) -> DeltaResult<Vec<LogAction>> {
    let path = commit_path(table_root, version);
    let bytes = storage.read(&path).await?;
    decode_commit(&bytes, path.as_ref())
}

/// Lists `_delta_log/` and returns the highest commit version present, or
/// `None` if the log directory has no commit files yet. Gaps in the
/// sequence (0, 2 present, 1 absent) do not block discovery.
pub async fn discover_latest_version(
    storage: &dyn StorageBackend,
    table_root: &StorePath,
) -> DeltaResult<Option<Version>> {
    let root = log_root(table_root);
    let entries = storage.list(&root).await?;
    let latest = entries
        .iter()
        .filter_map(|meta| {
            let file_name = meta.location.filename()?;
            ParsedLogPath::parse(file_name)
        })
        .filter(|p| p.is_commit())
        .map(|p| p.version)
        .max();
    Ok(latest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{CommitInfo, Protocol};

    #[test]
    fn rejects_empty_commit() {
        assert!(encode_commit(&[]).is_err());
    }

    #[test]
    fn enforces_commit_order_on_encode() {
        let actions = vec![
            LogAction::CommitInfo(CommitInfo {
                timestamp: 0,
                operation: "WRITE".to_string(),
                operation_parameters: None,
                read_version: None,
                isolation_level: None,
                is_blind_append: Some(true),
            }),
            LogAction::Protocol(Protocol::default()),
        ];
        let bytes = encode_commit(&actions).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        let first_line = text.lines().next().unwrap();
        assert!(first_line.contains("\"protocol\""));
    }

    #[test]
    fn decode_tolerates_crlf_and_blank_lines() {
        let body = "\r\n{\"protocol\":{\"minReaderVersion\":1,\"minWriterVersion\":2}}\r\n\r\n";
        let actions = decode_commit(&Bytes::from(body), "test").unwrap();
        assert_eq!(actions.len(), 1);
        assert!(actions[0].is_protocol());
    }

    #[test]
    fn decode_rejects_all_blank_commit() {
        let body = "\n\n\r\n";
        assert!(decode_commit(&Bytes::from(body), "test").is_err());
    }
}
