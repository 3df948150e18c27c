//! Crash recovery: reconstruct the last consistent document from disk
//!
//! The loader is total whenever a snapshot exists. Preference order:
//! a completed-but-unrenamed snapshot, then the sealed snapshot with the
//! journal replayed on top, then the sealed snapshot alone. Journal damage
//! of any kind downgrades to snapshot-only recovery and is logged, never
//! surfaced.

use blackbox_core::{Result, Value};
use std::path::Path;

use crate::document::{derived_path, JOURNAL_SUFFIX, SNAPSHOT_NEW_SUFFIX, SNAPSHOT_SUFFIX};
use crate::journal::Journal;
use crate::snapshot;

/// Load the best valid document for `base`.
///
/// Fails only when no readable snapshot exists at all.
pub fn load_document(base: &Path, expected_tag: &str, expected_version: u32) -> Result<Value> {
    let snapshot_new_path = derived_path(base, SNAPSHOT_NEW_SUFFIX);
    let snapshot_path = derived_path(base, SNAPSHOT_SUFFIX);
    let journal_path = derived_path(base, JOURNAL_SUFFIX);

    // A snapshot.new that deserializes cleanly is a finished serialize that
    // crashed before its rename; the journal it superseded is already
    // folded in
    if snapshot_new_path.exists() {
        match snapshot::read_document(&snapshot_new_path) {
            Ok(doc) => {
                tracing::info!(
                    path = %snapshot_new_path.display(),
                    "recovered from unrenamed snapshot"
                );
                return Ok(doc);
            }
            Err(err) => {
                tracing::warn!(
                    path = %snapshot_new_path.display(),
                    error = %err,
                    "ignoring partial snapshot"
                );
            }
        }
    }

    let doc = snapshot::read_document(&snapshot_path)?;

    let journal_bytes = match std::fs::read(&journal_path) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(
                path = %journal_path.display(),
                error = %err,
                "journal unreadable, returning snapshot"
            );
            return Ok(doc);
        }
    };

    let journal = match Journal::deserialize(&journal_bytes, expected_tag, expected_version) {
        Ok(journal) => journal,
        Err(err) => {
            tracing::warn!(
                path = %journal_path.display(),
                error = %err,
                "journal corrupt, returning snapshot"
            );
            return Ok(doc);
        }
    };

    // Replay onto a scratch copy so a failing command leaves the snapshot
    // untouched
    let replayed = doc.deep_clone();
    match journal.apply_to(&replayed) {
        Ok(()) => {
            tracing::debug!(commands = journal.len(), "journal replayed");
            Ok(replayed)
        }
        Err(err) => {
            tracing::warn!(error = %err, "journal replay failed, returning snapshot");
            Ok(doc)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blackbox_core::{Command, StoreError, SENTINEL};
    use serde_json::json;
    use tempfile::TempDir;

    const TAG: &str = "blackbox state";
    const VERSION: u32 = 2;

    fn write_snapshot(base: &Path, json: &serde_json::Value) {
        snapshot::write_document(
            &derived_path(base, SNAPSHOT_SUFFIX),
            &Value::from_json(json),
        )
        .unwrap();
    }

    fn write_journal(base: &Path, commands: &[Command], capacity: usize) {
        let mut journal = Journal::new(TAG, VERSION);
        for command in commands {
            journal.add(command.clone());
        }
        let mut bytes = journal.serialize().unwrap();
        assert!(bytes.len() <= capacity);
        bytes.resize(capacity, SENTINEL);
        std::fs::write(derived_path(base, JOURNAL_SUFFIX), bytes).unwrap();
    }

    #[test]
    fn test_snapshot_plus_journal_replay() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let base = dir.path().join("doc");

        write_snapshot(&base, &json!({"counts": {"errors": 1}}));
        write_journal(
            &base,
            &[
                Command::new("counts.errors+", 2i64)?,
                Command::new("app.version", "9.9")?,
            ],
            1024,
        );

        let doc = load_document(&base, TAG, VERSION)?;
        assert_eq!(
            doc.to_json().unwrap(),
            json!({"counts": {"errors": 3}, "app": {"version": "9.9"}})
        );
        Ok(())
    }

    #[test]
    fn test_unrenamed_snapshot_wins() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let base = dir.path().join("doc");

        write_snapshot(&base, &json!({"stale": true}));
        snapshot::write_document(
            &derived_path(&base, SNAPSHOT_NEW_SUFFIX),
            &Value::from_json(&json!({"fresh": true})),
        )?;
        // Journal belongs to the stale snapshot and must not be replayed
        write_journal(&base, &[Command::new("extra", 1i64)?], 512);

        let doc = load_document(&base, TAG, VERSION)?;
        assert_eq!(doc.to_json().unwrap(), json!({"fresh": true}));
        Ok(())
    }

    #[test]
    fn test_partial_unrenamed_snapshot_is_skipped() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let base = dir.path().join("doc");

        write_snapshot(&base, &json!({"good": 1}));
        std::fs::write(derived_path(&base, SNAPSHOT_NEW_SUFFIX), b"{\"trunc")?;
        write_journal(&base, &[], 256);

        let doc = load_document(&base, TAG, VERSION)?;
        assert_eq!(doc.to_json().unwrap(), json!({"good": 1}));
        Ok(())
    }

    #[test]
    fn test_missing_snapshot_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = load_document(&dir.path().join("doc"), TAG, VERSION).unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
    }

    #[test]
    fn test_corrupt_journal_falls_back_to_snapshot() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let base = dir.path().join("doc");

        write_snapshot(&base, &json!({"base": 1}));
        write_journal(&base, &[Command::new("applied", 1i64)?], 512);

        // Truncate the journal mid-frame
        let journal_path = derived_path(&base, JOURNAL_SUFFIX);
        let bytes = std::fs::read(&journal_path)?;
        let cut = bytes.iter().rposition(|&b| b != SENTINEL).unwrap();
        std::fs::write(&journal_path, &bytes[..cut])?;

        let doc = load_document(&base, TAG, VERSION)?;
        assert_eq!(doc.to_json().unwrap(), json!({"base": 1}));
        Ok(())
    }

    #[test]
    fn test_header_mismatch_falls_back_to_snapshot() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let base = dir.path().join("doc");

        write_snapshot(&base, &json!({"base": 1}));
        write_journal(&base, &[Command::new("applied", 1i64)?], 512);

        let doc = load_document(&base, "different product", VERSION)?;
        assert_eq!(doc.to_json().unwrap(), json!({"base": 1}));
        Ok(())
    }

    #[test]
    fn test_failing_replay_returns_snapshot_unmodified() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let base = dir.path().join("doc");

        write_snapshot(&base, &json!({"text": "hello", "n": 1}));
        write_journal(
            &base,
            &[
                Command::new("n+", 1i64)?,
                // Numeric add onto a string fails mid-replay
                Command::new("text+", 1i64)?,
            ],
            512,
        );

        let doc = load_document(&base, TAG, VERSION)?;
        assert_eq!(doc.to_json().unwrap(), json!({"text": "hello", "n": 1}));
        Ok(())
    }

    #[test]
    fn test_missing_journal_returns_snapshot() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let base = dir.path().join("doc");
        write_snapshot(&base, &json!({"only": "snapshot"}));

        let doc = load_document(&base, TAG, VERSION)?;
        assert_eq!(doc.to_json().unwrap(), json!({"only": "snapshot"}));
        Ok(())
    }
}
