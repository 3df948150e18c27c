//! The journaled document: in-memory state plus its crash protocol
//!
//! All mutations serialize on one mutation lock and follow the mandated
//! order: frame the command, write it to the mapped stream, apply it to the
//! in-memory document, append it to the in-memory journal. The stream is
//! the source of truth: a crash after the stream write replays the command
//! on the next recovery even though the caller never saw it applied.
//!
//! Reads never take the mutation lock; they resolve against the concurrent
//! document containers.

use blackbox_core::{path, Command, Result, StoreError, Value, SENTINEL};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::journal::Journal;
use crate::recovery;
use crate::snapshot;
use crate::stream::MappedStream;

pub(crate) const SNAPSHOT_SUFFIX: &str = ".snapshot";
pub(crate) const SNAPSHOT_NEW_SUFFIX: &str = ".snapshot.new";
pub(crate) const JOURNAL_SUFFIX: &str = ".journal";

/// Default journal capacity in bytes.
pub const DEFAULT_CAPACITY: usize = 128 * 1024;

/// Append a suffix to a base path (`mydoc` -> `mydoc.snapshot`).
pub(crate) fn derived_path(base: &Path, suffix: &str) -> PathBuf {
    let mut os = base.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

/// Construction parameters for a [`JournaledDocument`].
#[derive(Clone, Debug)]
pub struct DocumentOptions {
    pub base_path: PathBuf,
    pub type_tag: String,
    pub version: u32,
    pub capacity: usize,
    pub high_water: usize,
}

impl DocumentOptions {
    /// Options with the default capacity and a high-water mark at 3/4 of it.
    pub fn new(base_path: impl Into<PathBuf>, type_tag: impl Into<String>, version: u32) -> Self {
        Self {
            base_path: base_path.into(),
            type_tag: type_tag.into(),
            version,
            capacity: DEFAULT_CAPACITY,
            high_water: DEFAULT_CAPACITY / 4 * 3,
        }
    }

    /// Override the journal capacity; the high-water mark follows at 3/4.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self.high_water = capacity / 4 * 3;
        self
    }

    /// Override the high-water mark.
    pub fn with_high_water(mut self, high_water: usize) -> Self {
        self.high_water = high_water;
        self
    }
}

struct Inner {
    journal: Journal,
    stream: Option<MappedStream>,
}

/// A live document with an append-only command journal and a periodically
/// materialized snapshot.
///
/// State machine: `Open -> Closed`. Only `Open` accepts mutations; `Closed`
/// is terminal.
pub struct JournaledDocument {
    root: Value,
    inner: Mutex<Inner>,
    stream_used: Arc<AtomicUsize>,
    closed: AtomicBool,
    base_path: PathBuf,
    snapshot_path: PathBuf,
    snapshot_new_path: PathBuf,
    journal_path: PathBuf,
    high_water: usize,
}

impl JournaledDocument {
    /// Construct from an initial map, deep-copying it into concurrent
    /// containers, and immediately seal the first snapshot.
    pub fn new(options: DocumentOptions, initial: &serde_json::Value) -> Result<Self> {
        if !initial.is_object() {
            return Err(StoreError::fatal("initial document must be a map"));
        }
        Self::with_root(options, Value::from_json(initial))
    }

    /// Construct by recovering the last consistent state from disk.
    pub fn resume(options: DocumentOptions) -> Result<Self> {
        let root =
            recovery::load_document(&options.base_path, &options.type_tag, options.version)?;
        Self::with_root(options, root)
    }

    fn with_root(options: DocumentOptions, root: Value) -> Result<Self> {
        if options.high_water > options.capacity {
            return Err(StoreError::fatal(format!(
                "high-water mark {} exceeds capacity {}",
                options.high_water, options.capacity
            )));
        }
        if let Some(parent) = options.base_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let journal_path = derived_path(&options.base_path, JOURNAL_SUFFIX);
        let stream = MappedStream::create(&journal_path, options.capacity, SENTINEL)?;
        let stream_used = stream.used_handle();

        let doc = Self {
            root,
            inner: Mutex::new(Inner {
                journal: Journal::new(options.type_tag, options.version),
                stream: Some(stream),
            }),
            stream_used,
            closed: AtomicBool::new(false),
            snapshot_path: derived_path(&options.base_path, SNAPSHOT_SUFFIX),
            snapshot_new_path: derived_path(&options.base_path, SNAPSHOT_NEW_SUFFIX),
            journal_path,
            base_path: options.base_path,
            high_water: options.high_water,
        };
        doc.snapshot()?;
        Ok(doc)
    }

    /// Apply one `(path, value)` mutation.
    ///
    /// The command hits the stream before memory. If the stream is full the
    /// document snapshots (which empties the stream) and retries exactly
    /// once; a command that cannot fit an empty journal is fatal.
    pub fn add_command(&self, path: &str, value: impl Into<Value>) -> Result<()> {
        let command = Command::new(path, value)?;
        let frame = command.to_frame()?;

        let mut guard = self.inner.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }

        let first_try = guard
            .stream
            .as_mut()
            .ok_or(StoreError::Closed)?
            .write(&frame);
        if let Err(err) = first_try {
            if !err.is_overflow() {
                return Err(err);
            }
            tracing::debug!(
                bytes = frame.len(),
                "journal stream full, snapshotting before retry"
            );
            self.snapshot_locked(&mut guard)?;
            guard
                .stream
                .as_mut()
                .ok_or(StoreError::Closed)?
                .write(&frame)
                .map_err(|err| match err {
                    StoreError::BufferOverflow {
                        requested,
                        remaining,
                    } => StoreError::fatal(format!(
                        "command of {requested} bytes cannot fit an empty journal \
                         ({remaining} bytes free)"
                    )),
                    other => other,
                })?;
        }

        command.apply(&self.root)?;
        guard.journal.add(command);
        Ok(())
    }

    /// Atomically replace the on-disk snapshot with the current document
    /// and reset the journal.
    pub fn snapshot(&self) -> Result<()> {
        let mut guard = self.inner.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        self.snapshot_locked(&mut guard)
    }

    /// Snapshot if the stream has crossed the high-water mark.
    ///
    /// The probe reads a shared counter without the mutation lock, then
    /// rechecks under it. Returns whether a snapshot was taken.
    pub fn snapshot_if_high_water(&self) -> Result<bool> {
        if self.stream_used.load(Ordering::Acquire) < self.high_water {
            return Ok(false);
        }
        let mut guard = self.inner.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        let used = guard.stream.as_ref().ok_or(StoreError::Closed)?.used();
        if used < self.high_water {
            return Ok(false);
        }
        self.snapshot_locked(&mut guard)?;
        Ok(true)
    }

    /// Seal a final snapshot, mark the document closed, and release the
    /// mapped stream. Idempotent; all later mutations fail with `Closed`.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.inner.lock();
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.snapshot_locked(&mut guard)?;
        self.closed.store(true, Ordering::Release);
        if let Some(stream) = guard.stream.take() {
            stream.close()?;
        }
        tracing::debug!(path = %self.base_path.display(), "document closed");
        Ok(())
    }

    fn snapshot_locked(&self, inner: &mut Inner) -> Result<()> {
        // Any failure before the rename leaves the previous snapshot and
        // the live journal untouched
        snapshot::write_document(&self.snapshot_new_path, &self.root)?;

        inner.journal.clear();
        let header = inner.journal.header_frame()?;
        let stream = inner.stream.as_mut().ok_or(StoreError::Closed)?;
        stream.clear();
        stream.write(&header).map_err(|err| match err {
            StoreError::BufferOverflow { requested, .. } => StoreError::fatal(format!(
                "journal capacity cannot hold the {requested}-byte header"
            )),
            other => other,
        })?;

        std::fs::rename(&self.snapshot_new_path, &self.snapshot_path)
            .map_err(|e| StoreError::fatal(format!("snapshot rename failed: {e}")))?;
        tracing::debug!(path = %self.snapshot_path.display(), "snapshot sealed");
        Ok(())
    }

    /// Resolve a path against the live document. Returns a deep copy so
    /// callers cannot alias interior containers.
    pub fn get(&self, path: &str) -> Result<Option<Value>> {
        let directives = path::parse(path)?;
        Ok(path::resolve(&self.root, &directives).map(|v| v.deep_clone()))
    }

    /// Number of top-level entries.
    pub fn len(&self) -> usize {
        self.root.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Top-level keys, weakly consistent under concurrent mutation.
    pub fn keys(&self) -> Vec<String> {
        match self.root.as_map() {
            Some(map) => map.iter().map(|entry| entry.key().clone()).collect(),
            None => Vec::new(),
        }
    }

    /// The whole document as JSON.
    pub fn contents(&self) -> Result<serde_json::Value> {
        self.root.to_json()
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Bytes currently used in the journal stream.
    pub fn stream_used(&self) -> usize {
        self.stream_used.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// True if a document (snapshot or unrenamed snapshot) exists at `base`.
    pub fn document_exists(base: &Path) -> bool {
        derived_path(base, SNAPSHOT_SUFFIX).exists()
            || derived_path(base, SNAPSHOT_NEW_SUFFIX).exists()
    }

    /// Recover the last consistent document at `base` as JSON, without
    /// constructing a live document.
    pub fn load_document_contents(
        base: &Path,
        type_tag: &str,
        version: u32,
    ) -> Result<serde_json::Value> {
        recovery::load_document(base, type_tag, version)?.to_json()
    }
}

impl Drop for JournaledDocument {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            tracing::warn!(
                path = %self.base_path.display(),
                "journaled document dropped without close; releasing stream"
            );
            if let Some(stream) = self.inner.lock().stream.take() {
                let _ = stream.close();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn options(dir: &TempDir) -> DocumentOptions {
        DocumentOptions::new(dir.path().join("doc"), "blackbox state", 2)
    }

    #[test]
    fn test_construction_seals_initial_snapshot() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let doc = JournaledDocument::new(options(&dir), &json!({"seed": 1}))?;

        let base = dir.path().join("doc");
        assert!(JournaledDocument::document_exists(&base));
        assert!(derived_path(&base, SNAPSHOT_SUFFIX).exists());
        assert!(!derived_path(&base, SNAPSHOT_NEW_SUFFIX).exists());

        let journal_bytes = std::fs::read(derived_path(&base, JOURNAL_SUFFIX))?;
        assert_eq!(journal_bytes.len(), DEFAULT_CAPACITY);
        doc.close()?;
        Ok(())
    }

    #[test]
    fn test_add_command_and_get() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let doc = JournaledDocument::new(options(&dir), &json!({}))?;

        doc.add_command("a.b.c", 1i64)?;
        assert_eq!(doc.contents()?, json!({"a": {"b": {"c": 1}}}));
        assert_eq!(doc.get("a.b.c")?, Some(Value::Int(1)));
        assert_eq!(doc.get("a.missing")?, None);
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.keys(), vec!["a".to_string()]);
        doc.close()?;
        Ok(())
    }

    #[test]
    fn test_rejects_non_map_initial() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            JournaledDocument::new(options(&dir), &json!([1, 2])),
            Err(StoreError::Fatal(_))
        ));
    }

    #[test]
    fn test_closed_is_terminal() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let doc = JournaledDocument::new(options(&dir), &json!({}))?;
        doc.close()?;
        doc.close()?; // idempotent

        assert!(doc.is_closed());
        assert!(matches!(
            doc.add_command("a", 1i64),
            Err(StoreError::Closed)
        ));
        assert!(matches!(doc.snapshot(), Err(StoreError::Closed)));
        assert!(matches!(
            doc.snapshot_if_high_water(),
            Err(StoreError::Closed)
        ));
        // Reads still work
        assert_eq!(doc.contents()?, json!({}));
        Ok(())
    }

    #[test]
    fn test_snapshot_resets_journal_and_stream() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let doc = JournaledDocument::new(options(&dir), &json!({}))?;
        let header_len = doc.stream_used();

        doc.add_command("k", "v")?;
        assert!(doc.stream_used() > header_len);

        doc.snapshot()?;
        assert_eq!(doc.stream_used(), header_len);
        assert!(!derived_path(dir.path().join("doc").as_path(), SNAPSHOT_NEW_SUFFIX).exists());
        doc.close()?;
        Ok(())
    }

    #[test]
    fn test_overflow_snapshots_once_and_retries() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let opts = options(&dir).with_capacity(256);
        let doc = JournaledDocument::new(opts, &json!({}))?;
        let header_len = doc.stream_used();

        let big = "x".repeat(90);
        doc.add_command("slot.a", big.as_str())?;
        doc.add_command("slot.b", big.as_str())?;
        // Third command overflows the 256-byte stream; the document must
        // snapshot and land the command in the emptied journal
        doc.add_command("slot.c", big.as_str())?;

        assert!(doc.stream_used() > header_len);
        assert!(doc.stream_used() < 256);
        assert_eq!(
            doc.get("slot.c")?,
            Some(Value::Str(big.clone()))
        );
        doc.close()?;
        Ok(())
    }

    #[test]
    fn test_oversized_command_is_fatal() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let opts = options(&dir).with_capacity(128);
        let doc = JournaledDocument::new(opts, &json!({}))?;

        let huge = "x".repeat(256);
        assert!(matches!(
            doc.add_command("slot", huge.as_str()),
            Err(StoreError::Fatal(_))
        ));
        doc.close()?;
        Ok(())
    }

    #[test]
    fn test_high_water_double_check() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let opts = options(&dir).with_capacity(512).with_high_water(128);
        let doc = JournaledDocument::new(opts, &json!({}))?;

        assert!(!doc.snapshot_if_high_water()?);

        let filler = "y".repeat(100);
        doc.add_command("fill", filler.as_str())?;
        assert!(doc.stream_used() >= 128);
        assert!(doc.snapshot_if_high_water()?);
        assert!(!doc.snapshot_if_high_water()?);
        doc.close()?;
        Ok(())
    }

    #[test]
    fn test_invalid_path_mutates_nothing() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let doc = JournaledDocument::new(options(&dir), &json!({"keep": 1}))?;
        let used = doc.stream_used();

        assert!(matches!(
            doc.add_command("bad\\", 1i64),
            Err(StoreError::InvalidPath { .. })
        ));
        assert_eq!(doc.contents()?, json!({"keep": 1}));
        assert_eq!(doc.stream_used(), used);
        doc.close()?;
        Ok(())
    }
}
