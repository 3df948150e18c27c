//! Snapshot I/O: JSON serialization of the document root
//!
//! The writer produces the file in a single write + sync + close. It never
//! renames; the atomic swap from `*.snapshot.new` to `*.snapshot` belongs
//! to the document, which owns the crash protocol.

use blackbox_core::{Result, StoreError, Value};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Serialize `doc` to `path` as canonical JSON.
///
/// Fails with `Fatal` on unserializable values (non-finite floats) before
/// anything is written.
pub fn write_document(path: &Path, doc: &Value) -> Result<()> {
    let json = doc.to_json()?;
    if !json.is_object() {
        return Err(StoreError::fatal(format!(
            "document root must be a map, got {}",
            doc.kind()
        )));
    }
    let bytes = serde_json::to_vec(&json)
        .map_err(|e| StoreError::fatal(format!("snapshot serialization failed: {e}")))?;

    let mut file = File::create(path)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    Ok(())
}

/// Deserialize a document from `path`.
///
/// A file that is unreadable is an `Io` error; bytes that are not a JSON
/// object are a `CorruptSnapshot`.
pub fn read_document(path: &Path) -> Result<Value> {
    let bytes = std::fs::read(path)?;
    let json: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| {
        StoreError::corrupt_snapshot(format!("{}: {e}", path.display()))
    })?;
    if !json.is_object() {
        return Err(StoreError::corrupt_snapshot(format!(
            "{}: root is not an object",
            path.display()
        )));
    }
    Ok(Value::from_json(&json))
}
