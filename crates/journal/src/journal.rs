//! Ordered command journal with a typed header
//!
//! The journal is the in-memory mirror of what sits in the mapped stream:
//! a `(type_tag, version)` header followed by framed commands. On disk the
//! header is itself a frame keyed by `*`, written before any command, so
//! the whole journal parses with the one frame decoder.

use blackbox_core::{Command, Result, StoreError, Value};

/// Path of the header frame. Real command paths reach the journal only
/// after the header, so the key cannot be confused with a mutation.
pub const HEADER_PATH: &str = "*";

const HEADER_TYPE_KEY: &str = "type";
const HEADER_VERSION_KEY: &str = "version";

/// An ordered list of commands plus the header identifying the document
/// schema they belong to.
#[derive(Clone, Debug)]
pub struct Journal {
    type_tag: String,
    version: u32,
    commands: Vec<Command>,
}

impl Journal {
    /// Create an empty journal for the given schema.
    pub fn new(type_tag: impl Into<String>, version: u32) -> Self {
        Self {
            type_tag: type_tag.into(),
            version,
            commands: Vec::new(),
        }
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Append a command to the in-memory list.
    pub fn add(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Drop all commands.
    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Encode the header as a frame.
    pub fn header_frame(&self) -> Result<Vec<u8>> {
        let header = Value::new_map();
        {
            let map = header.as_map().expect("new_map");
            map.insert(HEADER_TYPE_KEY.into(), Value::Str(self.type_tag.clone()));
            map.insert(HEADER_VERSION_KEY.into(), Value::Int(self.version as i64));
        }
        Command::new(HEADER_PATH, header)?.to_frame()
    }

    /// Encode header plus every command.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = self.header_frame()?;
        for command in &self.commands {
            out.extend_from_slice(&command.to_frame()?);
        }
        Ok(out)
    }

    /// Decode a journal from raw stream bytes.
    ///
    /// The first frame must be a header matching `(expected_tag,
    /// expected_version)`; commands follow until the 0x99 sentinel or the
    /// end of the buffer. Any malformed frame fails the whole decode.
    pub fn deserialize(bytes: &[u8], expected_tag: &str, expected_version: u32) -> Result<Self> {
        let (header, mut offset) = Command::parse_frame(bytes)?
            .ok_or_else(|| StoreError::corrupt_journal("missing journal header"))?;
        if header.path() != HEADER_PATH {
            return Err(StoreError::corrupt_journal(format!(
                "first frame is {:?}, not a header",
                header.path()
            )));
        }
        let (found_tag, found_version) = header_fields(header.value())?;
        if found_tag != expected_tag || found_version != expected_version {
            return Err(StoreError::SchemaMismatch {
                expected_tag: expected_tag.to_owned(),
                expected_version,
                found_tag,
                found_version,
            });
        }

        let mut journal = Journal::new(expected_tag, expected_version);
        while let Some((command, consumed)) = Command::parse_frame(&bytes[offset..])? {
            journal.commands.push(command);
            offset += consumed;
        }
        Ok(journal)
    }

    /// Fold every command over `doc`, in order. The first failing command
    /// aborts the whole apply.
    pub fn apply_to(&self, doc: &Value) -> Result<()> {
        for command in &self.commands {
            command.apply(doc)?;
        }
        Ok(())
    }
}

fn header_fields(value: &Value) -> Result<(String, u32)> {
    let tag = value
        .map_get(HEADER_TYPE_KEY)
        .and_then(|v| v.as_str().map(str::to_owned))
        .ok_or_else(|| StoreError::corrupt_journal("header missing type tag"))?;
    let version = value
        .map_get(HEADER_VERSION_KEY)
        .and_then(|v| v.as_i64())
        .filter(|v| *v >= 0 && *v <= u32::MAX as i64)
        .ok_or_else(|| StoreError::corrupt_journal("header missing version"))?;
    Ok((tag, version as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use blackbox_core::SENTINEL;
    use serde_json::json;

    fn sample_journal() -> Journal {
        let mut journal = Journal::new("blackbox state", 2);
        journal.add(Command::new("app.version", "1.4.2").unwrap());
        journal.add(Command::new("session.events.handled+", 1i64).unwrap());
        journal.add(Command::new("breadcrumbs.", Value::from_json(&json!({"name": "boot"}))).unwrap());
        journal
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() -> Result<()> {
        let journal = sample_journal();
        let mut bytes = journal.serialize()?;
        // Pad with sentinel tail the way the stream leaves it
        bytes.extend_from_slice(&[SENTINEL; 32]);

        let decoded = Journal::deserialize(&bytes, "blackbox state", 2)?;
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded.commands()[0].path(), "app.version");
        assert_eq!(decoded.commands()[2].path(), "breadcrumbs.");
        Ok(())
    }

    #[test]
    fn test_deserialize_stops_at_sentinel() -> Result<()> {
        let mut bytes = sample_journal().serialize()?;
        bytes.push(SENTINEL);
        // Garbage after the sentinel must not be read
        bytes.extend_from_slice(b"not a frame");

        let decoded = Journal::deserialize(&bytes, "blackbox state", 2)?;
        assert_eq!(decoded.len(), 3);
        Ok(())
    }

    #[test]
    fn test_schema_mismatch() -> Result<()> {
        let bytes = sample_journal().serialize()?;
        assert!(matches!(
            Journal::deserialize(&bytes, "blackbox state", 3),
            Err(StoreError::SchemaMismatch { .. })
        ));
        assert!(matches!(
            Journal::deserialize(&bytes, "other product", 2),
            Err(StoreError::SchemaMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_truncated_command_is_corrupt() -> Result<()> {
        let bytes = sample_journal().serialize()?;
        // Drop the final terminator so the last frame is unterminated
        let truncated = &bytes[..bytes.len() - 1];
        assert!(matches!(
            Journal::deserialize(truncated, "blackbox state", 2),
            Err(StoreError::CorruptJournal(_))
        ));
        Ok(())
    }

    #[test]
    fn test_missing_header_is_corrupt() {
        assert!(matches!(
            Journal::deserialize(&[SENTINEL; 4], "blackbox state", 2),
            Err(StoreError::CorruptJournal(_))
        ));
        let frame = Command::new("a", 1i64).unwrap().to_frame().unwrap();
        assert!(matches!(
            Journal::deserialize(&frame, "blackbox state", 2),
            Err(StoreError::CorruptJournal(_))
        ));
    }

    #[test]
    fn test_clear() {
        let mut journal = sample_journal();
        assert!(!journal.is_empty());
        journal.clear();
        assert!(journal.is_empty());
        assert_eq!(journal.type_tag(), "blackbox state");
    }

    #[test]
    fn test_apply_to() -> Result<()> {
        let doc = Value::from_json(&json!({"session": {"events": {"handled": 4}}}));
        sample_journal().apply_to(&doc)?;
        assert_eq!(
            doc.to_json().unwrap(),
            json!({
                "app": {"version": "1.4.2"},
                "session": {"events": {"handled": 5}},
                "breadcrumbs": [{"name": "boot"}]
            })
        );
        Ok(())
    }

    #[test]
    fn test_apply_to_aborts_on_failure() {
        let mut journal = Journal::new("blackbox state", 2);
        journal.add(Command::new("ok", 1i64).unwrap());
        // Numeric add onto a string fails
        journal.add(Command::new("bad+", 1i64).unwrap());

        let doc = Value::from_json(&json!({"bad": "text"}));
        assert!(journal.apply_to(&doc).is_err());
    }
}
