//! Commands and their journal frame encoding
//!
//! A command is the only legal document mutation: a path plus a value. On
//! the wire each command is one ASCII-only JSON object, NUL-terminated:
//!
//! ```text
//! {"<escaped path>":<value>}\0
//! ```
//!
//! Every non-ASCII scalar is `\u`-escaped, so no frame byte is ever >= 0x80
//! and the 0x99 stream sentinel cannot appear inside a frame. Control
//! characters are escaped too, which makes the NUL terminator unambiguous.

use crate::error::{Result, StoreError};
use crate::path::{self, Directives};
use crate::value::Value;

/// Byte filling the unused tail of the journal stream. An invalid UTF-8
/// lead byte, and unreachable by the ASCII-only frame encoding.
pub const SENTINEL: u8 = 0x99;

const TERMINATOR: u8 = 0x00;

/// A single `(path, value)` mutation. A `Null` value deletes.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    path: String,
    directives: Directives,
    value: Value,
}

impl Command {
    /// Create a command, validating the path up front.
    pub fn new(path: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        let path = path.into();
        let directives = path::parse(&path)?;
        Ok(Self {
            path,
            directives,
            value: value.into(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Mutate the document at this command's path.
    pub fn apply(&self, root: &Value) -> Result<()> {
        path::apply(root, &self.path, &self.directives, &self.value)
    }

    /// Encode this command as one self-delimiting frame.
    pub fn to_frame(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.path.len() + 32);
        out.push(b'{');
        encode_string(&mut out, &self.path);
        out.push(b':');
        encode_value(&mut out, &self.value)?;
        out.push(b'}');
        out.push(TERMINATOR);
        Ok(out)
    }

    /// Decode one frame from the front of `buf`.
    ///
    /// Returns the command and the number of bytes consumed, or `None` when
    /// `buf` is empty or starts with the end-of-journal sentinel. A frame
    /// with no terminator, malformed JSON, a shape other than a one-entry
    /// object, or an unparsable path is a corrupt journal.
    pub fn parse_frame(buf: &[u8]) -> Result<Option<(Command, usize)>> {
        if buf.is_empty() || buf[0] == SENTINEL {
            return Ok(None);
        }
        let end = buf
            .iter()
            .position(|&b| b == TERMINATOR)
            .ok_or_else(|| StoreError::corrupt_journal("unterminated frame"))?;
        let json: serde_json::Value = serde_json::from_slice(&buf[..end])
            .map_err(|e| StoreError::corrupt_journal(format!("frame is not valid JSON: {e}")))?;
        let object = json
            .as_object()
            .filter(|o| o.len() == 1)
            .ok_or_else(|| StoreError::corrupt_journal("frame is not a one-entry object"))?;
        let (path, value) = object.iter().next().expect("length checked");
        let command = Command::new(path.clone(), Value::from_json(value))
            .map_err(|e| StoreError::corrupt_journal(format!("frame path invalid: {e}")))?;
        Ok(Some((command, end + 1)))
    }
}

/// Append a JSON string literal, escaping everything outside printable
/// ASCII.
pub fn encode_string(out: &mut Vec<u8>, s: &str) {
    out.push(b'"');
    for c in s.chars() {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            c if (c as u32) < 0x20 || (c as u32) == 0x7f => {
                out.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
            }
            c if c.is_ascii() => out.push(c as u8),
            c => {
                // One escape per UTF-16 unit; astral characters become a
                // surrogate pair
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.extend_from_slice(format!("\\u{:04x}", unit).as_bytes());
                }
            }
        }
    }
    out.push(b'"');
}

/// Append a JSON value in ASCII-only form. Integers print bare, floats
/// always carry a fraction or exponent, non-finite floats are fatal.
pub fn encode_value(out: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Int(i) => out.extend_from_slice(i.to_string().as_bytes()),
        Value::Float(f) => {
            if !f.is_finite() {
                return Err(StoreError::fatal(format!(
                    "non-finite float {f} is not serializable"
                )));
            }
            let repr = f.to_string();
            out.extend_from_slice(repr.as_bytes());
            if !repr.contains(['.', 'e', 'E']) {
                out.extend_from_slice(b".0");
            }
        }
        Value::Str(s) => encode_string(out, s),
        Value::List(list) => {
            let elems = list.read().clone();
            out.push(b'[');
            for (i, elem) in elems.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                encode_value(out, elem)?;
            }
            out.push(b']');
        }
        Value::Map(map) => {
            out.push(b'{');
            let mut first = true;
            for entry in map.iter() {
                if !first {
                    out.push(b',');
                }
                first = false;
                encode_string(out, entry.key());
                out.push(b':');
                encode_value(out, entry.value())?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}
