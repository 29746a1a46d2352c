//! LSNP frame codec: newline-delimited `KEY: VALUE` text frames.
//!
//! A frame is one or more `KEY: VALUE` lines separated by `\n`, terminated
//! by a blank line. `KEY` is uppercase ASCII with underscores; `VALUE` is the
//! remainder of the line after the first `": "`. Every frame carries a
//! `TYPE` field naming one of the variants below; an unrecognized `TYPE` is
//! logged and dropped by the dispatcher, not here.

use std::fmt;

/// A decoded frame: an ordered map of field name to raw string value.
///
/// Fields are kept in insertion order so re-encoding a frame that was only
/// partially modified reproduces a stable byte layout; `HashMap` would
/// scramble it. Lookups still need to be fast, so in practice callers use
/// `[Frame::get]`/`Frame::get_or_default` rather than iterating.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    fields: Vec<(String, String)>,
}

#[derive(Debug)]
pub enum CodecError {
    MissingType,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::MissingType => write!(f, "frame has no TYPE field"),
        }
    }
}

impl std::error::Error for CodecError {}

impl Frame {
    pub fn new(msg_type: &str) -> Self {
        let mut frame = Frame::default();
        frame.set("TYPE", msg_type);
        frame
    }

    /// Sets a field, overwriting any previous value for the same key.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        if let Some(existing) = self.fields.iter_mut().find(|(k, _)| k == key) {
            existing.1 = value;
        } else {
            self.fields.push((key.to_string(), value));
        }
        self
    }

    /// Returns the value for `key`, or `""` if absent — missing keys decode
    /// as empty strings per the wire format's lazy-parse rule.
    pub fn get(&self, key: &str) -> &str {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }

    pub fn has(&self, key: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == key)
    }

    pub fn type_field(&self) -> &str {
        self.get("TYPE")
    }

    /// Parses a numeric field, returning `None` if missing or malformed.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).parse().ok()
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).parse().ok()
    }

    /// Serializes the frame to its wire form, terminator included.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = String::new();
        for (key, value) in &self.fields {
            out.push_str(key);
            out.push_str(": ");
            out.push_str(value);
            out.push('\n');
        }
        out.push('\n');
        out.into_bytes()
    }

    /// Parses a frame from raw bytes. Non-UTF8 input and lines without a
    /// `": "` separator are tolerated by being skipped, matching spec.md's
    /// "ignore lines without it" rule. Returns `MissingType` if no `TYPE`
    /// field was found among the surviving lines.
    pub fn decode(data: &[u8]) -> Result<Frame, CodecError> {
        let text = String::from_utf8_lossy(data);
        let mut frame = Frame::default();

        for line in text.split('\n') {
            if line.is_empty() {
                continue;
            }
            if let Some(idx) = line.find(": ") {
                let key = &line[..idx];
                let value = &line[idx + 2..];
                if key.is_empty() || !key.chars().all(|c| c.is_ascii_uppercase() || c == '_') {
                    continue;
                }
                frame.set(key, value);
            }
        }

        if !frame.has("TYPE") {
            return Err(CodecError::MissingType);
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_fields() {
        let mut frame = Frame::new("DM");
        frame
            .set("FROM", "alice@10.0.0.2")
            .set("TO", "bob@10.0.0.3")
            .set("CONTENT", "hello")
            .set("MESSAGE_ID", "abc123");

        let encoded = frame.encode();
        let decoded = Frame::decode(&encoded).unwrap();

        assert_eq!(decoded.type_field(), "DM");
        assert_eq!(decoded.get("FROM"), "alice@10.0.0.2");
        assert_eq!(decoded.get("TO"), "bob@10.0.0.3");
        assert_eq!(decoded.get("CONTENT"), "hello");
        assert_eq!(decoded.get("MESSAGE_ID"), "abc123");
    }

    #[test]
    fn missing_keys_decode_as_empty() {
        let frame = Frame::new("PING");
        assert_eq!(frame.get("USER_ID"), "");
    }

    #[test]
    fn decode_requires_type_field() {
        let data = b"FROM: alice@10.0.0.2\n\n";
        assert!(matches!(Frame::decode(data), Err(CodecError::MissingType)));
    }

    #[test]
    fn decode_ignores_lines_without_separator() {
        let data = b"TYPE: PING\nthis line is garbage\nUSER_ID: alice@10.0.0.2\n\n";
        let frame = Frame::decode(data).unwrap();
        assert_eq!(frame.type_field(), "PING");
        assert_eq!(frame.get("USER_ID"), "alice@10.0.0.2");
    }

    #[test]
    fn encode_preserves_insertion_order() {
        let mut frame = Frame::new("PROFILE");
        frame.set("USER_ID", "alice@10.0.0.2");
        frame.set("DISPLAY_NAME", "Alice");

        let encoded = String::from_utf8(frame.encode()).unwrap();
        let type_pos = encoded.find("TYPE").unwrap();
        let user_pos = encoded.find("USER_ID").unwrap();
        let name_pos = encoded.find("DISPLAY_NAME").unwrap();
        assert!(type_pos < user_pos);
        assert!(user_pos < name_pos);
    }

    #[test]
    fn overwriting_a_field_keeps_its_original_position() {
        let mut frame = Frame::new("POST");
        frame.set("CONTENT", "first");
        frame.set("TIMESTAMP", "1");
        frame.set("CONTENT", "second");

        let encoded = String::from_utf8(frame.encode()).unwrap();
        let content_pos = encoded.find("CONTENT").unwrap();
        let ts_pos = encoded.find("TIMESTAMP").unwrap();
        assert!(content_pos < ts_pos);
        assert_eq!(frame.get("CONTENT"), "second");
    }
}
