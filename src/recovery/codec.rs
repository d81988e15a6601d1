//! Record file codec
//!
//! Canonical JSON is byte-compatible with Python's
//! `json.dumps(obj, sort_keys=True)`: keys sorted at every level, `", "`
//! and `": "` separators, and every non-ASCII character written as a
//! lowercase `\uXXXX` escape (surrogate pairs above the BMP). The digest is
//! taken over the file's own keys, so files written by older tooling, which
//! name the entry map `data`, validate as stored and are read through the
//! `data` alias. Files written here always use `entries`.

use std::io;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::ser::Formatter;
use serde_json::Value;

use super::{Record, RecordType};
use crate::error::{Error, Result};

/// Name of the digest field inside the checksummed record.
pub const CHECKSUM_FIELD: &str = "checksum";

// =============================================================================
// Canonical JSON
// =============================================================================

/// Formatter producing Python-style separators and ASCII-only output.
struct PyCompatFormatter;

impl Formatter for PyCompatFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, w: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            w.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, w: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            w.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, w: &mut W) -> io::Result<()> {
        w.write_all(b": ")
    }

    fn write_string_fragment<W: ?Sized + io::Write>(&mut self, w: &mut W, fragment: &str) -> io::Result<()> {
        let mut rest = fragment;
        while let Some(pos) = rest.find(|c: char| !c.is_ascii()) {
            w.write_all(rest[..pos].as_bytes())?;
            let c = rest[pos..].chars().next().unwrap_or_default();
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                write!(w, "\\u{:04x}", unit)?;
            }
            rest = &rest[pos + c.len_utf8()..];
        }
        w.write_all(rest.as_bytes())
    }
}

/// Serializes a value with object keys sorted, independent of how the
/// underlying map orders them.
struct Sorted<'a>(&'a Value);

impl Serialize for Sorted<'_> {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        match self.0 {
            Value::Object(map) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut out = s.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    out.serialize_entry(key, &Sorted(value))?;
                }
                out.end()
            }
            Value::Array(items) => {
                let mut out = s.serialize_seq(Some(items.len()))?;
                for item in items {
                    out.serialize_element(&Sorted(item))?;
                }
                out.end()
            }
            other => other.serialize(s),
        }
    }
}

/// Canonical text of `value`.
pub fn canonical_json(value: &Value) -> Result<String> {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, PyCompatFormatter);
    Sorted(value).serialize(&mut ser)?;
    // The formatter only ever emits ASCII.
    String::from_utf8(buf).map_err(|e| Error::Config(format!("non-UTF-8 canonical JSON: {e}")))
}

/// Hex MD5 of the canonical text of `value`.
pub fn digest(value: &Value) -> Result<String> {
    Ok(format!("{:x}", md5::compute(canonical_json(value)?.as_bytes())))
}

// =============================================================================
// Encode
// =============================================================================

/// Encode a whole-store value, embedding the digest into `target`.
///
/// `store` must not already carry a checksum anywhere.
pub fn encode(store: &Value, target: &RecordType) -> Result<String> {
    let checksum = digest(store)?;
    let mut stamped = store.clone();
    let record = stamped
        .get_mut(target.as_str())
        .and_then(Value::as_object_mut)
        .ok_or_else(|| Error::NotFound(format!("record type {target}")))?;
    record.insert(CHECKSUM_FIELD.to_string(), Value::String(checksum));
    Ok(STANDARD.encode(canonical_json(&stamped)?))
}

// =============================================================================
// Decode
// =============================================================================

/// A validated record file.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFile {
    /// Type that carried the checksum
    pub record_type: RecordType,
    /// Every record in the file, the checksummed one included
    pub records: Vec<(RecordType, Record)>,
}

fn corrupt(path: &Path, reason: impl Into<String>) -> Error {
    Error::ValidationFailed {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn parse(text: &str) -> Option<Value> {
    serde_json::from_str(text)
        .ok()
        .or_else(|| serde_json::from_str(&text.replace('\'', "\"")).ok())
}

/// Decode and validate record file contents. `path` is only used in errors.
pub fn decode(contents: &str, path: &Path) -> Result<DecodedFile> {
    let bytes = STANDARD
        .decode(contents.trim())
        .map_err(|e| corrupt(path, format!("invalid base64: {e}")))?;
    if !bytes.is_ascii() {
        return Err(corrupt(path, "payload is not ASCII"));
    }
    let text = String::from_utf8(bytes).map_err(|e| corrupt(path, e.to_string()))?;
    let mut value = parse(&text).ok_or_else(|| corrupt(path, "payload is not JSON"))?;

    let top = value
        .as_object_mut()
        .filter(|m| !m.is_empty())
        .ok_or_else(|| corrupt(path, "expected a non-empty JSON object"))?;

    let mut carriers = top
        .iter()
        .filter(|(_, v)| v.get(CHECKSUM_FIELD).is_some())
        .map(|(k, _)| k.clone());
    let tag = match (carriers.next(), carriers.next()) {
        (Some(tag), None) => tag,
        (None, _) => return Err(corrupt(path, "no checksum")),
        (Some(_), Some(_)) => return Err(corrupt(path, "more than one checksum")),
    };

    let stored = top
        .get_mut(&tag)
        .and_then(Value::as_object_mut)
        .and_then(|record| record.remove(CHECKSUM_FIELD))
        .ok_or_else(|| corrupt(path, "no checksum"))?;
    let stored = stored
        .as_str()
        .ok_or_else(|| corrupt(path, "checksum is not a string"))?
        .to_string();

    if digest(&value)? != stored {
        return Err(corrupt(path, "checksum mismatch"));
    }

    let mut records = Vec::new();
    if let Value::Object(top) = value {
        for (key, record) in top {
            let record_type = RecordType::from_tag(&key);
            let record = Record::from_value(&record_type, record)
                .map_err(|e| corrupt(path, format!("bad {key} record: {e}")))?;
            records.push((record_type, record));
        }
    }

    Ok(DecodedFile {
        record_type: RecordType::from_tag(&tag),
        records,
    })
}
