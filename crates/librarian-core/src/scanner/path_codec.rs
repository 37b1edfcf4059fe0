//! Staging-file encoding for paths that are not valid UTF-8.
//!
//! UTF-8 paths are written as-is. Anything else, and any UTF-8 path that
//! happens to start with the marker, is written as `hex:` followed by the
//! raw bytes so the original path can be rebuilt exactly.

use serde::{Deserialize, Deserializer, Serializer};
use std::path::{Path, PathBuf};

const HEX_MARKER: &str = "hex:";

pub fn encode(path: &Path) -> String {
    match path.to_str() {
        Some(text) if !text.starts_with(HEX_MARKER) => text.to_string(),
        _ => {
            let bytes = raw_bytes(path);
            let mut out = String::with_capacity(HEX_MARKER.len() + bytes.len() * 2);
            out.push_str(HEX_MARKER);
            for byte in bytes.iter() {
                out.push_str(&format!("{:02x}", byte));
            }
            out
        }
    }
}

pub fn decode(text: &str) -> Result<PathBuf, String> {
    let Some(hex) = text.strip_prefix(HEX_MARKER) else {
        return Ok(PathBuf::from(text));
    };
    if hex.len() % 2 != 0 {
        return Err(format!("odd-length encoded path: {}", text));
    }
    let bytes = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
        .collect::<Result<Vec<u8>, _>>()
        .map_err(|e| format!("bad encoded path {}: {}", text, e))?;
    Ok(from_raw_bytes(bytes))
}

#[cfg(unix)]
fn raw_bytes(path: &Path) -> std::borrow::Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    std::borrow::Cow::Borrowed(path.as_os_str().as_bytes())
}

#[cfg(not(unix))]
fn raw_bytes(path: &Path) -> std::borrow::Cow<'_, [u8]> {
    std::borrow::Cow::Owned(path.to_string_lossy().into_owned().into_bytes())
}

#[cfg(unix)]
fn from_raw_bytes(bytes: Vec<u8>) -> PathBuf {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;
    PathBuf::from(OsString::from_vec(bytes))
}

#[cfg(not(unix))]
fn from_raw_bytes(bytes: Vec<u8>) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn serialize<S: Serializer>(path: &Path, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&encode(path))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PathBuf, D::Error> {
    let text = String::deserialize(deserializer)?;
    decode(&text).map_err(serde::de::Error::custom)
}
