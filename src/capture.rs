//! Turning capture bytes into text plus the metadata the file name carries.

use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16_LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16_BE_BOM: &[u8] = &[0xFE, 0xFF];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid UTF-8 at byte {offset}")]
    InvalidUtf8 { offset: usize },
    #[error("UTF-16 payload has odd length {len}")]
    OddUtf16Length { len: usize },
    #[error("invalid UTF-16 surrogate sequence")]
    InvalidUtf16,
}

/// Lowercase hex SHA-256 of the raw capture bytes.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

/// Decodes a capture honoring a UTF-8 or UTF-16 byte-order mark; anything
/// without a BOM must be valid UTF-8.
pub fn decode_capture(bytes: &[u8]) -> Result<String, DecodeError> {
    if let Some(rest) = bytes.strip_prefix(UTF8_BOM) {
        return decode_utf8(rest, UTF8_BOM.len());
    }
    if let Some(rest) = bytes.strip_prefix(UTF16_LE_BOM) {
        return decode_utf16(rest, u16::from_le_bytes);
    }
    if let Some(rest) = bytes.strip_prefix(UTF16_BE_BOM) {
        return decode_utf16(rest, u16::from_be_bytes);
    }
    decode_utf8(bytes, 0)
}

fn decode_utf8(bytes: &[u8], base: usize) -> Result<String, DecodeError> {
    String::from_utf8(bytes.to_vec()).map_err(|err| DecodeError::InvalidUtf8 {
        offset: base + err.utf8_error().valid_up_to(),
    })
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Result<String, DecodeError> {
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::OddUtf16Length { len: bytes.len() });
    }
    let units = bytes
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect::<Vec<_>>();
    String::from_utf16(&units).map_err(|_| DecodeError::InvalidUtf16)
}

/// Device name implied by a `{device}_{yyyymmdd}[_{hhmm}].log` file name.
/// Without a trailing stamp the whole stem is used.
pub fn device_from_file_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?.trim();
    let name = match split_stamp(stem) {
        Some((device, _)) => device,
        None => stem,
    };
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Collection time implied by the file name stamp, read as UTC.
pub fn timestamp_from_file_name(path: &Path) -> Option<DateTime<Utc>> {
    let stem = path.file_stem()?.to_str()?;
    let (_, stamp) = split_stamp(stem)?;
    Some(stamp.and_utc())
}

fn split_stamp(stem: &str) -> Option<(&str, NaiveDateTime)> {
    let (head, last) = stem.rsplit_once('_')?;
    if is_digits(last, 4) {
        if let Some((device, date)) = head.rsplit_once('_') {
            if is_digits(date, 8) {
                let date = NaiveDate::parse_from_str(date, "%Y%m%d").ok()?;
                let time = NaiveTime::parse_from_str(last, "%H%M").ok()?;
                return Some((device, date.and_time(time)));
            }
        }
    }
    if is_digits(last, 8) {
        let date = NaiveDate::parse_from_str(last, "%Y%m%d").ok()?;
        return Some((head, date.and_time(NaiveTime::MIN)));
    }
    None
}

fn is_digits(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|byte| byte.is_ascii_digit())
}
