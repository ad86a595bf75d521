//! Custom attribute (CAttrs) codec.
//!
//! Packed format (binary):
//! ```text
//! [0xFF] ( [3 bytes BE: key len][key] [3 bytes BE: value len][value] )*
//! ```
//!
//! The CLI also accepts a shorthand on the command line:
//! `comment: holiday photos | author: me`.

use std::collections::BTreeMap;

use crate::error::{TgboxError, TgboxResult};

/// Arbitrary string-key / byte-value map attached to a file record.
pub type CAttrs = BTreeMap<String, Vec<u8>>;

const PACK_MARKER: u8 = 0xFF;
const LEN_BYTES: usize = 3;
const MAX_FIELD_LEN: usize = (1 << (8 * LEN_BYTES)) - 1;

/// Pack attributes into the binary format.
pub fn pack_cattrs(cattrs: &CAttrs) -> TgboxResult<Vec<u8>> {
    let mut out = vec![PACK_MARKER];
    for (key, value) in cattrs {
        push_field(&mut out, key.as_bytes())?;
        push_field(&mut out, value)?;
    }
    Ok(out)
}

/// Unpack a packed blob. An empty blob is an empty map.
pub fn unpack_cattrs(data: &[u8]) -> TgboxResult<CAttrs> {
    let mut cattrs = CAttrs::new();
    if data.is_empty() {
        return Ok(cattrs);
    }
    if data[0] != PACK_MARKER {
        return Err(TgboxError::CAttrs(format!(
            "bad marker byte 0x{:02x}, expected 0x{PACK_MARKER:02x}",
            data[0]
        )));
    }

    let mut pos = 1;
    while pos < data.len() {
        let key = read_field(data, &mut pos)?;
        let value = read_field(data, &mut pos)?;
        let key = String::from_utf8(key.to_vec())
            .map_err(|e| TgboxError::CAttrs(format!("key is not UTF-8: {e}")))?;
        cattrs.insert(key, value.to_vec());
    }
    Ok(cattrs)
}

/// Parse the `key: value | key2: value2` command-line shorthand.
pub fn parse_cattrs_shorthand(text: &str) -> TgboxResult<CAttrs> {
    let mut cattrs = CAttrs::new();
    for pair in text.split('|') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair
            .split_once(':')
            .ok_or_else(|| TgboxError::CAttrs(format!("expected `key: value`, got `{pair}`")))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(TgboxError::CAttrs(format!("empty key in `{pair}`")));
        }
        cattrs.insert(key.to_string(), value.trim().as_bytes().to_vec());
    }
    Ok(cattrs)
}

/// Accept either a hex-encoded packed blob or the shorthand.
pub fn parse_cattrs_arg(text: &str) -> TgboxResult<CAttrs> {
    let trimmed = text.trim();
    let looks_hex = !trimmed.is_empty()
        && trimmed.len() % 2 == 0
        && trimmed.chars().all(|c| c.is_ascii_hexdigit());

    if looks_hex {
        if let Ok(bytes) = hex::decode(trimmed) {
            if bytes.first() == Some(&PACK_MARKER) {
                return unpack_cattrs(&bytes);
            }
        }
    }
    parse_cattrs_shorthand(trimmed)
}

fn push_field(out: &mut Vec<u8>, field: &[u8]) -> TgboxResult<()> {
    if field.len() > MAX_FIELD_LEN {
        return Err(TgboxError::CAttrs(format!(
            "field too long: {} bytes (max {MAX_FIELD_LEN})",
            field.len()
        )));
    }
    let len = (field.len() as u32).to_be_bytes();
    out.extend_from_slice(&len[1..]);
    out.extend_from_slice(field);
    Ok(())
}

fn read_field<'a>(data: &'a [u8], pos: &mut usize) -> TgboxResult<&'a [u8]> {
    if *pos + LEN_BYTES > data.len() {
        return Err(TgboxError::CAttrs("truncated length prefix".into()));
    }
    let mut len = [0u8; 4];
    len[1..].copy_from_slice(&data[*pos..*pos + LEN_BYTES]);
    let len = u32::from_be_bytes(len) as usize;
    *pos += LEN_BYTES;

    if *pos + len > data.len() {
        return Err(TgboxError::CAttrs(format!(
            "field of {len} bytes overruns blob ({} bytes left)",
            data.len() - *pos
        )));
    }
    let field = &data[*pos..*pos + len];
    *pos += len;
    Ok(field)
}
