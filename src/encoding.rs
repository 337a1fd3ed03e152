/*
Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Node byte format.
//!
//! A node is a plain concatenation of entry records:
//!
//! ```text
//! uvarint total_len        // bytes that follow in this record
//! uvarint backspace        // trailing bytes of the previous key to drop
//! uvarint suffix_len, suffix
//! uvarint value_len, value
//! ```
//!
//! The previous key starts out empty at the beginning of every node, so each node decodes
//! on its own.

use crate::errors::{Error, Result};
use crate::node::Entry;

const MAX_UVARINT_LEN: usize = 10;

pub fn put_uvarint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

pub fn uvarint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Reads a uvarint from the front of `buf`, returning the value and the bytes consumed.
pub fn read_uvarint(buf: &[u8]) -> Result<(u64, usize)> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    for (i, &byte) in buf.iter().enumerate() {
        if i == MAX_UVARINT_LEN {
            return Err(Error::Corruption("uvarint is too long".into()));
        }
        let payload = (byte & 0x7F) as u64;
        if shift == 63 && payload > 1 {
            return Err(Error::Corruption("uvarint overflows u64".into()));
        }
        result |= payload << shift;
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
        shift += 7;
    }
    Err(Error::Corruption("truncated uvarint".into()))
}

fn read_len(buf: &[u8]) -> Result<(usize, usize)> {
    let (value, n) = read_uvarint(buf)?;
    let value = usize::try_from(value)
        .map_err(|_| Error::Corruption(format!("length {} does not fit in memory", value)))?;
    Ok((value, n))
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn body_len(prev_key: &[u8], key: &[u8], value: &[u8]) -> usize {
    let shared = common_prefix(prev_key, key);
    let backspace = prev_key.len() - shared;
    let suffix = key.len() - shared;
    uvarint_len(backspace as u64)
        + uvarint_len(suffix as u64)
        + suffix
        + uvarint_len(value.len() as u64)
        + value.len()
}

/// Returns the number of bytes [`encode_entry`] would append.
pub fn encoded_len(prev_key: &[u8], key: &[u8], value: &[u8]) -> usize {
    let body = body_len(prev_key, key, value);
    uvarint_len(body as u64) + body
}

/// Appends the record for `(key, value)` to `out`, compressing the key against `prev_key`.
pub fn encode_entry(out: &mut Vec<u8>, prev_key: &[u8], key: &[u8], value: &[u8]) {
    let shared = common_prefix(prev_key, key);
    let backspace = prev_key.len() - shared;
    let suffix = &key[shared..];

    put_uvarint(out, body_len(prev_key, key, value) as u64);
    put_uvarint(out, backspace as u64);
    put_uvarint(out, suffix.len() as u64);
    out.extend_from_slice(suffix);
    put_uvarint(out, value.len() as u64);
    out.extend_from_slice(value);
}

/// Decodes the record at the front of `buf`.
///
/// # Arguments
///
/// * `prev_key` - The key of the previous record in the same node, or empty for the first.
/// * `buf` - The remaining bytes of the node.
///
/// # Returns
///
/// The entry and the number of bytes the record occupied. Any inconsistency is reported as
/// [`Error::Corruption`].
pub fn decode_entry(prev_key: &[u8], buf: &[u8]) -> Result<(Entry, usize)> {
    let (total, header) = read_len(buf)?;
    let end = header
        .checked_add(total)
        .filter(|end| *end <= buf.len())
        .ok_or_else(|| {
            Error::Corruption(format!(
                "record of {} bytes is truncated to {}",
                total,
                buf.len() - header
            ))
        })?;
    let body = &buf[header..end];

    let (backspace, mut pos) = read_len(body)?;
    if backspace > prev_key.len() {
        return Err(Error::Corruption(format!(
            "backspace {} exceeds previous key length {}",
            backspace,
            prev_key.len()
        )));
    }
    let suffix = read_field(body, &mut pos, "key suffix")?;
    let value = read_field(body, &mut pos, "value")?;
    if pos != body.len() {
        return Err(Error::Corruption(format!(
            "record has {} trailing bytes",
            body.len() - pos
        )));
    }

    let kept = prev_key.len() - backspace;
    let mut key = Vec::with_capacity(kept + suffix.len());
    key.extend_from_slice(&prev_key[..kept]);
    key.extend_from_slice(suffix);

    Ok((
        Entry {
            key,
            value: value.to_vec(),
        },
        end,
    ))
}

fn read_field<'a>(body: &'a [u8], pos: &mut usize, what: &str) -> Result<&'a [u8]> {
    let (len, n) = read_len(&body[*pos..])?;
    *pos += n;
    let end = pos
        .checked_add(len)
        .filter(|end| *end <= body.len())
        .ok_or_else(|| Error::Corruption(format!("{} of {} bytes is truncated", what, len)))?;
    let field = &body[*pos..end];
    *pos = end;
    Ok(field)
}

/// Decodes every entry of a node.
pub fn decode_node(data: &[u8]) -> Result<Vec<Entry>> {
    let mut entries: Vec<Entry> = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let prev_key = entries.last().map(|e| e.key.as_slice()).unwrap_or(&[]);
        let (entry, n) = decode_entry(prev_key, &data[offset..])?;
        if !entries.is_empty() && entry.key.as_slice() <= prev_key {
            return Err(Error::Corruption("node keys are not increasing".into()));
        }
        entries.push(entry);
        offset += n;
    }
    Ok(entries)
}

/// Encodes a sorted run of entries as one node.
pub fn encode_node(entries: &[Entry]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut prev_key: &[u8] = &[];
    for entry in entries {
        encode_entry(&mut out, prev_key, &entry.key, &entry.value);
        prev_key = &entry.key;
    }
    out
}
