//! Minimal ASN.1 DER encoder.
//!
//! Only the primitives needed to build an X.509 certificate by hand are
//! provided. Every function returns a complete TLV (tag, length, value) so
//! that the results can be nested freely with [`sequence`] and [`set`].

use time::OffsetDateTime;

use crate::{CryptoError, error::result::CryptoResult};

pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_BIT_STRING: u8 = 0x03;
pub const TAG_NULL: u8 = 0x05;
pub const TAG_OID: u8 = 0x06;
pub const TAG_UTF8_STRING: u8 = 0x0C;
pub const TAG_PRINTABLE_STRING: u8 = 0x13;
pub const TAG_UTC_TIME: u8 = 0x17;
pub const TAG_GENERALIZED_TIME: u8 = 0x18;
pub const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_SET: u8 = 0x31;
const TAG_CONTEXT_CONSTRUCTED: u8 = 0xA0;

/// Encode a definite length.
///
/// Lengths below 128 use the short form, others the long form with the
/// minimal number of length octets.
#[must_use]
pub fn encode_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        #[expect(clippy::cast_possible_truncation)]
        return vec![len as u8];
    }
    let bytes = len.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    let significant = &bytes[first..];
    let mut out = Vec::with_capacity(significant.len() + 1);
    #[expect(clippy::cast_possible_truncation)]
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
    out
}

/// Build a TLV from a tag and its content octets
#[must_use]
pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let length = encode_length(content.len());
    let mut out = Vec::with_capacity(1 + length.len() + content.len());
    out.push(tag);
    out.extend_from_slice(&length);
    out.extend_from_slice(content);
    out
}

fn constructed(tag: u8, elements: &[&[u8]]) -> Vec<u8> {
    let content: Vec<u8> = elements.iter().flat_map(|e| e.iter().copied()).collect();
    tlv(tag, &content)
}

/// `SEQUENCE { elements... }`, elements being already encoded TLVs
#[must_use]
pub fn sequence(elements: &[&[u8]]) -> Vec<u8> {
    constructed(TAG_SEQUENCE, elements)
}

/// `SET { elements... }`.
///
/// DER requires the elements of a SET OF to be sorted by their encoding;
/// the certificate names only ever use single-element sets.
#[must_use]
pub fn set(elements: &[&[u8]]) -> Vec<u8> {
    let mut sorted: Vec<&[u8]> = elements.to_vec();
    sorted.sort_unstable();
    constructed(TAG_SET, &sorted)
}

/// Context specific, constructed, explicitly tagged value: `[n] EXPLICIT`
#[must_use]
pub fn explicit(tag_number: u8, inner: &[u8]) -> Vec<u8> {
    tlv(TAG_CONTEXT_CONSTRUCTED | (tag_number & 0x1F), inner)
}

#[must_use]
pub fn null() -> Vec<u8> {
    vec![TAG_NULL, 0x00]
}

/// Encode unsigned big-endian magnitude bytes as a positive INTEGER.
///
/// Leading zero octets are stripped and a single zero octet is prepended when
/// the most significant bit is set, so that the value is never read back as
/// negative.
#[must_use]
pub fn positive_integer(magnitude: &[u8]) -> Vec<u8> {
    let first = magnitude
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(magnitude.len());
    let trimmed = &magnitude[first..];
    let mut content = Vec::with_capacity(trimmed.len() + 1);
    if trimmed.first().is_none_or(|b| b & 0x80 != 0) {
        content.push(0x00);
    }
    content.extend_from_slice(trimmed);
    tlv(TAG_INTEGER, &content)
}

/// Encode a small non-negative integer
#[must_use]
pub fn small_integer(value: u64) -> Vec<u8> {
    positive_integer(&value.to_be_bytes())
}

/// Encode already-packed OID content octets (e.g. `55 04 03` for `commonName`).
#[must_use]
pub fn oid_from_content(content: &[u8]) -> Vec<u8> {
    tlv(TAG_OID, content)
}

/// Encode an OID from its arcs, e.g. `[2, 5, 4, 3]`.
pub fn oid(arcs: &[u64]) -> CryptoResult<Vec<u8>> {
    let (first, second, rest) = match arcs {
        [first, second, rest @ ..] => (*first, *second, rest),
        _ => {
            return Err(CryptoError::Encoding(
                "an OID needs at least two arcs".to_owned(),
            ));
        }
    };
    if first > 2 || (first < 2 && second >= 40) {
        return Err(CryptoError::Encoding(format!(
            "invalid leading OID arcs {first}.{second}"
        )));
    }
    let mut content = Vec::new();
    push_base128(&mut content, first * 40 + second);
    for arc in rest {
        push_base128(&mut content, *arc);
    }
    Ok(oid_from_content(&content))
}

fn push_base128(out: &mut Vec<u8>, mut value: u64) {
    let mut groups = vec![];
    loop {
        #[expect(clippy::cast_possible_truncation)]
        groups.push((value & 0x7F) as u8);
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    let last = groups.len() - 1;
    for (i, group) in groups.iter().rev().enumerate() {
        out.push(if i == last { *group } else { group | 0x80 });
    }
}

/// Whether every character belongs to the ASN.1 `PrintableString` alphabet
#[must_use]
pub fn is_printable(value: &str) -> bool {
    value.chars().all(|c| {
        c.is_ascii_alphanumeric()
            || matches!(
                c,
                ' ' | '\'' | '(' | ')' | '+' | ',' | '-' | '.' | '/' | ':' | '=' | '?'
            )
    })
}

/// Encode a `PrintableString`; fails on characters outside its alphabet
pub fn printable_string(value: &str) -> CryptoResult<Vec<u8>> {
    if !is_printable(value) {
        return Err(CryptoError::Encoding(format!(
            "'{value}' contains characters not allowed in a PrintableString"
        )));
    }
    Ok(tlv(TAG_PRINTABLE_STRING, value.as_bytes()))
}

#[must_use]
pub fn utf8_string(value: &str) -> Vec<u8> {
    tlv(TAG_UTF8_STRING, value.as_bytes())
}

/// Encode a directory string value, preferring `PrintableString`
#[must_use]
pub fn directory_string(value: &str) -> Vec<u8> {
    printable_string(value).unwrap_or_else(|_| utf8_string(value))
}

/// Encode a `UTCTime` as `YYMMDDHHMMSSZ`.
///
/// `UTCTime` only covers the years 1950 to 2049.
pub fn utc_time(at: OffsetDateTime) -> CryptoResult<Vec<u8>> {
    let at = at.to_offset(time::UtcOffset::UTC);
    let year = at.year();
    if !(1950..2050).contains(&year) {
        return Err(CryptoError::Encoding(format!(
            "year {year} cannot be represented as a UTCTime"
        )));
    }
    let value = format!(
        "{:02}{:02}{:02}{:02}{:02}{:02}Z",
        year % 100,
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        at.second()
    );
    Ok(tlv(TAG_UTC_TIME, value.as_bytes()))
}

/// Encode a `GeneralizedTime` as `YYYYMMDDHHMMSSZ`
#[must_use]
pub fn generalized_time(at: OffsetDateTime) -> Vec<u8> {
    let at = at.to_offset(time::UtcOffset::UTC);
    let value = format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}Z",
        at.year(),
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        at.second()
    );
    tlv(TAG_GENERALIZED_TIME, value.as_bytes())
}

/// X.509 `Time`: `UTCTime` until 2049, `GeneralizedTime` afterwards
#[must_use]
pub fn x509_time(at: OffsetDateTime) -> Vec<u8> {
    utc_time(at).unwrap_or_else(|_| generalized_time(at))
}

/// Encode a `BIT STRING` with no unused bits
#[must_use]
pub fn bit_string(bytes: &[u8]) -> Vec<u8> {
    let mut content = Vec::with_capacity(bytes.len() + 1);
    content.push(0x00);
    content.extend_from_slice(bytes);
    tlv(TAG_BIT_STRING, &content)
}
