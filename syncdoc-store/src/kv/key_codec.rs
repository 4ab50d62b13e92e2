//! Order-preserving composite key encoding.
//!
//! An [`IndexKey`] is a tuple of [`KeyPart`]s. Its encoding compares under
//! plain unsigned byte order exactly like the tuple compares part by part,
//! which is what lets indexes answer range queries with byte-range scans.
//!
//! ```text
//!  part        tag   payload
//!  ─────────── ────  ──────────────────────────────────────────
//!  Bool        0x10  0x00 | 0x01
//!  Number      0x20  f64 bits, sign-flipped, big-endian (8)
//!  Timestamp   0x30  u64 millis, big-endian (8)
//!  Id          0x40  uuid bytes (16)
//!  String      0x50  utf-8, 0x00 escaped as 00 FF, terminated 00 00
//!  Absent      0xFF  (none)
//! ```
//!
//! `Absent` carries the largest tag, so `k ++ [Absent; n]` sorts after
//! every key that starts with `k`.
//!
//! Numbers are `f64`. Integers of up to 32 bits convert with `From`;
//! 64-bit integers go through `TryFrom` and are rejected past
//! [`MAX_EXACT_INTEGER`], where distinct values would share an encoding.

use std::cmp::Ordering;
use std::fmt;
use syncdoc_core::Timestamp;
use uuid::Uuid;

const TAG_BOOL: u8 = 0x10;
const TAG_NUMBER: u8 = 0x20;
const TAG_TIMESTAMP: u8 = 0x30;
const TAG_ID: u8 = 0x40;
const TAG_STRING: u8 = 0x50;
const TAG_ABSENT: u8 = 0xFF;

const ESCAPE: u8 = 0xFF;
const SIGN_BIT: u64 = 0x8000_0000_0000_0000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyCodecError {
    #[error("key ended unexpectedly at byte {0}")]
    UnexpectedEnd(usize),
    #[error("unknown key part tag 0x{tag:02x} at byte {pos}")]
    UnknownTag { tag: u8, pos: usize },
    #[error("invalid string escape at byte {0}")]
    InvalidEscape(usize),
    #[error("string key part is not valid utf-8")]
    InvalidUtf8,
    /// A 64-bit integer outside the range an `f64` holds exactly.
    #[error("integer {0} does not fit a number key part exactly")]
    InexactNumber(String),
}

/// One element of an index key.
#[derive(Debug, Clone)]
pub enum KeyPart {
    Bool(bool),
    Number(f64),
    Timestamp(Timestamp),
    Id(Uuid),
    String(String),
    /// Explicit "no value"; sorts after every concrete value.
    Absent,
}

pub type IndexKey = Vec<KeyPart>;

/// Build an [`IndexKey`] from anything convertible into [`KeyPart`].
///
/// ```ignore
/// let key = index_key![board_id, "open", 3];
/// ```
#[macro_export]
macro_rules! index_key {
    () => { ::std::vec::Vec::<$crate::kv::KeyPart>::new() };
    ($($part:expr),+ $(,)?) => {
        ::std::vec![$($crate::kv::KeyPart::from($part)),+]
    };
}

impl KeyPart {
    fn tag(&self) -> u8 {
        match self {
            KeyPart::Bool(_) => TAG_BOOL,
            KeyPart::Number(_) => TAG_NUMBER,
            KeyPart::Timestamp(_) => TAG_TIMESTAMP,
            KeyPart::Id(_) => TAG_ID,
            KeyPart::String(_) => TAG_STRING,
            KeyPart::Absent => TAG_ABSENT,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, KeyPart::Absent)
    }

    pub fn as_id(&self) -> Option<Uuid> {
        match self {
            KeyPart::Id(id) => Some(*id),
            _ => None,
        }
    }
}

// ─── Ordering ──────────────────────────────────────────────────────

/// Logical order of two parts: by type first, then by value.
pub fn compare_part(a: &KeyPart, b: &KeyPart) -> Ordering {
    match (a, b) {
        (KeyPart::Bool(x), KeyPart::Bool(y)) => x.cmp(y),
        (KeyPart::Number(x), KeyPart::Number(y)) => x.total_cmp(y),
        (KeyPart::Timestamp(x), KeyPart::Timestamp(y)) => x.cmp(y),
        (KeyPart::Id(x), KeyPart::Id(y)) => x.as_bytes().cmp(y.as_bytes()),
        (KeyPart::String(x), KeyPart::String(y)) => x.as_bytes().cmp(y.as_bytes()),
        (KeyPart::Absent, KeyPart::Absent) => Ordering::Equal,
        _ => a.tag().cmp(&b.tag()),
    }
}

/// Lexicographic order of two keys; a proper prefix sorts first.
pub fn compare_key(a: &[KeyPart], b: &[KeyPart]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        match compare_part(x, y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

impl PartialEq for KeyPart {
    fn eq(&self, other: &Self) -> bool {
        compare_part(self, other) == Ordering::Equal
    }
}

impl Eq for KeyPart {}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyPart {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_part(self, other)
    }
}

// ─── Encoding ──────────────────────────────────────────────────────

pub fn encode(parts: &[KeyPart]) -> Vec<u8> {
    let mut out = Vec::with_capacity(parts.len() * 10);
    for part in parts {
        encode_part(&mut out, part);
    }
    out
}

fn encode_part(out: &mut Vec<u8>, part: &KeyPart) {
    out.push(part.tag());
    match part {
        KeyPart::Bool(b) => out.push(u8::from(*b)),
        KeyPart::Number(n) => out.extend_from_slice(&ordered_f64_bytes(*n)),
        KeyPart::Timestamp(ts) => out.extend_from_slice(&ts.as_millis().to_be_bytes()),
        KeyPart::Id(id) => out.extend_from_slice(id.as_bytes()),
        KeyPart::String(s) => push_terminated_bytes(out, s.as_bytes()),
        KeyPart::Absent => {}
    }
}

fn push_terminated_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        if b == 0 {
            out.extend_from_slice(&[0, ESCAPE]);
        } else {
            out.push(b);
        }
    }
    out.extend_from_slice(&[0, 0]);
}

const fn ordered_f64_bytes(value: f64) -> [u8; 8] {
    let bits = value.to_bits();
    let ordered = if bits & SIGN_BIT == 0 {
        bits ^ SIGN_BIT
    } else {
        !bits
    };
    ordered.to_be_bytes()
}

const fn f64_from_ordered(ordered: u64) -> f64 {
    let bits = if ordered & SIGN_BIT != 0 {
        ordered ^ SIGN_BIT
    } else {
        !ordered
    };
    f64::from_bits(bits)
}

// ─── Decoding ──────────────────────────────────────────────────────

pub fn decode(bytes: &[u8]) -> Result<IndexKey, KeyCodecError> {
    let mut parts = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let (part, next) = decode_part(bytes, pos)?;
        parts.push(part);
        pos = next;
    }
    Ok(parts)
}

fn take<const N: usize>(bytes: &[u8], pos: usize) -> Result<[u8; N], KeyCodecError> {
    bytes
        .get(pos..pos + N)
        .and_then(|s| s.try_into().ok())
        .ok_or(KeyCodecError::UnexpectedEnd(bytes.len()))
}

fn decode_part(bytes: &[u8], pos: usize) -> Result<(KeyPart, usize), KeyCodecError> {
    let tag = bytes[pos];
    let body = pos + 1;
    match tag {
        TAG_BOOL => {
            let [b] = take::<1>(bytes, body)?;
            Ok((KeyPart::Bool(b != 0), body + 1))
        }
        TAG_NUMBER => {
            let raw = take::<8>(bytes, body)?;
            Ok((
                KeyPart::Number(f64_from_ordered(u64::from_be_bytes(raw))),
                body + 8,
            ))
        }
        TAG_TIMESTAMP => {
            let raw = take::<8>(bytes, body)?;
            Ok((
                KeyPart::Timestamp(Timestamp(u64::from_be_bytes(raw))),
                body + 8,
            ))
        }
        TAG_ID => {
            let raw = take::<16>(bytes, body)?;
            Ok((KeyPart::Id(Uuid::from_bytes(raw)), body + 16))
        }
        TAG_STRING => {
            let (raw, next) = read_terminated_bytes(bytes, body)?;
            let s = String::from_utf8(raw).map_err(|_| KeyCodecError::InvalidUtf8)?;
            Ok((KeyPart::String(s), next))
        }
        TAG_ABSENT => Ok((KeyPart::Absent, body)),
        tag => Err(KeyCodecError::UnknownTag { tag, pos }),
    }
}

fn read_terminated_bytes(bytes: &[u8], mut pos: usize) -> Result<(Vec<u8>, usize), KeyCodecError> {
    let mut out = Vec::new();
    loop {
        let b = *bytes
            .get(pos)
            .ok_or(KeyCodecError::UnexpectedEnd(bytes.len()))?;
        if b != 0 {
            out.push(b);
            pos += 1;
            continue;
        }
        match bytes.get(pos + 1) {
            Some(0) => return Ok((out, pos + 2)),
            Some(&ESCAPE) => {
                out.push(0);
                pos += 2;
            }
            Some(_) => return Err(KeyCodecError::InvalidEscape(pos)),
            None => return Err(KeyCodecError::UnexpectedEnd(bytes.len())),
        }
    }
}

// ─── Conversions ───────────────────────────────────────────────────

impl From<bool> for KeyPart {
    fn from(v: bool) -> Self {
        KeyPart::Bool(v)
    }
}

impl From<f64> for KeyPart {
    fn from(v: f64) -> Self {
        KeyPart::Number(v)
    }
}

/// Largest integer magnitude a number key part represents exactly.
pub const MAX_EXACT_INTEGER: u64 = 1 << 53;

macro_rules! number_from {
    ($($t:ty),*) => {
        $(impl From<$t> for KeyPart {
            fn from(v: $t) -> Self {
                KeyPart::Number(f64::from(v))
            }
        })*
    };
}

number_from!(f32, i8, i16, i32, u8, u16, u32);

// Wider integers would round to the same f64 and collide in an index.
macro_rules! number_try_from {
    ($($t:ty),*) => {
        $(impl TryFrom<$t> for KeyPart {
            type Error = KeyCodecError;

            fn try_from(v: $t) -> Result<Self, KeyCodecError> {
                let magnitude = i128::from(v).unsigned_abs();
                if magnitude > u128::from(MAX_EXACT_INTEGER) {
                    return Err(KeyCodecError::InexactNumber(v.to_string()));
                }
                Ok(KeyPart::Number(v as f64))
            }
        })*
    };
}

number_try_from!(i64, u64);

impl TryFrom<usize> for KeyPart {
    type Error = KeyCodecError;

    fn try_from(v: usize) -> Result<Self, KeyCodecError> {
        let v = u64::try_from(v).map_err(|_| KeyCodecError::InexactNumber(v.to_string()))?;
        KeyPart::try_from(v)
    }
}

impl From<Timestamp> for KeyPart {
    fn from(v: Timestamp) -> Self {
        KeyPart::Timestamp(v)
    }
}

impl From<Uuid> for KeyPart {
    fn from(v: Uuid) -> Self {
        KeyPart::Id(v)
    }
}

impl From<&str> for KeyPart {
    fn from(v: &str) -> Self {
        KeyPart::String(v.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(v: String) -> Self {
        KeyPart::String(v)
    }
}

impl From<&String> for KeyPart {
    fn from(v: &String) -> Self {
        KeyPart::String(v.clone())
    }
}

impl<T: Into<KeyPart>> From<Option<T>> for KeyPart {
    fn from(v: Option<T>) -> Self {
        v.map_or(KeyPart::Absent, Into::into)
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Bool(b) => write!(f, "{b}"),
            KeyPart::Number(n) => write!(f, "{n}"),
            KeyPart::Timestamp(ts) => write!(f, "{ts}"),
            KeyPart::Id(id) => write!(f, "{id}"),
            KeyPart::String(s) => write!(f, "{s:?}"),
            KeyPart::Absent => f.write_str("absent"),
        }
    }
}

/// Render a key as `[a, "b", absent]`.
pub fn display_key(parts: &[KeyPart]) -> String {
    let inner: Vec<String> = parts.iter().map(ToString::to_string).collect();
    format!("[{}]", inner.join(", "))
}
