//! Binary shard codecs — v2 key-keyed and v3 compact postings.
//!
//! A shard file's first byte is its format version. All multi-byte integers
//! are big-endian.
//!
//! # v2 — key-keyed
//!
//! ```text
//! u8  version = 2
//! u32 entryCount
//! entryCount × {
//!   u16 keyLen; keyLen bytes   (typed: 0x30 <utf8> | 0x21 <f64-be>)
//!   u16 docIdLen; docIdLen bytes
//!   u32 rowGroup
//!   u32 rowOffset
//! }
//! ```
//!
//! Range shards store entries sorted by key; hash shards are unordered.
//!
//! # v3 — compact postings
//!
//! Used when the whole shard pins a single key (the key lives in the
//! manifest, not the file):
//!
//! ```text
//! u8  version = 3
//! u8  flags                    (bit 0: a u32 key hash follows the header)
//! u32 entryCount
//! [u32 keyHash]
//! entryCount × { u16 docIdLen; docIdLen bytes; u32 rowGroup; u32 rowOffset }
//! ```
//!
//! Unknown versions, key-type prefixes, and flag bits are hard errors. An
//! empty shard is just the header (`entryCount = 0`) and decodes to an empty
//! entry list.

use std::cmp::Ordering;
use std::fmt;

/// v2 key type prefix for UTF-8 strings.
const KEY_TYPE_STRING: u8 = 0x30;
/// v2 key type prefix for non-negative float64 values.
const KEY_TYPE_NUMBER: u8 = 0x21;

/// v3 flag bit: a u32 key hash follows the header.
const FLAG_HAS_KEY_HASH: u8 = 0x01;
const KNOWN_FLAGS: u8 = FLAG_HAS_KEY_HASH;

// ---------------------------------------------------------------------------
// ShardError
// ---------------------------------------------------------------------------

/// Errors from shard encoding or decoding.
#[derive(Debug, PartialEq)]
pub enum ShardError {
    /// The version byte is neither 2 nor 3.
    UnsupportedVersion(u8),

    /// A v2 key carried an unknown type prefix.
    UnknownKeyType(u8),

    /// A v3 header carried flag bits this decoder does not know.
    UnknownFlags(u8),

    /// The file ended mid-record.
    Truncated {
        /// What was being read when the bytes ran out.
        context: &'static str,
    },

    /// A decoded string was not valid UTF-8.
    InvalidUtf8 {
        context: &'static str,
    },

    /// A number key failed validation (negative, NaN).
    InvalidNumberKey(f64),
}

impl fmt::Display for ShardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedVersion(v) => {
                write!(f, "unsupported shard version {v} (expected 2 or 3)")
            }
            Self::UnknownKeyType(t) => write!(f, "unknown shard key type prefix 0x{t:02x}"),
            Self::UnknownFlags(flags) => write!(f, "unknown shard flag bits 0x{flags:02x}"),
            Self::Truncated { context } => write!(f, "shard truncated while reading {context}"),
            Self::InvalidUtf8 { context } => write!(f, "shard {context} is not valid UTF-8"),
            Self::InvalidNumberKey(n) => {
                write!(f, "number key {n} is not encodable (must be finite and non-negative)")
            }
        }
    }
}

impl std::error::Error for ShardError {}

// ---------------------------------------------------------------------------
// ShardKey
// ---------------------------------------------------------------------------

/// A typed index key.
///
/// Ordering is total: numbers sort before strings, numbers compare by
/// `total_cmp`, strings lexicographically by bytes.
#[derive(Clone, Debug, PartialEq)]
pub enum ShardKey {
    /// A non-negative float64.
    Num(f64),
    /// A UTF-8 string.
    Str(String),
}

impl Eq for ShardKey {}

impl PartialOrd for ShardKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ShardKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Num(a), Self::Num(b)) => a.total_cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Num(_), Self::Str(_)) => Ordering::Less,
            (Self::Str(_), Self::Num(_)) => Ordering::Greater,
        }
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl ShardKey {
    /// Encode the typed key bytes (prefix + payload).
    ///
    /// # Errors
    /// `InvalidNumberKey` for negative or non-finite numbers.
    pub fn encode(&self) -> Result<Vec<u8>, ShardError> {
        match self {
            Self::Str(s) => {
                let mut out = Vec::with_capacity(1 + s.len());
                out.push(KEY_TYPE_STRING);
                out.extend_from_slice(s.as_bytes());
                Ok(out)
            }
            Self::Num(n) => {
                if !n.is_finite() || *n < 0.0 {
                    return Err(ShardError::InvalidNumberKey(*n));
                }
                let mut out = Vec::with_capacity(9);
                out.push(KEY_TYPE_NUMBER);
                out.extend_from_slice(&n.to_be_bytes());
                Ok(out)
            }
        }
    }

    /// Decode typed key bytes (prefix + payload).
    ///
    /// # Errors
    /// `UnknownKeyType` for any prefix other than `0x30`/`0x21`;
    /// `Truncated`/`InvalidUtf8` for malformed payloads.
    pub fn decode(bytes: &[u8]) -> Result<Self, ShardError> {
        let (&prefix, payload) = bytes.split_first().ok_or(ShardError::Truncated {
            context: "key type prefix",
        })?;
        match prefix {
            KEY_TYPE_STRING => {
                let s = std::str::from_utf8(payload)
                    .map_err(|_| ShardError::InvalidUtf8 { context: "string key" })?;
                Ok(Self::Str(s.to_owned()))
            }
            KEY_TYPE_NUMBER => {
                let raw: [u8; 8] = payload.try_into().map_err(|_| ShardError::Truncated {
                    context: "number key payload",
                })?;
                Ok(Self::Num(f64::from_be_bytes(raw)))
            }
            other => Err(ShardError::UnknownKeyType(other)),
        }
    }
}

/// FNV-1a 32-bit hash of a key's encoded form — the optional v3 header hash.
#[must_use]
pub fn key_hash(key: &ShardKey) -> u32 {
    let bytes = match key {
        ShardKey::Str(s) => s.as_bytes().to_vec(),
        ShardKey::Num(n) => n.to_be_bytes().to_vec(),
    };
    let mut hash: u32 = 0x811c_9dc5;
    for b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// One posting: where a document's row lives in the columnar data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Posting {
    /// The document id.
    pub doc_id: String,
    /// Row group within the columnar file.
    pub row_group: u32,
    /// Row offset within the group.
    pub row_offset: u32,
}

/// One v2 entry: a typed key plus its posting.
#[derive(Clone, Debug, PartialEq)]
pub struct ShardEntry {
    /// The indexed key.
    pub key: ShardKey,
    /// Where the row lives.
    pub posting: Posting,
}

/// A decoded shard file.
#[derive(Clone, Debug, PartialEq)]
pub enum DecodedShard {
    /// v2: entries carry their keys.
    Keyed(Vec<ShardEntry>),
    /// v3: one implicit key for the whole shard.
    Postings {
        /// The optional header key hash.
        key_hash: Option<u32>,
        /// The postings.
        entries: Vec<Posting>,
    },
}

impl DecodedShard {
    /// Number of entries, either form.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Keyed(entries) => entries.len(),
            Self::Postings { entries, .. } => entries.len(),
        }
    }

    /// Whether the shard holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize, context: &'static str) -> Result<&'a [u8], ShardError> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.bytes.len());
        match end {
            Some(end) => {
                let slice = &self.bytes[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(ShardError::Truncated { context }),
        }
    }

    fn u8(&mut self, context: &'static str) -> Result<u8, ShardError> {
        Ok(self.take(1, context)?[0])
    }

    fn u16(&mut self, context: &'static str) -> Result<u16, ShardError> {
        let raw: [u8; 2] = self.take(2, context)?.try_into().unwrap_or([0; 2]);
        Ok(u16::from_be_bytes(raw))
    }

    fn u32(&mut self, context: &'static str) -> Result<u32, ShardError> {
        let raw: [u8; 4] = self.take(4, context)?.try_into().unwrap_or([0; 4]);
        Ok(u32::from_be_bytes(raw))
    }
}

fn read_posting(cursor: &mut Cursor<'_>) -> Result<Posting, ShardError> {
    let doc_id_len = cursor.u16("docIdLen")? as usize;
    let doc_id = std::str::from_utf8(cursor.take(doc_id_len, "docId")?)
        .map_err(|_| ShardError::InvalidUtf8 { context: "docId" })?
        .to_owned();
    let row_group = cursor.u32("rowGroup")?;
    let row_offset = cursor.u32("rowOffset")?;
    Ok(Posting {
        doc_id,
        row_group,
        row_offset,
    })
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Decode a shard file of either supported version.
///
/// # Errors
/// `UnsupportedVersion` for any version byte other than 2 or 3; format
/// errors per the module docs.
pub fn decode(bytes: &[u8]) -> Result<DecodedShard, ShardError> {
    let mut cursor = Cursor::new(bytes);
    match cursor.u8("version")? {
        2 => decode_v2_body(&mut cursor).map(DecodedShard::Keyed),
        3 => decode_v3_body(&mut cursor),
        other => Err(ShardError::UnsupportedVersion(other)),
    }
}

fn decode_v2_body(cursor: &mut Cursor<'_>) -> Result<Vec<ShardEntry>, ShardError> {
    let entry_count = cursor.u32("entryCount")? as usize;
    let mut entries = Vec::with_capacity(entry_count.min(1 << 20));
    for _ in 0..entry_count {
        let key_len = cursor.u16("keyLen")? as usize;
        let key = ShardKey::decode(cursor.take(key_len, "key")?)?;
        let posting = read_posting(cursor)?;
        entries.push(ShardEntry { key, posting });
    }
    Ok(entries)
}

fn decode_v3_body(cursor: &mut Cursor<'_>) -> Result<DecodedShard, ShardError> {
    let flags = cursor.u8("flags")?;
    if flags & !KNOWN_FLAGS != 0 {
        return Err(ShardError::UnknownFlags(flags));
    }
    let entry_count = cursor.u32("entryCount")? as usize;
    let key_hash = if flags & FLAG_HAS_KEY_HASH != 0 {
        Some(cursor.u32("keyHash")?)
    } else {
        None
    };
    let mut entries = Vec::with_capacity(entry_count.min(1 << 20));
    for _ in 0..entry_count {
        entries.push(read_posting(cursor)?);
    }
    Ok(DecodedShard::Postings { key_hash, entries })
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Encode a v2 key-keyed shard. Range shards must pass entries pre-sorted
/// by key; hash shards may pass any order.
///
/// # Errors
/// Key encoding failures (`InvalidNumberKey`).
pub fn encode_v2(entries: &[ShardEntry]) -> Result<Vec<u8>, ShardError> {
    let mut out = Vec::new();
    out.push(2u8);
    out.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    for entry in entries {
        let key = entry.key.encode()?;
        out.extend_from_slice(&(key.len() as u16).to_be_bytes());
        out.extend_from_slice(&key);
        write_posting(&mut out, &entry.posting);
    }
    Ok(out)
}

/// Encode a v3 compact-postings shard for a single implicit key.
#[must_use]
pub fn encode_v3(key_hash: Option<u32>, entries: &[Posting]) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(3u8);
    out.push(if key_hash.is_some() { FLAG_HAS_KEY_HASH } else { 0 });
    out.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    if let Some(hash) = key_hash {
        out.extend_from_slice(&hash.to_be_bytes());
    }
    for posting in entries {
        write_posting(&mut out, posting);
    }
    out
}

fn write_posting(out: &mut Vec<u8>, posting: &Posting) {
    out.extend_from_slice(&(posting.doc_id.len() as u16).to_be_bytes());
    out.extend_from_slice(posting.doc_id.as_bytes());
    out.extend_from_slice(&posting.row_group.to_be_bytes());
    out.extend_from_slice(&posting.row_offset.to_be_bytes());
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn posting(doc_id: &str, row_group: u32, row_offset: u32) -> Posting {
        Posting {
            doc_id: doc_id.to_owned(),
            row_group,
            row_offset,
        }
    }

    fn entry(key: ShardKey, doc_id: &str) -> ShardEntry {
        ShardEntry {
            key,
            posting: posting(doc_id, 0, 0),
        }
    }

    // -- round trips --

    #[test]
    fn v2_string_keys_round_trip() {
        let entries = vec![
            entry(ShardKey::Str("alice".to_owned()), "users/u1"),
            entry(ShardKey::Str("bob".to_owned()), "users/u2"),
        ];
        let bytes = encode_v2(&entries).unwrap();
        assert_eq!(bytes[0], 2);
        assert_eq!(decode(&bytes).unwrap(), DecodedShard::Keyed(entries));
    }

    #[test]
    fn v2_number_keys_round_trip() {
        let entries = vec![
            entry(ShardKey::Num(0.0), "a"),
            entry(ShardKey::Num(42.5), "b"),
            entry(ShardKey::Num(1e9), "c"),
        ];
        let bytes = encode_v2(&entries).unwrap();
        assert_eq!(decode(&bytes).unwrap(), DecodedShard::Keyed(entries));
    }

    #[test]
    fn v3_round_trip_with_key_hash() {
        let postings = vec![posting("p1", 0, 3), posting("p2", 1, 7)];
        let hash = key_hash(&ShardKey::Str("published".to_owned()));
        let bytes = encode_v3(Some(hash), &postings);
        assert_eq!(bytes[0], 3);
        assert_eq!(
            decode(&bytes).unwrap(),
            DecodedShard::Postings {
                key_hash: Some(hash),
                entries: postings
            }
        );
    }

    #[test]
    fn v3_round_trip_without_key_hash() {
        let postings = vec![posting("p1", 0, 0)];
        let bytes = encode_v3(None, &postings);
        assert_eq!(
            decode(&bytes).unwrap(),
            DecodedShard::Postings {
                key_hash: None,
                entries: postings
            }
        );
    }

    // -- empty shards --

    #[test]
    fn empty_v2_shard_is_five_bytes_and_decodes() {
        let bytes = encode_v2(&[]).unwrap();
        assert_eq!(bytes.len(), 5);
        assert!(decode(&bytes).unwrap().is_empty());
    }

    #[test]
    fn bare_five_byte_header_decodes_empty() {
        // Some writers emit only the header for empty shards.
        let bytes = [2u8, 0, 0, 0, 0];
        assert!(decode(&bytes).unwrap().is_empty());
    }

    #[test]
    fn empty_v3_shard_decodes() {
        let bytes = encode_v3(None, &[]);
        assert_eq!(bytes.len(), 6);
        assert!(decode(&bytes).unwrap().is_empty());
    }

    // -- hard errors --

    #[test]
    fn unknown_version_is_rejected() {
        for version in [0u8, 1, 4, 9, 255] {
            let bytes = [version, 0, 0, 0, 0];
            assert_eq!(
                decode(&bytes).unwrap_err(),
                ShardError::UnsupportedVersion(version)
            );
        }
    }

    #[test]
    fn unknown_key_type_prefix_is_rejected() {
        // One entry whose key has prefix 0x99.
        let mut bytes = vec![2u8, 0, 0, 0, 1];
        bytes.extend_from_slice(&2u16.to_be_bytes());
        bytes.extend_from_slice(&[0x99, 0x01]);
        bytes.extend_from_slice(&1u16.to_be_bytes());
        bytes.push(b'x');
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());
        assert_eq!(decode(&bytes).unwrap_err(), ShardError::UnknownKeyType(0x99));
    }

    #[test]
    fn unknown_flag_bits_are_rejected() {
        let bytes = [3u8, 0x82, 0, 0, 0, 0];
        assert_eq!(decode(&bytes).unwrap_err(), ShardError::UnknownFlags(0x82));
    }

    #[test]
    fn truncated_entry_is_rejected() {
        let mut bytes = encode_v2(&[entry(ShardKey::Str("k".to_owned()), "doc")]).unwrap();
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(
            decode(&bytes).unwrap_err(),
            ShardError::Truncated { .. }
        ));
    }

    #[test]
    fn empty_input_is_truncated() {
        assert!(matches!(
            decode(&[]).unwrap_err(),
            ShardError::Truncated { .. }
        ));
    }

    #[test]
    fn negative_number_key_rejected_on_encode() {
        let err = ShardKey::Num(-1.0).encode().unwrap_err();
        assert_eq!(err, ShardError::InvalidNumberKey(-1.0));
    }

    // -- ordering --

    #[test]
    fn key_ordering_is_total() {
        let mut keys = vec![
            ShardKey::Str("b".to_owned()),
            ShardKey::Num(10.0),
            ShardKey::Str("a".to_owned()),
            ShardKey::Num(2.0),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                ShardKey::Num(2.0),
                ShardKey::Num(10.0),
                ShardKey::Str("a".to_owned()),
                ShardKey::Str("b".to_owned()),
            ]
        );
    }

    #[test]
    fn key_hash_is_deterministic() {
        let k = ShardKey::Str("status".to_owned());
        assert_eq!(key_hash(&k), key_hash(&k));
        assert_ne!(key_hash(&k), key_hash(&ShardKey::Str("other".to_owned())));
    }

    #[test]
    fn big_endian_layout_spot_check() {
        let bytes = encode_v2(&[entry(ShardKey::Str("ab".to_owned()), "d")]).unwrap();
        // entryCount = 1, big-endian, right after the version byte.
        assert_eq!(&bytes[1..5], &[0, 0, 0, 1]);
        // keyLen = 3 (prefix + "ab").
        assert_eq!(&bytes[5..7], &[0, 3]);
        assert_eq!(bytes[7], 0x30);
    }
}
