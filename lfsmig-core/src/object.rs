//! Core object model for lfsmig
//!
//! Implements git's content-addressable objects (Blob, Tree, Commit, Tag)
//! with their canonical binary encodings, so that rewritten objects hash to
//! the same identities git itself would compute.

use sha1::{Digest, Sha1};
use std::cmp::Ordering;
use std::fmt;

/// Unique identifier for any stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 20]);

impl ObjectId {
    /// Create a new ObjectId from raw bytes
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// The all-zero identity, used when a task has no real source object
    pub fn zero() -> Self {
        Self([0u8; 20])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Compute the identity git assigns to `data` stored as `kind`
    pub fn for_object(kind: ObjectKind, data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(object_header(kind, data.len() as u64));
        hasher.update(data);
        Self::from_digest(&hasher.finalize())
    }

    /// Convert to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hexadecimal string
    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex_str)?;
        Self::from_slice(&bytes).ok_or(hex::FromHexError::InvalidStringLength)
    }

    pub(crate) fn from_digest(digest: &[u8]) -> Self {
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest[..20]);
        Self(bytes)
    }

    /// Build from a raw 20-byte slice
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 20] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Loose-object header: `"<kind> <len>\0"`
pub fn object_header(kind: ObjectKind, len: u64) -> Vec<u8> {
    format!("{} {}\0", kind.as_str(), len).into_bytes()
}

/// Object type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Commit => "commit",
            ObjectKind::Tree => "tree",
            ObjectKind::Blob => "blob",
            ObjectKind::Tag => "tag",
        }
    }

    pub fn parse(name: &[u8]) -> Option<Self> {
        match name {
            b"commit" => Some(ObjectKind::Commit),
            b"tree" => Some(ObjectKind::Tree),
            b"blob" => Some(ObjectKind::Blob),
            b"tag" => Some(ObjectKind::Tag),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised when an encoded object cannot be decoded
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed {kind}: {reason}")]
pub struct ParseError {
    pub kind: ObjectKind,
    pub reason: String,
}

impl ParseError {
    fn new(kind: ObjectKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

/// Tree entry mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileMode {
    Tree,
    Regular,
    Executable,
    Symlink,
    Gitlink,
}

impl FileMode {
    /// Numeric mode as git writes it
    pub fn bits(&self) -> u32 {
        match self {
            FileMode::Tree => 0o040000,
            FileMode::Regular => 0o100644,
            FileMode::Executable => 0o100755,
            FileMode::Symlink => 0o120000,
            FileMode::Gitlink => 0o160000,
        }
    }

    /// Octal text without leading zeros (`40000`, `100644`, ...)
    pub fn to_octal(&self) -> String {
        format!("{:o}", self.bits())
    }

    /// Parse the octal mode field of a tree entry.
    ///
    /// Old histories carry modes like `100664` or `040000`; they are folded
    /// onto the canonical mode of the same type, so re-encoding normalises them.
    pub fn parse_octal(text: &[u8]) -> Option<Self> {
        if text.is_empty() {
            return None;
        }
        let mut bits: u32 = 0;
        for &c in text {
            if !(b'0'..=b'7').contains(&c) {
                return None;
            }
            bits = bits.checked_mul(8)?.checked_add(u32::from(c - b'0'))?;
        }
        match bits & 0o170000 {
            0o040000 => Some(FileMode::Tree),
            0o100000 if bits & 0o111 != 0 => Some(FileMode::Executable),
            0o100000 => Some(FileMode::Regular),
            0o120000 => Some(FileMode::Symlink),
            0o160000 => Some(FileMode::Gitlink),
            _ => None,
        }
    }

    /// Kind of object an entry with this mode points at
    pub fn object_kind(&self) -> Option<ObjectKind> {
        match self {
            FileMode::Tree => Some(ObjectKind::Tree),
            FileMode::Regular | FileMode::Executable | FileMode::Symlink => Some(ObjectKind::Blob),
            // Submodule commits live in another repository.
            FileMode::Gitlink => None,
        }
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, FileMode::Tree)
    }
}

/// Git's tree ordering: names compare bytewise, a directory compares as if
/// its name ended with `/`.
pub fn canonical_cmp(a_name: &[u8], a_mode: FileMode, b_name: &[u8], b_mode: FileMode) -> Ordering {
    let a_tail: &[u8] = if a_mode.is_tree() { b"/" } else { b"" };
    let b_tail: &[u8] = if b_mode.is_tree() { b"/" } else { b"" };
    a_name
        .iter()
        .chain(a_tail)
        .cmp(b_name.iter().chain(b_tail))
}

/// Directory tree entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: FileMode,
    /// Raw entry name; git does not require names to be UTF-8
    pub name: Vec<u8>,
    pub id: ObjectId,
}

impl TreeEntry {
    pub fn new(mode: FileMode, name: impl Into<Vec<u8>>, id: ObjectId) -> Self {
        Self {
            mode,
            name: name.into(),
            id,
        }
    }

    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

/// Directory object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn new(entries: Vec<TreeEntry>) -> Self {
        Self { entries }
    }

    /// Reorder entries into git's canonical tree order
    pub fn sort_canonical(&mut self) {
        self.entries
            .sort_by(|a, b| canonical_cmp(&a.name, a.mode, &b.name, b.mode));
    }

    /// Encode as `<octal mode> <name>\0<20-byte id>` records, in current order
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.entries.len() * 48);
        for entry in &self.entries {
            out.extend_from_slice(entry.mode.to_octal().as_bytes());
            out.push(b' ');
            out.extend_from_slice(&entry.name);
            out.push(0);
            out.extend_from_slice(entry.id.as_bytes());
        }
        out
    }

    /// Decode the binary tree format
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let mut entries = Vec::new();
        let mut rest = data;
        while !rest.is_empty() {
            let (entry, tail) = parse_tree_entry(rest)?;
            entries.push(entry);
            rest = tail;
        }
        Ok(Self { entries })
    }

    pub fn iter(&self) -> impl Iterator<Item = &TreeEntry> {
        self.entries.iter()
    }
}

/// Parse one tree record, returning it and the unconsumed input
pub(crate) fn parse_tree_entry(data: &[u8]) -> Result<(TreeEntry, &[u8]), ParseError> {
    let space = data
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| ParseError::new(ObjectKind::Tree, "missing mode separator"))?;
    let mode = FileMode::parse_octal(&data[..space]).ok_or_else(|| {
        ParseError::new(
            ObjectKind::Tree,
            format!("invalid mode {:?}", String::from_utf8_lossy(&data[..space])),
        )
    })?;
    let after_mode = &data[space + 1..];
    let nul = after_mode
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| ParseError::new(ObjectKind::Tree, "unterminated entry name"))?;
    let name = after_mode[..nul].to_vec();
    let after_name = &after_mode[nul + 1..];
    if after_name.len() < 20 {
        return Err(ParseError::new(ObjectKind::Tree, "truncated entry id"));
    }
    let id = ObjectId::from_slice(&after_name[..20])
        .ok_or_else(|| ParseError::new(ObjectKind::Tree, "truncated entry id"))?;
    Ok((TreeEntry { mode, name, id }, &after_name[20..]))
}

/// Author / committer / tagger line value: `Name <email> 1234567890 +0200`
///
/// The parsed fields are for inspection only. Encoding writes the original
/// line bytes back untouched, whatever their charset or formatting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Raw name bytes, in the commit's declared encoding
    pub name: Vec<u8>,
    pub email: Vec<u8>,
    /// Seconds since the Unix epoch
    pub time: i64,
    /// Timezone offset in minutes east of UTC
    pub offset_minutes: i32,
    raw: Vec<u8>,
}

impl Signature {
    pub fn new(name: impl Into<Vec<u8>>, email: impl Into<Vec<u8>>, time: i64, offset_minutes: i32) -> Self {
        let name = name.into();
        let email = email.into();
        let sign = if offset_minutes < 0 { '-' } else { '+' };
        let abs = offset_minutes.abs();
        let mut raw = Vec::with_capacity(name.len() + email.len() + 24);
        raw.extend_from_slice(&name);
        raw.extend_from_slice(b" <");
        raw.extend_from_slice(&email);
        raw.extend_from_slice(format!("> {} {}{:02}{:02}", time, sign, abs / 60, abs % 60).as_bytes());
        Self {
            name,
            email,
            time,
            offset_minutes,
            raw,
        }
    }

    /// Parse a signature line. Only `<` and `>` are required; a missing or
    /// malformed timestamp reads as zero.
    pub fn parse(value: &[u8]) -> Option<Self> {
        let open = value.iter().position(|&b| b == b'<')?;
        let close = open + value[open..].iter().position(|&b| b == b'>')?;
        let name = value[..open].trim_ascii_end().to_vec();
        let email = value[open + 1..close].to_vec();
        let mut tail = value[close + 1..]
            .split(|b| b.is_ascii_whitespace())
            .filter(|field| !field.is_empty());
        let time = tail
            .next()
            .and_then(|t| std::str::from_utf8(t).ok())
            .and_then(|t| t.parse::<i64>().ok())
            .unwrap_or(0);
        let offset_minutes = tail.next().and_then(parse_tz).unwrap_or(0);
        Some(Self {
            name,
            email,
            time,
            offset_minutes,
            raw: value.to_vec(),
        })
    }

    /// The line value exactly as it will be written
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    /// Timestamp in the signer's own timezone
    pub fn when(&self) -> Option<chrono::DateTime<chrono::FixedOffset>> {
        let offset = chrono::FixedOffset::east_opt(self.offset_minutes * 60)?;
        chrono::DateTime::from_timestamp(self.time, 0).map(|utc| utc.with_timezone(&offset))
    }
}

fn parse_tz(text: &[u8]) -> Option<i32> {
    let (sign, digits) = match text.first()? {
        b'+' => (1, &text[1..]),
        b'-' => (-1, &text[1..]),
        _ => (1, text),
    };
    if digits.len() != 4 || !digits.iter().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value = |pair: &[u8]| i32::from((pair[0] - b'0') * 10 + (pair[1] - b'0'));
    Some(sign * (value(&digits[..2]) * 60 + value(&digits[2..])))
}

fn push_header(out: &mut Vec<u8>, key: &[u8], value: &[u8]) {
    out.extend_from_slice(key);
    out.push(b' ');
    out.extend_from_slice(value);
    out.push(b'\n');
}

/// Split a commit or tag body into header lines and the message.
/// Continuation lines (leading space) are folded into the previous header.
fn split_headers(kind: ObjectKind, data: &[u8]) -> Result<(Vec<(Vec<u8>, Vec<u8>)>, Vec<u8>), ParseError> {
    let mut headers: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    let mut rest = data;
    loop {
        if rest.is_empty() {
            return Ok((headers, Vec::new()));
        }
        let end = rest.iter().position(|&b| b == b'\n').unwrap_or(rest.len());
        let line = &rest[..end];
        rest = if end < rest.len() { &rest[end + 1..] } else { &[] };
        if line.is_empty() {
            return Ok((headers, rest.to_vec()));
        }
        if line[0] == b' ' {
            let last = headers
                .last_mut()
                .ok_or_else(|| ParseError::new(kind, "continuation line without header"))?;
            last.1.push(b'\n');
            last.1.extend_from_slice(&line[1..]);
            continue;
        }
        let (key, value) = match line.iter().position(|&b| b == b' ') {
            Some(sp) => (&line[..sp], &line[sp + 1..]),
            None => (line, &[][..]),
        };
        headers.push((key.to_vec(), value.to_vec()));
    }
}

fn header_id(kind: ObjectKind, value: &[u8]) -> Result<ObjectId, ParseError> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| ObjectId::from_hex(s).ok())
        .ok_or_else(|| {
            ParseError::new(
                kind,
                format!("invalid object id {:?}", String::from_utf8_lossy(value)),
            )
        })
}

fn header_signature(kind: ObjectKind, field: &str, value: &[u8]) -> Result<Signature, ParseError> {
    Signature::parse(value).ok_or_else(|| ParseError::new(kind, format!("invalid {} line", field)))
}

/// Commit object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub tree: ObjectId,
    /// Parent commit IDs in recorded order (empty for a root commit)
    pub parents: Vec<ObjectId>,
    pub author: Signature,
    pub committer: Signature,
    /// Raw value of the `encoding` header, when present
    pub encoding: Option<Vec<u8>>,
    /// Raw message bytes, interpreted per `encoding`
    pub message: Vec<u8>,
}

impl Commit {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let kind = ObjectKind::Commit;
        let (headers, message) = split_headers(kind, data)?;
        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;
        let mut encoding = None;
        for (key, value) in &headers {
            match key.as_slice() {
                b"tree" => tree = Some(header_id(kind, value)?),
                b"parent" => parents.push(header_id(kind, value)?),
                b"author" => author = Some(header_signature(kind, "author", value)?),
                b"committer" => committer = Some(header_signature(kind, "committer", value)?),
                b"encoding" => encoding = Some(value.clone()),
                // gpgsig, mergetag and friends cannot survive a rewrite
                _ => {}
            }
        }
        Ok(Self {
            tree: tree.ok_or_else(|| ParseError::new(kind, "missing tree"))?,
            parents,
            author: author.ok_or_else(|| ParseError::new(kind, "missing author"))?,
            committer: committer.ok_or_else(|| ParseError::new(kind, "missing committer"))?,
            encoding,
            message,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.message.len());
        out.extend_from_slice(format!("tree {}\n", self.tree).as_bytes());
        for parent in &self.parents {
            out.extend_from_slice(format!("parent {}\n", parent).as_bytes());
        }
        push_header(&mut out, b"author", self.author.as_bytes());
        push_header(&mut out, b"committer", self.committer.as_bytes());
        if let Some(encoding) = &self.encoding {
            push_header(&mut out, b"encoding", encoding);
        }
        out.push(b'\n');
        out.extend_from_slice(&self.message);
        out
    }

    /// Check if this is a root commit (no parents)
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }
}

/// Annotated tag object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub object: ObjectId,
    /// Natural type of the tagged object
    pub kind: ObjectKind,
    /// Raw tag name bytes
    pub name: Vec<u8>,
    /// Very old tags carry no tagger line
    pub tagger: Option<Signature>,
    pub message: Vec<u8>,
}

impl Tag {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let kind = ObjectKind::Tag;
        let (headers, message) = split_headers(kind, data)?;
        let mut object = None;
        let mut target_kind = None;
        let mut name = None;
        let mut tagger = None;
        for (key, value) in &headers {
            match key.as_slice() {
                b"object" => object = Some(header_id(kind, value)?),
                b"type" => {
                    target_kind = Some(ObjectKind::parse(value).ok_or_else(|| {
                        ParseError::new(kind, format!("unknown type {:?}", String::from_utf8_lossy(value)))
                    })?)
                }
                b"tag" => name = Some(value.clone()),
                b"tagger" => tagger = Some(header_signature(kind, "tagger", value)?),
                _ => {}
            }
        }
        Ok(Self {
            object: object.ok_or_else(|| ParseError::new(kind, "missing object"))?,
            kind: target_kind.ok_or_else(|| ParseError::new(kind, "missing type"))?,
            name: name.ok_or_else(|| ParseError::new(kind, "missing tag name"))?,
            tagger,
            message,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.message.len());
        out.extend_from_slice(format!("object {}\n", self.object).as_bytes());
        out.extend_from_slice(format!("type {}\n", self.kind).as_bytes());
        push_header(&mut out, b"tag", &self.name);
        if let Some(tagger) = &self.tagger {
            push_header(&mut out, b"tagger", tagger.as_bytes());
        }
        out.push(b'\n');
        out.extend_from_slice(&self.message);
        out
    }
}
