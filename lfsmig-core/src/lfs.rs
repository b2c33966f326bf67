//! LFS pointer substitution
//!
//! A tracked blob is streamed to a staging file while its SHA-256 is
//! computed, optionally uploaded, moved into the local LFS cache, and
//! replaced in history by a small pointer text.

use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::error::{ConvertError, Result};
use crate::object::ObjectId;

/// First line of every pointer file
pub const POINTER_VERSION: &str = "version https://git-lfs.github.com/spec/v1";

const COPY_BUFFER: usize = 0x10000;

/// Content of an LFS pointer file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LfsPointer {
    /// Lowercase hex SHA-256 of the original content
    pub oid: String,
    /// Original content length in bytes
    pub size: u64,
}

impl LfsPointer {
    pub fn new(oid: impl Into<String>, size: u64) -> Self {
        Self {
            oid: oid.into(),
            size,
        }
    }

    /// Parse pointer text as written by [`LfsPointer::to_text`]
    pub fn parse(text: &str) -> Option<Self> {
        let mut lines = text.lines();
        if lines.next()? != POINTER_VERSION {
            return None;
        }
        let oid = lines.next()?.strip_prefix("oid sha256:")?;
        if oid.len() != 64 || !oid.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return None;
        }
        let size = lines.next()?.strip_prefix("size ")?.parse().ok()?;
        Some(Self::new(oid, size))
    }

    pub fn to_text(&self) -> String {
        format!("{}\noid sha256:{}\nsize {}\n", POINTER_VERSION, self.oid, self.size)
    }

    /// Cache location: `<root>/xx/yy/<oid>`
    pub fn cache_path(&self, root: &Path) -> PathBuf {
        root.join(&self.oid[..2]).join(&self.oid[2..4]).join(&self.oid)
    }
}

impl fmt::Display for LfsPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{} ({} bytes)", self.oid, self.size)
    }
}

/// Copy `reader` into a new file at `path`, hashing as it goes
pub async fn stage_blob(
    id: &ObjectId,
    reader: &mut (dyn AsyncRead + Send + Unpin),
    path: &Path,
) -> Result<LfsPointer> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(ConvertError::io(*id, parent))?;
    }
    let mut file = fs::File::create(path).await.map_err(ConvertError::io(*id, path))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; COPY_BUFFER];
    let mut size: u64 = 0;
    loop {
        let n = reader.read(&mut buffer).await.map_err(ConvertError::io(*id, path))?;
        if n == 0 {
            break;
        }
        file.write_all(&buffer[..n]).await.map_err(ConvertError::io(*id, path))?;
        hasher.update(&buffer[..n]);
        size += n as u64;
    }
    file.flush().await.map_err(ConvertError::io(*id, path))?;
    file.sync_all().await.map_err(ConvertError::io(*id, path))?;
    Ok(LfsPointer::new(hex::encode(hasher.finalize()), size))
}

/// Whether the staged file was kept or an identical cached copy already existed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Stored,
    AlreadyCached,
}

/// Move a staged file to its content-addressed cache path
pub async fn publish_staged(
    id: &ObjectId,
    staged: &Path,
    pointer: &LfsPointer,
    cache_root: &Path,
) -> Result<CacheOutcome> {
    let target = pointer.cache_path(cache_root);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await.map_err(ConvertError::io(*id, parent))?;
    }
    if fs::try_exists(&target).await.map_err(ConvertError::io(*id, &target))? {
        fs::remove_file(staged).await.map_err(ConvertError::io(*id, staged))?;
        return Ok(CacheOutcome::AlreadyCached);
    }
    fs::rename(staged, &target).await.map_err(ConvertError::io(*id, &target))?;
    Ok(CacheOutcome::Stored)
}
