//! Loose-object store over a git directory
//!
//! Layout on disk:
//! ```text
//! {git_dir}/
//!   HEAD                              : symbolic or detached head
//!   objects/{hash[0..2]}/{hash[2..]}  : zlib-compressed "<kind> <len>\0<body>"
//!   refs/heads/, refs/tags/           : loose references
//! ```
//! Packed objects are not read.

use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha1::{Digest, Sha1};
use std::fs;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::object::{object_header, ObjectId, ObjectKind};
use crate::storage::{ObjectReader, ObjectStore, RawObject, Result, StorageError};

const COPY_BUFFER: usize = 0x10000;

/// Git object database made of loose object files
pub struct LooseObjectStore {
    git_dir: PathBuf,
}

impl LooseObjectStore {
    /// Open an existing repository. `path` may be a bare repository or a
    /// working tree containing `.git`.
    pub fn open(path: &Path) -> Result<Self> {
        let dotgit = path.join(".git");
        let git_dir = if dotgit.is_dir() { dotgit } else { path.to_path_buf() };
        if !git_dir.join("objects").is_dir() {
            return Err(StorageError::Backend(format!(
                "Not a git directory: {}",
                path.display()
            )));
        }
        Ok(Self { git_dir })
    }

    /// Create (or reuse) a bare repository layout at `path`
    pub fn init(path: &Path) -> Result<Self> {
        for dir in ["objects", "refs/heads", "refs/tags"] {
            fs::create_dir_all(path.join(dir))?;
        }
        let head = path.join("HEAD");
        if !head.exists() {
            fs::write(&head, "ref: refs/heads/master\n")?;
        }
        Ok(Self {
            git_dir: path.to_path_buf(),
        })
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    fn object_path(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.git_dir.join("objects").join(&hex[..2]).join(&hex[2..])
    }

    fn temp_path(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.git_dir
            .join("objects")
            .join(&hex[..2])
            .join(format!("tmp_obj_{}", uuid::Uuid::new_v4().simple()))
    }

    fn open_file(&self, id: &ObjectId) -> Result<fs::File> {
        fs::File::open(self.object_path(id)).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(*id),
            _ => StorageError::Io(e),
        })
    }

    /// Move a finished temporary file into place. Losing a race against an
    /// identical writer is fine: the content is the same.
    fn publish(&self, id: &ObjectId, temp: &Path) -> Result<()> {
        let target = self.object_path(id);
        if target.exists() {
            fs::remove_file(temp)?;
            return Ok(());
        }
        fs::rename(temp, &target)?;
        Ok(())
    }
}

/// Parse `"<kind> <len>\0"` from the start of a decompressed object
fn parse_header(id: &ObjectId, data: &[u8]) -> Result<(ObjectKind, u64, usize)> {
    let corrupt = |reason: &str| StorageError::Corrupt {
        id: *id,
        reason: reason.to_string(),
    };
    let nul = data
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| corrupt("missing header terminator"))?;
    let header = &data[..nul];
    let space = header
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| corrupt("missing header separator"))?;
    let kind = ObjectKind::parse(&header[..space]).ok_or_else(|| corrupt("unknown object type"))?;
    let size = std::str::from_utf8(&header[space + 1..])
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| corrupt("invalid object size"))?;
    Ok((kind, size, nul + 1))
}

/// Read the header off an inflating reader, leaving it at the first body byte
fn read_header(id: &ObjectId, decoder: &mut impl Read) -> Result<(ObjectKind, u64)> {
    // Header is at most "commit 18446744073709551615\0"
    let mut head = Vec::with_capacity(32);
    let mut byte = [0u8; 1];
    while head.len() < 32 {
        if decoder.read(&mut byte)? == 0 {
            break;
        }
        head.push(byte[0]);
        if byte[0] == 0 {
            break;
        }
    }
    parse_header(id, &head).map(|(kind, size, _)| (kind, size))
}

#[async_trait]
impl ObjectStore for LooseObjectStore {
    async fn exists(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.object_path(id).is_file())
    }

    async fn kind(&self, id: &ObjectId) -> Result<ObjectKind> {
        let mut decoder = ZlibDecoder::new(self.open_file(id)?);
        read_header(id, &mut decoder).map(|(kind, _)| kind)
    }

    /// Inflate on a blocking thread and hand the body over through a pipe,
    /// so large blobs never sit in memory whole. A truncated or corrupt body
    /// shows up to the reader as a short stream.
    async fn open(&self, id: &ObjectId) -> Result<ObjectReader> {
        let mut decoder = ZlibDecoder::new(BufReader::new(self.open_file(id)?));
        let (kind, size) = read_header(id, &mut decoder)?;

        let (reader, mut writer) = tokio::io::duplex(COPY_BUFFER);
        let handle = tokio::runtime::Handle::current();
        let id = *id;
        tokio::task::spawn_blocking(move || {
            let mut buffer = vec![0u8; COPY_BUFFER];
            loop {
                let n = match decoder.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        tracing::warn!("Failed to inflate {}: {}", id, e);
                        break;
                    }
                };
                // Reader dropped
                if handle.block_on(writer.write_all(&buffer[..n])).is_err() {
                    break;
                }
            }
        });

        Ok(ObjectReader {
            kind,
            size,
            reader: Box::new(reader),
        })
    }

    async fn read(&self, id: &ObjectId) -> Result<RawObject> {
        let mut data = Vec::new();
        ZlibDecoder::new(self.open_file(id)?)
            .read_to_end(&mut data)
            .map_err(|e| StorageError::Corrupt {
                id: *id,
                reason: format!("zlib: {}", e),
            })?;
        let (kind, size, start) = parse_header(id, &data)?;
        if (data.len() - start) as u64 != size {
            return Err(StorageError::Corrupt {
                id: *id,
                reason: format!("declared {} bytes, found {}", size, data.len() - start),
            });
        }
        Ok(RawObject::new(kind, Bytes::from(data).slice(start..)))
    }

    async fn insert(&self, kind: ObjectKind, data: Bytes) -> Result<ObjectId> {
        let id = ObjectId::for_object(kind, &data);
        if self.object_path(&id).exists() {
            return Ok(id);
        }
        let temp = self.temp_path(&id);
        if let Some(parent) = temp.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut encoder = ZlibEncoder::new(fs::File::create(&temp)?, Compression::default());
        encoder.write_all(&object_header(kind, data.len() as u64))?;
        encoder.write_all(&data)?;
        encoder.finish()?.sync_all()?;
        self.publish(&id, &temp)?;
        Ok(id)
    }

    async fn insert_stream(
        &self,
        kind: ObjectKind,
        size: u64,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<ObjectId> {
        // The identity is only known at the end, so stage under a scratch name.
        let scratch_dir = self.git_dir.join("objects");
        let temp = scratch_dir.join(format!("tmp_obj_{}", uuid::Uuid::new_v4().simple()));
        let header = object_header(kind, size);

        let mut hasher = Sha1::new();
        hasher.update(&header);
        let mut encoder = ZlibEncoder::new(fs::File::create(&temp)?, Compression::default());
        encoder.write_all(&header)?;

        let mut buffer = vec![0u8; COPY_BUFFER];
        let mut copied: u64 = 0;
        loop {
            let n = reader.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
            encoder.write_all(&buffer[..n])?;
            copied += n as u64;
        }
        encoder.finish()?.sync_all()?;

        if copied != size {
            fs::remove_file(&temp)?;
            return Err(StorageError::Backend(format!(
                "Stream length mismatch: declared {} bytes, read {}",
                size, copied
            )));
        }

        let id = ObjectId::from_digest(&hasher.finalize());
        let target = self.object_path(&id);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        self.publish(&id, &temp)?;
        Ok(id)
    }
}
