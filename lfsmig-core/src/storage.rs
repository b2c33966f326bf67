//! Storage abstraction layer for lfsmig
//!
//! The migration reads from one object store and writes into another. Both
//! sides are reached through [`ObjectStore`], so the conversion engine never
//! depends on how objects are laid out on disk.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::RwLock;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::object::{ObjectId, ObjectKind};

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(ObjectId),

    #[error("Corrupt object {id}: {reason}")]
    Corrupt { id: ObjectId, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// A fully loaded object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawObject {
    pub kind: ObjectKind,
    pub data: Bytes,
}

impl RawObject {
    pub fn new(kind: ObjectKind, data: impl Into<Bytes>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }

    pub fn id(&self) -> ObjectId {
        ObjectId::for_object(self.kind, &self.data)
    }
}

/// Streaming access to an object's content
pub struct ObjectReader {
    pub kind: ObjectKind,
    /// Declared content length in bytes
    pub size: u64,
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl ObjectReader {
    pub fn from_raw(object: RawObject) -> Self {
        Self {
            kind: object.kind,
            size: object.data.len() as u64,
            reader: Box::new(Cursor::new(object.data)),
        }
    }
}

/// Generic object store interface
///
/// Implementations must be safe to call from many conversions at once.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Check if object exists
    async fn exists(&self, id: &ObjectId) -> Result<bool>;

    /// Natural type of a stored object, without loading its content
    async fn kind(&self, id: &ObjectId) -> Result<ObjectKind>;

    /// Load an object completely
    async fn read(&self, id: &ObjectId) -> Result<RawObject>;

    /// Open an object for streamed reading
    async fn open(&self, id: &ObjectId) -> Result<ObjectReader> {
        Ok(ObjectReader::from_raw(self.read(id).await?))
    }

    /// Store an object and return its identity. Idempotent.
    async fn insert(&self, kind: ObjectKind, data: Bytes) -> Result<ObjectId>;

    /// Store an object from a stream of exactly `size` bytes
    async fn insert_stream(
        &self,
        kind: ObjectKind,
        size: u64,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<ObjectId> {
        let mut data = Vec::with_capacity(size as usize);
        reader.read_to_end(&mut data).await?;
        if data.len() as u64 != size {
            return Err(StorageError::Backend(format!(
                "Stream length mismatch: declared {} bytes, read {}",
                size,
                data.len()
            )));
        }
        self.insert(kind, Bytes::from(data)).await
    }

    /// Make every inserted object durable
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// In-memory object store
///
/// Used for tests and for embedding the converter without a disk layout.
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<ObjectId, RawObject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every stored object, sorted by identity
    pub fn objects(&self) -> Vec<(ObjectId, RawObject)> {
        let mut all: Vec<_> = self
            .objects
            .read()
            .map(|o| o.iter().map(|(id, obj)| (*id, obj.clone())).collect())
            .unwrap_or_default();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    fn get(&self, id: &ObjectId) -> Result<Option<RawObject>> {
        let objects = self
            .objects
            .read()
            .map_err(|_| StorageError::Backend("Object map lock poisoned".to_string()))?;
        Ok(objects.get(id).cloned())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn exists(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.get(id)?.is_some())
    }

    async fn kind(&self, id: &ObjectId) -> Result<ObjectKind> {
        self.get(id)?.map(|o| o.kind).ok_or(StorageError::NotFound(*id))
    }

    async fn read(&self, id: &ObjectId) -> Result<RawObject> {
        self.get(id)?.ok_or(StorageError::NotFound(*id))
    }

    async fn insert(&self, kind: ObjectKind, data: Bytes) -> Result<ObjectId> {
        let object = RawObject::new(kind, data);
        let id = object.id();
        let mut objects = self
            .objects
            .write()
            .map_err(|_| StorageError::Backend("Object map lock poisoned".to_string()))?;
        objects.entry(id).or_insert(object);
        Ok(id)
    }
}
