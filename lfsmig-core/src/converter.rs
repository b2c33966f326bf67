//! Per-object conversion
//!
//! [`GitConverter`] turns a [`TaskKey`] into a [`GitTask`]: the parsed source
//! object plus what it needs from the resolver. Dispatch is a closed match on
//! `(TaskKind, ObjectKind)`; any pairing not listed is an integrity error.
//!
//! | key kind              | source object | task                        |
//! |-----------------------|---------------|-----------------------------|
//! | `Plain`               | commit        | rewrite commit              |
//! | `Plain`               | tree          | rebuild tree                |
//! | `Plain`               | blob          | copy verbatim               |
//! | `Plain`               | tag           | rewrite tag                 |
//! | `RootTree`            | tree          | rebuild tree + attributes   |
//! | `AttributeRewrite`    | blob or zero  | merge LFS rules             |
//! | `LargeBlobSubstitute` | blob          | replace with LFS pointer    |

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use crate::attributes::rewrite_attributes;
use crate::checker::check_tree;
use crate::config::{MigrateConfig, ATTRIBUTES_FILE};
use crate::error::{ConvertError, Result};
use crate::lfs::{publish_staged, stage_blob, CacheOutcome};
use crate::object::{Commit, FileMode, ObjectId, ObjectKind, Tag, Tree, TreeEntry};
use crate::resolver::{ConvertTask, ResolvedView, TaskFactory};
use crate::storage::{ObjectReader, ObjectStore, RawObject, StorageError};
use crate::task::{TaskEntry, TaskKey, TaskKind};
use crate::upload::{LfsClient, UploadOutcome};

/// Everything a conversion needs besides the resolver
pub struct ConvertContext {
    pub source: Arc<dyn ObjectStore>,
    pub destination: Arc<dyn ObjectStore>,
    pub config: MigrateConfig,
    pub lfs: Option<LfsClient>,
}

impl ConvertContext {
    async fn read_as(&self, id: &ObjectId, kind: TaskKind, expected: ObjectKind) -> Result<RawObject> {
        let object = self.source.read(id).await?;
        if object.kind != expected {
            return Err(ConvertError::KindMismatch {
                kind,
                id: *id,
                found: object.kind,
            });
        }
        Ok(object)
    }

    async fn open_blob(&self, id: &ObjectId, kind: TaskKind) -> Result<ObjectReader> {
        let stream = self.source.open(id).await?;
        if stream.kind != ObjectKind::Blob {
            return Err(ConvertError::KindMismatch {
                kind,
                id: *id,
                found: stream.kind,
            });
        }
        Ok(stream)
    }
}

/// Task factory over a source and destination store
pub struct GitConverter {
    ctx: Arc<ConvertContext>,
}

impl GitConverter {
    pub fn new(
        source: Arc<dyn ObjectStore>,
        destination: Arc<dyn ObjectStore>,
        config: MigrateConfig,
    ) -> Result<Self> {
        let lfs = config.lfs_url.as_deref().map(LfsClient::new).transpose()?;
        Ok(Self {
            ctx: Arc::new(ConvertContext {
                source,
                destination,
                config,
                lfs,
            }),
        })
    }

    pub fn config(&self) -> &MigrateConfig {
        &self.ctx.config
    }

    pub fn destination(&self) -> &Arc<dyn ObjectStore> {
        &self.ctx.destination
    }

    /// Flush the destination store
    pub async fn flush(&self) -> Result<()> {
        self.ctx.destination.flush().await?;
        Ok(())
    }

    /// Child keys of a source tree, plus a synthesized `.gitattributes` for
    /// a root tree that has none.
    async fn tree_entries(&self, id: &ObjectId, root: bool) -> Result<Vec<TaskEntry>> {
        let kind = if root { TaskKind::RootTree } else { TaskKind::Plain };
        let object = self.ctx.read_as(id, kind, ObjectKind::Tree).await?;
        let tree = Tree::parse(&object.data).map_err(|source| ConvertError::Parse { id: *id, source })?;
        let config = &self.ctx.config;

        // An empty suffix list disables attribute handling entirely: an
        // existing `.gitattributes` is copied verbatim, line endings included.
        let mut need_attributes = root && !config.suffixes.is_empty();
        let mut entries = Vec::with_capacity(tree.entries.len() + 1);
        for entry in tree.entries {
            let attributes = need_attributes && entry.name == ATTRIBUTES_FILE.as_bytes();
            if attributes {
                need_attributes = false;
            }
            // A directory or submodule under that name is not rewritable
            let kind = if attributes && entry.mode.object_kind() == Some(ObjectKind::Blob) {
                TaskKind::AttributeRewrite
            } else if entry.mode == FileMode::Regular && config.is_tracked(&entry.name) {
                TaskKind::LargeBlobSubstitute
            } else {
                TaskKind::Plain
            };
            entries.push(TaskEntry::new(entry.mode, TaskKey::new(kind, entry.id), entry.name));
        }
        if need_attributes {
            entries.push(TaskEntry::new(
                FileMode::Regular,
                TaskKey::new(TaskKind::AttributeRewrite, ObjectId::zero()),
                ATTRIBUTES_FILE,
            ));
        }
        Ok(entries)
    }
}

/// What a task converts
#[derive(Debug)]
pub enum TaskBody {
    Commit(Commit),
    Tree(Vec<TaskEntry>),
    Tag(Tag),
    Copy,
    Attributes,
    Lfs,
}

/// A source object ready to be converted
pub struct GitTask {
    key: TaskKey,
    body: TaskBody,
    ctx: Arc<ConvertContext>,
}

impl GitTask {
    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    pub fn body(&self) -> &TaskBody {
        &self.body
    }
}

#[async_trait]
impl TaskFactory for GitConverter {
    type Task = GitTask;

    async fn task(&self, key: &TaskKey) -> Result<GitTask> {
        let id = key.id;
        let body = match key.kind {
            TaskKind::Plain => match self.ctx.source.kind(&id).await? {
                ObjectKind::Commit => {
                    let object = self.ctx.read_as(&id, key.kind, ObjectKind::Commit).await?;
                    TaskBody::Commit(
                        Commit::parse(&object.data).map_err(|source| ConvertError::Parse { id, source })?,
                    )
                }
                ObjectKind::Tree => TaskBody::Tree(self.tree_entries(&id, false).await?),
                ObjectKind::Blob => TaskBody::Copy,
                ObjectKind::Tag => {
                    let object = self.ctx.read_as(&id, key.kind, ObjectKind::Tag).await?;
                    TaskBody::Tag(Tag::parse(&object.data).map_err(|source| ConvertError::Parse { id, source })?)
                }
            },
            TaskKind::RootTree => TaskBody::Tree(self.tree_entries(&id, true).await?),
            TaskKind::AttributeRewrite => TaskBody::Attributes,
            TaskKind::LargeBlobSubstitute => TaskBody::Lfs,
        };
        Ok(GitTask {
            key: *key,
            body,
            ctx: self.ctx.clone(),
        })
    }
}

#[async_trait]
impl ConvertTask for GitTask {
    fn depends(&self) -> Vec<TaskKey> {
        match &self.body {
            TaskBody::Commit(commit) => commit
                .parents
                .iter()
                .map(|p| TaskKey::plain(*p))
                .chain(std::iter::once(TaskKey::new(TaskKind::RootTree, commit.tree)))
                .collect(),
            TaskBody::Tree(entries) => entries
                .iter()
                .filter(|e| e.mode != FileMode::Gitlink)
                .map(|e| e.key)
                .collect(),
            TaskBody::Tag(tag) => vec![TaskKey::plain(tag.object)],
            TaskBody::Copy | TaskBody::Attributes | TaskBody::Lfs => Vec::new(),
        }
    }

    async fn convert(&self, resolved: &ResolvedView<'_>) -> Result<ObjectId> {
        match &self.body {
            TaskBody::Commit(commit) => self.convert_commit(commit, resolved).await,
            TaskBody::Tree(entries) => self.convert_tree(entries, resolved).await,
            TaskBody::Tag(tag) => self.convert_tag(tag, resolved).await,
            TaskBody::Copy => self.copy_object().await,
            TaskBody::Attributes => self.convert_attributes().await,
            TaskBody::Lfs => self.convert_lfs().await,
        }
    }
}

impl GitTask {
    async fn insert(&self, kind: ObjectKind, data: Vec<u8>) -> Result<ObjectId> {
        Ok(self.ctx.destination.insert(kind, Bytes::from(data)).await?)
    }

    async fn convert_commit(&self, commit: &Commit, resolved: &ResolvedView<'_>) -> Result<ObjectId> {
        let parents = commit
            .parents
            .iter()
            .map(|p| resolved.get(&TaskKey::plain(*p)))
            .collect::<Result<Vec<_>>>()?;
        let rewritten = Commit {
            tree: resolved.get(&TaskKey::new(TaskKind::RootTree, commit.tree))?,
            parents,
            ..commit.clone()
        };
        self.insert(ObjectKind::Commit, rewritten.encode()).await
    }

    async fn convert_tree(&self, entries: &[TaskEntry], resolved: &ResolvedView<'_>) -> Result<ObjectId> {
        let mut tree = Tree::new(
            entries
                .iter()
                .map(|e| -> Result<TreeEntry> {
                    // Submodule commits belong to another repository
                    let id = if e.mode == FileMode::Gitlink {
                        e.key.id
                    } else {
                        resolved.get(&e.key)?
                    };
                    Ok(TreeEntry::new(e.mode, e.name.clone(), id))
                })
                .collect::<Result<Vec<_>>>()?,
        );
        tree.sort_canonical();
        let data = tree.encode();
        check_tree(&data).map_err(|source| ConvertError::MalformedTree { key: self.key, source })?;
        self.insert(ObjectKind::Tree, data).await
    }

    async fn convert_tag(&self, tag: &Tag, resolved: &ResolvedView<'_>) -> Result<ObjectId> {
        let rewritten = Tag {
            object: resolved.get(&TaskKey::plain(tag.object))?,
            ..tag.clone()
        };
        self.insert(ObjectKind::Tag, rewritten.encode()).await
    }

    async fn copy_object(&self) -> Result<ObjectId> {
        let id = self.key.id;
        if self.ctx.destination.exists(&id).await? {
            return Ok(id);
        }
        let mut stream = self.ctx.source.open(&id).await?;
        let copied = self
            .ctx
            .destination
            .insert_stream(stream.kind, stream.size, stream.reader.as_mut())
            .await?;
        if copied != id {
            return Err(ConvertError::IdMismatch {
                expected: id,
                actual: copied,
            });
        }
        Ok(id)
    }

    async fn convert_attributes(&self) -> Result<ObjectId> {
        let existing = if self.key.id.is_zero() {
            Bytes::new()
        } else {
            self.ctx
                .read_as(&self.key.id, self.key.kind, ObjectKind::Blob)
                .await?
                .data
        };
        let text = rewrite_attributes(&existing, &self.ctx.config.suffixes);
        self.insert(ObjectKind::Blob, text).await
    }

    async fn convert_lfs(&self) -> Result<ObjectId> {
        let id = self.key.id;
        let config = &self.ctx.config;
        let mut stream = self.ctx.open_blob(&id, self.key.kind).await?;

        let staged = config.staging_dir.join(id.to_hex());
        let pointer = stage_blob(&id, stream.reader.as_mut(), &staged).await?;
        if pointer.size != stream.size {
            return Err(ConvertError::Storage(StorageError::Corrupt {
                id,
                reason: format!("declared {} bytes, read {}", stream.size, pointer.size),
            }));
        }

        if let Some(client) = &self.ctx.lfs {
            if client.upload(&id, &pointer, &staged).await? == UploadOutcome::AlreadyPresent {
                tracing::debug!("LFS server already has {}", pointer);
            }
        }
        if publish_staged(&id, &staged, &pointer, &config.lfs_objects_dir).await? == CacheOutcome::AlreadyCached {
            tracing::debug!("Reusing cached LFS object {}", pointer.oid);
        }

        tracing::info!("Moved blob {} to LFS as {}", id, pointer);
        self.insert(ObjectKind::Blob, pointer.to_text().into_bytes()).await
    }
}
