//! lfsmig Core Library
//!
//! Rewrites the full history of a git repository into a new repository,
//! replacing files with tracked suffixes by Git LFS pointers:
//! - Object model with git's canonical encodings (Blob, Tree, Commit, Tag)
//! - Storage abstraction (in-memory and loose-object stores)
//! - Per-object converters and the memoizing dependency resolver
//! - LFS pointer staging and the upload protocol
//! - Whole-repository migration over refs

pub mod attributes;
pub mod checker;
pub mod config;
pub mod converter;
pub mod error;
pub mod lfs;
pub mod loose;
pub mod migrate;
pub mod object;
pub mod refs;
pub mod resolver;
pub mod storage;
pub mod task;
pub mod upload;

pub use config::{MigrateConfig, ATTRIBUTES_FILE};
pub use converter::{ConvertContext, GitConverter, GitTask, TaskBody};
pub use error::ConvertError;
pub use lfs::LfsPointer;
pub use loose::LooseObjectStore;
pub use migrate::{convert_refs, migrate, MigrationReport};
pub use object::{Commit, FileMode, ObjectId, ObjectKind, Signature, Tag, Tree, TreeEntry};
pub use resolver::{ConvertStats, ConvertTask, ResolvedView, Resolver, TaskFactory};
pub use storage::{MemoryStore, ObjectReader, ObjectStore, RawObject, StorageError};
pub use task::{TaskEntry, TaskKey, TaskKind};
pub use upload::{LfsClient, UploadOutcome};
