//! Task keys: the unit of conversion and the memoization key

use std::fmt;

use crate::object::{FileMode, ObjectId};

/// How a source object is to be converted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskKind {
    /// Copy or recurse according to the object's natural type
    Plain,
    /// The root tree of a commit; may receive a `.gitattributes` entry
    RootTree,
    /// The `.gitattributes` blob of a root tree
    AttributeRewrite,
    /// A tracked blob replaced by an LFS pointer
    LargeBlobSubstitute,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [
        TaskKind::Plain,
        TaskKind::RootTree,
        TaskKind::AttributeRewrite,
        TaskKind::LargeBlobSubstitute,
    ];

    pub fn index(&self) -> usize {
        match self {
            TaskKind::Plain => 0,
            TaskKind::RootTree => 1,
            TaskKind::AttributeRewrite => 2,
            TaskKind::LargeBlobSubstitute => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Plain => "plain",
            TaskKind::RootTree => "root-tree",
            TaskKind::AttributeRewrite => "attributes",
            TaskKind::LargeBlobSubstitute => "lfs",
        }
    }
}

/// `(kind, source id)`: two equal keys always convert to the same object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskKey {
    pub kind: TaskKind,
    /// Source object, or [`ObjectId::zero`] for a synthesized attributes file
    pub id: ObjectId,
}

impl TaskKey {
    pub fn new(kind: TaskKind, id: ObjectId) -> Self {
        Self { kind, id }
    }

    pub fn plain(id: ObjectId) -> Self {
        Self::new(TaskKind::Plain, id)
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// One child of a tree being rebuilt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEntry {
    pub mode: FileMode,
    pub key: TaskKey,
    pub name: Vec<u8>,
}

impl TaskEntry {
    pub fn new(mode: FileMode, key: TaskKey, name: impl Into<Vec<u8>>) -> Self {
        Self {
            mode,
            key,
            name: name.into(),
        }
    }
}
