//! Conversion tests over in-memory stores

use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tempfile::TempDir;

use lfsmig_core::attributes::lfs_rule;
use lfsmig_core::{
    Commit, ConvertError, FileMode, GitConverter, LfsPointer, MemoryStore, MigrateConfig, ObjectId,
    ObjectKind, ObjectStore, Resolver, Signature, Tag, TaskKey, TaskKind, Tree, TreeEntry,
};

struct Fixture {
    source: Arc<MemoryStore>,
    scratch: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            source: Arc::new(MemoryStore::new()),
            scratch: tempfile::tempdir().unwrap(),
        }
    }

    async fn blob(&self, data: &[u8]) -> ObjectId {
        self.source
            .insert(ObjectKind::Blob, Bytes::copy_from_slice(data))
            .await
            .unwrap()
    }

    async fn tree(&self, entries: Vec<TreeEntry>) -> ObjectId {
        let mut tree = Tree::new(entries);
        tree.sort_canonical();
        self.source
            .insert(ObjectKind::Tree, Bytes::from(tree.encode()))
            .await
            .unwrap()
    }

    async fn commit(&self, tree: ObjectId, parents: Vec<ObjectId>, message: &str) -> ObjectId {
        let commit = Commit {
            tree,
            parents,
            author: Signature::new("A U Thor", "author@example.com", 1_700_000_000, 120),
            committer: Signature::new("C O Mitter", "committer@example.com", 1_700_000_100, -300),
            encoding: Some(b"ISO-8859-1".to_vec()),
            message: message.as_bytes().to_vec(),
        };
        self.source
            .insert(ObjectKind::Commit, Bytes::from(commit.encode()))
            .await
            .unwrap()
    }

    fn config(&self, suffixes: &[&str]) -> MigrateConfig {
        let mut config = MigrateConfig::for_destination(self.scratch.path());
        config.suffixes = suffixes.iter().map(|s| s.to_string()).collect();
        config
    }

    fn resolver(&self, suffixes: &[&str]) -> (Resolver<GitConverter>, Arc<MemoryStore>) {
        let destination = Arc::new(MemoryStore::new());
        let converter = GitConverter::new(
            self.source.clone(),
            destination.clone(),
            self.config(suffixes),
        )
        .unwrap();
        (Resolver::new(converter), destination)
    }
}

async fn read_tree(store: &MemoryStore, id: &ObjectId) -> Tree {
    let object = store.read(id).await.unwrap();
    assert_eq!(object.kind, ObjectKind::Tree);
    Tree::parse(&object.data).unwrap()
}

async fn read_blob(store: &MemoryStore, id: &ObjectId) -> Vec<u8> {
    let object = store.read(id).await.unwrap();
    assert_eq!(object.kind, ObjectKind::Blob);
    object.data.to_vec()
}

#[tokio::test]
async fn test_root_tree_substitution_scenario() {
    let fx = Fixture::new();
    let b1 = vec![0xA5u8; 4096];
    let b2 = b"plain text\n";
    let a_bin = fx.blob(&b1).await;
    let z_txt = fx.blob(b2).await;
    let root = fx
        .tree(vec![
            TreeEntry::new(FileMode::Regular, "a.bin", a_bin),
            TreeEntry::new(FileMode::Regular, "z.txt", z_txt),
        ])
        .await;

    let (resolver, dest) = fx.resolver(&[".bin"]);
    let new_root = resolver
        .resolve(TaskKey::new(TaskKind::RootTree, root))
        .await
        .unwrap();

    let tree = read_tree(&dest, &new_root).await;
    let names: Vec<_> = tree.iter().map(|e| e.name_lossy()).collect();
    assert_eq!(names, vec![".gitattributes", "a.bin", "z.txt"]);

    let pointer_text = String::from_utf8(read_blob(&dest, &tree.entries[1].id).await).unwrap();
    let pointer = LfsPointer::parse(&pointer_text).unwrap();
    assert_eq!(pointer.oid, hex::encode(Sha256::digest(&b1)));
    assert_eq!(pointer.size, b1.len() as u64);
    assert!(pointer.cache_path(&fx.config(&[]).lfs_objects_dir).is_file());

    // Untracked blobs keep their id
    assert_eq!(tree.entries[2].id, z_txt);
    assert_eq!(read_blob(&dest, &z_txt).await, b2);

    let attributes = read_blob(&dest, &tree.entries[0].id).await;
    assert_eq!(attributes, format!("{}\n", lfs_rule(".bin")).into_bytes());
    assert_eq!(tree.entries[0].mode, FileMode::Regular);

    assert_eq!(resolver.stats().converted(TaskKind::LargeBlobSubstitute), 1);
    assert_eq!(resolver.stats().converted(TaskKind::AttributeRewrite), 1);
}

#[tokio::test]
async fn test_existing_attributes_rewritten_once() {
    let fx = Fixture::new();
    let existing = format!("*.txt text\n{}\n", lfs_rule(".bin"));
    let attrs = fx.blob(existing.as_bytes()).await;
    let data = fx.blob(b"data").await;
    let root = fx
        .tree(vec![
            TreeEntry::new(FileMode::Regular, ".gitattributes", attrs),
            TreeEntry::new(FileMode::Regular, "x.dat", data),
        ])
        .await;

    let (resolver, dest) = fx.resolver(&[".bin", ".dat"]);
    let new_root = resolver
        .resolve(TaskKey::new(TaskKind::RootTree, root))
        .await
        .unwrap();
    let tree = read_tree(&dest, &new_root).await;
    assert_eq!(tree.entries.len(), 2);

    let text = String::from_utf8(read_blob(&dest, &tree.entries[0].id).await).unwrap();
    assert_eq!(
        text,
        format!("*.txt text\n{}\n{}\n", lfs_rule(".bin"), lfs_rule(".dat"))
    );
}

#[tokio::test]
async fn test_subtrees_get_no_attributes() {
    let fx = Fixture::new();
    let big = fx.blob(b"big").await;
    let sub = fx
        .tree(vec![TreeEntry::new(FileMode::Regular, "nested.bin", big)])
        .await;
    let root = fx.tree(vec![TreeEntry::new(FileMode::Tree, "dir", sub)]).await;

    let (resolver, dest) = fx.resolver(&[".bin"]);
    let new_root = resolver
        .resolve(TaskKey::new(TaskKind::RootTree, root))
        .await
        .unwrap();

    let tree = read_tree(&dest, &new_root).await;
    assert_eq!(tree.entries[0].name, b".gitattributes");
    assert_eq!(tree.entries[1].name, b"dir");
    let subtree = read_tree(&dest, &tree.entries[1].id).await;
    assert_eq!(subtree.entries.len(), 1);
    let text = String::from_utf8(read_blob(&dest, &subtree.entries[0].id).await).unwrap();
    assert!(LfsPointer::parse(&text).is_some());
}

#[tokio::test]
async fn test_empty_suffixes_copy_everything() {
    let fx = Fixture::new();
    let a = fx.blob(b"a").await;
    let attrs = fx.blob(b"*.bin -text\r\n*.txt text").await;
    let root = fx
        .tree(vec![
            TreeEntry::new(FileMode::Regular, ".gitattributes", attrs),
            TreeEntry::new(FileMode::Regular, "a.bin", a),
        ])
        .await;
    let commit = fx.commit(root, vec![], "initial\n").await;

    let (resolver, dest) = fx.resolver(&[]);
    let new_commit = resolver.resolve(TaskKey::plain(commit)).await.unwrap();

    // Without suffixes the rewrite reproduces the source graph exactly
    assert_eq!(new_commit, commit);
    assert_eq!(dest.len(), fx.source.len());
    assert_eq!(resolver.stats().converted(TaskKind::AttributeRewrite), 0);
    assert_eq!(read_blob(&dest, &attrs).await, b"*.bin -text\r\n*.txt text");
}

#[tokio::test]
async fn test_symlinked_attributes_rewritten_in_place() {
    let fx = Fixture::new();
    let target = fx.blob(b"shared/attributes").await;
    let a_bin = fx.blob(b"binary").await;
    let root = fx
        .tree(vec![
            TreeEntry::new(FileMode::Symlink, ".gitattributes", target),
            TreeEntry::new(FileMode::Regular, "a.bin", a_bin),
        ])
        .await;

    let (resolver, dest) = fx.resolver(&[".bin"]);
    let new_root = resolver
        .resolve(TaskKey::new(TaskKind::RootTree, root))
        .await
        .unwrap();

    let tree = read_tree(&dest, &new_root).await;
    let names: Vec<_> = tree.iter().map(|e| e.name_lossy()).collect();
    assert_eq!(names, vec![".gitattributes", "a.bin"]);
    assert_eq!(tree.entries[0].mode, FileMode::Symlink);
    assert_eq!(
        read_blob(&dest, &tree.entries[0].id).await,
        format!("shared/attributes\n{}\n", lfs_rule(".bin")).into_bytes()
    );
    assert_eq!(resolver.stats().converted(TaskKind::AttributeRewrite), 1);
}

#[tokio::test]
async fn test_directory_named_attributes_not_duplicated() {
    let fx = Fixture::new();
    let inner = fx.blob(b"inner").await;
    let dir = fx
        .tree(vec![TreeEntry::new(FileMode::Regular, "file", inner)])
        .await;
    let root = fx
        .tree(vec![TreeEntry::new(FileMode::Tree, ".gitattributes", dir)])
        .await;

    let (resolver, dest) = fx.resolver(&[".bin"]);
    let new_root = resolver
        .resolve(TaskKey::new(TaskKind::RootTree, root))
        .await
        .unwrap();

    let tree = read_tree(&dest, &new_root).await;
    assert_eq!(tree.entries.len(), 1);
    assert_eq!(tree.entries[0].mode, FileMode::Tree);
    assert_eq!(tree.entries[0].id, dir);
}

#[tokio::test]
async fn test_non_utf8_identities_survive_unchanged() {
    let fx = Fixture::new();
    let root = fx.tree(vec![]).await;
    let mut raw = format!("tree {}\n", root).into_bytes();
    raw.extend_from_slice(b"author Jos\xe9 <j@x> 1 +0000\n");
    raw.extend_from_slice(b"committer Legacy <l@x> 1112911993\n");
    raw.extend_from_slice(b"encoding ISO-8859-1\n\ncaf\xe9\n");
    let commit = fx
        .source
        .insert(ObjectKind::Commit, Bytes::from(raw.clone()))
        .await
        .unwrap();

    let mut tag_raw = format!("object {}\ntype commit\n", commit).into_bytes();
    tag_raw.extend_from_slice(b"tag r\xe9l\ntagger Fran\xe7ois <f@x> 2 -0000\n\nnote\n");
    let tag = fx
        .source
        .insert(ObjectKind::Tag, Bytes::from(tag_raw.clone()))
        .await
        .unwrap();

    let (resolver, dest) = fx.resolver(&[]);
    assert_eq!(resolver.resolve(TaskKey::plain(tag)).await.unwrap(), tag);
    assert_eq!(dest.read(&commit).await.unwrap().data.as_ref(), raw.as_slice());
    assert_eq!(dest.read(&tag).await.unwrap().data.as_ref(), tag_raw.as_slice());
}

#[tokio::test]
async fn test_legacy_file_modes_normalised() {
    let fx = Fixture::new();
    let file = fx.blob(b"old file\n").await;
    let sub = fx.tree(vec![]).await;
    let mut raw = b"100664 file.txt\0".to_vec();
    raw.extend_from_slice(file.as_bytes());
    raw.extend_from_slice(b"040000 sub\0");
    raw.extend_from_slice(sub.as_bytes());
    let tree = fx
        .source
        .insert(ObjectKind::Tree, Bytes::from(raw))
        .await
        .unwrap();

    let (resolver, dest) = fx.resolver(&[]);
    let new_tree = resolver.resolve(TaskKey::plain(tree)).await.unwrap();
    assert_ne!(new_tree, tree);

    let converted = read_tree(&dest, &new_tree).await;
    assert_eq!(converted.entries[0].mode, FileMode::Regular);
    assert_eq!(converted.entries[0].id, file);
    assert_eq!(converted.entries[1].mode, FileMode::Tree);
    let data = dest.read(&new_tree).await.unwrap().data;
    assert!(data.starts_with(b"100644 file.txt\0"));
    assert!(lfsmig_core::checker::check_tree(&data).is_ok());
}

#[tokio::test]
async fn test_commit_round_trip_with_two_parents() {
    let fx = Fixture::new();
    let readme = fx.blob(b"readme\n").await;
    let tree = fx.tree(vec![TreeEntry::new(FileMode::Regular, "README", readme)]).await;
    let left = fx.commit(tree, vec![], "left\n").await;
    let right = fx.commit(tree, vec![], "right\n").await;
    let merge = fx.commit(tree, vec![left, right], "merge\n").await;

    let (resolver, dest) = fx.resolver(&[".bin"]);
    let new_merge = resolver.resolve(TaskKey::plain(merge)).await.unwrap();

    let source = Commit::parse(&fx.source.read(&merge).await.unwrap().data).unwrap();
    let converted = Commit::parse(&dest.read(&new_merge).await.unwrap().data).unwrap();
    assert_eq!(converted.author, source.author);
    assert_eq!(converted.committer, source.committer);
    assert_eq!(converted.encoding, source.encoding);
    assert_eq!(converted.message, source.message);
    assert_eq!(
        converted.parents,
        vec![
            resolver.cached(&TaskKey::plain(left)).unwrap(),
            resolver.cached(&TaskKey::plain(right)).unwrap(),
        ]
    );

    // The root tree gains only the attributes file
    let new_tree = read_tree(&dest, &converted.tree).await;
    let mut expected = Tree::new(vec![
        TreeEntry::new(FileMode::Regular, "README", readme),
        TreeEntry::new(
            FileMode::Regular,
            ".gitattributes",
            ObjectId::for_object(ObjectKind::Blob, format!("{}\n", lfs_rule(".bin")).as_bytes()),
        ),
    ]);
    expected.sort_canonical();
    assert_eq!(converted.tree, ObjectId::for_object(ObjectKind::Tree, &expected.encode()));
    assert_eq!(new_tree, expected);

    // One root tree shared by three commits is converted once
    assert_eq!(resolver.stats().converted(TaskKind::RootTree), 1);
    assert_eq!(resolver.stats().converted(TaskKind::Plain), 4);
}

#[tokio::test]
async fn test_shared_blob_converted_once() {
    let fx = Fixture::new();
    let shared = fx.blob(b"shared content").await;
    let big = fx.blob(b"shared big content").await;
    let tree = fx
        .tree(vec![
            TreeEntry::new(FileMode::Regular, "one.txt", shared),
            TreeEntry::new(FileMode::Regular, "two.txt", shared),
            TreeEntry::new(FileMode::Regular, "one.bin", big),
            TreeEntry::new(FileMode::Regular, "two.bin", big),
        ])
        .await;

    let (resolver, dest) = fx.resolver(&[".bin"]);
    let new_tree = resolver.resolve(TaskKey::plain(tree)).await.unwrap();

    // tree + one copied blob
    assert_eq!(resolver.stats().converted(TaskKind::Plain), 2);
    assert_eq!(resolver.stats().converted(TaskKind::LargeBlobSubstitute), 1);

    let rebuilt = read_tree(&dest, &new_tree).await;
    assert_eq!(rebuilt.entries.len(), 4);
    let ids: Vec<_> = rebuilt.iter().map(|e| e.id).collect();
    assert_eq!(ids[0], ids[2]);
    assert_eq!(ids[1], ids[3]);
}

#[tokio::test]
async fn test_rebuilt_tree_is_canonically_sorted() {
    let fx = Fixture::new();
    let blob = fx.blob(b"x").await;
    let sub = fx.tree(vec![TreeEntry::new(FileMode::Regular, "f", blob)]).await;
    let tree = fx
        .tree(vec![
            TreeEntry::new(FileMode::Regular, "foo.txt", blob),
            TreeEntry::new(FileMode::Tree, "foo", sub),
            TreeEntry::new(FileMode::Regular, "foo-bar", blob),
            TreeEntry::new(FileMode::Executable, "Zeta", blob),
            TreeEntry::new(FileMode::Symlink, "link.bin", blob),
        ])
        .await;

    let (resolver, dest) = fx.resolver(&[".bin"]);
    let new_tree = resolver.resolve(TaskKey::plain(tree)).await.unwrap();
    let rebuilt = read_tree(&dest, &new_tree).await;
    let names: Vec<_> = rebuilt.iter().map(|e| e.name_lossy()).collect();
    assert_eq!(names, vec!["Zeta", "foo-bar", "foo.txt", "foo", "link.bin"]);

    // Symlinks are never substituted
    assert_eq!(rebuilt.entries[4].id, blob);
    assert_eq!(rebuilt.entries[4].mode, FileMode::Symlink);
}

#[tokio::test]
async fn test_gitlink_entries_kept() {
    let fx = Fixture::new();
    let submodule = ObjectId::new([0x42; 20]);
    let tree = fx
        .tree(vec![TreeEntry::new(FileMode::Gitlink, "vendor.bin", submodule)])
        .await;

    let (resolver, dest) = fx.resolver(&[".bin"]);
    let new_tree = resolver.resolve(TaskKey::plain(tree)).await.unwrap();
    let rebuilt = read_tree(&dest, &new_tree).await;
    assert_eq!(rebuilt.entries[0].id, submodule);
    assert_eq!(rebuilt.entries[0].mode, FileMode::Gitlink);
    assert!(!dest.exists(&submodule).await.unwrap());
}

#[tokio::test]
async fn test_conversion_is_deterministic() {
    let fx = Fixture::new();
    let big = fx.blob(&[1u8; 1000]).await;
    let small = fx.blob(b"small").await;
    let root = fx
        .tree(vec![
            TreeEntry::new(FileMode::Regular, "big.bin", big),
            TreeEntry::new(FileMode::Regular, "small.txt", small),
        ])
        .await;
    let first = fx.commit(root, vec![], "first\n").await;
    let second = fx.commit(root, vec![first], "second\n").await;

    let (resolver_a, dest_a) = fx.resolver(&[".bin"]);
    let (resolver_b, dest_b) = fx.resolver(&[".bin"]);
    let id_a = resolver_a.resolve(TaskKey::plain(second)).await.unwrap();
    let id_b = resolver_b.resolve(TaskKey::plain(second)).await.unwrap();

    assert_eq!(id_a, id_b);
    assert_eq!(dest_a.objects(), dest_b.objects());
}

#[tokio::test]
async fn test_substitution_reuses_cache_across_runs() {
    let fx = Fixture::new();
    let content = b"identical large content".to_vec();
    let big = fx.blob(&content).await;
    let tree = fx.tree(vec![TreeEntry::new(FileMode::Regular, "x.bin", big)]).await;
    let config = fx.config(&[".bin"]);

    let (first, _) = fx.resolver(&[".bin"]);
    let (second, _) = fx.resolver(&[".bin"]);
    let id_first = first.resolve(TaskKey::plain(tree)).await.unwrap();
    let id_second = second.resolve(TaskKey::plain(tree)).await.unwrap();
    assert_eq!(id_first, id_second);

    let pointer = LfsPointer::new(hex::encode(Sha256::digest(&content)), content.len() as u64);
    assert_eq!(std::fs::read(pointer.cache_path(&config.lfs_objects_dir)).unwrap(), content);
    // The second staging file was discarded
    assert!(!config.staging_dir.join(big.to_hex()).exists());
}

#[tokio::test]
async fn test_annotated_tag_conversion() {
    let fx = Fixture::new();
    let big = fx.blob(b"payload").await;
    let root = fx.tree(vec![TreeEntry::new(FileMode::Regular, "p.bin", big)]).await;
    let commit = fx.commit(root, vec![], "tagged\n").await;
    let tag = Tag {
        object: commit,
        kind: ObjectKind::Commit,
        name: b"v1.0".to_vec(),
        tagger: Some(Signature::new("T Agger", "tagger@example.com", 1_700_000_200, 0)),
        message: b"release\n".to_vec(),
    };
    let tag_id = fx
        .source
        .insert(ObjectKind::Tag, Bytes::from(tag.encode()))
        .await
        .unwrap();

    let (resolver, dest) = fx.resolver(&[".bin"]);
    let new_tag = resolver.resolve(TaskKey::plain(tag_id)).await.unwrap();
    let converted = Tag::parse(&dest.read(&new_tag).await.unwrap().data).unwrap();

    assert_eq!(converted.object, resolver.cached(&TaskKey::plain(commit)).unwrap());
    assert_ne!(converted.object, commit);
    assert_eq!(converted.kind, ObjectKind::Commit);
    assert_eq!(converted.name, tag.name);
    assert_eq!(converted.tagger, tag.tagger);
    assert_eq!(converted.message, tag.message);
}

#[tokio::test]
async fn test_kind_mismatch_is_integrity_error() {
    let fx = Fixture::new();
    let blob = fx.blob(b"not a tree").await;

    let (resolver, _) = fx.resolver(&[".bin"]);
    let err = resolver
        .resolve(TaskKey::new(TaskKind::RootTree, blob))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConvertError::KindMismatch { kind: TaskKind::RootTree, found: ObjectKind::Blob, .. }
    ));
    assert!(err.is_integrity());
}

#[tokio::test]
async fn test_missing_object_fails() {
    let fx = Fixture::new();
    let missing = ObjectId::new([7; 20]);
    let tree = fx.tree(vec![TreeEntry::new(FileMode::Regular, "gone.txt", missing)]).await;

    let (resolver, _) = fx.resolver(&[]);
    let err = resolver.resolve(TaskKey::plain(tree)).await.unwrap_err();
    assert!(matches!(err, ConvertError::Storage(_)));
}
