//! Whole-repository migration
//!
//! Converts every ref of a source git directory into a destination git
//! directory, then points the destination refs at the converted objects.

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::config::MigrateConfig;
use crate::converter::GitConverter;
use crate::loose::LooseObjectStore;
use crate::object::ObjectId;
use crate::refs::{read_head, read_refs, write_head, write_ref, Head};
use crate::resolver::Resolver;
use crate::task::{TaskKey, TaskKind};

/// Outcome of a migration run
#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    /// `(ref name, source id, destination id)`
    pub refs: Vec<(String, ObjectId, ObjectId)>,
    /// Conversions performed per task kind
    pub converted: Vec<(TaskKind, u64)>,
    pub duration_ms: u64,
}

impl MigrationReport {
    pub fn converted(&self, kind: TaskKind) -> u64 {
        self.converted
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }

    /// Format a human-readable summary.
    pub fn summary(&self) -> String {
        let total: u64 = self.converted.iter().map(|(_, n)| n).sum();
        format!(
            "Migrated {} refs, {} objects ({} plain, {} root trees, {} attribute files, {} LFS pointers)\n\
             Time: {}ms",
            self.refs.len(),
            total,
            self.converted(TaskKind::Plain),
            self.converted(TaskKind::RootTree),
            self.converted(TaskKind::AttributeRewrite),
            self.converted(TaskKind::LargeBlobSubstitute),
            self.duration_ms,
        )
    }
}

/// Convert the objects behind `refs`; returns the new id for each ref
pub async fn convert_refs(
    resolver: &Resolver<GitConverter>,
    refs: &BTreeMap<String, ObjectId>,
    jobs: usize,
) -> Result<BTreeMap<String, ObjectId>> {
    let roots: BTreeSet<ObjectId> = refs.values().copied().collect();
    let keys = roots.into_iter().map(TaskKey::plain).collect();
    let converted: HashMap<TaskKey, ObjectId> = resolver
        .resolve_all(keys, jobs)
        .await
        .context("Conversion failed")?
        .into_iter()
        .collect();

    refs.iter()
        .map(|(name, id)| {
            converted
                .get(&TaskKey::plain(*id))
                .map(|new_id| (name.clone(), *new_id))
                .with_context(|| format!("Ref {} was not converted", name))
        })
        .collect()
}

/// Migrate `source` (a git directory or working tree) into `destination`
pub async fn migrate(source: &Path, destination: &Path, config: MigrateConfig) -> Result<MigrationReport> {
    config.validate()?;
    let start = Instant::now();

    let src = LooseObjectStore::open(source)
        .with_context(|| format!("Failed to open source repository {:?}", source))?;
    let src_dir = src.git_dir().to_path_buf();
    let dst = LooseObjectStore::init(destination)
        .with_context(|| format!("Failed to initialize destination repository {:?}", destination))?;
    let dst_dir = dst.git_dir().to_path_buf();

    let refs = read_refs(&src_dir)?;
    if refs.is_empty() {
        tracing::warn!("No refs found in {:?}", src_dir);
    }
    tracing::info!(
        "Converting {} refs with {} jobs, tracking {:?}",
        refs.len(),
        config.jobs,
        config.suffixes
    );

    let jobs = config.jobs;
    let converter = GitConverter::new(Arc::new(src), Arc::new(dst), config)?;
    let resolver = Resolver::new(converter);

    let converted = convert_refs(&resolver, &refs, jobs).await?;
    let mut report = MigrationReport::default();
    for (name, new_id) in &converted {
        write_ref(&dst_dir, name, new_id)?;
        tracing::info!("{}: {} -> {}", name, refs[name], new_id);
        report.refs.push((name.clone(), refs[name], *new_id));
    }

    match read_head(&src_dir)? {
        Some(Head::Detached(id)) => {
            let new_id = resolver
                .resolve(TaskKey::plain(id))
                .await
                .context("Failed to convert detached HEAD")?;
            write_head(&dst_dir, &Head::Detached(new_id))?;
        }
        Some(head) => write_head(&dst_dir, &head)?,
        None => {}
    }

    resolver
        .factory()
        .flush()
        .await
        .context("Failed to flush destination repository")?;

    report.converted = TaskKind::ALL
        .iter()
        .map(|kind| (*kind, resolver.stats().converted(*kind)))
        .collect();
    report.duration_ms = start.elapsed().as_millis() as u64;
    tracing::info!("{}", report.summary());
    Ok(report)
}
