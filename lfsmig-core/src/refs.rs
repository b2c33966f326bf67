//! Reference enumeration and writing
//!
//! Reads loose refs under `refs/` and the `packed-refs` file of a git
//! directory; loose refs win when both name the same ref.

use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::object::ObjectId;

/// The repository `HEAD`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Head {
    /// `ref: refs/heads/...`
    Symbolic(String),
    Detached(ObjectId),
}

/// All refs of a git directory, keyed by full name (`refs/heads/main`)
pub fn read_refs(git_dir: &Path) -> Result<BTreeMap<String, ObjectId>> {
    let mut refs = read_packed_refs(git_dir)?;
    let root = git_dir.join("refs");
    if root.is_dir() {
        collect_loose(git_dir, &root, &mut refs)?;
    }
    Ok(refs)
}

fn read_packed_refs(git_dir: &Path) -> Result<BTreeMap<String, ObjectId>> {
    let path = git_dir.join("packed-refs");
    let mut refs = BTreeMap::new();
    if !path.exists() {
        return Ok(refs);
    }
    let text = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {:?}", path))?;
    for line in text.lines() {
        // "# pack-refs with: ..." header and "^<peeled>" lines
        if line.is_empty() || line.starts_with('#') || line.starts_with('^') {
            continue;
        }
        let (hex, name) = line
            .split_once(' ')
            .ok_or_else(|| anyhow!("Malformed packed-refs line: {}", line))?;
        let id = ObjectId::from_hex(hex)
            .map_err(|e| anyhow!("Invalid id in packed-refs for {}: {}", name, e))?;
        refs.insert(name.to_string(), id);
    }
    Ok(refs)
}

fn collect_loose(git_dir: &Path, dir: &Path, refs: &mut BTreeMap<String, ObjectId>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {:?}", dir))? {
        let path = entry?.path();
        if path.is_dir() {
            collect_loose(git_dir, &path, refs)?;
            continue;
        }
        if path.extension().is_some_and(|ext| ext == "lock") {
            continue;
        }
        let name = path
            .strip_prefix(git_dir)
            .map_err(|e| anyhow!("Ref outside git dir {:?}: {}", path, e))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let text = fs::read_to_string(&path).with_context(|| format!("Failed to read ref {}", name))?;
        let value = text.trim();
        // Symbolic refs below refs/ (e.g. refs/remotes/origin/HEAD) are skipped
        if value.starts_with("ref:") {
            continue;
        }
        let id = ObjectId::from_hex(value).map_err(|e| anyhow!("Invalid ref {}: {}", name, e))?;
        refs.insert(name, id);
    }
    Ok(())
}

pub fn read_head(git_dir: &Path) -> Result<Option<Head>> {
    let path = git_dir.join("HEAD");
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(&path).context("Failed to read HEAD")?;
    let value = text.trim();
    if let Some(target) = value.strip_prefix("ref:") {
        return Ok(Some(Head::Symbolic(target.trim().to_string())));
    }
    let id = ObjectId::from_hex(value).map_err(|e| anyhow!("Invalid detached HEAD: {}", e))?;
    Ok(Some(Head::Detached(id)))
}

/// Write a loose ref, replacing any previous value
pub fn write_ref(git_dir: &Path, name: &str, id: &ObjectId) -> Result<()> {
    if !name.starts_with("refs/") || name.split('/').any(|c| c.is_empty() || c == "..") {
        return Err(anyhow!("Refusing to write invalid ref name {:?}", name));
    }
    let path = git_dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut lock_name = path.file_name().unwrap_or_default().to_os_string();
    lock_name.push(".lock");
    let tmp_path = path.with_file_name(lock_name);
    fs::write(&tmp_path, format!("{}\n", id))?;
    fs::rename(&tmp_path, &path).with_context(|| format!("Failed to update ref {}", name))?;
    Ok(())
}

pub fn write_head(git_dir: &Path, head: &Head) -> Result<()> {
    let text = match head {
        Head::Symbolic(target) => format!("ref: {}\n", target),
        Head::Detached(id) => format!("{}\n", id),
    };
    fs::write(git_dir.join("HEAD"), text).context("Failed to write HEAD")?;
    Ok(())
}
