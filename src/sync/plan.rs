//! # Diff Planning and Path Safety
//!
//! Computing the file-level delta between a staged tree and the live tree,
//! and the path-normalization guard that rejects any destination that
//! would escape the live root (§4.2 "Path safety", §8 invariant 2).

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use super::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Add,
    Replace,
    Delete,
}

#[derive(Debug, Clone)]
pub struct PlannedOp {
    pub live_path: PathBuf,
    pub op: FileOp,
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub added: u32,
    pub modified: u32,
    pub deleted: u32,
    pub affected_projects: Vec<String>,
}

/// Join `relative` onto `root`, rejecting `..` components and absolute
/// paths outright. Unlike `Path::canonicalize`, this does not require the
/// path to exist yet — mappings describe destinations the sync is about to
/// create.
pub fn normalize_under_root(root: &Path, relative: &str) -> Result<PathBuf, SyncError> {
    let mut out = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(SyncError::PathEscape(relative.to_string()));
            }
        }
    }
    if !out.starts_with(root) {
        return Err(SyncError::PathEscape(relative.to_string()));
    }
    Ok(out)
}

/// Content hash used for the idempotence check (§4.2 "Idempotence", §8
/// invariant 6): a file already matching the staged content at the byte
/// level is left untouched.
pub fn hash_file(path: &Path) -> std::io::Result<[u8; 32]> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().into())
}

/// Compute `Add`/`Replace` ops by walking the *whole* staging tree and
/// comparing each staged file against its live counterpart. Every file
/// staged is, by construction, part of some mapping's managed destination,
/// so no separate managed-set check is needed for this half of the plan.
pub fn diff_adds_replaces(staging_root: &Path, live_root: &Path) -> std::io::Result<Vec<PlannedOp>> {
    let mut ops = Vec::new();
    if !staging_root.exists() {
        return Ok(ops);
    }
    for entry in WalkDir::new(staging_root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        let rel = entry
            .path()
            .strip_prefix(staging_root)
            .expect("walked entry is under staging_root")
            .to_path_buf();
        let live_path = live_root.join(&rel);
        if !live_path.exists() {
            ops.push(PlannedOp {
                live_path,
                op: FileOp::Add,
            });
        } else {
            let staged_hash = hash_file(entry.path())?;
            let live_hash = hash_file(&live_path)?;
            if staged_hash != live_hash {
                ops.push(PlannedOp {
                    live_path,
                    op: FileOp::Replace,
                });
            }
        }
    }
    Ok(ops)
}

/// Compute `Delete` ops (orphan cleanup) for one managed subtree:
/// `staging_subtree`/`live_subtree` are the corresponding slices of the
/// staging and live roots under a single mapping's destination. A live
/// file is deleted only if it is inside this managed subtree and absent
/// from the staging subtree (§4.2 step 3) — orphan cleanup never looks
/// outside the subtrees passed in.
pub fn diff_orphans(staging_subtree: &Path, live_subtree: &Path) -> std::io::Result<Vec<PlannedOp>> {
    let mut ops = Vec::new();
    if !live_subtree.exists() {
        return Ok(ops);
    }

    if live_subtree.is_file() {
        if !staging_subtree.exists() {
            ops.push(PlannedOp {
                live_path: live_subtree.to_path_buf(),
                op: FileOp::Delete,
            });
        }
        return Ok(ops);
    }

    let mut staged_relative = BTreeSet::new();
    if staging_subtree.exists() {
        for entry in WalkDir::new(staging_subtree)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            let rel = entry
                .path()
                .strip_prefix(staging_subtree)
                .expect("walked entry is under staging_subtree")
                .to_path_buf();
            staged_relative.insert(rel);
        }
    }

    for entry in WalkDir::new(live_subtree)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        let rel = entry
            .path()
            .strip_prefix(live_subtree)
            .expect("walked entry is under live_subtree")
            .to_path_buf();
        if !staged_relative.contains(&rel) {
            ops.push(PlannedOp {
                live_path: entry.path().to_path_buf(),
                op: FileOp::Delete,
            });
        }
    }

    Ok(ops)
}

/// Apply a planned op: `Add`/`Replace` copy from the staging subtree,
/// `Delete` removes the live file. Each operation is individually durable;
/// the engine makes no cross-file atomicity claim (§4.2 step 4).
pub fn apply_op(op: &PlannedOp, staging_path: Option<&Path>) -> std::io::Result<()> {
    match op.op {
        FileOp::Add | FileOp::Replace => {
            let src = staging_path.expect("Add/Replace carries a staging source path");
            if let Some(parent) = op.live_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(src, &op.live_path)?;
        }
        FileOp::Delete => {
            if op.live_path.exists() {
                std::fs::remove_file(&op.live_path)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_parent_dir_escape() {
        let root = Path::new("/live");
        assert!(matches!(
            normalize_under_root(root, "../../etc/passwd"),
            Err(SyncError::PathEscape(_))
        ));
    }

    #[test]
    fn rejects_absolute_destination() {
        let root = Path::new("/live");
        assert!(matches!(
            normalize_under_root(root, "/etc/passwd"),
            Err(SyncError::PathEscape(_))
        ));
    }

    #[test]
    fn allows_plain_relative_destination() {
        let root = Path::new("/live");
        let out = normalize_under_root(root, "projects/blue").unwrap();
        assert_eq!(out, Path::new("/live/projects/blue"));
    }
}
