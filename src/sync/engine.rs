//! # Sync Engine
//!
//! Given a staged source tree (already cloned and checked out at the
//! target commit), a set of resolved mappings, and a live destination
//! root, produces and (unless `dry_run`) applies the file-level delta that
//! makes the managed subpaths of the live root bit-equal the mappings'
//! projection of the source tree (§4.2).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::warn;
use walkdir::WalkDir;

use crate::crd::{MappingType, ResolvedMapping};

use super::error::SyncError;
use super::plan::{apply_op, diff_adds_replaces, diff_orphans, normalize_under_root, FileOp, SyncReport};
use super::template::{self, TemplateContext};

/// Glob pattern that masks version-control metadata; always enforced in
/// addition to whatever the unit/profile configure (§3 "Exclude patterns").
const VCS_EXCLUDE: &str = "**/.git/**";

const STAGING_DIR_NAME: &str = ".sync-staging";

#[derive(Debug, Clone)]
pub struct SyncEngine {
    live_root: PathBuf,
}

impl SyncEngine {
    #[must_use]
    pub fn new(live_root: PathBuf) -> Self {
        Self { live_root }
    }

    fn staging_root(&self) -> PathBuf {
        self.live_root.join(STAGING_DIR_NAME)
    }

    fn build_excludes(patterns: &[String]) -> Result<GlobSet, SyncError> {
        let mut builder = GlobSetBuilder::new();
        builder.add(Glob::new(VCS_EXCLUDE).map_err(|e| SyncError::Other(e.into()))?);
        for pattern in patterns {
            builder.add(Glob::new(pattern).map_err(|e| SyncError::Other(e.into()))?);
        }
        builder.build().map_err(|e| SyncError::Other(e.into()))
    }

    /// Run one sync tick: stage every mapping's projection, diff against
    /// the live root, and (unless `dry_run`) apply the result.
    pub async fn sync(
        &self,
        source_root: &Path,
        mappings: &[ResolvedMapping],
        exclude_patterns: &[String],
        ctx: &TemplateContext,
        dry_run: bool,
    ) -> Result<SyncReport, SyncError> {
        let staging_root = self.staging_root();
        if staging_root.exists() {
            tokio::fs::remove_dir_all(&staging_root).await?;
        }
        tokio::fs::create_dir_all(&staging_root).await?;

        let excludes = Self::build_excludes(exclude_patterns)?;
        let mut managed_roots: Vec<(PathBuf, PathBuf, bool)> = Vec::new(); // (staging, live, is_dir)

        for mapping in mappings {
            let expanded_source = template::expand(&mapping.source, ctx)?;
            let expanded_dest = template::expand(&mapping.destination, ctx)?;

            let source_abs = normalize_under_root(source_root, &expanded_source)?;
            let live_abs = normalize_under_root(&self.live_root, &expanded_dest)?;
            let dest_rel = live_abs
                .strip_prefix(&self.live_root)
                .expect("live_abs was normalized under live_root")
                .to_path_buf();
            let staging_abs = staging_root.join(&dest_rel);

            if !source_abs.exists() {
                if mapping.required {
                    return Err(SyncError::SourceMissing(expanded_source));
                }
                warn!(source = %expanded_source, "optional mapping source missing, skipping");
                continue;
            }

            match mapping.r#type {
                MappingType::File => {
                    if let Some(parent) = staging_abs.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::copy(&source_abs, &staging_abs).await?;
                    managed_roots.push((staging_abs, live_abs, false));
                }
                MappingType::Dir => {
                    stage_directory(&source_abs, &staging_abs, &excludes).await?;
                    managed_roots.push((staging_abs, live_abs, true));
                }
            }
        }

        let mut add_replace_ops = diff_adds_replaces(&staging_root, &self.live_root)?;
        let mut delete_ops = Vec::new();
        for (staging_abs, live_abs, _is_dir) in &managed_roots {
            delete_ops.extend(diff_orphans(staging_abs, live_abs)?);
        }

        let mut report = SyncReport::default();
        for op in &add_replace_ops {
            match op.op {
                FileOp::Add => report.added += 1,
                FileOp::Replace => report.modified += 1,
                FileOp::Delete => unreachable!("diff_adds_replaces never emits Delete"),
            }
        }
        report.deleted = delete_ops.len() as u32;
        report.affected_projects = affected_projects(&add_replace_ops, &delete_ops, &self.live_root);

        if !dry_run {
            add_replace_ops.sort_by(|a, b| a.live_path.cmp(&b.live_path));
            for op in &add_replace_ops {
                let rel = op
                    .live_path
                    .strip_prefix(&self.live_root)
                    .expect("planned op is under live_root");
                let staging_path = staging_root.join(rel);
                apply_op(op, Some(&staging_path))?;
            }
            for op in &delete_ops {
                apply_op(op, None)?;
            }
        }

        tokio::fs::remove_dir_all(&staging_root).await.ok();
        Ok(report)
    }
}

async fn stage_directory(source: &Path, staging_dest: &Path, excludes: &GlobSet) -> Result<(), SyncError> {
    tokio::fs::create_dir_all(staging_dest).await?;
    for entry in WalkDir::new(source)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        let rel = entry
            .path()
            .strip_prefix(source)
            .expect("walked entry is under source");
        if excludes.is_match(rel) {
            continue;
        }
        let dest = staging_dest.join(rel);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(entry.path(), &dest).await?;
    }
    Ok(())
}

/// Topmost path segments under the distinguished `projects/` destination
/// touched by this tick (§4.2 step 5).
fn affected_projects(
    add_replace: &[super::plan::PlannedOp],
    deletes: &[super::plan::PlannedOp],
    live_root: &Path,
) -> Vec<String> {
    let mut projects = BTreeSet::new();
    for op in add_replace.iter().chain(deletes.iter()) {
        if let Ok(rel) = op.live_path.strip_prefix(live_root) {
            let mut components = rel.components();
            if components.next().is_some_and(|c| c.as_os_str() == "projects") {
                if let Some(project) = components.next() {
                    projects.insert(project.as_os_str().to_string_lossy().into_owned());
                }
            }
        }
    }
    projects.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::MappingType;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn ctx() -> TemplateContext {
        TemplateContext {
            gateway_name: "gw-1".to_string(),
            cr_name: "plant-floor-a".to_string(),
            namespace: "scada".to_string(),
            labels: BTreeMap::new(),
            r#ref: "main".to_string(),
            commit: "a".repeat(40),
            vars: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn adds_then_is_idempotent_on_rerun() {
        let source = tempdir().unwrap();
        let live = tempdir().unwrap();
        tokio::fs::create_dir_all(source.path().join("projects/A"))
            .await
            .unwrap();
        tokio::fs::write(source.path().join("projects/A/proj.json"), b"{}")
            .await
            .unwrap();

        let engine = SyncEngine::new(live.path().to_path_buf());
        let mappings = vec![ResolvedMapping {
            source: "projects/".to_string(),
            destination: "projects/".to_string(),
            r#type: MappingType::Dir,
            required: true,
        }];

        let first = engine
            .sync(source.path(), &mappings, &[], &ctx(), false)
            .await
            .unwrap();
        assert_eq!(first.added, 1);
        assert_eq!(first.modified, 0);
        assert_eq!(first.deleted, 0);
        assert!(live.path().join("projects/A/proj.json").exists());

        let second = engine
            .sync(source.path(), &mappings, &[], &ctx(), false)
            .await
            .unwrap();
        assert_eq!(second.added, 0);
        assert_eq!(second.modified, 0);
        assert_eq!(second.deleted, 0);
    }

    #[tokio::test]
    async fn orphan_outside_managed_set_survives() {
        let source = tempdir().unwrap();
        let live = tempdir().unwrap();
        tokio::fs::create_dir_all(source.path().join("projects/A"))
            .await
            .unwrap();
        tokio::fs::write(source.path().join("projects/A/proj.json"), b"{}")
            .await
            .unwrap();
        tokio::fs::create_dir_all(live.path().join("projects/B"))
            .await
            .unwrap();
        tokio::fs::write(live.path().join("projects/B/proj.json"), b"stale")
            .await
            .unwrap();
        tokio::fs::create_dir_all(live.path().join("config"))
            .await
            .unwrap();
        tokio::fs::write(live.path().join("config/untouched.json"), b"keep")
            .await
            .unwrap();

        let engine = SyncEngine::new(live.path().to_path_buf());
        let mappings = vec![ResolvedMapping {
            source: "projects/".to_string(),
            destination: "projects/".to_string(),
            r#type: MappingType::Dir,
            required: true,
        }];

        let report = engine
            .sync(source.path(), &mappings, &[], &ctx(), false)
            .await
            .unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(report.deleted, 1);
        assert!(!live.path().join("projects/B/proj.json").exists());
        assert!(live.path().join("config/untouched.json").exists());
    }

    #[tokio::test]
    async fn dry_run_leaves_live_tree_untouched() {
        let source = tempdir().unwrap();
        let live = tempdir().unwrap();
        tokio::fs::create_dir_all(source.path().join("projects/A"))
            .await
            .unwrap();
        tokio::fs::write(source.path().join("projects/A/proj.json"), b"{}")
            .await
            .unwrap();

        let engine = SyncEngine::new(live.path().to_path_buf());
        let mappings = vec![ResolvedMapping {
            source: "projects/".to_string(),
            destination: "projects/".to_string(),
            r#type: MappingType::Dir,
            required: true,
        }];

        let report = engine
            .sync(source.path(), &mappings, &[], &ctx(), true)
            .await
            .unwrap();
        assert_eq!(report.added, 1);
        assert!(!live.path().join("projects/A/proj.json").exists());
    }

    #[tokio::test]
    async fn required_missing_source_aborts() {
        let source = tempdir().unwrap();
        let live = tempdir().unwrap();
        let engine = SyncEngine::new(live.path().to_path_buf());
        let mappings = vec![ResolvedMapping {
            source: "projects/".to_string(),
            destination: "projects/".to_string(),
            r#type: MappingType::Dir,
            required: true,
        }];

        let err = engine
            .sync(source.path(), &mappings, &[], &ctx(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::SourceMissing(_)));
    }
}
