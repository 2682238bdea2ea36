//! # Git Ref Resolver
//!
//! Translates a symbolic ref to an immutable 40-hex commit ID without
//! cloning (§4.1). Shells out to `git ls-remote`, which performs exactly
//! the "probe advertised refs over the wire" round trip the contract
//! describes and nothing more — grounded in the same command-line-git
//! approach the reconciler already uses for its Argo CD artifact path
//! (`controller::reconciler::get_argocd_artifact_path`), adopted here
//! instead of a `git2` dependency for the same reason: avoiding OpenSSL.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use super::error::GitError;

const RESOLVE_BUDGET: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRef {
    pub resolved_ref: String,
    pub commit_id: String,
}

fn is_full_commit_id(r#ref: &str) -> bool {
    r#ref.len() == 40 && r#ref.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Resolve `ref` against `repo_url` to an immutable commit ID.
///
/// Resolution order: a full 40-hex ref is returned verbatim; otherwise the
/// remote's advertised refs are probed and matched first against an
/// annotated tag's target, then a lightweight tag, then a branch head.
/// Ambiguity between a tag and a branch of the same name resolves to the
/// tag (§4.1).
pub async fn resolve(repo_url: &str, r#ref: &str) -> Result<ResolvedRef, GitError> {
    if repo_url.trim().is_empty() || !looks_like_git_url(repo_url) {
        return Err(GitError::InvalidUrl {
            url: repo_url.to_string(),
        });
    }

    if is_full_commit_id(r#ref) {
        return Ok(ResolvedRef {
            resolved_ref: r#ref.to_string(),
            commit_id: r#ref.to_lowercase(),
        });
    }

    let branch_pattern = format!("refs/heads/{ref}");
    let tag_pattern = format!("refs/tags/{ref}");

    let child = Command::new("git")
        .arg("ls-remote")
        .arg("--exit-code")
        .arg(repo_url)
        .arg(&branch_pattern)
        .arg(&tag_pattern)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| GitError::Transient {
            url: repo_url.to_string(),
            source: source.into(),
        })?;

    let output = tokio::time::timeout(RESOLVE_BUDGET, child.wait_with_output())
        .await
        .map_err(|_| GitError::Transient {
            url: repo_url.to_string(),
            source: anyhow::anyhow!("git ls-remote timed out after {RESOLVE_BUDGET:?}"),
        })?
        .map_err(|source| GitError::Transient {
            url: repo_url.to_string(),
            source: source.into(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(%stderr, url = %repo_url, "git ls-remote failed");
        if looks_like_auth_failure(&stderr) {
            return Err(GitError::AuthFailure {
                url: repo_url.to_string(),
            });
        }
        if output.status.code() == Some(2) {
            return Err(GitError::NotFound {
                url: repo_url.to_string(),
                r#ref: r#ref.to_string(),
            });
        }
        return Err(GitError::Transient {
            url: repo_url.to_string(),
            source: anyhow::anyhow!("git ls-remote exited with {:?}: {stderr}", output.status),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut branch_sha: Option<String> = None;
    let mut lightweight_tag_sha: Option<String> = None;
    let mut annotated_tag_sha: Option<String> = None;

    for line in stdout.lines() {
        let mut parts = line.split_whitespace();
        let (Some(sha), Some(refname)) = (parts.next(), parts.next()) else {
            continue;
        };
        if refname == branch_pattern {
            branch_sha = Some(sha.to_string());
        } else if refname == format!("{tag_pattern}^{{}}") {
            annotated_tag_sha = Some(sha.to_string());
        } else if refname == tag_pattern {
            lightweight_tag_sha = Some(sha.to_string());
        }
    }

    let commit_id = annotated_tag_sha
        .or(lightweight_tag_sha)
        .or(branch_sha)
        .ok_or_else(|| GitError::NotFound {
            url: repo_url.to_string(),
            r#ref: r#ref.to_string(),
        })?;

    Ok(ResolvedRef {
        resolved_ref: r#ref.to_string(),
        commit_id,
    })
}

fn looks_like_git_url(url: &str) -> bool {
    url.starts_with("https://")
        || url.starts_with("http://")
        || url.starts_with("git@")
        || url.starts_with("ssh://")
}

fn looks_like_auth_failure(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("authentication failed")
        || lower.contains("permission denied")
        || lower.contains("could not read username")
        || lower.contains("403")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_commit_id_detected() {
        assert!(is_full_commit_id(&"a".repeat(40)));
        assert!(!is_full_commit_id(&"a".repeat(39)));
        assert!(!is_full_commit_id("main"));
        assert!(!is_full_commit_id(&"g".repeat(40)));
    }

    #[test]
    fn rejects_obviously_invalid_urls() {
        assert!(!looks_like_git_url("not-a-url"));
        assert!(looks_like_git_url("https://example.com/repo.git"));
        assert!(looks_like_git_url("git@github.com:org/repo.git"));
    }

    #[tokio::test]
    async fn invalid_url_is_rejected_before_spawning_git() {
        let err = resolve("not-a-url", "main").await.unwrap_err();
        assert!(matches!(err, GitError::InvalidUrl { .. }));
    }
}
