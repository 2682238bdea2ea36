//! # Clone / Fetch + Checkout
//!
//! The sync agent's local working copy operations (§4.3 step 3): first run
//! clones at the resolved commit; subsequent runs fetch and check out the
//! commit. Retry scheduling (the `{30s, 60s, 120s, 300s cap}` backoff) is
//! the caller's responsibility — see `agent::poll_loop` — so that a single
//! permanent failure (auth, not found) can bubble out immediately instead
//! of being retried.
//!
//! Grounded in the same `tokio::process::Command::new("git")` pattern the
//! reconciler uses for its Argo CD artifact clone.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::info;

use super::error::GitError;

async fn run_git(args: &[&str], cwd: Option<&Path>) -> Result<std::process::Output, GitError> {
    let mut cmd = Command::new("git");
    if let Some(dir) = cwd {
        cmd.arg("-C").arg(dir);
    }
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    cmd.output().await.map_err(|source| GitError::Transient {
        url: String::new(),
        source: source.into(),
    })
}

fn classify_failure(repo_url: &str, output: &std::process::Output) -> GitError {
    let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
    if stderr.contains("authentication failed")
        || stderr.contains("permission denied")
        || stderr.contains("could not read username")
    {
        GitError::AuthFailure {
            url: repo_url.to_string(),
        }
    } else if stderr.contains("not found") || stderr.contains("does not exist") {
        GitError::NotFound {
            url: repo_url.to_string(),
            r#ref: String::new(),
        }
    } else {
        GitError::Transient {
            url: repo_url.to_string(),
            source: anyhow::anyhow!("{}", String::from_utf8_lossy(&output.stderr)),
        }
    }
}

/// Ensure `clone_root` holds a working copy of `repo_url` checked out at
/// `commit`. Clones if `clone_root/.git` is absent, otherwise fetches just
/// that commit and checks it out.
pub async fn ensure_checked_out(
    repo_url: &str,
    commit: &str,
    clone_root: &Path,
) -> Result<(), GitError> {
    let git_dir = clone_root.join(".git");
    if !git_dir.exists() {
        tokio::fs::create_dir_all(clone_root)
            .await
            .map_err(|source| GitError::Transient {
                url: repo_url.to_string(),
                source: source.into(),
            })?;

        info!(repo = %repo_url, %commit, "cloning working copy");
        let output = run_git(
            &["clone", "--no-checkout", repo_url, "."],
            Some(clone_root),
        )
        .await?;
        if !output.status.success() {
            return Err(classify_failure(repo_url, &output));
        }
    } else {
        let output = run_git(
            &["fetch", "--depth", "1", "origin", commit],
            Some(clone_root),
        )
        .await?;
        if !output.status.success() {
            return Err(classify_failure(repo_url, &output));
        }
    }

    let checkout = run_git(&["checkout", "--force", commit], Some(clone_root)).await?;
    if !checkout.status.success() {
        return Err(classify_failure(repo_url, &checkout));
    }
    Ok(())
}
