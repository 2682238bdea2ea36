//! Error kinds for Git operations (§4.1 contract, §7 "Transient"/"Auth").

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git authentication failed for {url}")]
    AuthFailure { url: String },

    #[error("ref {r#ref} not found in {url}")]
    NotFound { url: String, r#ref: String },

    #[error("transient git failure against {url}: {source}")]
    Transient {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid git URL: {url}")]
    InvalidUrl { url: String },
}

impl GitError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, GitError::Transient { .. })
    }
}
