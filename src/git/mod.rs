//! # Git Operations
//!
//! Ref resolution without cloning (§4.1), plus the agent's local
//! clone/fetch-and-checkout helper (§4.3 step 3). Both shell out to the
//! system `git` binary rather than linking `git2`, the same tradeoff the
//! teacher made for its Argo CD artifact path: command-line git avoids
//! pulling in OpenSSL through a Git library's TLS backend.

mod checkout;
mod error;
mod resolver;

pub use checkout::ensure_checked_out;
pub use error::GitError;
pub use resolver::{resolve, ResolvedRef};
