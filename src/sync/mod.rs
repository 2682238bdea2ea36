//! # Sync Engine
//!
//! Plans and applies the file-level delta between a staged source tree and
//! a gateway's live data directory (§4.2).

mod engine;
mod error;
mod plan;
mod template;

pub use engine::SyncEngine;
pub use error::SyncError;
pub use plan::{FileOp, PlannedOp, SyncReport};
pub use template::TemplateContext;
