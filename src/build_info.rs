//! Build-time metadata injected by `build.rs` via `cargo:rustc-env=`.

/// Version string reported by agents in their status entries and by
/// `stokerctl` / `crdgen` in their `--version` output: `<crate version>-<git hash>`.
#[must_use]
pub fn version_string() -> String {
    format!("{}-{}", env!("CARGO_PKG_VERSION"), env!("BUILD_GIT_HASH"))
}
