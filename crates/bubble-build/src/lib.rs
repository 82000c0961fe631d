//! Container image construction.
//!
//! Images form a static DAG: each entry names a setup script and a
//! parent, where the parent is either another entry (built recursively
//! on demand) or a runtime-remote image. Toolchain variants (e.g.
//! `lean-v4.27.0`) are derived programmatically from the `lean` base
//! image, guarded by on-disk locks so concurrent processes build each
//! variant at most once.

pub mod images;
pub mod lock;
pub mod vscode;

pub use images::{
    build_image, build_lean_toolchain_image, image_names, sanitize_toolchain_version,
    spawn_background_toolchain_build, BuildError,
};
pub use lock::BuildLock;
