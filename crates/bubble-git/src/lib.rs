//! Shared git object store.
//!
//! One bare mirror per repo under `<data-dir>/git/`, used as a
//! `--reference` source so every bubble clones with near-zero new
//! objects. Mirrors are guarded by advisory exclusive file locks on
//! sibling `.lock` files; operations on the same repo serialize across
//! processes, operations on different repos are independent.

pub mod github;
pub mod store;

pub use github::{pr_head, PrHead};
pub use store::{github_url, show_file, GitError, GitStore};
