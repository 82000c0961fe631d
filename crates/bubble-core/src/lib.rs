//! Core types and configuration for bubble.
//!
//! This crate defines the `config.toml` schema ([`Config`]), the data
//! directory layout ([`DataDir`]), target string parsing ([`Target`]),
//! the learned short-name registry ([`RepoRegistry`]), container name
//! generation, and the persistent bubble registry.

pub mod config;
pub mod error;
pub mod fsutil;
pub mod lifecycle;
pub mod naming;
pub mod paths;
pub mod repo_registry;
pub mod shell;
pub mod target;

pub use config::Config;
pub use error::{Error, Result};
pub use lifecycle::{BubbleInfo, BubbleRegistry};
pub use naming::{deduplicate_name, generate_name};
pub use paths::DataDir;
pub use repo_registry::RepoRegistry;
pub use shell::sh_quote;
pub use target::{Target, TargetKind, TargetParseError};
