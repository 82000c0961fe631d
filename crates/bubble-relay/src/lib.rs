//! Bubble-in-bubble relay daemon.
//!
//! Listens for requests from inside containers to open new bubbles.
//!
//! On Linux the daemon listens on a Unix socket under the data dir; on
//! macOS it listens on loopback TCP (Unix sockets can't traverse
//! Colima's virtio-fs mount) and records the port in `relay.port`.
//!
//! Security model:
//! - Token-based container authentication; rate limiting keys on the
//!   authenticated container name, never on client-supplied data.
//! - Only repos already mirrored in the git store are allowed (no new
//!   clones can be triggered from inside a container).
//! - Local paths, option-like targets, traversal sequences, and shell
//!   metacharacters are rejected.
//! - Per-container and global sliding-window rate limits.
//! - Every request outcome is appended to `relay.log` with control
//!   characters escaped.

pub mod daemon;
pub mod log;
pub mod ratelimit;
pub mod tokens;
pub mod validate;

pub use daemon::{process_request, run_daemon, RelayContext, RelayRequest, RelayResponse};
pub use ratelimit::RateLimiter;
pub use tokens::{generate_relay_token, remove_relay_token, TokenRegistry};
pub use validate::{validate_relay_target, RelayStatus, MAX_TARGET_LENGTH};

/// Maximum request size in bytes.
pub const MAX_REQUEST_SIZE: usize = 1024;

/// Concurrent connection handlers; connections beyond this are dropped
/// before any processing.
pub const MAX_CONCURRENT_HANDLERS: usize = 4;
