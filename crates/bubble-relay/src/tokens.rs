//! Relay token lifecycle and lookup.
//!
//! Tokens are 64-char hex secrets mapping to a container name, stored
//! in `relay-tokens.json` (mode 0600). The daemon caches the file and
//! reloads it when its mtime changes, so tokens issued by concurrent
//! `bubble open` runs are picked up without a restart.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use bubble_core::fsutil::atomic_write_with_mode;
use bubble_core::{DataDir, Error};
use rand::RngCore;

/// Longest token prefix considered during lookup; anything beyond is
/// attacker-supplied padding.
const MAX_TOKEN_LENGTH: usize = 128;

fn load_tokens(path: &Path) -> HashMap<String, String> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|content| serde_json::from_str(&content).ok())
        .unwrap_or_default()
}

fn save_tokens(path: &Path, tokens: &HashMap<String, String>) -> Result<(), Error> {
    let content = serde_json::to_string(tokens).map_err(|e| Error::StateParse {
        path: path.to_path_buf(),
        source: e,
    })?;
    // Owner-only permissions — tokens are secrets.
    atomic_write_with_mode(path, &content, Some(0o600))
}

/// Generate and persist a relay token for a container. Returns the
/// token string.
pub fn generate_relay_token(data_dir: &DataDir, container_name: &str) -> Result<String, Error> {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let token = hex::encode(bytes);

    let path = data_dir.relay_tokens_file();
    let mut tokens = load_tokens(&path);
    tokens.insert(token.clone(), container_name.to_owned());
    save_tokens(&path, &tokens)?;
    Ok(token)
}

/// Remove all tokens for a container (e.g. on destroy).
pub fn remove_relay_token(data_dir: &DataDir, container_name: &str) -> Result<(), Error> {
    let path = data_dir.relay_tokens_file();
    let mut tokens = load_tokens(&path);
    tokens.retain(|_, c| c != container_name);
    save_tokens(&path, &tokens)
}

#[derive(Default)]
struct Cache {
    tokens: HashMap<String, String>,
    mtime: Option<SystemTime>,
}

/// Thread-safe token → container lookup over the tokens file.
pub struct TokenRegistry {
    path: PathBuf,
    cache: Mutex<Cache>,
}

impl TokenRegistry {
    pub fn new(data_dir: &DataDir) -> Self {
        Self {
            path: data_dir.relay_tokens_file(),
            cache: Mutex::new(Cache::default()),
        }
    }

    /// Look up a token. Returns the container name, or `None` for an
    /// unknown token.
    pub fn lookup(&self, token: &str) -> Option<String> {
        let token: String = token.chars().take(MAX_TOKEN_LENGTH).collect();
        let mut cache = self.cache.lock().expect("token cache poisoned");

        let mtime = std::fs::metadata(&self.path).and_then(|m| m.modified()).ok();
        if mtime != cache.mtime {
            cache.tokens = load_tokens(&self.path);
            cache.mtime = mtime;
        }
        cache.tokens.get(&token).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_token_is_64_hex() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::at(dir.path());
        let token = generate_relay_token(&data, "c1").unwrap();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn lookup_finds_generated_token() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::at(dir.path());
        let token = generate_relay_token(&data, "mathlib4-pr-1").unwrap();

        let registry = TokenRegistry::new(&data);
        assert_eq!(registry.lookup(&token).as_deref(), Some("mathlib4-pr-1"));
        assert_eq!(registry.lookup("deadbeef"), None);
    }

    #[test]
    fn remove_drops_all_tokens_for_container() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::at(dir.path());
        let t1 = generate_relay_token(&data, "c1").unwrap();
        let t2 = generate_relay_token(&data, "c1").unwrap();
        let t3 = generate_relay_token(&data, "c2").unwrap();

        remove_relay_token(&data, "c1").unwrap();
        let registry = TokenRegistry::new(&data);
        assert_eq!(registry.lookup(&t1), None);
        assert_eq!(registry.lookup(&t2), None);
        assert_eq!(registry.lookup(&t3).as_deref(), Some("c2"));
    }

    #[test]
    fn registry_reloads_when_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::at(dir.path());
        let registry = TokenRegistry::new(&data);
        assert_eq!(registry.lookup("unknown"), None);

        let token = generate_relay_token(&data, "c1").unwrap();
        assert_eq!(registry.lookup(&token).as_deref(), Some("c1"));
    }

    #[cfg(unix)]
    #[test]
    fn tokens_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::at(dir.path());
        generate_relay_token(&data, "c1").unwrap();
        let mode = std::fs::metadata(data.relay_tokens_file())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn oversize_token_is_truncated_for_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::at(dir.path());
        let registry = TokenRegistry::new(&data);
        let huge = "a".repeat(10_000);
        assert_eq!(registry.lookup(&huge), None);
    }
}
