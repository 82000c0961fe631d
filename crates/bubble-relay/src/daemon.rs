//! The relay accept loop and per-request processing.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use bubble_core::DataDir;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Semaphore;
use tracing::info;

use crate::log::{sanitize_for_log, RelayLog};
use crate::ratelimit::RateLimiter;
use crate::tokens::TokenRegistry;
use crate::validate::{validate_relay_target, RelayStatus, MAX_TARGET_LENGTH};
use crate::{MAX_CONCURRENT_HANDLERS, MAX_REQUEST_SIZE};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("relay daemon I/O error")]
    Io { source: std::io::Error },

    #[error(transparent)]
    State(#[from] bubble_core::Error),
}

#[derive(Debug, Default, Deserialize)]
pub struct RelayRequest {
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct RelayResponse {
    pub status: RelayStatus,
    pub message: String,
}

impl RelayResponse {
    fn new(status: RelayStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Everything a connection handler needs. Shared between the acceptor
/// and the worker tasks.
pub struct RelayContext {
    pub data_dir: DataDir,
    pub tokens: TokenRegistry,
    pub limiter: RateLimiter,
    pub log: RelayLog,
    /// When false, accepted requests are not acted on (tests).
    pub spawn_opens: bool,
}

impl RelayContext {
    pub fn new(data_dir: DataDir) -> Self {
        let tokens = TokenRegistry::new(&data_dir);
        let log = RelayLog::new(&data_dir);
        Self {
            data_dir,
            tokens,
            limiter: RateLimiter::new(),
            log,
            spawn_opens: true,
        }
    }
}

fn truncate_target(target: &str) -> String {
    sanitize_for_log(&target.chars().take(MAX_TARGET_LENGTH).collect::<String>())
}

/// Decide the response for one raw request. Authentication comes
/// first; rate limiting keys on the token's container name, never on
/// anything the client sent.
pub async fn process_request(ctx: &RelayContext, raw: &[u8]) -> RelayResponse {
    let request: RelayRequest = match serde_json::from_slice(raw) {
        Ok(request) => request,
        Err(_) => {
            ctx.log.line("REJECT  malformed JSON");
            return RelayResponse::new(RelayStatus::Error, "Invalid request format.");
        }
    };

    let log_target = truncate_target(&request.target);

    if request.token.is_empty() {
        ctx.log
            .line(&format!("REJECT  missing_token  target={log_target}"));
        return RelayResponse::new(RelayStatus::Error, "Relay token required.");
    }
    let Some(container) = ctx.tokens.lookup(&request.token) else {
        ctx.log
            .line(&format!("REJECT  invalid_token  target={log_target}"));
        return RelayResponse::new(RelayStatus::Error, "Invalid relay token.");
    };

    let log_container = sanitize_for_log(&container.chars().take(64).collect::<String>());

    if !ctx.limiter.check(&container) {
        ctx.log.line(&format!(
            "REJECT  rate_limited  container={log_container}  target={log_target}"
        ));
        return RelayResponse::new(RelayStatus::RateLimited, "Rate limited. Try again later.");
    }

    let (status, message) = validate_relay_target(&ctx.data_dir, &request.target).await;
    if status != RelayStatus::Ok {
        ctx.log.line(&format!(
            "REJECT  {status}  container={log_container}  target={log_target}  {message}"
        ));
        return RelayResponse::new(status, message);
    }

    ctx.log.line(&format!(
        "ACCEPT  container={log_container}  target={log_target}"
    ));

    if ctx.spawn_opens {
        if let Err(e) = open_bubble(&request.target) {
            ctx.log.line(&format!(
                "ERROR  container={log_container}  target={log_target}  {e}"
            ));
            return RelayResponse::new(RelayStatus::Error, format!("Failed to open bubble: {e}"));
        }
    }

    RelayResponse::new(
        RelayStatus::Ok,
        format!("Opening bubble for '{}'...", request.target),
    )
}

/// Open the bubble by re-invoking this binary, detached. `--no-clone`
/// keeps the TOCTOU window shut: a repo that vanished from the store
/// since validation can't be cloned fresh.
fn open_bubble(target: &str) -> std::io::Result<()> {
    let exe = std::env::current_exe()?;
    std::process::Command::new(exe)
        .args(["open", "--no-clone", "--no-interactive", target])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(|_| ())
}

async fn handle_connection<S>(ctx: Arc<RelayContext>, mut stream: S)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; MAX_REQUEST_SIZE];
    let n = match tokio::time::timeout(READ_TIMEOUT, stream.read(&mut buf)).await {
        Ok(Ok(n)) => n,
        Ok(Err(_)) => return,
        Err(_) => {
            ctx.log.line("REJECT  timeout");
            return;
        }
    };
    if n == 0 {
        return;
    }

    let response = process_request(&ctx, &buf[..n]).await;
    if let Ok(mut payload) = serde_json::to_vec(&response) {
        payload.push(b'\n');
        let _ = stream.write_all(&payload).await;
    }
    let _ = stream.shutdown().await;
}

/// Run the relay daemon until the process is killed.
///
/// Uses a Unix socket on Linux; loopback TCP on macOS (Unix sockets
/// can't traverse Colima's virtio-fs), with the bound port recorded in
/// `relay.port`.
pub async fn run_daemon(data_dir: DataDir) -> Result<(), RelayError> {
    data_dir.ensure()?;
    let ctx = Arc::new(RelayContext::new(data_dir));
    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_HANDLERS));

    if cfg!(target_os = "macos") {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| RelayError::Io { source: e })?;
        let port = listener
            .local_addr()
            .map_err(|e| RelayError::Io { source: e })?
            .port();
        bubble_core::fsutil::atomic_write_with_mode(
            &ctx.data_dir.relay_port_file(),
            &port.to_string(),
            Some(0o600),
        )?;
        ctx.log
            .line(&format!("Relay daemon started on 127.0.0.1:{port}"));
        info!(port, "relay daemon listening");

        loop {
            let (stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => continue,
            };
            // All handler slots busy → drop before any processing.
            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                continue;
            };
            let ctx = ctx.clone();
            tokio::spawn(async move {
                handle_connection(ctx, stream).await;
                drop(permit);
            });
        }
    } else {
        let sock_path = ctx.data_dir.relay_sock();
        let _ = std::fs::remove_file(&sock_path);
        let listener =
            tokio::net::UnixListener::bind(&sock_path).map_err(|e| RelayError::Io { source: e })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&sock_path, std::fs::Permissions::from_mode(0o600));
        }
        ctx.log
            .line(&format!("Relay daemon started on {}", sock_path.display()));
        info!(socket = %sock_path.display(), "relay daemon listening");

        loop {
            let (stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => continue,
            };
            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                continue;
            };
            let ctx = ctx.clone();
            tokio::spawn(async move {
                handle_connection(ctx, stream).await;
                drop(permit);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::generate_relay_token;
    use bubble_git::GitStore;

    fn context() -> (tempfile::TempDir, RelayContext) {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::at(dir.path());
        data.ensure().unwrap();
        let mut ctx = RelayContext::new(data);
        ctx.spawn_opens = false;
        (dir, ctx)
    }

    fn known(ctx: &RelayContext, org_repo: &str) {
        let store = GitStore::new(ctx.data_dir.git_dir());
        std::fs::create_dir_all(store.bare_repo_path(org_repo)).unwrap();
    }

    fn token_for(ctx: &RelayContext, container: &str) -> String {
        generate_relay_token(&ctx.data_dir, container).unwrap()
    }

    async fn request(ctx: &RelayContext, target: &str, token: &str) -> RelayResponse {
        let raw = serde_json::json!({"target": target, "token": token}).to_string();
        process_request(ctx, raw.as_bytes()).await
    }

    #[tokio::test]
    async fn malformed_json_is_rejected() {
        let (_d, ctx) = context();
        let response = process_request(&ctx, b"not json").await;
        assert_eq!(response.status, RelayStatus::Error);
        assert_eq!(response.message, "Invalid request format.");
    }

    #[tokio::test]
    async fn missing_token_is_rejected() {
        let (_d, ctx) = context();
        let response = request(&ctx, "leanprover/lean4", "").await;
        assert_eq!(response.status, RelayStatus::Error);
        assert_eq!(response.message, "Relay token required.");
    }

    #[tokio::test]
    async fn invalid_token_is_rejected() {
        let (_d, ctx) = context();
        let response = request(&ctx, "leanprover/lean4", "deadbeef").await;
        assert_eq!(response.status, RelayStatus::Error);
        assert_eq!(response.message, "Invalid relay token.");
    }

    #[tokio::test]
    async fn local_path_is_rejected_with_valid_token() {
        let (_d, ctx) = context();
        let token = token_for(&ctx, "c1");
        let response = request(&ctx, "./local", &token).await;
        assert_eq!(response.status, RelayStatus::Error);
        assert_eq!(response.message, "Local paths are not allowed via relay.");
    }

    #[tokio::test]
    async fn known_repo_is_accepted() {
        let (_d, ctx) = context();
        known(&ctx, "leanprover/lean4");
        let token = token_for(&ctx, "c1");
        let response = request(&ctx, "leanprover/lean4", &token).await;
        assert_eq!(response.status, RelayStatus::Ok);
        assert!(response.message.contains("leanprover/lean4"));
    }

    #[tokio::test]
    async fn unknown_repo_status() {
        let (_d, ctx) = context();
        let token = token_for(&ctx, "c1");
        let response = request(&ctx, "nobody/nothing", &token).await;
        assert_eq!(response.status, RelayStatus::UnknownRepo);
    }

    #[tokio::test]
    async fn rate_limit_keys_on_authenticated_container() {
        let (_d, ctx) = context();
        known(&ctx, "leanprover/lean4");
        let token = token_for(&ctx, "c1");
        for _ in 0..3 {
            let response = request(&ctx, "leanprover/lean4", &token).await;
            assert_eq!(response.status, RelayStatus::Ok);
        }
        let response = request(&ctx, "leanprover/lean4", &token).await;
        assert_eq!(response.status, RelayStatus::RateLimited);

        // A different container is unaffected.
        let other = token_for(&ctx, "c2");
        let response = request(&ctx, "leanprover/lean4", &other).await;
        assert_eq!(response.status, RelayStatus::Ok);
    }

    #[tokio::test]
    async fn outcomes_are_logged_sanitized() {
        let (_d, ctx) = context();
        let token = token_for(&ctx, "c1");
        request(&ctx, "evil\ntarget", &token).await;

        let log = std::fs::read_to_string(ctx.data_dir.relay_log()).unwrap();
        assert!(log.contains("evil\\ntarget"));
        assert!(!log.contains("evil\ntarget"));
    }

    #[tokio::test]
    async fn response_serializes_to_wire_format() {
        let response = RelayResponse::new(RelayStatus::Error, "Invalid request format.");
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(
            json,
            r#"{"status":"error","message":"Invalid request format."}"#
        );
    }
}
