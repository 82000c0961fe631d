//! Network allowlisting for containers.
//!
//! Restricts container egress to resolved IPs of allowed domains,
//! using iptables inside the container (network ACLs aren't available
//! in every runtime configuration, e.g. Incus through Colima).
//!
//! Security notes:
//! - Rules are applied via runtime exec as root; the in-container user
//!   has no sudo and cannot modify them.
//! - IPv6 egress is blocked entirely.
//! - DNS is restricted to the container's configured resolver and its
//!   upstreams.

use std::sync::LazyLock;

use bubble_runtime::{ContainerRuntime, RuntimeError};
use regex::Regex;

static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9.*-]+$").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("invalid domain in allowlist: {0:?}")]
    InvalidDomain(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Apply the egress allowlist to a container.
///
/// Every domain is validated against a narrow character class before
/// it is interpolated into the generated script.
pub async fn apply_allowlist<R: ContainerRuntime>(
    runtime: &R,
    container: &str,
    domains: &[String],
) -> Result<(), NetworkError> {
    for domain in domains {
        if !DOMAIN_RE.is_match(domain) {
            return Err(NetworkError::InvalidDomain(domain.clone()));
        }
    }

    let script = build_allowlist_script(domains);
    runtime.exec(container, &["bash", "-c", &script]).await?;
    Ok(())
}

/// Remove all egress restrictions from a container.
pub async fn remove_allowlist<R: ContainerRuntime>(
    runtime: &R,
    container: &str,
) -> Result<(), NetworkError> {
    runtime
        .exec(
            container,
            &[
                "bash",
                "-c",
                "iptables -F OUTPUT 2>/dev/null; iptables -P OUTPUT ACCEPT 2>/dev/null; \
                 ip6tables -F OUTPUT 2>/dev/null; ip6tables -P OUTPUT ACCEPT 2>/dev/null; true",
            ],
        )
        .await?;
    Ok(())
}

/// Whether the allowlist is active (the IPv4 OUTPUT chain drops).
pub async fn check_allowlist_active<R: ContainerRuntime>(runtime: &R, container: &str) -> bool {
    let output = runtime
        .exec(
            container,
            &[
                "bash",
                "-c",
                "iptables -L OUTPUT -n 2>/dev/null | grep -c DROP || echo 0",
            ],
        )
        .await;
    output
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .is_some_and(|n| n > 0)
}

/// Build the shell script that sets up the iptables allowlist.
///
/// Validated domains only; see [`apply_allowlist`].
fn build_allowlist_script(domains: &[String]) -> String {
    let mut lines: Vec<String> = vec![
        "#!/bin/bash".into(),
        "set -e".into(),
        "".into(),
        "# --- IPv6: block entirely ---".into(),
        "ip6tables -F OUTPUT 2>/dev/null || true".into(),
        "ip6tables -A OUTPUT -o lo -j ACCEPT".into(),
        "ip6tables -P OUTPUT DROP".into(),
        "".into(),
        "# --- IPv4 ---".into(),
        "# Temporarily allow all output so DNS resolution works during setup".into(),
        "iptables -P OUTPUT ACCEPT".into(),
        "iptables -F OUTPUT 2>/dev/null || true".into(),
        "".into(),
        "# Allow loopback".into(),
        "iptables -A OUTPUT -o lo -j ACCEPT".into(),
        "".into(),
        "# Allow established connections".into(),
        "iptables -A OUTPUT -m state --state ESTABLISHED,RELATED -j ACCEPT".into(),
        "".into(),
        "# Allow DNS to the container's configured resolver (stub)".into(),
        "RESOLVER=$(grep -m1 nameserver /etc/resolv.conf | awk '{print $2}')".into(),
        "if [ -n \"$RESOLVER\" ]; then".into(),
        "  iptables -A OUTPUT -d $RESOLVER -p udp --dport 53 -j ACCEPT".into(),
        "  iptables -A OUTPUT -d $RESOLVER -p tcp --dport 53 -j ACCEPT".into(),
        "fi".into(),
        "".into(),
        "# Allow DNS to upstream servers (systemd-resolved forwards to these)".into(),
        "for UPSTREAM in $(resolvectl dns 2>/dev/null \
         | awk -F: '{print $2}' \
         | grep -oE '[0-9]+\\.[0-9]+\\.[0-9]+\\.[0-9]+'); do"
            .into(),
        "  iptables -A OUTPUT -d $UPSTREAM -p udp --dport 53 -j ACCEPT".into(),
        "  iptables -A OUTPUT -d $UPSTREAM -p tcp --dport 53 -j ACCEPT".into(),
        "done".into(),
        "".into(),
        "# Resolve and allow each domain (IPv4 only)".into(),
    ];

    for domain in domains {
        if let Some(base) = domain.strip_prefix("*.") {
            // Wildcards: resolve the base domain, warn when it has no
            // A record of its own.
            lines.push(format!(
                "IPS=$(getent ahostsv4 {base} 2>/dev/null | awk '{{print $1}}' | sort -u)"
            ));
            lines.push("if [ -z \"$IPS\" ]; then".into());
            lines.push(format!(
                "  echo \"Warning: wildcard domain {domain} did not resolve. \
                 Use explicit subdomains instead.\" >&2"
            ));
            lines.push("else".into());
            lines.push("  for ip in $IPS; do".into());
            lines.push("    iptables -A OUTPUT -d $ip -j ACCEPT".into());
            lines.push("  done".into());
            lines.push("fi".into());
        } else {
            lines.push(format!(
                "for ip in $(getent ahostsv4 {domain} 2>/dev/null | awk '{{print $1}}' | sort -u); do"
            ));
            lines.push("  iptables -A OUTPUT -d $ip -j ACCEPT".into());
            lines.push("done".into());
        }
    }

    lines.extend([
        "".into(),
        "# Default: drop everything else".into(),
        "iptables -P OUTPUT DROP".into(),
        "".into(),
        "echo 'Network allowlist applied.'".into(),
    ]);

    lines.join("\n")
}
