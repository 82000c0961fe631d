//! Container readiness probing.
//!
//! A freshly launched container needs a moment before exec works, and
//! longer before DHCP and DNS settle. On some Linux hosts the bridge
//! never hands out a lease at all (host firewalls eat the DHCP
//! broadcast), so the probe falls back to a static address and
//! proxied DNS.

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::RuntimeError;
use crate::runtime::ContainerRuntime;

const DNS_PROBE: &[&str] = &["timeout", "3", "getent", "hosts", "github.com"];

/// Wait for a container to be ready, including DNS resolution.
pub async fn wait_for_container<R: ContainerRuntime>(
    runtime: &R,
    name: &str,
    timeout: Duration,
) -> Result<(), RuntimeError> {
    let deadline = tokio::time::Instant::now() + timeout;

    // Phase 1: exec works at all.
    loop {
        if runtime.exec(name, &["true"]).await.is_ok() {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(RuntimeError::NotReady {
                name: name.to_owned(),
                seconds: timeout.as_secs(),
            });
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    // Phase 2: give DHCP + DNS up to 15s to come up on their own.
    for _ in 0..15 {
        if runtime.exec(name, DNS_PROBE).await.is_ok() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    // Phase 3 (Linux): host firewall workarounds.
    if cfg!(target_os = "linux") {
        apply_network_workarounds(runtime, name).await;
    }

    if runtime.exec(name, DNS_PROBE).await.is_ok() {
        return Ok(());
    }
    Err(RuntimeError::NotReady {
        name: name.to_owned(),
        seconds: timeout.as_secs(),
    })
}

/// Assign a static bridge address and proxy DNS through to the bridge
/// gateway when DHCP/DNS never came up.
async fn apply_network_workarounds<R: ContainerRuntime>(runtime: &R, name: &str) {
    let Ok(Some(bridge)) = runtime.bridge_address().await else {
        return;
    };
    let Some((gateway, static_addr)) = bridge_static_address(&bridge) else {
        warn!(bridge = %bridge, "unexpected bridge address format");
        return;
    };

    // No IPv4 on eth0 → static address in the bridge subnet.
    let has_ipv4 = runtime
        .exec(name, &["sh", "-c", "ip -4 addr show eth0 | grep -q 'inet '"])
        .await
        .is_ok();
    if !has_ipv4 {
        debug!(container = name, address = %static_addr, "assigning static address");
        let assign = format!(
            "ip addr add {static_addr} dev eth0 && ip route replace default via {gateway}"
        );
        if let Err(e) = runtime.exec(name, &["sh", "-c", &assign]).await {
            warn!(container = name, error = %e, "static address assignment failed");
        }
    }

    if runtime.exec(name, DNS_PROBE).await.is_ok() {
        return;
    }

    // DNS still down → bypass systemd-resolved and proxy port 53 to
    // the bridge gateway.
    debug!(container = name, gateway = %gateway, "proxying DNS to bridge gateway");
    let _ = runtime
        .exec(
            name,
            &[
                "sh",
                "-c",
                "systemctl stop systemd-resolved 2>/dev/null; \
                 printf 'nameserver 127.0.0.53\\n' > /etc/resolv.conf",
            ],
        )
        .await;
    for (device, proto) in [("bubble-dns-udp", "udp"), ("bubble-dns-tcp", "tcp")] {
        let listen = format!("{proto}:127.0.0.53:53");
        let connect = format!("{proto}:{gateway}:53");
        if let Err(e) = runtime
            .add_device(
                name,
                device,
                "proxy",
                &[("listen", listen.as_str()), ("connect", connect.as_str())],
            )
            .await
        {
            warn!(container = name, device, error = %e, "could not add DNS proxy device");
        }
    }
}

/// Derive `(gateway, static .200 CIDR)` from the bridge's host-side
/// address, e.g. `10.158.0.1/24` → `("10.158.0.1", "10.158.0.200/24")`.
fn bridge_static_address(bridge_cidr: &str) -> Option<(String, String)> {
    let (addr, prefix) = bridge_cidr.split_once('/')?;
    let octets: Vec<&str> = addr.split('.').collect();
    if octets.len() != 4 {
        return None;
    }
    let static_addr = format!("{}.{}.{}.200/{prefix}", octets[0], octets[1], octets[2]);
    Some((addr.to_owned(), static_addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_address_from_bridge_cidr() {
        let (gateway, addr) = bridge_static_address("10.158.0.1/24").unwrap();
        assert_eq!(gateway, "10.158.0.1");
        assert_eq!(addr, "10.158.0.200/24");
    }

    #[test]
    fn rejects_malformed_bridge_address() {
        assert!(bridge_static_address("not-an-address").is_none());
        assert!(bridge_static_address("10.0.0.1").is_none());
    }
}
