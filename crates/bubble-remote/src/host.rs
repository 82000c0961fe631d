//! SSH remote host specifications.

use std::sync::LazyLock;

use regex::Regex;

// Hostnames and users are validated strictly so a spec can never turn
// into an ssh option (e.g. "-oProxyCommand=...") or smuggle shell
// metacharacters.
static SAFE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_][a-zA-Z0-9._-]*$").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum HostParseError {
    #[error("empty user in SSH spec: {0:?}")]
    EmptyUser(String),

    #[error("empty hostname in SSH spec")]
    EmptyHostname,

    #[error("invalid port in SSH spec: {0:?}")]
    InvalidPort(String),

    #[error("port out of range: {0}")]
    PortOutOfRange(u32),

    #[error("invalid hostname: {0:?} (must be alphanumeric, dots, hyphens; cannot start with -)")]
    InvalidHostname(String),

    #[error("invalid user: {0:?} (must be alphanumeric, dots, hyphens; cannot start with -)")]
    InvalidUser(String),
}

/// An SSH destination: `[user@]host[:port]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHost {
    pub hostname: String,
    pub user: Option<String>,
    pub port: u16,
    /// Extra `ssh`/`scp` options (identity file etc.), injected by the
    /// cloud integration. Not part of the spec grammar.
    pub ssh_options: Vec<String>,
}

impl RemoteHost {
    /// Parse `host`, `user@host`, `host:port`, or `user@host:port`.
    pub fn parse(spec: &str) -> Result<Self, HostParseError> {
        let mut rest = spec;
        let mut user = None;

        if let Some((user_part, host_part)) = rest.rsplit_once('@') {
            if user_part.is_empty() {
                return Err(HostParseError::EmptyUser(spec.to_owned()));
            }
            user = Some(user_part.to_owned());
            rest = host_part;
        }

        let mut port: u16 = 22;
        if let Some((host_part, port_part)) = rest.rsplit_once(':') {
            let parsed: u32 = port_part
                .parse()
                .map_err(|_| HostParseError::InvalidPort(port_part.to_owned()))?;
            if !(1..=65535).contains(&parsed) {
                return Err(HostParseError::PortOutOfRange(parsed));
            }
            port = parsed as u16;
            rest = host_part;
        }

        if rest.is_empty() {
            return Err(HostParseError::EmptyHostname);
        }
        if !SAFE_NAME_RE.is_match(rest) {
            return Err(HostParseError::InvalidHostname(rest.to_owned()));
        }
        if let Some(user) = &user {
            if !SAFE_NAME_RE.is_match(user) {
                return Err(HostParseError::InvalidUser(user.clone()));
            }
        }

        Ok(Self {
            hostname: rest.to_owned(),
            user,
            port,
            ssh_options: Vec::new(),
        })
    }

    /// `user@host`, or just `host`.
    pub fn ssh_destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.hostname),
            None => self.hostname.clone(),
        }
    }

    /// Build an `ssh` argv for the given remote command parts.
    pub fn ssh_cmd(&self, command: &[String]) -> Vec<String> {
        let mut cmd = vec!["ssh".to_owned()];
        cmd.extend(self.ssh_options.iter().cloned());
        if self.port != 22 {
            cmd.push("-p".to_owned());
            cmd.push(self.port.to_string());
        }
        cmd.push(self.ssh_destination());
        cmd.extend(command.iter().cloned());
        cmd
    }

    /// Build an `scp` argv copying a local file to the remote.
    pub fn scp_cmd(&self, local_path: &str, remote_path: &str) -> Vec<String> {
        let mut cmd = vec!["scp".to_owned(), "-q".to_owned()];
        cmd.extend(self.ssh_options.iter().cloned());
        if self.port != 22 {
            cmd.push("-P".to_owned());
            cmd.push(self.port.to_string());
        }
        cmd.push(local_path.to_owned());
        cmd.push(format!("{}:{remote_path}", self.ssh_destination()));
        cmd
    }

    /// The canonical spec string; `parse` of it round-trips.
    pub fn spec_string(&self) -> String {
        let mut s = self.ssh_destination();
        if self.port != 22 {
            s.push(':');
            s.push_str(&self.port.to_string());
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_forms() {
        let h = RemoteHost::parse("build-box").unwrap();
        assert_eq!(h.hostname, "build-box");
        assert_eq!(h.user, None);
        assert_eq!(h.port, 22);

        let h = RemoteHost::parse("dev@build-box").unwrap();
        assert_eq!(h.user.as_deref(), Some("dev"));

        let h = RemoteHost::parse("build-box:2222").unwrap();
        assert_eq!(h.port, 2222);

        let h = RemoteHost::parse("dev@build-box:2222").unwrap();
        assert_eq!(h.user.as_deref(), Some("dev"));
        assert_eq!(h.port, 2222);
    }

    #[test]
    fn rejects_option_injection() {
        assert!(matches!(
            RemoteHost::parse("-oProxyCommand=evil"),
            Err(HostParseError::InvalidHostname(_))
        ));
        assert!(matches!(
            RemoteHost::parse("-x@host"),
            Err(HostParseError::InvalidUser(_))
        ));
    }

    #[test]
    fn rejects_bad_ports() {
        assert!(matches!(
            RemoteHost::parse("host:abc"),
            Err(HostParseError::InvalidPort(_))
        ));
        assert!(matches!(
            RemoteHost::parse("host:0"),
            Err(HostParseError::PortOutOfRange(0))
        ));
        assert!(matches!(
            RemoteHost::parse("host:99999"),
            Err(HostParseError::PortOutOfRange(99999))
        ));
    }

    #[test]
    fn rejects_empty_parts() {
        assert!(matches!(
            RemoteHost::parse("@host"),
            Err(HostParseError::EmptyUser(_))
        ));
        assert!(matches!(
            RemoteHost::parse(""),
            Err(HostParseError::EmptyHostname)
        ));
    }

    #[test]
    fn ssh_cmd_omits_default_port() {
        let h = RemoteHost::parse("dev@box").unwrap();
        assert_eq!(h.ssh_cmd(&["true".to_owned()]), ["ssh", "dev@box", "true"]);

        let h = RemoteHost::parse("dev@box:2200").unwrap();
        assert_eq!(
            h.ssh_cmd(&["true".to_owned()]),
            ["ssh", "-p", "2200", "dev@box", "true"]
        );
    }

    #[test]
    fn scp_uses_capital_p() {
        let h = RemoteHost::parse("box:2200").unwrap();
        let cmd = h.scp_cmd("/tmp/x", "/tmp/y");
        assert_eq!(cmd, ["scp", "-q", "-P", "2200", "/tmp/x", "box:/tmp/y"]);
    }

    #[test]
    fn ssh_options_are_injected_before_destination() {
        let mut h = RemoteHost::parse("1.2.3.4").unwrap();
        h.user = Some("root".to_owned());
        h.ssh_options = vec!["-i".to_owned(), "/key".to_owned()];
        let cmd = h.ssh_cmd(&["true".to_owned()]);
        assert_eq!(cmd, ["ssh", "-i", "/key", "root@1.2.3.4", "true"]);
    }

    proptest::proptest! {
        #[test]
        fn spec_string_is_a_fixed_point(
            user in proptest::option::of("[a-zA-Z0-9_][a-zA-Z0-9._-]{0,10}"),
            host in "[a-zA-Z0-9_][a-zA-Z0-9._-]{0,15}",
            port in 1u16..,
        ) {
            let spec = match &user {
                Some(u) => format!("{u}@{host}"),
                None => host.clone(),
            };
            let spec = if port != 22 {
                format!("{spec}:{port}")
            } else {
                spec
            };
            // A host ending in ":<digits>" would be re-split; the
            // grammar guarantees parse ∘ spec_string = id on parses.
            if let Ok(h) = RemoteHost::parse(&spec) {
                let round = RemoteHost::parse(&h.spec_string()).unwrap();
                proptest::prop_assert_eq!(h, round);
            }
        }
    }
}
