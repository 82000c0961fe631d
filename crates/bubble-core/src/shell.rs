//! Shell quoting for commands that must run through `bash -c` inside a
//! container. Everything interpolated into such a command goes through
//! [`sh_quote`]; argv-style invocations never need it.

/// Quote a string for POSIX shell interpolation.
///
/// Wraps the value in single quotes, with embedded single quotes
/// rendered as `'\''`. Empty strings become `''`.
pub fn sh_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '@'))
    {
        return s.to_owned();
    }
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// Quote and join an argv for transport through a remote shell (`ssh`
/// concatenates its trailing arguments and hands them to the remote
/// shell as a single string).
pub fn sh_join(args: &[String]) -> String {
    args.iter()
        .map(|a| sh_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}
