//! MCP server configuration validation.
//!
//! Subprocess transports get per-type argument syntax checks so a typo'd
//! `npx -m` or an absolute path handed to `uvx` fails at save time instead
//! of at first spawn.  Environment references in args are expanded here.

use maestro_domain::{Error, McpServer, Result, Transport};

/// Expand `${VAR}`, `$VAR` and a leading `~` in subprocess arguments.
/// Unset variables expand to the empty string.
pub fn expand_env_args(args: &[String]) -> Vec<String> {
    args.iter().map(|arg| expand_one(arg)).collect()
}

fn expand_one(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len());
    let mut chars = arg.char_indices().peekable();

    // Leading tilde becomes the home directory.
    let rest: &str = if let Some(stripped) = arg.strip_prefix('~') {
        if stripped.is_empty() || stripped.starts_with('/') {
            out.push_str(&std::env::var("HOME").unwrap_or_default());
            chars = stripped.char_indices().peekable();
            stripped
        } else {
            arg
        }
    } else {
        arg
    };

    while let Some((i, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        // ${VAR}
        if let Some(stripped) = rest[i + 1..].strip_prefix('{') {
            if let Some(end) = stripped.find('}') {
                let name = &stripped[..end];
                if is_var_name(name) {
                    out.push_str(&std::env::var(name).unwrap_or_default());
                    for _ in 0..name.len() + 2 {
                        chars.next();
                    }
                    continue;
                }
            }
        }
        // $VAR
        let name: String = rest[i + 1..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if !name.is_empty() && is_var_name(&name) {
            out.push_str(&std::env::var(&name).unwrap_or_default());
            for _ in 0..name.len() {
                chars.next();
            }
        } else {
            out.push('$');
        }
    }
    out
}

fn is_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validate a server configuration against its transport.
///
/// Returns the args with environment references expanded for subprocess
/// transports, so the caller stores what will actually be executed.
pub fn validate_server_config(server: &McpServer) -> Result<Vec<String>> {
    match server.transport {
        Transport::Http => {
            let url = server
                .url
                .as_deref()
                .ok_or_else(|| Error::Validation("http server requires a url".into()))?;
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::Validation(
                    "URL must start with http:// or https://".into(),
                ));
            }
            Ok(Vec::new())
        }
        transport => {
            if server.args.is_empty() {
                return Err(Error::Validation(format!(
                    "{} server requires at least one argument",
                    transport_name(transport)
                )));
            }
            let args = expand_env_args(&server.args);
            validate_args(transport, &args)?;
            Ok(args)
        }
    }
}

fn transport_name(t: Transport) -> &'static str {
    match t {
        Transport::Http => "http",
        Transport::Npx => "npx",
        Transport::Uvx => "uvx",
        Transport::Docker => "docker",
    }
}

fn validate_args(transport: Transport, args: &[String]) -> Result<()> {
    let first = &args[0];
    match transport {
        Transport::Npx => {
            if first.starts_with('-') {
                if first != "-y" && first != "--yes" {
                    return Err(Error::Validation(format!(
                        "invalid npx flag '{first}'; use -y for auto-install or start with a package name"
                    )));
                }
            } else if !first.starts_with('@')
                && !first
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            {
                return Err(Error::Validation(format!(
                    "invalid npx package name '{first}'; expected @org/package or package-name"
                )));
            }
        }
        Transport::Uvx => {
            if first.starts_with('/') || first.starts_with('~') {
                return Err(Error::Validation(format!(
                    "invalid uvx package '{first}'; expected a package name, not a file path"
                )));
            }
            if first == "-m" {
                return Err(Error::Validation(
                    "invalid uvx syntax; use 'uvx package-name', not '-m module'".into(),
                ));
            }
        }
        Transport::Docker => {
            if first.is_empty() {
                return Err(Error::Validation("docker image name cannot be empty".into()));
            }
        }
        Transport::Http => {}
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
