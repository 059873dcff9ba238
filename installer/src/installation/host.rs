// Database host parsing
//
// Accepted forms: `host`, `host:3306`, `unix:/path/to/mysqld.sock`, `/path/to/mysqld.sock`.
// The host text is kept as given; only the `:3306` suffix is split off.
// Literal IP addresses are refused: the application account is bound to client host
// names resolved at install time, and an IP target defeats that scoping.

use regex::Regex;
use std::net::IpAddr;

use crate::database::connection::DbEndpoint;
use crate::error::InstallError;

pub const DEFAULT_DB_PORT: u16 = 3306;

const MAX_HOSTNAME_LEN: usize = 253;
const LABEL_PATTERN: &str = r"^[A-Za-z0-9]([A-Za-z0-9_-]{0,61}[A-Za-z0-9])?$";

fn invalid(host: &str, reason: impl Into<String>) -> InstallError {
    InstallError::InvalidHost {
        host: host.to_string(),
        reason: reason.into(),
    }
}

pub fn parse_db_host(raw: &str) -> Result<DbEndpoint, InstallError> {
    let input = raw;
    if input.trim().is_empty() {
        return Err(InstallError::MissingParameter { field: "dbHost" });
    }

    if let Some(path) = input.strip_prefix("unix:").or_else(|| {
        input.starts_with('/').then_some(input)
    }) {
        if !path.starts_with('/') || path.len() < 2 {
            return Err(invalid(input, "socket path must be absolute"));
        }
        return Ok(DbEndpoint::Socket {
            path: path.to_string(),
        });
    }

    if input.starts_with('[') || input.parse::<IpAddr>().is_ok() {
        return Err(invalid(input, "literal IP addresses are not accepted"));
    }

    let (host, port) = match input.split_once(':') {
        Some((_, rest)) if rest.contains(':') => {
            return Err(invalid(input, "literal IP addresses are not accepted"));
        }
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .map_err(|_| invalid(input, format!("port '{}' is not a number", port)))?;
            (host, port)
        }
        None => (input, DEFAULT_DB_PORT),
    };

    if port != DEFAULT_DB_PORT {
        return Err(invalid(
            input,
            format!("only port {} is supported, got {}", DEFAULT_DB_PORT, port),
        ));
    }

    validate_hostname(host).map_err(|reason| invalid(input, reason))?;

    Ok(DbEndpoint::Tcp {
        host: host.to_string(),
        port,
    })
}

fn validate_hostname(host: &str) -> Result<(), String> {
    if host.is_empty() {
        return Err("host name is empty".to_string());
    }
    if host.len() > MAX_HOSTNAME_LEN {
        return Err(format!(
            "host name exceeds {} characters",
            MAX_HOSTNAME_LEN
        ));
    }
    if host.parse::<IpAddr>().is_ok() {
        return Err("literal IP addresses are not accepted".to_string());
    }

    let label_re = Regex::new(LABEL_PATTERN)
        .map_err(|e| format!("internal error: failed to compile host regex: {}", e))?;
    let labels: Vec<&str> = host.trim_end_matches('.').split('.').collect();
    if let Some(bad) = labels.iter().find(|l| !label_re.is_match(l)) {
        return Err(format!("invalid host name label '{}'", bad));
    }
    // Dotted numbers that are not a valid IPv4 (e.g. 300.1.2.3) are still address-shaped.
    if labels.iter().all(|l| l.chars().all(|c| c.is_ascii_digit())) {
        return Err("numeric host names are not accepted".to_string());
    }
    Ok(())
}
