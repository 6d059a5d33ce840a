//! Small validators used when checking configuration.

use std::net::IpAddr;
use std::ops::RangeInclusive;

/// Validates if a given u16 value is a valid port number.
///
/// Port 0 is reserved.
pub fn is_valid_port(port: u16) -> Result<(), &'static str> {
    if port > 0 {
        Ok(())
    } else {
        Err("Port number must be greater than 0")
    }
}

/// Validates if a given string is a valid IP address.
pub fn is_valid_ip(ip: &str) -> Result<(), &'static str> {
    ip.parse::<IpAddr>().map(|_| ()).map_err(|_| "Invalid IP address")
}

/// Validates a DNS host name (letters, digits, `-` and `.`).
pub fn is_valid_hostname(host: &str) -> Result<(), &'static str> {
    if host.is_empty() || host.len() > 253 {
        return Err("Host name must be 1 to 253 characters");
    }
    let ok = host
        .split('.')
        .all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        });
    if ok {
        Ok(())
    } else {
        Err("Invalid host name")
    }
}

/// Validates a `host[:port]` network resource.
pub fn is_valid_network_resource(resource: &str) -> Result<(), &'static str> {
    let (host, port) = match resource.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (resource, None),
    };
    if let Some(port) = port {
        let port: u16 = port.parse().map_err(|_| "Invalid port number")?;
        is_valid_port(port)?;
    }
    is_valid_ip(host).or_else(|_| is_valid_hostname(host))
}

/// Validates if a given string is a valid file path.
pub fn is_valid_path(path: &str) -> Result<(), &'static str> {
    if path.is_empty() {
        return Err("File path cannot be empty");
    }
    if path.contains('\0') {
        return Err("File path cannot contain null bytes");
    }
    Ok(())
}

/// Validates if a given value is within a specified numeric range.
pub fn is_in_range<T: PartialOrd>(value: T, range: RangeInclusive<T>) -> Result<(), &'static str> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err("Value is outside the specified range")
    }
}

/// Validates if a given string is not empty.
pub fn is_not_empty(value: &str) -> Result<(), &'static str> {
    if !value.is_empty() {
        Ok(())
    } else {
        Err("Value cannot be empty")
    }
}
