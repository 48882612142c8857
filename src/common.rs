//! Small helpers shared by the session and dispatcher. Grounded on
//! `common.py`.

use chrono::{Local, TimeZone};

/// `[%Y-%m-%d %H:%M:%S]` in local time, from microseconds since epoch.
/// Mirrors `common.py::get_message_timestamp_string`.
pub fn format_message_timestamp(creation_time_usecs: i64) -> String {
    let secs = creation_time_usecs / 1_000_000;
    let micros = (creation_time_usecs % 1_000_000) as u32;
    match Local.timestamp_opt(secs, micros * 1000).single() {
        Some(dt) => dt.format("[%Y-%m-%d %H:%M:%S]").to_string(),
        None => String::new(),
    }
}

/// RFC 1459's server-name limit.
const GATEWAY_NAME_LIMIT: usize = 63;

/// Derives the gateway's own name from the local FQDN, truncated to 63
/// characters. Mirrors `flow_irc_gateway.py`'s `socket.getfqdn()[:63]`;
/// there's no portable libc FQDN lookup in `std`, so this shells out to
/// `hostname -f` the same way the original relies on the system resolver,
/// falling back to the short hostname and then to `"localhost"`.
pub fn derive_gateway_name() -> String {
    let fqdn = std::process::Command::new("hostname")
        .arg("-f")
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let name = fqdn.or_else(|| {
        std::process::Command::new("hostname")
            .output()
            .ok()
            .and_then(|out| String::from_utf8(out.stdout).ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    });

    let name = name.unwrap_or_else(|| "localhost".to_string());
    name.chars().take(GATEWAY_NAME_LIMIT).collect()
}
