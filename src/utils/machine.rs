//! Machine identity.
//!
//! Relay envelopes carry the sender's machine name so a listener can drop
//! its own traffic. Names are upper-cased, which makes the comparison
//! case-insensitive.

const FALLBACK_MACHINE_NAME: &str = "localhost";

/// Upper-cased host name of this machine.
pub fn machine_name() -> String {
    host_name()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_MACHINE_NAME.to_string())
        .trim()
        .to_uppercase()
}

/// Whether two machine names refer to the same machine.
pub fn same_machine(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

#[cfg(unix)]
fn host_name() -> Option<String> {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
}

#[cfg(not(unix))]
fn host_name() -> Option<String> {
    std::env::var("COMPUTERNAME").ok()
}
