//! Backend resource naming.
//!
//! Topic and queue names are `<app-key>-<id>`, lowercased. SNS and SQS accept
//! at most 80 characters from `[A-Za-z0-9_-]`; a name that breaks either rule
//! is replaced by the hex SHA-256 of the lowercased name, prefixed with the
//! app key when that still fits.

use sha2::{Digest, Sha256};

/// Longest topic or queue name the backend accepts.
pub const MAX_NAME_LENGTH: usize = 80;

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn is_legal(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_NAME_LENGTH && name.chars().all(is_allowed)
}

/// Deterministic backend name for `id` in the `app_key` namespace.
pub fn resource_name(app_key: &str, id: &str) -> String {
    let name = format!("{}-{}", app_key, id).to_lowercase();
    if is_legal(&name) {
        return name;
    }

    let digest = hex::encode(Sha256::digest(name.as_bytes()));
    let prefix = app_key.to_lowercase();
    if is_legal(&prefix) && prefix.len() + 1 + digest.len() <= MAX_NAME_LENGTH {
        format!("{}-{}", prefix, digest)
    } else {
        digest
    }
}
