//! Group names and name validation.

use std::fmt;

use rac_core::{InstanceUid, OutpostId, SessionKey};
use sha2::{Digest, Sha256};

use crate::errors::FabricError;

/// Longest accepted channel or group name.
pub const MAX_NAME_LEN: usize = 99;

/// Group every connected client joins (presence only, never data).
const CLIENTS_GROUP: &str = "rac_clients";

/// Name of a broadcast group.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupName(String);

impl GroupName {
    /// A group with an arbitrary name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The global client group.
    pub fn rac_clients() -> Self {
        Self(CLIENTS_GROUP.to_owned())
    }

    /// The group of every connection opened under one authenticated session.
    ///
    /// Session keys are opaque, so the name carries a digest of the key
    /// rather than the key itself and is valid whatever the key contains.
    pub fn rac_session(session: &SessionKey) -> Self {
        Self(format!("{CLIENTS_GROUP}_{}", digest(&[session.as_str()])))
    }

    /// The offer target for one worker instance of an outpost.
    pub fn outpost_instance(outpost: &OutpostId, instance: &InstanceUid) -> Self {
        Self(format!(
            "rac_outpost_{}",
            digest(&[outpost.as_str(), instance.as_str()])
        ))
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hex SHA-256 over length-prefixed parts, so `("a", "bc")` and
/// `("ab", "c")` never share a digest.
fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Check a channel or group name: 1..=99 ASCII characters drawn from
/// letters, digits and `-_.!`.
pub fn validate_name(name: &str) -> Result<(), FabricError> {
    let reject = |reason| {
        Err(FabricError::InvalidName {
            name: name.to_owned(),
            reason,
        })
    };
    if name.is_empty() {
        return reject("empty");
    }
    if name.len() > MAX_NAME_LEN {
        return reject("too long");
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'!'))
    {
        return reject("illegal character");
    }
    Ok(())
}
