//! Per-session instance identity.
//!
//! Every client generates one [`InstanceId`] at startup and attaches it to
//! every write. The server echoes it back in the resulting [`ChangeEvent`]
//! so a client can tell its own writes apart from genuine remote changes.
//!
//! [`ChangeEvent`]: crate::ChangeEvent

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest identifier accepted from the wire.
const MAX_INSTANCE_ID_LEN: usize = 128;

/// An opaque, collision-resistant identifier for one client session.
///
/// Generated ids are random v4 UUIDs. Ids received from the wire are accepted
/// as any short printable ASCII token, so other client implementations may
/// choose their own format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceId(String);

impl InstanceId {
    /// Generate a fresh random identity for this session.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Parse an identity received from another party.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() || raw.len() > MAX_INSTANCE_ID_LEN {
            return Err(Error::InvalidInstanceId(format!(
                "length must be 1..={MAX_INSTANCE_ID_LEN}, got {}",
                raw.len()
            )));
        }
        if !raw.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(Error::InvalidInstanceId(
                "must be printable ASCII without spaces".to_string(),
            ));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for InstanceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for InstanceId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<InstanceId> for String {
    fn from(id: InstanceId) -> Self {
        id.0
    }
}
