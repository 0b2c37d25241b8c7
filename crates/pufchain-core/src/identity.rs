use crate::{constants::HASH_HEX_SIZE, error::DecodeError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Stable pseudonym of a simulated device, used to key its ledger state.
///
/// Derived from the device kind and a serial handed out when the device is
/// created, so the same device maps to the same id across every block.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    pub fn derive(kind_tag: &str, serial: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"device:");
        hasher.update(kind_tag.as_bytes());
        hasher.update(b":");
        hasher.update(serial.to_le_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn parse(s: &str) -> Result<Self, DecodeError> {
        let ok = s.len() == HASH_HEX_SIZE
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if ok {
            Ok(Self(s.to_owned()))
        } else {
            Err(DecodeError::InvalidDeviceId(s.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = DecodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}
