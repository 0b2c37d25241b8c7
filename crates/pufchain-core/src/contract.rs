//! Per-device credential store carried in block payloads.
//!
//! Payload format (serde_json, maps in ascending key order):
//!
//! ```text
//! {"challenge_response_pairs":{"<device>":{"(1, -1, ...)":1,...}},
//!  "state":{"<device>":{"status":"Registered"}}}
//! ```
//!
//! Challenge keys are written as their elements joined by `", "` inside
//! parentheses. Decoding is lenient about keys only: text that is not in that
//! exact form is kept verbatim as [`ChallengeKey::Opaque`]. Everything else
//! (bad JSON, unknown status, non-integer responses) is a [`DecodeError`].

use crate::{error::DecodeError, identity::DeviceId, puf::Challenge};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

pub type Response = i8;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChallengeKey {
    Bits(Challenge),
    /// A stored key that did not parse as a challenge vector.
    Opaque(OpaqueKey),
}

/// Key text that is not in challenge-tuple form. Only [`ChallengeKey::from_text`]
/// builds one, so an opaque key can never collide with a `Bits` key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpaqueKey(String);

impl OpaqueKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ChallengeKey {
    /// Structured parse first, opaque fallback second.
    pub fn from_text(text: &str) -> Self {
        match parse_tuple(text) {
            Some(bits) => ChallengeKey::Bits(bits),
            None => ChallengeKey::Opaque(OpaqueKey(text.to_owned())),
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            ChallengeKey::Bits(bits) => {
                let parts: Vec<String> = bits.iter().map(i8::to_string).collect();
                format!("({})", parts.join(", "))
            }
            ChallengeKey::Opaque(raw) => raw.0.clone(),
        }
    }

    pub fn as_bits(&self) -> Option<&[i8]> {
        match self {
            ChallengeKey::Bits(bits) => Some(bits),
            ChallengeKey::Opaque(_) => None,
        }
    }
}

impl From<Challenge> for ChallengeKey {
    fn from(bits: Challenge) -> Self {
        ChallengeKey::Bits(bits)
    }
}

fn parse_tuple(text: &str) -> Option<Challenge> {
    let inner = text.strip_prefix('(')?.strip_suffix(')')?;
    if inner.is_empty() {
        return Some(Vec::new());
    }
    inner
        .split(", ")
        .map(|part| {
            let v: i8 = part.parse().ok()?;
            // Only the canonical spelling parses, so text -> key -> text is exact.
            (v.to_string() == part).then_some(v)
        })
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockReason {
    ExceededAttempts,
    NotPermitted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Registered,
    Authenticated,
    AuthenticationFailed,
    UnderObservation,
    Blocked(BlockReason),
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Registered => "Registered",
            Status::Authenticated => "Authenticated",
            Status::AuthenticationFailed => "AuthenticationFailed",
            Status::UnderObservation => "UnderObservation",
            Status::Blocked(BlockReason::NotPermitted) => "Blocked",
            Status::Blocked(BlockReason::ExceededAttempts) => "BlockedExceededAttempts",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Registered" => Status::Registered,
            "Authenticated" => Status::Authenticated,
            "AuthenticationFailed" => Status::AuthenticationFailed,
            "UnderObservation" => Status::UnderObservation,
            "Blocked" => Status::Blocked(BlockReason::NotPermitted),
            "BlockedExceededAttempts" => Status::Blocked(BlockReason::ExceededAttempts),
            other => return Err(DecodeError::UnknownStatus(other.to_owned())),
        })
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct StateEntry {
    status: String,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Snapshot {
    challenge_response_pairs: BTreeMap<String, BTreeMap<String, Response>>,
    state: BTreeMap<String, StateEntry>,
}

/// Challenge→response maps and a status per enrolled device.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CredentialStore {
    crps: BTreeMap<DeviceId, BTreeMap<ChallengeKey, Response>>,
    status: BTreeMap<DeviceId, Status>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the device's whole CRP map and status.
    pub fn enroll<I>(&mut self, id: &DeviceId, crps: I, status: Status)
    where
        I: IntoIterator<Item = (ChallengeKey, Response)>,
    {
        self.crps.insert(id.clone(), crps.into_iter().collect());
        self.status.insert(id.clone(), status);
    }

    /// Challenges in ascending key order; empty for unknown devices.
    pub fn list_challenges(&self, id: &DeviceId) -> Vec<ChallengeKey> {
        self.crps
            .get(id)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Response stored at `position` in [`Self::list_challenges`] order.
    pub fn response_at(&self, id: &DeviceId, position: usize) -> Option<Response> {
        self.crps.get(id)?.values().nth(position).copied()
    }

    pub fn crp_count(&self, id: &DeviceId) -> usize {
        self.crps.get(id).map_or(0, BTreeMap::len)
    }

    pub fn get_status(&self, id: &DeviceId) -> Option<Status> {
        self.status.get(id).copied()
    }

    /// Updates an enrolled device's status. Unknown devices are left alone and
    /// `false` is returned.
    pub fn set_status(&mut self, id: &DeviceId, status: Status) -> bool {
        match self.status.get_mut(id) {
            Some(slot) => {
                *slot = status;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.status.len()
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_empty()
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        let snapshot = Snapshot {
            challenge_response_pairs: self
                .crps
                .iter()
                .map(|(id, map)| {
                    let inner = map.iter().map(|(k, v)| (k.to_text(), *v)).collect();
                    (id.to_string(), inner)
                })
                .collect(),
            state: self
                .status
                .iter()
                .map(|(id, s)| {
                    let entry = StateEntry {
                        status: s.to_string(),
                    };
                    (id.to_string(), entry)
                })
                .collect(),
        };
        serde_json::to_string(&snapshot)
    }

    pub fn decode(payload: &str) -> Result<Self, DecodeError> {
        let snapshot: Snapshot = serde_json::from_str(payload)?;
        let mut store = CredentialStore::new();

        for (raw_id, map) in snapshot.challenge_response_pairs {
            let id = DeviceId::parse(&raw_id)?;
            let mut opaque = 0usize;
            let decoded: BTreeMap<ChallengeKey, Response> = map
                .into_iter()
                .map(|(text, response)| {
                    let key = ChallengeKey::from_text(&text);
                    if matches!(key, ChallengeKey::Opaque(_)) {
                        opaque += 1;
                    }
                    (key, response)
                })
                .collect();
            if opaque > 0 {
                warn!(device = id.short(), opaque, "kept unparseable challenge keys verbatim");
            }
            store.crps.insert(id, decoded);
        }

        for (raw_id, entry) in snapshot.state {
            let id = DeviceId::parse(&raw_id)?;
            if !store.crps.contains_key(&id) {
                return Err(DecodeError::MissingChallenges(raw_id));
            }
            store.status.insert(id, entry.status.parse()?);
        }

        if let Some(id) = store.crps.keys().find(|id| !store.status.contains_key(*id)) {
            return Err(DecodeError::MissingStatus(id.to_string()));
        }
        Ok(store)
    }
}
