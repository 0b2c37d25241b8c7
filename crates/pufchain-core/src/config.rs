//! Construction parameters for the ledger and the authentication protocol.
//!
//! Both structs deserialize from JSON with every field optional; missing
//! fields fall back to the values in [`crate::constants`].

use crate::constants::*;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Required leading hex zeros of a mined block hash.
    pub difficulty: usize,
    /// Maximum number of blocks kept in memory.
    pub retention: usize,
    /// Upper bound on a single mining run, unbounded when `None`.
    #[serde(with = "opt_millis")]
    pub mining_timeout: Option<Duration>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: POW_TARGET_DIFFICULTY,
            retention: RETENTION_LIMIT,
            mining_timeout: None,
        }
    }
}

impl LedgerConfig {
    pub fn new(difficulty: usize, retention: usize) -> Result<Self, ConfigError> {
        let cfg = Self {
            difficulty,
            retention,
            mining_timeout: None,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_mining_timeout(mut self, timeout: Duration) -> Self {
        self.mining_timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.difficulty > HASH_HEX_SIZE {
            return Err(ConfigError::Difficulty(self.difficulty));
        }
        if self.retention == 0 {
            return Err(ConfigError::Retention);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// CRPs requested from the generator at enrollment.
    pub num_crp: usize,
    /// Failed rounds tolerated before the device is blocked.
    pub max_attempts: u32,
    /// Positions sampled (with replacement) per authentication round.
    pub sample_size: usize,
    /// Chance that a round's fresh responses are all inverted.
    pub failure_probability: f64,
    /// Chance that the admission check refuses a session.
    pub deny_probability: f64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            num_crp: NUM_CRP,
            max_attempts: MAX_ATTEMPTS,
            sample_size: SAMPLE_SIZE,
            failure_probability: FAILURE_PROBABILITY,
            deny_probability: DENY_PROBABILITY,
        }
    }
}

impl ProtocolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_crp == 0 {
            return Err(ConfigError::Zero { name: "num_crp" });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Zero {
                name: "max_attempts",
            });
        }
        if self.sample_size == 0 {
            return Err(ConfigError::Zero {
                name: "sample_size",
            });
        }
        for (name, value) in [
            ("failure_probability", self.failure_probability),
            ("deny_probability", self.deny_probability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Probability { name, value });
            }
        }
        Ok(())
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(v: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
