//! Enrollment and re-authentication of devices against the ledger.
//!
//! Every change of a device's persisted status mines a block holding the full
//! credential-store snapshot and re-validates the chain. A failed validation
//! ends the session with [`ProtocolError::Integrity`].

use crate::{
    config::ProtocolConfig,
    contract::{BlockReason, ChallengeKey, CredentialStore, Response, Status},
    error::{ConfigError, ProtocolError},
    identity::DeviceId,
    ledger::{Ledger, MinedBlock},
    puf::{Challenge, CrpSource},
};
use rand::Rng;
use tracing::{debug, info, warn};

/// How a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Passed the first round.
    Authenticated,
    /// Passed after at least one failed round.
    UnderObservation { failures: u32 },
    Blocked(BlockReason),
}

impl SessionOutcome {
    pub fn status(&self) -> Status {
        match self {
            SessionOutcome::Authenticated => Status::Authenticated,
            SessionOutcome::UnderObservation { .. } => Status::UnderObservation,
            SessionOutcome::Blocked(reason) => Status::Blocked(*reason),
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, SessionOutcome::Blocked(_))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionReport {
    pub device: DeviceId,
    pub outcome: SessionOutcome,
    pub failures: u32,
    /// Persisted statuses in the order they were written.
    pub transitions: Vec<Status>,
    pub blocks: Vec<MinedBlock>,
}

/// Drives the enrollment / authentication state machine over one ledger and
/// the credential store it carries.
pub struct Authenticator<R> {
    ledger: Ledger,
    store: CredentialStore,
    config: ProtocolConfig,
    rng: R,
}

impl<R: Rng> Authenticator<R> {
    pub fn new(ledger: Ledger, config: ProtocolConfig, rng: R) -> Result<Self, ConfigError> {
        Self::with_store(ledger, CredentialStore::new(), config, rng)
    }

    /// Starts from an existing snapshot, e.g. one decoded from a resumed ledger.
    pub fn with_store(
        ledger: Ledger,
        store: CredentialStore,
        config: ProtocolConfig,
        rng: R,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            ledger,
            store,
            config,
            rng,
        })
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn into_parts(self) -> (Ledger, CredentialStore) {
        (self.ledger, self.store)
    }

    /// Mines `next` onto the ledger, adopts it as the working store and
    /// validates the chain. If the block is not committed the working store
    /// is left as it was.
    fn persist(&mut self, next: CredentialStore) -> Result<MinedBlock, ProtocolError> {
        let payload = next.encode()?;
        let mined = self.ledger.append(payload)?;
        self.store = next;
        self.ledger.verify()?;
        Ok(mined)
    }

    /// Replaces the working store with the snapshot in the ledger tip.
    pub fn reload(&mut self) -> Result<(), ProtocolError> {
        let tip = self.ledger.latest()?;
        self.store = CredentialStore::decode(&tip.payload)?;
        Ok(())
    }

    /// Requests fresh CRPs, registers the device, persists and reloads.
    pub fn enroll<S: CrpSource>(
        &mut self,
        id: &DeviceId,
        source: &mut S,
    ) -> Result<MinedBlock, ProtocolError> {
        let (challenges, responses) = source.generate(self.config.num_crp);
        if challenges.len() != responses.len() {
            return Err(ProtocolError::GeneratorMismatch {
                expected: challenges.len(),
                got: responses.len(),
            });
        }
        let crps = challenges
            .into_iter()
            .map(ChallengeKey::Bits)
            .zip(responses);
        let mut next = self.store.clone();
        next.enroll(id, crps, Status::Registered);
        let mined = self.persist(next)?;
        info!(device = id.short(), crps = self.store.crp_count(id), "Registered");

        self.reload()?;
        Ok(mined)
    }

    /// Admission gate: refuses a session with `deny_probability`.
    pub fn admit(&mut self) -> bool {
        !self.rng.gen_bool(self.config.deny_probability)
    }

    /// One authentication round. Samples `sample_size` stored positions (with
    /// replacement), re-evaluates every stored challenge, optionally inverts
    /// all fresh responses, and passes if any sampled position agrees.
    pub fn authenticate_round<S: CrpSource>(
        &mut self,
        id: &DeviceId,
        source: &mut S,
    ) -> Result<bool, ProtocolError> {
        let count = self.store.crp_count(id);
        if count == 0 {
            warn!(device = id.short(), "no stored challenges");
            return Ok(false);
        }

        let positions: Vec<usize> = (0..self.config.sample_size)
            .map(|_| self.rng.gen_range(0..count))
            .collect();
        let stored: Vec<Option<Response>> = positions
            .iter()
            .map(|&p| self.store.response_at(id, p))
            .collect();

        let mut fresh = self.evaluate_stored(id, source)?;
        if self.rng.gen_bool(self.config.failure_probability) {
            debug!(device = id.short(), "injecting response inversion");
            for r in fresh.iter_mut().flatten() {
                *r = if *r == 1 { -1 } else { 1 };
            }
        }

        let matched = positions.iter().zip(&stored).any(|(&p, expected)| {
            matches!((expected, fresh.get(p).copied().flatten()), (Some(a), Some(b)) if *a == b)
        });
        debug!(device = id.short(), matched, "authentication round");
        Ok(matched)
    }

    /// Fresh responses aligned with `list_challenges`; opaque keys yield `None`.
    fn evaluate_stored<S: CrpSource>(
        &self,
        id: &DeviceId,
        source: &mut S,
    ) -> Result<Vec<Option<Response>>, ProtocolError> {
        let keys = self.store.list_challenges(id);
        let bits: Vec<Challenge> = keys
            .iter()
            .filter_map(|k| k.as_bits().map(<[i8]>::to_vec))
            .collect();
        let responses = source.evaluate(&bits);
        if responses.len() != bits.len() {
            return Err(ProtocolError::GeneratorMismatch {
                expected: bits.len(),
                got: responses.len(),
            });
        }
        let mut responses = responses.into_iter();
        Ok(keys
            .iter()
            .map(|k| k.as_bits().and_then(|_| responses.next()))
            .collect())
    }

    /// Persists `status` for `id` if it differs from the stored one.
    fn transition(
        &mut self,
        id: &DeviceId,
        status: Status,
        report: &mut SessionReport,
    ) -> Result<(), ProtocolError> {
        match self.store.get_status(id) {
            None => return Err(ProtocolError::UnknownDevice(id.to_string())),
            Some(current) if current == status => return Ok(()),
            Some(_) => {}
        }
        let mut next = self.store.clone();
        next.set_status(id, status);
        let mined = self.persist(next)?;
        match status {
            Status::Blocked(_) => warn!(device = id.short(), %status, "status changed"),
            _ => info!(device = id.short(), %status, "status changed"),
        }
        report.transitions.push(status);
        report.blocks.push(mined);
        Ok(())
    }

    /// Runs a session for an enrolled device with an explicit admission result.
    pub fn authenticate<S: CrpSource>(
        &mut self,
        id: &DeviceId,
        source: &mut S,
        permitted: bool,
    ) -> Result<SessionReport, ProtocolError> {
        if self.store.get_status(id).is_none() {
            return Err(ProtocolError::UnknownDevice(id.to_string()));
        }
        let mut report = SessionReport {
            device: id.clone(),
            outcome: SessionOutcome::Blocked(BlockReason::NotPermitted),
            failures: 0,
            transitions: Vec::new(),
            blocks: Vec::new(),
        };

        if !permitted {
            warn!(device = id.short(), "device not permitted");
            self.transition(id, Status::Blocked(BlockReason::NotPermitted), &mut report)?;
            self.reload()?;
            return Ok(report);
        }

        let outcome = loop {
            if self.authenticate_round(id, source)? {
                break if report.failures == 0 {
                    SessionOutcome::Authenticated
                } else {
                    SessionOutcome::UnderObservation {
                        failures: report.failures,
                    }
                };
            }
            report.failures += 1;
            self.transition(id, Status::AuthenticationFailed, &mut report)?;
            if report.failures >= self.config.max_attempts {
                warn!(device = id.short(), failures = report.failures, "attempts exhausted");
                break SessionOutcome::Blocked(BlockReason::ExceededAttempts);
            }
        };

        self.transition(id, outcome.status(), &mut report)?;
        self.reload()?;
        report.outcome = outcome;
        Ok(report)
    }

    /// Enrollment followed by a session whose admission is decided by [`Self::admit`].
    pub fn enroll_and_authenticate<S: CrpSource>(
        &mut self,
        id: &DeviceId,
        source: &mut S,
    ) -> Result<SessionReport, ProtocolError> {
        let enrolled = self.enroll(id, source)?;
        let permitted = self.admit();
        let mut report = self.authenticate(id, source, permitted)?;
        report.transitions.insert(0, Status::Registered);
        report.blocks.insert(0, enrolled);
        Ok(report)
    }
}
