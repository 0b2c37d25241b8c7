use pufchain_core::{
    Authenticator, Challenge, CrpSource, Ledger, LedgerConfig, ProtocolConfig, Response,
};
use rand::{rngs::StdRng, SeedableRng};
use std::collections::HashMap;

/// Generator with a fixed CRP table. `flip_for` evaluations are answered with
/// inverted responses before it starts answering truthfully.
pub struct ScriptedSource {
    pub challenges: Vec<Challenge>,
    pub responses: Vec<Response>,
    pub flip_for: usize,
    pub evaluations: usize,
}

impl ScriptedSource {
    pub fn new(pairs: &[(Vec<i8>, i8)]) -> Self {
        Self {
            challenges: pairs.iter().map(|(c, _)| c.clone()).collect(),
            responses: pairs.iter().map(|(_, r)| *r).collect(),
            flip_for: 0,
            evaluations: 0,
        }
    }

    pub fn inverted(mut self) -> Self {
        self.flip_for = usize::MAX;
        self
    }

    pub fn flipping_first(mut self, evaluations: usize) -> Self {
        self.flip_for = evaluations;
        self
    }
}

impl CrpSource for ScriptedSource {
    fn generate(&mut self, count: usize) -> (Vec<Challenge>, Vec<Response>) {
        let n = count.min(self.challenges.len());
        (self.challenges[..n].to_vec(), self.responses[..n].to_vec())
    }

    fn evaluate(&mut self, challenges: &[Challenge]) -> Vec<Response> {
        let table: HashMap<&Challenge, Response> =
            self.challenges.iter().zip(self.responses.iter().copied()).collect();
        let flip = self.evaluations < self.flip_for;
        self.evaluations += 1;
        challenges
            .iter()
            .map(|c| {
                let r = table.get(c).copied().unwrap_or(1);
                if flip {
                    -r
                } else {
                    r
                }
            })
            .collect()
    }
}

pub fn four_pairs() -> Vec<(Vec<i8>, i8)> {
    vec![
        (vec![1, 1, -1, -1], 1),
        (vec![-1, 1, -1, 1], -1),
        (vec![1, -1, 1, -1], 1),
        (vec![-1, -1, -1, 1], -1),
    ]
}

pub fn scenario_config() -> ProtocolConfig {
    ProtocolConfig {
        num_crp: 4,
        max_attempts: 3,
        sample_size: 4,
        failure_probability: 0.0,
        deny_probability: 0.0,
    }
}

pub fn authenticator(difficulty: usize, config: ProtocolConfig) -> Authenticator<StdRng> {
    let ledger = Ledger::new(LedgerConfig::new(difficulty, 10).expect("ledger config"))
        .expect("ledger");
    Authenticator::new(ledger, config, StdRng::seed_from_u64(42)).expect("authenticator")
}
