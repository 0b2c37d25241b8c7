//! Simulated PUF devices used as challenge-response sources.
//!
//! Every model is a seeded linear-threshold construction over ±1 challenges.
//! Noisy models perturb each chain's delay with Gaussian noise scaled by
//! `noisiness` times the chain's weight norm, so the same challenge can flip
//! its response between evaluations.

use crate::{constants::CHALLENGE_BITS, contract::Response};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type Challenge = Vec<i8>;

/// Anything that can hand out challenge-response pairs and re-evaluate them.
pub trait CrpSource {
    /// `count` fresh challenges and the device's responses to them.
    fn generate(&mut self, count: usize) -> (Vec<Challenge>, Vec<Response>);

    /// Re-evaluates known challenges, one response per challenge.
    fn evaluate(&mut self, challenges: &[Challenge]) -> Vec<Response>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PufKind {
    Arbiter,
    XorArbiter,
    XorFeedForwardArbiter,
    BistableRing,
    XorBistableRing,
    Interpose,
    LightweightSecure,
    Permutation,
}

impl PufKind {
    pub const ALL: [PufKind; 8] = [
        PufKind::Arbiter,
        PufKind::XorArbiter,
        PufKind::XorFeedForwardArbiter,
        PufKind::BistableRing,
        PufKind::XorBistableRing,
        PufKind::Interpose,
        PufKind::LightweightSecure,
        PufKind::Permutation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PufKind::Arbiter => "arbiter",
            PufKind::XorArbiter => "xor-arbiter",
            PufKind::XorFeedForwardArbiter => "xor-feed-forward-arbiter",
            PufKind::BistableRing => "bistable-ring",
            PufKind::XorBistableRing => "xor-bistable-ring",
            PufKind::Interpose => "interpose",
            PufKind::LightweightSecure => "lightweight-secure",
            PufKind::Permutation => "permutation",
        }
    }
}

impl fmt::Display for PufKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PufKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PufKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = PufKind::ALL.iter().map(PufKind::as_str).collect();
                format!("unknown PUF kind {s:?}, expected one of: {}", names.join(", "))
            })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArbiterConfig {
    pub n: usize,
    pub seed: u64,
    pub noisiness: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct XorArbiterConfig {
    pub n: usize,
    pub k: usize,
    pub seed: u64,
    pub noisiness: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedForwardConfig {
    pub n: usize,
    pub k: usize,
    /// `(start, end)`: the arbiter after stage `start` drives stage `end`.
    pub loops: Vec<(usize, usize)>,
    pub seed: u64,
    pub noisiness: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BistableRingConfig {
    pub n: usize,
    pub k: usize,
    pub seed: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InterposeConfig {
    pub n: usize,
    pub k_up: usize,
    pub k_down: usize,
    pub seed: u64,
    pub noisiness: f64,
}

/// Tagged generator configuration; one variant per [`PufKind`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PufConfig {
    Arbiter(ArbiterConfig),
    XorArbiter(XorArbiterConfig),
    XorFeedForwardArbiter(FeedForwardConfig),
    BistableRing(BistableRingConfig),
    XorBistableRing(BistableRingConfig),
    Interpose(InterposeConfig),
    LightweightSecure(XorArbiterConfig),
    Permutation(XorArbiterConfig),
}

impl PufConfig {
    /// Stock parameters for each kind, seeded with `seed`.
    pub fn standard(kind: PufKind, seed: u64) -> Self {
        let n = CHALLENGE_BITS;
        let xor = |k, noisiness| XorArbiterConfig {
            n,
            k,
            seed,
            noisiness,
        };
        match kind {
            PufKind::Arbiter => PufConfig::Arbiter(ArbiterConfig {
                n,
                seed,
                noisiness: 0.0,
            }),
            PufKind::XorArbiter => PufConfig::XorArbiter(xor(2, 0.0)),
            PufKind::XorFeedForwardArbiter => PufConfig::XorFeedForwardArbiter(FeedForwardConfig {
                n,
                k: 4,
                loops: vec![(32, 63)],
                seed,
                noisiness: 0.0,
            }),
            PufKind::BistableRing => {
                PufConfig::BistableRing(BistableRingConfig { n, k: 1, seed })
            }
            PufKind::XorBistableRing => {
                PufConfig::XorBistableRing(BistableRingConfig { n, k: 8, seed })
            }
            PufKind::Interpose => PufConfig::Interpose(InterposeConfig {
                n,
                k_up: 8,
                k_down: 8,
                seed,
                noisiness: 0.05,
            }),
            PufKind::LightweightSecure => PufConfig::LightweightSecure(xor(8, 0.05)),
            PufKind::Permutation => PufConfig::Permutation(xor(8, 0.05)),
        }
    }

    pub fn kind(&self) -> PufKind {
        match self {
            PufConfig::Arbiter(_) => PufKind::Arbiter,
            PufConfig::XorArbiter(_) => PufKind::XorArbiter,
            PufConfig::XorFeedForwardArbiter(_) => PufKind::XorFeedForwardArbiter,
            PufConfig::BistableRing(_) => PufKind::BistableRing,
            PufConfig::XorBistableRing(_) => PufKind::XorBistableRing,
            PufConfig::Interpose(_) => PufKind::Interpose,
            PufConfig::LightweightSecure(_) => PufKind::LightweightSecure,
            PufConfig::Permutation(_) => PufKind::Permutation,
        }
    }
}

fn sign(x: f64) -> i8 {
    if x >= 0.0 {
        1
    } else {
        -1
    }
}

fn gaussian_weights(rng: &mut StdRng, len: usize) -> Vec<f64> {
    (0..len).map(|_| rng.sample(StandardNormal)).collect()
}

/// Additive delay model of one arbiter chain: `n` stage weights plus a bias.
#[derive(Clone, Debug)]
struct DelayChain {
    weights: Vec<f64>,
    noise_scale: f64,
}

impl DelayChain {
    fn new(rng: &mut StdRng, n: usize, noisiness: f64) -> Self {
        let weights = gaussian_weights(rng, n + 1);
        let norm = weights.iter().map(|w| w * w).sum::<f64>().sqrt();
        Self {
            weights,
            noise_scale: noisiness * norm,
        }
    }

    fn stages(&self) -> usize {
        self.weights.len() - 1
    }

    /// Delay difference after stages `0..=last`.
    fn partial_delay(&self, c: &[i8], last: usize) -> f64 {
        let mut acc = 0.0;
        let mut parity = 1.0;
        for i in (0..=last).rev() {
            parity *= f64::from(c[i]);
            acc += self.weights[i] * parity;
        }
        acc
    }

    fn delay(&self, c: &[i8], rng: &mut StdRng) -> f64 {
        let n = self.stages();
        let mut total = self.weights[n];
        if n > 0 {
            total += self.partial_delay(c, n - 1);
        }
        if self.noise_scale > 0.0 {
            let z: f64 = rng.sample(StandardNormal);
            total += self.noise_scale * z;
        }
        total
    }

    fn eval(&self, c: &[i8], rng: &mut StdRng) -> i8 {
        sign(self.delay(c, rng))
    }
}

/// Bistable ring: a weighted sum of challenge bits plus a bias.
#[derive(Clone, Debug)]
struct Ring {
    weights: Vec<f64>,
}

impl Ring {
    fn eval(&self, c: &[i8]) -> i8 {
        let n = self.weights.len() - 1;
        let sum: f64 = c
            .iter()
            .zip(&self.weights[..n])
            .map(|(b, w)| f64::from(*b) * w)
            .sum();
        sign(sum + self.weights[n])
    }
}

#[derive(Clone, Debug)]
enum Model {
    Xor(Vec<DelayChain>),
    FeedForward {
        chains: Vec<DelayChain>,
        loops: Vec<(usize, usize)>,
    },
    Rings(Vec<Ring>),
    Interpose {
        upper: Vec<DelayChain>,
        lower: Vec<DelayChain>,
    },
    /// Each chain sees the challenge rotated by its position.
    Rotated(Vec<DelayChain>),
    /// Each chain sees the challenge through its own fixed permutation.
    Permuted {
        chains: Vec<DelayChain>,
        perms: Vec<Vec<usize>>,
    },
}

fn xor_eval(chains: &[DelayChain], c: &[i8], rng: &mut StdRng) -> i8 {
    chains.iter().map(|ch| ch.eval(c, rng)).product()
}

impl Model {
    fn build(config: &PufConfig) -> (usize, Model) {
        match config {
            PufConfig::Arbiter(c) => {
                let mut rng = StdRng::seed_from_u64(c.seed);
                (c.n, Model::Xor(vec![DelayChain::new(&mut rng, c.n, c.noisiness)]))
            }
            PufConfig::XorArbiter(c) => {
                let mut rng = StdRng::seed_from_u64(c.seed);
                (c.n, Model::Xor(chains(&mut rng, c.k, c.n, c.noisiness)))
            }
            PufConfig::XorFeedForwardArbiter(c) => {
                let mut rng = StdRng::seed_from_u64(c.seed);
                let loops = c
                    .loops
                    .iter()
                    .copied()
                    .filter(|(start, end)| start < end && *end < c.n)
                    .collect();
                (
                    c.n,
                    Model::FeedForward {
                        chains: chains(&mut rng, c.k, c.n, c.noisiness),
                        loops,
                    },
                )
            }
            PufConfig::BistableRing(c) | PufConfig::XorBistableRing(c) => {
                let mut rng = StdRng::seed_from_u64(c.seed);
                let rings = (0..c.k.max(1))
                    .map(|_| Ring {
                        weights: gaussian_weights(&mut rng, c.n + 1),
                    })
                    .collect();
                (c.n, Model::Rings(rings))
            }
            PufConfig::Interpose(c) => {
                let mut rng = StdRng::seed_from_u64(c.seed);
                let upper = chains(&mut rng, c.k_up, c.n, c.noisiness);
                let lower = chains(&mut rng, c.k_down, c.n + 1, c.noisiness);
                (c.n, Model::Interpose { upper, lower })
            }
            PufConfig::LightweightSecure(c) => {
                let mut rng = StdRng::seed_from_u64(c.seed);
                (c.n, Model::Rotated(chains(&mut rng, c.k, c.n, c.noisiness)))
            }
            PufConfig::Permutation(c) => {
                let mut rng = StdRng::seed_from_u64(c.seed);
                let chains = chains(&mut rng, c.k, c.n, c.noisiness);
                let perms = (0..chains.len())
                    .map(|_| {
                        let mut p: Vec<usize> = (0..c.n).collect();
                        p.shuffle(&mut rng);
                        p
                    })
                    .collect();
                (c.n, Model::Permuted { chains, perms })
            }
        }
    }

    fn eval(&self, c: &[i8], rng: &mut StdRng) -> i8 {
        match self {
            Model::Xor(chains) => xor_eval(chains, c, rng),
            Model::FeedForward { chains, loops } => chains
                .iter()
                .map(|chain| {
                    let mut fed = c.to_vec();
                    for &(start, end) in loops {
                        fed[end] = sign(chain.partial_delay(&fed, start));
                    }
                    chain.eval(&fed, rng)
                })
                .product(),
            Model::Rings(rings) => rings.iter().map(|r| r.eval(c)).product(),
            Model::Interpose { upper, lower } => {
                let bit = xor_eval(upper, c, rng);
                let mid = c.len() / 2;
                let mut extended = Vec::with_capacity(c.len() + 1);
                extended.extend_from_slice(&c[..mid]);
                extended.push(bit);
                extended.extend_from_slice(&c[mid..]);
                xor_eval(lower, &extended, rng)
            }
            Model::Rotated(chains) => chains
                .iter()
                .enumerate()
                .map(|(i, chain)| {
                    let mut rotated = c.to_vec();
                    rotated.rotate_left(i % c.len().max(1));
                    chain.eval(&rotated, rng)
                })
                .product(),
            Model::Permuted { chains, perms } => chains
                .iter()
                .zip(perms)
                .map(|(chain, perm)| {
                    let permuted: Vec<i8> = perm.iter().map(|&j| c[j]).collect();
                    chain.eval(&permuted, rng)
                })
                .product(),
        }
    }
}

fn chains(rng: &mut StdRng, k: usize, n: usize, noisiness: f64) -> Vec<DelayChain> {
    (0..k.max(1))
        .map(|_| DelayChain::new(rng, n, noisiness))
        .collect()
}

/// A simulated device built from a [`PufConfig`].
#[derive(Clone, Debug)]
pub struct Puf {
    kind: PufKind,
    n: usize,
    model: Model,
    noise_seed: u64,
    evaluations: u64,
    challenge_rng: StdRng,
}

impl Puf {
    pub fn new(config: &PufConfig) -> Self {
        let (n, model) = Model::build(config);
        let seed = match config {
            PufConfig::Arbiter(c) => c.seed,
            PufConfig::XorArbiter(c)
            | PufConfig::LightweightSecure(c)
            | PufConfig::Permutation(c) => c.seed,
            PufConfig::XorFeedForwardArbiter(c) => c.seed,
            PufConfig::BistableRing(c) | PufConfig::XorBistableRing(c) => c.seed,
            PufConfig::Interpose(c) => c.seed,
        };
        Self {
            kind: config.kind(),
            n,
            model,
            noise_seed: seed.rotate_left(17) ^ 0x9e37_79b9_7f4a_7c15,
            evaluations: 0,
            challenge_rng: StdRng::seed_from_u64(seed.wrapping_add(1)),
        }
    }

    pub fn standard(kind: PufKind, seed: u64) -> Self {
        Self::new(&PufConfig::standard(kind, seed))
    }

    pub fn kind(&self) -> PufKind {
        self.kind
    }

    /// Uniformly random ±1 challenges of the device's width.
    pub fn random_challenges(&mut self, count: usize) -> Vec<Challenge> {
        let n = self.n;
        (0..count)
            .map(|_| {
                (0..n)
                    .map(|_| if self.challenge_rng.gen::<bool>() { 1 } else { -1 })
                    .collect()
            })
            .collect()
    }
}

impl CrpSource for Puf {
    fn generate(&mut self, count: usize) -> (Vec<Challenge>, Vec<Response>) {
        let challenges = self.random_challenges(count);
        let responses = self.evaluate(&challenges);
        (challenges, responses)
    }

    fn evaluate(&mut self, challenges: &[Challenge]) -> Vec<Response> {
        self.evaluations += 1;
        let call_seed = self
            .noise_seed
            .wrapping_add(self.evaluations.wrapping_mul(0x2545_f491_4f6c_dd1d));
        let n = self.n;
        let model = &self.model;
        challenges
            .par_iter()
            .enumerate()
            .map(|(i, c)| {
                let mut rng = StdRng::seed_from_u64(call_seed.wrapping_add(i as u64));
                if c.len() == n {
                    model.eval(c, &mut rng)
                } else {
                    // Wrong-width challenges cannot be routed through the
                    // chains; pad or cut them to the device width.
                    let mut fitted = c.clone();
                    fitted.resize(n, 1);
                    model.eval(&fitted, &mut rng)
                }
            })
            .collect()
    }
}
