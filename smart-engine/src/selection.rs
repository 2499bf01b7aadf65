//! Queue ordering policies
//!
//! A policy receives the full pool of eligible unlabeled items and returns the
//! ones to enqueue, best first. The fill selector never looks inside a policy;
//! adding an uncertainty strategy means adding an implementation here.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// An unlabeled datum eligible for a queue slot
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub data_id: Uuid,
    /// Prediction confidence of the current model, if any
    pub score: Option<f64>,
}

/// Ordering strategy over the candidate pool
pub trait SelectionPolicy: Send + Sync {
    /// Policy name for logging
    fn name(&self) -> &'static str;

    /// Return at most `limit` candidates in insertion order
    fn pick(&self, pool: Vec<Candidate>, limit: usize) -> Vec<Candidate>;
}

/// Uniformly random order
#[derive(Debug, Default, Clone)]
pub struct RandomPolicy {
    seed: Option<u64>,
}

impl RandomPolicy {
    pub fn new() -> Self {
        Self { seed: None }
    }

    /// Reproducible order, for tests and replays
    pub fn seeded(seed: u64) -> Self {
        Self { seed: Some(seed) }
    }
}

impl SelectionPolicy for RandomPolicy {
    fn name(&self) -> &'static str {
        "random"
    }

    fn pick(&self, mut pool: Vec<Candidate>, limit: usize) -> Vec<Candidate> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let amount = limit.min(pool.len());
        // partial_shuffle moves a random sample of `amount` to the front
        pool.partial_shuffle(&mut rng, amount);
        pool.truncate(amount);
        pool
    }
}

/// Lowest model confidence first; unscored items go last
#[derive(Debug, Default, Clone)]
pub struct LeastConfidentPolicy;

impl SelectionPolicy for LeastConfidentPolicy {
    fn name(&self) -> &'static str {
        "least_confident"
    }

    fn pick(&self, mut pool: Vec<Candidate>, limit: usize) -> Vec<Candidate> {
        pool.sort_by(|a, b| match (a.score, b.score) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
        pool.truncate(limit);
        pool
    }
}

/// Policy names accepted in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderingPolicy {
    #[default]
    Random,
    LeastConfident,
}

impl OrderingPolicy {
    pub fn build(&self) -> Box<dyn SelectionPolicy> {
        match self {
            OrderingPolicy::Random => Box::new(RandomPolicy::new()),
            OrderingPolicy::LeastConfident => Box::new(LeastConfidentPolicy),
        }
    }
}

impl fmt::Display for OrderingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderingPolicy::Random => f.write_str("random"),
            OrderingPolicy::LeastConfident => f.write_str("least_confident"),
        }
    }
}

impl FromStr for OrderingPolicy {
    type Err = smart_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(OrderingPolicy::Random),
            "least_confident" | "least-confidence" | "least_confidence" => {
                Ok(OrderingPolicy::LeastConfident)
            }
            other => Err(smart_common::Error::Config(format!(
                "Unknown ordering policy '{}' (expected 'random' or 'least_confident')",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn pool(n: usize) -> Vec<Candidate> {
        (0..n)
            .map(|_| Candidate {
                data_id: Uuid::new_v4(),
                score: None,
            })
            .collect()
    }

    #[test]
    fn test_random_respects_limit() {
        let picked = RandomPolicy::new().pick(pool(50), 10);
        assert_eq!(picked.len(), 10);
        let unique: HashSet<_> = picked.iter().map(|c| c.data_id).collect();
        assert_eq!(unique.len(), 10);
    }

    #[test]
    fn test_random_small_pool_returns_everything() {
        let candidates = pool(3);
        let ids: HashSet<_> = candidates.iter().map(|c| c.data_id).collect();
        let picked = RandomPolicy::new().pick(candidates, 10);
        assert_eq!(picked.iter().map(|c| c.data_id).collect::<HashSet<_>>(), ids);
    }

    #[test]
    fn test_seeded_random_is_reproducible() {
        let candidates = pool(40);
        let a = RandomPolicy::seeded(7).pick(candidates.clone(), 15);
        let b = RandomPolicy::seeded(7).pick(candidates, 15);
        assert_eq!(a, b);
    }

    #[test]
    fn test_least_confident_orders_by_score() {
        let mut candidates = pool(4);
        candidates[0].score = Some(0.9);
        candidates[1].score = None;
        candidates[2].score = Some(0.2);
        candidates[3].score = Some(0.55);
        let expected = vec![
            candidates[2].data_id,
            candidates[3].data_id,
            candidates[0].data_id,
        ];

        let picked = LeastConfidentPolicy.pick(candidates, 3);
        assert_eq!(picked.iter().map(|c| c.data_id).collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_policy_names_parse() {
        assert_eq!("random".parse::<OrderingPolicy>().unwrap(), OrderingPolicy::Random);
        assert_eq!(
            "Least_Confident".parse::<OrderingPolicy>().unwrap(),
            OrderingPolicy::LeastConfident
        );
        assert!("margin".parse::<OrderingPolicy>().is_err());
        assert_eq!(OrderingPolicy::LeastConfident.build().name(), "least_confident");
    }
}
