//! Search strategies that propose configurations and learn from their losses.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sh_types::Configuration;
use tracing::debug;

use crate::space::SearchSpace;

/// A configuration handed out for evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    /// Identifies the suggestion when its loss is reported back.
    pub ticket: u64,
    pub configuration: Configuration,
    /// Effort level to evaluate at.
    pub budget: f64,
}

/// Common trait for all search strategies. Losses are always minimized.
pub trait SearchStrategy: Send {
    /// Generate the next batch of configurations to evaluate.
    fn suggest(&mut self, count: usize) -> Vec<Suggestion>;

    /// Report a completed evaluation so adaptive strategies can learn.
    fn report(&mut self, _suggestion: &Suggestion, _loss: f64) {}

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

/// Non-finite losses rank behind every real one.
pub(crate) fn rank_loss(loss: f64) -> f64 {
    if loss.is_nan() {
        f64::INFINITY
    } else {
        loss
    }
}

// ---- Random search ----

/// Independent random sampling across the search space.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    rng: ChaCha8Rng,
    budget: f64,
    next_ticket: u64,
}

impl RandomSearch {
    pub fn new(space: SearchSpace, seed: u64) -> Self {
        Self {
            space,
            rng: ChaCha8Rng::seed_from_u64(seed),
            budget: 1.0,
            next_ticket: 0,
        }
    }

    /// Budget attached to every suggestion.
    pub fn with_budget(mut self, budget: f64) -> Self {
        self.budget = budget;
        self
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self, count: usize) -> Vec<Suggestion> {
        (0..count)
            .map(|_| {
                let ticket = self.next_ticket;
                self.next_ticket += 1;
                Suggestion {
                    ticket,
                    configuration: self.space.sample(&mut self.rng),
                    budget: self.budget,
                }
            })
            .collect()
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Bayesian search ----

#[derive(Debug, Clone)]
struct Observation {
    point: Vec<f64>,
    loss: f64,
}

/// Model-based search with a kernel-regression surrogate.
///
/// After a random initial design, each suggestion scores a pool of random
/// samples and neighbours of the best observations with a lower confidence
/// bound and returns the most promising one. A fraction of suggestions stays
/// purely random, controlled by `exploration_weight`.
#[derive(Debug, Clone)]
pub struct BayesianSearch {
    space: SearchSpace,
    rng: ChaCha8Rng,
    observations: Vec<Observation>,
    exploration_weight: f64,
    initial_design: usize,
    candidates: usize,
    bandwidth: f64,
    kappa: f64,
    budget: f64,
    next_ticket: u64,
}

impl BayesianSearch {
    pub fn new(space: SearchSpace, seed: u64) -> Self {
        Self {
            space,
            rng: ChaCha8Rng::seed_from_u64(seed),
            observations: Vec::new(),
            exploration_weight: 0.2,
            initial_design: 8,
            candidates: 256,
            bandwidth: 0.15,
            kappa: 1.0,
            budget: 1.0,
            next_ticket: 0,
        }
    }

    pub fn with_budget(mut self, budget: f64) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_exploration_weight(mut self, weight: f64) -> Self {
        self.exploration_weight = weight.clamp(0.0, 1.0);
        self
    }

    pub fn with_initial_design(mut self, n: usize) -> Self {
        self.initial_design = n;
        self
    }

    /// Seed the surrogate with evaluations from earlier runs.
    ///
    /// Configurations that do not belong to this space are skipped.
    pub fn with_observations<I>(mut self, prior: I) -> Self
    where
        I: IntoIterator<Item = (Configuration, f64)>,
    {
        for (configuration, loss) in prior {
            if let Err(e) = self.space.check(&configuration) {
                debug!("Skipping prior observation outside the space: {e}");
                continue;
            }
            self.observe(&configuration, loss);
        }
        self
    }

    pub fn observation_count(&self) -> usize {
        self.observations.len()
    }

    fn observe(&mut self, configuration: &Configuration, loss: f64) {
        if loss.is_finite() {
            self.observations.push(Observation {
                point: self.space.to_unit_vector(configuration),
                loss,
            });
        }
    }

    /// Pure exploration sample.
    fn explore(&mut self) -> Configuration {
        self.space.sample(&mut self.rng)
    }

    /// Draw a candidate pool and return the one with the lowest confidence bound.
    fn exploit(&mut self) -> Configuration {
        let mut ranked: Vec<&Observation> = self.observations.iter().collect();
        ranked.sort_by(|a, b| a.loss.total_cmp(&b.loss));
        let anchors: Vec<Configuration> = ranked
            .iter()
            .take(5)
            .map(|o| self.space.from_unit_vector(&o.point))
            .collect();

        let local = self.candidates / 2;
        let mut pool: Vec<Configuration> = Vec::with_capacity(self.candidates);
        for i in 0..local {
            let anchor = &anchors[i % anchors.len()];
            pool.push(self.space.neighbour(anchor, 0.1, &mut self.rng));
        }
        for _ in local..self.candidates {
            pool.push(self.space.sample(&mut self.rng));
        }

        let scored: Vec<(f64, Configuration)> = pool
            .into_par_iter()
            .map(|config| {
                let point = self.space.to_unit_vector(&config);
                (self.acquisition(&point), config)
            })
            .collect();

        scored
            .into_iter()
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, config)| config)
            .unwrap_or_else(|| self.space.sample(&mut self.rng))
    }

    /// Lower confidence bound of the surrogate at `point`.
    fn acquisition(&self, point: &[f64]) -> f64 {
        let n = self.observations.len() as f64;
        let global_mean = self.observations.iter().map(|o| o.loss).sum::<f64>() / n;
        let spread = (self
            .observations
            .iter()
            .map(|o| (o.loss - global_mean).powi(2))
            .sum::<f64>()
            / n)
            .sqrt()
            .max(1e-3);

        let dims = point.len().max(1) as f64;
        let two_h2 = 2.0 * self.bandwidth * self.bandwidth;
        let (weight_sum, weighted_loss) =
            self.observations
                .iter()
                .fold((0.0, 0.0), |(ws, wl), o| {
                    let dist2 = o
                        .point
                        .iter()
                        .zip(point)
                        .map(|(a, b)| (a - b).powi(2))
                        .sum::<f64>()
                        / dims;
                    let w = (-dist2 / two_h2).exp();
                    (ws + w, wl + w * o.loss)
                });

        let mean = if weight_sum > 1e-12 {
            (weighted_loss + global_mean * 1e-3) / (weight_sum + 1e-3)
        } else {
            global_mean
        };
        let uncertainty = spread / (1.0 + weight_sum).sqrt();
        mean - self.kappa * uncertainty
    }
}

impl SearchStrategy for BayesianSearch {
    fn suggest(&mut self, count: usize) -> Vec<Suggestion> {
        (0..count)
            .map(|_| {
                let warm = self.observations.len() >= self.initial_design.max(1);
                let configuration = if !warm || self.rng.gen::<f64>() < self.exploration_weight {
                    self.explore()
                } else {
                    self.exploit()
                };
                let ticket = self.next_ticket;
                self.next_ticket += 1;
                Suggestion {
                    ticket,
                    configuration,
                    budget: self.budget,
                }
            })
            .collect()
    }

    fn report(&mut self, suggestion: &Suggestion, loss: f64) {
        self.observe(&suggestion.configuration, loss);
    }

    fn name(&self) -> &str {
        "bayesian"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::ParameterDef;
    use sh_types::ParameterValue;

    fn sample_space() -> SearchSpace {
        SearchSpace::new()
            .add_int("f_depth", 5, 15, 10)
            .add_int("m_min_len", 0, 121, 8)
            .add_float("f_health", -1.5, 1.5, 0.045)
    }

    fn x_of(config: &Configuration) -> f64 {
        config.get("x").and_then(ParameterValue::as_f64).unwrap()
    }

    #[test]
    fn random_search_respects_bounds() {
        let space = sample_space();
        let mut rs = RandomSearch::new(space.clone(), 42);
        let suggestions = rs.suggest(50);
        assert_eq!(suggestions.len(), 50);

        for s in &suggestions {
            assert_eq!(space.check(&s.configuration), Ok(()));
            assert_eq!(s.budget, 1.0);
        }
    }

    #[test]
    fn tickets_are_unique() {
        let mut rs = RandomSearch::new(sample_space(), 1);
        let mut tickets: Vec<u64> = rs.suggest(5).iter().map(|s| s.ticket).collect();
        tickets.extend(rs.suggest(5).iter().map(|s| s.ticket));
        tickets.dedup();
        assert_eq!(tickets.len(), 10);
    }

    #[test]
    fn same_seed_same_suggestions() {
        let a = RandomSearch::new(sample_space(), 42).suggest(5);
        let b = RandomSearch::new(sample_space(), 42).suggest(5);
        assert_eq!(a, b);
    }

    #[test]
    fn bayesian_search_starts_with_exploration() {
        let mut bs = BayesianSearch::new(sample_space(), 42);
        let suggestions = bs.suggest(10);
        assert_eq!(suggestions.len(), 10);
        assert_eq!(bs.observation_count(), 0);
    }

    #[test]
    fn bayesian_search_exploits_after_reports() {
        let space = SearchSpace::new().add_float("x", 0.0, 1.0, 0.5);
        let mut bs = BayesianSearch::new(space.clone(), 42)
            .with_exploration_weight(0.0)
            .with_initial_design(4);

        // Loss is the distance to 0.8.
        for x in [0.0, 0.25, 0.5, 0.8, 1.0] {
            let s = Suggestion {
                ticket: 0,
                configuration: Configuration::new().with("x", x),
                budget: 1.0,
            };
            bs.report(&s, (x - 0.8f64).abs());
        }

        let suggestions = bs.suggest(20);
        let near = suggestions
            .iter()
            .filter(|s| (x_of(&s.configuration) - 0.8).abs() < 0.2)
            .count();
        assert!(near >= 15, "only {near} of 20 suggestions near the optimum");
        for s in &suggestions {
            assert_eq!(space.check(&s.configuration), Ok(()));
        }
    }

    #[test]
    fn prior_observations_outside_space_are_skipped() {
        let space = SearchSpace::new()
            .add_choice("kind", vec!["a".into()], "a")
            .add(ParameterDef::float("x", 0.0, 1.0, 0.5).active_when("kind", ["a"]));
        let prior = vec![
            (space.default_configuration(), 0.4),
            (Configuration::new().with("kind", "b"), 0.1),
            (space.default_configuration(), f64::NAN),
        ];
        let bs = BayesianSearch::new(space, 0).with_observations(prior);
        assert_eq!(bs.observation_count(), 1);
    }
}
