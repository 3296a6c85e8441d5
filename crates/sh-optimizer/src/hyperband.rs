//! Differential evolution driven by Hyperband-style successive halving.
//!
//! Budgets form a geometric ladder from `min_budget` to `max_budget` with
//! ratio `eta`. Each bracket starts a rung of fresh configurations at some
//! budget and promotes the best `1/eta` of every finished rung to the next
//! budget. Fresh configurations come from a rand/1/bin mutation of the
//! population already evaluated at that budget. Brackets run asynchronously:
//! when every open bracket is waiting for results a new one is opened, so
//! idle workers always get a job.

use rand::seq::index;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sh_types::{validation_error, HpoResult};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::search::{rank_loss, SearchStrategy, Suggestion};
use crate::space::SearchSpace;

/// Population members needed before mutation replaces random sampling.
const MIN_PARENTS: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperbandSettings {
    pub min_budget: f64,
    pub max_budget: f64,
    /// Reduction factor between rungs.
    pub eta: f64,
    /// Differential weight F.
    pub mutation_factor: f64,
    /// Binomial crossover probability CR.
    pub crossover_rate: f64,
    /// Members kept per budget level.
    pub population_size: usize,
}

impl Default for HyperbandSettings {
    fn default() -> Self {
        Self {
            min_budget: 1.0,
            max_budget: 2.0,
            eta: 2.0,
            mutation_factor: 0.5,
            crossover_rate: 0.5,
            population_size: 20,
        }
    }
}

impl HyperbandSettings {
    pub fn with_budgets(mut self, min_budget: f64, max_budget: f64) -> Self {
        self.min_budget = min_budget;
        self.max_budget = max_budget;
        self
    }

    pub fn with_eta(mut self, eta: f64) -> Self {
        self.eta = eta;
        self
    }

    pub fn validate(&self) -> HpoResult<()> {
        if !(self.min_budget > 0.0 && self.min_budget <= self.max_budget) {
            return Err(validation_error!(
                "budgets must satisfy 0 < min ({}) <= max ({})",
                self.min_budget,
                self.max_budget
            ));
        }
        if !(self.eta > 1.0) {
            return Err(validation_error!("eta must exceed 1, got {}", self.eta));
        }
        if !(0.0..=2.0).contains(&self.mutation_factor) {
            return Err(validation_error!(
                "mutation factor must lie in [0, 2], got {}",
                self.mutation_factor
            ));
        }
        if !(0.0..=1.0).contains(&self.crossover_rate) {
            return Err(validation_error!(
                "crossover rate must lie in [0, 1], got {}",
                self.crossover_rate
            ));
        }
        if self.population_size < MIN_PARENTS {
            return Err(validation_error!(
                "population size must be at least {MIN_PARENTS}"
            ));
        }
        Ok(())
    }

    /// Index of the most aggressive bracket (number of halvings).
    fn max_halvings(&self) -> usize {
        ((self.max_budget / self.min_budget).ln() / self.eta.ln() + 1e-9).floor() as usize
    }
}

#[derive(Debug, Clone)]
struct Member {
    point: Vec<f64>,
    loss: f64,
}

#[derive(Debug, Clone)]
struct Rung {
    level: usize,
    size: usize,
    issued: usize,
    queue: VecDeque<Vec<f64>>,
    results: Vec<Member>,
}

impl Rung {
    fn is_complete(&self) -> bool {
        self.results.len() >= self.size
    }
}

#[derive(Debug, Clone)]
struct Bracket {
    id: u64,
    rungs: Vec<Rung>,
}

impl Bracket {
    /// The first rung still waiting for results.
    fn current(&self) -> Option<usize> {
        self.rungs.iter().position(|r| !r.is_complete())
    }
}

/// Evolutionary successive-halving search.
#[derive(Debug, Clone)]
pub struct HyperbandSearch {
    space: SearchSpace,
    settings: HyperbandSettings,
    rng: ChaCha8Rng,
    /// Budget of each level, ascending.
    budgets: Vec<f64>,
    populations: Vec<Vec<Member>>,
    brackets: Vec<Bracket>,
    tickets: HashMap<u64, (u64, usize)>,
    next_halvings: usize,
    next_bracket_id: u64,
    next_ticket: u64,
}

impl HyperbandSearch {
    pub fn new(space: SearchSpace, settings: HyperbandSettings, seed: u64) -> HpoResult<Self> {
        settings.validate()?;
        let s_max = settings.max_halvings();
        let budgets: Vec<f64> = (0..=s_max)
            .map(|level| settings.max_budget * settings.eta.powi(level as i32 - s_max as i32))
            .collect();
        debug!(?budgets, "Hyperband budget ladder");

        Ok(Self {
            space,
            rng: ChaCha8Rng::seed_from_u64(seed),
            populations: vec![Vec::new(); budgets.len()],
            budgets,
            settings,
            brackets: Vec::new(),
            tickets: HashMap::new(),
            next_halvings: s_max,
            next_bracket_id: 0,
            next_ticket: 0,
        })
    }

    pub fn budgets(&self) -> &[f64] {
        &self.budgets
    }

    pub fn open_brackets(&self) -> usize {
        self.brackets.len()
    }

    fn open_bracket(&mut self) -> usize {
        let s_max = self.budgets.len() - 1;
        let s = self.next_halvings;
        self.next_halvings = if s == 0 { s_max } else { s - 1 };

        let eta = self.settings.eta;
        let n = (((s_max + 1) as f64 / (s + 1) as f64) * eta.powi(s as i32)).ceil();
        let rungs = (0..=s)
            .map(|i| Rung {
                level: s_max - s + i,
                size: ((n * eta.powi(-(i as i32))).floor() as usize).max(1),
                issued: 0,
                queue: VecDeque::new(),
                results: Vec::new(),
            })
            .collect();

        let id = self.next_bracket_id;
        self.next_bracket_id += 1;
        debug!(bracket = id, halvings = s, initial = n, "Opening bracket");
        self.brackets.push(Bracket { id, rungs });
        self.brackets.len() - 1
    }

    /// Fresh point for the first rung at `level`.
    fn propose(&mut self, level: usize) -> Vec<f64> {
        let population = &self.populations[level];
        if population.len() < MIN_PARENTS {
            let config = self.space.sample(&mut self.rng);
            return self.space.to_unit_vector(&config);
        }

        let picks = index::sample(&mut self.rng, population.len(), MIN_PARENTS);
        let target = &population[picks.index(0)].point;
        let a = &population[picks.index(1)].point;
        let b = &population[picks.index(2)].point;
        let c = &population[picks.index(3)].point;

        let dims = target.len();
        let forced = self.rng.gen_range(0..dims.max(1));
        (0..dims)
            .map(|j| {
                if j == forced || self.rng.gen::<f64>() < self.settings.crossover_rate {
                    let mutant = a[j] + self.settings.mutation_factor * (b[j] - c[j]);
                    if (0.0..=1.0).contains(&mutant) {
                        mutant
                    } else {
                        self.rng.gen::<f64>()
                    }
                } else {
                    target[j]
                }
            })
            .collect()
    }

    /// Take the next job from bracket `idx`, if its current rung has one.
    fn issue_from(&mut self, idx: usize) -> Option<(u64, usize, Vec<f64>)> {
        let rung_idx = self.brackets[idx].current()?;
        let (level, needs_fresh) = {
            let rung = &self.brackets[idx].rungs[rung_idx];
            if rung.issued >= rung.size {
                return None;
            }
            (rung.level, rung_idx == 0 && rung.queue.is_empty())
        };
        let point = if needs_fresh {
            self.propose(level)
        } else {
            self.brackets[idx].rungs[rung_idx].queue.pop_front()?
        };

        let bracket = &mut self.brackets[idx];
        bracket.rungs[rung_idx].issued += 1;
        Some((bracket.id, rung_idx, point))
    }

    fn next_suggestion(&mut self) -> Suggestion {
        let ready = (0..self.brackets.len()).find_map(|idx| self.issue_from(idx));
        let (bracket_id, rung_idx, point) = match ready {
            Some(job) => job,
            None => {
                let idx = self.open_bracket();
                match self.issue_from(idx) {
                    Some(job) => job,
                    None => {
                        let bracket = &self.brackets[idx];
                        let (id, level) = (bracket.id, bracket.rungs[0].level);
                        (id, 0, self.propose(level))
                    }
                }
            }
        };

        let level = self
            .brackets
            .iter()
            .find(|b| b.id == bracket_id)
            .map(|b| b.rungs[rung_idx].level)
            .unwrap_or(0);

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.tickets.insert(ticket, (bracket_id, rung_idx));

        Suggestion {
            ticket,
            configuration: self.space.from_unit_vector(&point),
            budget: self.budgets[level],
        }
    }

    fn record_population(&mut self, level: usize, member: Member) {
        let cap = self.settings.population_size;
        let population = &mut self.populations[level];
        population.push(member);
        if population.len() > cap {
            population.sort_by(|a, b| rank_loss(a.loss).total_cmp(&rank_loss(b.loss)));
            population.truncate(cap);
        }
    }
}

impl SearchStrategy for HyperbandSearch {
    fn suggest(&mut self, count: usize) -> Vec<Suggestion> {
        (0..count).map(|_| self.next_suggestion()).collect()
    }

    fn report(&mut self, suggestion: &Suggestion, loss: f64) {
        let Some((bracket_id, rung_idx)) = self.tickets.remove(&suggestion.ticket) else {
            debug!(ticket = suggestion.ticket, "Ignoring report for unknown ticket");
            return;
        };
        let member = Member {
            point: self.space.to_unit_vector(&suggestion.configuration),
            loss,
        };

        let Some(pos) = self.brackets.iter().position(|b| b.id == bracket_id) else {
            return;
        };
        let level = self.brackets[pos].rungs[rung_idx].level;
        self.record_population(level, member.clone());

        let bracket = &mut self.brackets[pos];
        bracket.rungs[rung_idx].results.push(member);

        if bracket.rungs[rung_idx].is_complete() {
            if let Some(next_size) = bracket.rungs.get(rung_idx + 1).map(|r| r.size) {
                let mut finished = bracket.rungs[rung_idx].results.clone();
                finished.sort_by(|a, b| rank_loss(a.loss).total_cmp(&rank_loss(b.loss)));
                let promoted: VecDeque<Vec<f64>> =
                    finished.into_iter().take(next_size).map(|m| m.point).collect();
                debug!(
                    bracket = bracket_id,
                    rung = rung_idx + 1,
                    promoted = promoted.len(),
                    "Promoting configurations"
                );
                bracket.rungs[rung_idx + 1].queue = promoted;
            } else {
                debug!(bracket = bracket_id, "Bracket finished");
                self.brackets.remove(pos);
            }
        }
    }

    fn name(&self) -> &str {
        "hyperband"
    }
}
