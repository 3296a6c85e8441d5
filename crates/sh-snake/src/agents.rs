//! Agent variants and the conditional search space built from them.

use serde::{Deserialize, Serialize};
use sh_optimizer::{ParameterDef, SearchSpace};
use sh_types::{validation_error, HpoError};
use std::fmt;
use std::str::FromStr;

/// Name of the categorical parameter selecting the variant.
pub const AGENT_KEY: &str = "agent";

/// Length of every variant's parameter prefix.
pub const PREFIX_LEN: usize = 2;

/// Heuristic families of the snork agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentVariant {
    Flood,
    Tree,
    Mobility,
}

impl AgentVariant {
    pub const ALL: [AgentVariant; 3] = [AgentVariant::Flood, AgentVariant::Tree, AgentVariant::Mobility];

    pub fn name(self) -> &'static str {
        match self {
            AgentVariant::Flood => "Flood",
            AgentVariant::Tree => "Tree",
            AgentVariant::Mobility => "Mobility",
        }
    }

    /// Prefix that keeps parameter names unique across variants.
    pub fn prefix(self) -> &'static str {
        match self {
            AgentVariant::Flood => "f_",
            AgentVariant::Tree => "t_",
            AgentVariant::Mobility => "m_",
        }
    }

    /// Unprefixed parameter definitions of this variant.
    fn parameters(self) -> Vec<ParameterDef> {
        match self {
            AgentVariant::Tree => vec![
                ParameterDef::float("mobility", 0.0, 1.0, 0.7),
                ParameterDef::float("mobility_decay", 0.0, 1.0, 0.0),
                ParameterDef::float("health", 0.0, 1.0, 0.012),
                ParameterDef::float("health_decay", 0.0, 1.0, 0.0),
                ParameterDef::float("len_advantage", 0.0, 1.0, 1.0),
                ParameterDef::float("len_advantage_decay", 0.0, 1.0, 0.0),
                ParameterDef::float("food_ownership", 0.0, 1.0, 0.65),
                ParameterDef::float("food_ownership_decay", 0.0, 1.0, 0.0),
                ParameterDef::float("centrality", 0.0, 1.0, 0.1),
                ParameterDef::float("centrality_decay", 0.0, 1.0, 0.0),
            ],
            AgentVariant::Mobility => vec![
                ParameterDef::int("health_threshold", 0, 100, 35),
                ParameterDef::int("min_len", 0, 121, 8),
                ParameterDef::float("first_move_cost", 0.0, 3.0, 1.0),
            ],
            AgentVariant::Flood => {
                let heuristic = |name: &str, bound: f64, default: f64| {
                    [
                        ParameterDef::float(name, -bound, bound, default),
                        ParameterDef::log_uniform(format!("{name}_decay"), 1e-10, 0.1, 1e-10),
                        ParameterDef::float(format!("{name}_offset"), -5.0, 5.0, 0.0),
                    ]
                };
                [
                    heuristic("board_control", 6.0, 0.9),
                    heuristic("health", 1.5, 0.045),
                    heuristic("len_advantage", 15.0, 6.4),
                    heuristic("food_distance", 2.0, 0.415),
                ]
                .into_iter()
                .flatten()
                .collect()
            }
        }
    }
}

impl fmt::Display for AgentVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AgentVariant {
    type Err = HpoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentVariant::ALL
            .into_iter()
            .find(|variant| variant.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| validation_error!("unknown agent variant {s:?}, expected Flood, Tree or Mobility"))
    }
}

/// Conditional space over the requested variants.
///
/// The `agent` selector lists each variant once in request order and
/// defaults to Flood when it is among them. Every variant parameter is
/// active only while the selector names its variant.
pub fn build_space(variants: &[AgentVariant]) -> SearchSpace {
    let mut selected: Vec<AgentVariant> = Vec::with_capacity(variants.len());
    for &variant in variants {
        if !selected.contains(&variant) {
            selected.push(variant);
        }
    }
    if selected.is_empty() {
        selected.push(AgentVariant::Flood);
    }

    let default = if selected.contains(&AgentVariant::Flood) {
        AgentVariant::Flood
    } else {
        selected[0]
    };
    let names = selected.iter().map(|v| v.name().to_string()).collect();
    let mut space = SearchSpace::new().add_choice(AGENT_KEY, names, default.name());

    for variant in [AgentVariant::Tree, AgentVariant::Mobility, AgentVariant::Flood] {
        if !selected.contains(&variant) {
            continue;
        }
        for mut parameter in variant.parameters() {
            parameter.name = format!("{}{}", variant.prefix(), parameter.name);
            space = space.add(parameter.active_when(AGENT_KEY, [variant.name()]));
        }
    }
    space
}
