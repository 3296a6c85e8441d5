//! Conditional search space definitions.

use rand::Rng;
use serde::{Deserialize, Serialize};
use sh_types::{Configuration, ParameterValue, SpaceError};
use std::collections::HashSet;

/// Describes how a parameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Continuous uniform range [low, high].
    FloatRange { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    IntRange { low: i64, high: i64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
    /// Categorical choices.
    Choice { values: Vec<String> },
}

/// Activates a parameter only while a categorical parent takes one of `values`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub parent: String,
    pub values: Vec<String>,
}

impl Condition {
    fn is_met(&self, configuration: &Configuration) -> bool {
        configuration
            .get(&self.parent)
            .and_then(ParameterValue::as_str)
            .is_some_and(|value| self.values.iter().any(|v| v == value))
    }
}

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Parameter name as it appears in a configuration (e.g. "f_health").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
    pub default: ParameterValue,
    pub condition: Option<Condition>,
}

impl ParameterDef {
    pub fn float(name: impl Into<String>, low: f64, high: f64, default: f64) -> Self {
        Self {
            name: name.into(),
            kind: ParameterKind::FloatRange { low, high },
            default: ParameterValue::Float(default),
            condition: None,
        }
    }

    pub fn int(name: impl Into<String>, low: i64, high: i64, default: i64) -> Self {
        Self {
            name: name.into(),
            kind: ParameterKind::IntRange { low, high },
            default: ParameterValue::Int(default),
            condition: None,
        }
    }

    pub fn log_uniform(name: impl Into<String>, low: f64, high: f64, default: f64) -> Self {
        Self {
            name: name.into(),
            kind: ParameterKind::LogUniform { low, high },
            default: ParameterValue::Float(default),
            condition: None,
        }
    }

    pub fn choice(name: impl Into<String>, values: Vec<String>, default: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParameterKind::Choice { values },
            default: ParameterValue::Categorical(default.into()),
            condition: None,
        }
    }

    /// Make this parameter active only when `parent` takes one of `values`.
    pub fn active_when<I, S>(mut self, parent: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.condition = Some(Condition {
            parent: parent.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Check that `value` has the right type and lies within the domain.
    pub fn check_value(&self, value: &ParameterValue) -> Result<(), SpaceError> {
        let out_of_bounds = || SpaceError::ValueOutOfBounds {
            name: self.name.clone(),
            value: value.to_string(),
        };
        let mismatch = |expected: &str| SpaceError::TypeMismatch {
            name: self.name.clone(),
            expected: expected.to_string(),
            actual: value.kind().to_string(),
        };

        match (&self.kind, value) {
            (ParameterKind::FloatRange { low, high }, ParameterValue::Float(_) | ParameterValue::Int(_))
            | (ParameterKind::LogUniform { low, high }, ParameterValue::Float(_) | ParameterValue::Int(_)) => {
                let v = value.as_f64().unwrap_or(f64::NAN);
                if v >= *low && v <= *high {
                    Ok(())
                } else {
                    Err(out_of_bounds())
                }
            }
            (ParameterKind::IntRange { low, high }, ParameterValue::Int(v)) => {
                if v >= low && v <= high {
                    Ok(())
                } else {
                    Err(out_of_bounds())
                }
            }
            (ParameterKind::Choice { values }, ParameterValue::Categorical(v)) => {
                if values.contains(v) {
                    Ok(())
                } else {
                    Err(out_of_bounds())
                }
            }
            (ParameterKind::FloatRange { .. } | ParameterKind::LogUniform { .. }, _) => {
                Err(mismatch("float"))
            }
            (ParameterKind::IntRange { .. }, _) => Err(mismatch("int")),
            (ParameterKind::Choice { .. }, _) => Err(mismatch("categorical")),
        }
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ParameterValue {
        match &self.kind {
            ParameterKind::FloatRange { low, high } => {
                ParameterValue::Float(rng.gen_range(*low..=*high))
            }
            ParameterKind::IntRange { low, high } => ParameterValue::Int(rng.gen_range(*low..=*high)),
            ParameterKind::LogUniform { low, high } => {
                let log_val: f64 = rng.gen_range(low.ln()..=high.ln());
                ParameterValue::Float(log_val.exp().clamp(*low, *high))
            }
            ParameterKind::Choice { values } => {
                let idx = rng.gen_range(0..values.len());
                ParameterValue::Categorical(values[idx].clone())
            }
        }
    }

    /// Map a value onto [0, 1]. Values of the wrong type encode the default.
    fn encode(&self, value: &ParameterValue) -> f64 {
        let value = if self.check_value(value).is_ok() {
            value
        } else {
            &self.default
        };
        let unit = match &self.kind {
            ParameterKind::FloatRange { low, high } => {
                (value.as_f64().unwrap_or(*low) - low) / (high - low)
            }
            ParameterKind::LogUniform { low, high } => {
                (value.as_f64().unwrap_or(*low).ln() - low.ln()) / (high.ln() - low.ln())
            }
            ParameterKind::IntRange { low, high } => {
                let v = value.as_f64().unwrap_or(*low as f64);
                (v - *low as f64 + 0.5) / ((high - low + 1) as f64)
            }
            ParameterKind::Choice { values } => {
                let idx = value
                    .as_str()
                    .and_then(|v| values.iter().position(|c| c == v))
                    .unwrap_or(0);
                (idx as f64 + 0.5) / values.len() as f64
            }
        };
        unit.clamp(0.0, 1.0)
    }

    fn decode(&self, unit: f64) -> ParameterValue {
        let u = if unit.is_finite() { unit.clamp(0.0, 1.0) } else { 0.5 };
        match &self.kind {
            ParameterKind::FloatRange { low, high } => {
                ParameterValue::Float((low + u * (high - low)).clamp(*low, *high))
            }
            ParameterKind::LogUniform { low, high } => {
                let log_val = low.ln() + u * (high.ln() - low.ln());
                ParameterValue::Float(log_val.exp().clamp(*low, *high))
            }
            ParameterKind::IntRange { low, high } => {
                let span = high - low;
                let idx = ((u * (span + 1) as f64).floor() as i64).min(span);
                ParameterValue::Int(low + idx)
            }
            ParameterKind::Choice { values } => {
                let idx = ((u * values.len() as f64).floor() as usize).min(values.len() - 1);
                ParameterValue::Categorical(values[idx].clone())
            }
        }
    }

    fn validate(&self) -> Result<(), SpaceError> {
        let invalid = |message: &str| SpaceError::InvalidBounds {
            name: self.name.clone(),
            message: message.to_string(),
        };
        match &self.kind {
            ParameterKind::FloatRange { low, high } => {
                if !(low.is_finite() && high.is_finite() && low < high) {
                    return Err(invalid("low must be below high"));
                }
            }
            ParameterKind::LogUniform { low, high } => {
                if !(low.is_finite() && high.is_finite() && low < high) {
                    return Err(invalid("low must be below high"));
                }
                if *low <= 0.0 {
                    return Err(invalid("log-scaled bounds must be positive"));
                }
            }
            ParameterKind::IntRange { low, high } => {
                if low > high {
                    return Err(invalid("low must not exceed high"));
                }
            }
            ParameterKind::Choice { values } => {
                if values.is_empty() {
                    return Err(invalid("no choices"));
                }
            }
        }
        self.check_value(&self.default)
            .map_err(|_| SpaceError::DefaultOutOfBounds {
                name: self.name.clone(),
                value: self.default.to_string(),
            })
    }
}

/// The full search space: an ordered list of parameter definitions.
///
/// Parents come before the parameters they condition, so walking the list in
/// order always knows whether a parameter is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add(mut self, parameter: ParameterDef) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn add_float(self, name: impl Into<String>, low: f64, high: f64, default: f64) -> Self {
        self.add(ParameterDef::float(name, low, high, default))
    }

    pub fn add_int(self, name: impl Into<String>, low: i64, high: i64, default: i64) -> Self {
        self.add(ParameterDef::int(name, low, high, default))
    }

    pub fn add_log_uniform(self, name: impl Into<String>, low: f64, high: f64, default: f64) -> Self {
        self.add(ParameterDef::log_uniform(name, low, high, default))
    }

    pub fn add_choice(self, name: impl Into<String>, values: Vec<String>, default: impl Into<String>) -> Self {
        self.add(ParameterDef::choice(name, values, default))
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ParameterDef> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name.as_str())
    }

    /// Check bounds, defaults and conditions of every parameter.
    pub fn validate(&self) -> Result<(), SpaceError> {
        let mut seen: HashSet<&str> = HashSet::new();
        for param in &self.parameters {
            if !seen.insert(param.name.as_str()) {
                return Err(SpaceError::DuplicateParameter {
                    name: param.name.clone(),
                });
            }
            param.validate()?;

            if let Some(condition) = &param.condition {
                let invalid = |message: String| SpaceError::InvalidCondition {
                    name: param.name.clone(),
                    message,
                };
                let parent = self
                    .parameters
                    .iter()
                    .take_while(|p| p.name != param.name)
                    .find(|p| p.name == condition.parent)
                    .ok_or_else(|| {
                        invalid(format!("parent {} must be declared first", condition.parent))
                    })?;
                let ParameterKind::Choice { values } = &parent.kind else {
                    return Err(invalid(format!("parent {} is not categorical", parent.name)));
                };
                if let Some(unknown) = condition.values.iter().find(|v| !values.contains(v)) {
                    return Err(invalid(format!(
                        "{unknown} is not a value of {}",
                        parent.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Whether `parameter` is active given the values already in `configuration`.
    pub fn is_active(&self, parameter: &ParameterDef, configuration: &Configuration) -> bool {
        parameter
            .condition
            .as_ref()
            .map_or(true, |c| c.is_met(configuration))
    }

    /// Defaults of every active parameter.
    pub fn default_configuration(&self) -> Configuration {
        let mut config = Configuration::new();
        for param in &self.parameters {
            if self.is_active(param, &config) {
                config.insert(param.name.clone(), param.default.clone());
            }
        }
        config
    }

    /// Draw a configuration; inactive parameters are left out.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Configuration {
        let mut config = Configuration::new();
        for param in &self.parameters {
            if self.is_active(param, &config) {
                config.insert(param.name.clone(), param.sample(rng));
            }
        }
        config
    }

    /// Verify that `configuration` holds exactly the active parameters, in bounds.
    pub fn check(&self, configuration: &Configuration) -> Result<(), SpaceError> {
        for param in &self.parameters {
            let value = configuration.get(&param.name).filter(|v| !v.is_null());
            match (self.is_active(param, configuration), value) {
                (true, Some(value)) => param.check_value(value)?,
                (true, None) => {
                    return Err(SpaceError::MissingParameter {
                        name: param.name.clone(),
                    })
                }
                (false, Some(_)) => {
                    return Err(SpaceError::InactiveParameter {
                        name: param.name.clone(),
                    })
                }
                (false, None) => {}
            }
        }
        for (name, value) in configuration {
            if !value.is_null() && self.get(name).is_none() {
                return Err(SpaceError::UnknownParameter { name: name.clone() });
            }
        }
        Ok(())
    }

    /// Encode onto the unit hypercube, one dimension per parameter.
    ///
    /// Inactive or missing parameters encode their default.
    pub fn to_unit_vector(&self, configuration: &Configuration) -> Vec<f64> {
        self.parameters
            .iter()
            .map(|param| {
                let value = configuration
                    .get(&param.name)
                    .filter(|v| !v.is_null())
                    .unwrap_or(&param.default);
                param.encode(value)
            })
            .collect()
    }

    /// Decode a point of the unit hypercube into a configuration.
    ///
    /// Coordinates are clamped, so any vector decodes to a configuration that
    /// passes [`SearchSpace::check`].
    pub fn from_unit_vector(&self, vector: &[f64]) -> Configuration {
        let mut config = Configuration::new();
        for (idx, param) in self.parameters.iter().enumerate() {
            if self.is_active(param, &config) {
                let unit = vector
                    .get(idx)
                    .copied()
                    .unwrap_or_else(|| param.encode(&param.default));
                config.insert(param.name.clone(), param.decode(unit));
            }
        }
        config
    }

    /// Perturb every coordinate of `configuration` by up to `scale` in unit space.
    pub fn neighbour<R: Rng + ?Sized>(
        &self,
        configuration: &Configuration,
        scale: f64,
        rng: &mut R,
    ) -> Configuration {
        let scale = scale.abs().max(f64::EPSILON);
        let vector: Vec<f64> = self
            .to_unit_vector(configuration)
            .into_iter()
            .map(|u| (u + rng.gen_range(-scale..scale)).clamp(0.0, 1.0))
            .collect();
        self.from_unit_vector(&vector)
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}
