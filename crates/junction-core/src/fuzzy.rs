//! Mamdani fuzzy inference over named linguistic variables.
//!
//! Variables are partitioned into terms with triangular membership. Rules are
//! plain data: an antecedent tree (`Is`, `All`, `Any`) and the name of an
//! output term. Inference clips each consequent at its rule strength,
//! aggregates by max and defuzzifies by centroid over a sampled universe.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FuzzyError {
    #[error("missing input for variable '{0}'")]
    MissingInput(String),

    #[error("input for '{0}' is not a finite number")]
    NonFiniteInput(String),

    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("variable '{variable}' has no term '{term}'")]
    UnknownTerm { variable: String, term: String },

    #[error("no rule fired")]
    NoRuleFired,

    #[error("output universe is empty")]
    EmptyUniverse,
}

/// Triangular membership function with feet `a`, `c` and peak `b`.
///
/// `a == b` or `b == c` gives a shoulder that is fully true at the edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Triangle {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Triangle {
    pub const fn new(a: f64, b: f64, c: f64) -> Self {
        Self { a, b, c }
    }

    pub fn membership(&self, x: f64) -> f64 {
        if x < self.a || x > self.c {
            0.0
        } else if x == self.b {
            1.0
        } else if x < self.b {
            (x - self.a) / (self.b - self.a)
        } else {
            (self.c - x) / (self.c - self.b)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinguisticVariable {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub terms: BTreeMap<String, Triangle>,
}

impl LinguisticVariable {
    pub fn new(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            terms: BTreeMap::new(),
        }
    }

    pub fn with_term(mut self, term: impl Into<String>, shape: Triangle) -> Self {
        self.terms.insert(term.into(), shape);
        self
    }

    /// Inputs outside the universe are clipped to its bounds.
    pub fn clamp(&self, x: f64) -> f64 {
        x.clamp(self.min, self.max)
    }

    pub fn membership(&self, term: &str, x: f64) -> Result<f64, FuzzyError> {
        self.terms
            .get(term)
            .map(|t| t.membership(self.clamp(x)))
            .ok_or_else(|| FuzzyError::UnknownTerm {
                variable: self.name.clone(),
                term: term.to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Antecedent {
    Is { variable: String, term: String },
    /// Minimum of the children
    All(Vec<Antecedent>),
    /// Maximum of the children
    Any(Vec<Antecedent>),
}

impl Antecedent {
    pub fn is(variable: &str, term: &str) -> Self {
        Antecedent::Is {
            variable: variable.to_string(),
            term: term.to_string(),
        }
    }

    pub fn all(parts: impl IntoIterator<Item = Antecedent>) -> Self {
        Antecedent::All(parts.into_iter().collect())
    }

    pub fn any(parts: impl IntoIterator<Item = Antecedent>) -> Self {
        Antecedent::Any(parts.into_iter().collect())
    }

    fn evaluate(
        &self,
        variables: &BTreeMap<String, LinguisticVariable>,
        inputs: &HashMap<&str, f64>,
    ) -> Result<f64, FuzzyError> {
        match self {
            Antecedent::Is { variable, term } => {
                let var = variables
                    .get(variable)
                    .ok_or_else(|| FuzzyError::UnknownVariable(variable.clone()))?;
                let x = *inputs
                    .get(variable.as_str())
                    .ok_or_else(|| FuzzyError::MissingInput(variable.clone()))?;
                if !x.is_finite() {
                    return Err(FuzzyError::NonFiniteInput(variable.clone()));
                }
                var.membership(term, x)
            }
            Antecedent::All(parts) => parts
                .iter()
                .try_fold(1.0f64, |acc, p| Ok(acc.min(p.evaluate(variables, inputs)?))),
            Antecedent::Any(parts) => parts
                .iter()
                .try_fold(0.0f64, |acc, p| Ok(acc.max(p.evaluate(variables, inputs)?))),
        }
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a str, &'a str)) {
        match self {
            Antecedent::Is { variable, term } => f(variable, term),
            Antecedent::All(parts) | Antecedent::Any(parts) => {
                for p in parts {
                    p.visit(f);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub antecedent: Antecedent,
    /// Term of the output variable
    pub consequent: String,
}

impl Rule {
    pub fn new(antecedent: Antecedent, consequent: &str) -> Self {
        Self {
            antecedent,
            consequent: consequent.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzyEngine {
    inputs: BTreeMap<String, LinguisticVariable>,
    output: LinguisticVariable,
    rules: Vec<Rule>,
    /// Number of samples across the output universe
    resolution: usize,
}

impl FuzzyEngine {
    pub fn new(output: LinguisticVariable) -> Self {
        Self {
            inputs: BTreeMap::new(),
            output,
            rules: Vec::new(),
            resolution: 101,
        }
    }

    pub fn with_input(mut self, variable: LinguisticVariable) -> Self {
        self.inputs.insert(variable.name.clone(), variable);
        self
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn input(&self, name: &str) -> Option<&LinguisticVariable> {
        self.inputs.get(name)
    }

    pub fn output(&self) -> &LinguisticVariable {
        &self.output
    }

    /// Check that every rule references known variables and terms.
    pub fn validate(&self) -> Result<(), FuzzyError> {
        let mut result = Ok(());
        for rule in &self.rules {
            rule.antecedent.visit(&mut |variable, term| {
                if result.is_err() {
                    return;
                }
                result = match self.inputs.get(variable) {
                    None => Err(FuzzyError::UnknownVariable(variable.to_string())),
                    Some(var) if !var.terms.contains_key(term) => Err(FuzzyError::UnknownTerm {
                        variable: variable.to_string(),
                        term: term.to_string(),
                    }),
                    Some(_) => Ok(()),
                };
            });
            result.clone()?;
            if !self.output.terms.contains_key(&rule.consequent) {
                return Err(FuzzyError::UnknownTerm {
                    variable: self.output.name.clone(),
                    term: rule.consequent.clone(),
                });
            }
        }
        result
    }

    /// Firing strength of a single rule.
    pub fn rule_strength(&self, rule: &Rule, inputs: &HashMap<&str, f64>) -> Result<f64, FuzzyError> {
        rule.antecedent.evaluate(&self.inputs, inputs)
    }

    /// Crisp output for the given crisp inputs.
    pub fn infer(&self, inputs: &HashMap<&str, f64>) -> Result<f64, FuzzyError> {
        let mut fired: Vec<(Triangle, f64)> = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            let strength = self.rule_strength(rule, inputs)?;
            if strength <= 0.0 {
                continue;
            }
            let shape = self
                .output
                .terms
                .get(&rule.consequent)
                .copied()
                .ok_or_else(|| FuzzyError::UnknownTerm {
                    variable: self.output.name.clone(),
                    term: rule.consequent.clone(),
                })?;
            fired.push((shape, strength));
        }
        if fired.is_empty() {
            return Err(FuzzyError::NoRuleFired);
        }
        if self.resolution < 2 || self.output.max <= self.output.min {
            return Err(FuzzyError::EmptyUniverse);
        }

        let step = (self.output.max - self.output.min) / (self.resolution - 1) as f64;
        let mut weighted = 0.0;
        let mut total = 0.0;
        for i in 0..self.resolution {
            let x = self.output.min + step * i as f64;
            let mu = fired
                .iter()
                .map(|(shape, strength)| shape.membership(x).min(*strength))
                .fold(0.0f64, f64::max);
            weighted += x * mu;
            total += mu;
        }
        if total <= 0.0 {
            return Err(FuzzyError::NoRuleFired);
        }
        Ok(weighted / total)
    }
}
