//! Named integer inputs and the branch conditions evaluated over them.
//!
//! A scenario declares up to a handful of parameter names (`x`, `y`). The
//! process entry supplies zero or more integers positionally; binding maps
//! them onto the declared names. Missing trailing values default to zero.
//!
//! Conditions are the only way inputs influence execution: a `Branch` step
//! picks its arm by evaluating a [`Condition`], and an input-conditioned
//! intent label or invariant clause does the same.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Errors raised while binding positional values to parameter names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("scenario takes {expected} input(s) ({params}) but {found} were supplied")]
    TooManyValues {
        expected: usize,
        found: usize,
        params: String,
    },

    #[error("unknown parameter '{0}'")]
    UnknownParam(String),
}

/// Bound scenario inputs, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Inputs {
    values: Vec<(String, i64)>,
}

impl Inputs {
    /// Inputs for a scenario that declares no parameters.
    #[must_use]
    pub fn none() -> Self {
        Self { values: Vec::new() }
    }

    /// Build inputs from explicit name/value pairs.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        Self {
            values: pairs.into_iter().map(|(n, v)| (n.into(), v)).collect(),
        }
    }

    /// Bind positional `values` onto `params`.
    ///
    /// Values beyond the declared parameters are rejected. Parameters with no
    /// supplied value are bound to zero.
    pub fn bind(params: &[String], values: &[i64]) -> Result<Self, InputError> {
        if values.len() > params.len() {
            return Err(InputError::TooManyValues {
                expected: params.len(),
                found: values.len(),
                params: params.join(", "),
            });
        }

        let values = params
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), values.get(i).copied().unwrap_or(0)))
            .collect();
        Ok(Self { values })
    }

    /// Value of `name`, if bound.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<i64> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    /// Value of `name`, or an error if the parameter is not bound.
    pub fn require(&self, name: &str) -> Result<i64, InputError> {
        self.get(name)
            .ok_or_else(|| InputError::UnknownParam(name.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.values.iter().map(|(n, v)| (n.as_str(), *v))
    }
}

impl fmt::Display for Inputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.values.is_empty() {
            return write!(f, "(no inputs)");
        }
        let parts: Vec<String> = self
            .values
            .iter()
            .map(|(n, v)| format!("{}={}", n, v))
            .collect();
        write!(f, "{}", parts.join(" "))
    }
}

/// Predicate over bound inputs.
///
/// An unbound parameter reads as zero, matching how a missing positional
/// value is bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Always,
    /// `param > 0`
    Positive(String),
    /// `param < 0`
    Negative(String),
    /// `param <= 0`; zero routes here together with negatives.
    NotPositive(String),
    /// `param == 0`
    Zero(String),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn positive(param: impl Into<String>) -> Self {
        Self::Positive(param.into())
    }

    pub fn negative(param: impl Into<String>) -> Self {
        Self::Negative(param.into())
    }

    pub fn not_positive(param: impl Into<String>) -> Self {
        Self::NotPositive(param.into())
    }

    pub fn zero(param: impl Into<String>) -> Self {
        Self::Zero(param.into())
    }

    #[must_use]
    pub fn and(self, other: Condition) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    #[must_use]
    pub fn or(self, other: Condition) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Evaluate against `inputs`.
    #[must_use]
    pub fn holds(&self, inputs: &Inputs) -> bool {
        let value = |p: &str| inputs.get(p).unwrap_or(0);
        match self {
            Self::Always => true,
            Self::Positive(p) => value(p) > 0,
            Self::Negative(p) => value(p) < 0,
            Self::NotPositive(p) => value(p) <= 0,
            Self::Zero(p) => value(p) == 0,
            Self::And(a, b) => a.holds(inputs) && b.holds(inputs),
            Self::Or(a, b) => a.holds(inputs) || b.holds(inputs),
            Self::Not(c) => !c.holds(inputs),
        }
    }

    /// Parameter names referenced anywhere in the condition.
    #[must_use]
    pub fn params(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_params(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect_params<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Always => {}
            Self::Positive(p) | Self::Negative(p) | Self::NotPositive(p) | Self::Zero(p) => {
                out.push(p.as_str());
            }
            Self::And(a, b) | Self::Or(a, b) => {
                a.collect_params(out);
                b.collect_params(out);
            }
            Self::Not(c) => c.collect_params(out),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "true"),
            Self::Positive(p) => write!(f, "{} > 0", p),
            Self::Negative(p) => write!(f, "{} < 0", p),
            Self::NotPositive(p) => write!(f, "{} <= 0", p),
            Self::Zero(p) => write!(f, "{} == 0", p),
            Self::And(a, b) => write!(f, "({} && {})", a, b),
            Self::Or(a, b) => write!(f, "({} || {})", a, b),
            Self::Not(c) => write!(f, "!{}", c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_bind_defaults_missing_values_to_zero() {
        let inputs = Inputs::bind(&params(&["x", "y"]), &[7]).unwrap();
        assert_eq!(inputs.get("x"), Some(7));
        assert_eq!(inputs.get("y"), Some(0));
    }

    #[test]
    fn test_bind_rejects_extra_values() {
        let err = Inputs::bind(&params(&["x"]), &[1, 2]).unwrap_err();
        assert!(matches!(
            err,
            InputError::TooManyValues {
                expected: 1,
                found: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_zero_routes_with_negatives() {
        let cond = Condition::not_positive("x");
        assert!(cond.holds(&Inputs::from_pairs([("x", 0)])));
        assert!(cond.holds(&Inputs::from_pairs([("x", -3)])));
        assert!(!cond.holds(&Inputs::from_pairs([("x", 1)])));

        // Negative is strict, so zero does not take a `< 0` arm.
        assert!(!Condition::negative("x").holds(&Inputs::from_pairs([("x", 0)])));
    }

    #[test]
    fn test_compound_condition() {
        let q1 = Condition::positive("x").and(Condition::positive("y"));
        assert!(q1.holds(&Inputs::from_pairs([("x", 1), ("y", 2)])));
        assert!(!q1.holds(&Inputs::from_pairs([("x", 1), ("y", 0)])));
        assert_eq!(q1.params(), vec!["x", "y"]);
        assert_eq!(q1.to_string(), "(x > 0 && y > 0)");
    }

    #[test]
    fn test_unbound_param_reads_as_zero() {
        assert!(Condition::zero("x").holds(&Inputs::none()));
        assert!(Inputs::none().require("x").is_err());
    }
}
