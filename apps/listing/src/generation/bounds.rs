//! Char bounds: a rule interval plus a tolerance-widened interval.
//!
//! Lengths are counted in Unicode scalar values, never bytes.

use std::fmt;

/// One side-optional closed interval over character counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub min: Option<usize>,
    pub max: Option<usize>,
}

impl Interval {
    pub fn contains(&self, n: usize) -> bool {
        self.min.map_or(true, |min| n >= min) && self.max.map_or(true, |max| n <= max)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.min, self.max) {
            (Some(min), Some(max)) => write!(f, "[{min},{max}]"),
            (Some(min), None) => write!(f, "[{min},+inf)"),
            (None, Some(max)) => write!(f, "(-inf,{max}]"),
            (None, None) => write!(f, "(-inf,+inf)"),
        }
    }
}

/// Classification of a measured length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthCheck {
    Pass,
    /// Outside the rule interval but inside the tolerance interval.
    Tolerated,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharBounds {
    rule: Interval,
    tolerance: Interval,
}

impl CharBounds {
    /// Builds bounds from raw rule values. Zero means "unset"; a min above
    /// max is swapped before use.
    pub fn resolve(min: usize, max: usize, tolerance: usize) -> Self {
        let (min, max) = if min > 0 && max > 0 && min > max {
            (max, min)
        } else {
            (min, max)
        };
        let min = (min > 0).then_some(min);
        let max = (max > 0).then_some(max);

        Self {
            rule: Interval { min, max },
            tolerance: Interval {
                min: min.map(|m| m.saturating_sub(tolerance)),
                max: max.map(|m| m.saturating_add(tolerance)),
            },
        }
    }

    pub fn in_rule(&self, n: usize) -> bool {
        self.rule.contains(n)
    }

    pub fn in_tolerance(&self, n: usize) -> bool {
        self.tolerance.contains(n)
    }

    pub fn rule(&self) -> Interval {
        self.rule
    }

    pub fn tolerance(&self) -> Interval {
        self.tolerance
    }

    pub fn classify(&self, n: usize) -> LengthCheck {
        if self.in_rule(n) {
            LengthCheck::Pass
        } else if self.in_tolerance(n) {
            LengthCheck::Tolerated
        } else {
            LengthCheck::Fail
        }
    }

    /// Checks `text` and appends a message to `issues` (hard failure) or
    /// `warnings` (tolerated). Returns true on hard failure.
    pub fn check(
        &self,
        label: &str,
        text: &str,
        issues: &mut Vec<String>,
        warnings: &mut Vec<String>,
    ) -> bool {
        let n = char_len(text);
        match self.classify(n) {
            LengthCheck::Pass => false,
            LengthCheck::Tolerated => {
                warnings.push(format!(
                    "{label} length {n} is outside rule {} but within tolerance {}, accepted",
                    self.rule, self.tolerance
                ));
                false
            }
            LengthCheck::Fail => {
                issues.push(format!(
                    "{label} length {n} is outside tolerance {} (rule {})",
                    self.tolerance, self.rule
                ));
                true
            }
        }
    }
}

pub fn char_len(s: &str) -> usize {
    s.chars().count()
}
