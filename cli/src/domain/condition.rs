//! The closed predicate grammar for live-metrics targeting.
//!
//! Grammar: `idle`, `cpu<N`, `cpu>N`, `load<X`, `load>X`, `mem<N`, `mem>N`,
//! combined with the single `and` combinator. Anything else is a parse
//! error, never silently admitted.

use crate::domain::error::ConditionError;
use crate::domain::metrics::MetricsSample;

/// CPU ceiling for the `idle` predicate, percent.
const IDLE_CPU_PERCENT: f64 = 5.0;

/// 1-minute load ceiling for the `idle` predicate.
const IDLE_LOAD_1M: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Metric {
    Cpu,
    Load,
    Mem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cmp {
    Lt,
    Gt,
}

#[derive(Debug, Clone, PartialEq)]
enum Term {
    Idle,
    Threshold { metric: Metric, cmp: Cmp, value: f64 },
}

/// A parsed condition: a conjunction of terms.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    terms: Vec<Term>,
    source: String,
}

impl Condition {
    /// Parse an expression from the closed grammar.
    ///
    /// # Errors
    ///
    /// Returns [`ConditionError::Parse`] for anything outside the grammar.
    pub fn parse(expr: &str) -> Result<Self, ConditionError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(ConditionError::Parse(expr.to_string()));
        }
        let terms = trimmed
            .split(" and ")
            .map(|part| parse_term(part).ok_or_else(|| ConditionError::Parse(expr.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            terms,
            source: trimmed.to_string(),
        })
    }

    /// The original expression text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against a sample. A failed sample evaluates every predicate
    /// to false.
    #[must_use]
    pub fn eval(&self, sample: &MetricsSample) -> bool {
        if !sample.success {
            return false;
        }
        self.terms.iter().all(|term| eval_term(term, sample))
    }
}

fn parse_term(part: &str) -> Option<Term> {
    let part = part.trim();
    if part == "idle" {
        return Some(Term::Idle);
    }
    let (cmp, idx) = if let Some(idx) = part.find('<') {
        (Cmp::Lt, idx)
    } else if let Some(idx) = part.find('>') {
        (Cmp::Gt, idx)
    } else {
        return None;
    };
    let metric = match part[..idx].trim() {
        "cpu" => Metric::Cpu,
        "load" => Metric::Load,
        "mem" => Metric::Mem,
        _ => return None,
    };
    let value: f64 = part[idx + 1..].trim().parse().ok()?;
    Some(Term::Threshold { metric, cmp, value })
}

fn eval_term(term: &Term, sample: &MetricsSample) -> bool {
    match term {
        Term::Idle => {
            let cpu = sample.cpu_percent.unwrap_or(0.0);
            sample
                .load_avg
                .is_some_and(|(one, _, _)| cpu < IDLE_CPU_PERCENT && one < IDLE_LOAD_1M)
        }
        Term::Threshold { metric, cmp, value } => {
            let observed = match metric {
                // No process above 0% CPU means the sum is zero.
                Metric::Cpu => Some(sample.cpu_percent.unwrap_or(0.0)),
                Metric::Load => sample.load_avg.map(|(one, _, _)| one),
                Metric::Mem => sample.memory_percent,
            };
            observed.is_some_and(|observed| match cmp {
                Cmp::Lt => observed < *value,
                Cmp::Gt => observed > *value,
            })
        }
    }
}
