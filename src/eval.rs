//! Aggregation of per-rule verdicts into one classification per station.

use std::collections::BTreeMap;
use std::str::FromStr;

use thiserror::Error;

use crate::config::RuleGroup;
use crate::models::RuleVerdict;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("evaluator '{0}' is not implemented")]
    Unsupported(String),
    #[error("unknown evaluator '{0}'")]
    Unknown(String),
}

/// Evaluator variants recognized in configuration. Bayes and Weighted are
/// accepted by the parser but rejected on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluatorKind {
    Conservative,
    Group,
    Bayes,
    Weighted,
}

impl FromStr for EvaluatorKind {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "conservative" => Ok(EvaluatorKind::Conservative),
            "group" => Ok(EvaluatorKind::Group),
            "bayes" => Ok(EvaluatorKind::Bayes),
            "weighted" => Ok(EvaluatorKind::Weighted),
            other => Err(EvalError::Unknown(other.to_string())),
        }
    }
}

/// Final classification of one station plus how it was reached.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub verdict: RuleVerdict,
    pub explanation: String,
}

pub enum Evaluator {
    Conservative,
    Group { groups: Vec<RuleGroup> },
}

impl Evaluator {
    /// Build the evaluator selected by configuration.
    pub fn new(kind: &str, groups: &[RuleGroup]) -> Result<Self, EvalError> {
        match kind.parse::<EvaluatorKind>()? {
            EvaluatorKind::Conservative => Ok(Evaluator::Conservative),
            EvaluatorKind::Group => Ok(Evaluator::Group {
                groups: groups.to_vec(),
            }),
            EvaluatorKind::Bayes => Err(EvalError::Unsupported("bayes".to_string())),
            EvaluatorKind::Weighted => Err(EvalError::Unsupported("weighted".to_string())),
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Evaluator::Conservative => "Conservative",
            Evaluator::Group { .. } => "Group",
        }
    }

    pub fn evaluate(&self, results: &BTreeMap<String, RuleVerdict>) -> Evaluation {
        match self {
            Evaluator::Conservative => conservative(results),
            Evaluator::Group { groups } => grouped(results, groups),
        }
    }
}

/// Worst-of reduction: Critical > Warning > Ok, Ignore excluded. Decided by
/// the first Critical in rule order, else the last Warning.
fn conservative(results: &BTreeMap<String, RuleVerdict>) -> Evaluation {
    let mut verdict = RuleVerdict::Ignore;
    let mut decided_by: Option<&str> = None;

    for (rule, &result) in results {
        match result {
            RuleVerdict::Critical => {
                return Evaluation {
                    verdict: RuleVerdict::Critical,
                    explanation: format!("decided by {rule}"),
                };
            }
            RuleVerdict::Warning => {
                verdict = RuleVerdict::Warning;
                decided_by = Some(rule);
            }
            RuleVerdict::Ok => {
                if verdict == RuleVerdict::Ignore {
                    verdict = RuleVerdict::Ok;
                }
            }
            RuleVerdict::Ignore => {}
        }
    }

    let explanation = match (verdict, decided_by) {
        (RuleVerdict::Warning, Some(rule)) => format!("decided by {rule}"),
        (RuleVerdict::Ok, _) => "all rules passed".to_string(),
        _ => "no rule produced a verdict".to_string(),
    };
    Evaluation {
        verdict,
        explanation,
    }
}

/// Majority vote among {Ok, Warning, Critical} with severity tie-break: on
/// a tie or non-strict majority the more severe verdict wins. Empty input
/// is Ignore.
fn majority(verdicts: &[RuleVerdict]) -> RuleVerdict {
    let mut counts = [0usize; 3];
    for verdict in verdicts {
        if let Some(severity) = verdict.severity() {
            counts[severity as usize] += 1;
        }
    }

    let total: usize = counts.iter().sum();
    if total == 0 {
        return RuleVerdict::Ignore;
    }

    let best = *counts.iter().max().unwrap();
    // Severity-descending scan makes the tie-break favor the worse verdict.
    for (verdict, count) in [
        (RuleVerdict::Critical, counts[2]),
        (RuleVerdict::Warning, counts[1]),
        (RuleVerdict::Ok, counts[0]),
    ] {
        if count == best {
            return verdict;
        }
    }
    unreachable!()
}

fn grouped(results: &BTreeMap<String, RuleVerdict>, groups: &[RuleGroup]) -> Evaluation {
    let mut group_verdicts = Vec::with_capacity(groups.len());
    for group in groups {
        let members: Vec<RuleVerdict> = group
            .rules
            .iter()
            .filter_map(|rule| results.get(rule).copied())
            .collect();
        group_verdicts.push(majority(&members));
    }

    let decided: Vec<RuleVerdict> = group_verdicts
        .iter()
        .copied()
        .filter(|v| *v != RuleVerdict::Ignore)
        .collect();

    if decided.is_empty() {
        return Evaluation {
            verdict: RuleVerdict::Critical,
            explanation: "no evaluation possible".to_string(),
        };
    }

    let critical = decided
        .iter()
        .filter(|v| **v == RuleVerdict::Critical)
        .count();
    let warning = decided
        .iter()
        .filter(|v| **v == RuleVerdict::Warning)
        .count();
    let ok = decided.iter().filter(|v| **v == RuleVerdict::Ok).count();

    Evaluation {
        verdict: majority(&decided),
        explanation: format!("groups: {critical} critical, {warning} warning, {ok} ok"),
    }
}
