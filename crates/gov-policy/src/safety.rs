// safety.rs — Static safety checks on predicate text.
//
// Two kinds of check run against a candidate predicate:
//   - configurable regex patterns (unbounded wildcards, unbounded iteration,
//     unconditional allow), and
//   - clause-level logic checks that flag tautological or mutually
//     contradictory conditions.
// Any finding rejects the candidate at the SAFETY tier.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

/// A named regex that marks a predicate as unsafe when it matches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SafetyPattern {
    pub name: String,
    pub regex: String,
}

impl SafetyPattern {
    pub fn new(name: impl Into<String>, regex: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            regex: regex.into(),
        }
    }
}

/// The built-in pattern list used when configuration does not override it.
pub fn default_safety_patterns() -> Vec<SafetyPattern> {
    vec![
        SafetyPattern::new(
            "unbounded_wildcard",
            r#"(?i)(?:==|!=|\blike\b|\bmatches\b)\s*["'](?:\*|\.\*|%)["']"#,
        ),
        SafetyPattern::new(
            "unbounded_iteration",
            r"(?i)\b(?:while|loop|forever|repeat|forall|for\s+(?:all|each|every))\b",
        ),
        SafetyPattern::new("unconditional_allow", r"(?i)^\s*allow\s+always\s*$"),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SafetyFinding {
    /// Name of the pattern or logic check that fired.
    pub check: String,
    /// The part of the predicate that triggered it.
    pub excerpt: String,
}

pub struct SafetyAnalyzer {
    patterns: Vec<(String, Regex)>,
    condition: Regex,
    conjunction: Regex,
    clause: Regex,
}

impl SafetyAnalyzer {
    pub fn new(patterns: &[SafetyPattern]) -> Result<Self, PolicyError> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let regex = Regex::new(&pattern.regex).map_err(|e| PolicyError::InvalidPattern {
                name: pattern.name.clone(),
                pattern: pattern.regex.clone(),
                reason: e.to_string(),
            })?;
            compiled.push((pattern.name.clone(), regex));
        }

        Ok(Self {
            patterns: compiled,
            condition: builtin(r"(?i)\bif\b(.*)$")?,
            conjunction: builtin(r"(?i)\s+and\s+")?,
            clause: builtin(r"^\s*(\S+)\s*(==|!=|>=|<=|>|<)\s*(.+?)\s*$")?,
        })
    }

    /// Every finding for `predicate_logic`, pattern checks first.
    pub fn analyze(&self, predicate_logic: &str) -> Vec<SafetyFinding> {
        let mut findings: Vec<SafetyFinding> = self
            .patterns
            .iter()
            .filter_map(|(name, regex)| {
                regex.find(predicate_logic).map(|m| SafetyFinding {
                    check: name.clone(),
                    excerpt: m.as_str().trim().to_string(),
                })
            })
            .collect();

        let Some(condition) = self
            .condition
            .captures(predicate_logic)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
        else {
            return findings;
        };

        let clauses: Vec<Comparison> = self
            .conjunction
            .split(condition)
            .filter_map(|raw| self.comparison(raw))
            .collect();

        for clause in &clauses {
            if clause.is_tautology() {
                findings.push(SafetyFinding {
                    check: "tautological_clause".into(),
                    excerpt: clause.text.clone(),
                });
            } else if clause.is_self_contradiction() {
                findings.push(SafetyFinding {
                    check: "contradictory_clauses".into(),
                    excerpt: clause.text.clone(),
                });
            }
        }

        if let Some(excerpt) = contradiction(&clauses) {
            findings.push(SafetyFinding {
                check: "contradictory_clauses".into(),
                excerpt,
            });
        }

        findings
    }

    fn comparison(&self, raw: &str) -> Option<Comparison> {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("true") {
            return Some(Comparison {
                text: trimmed.to_string(),
                lhs: "true".into(),
                op: "==".into(),
                rhs: "true".into(),
            });
        }
        let caps = self.clause.captures(trimmed)?;
        Some(Comparison {
            text: trimmed.to_string(),
            lhs: caps[1].to_string(),
            op: caps[2].to_string(),
            rhs: unquote(&caps[3]).to_string(),
        })
    }
}

fn builtin(pattern: &str) -> Result<Regex, PolicyError> {
    Regex::new(pattern).map_err(|e| PolicyError::InvalidPattern {
        name: "builtin".into(),
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

fn unquote(s: &str) -> &str {
    s.trim_matches(|c| c == '"' || c == '\'')
}

struct Comparison {
    text: String,
    lhs: String,
    op: String,
    rhs: String,
}

impl Comparison {
    fn is_tautology(&self) -> bool {
        self.lhs == self.rhs && matches!(self.op.as_str(), "==" | ">=" | "<=")
    }

    fn is_self_contradiction(&self) -> bool {
        self.lhs == self.rhs && matches!(self.op.as_str(), "!=" | ">" | "<")
    }
}

#[derive(Default)]
struct Bounds {
    equals: Vec<String>,
    not_equals: Vec<String>,
    /// (value, inclusive)
    lower: Option<(f64, bool)>,
    upper: Option<(f64, bool)>,
}

/// Find a pair of clauses over the same field that can never both hold.
fn contradiction(clauses: &[Comparison]) -> Option<String> {
    let mut fields: BTreeMap<&str, Bounds> = BTreeMap::new();

    for clause in clauses {
        let bounds = fields.entry(clause.lhs.as_str()).or_default();
        let number = number(&clause.rhs);
        match (clause.op.as_str(), number) {
            ("==", _) => bounds.equals.push(clause.rhs.clone()),
            ("!=", _) => bounds.not_equals.push(clause.rhs.clone()),
            (">", Some(n)) => tighten_lower(&mut bounds.lower, n, false),
            (">=", Some(n)) => tighten_lower(&mut bounds.lower, n, true),
            ("<", Some(n)) => tighten_upper(&mut bounds.upper, n, false),
            ("<=", Some(n)) => tighten_upper(&mut bounds.upper, n, true),
            _ => {}
        }
    }

    for (field, bounds) in &fields {
        if let Some(first) = bounds.equals.first() {
            if let Some(other) = bounds.equals.iter().find(|v| !same_value(first, v)) {
                return Some(format!("{field} == {first} and {field} == {other}"));
            }
            if let Some(other) = bounds.not_equals.iter().find(|v| same_value(first, v)) {
                return Some(format!("{field} == {first} and {field} != {other}"));
            }
            if let Some(value) = number(first) {
                if let Some((lo, incl)) = bounds
                    .lower
                    .filter(|&(lo, incl)| value < lo || (value == lo && !incl))
                {
                    let op = if incl { ">=" } else { ">" };
                    return Some(format!("{field} == {first} and {field} {op} {lo}"));
                }
                if let Some((hi, incl)) = bounds
                    .upper
                    .filter(|&(hi, incl)| value > hi || (value == hi && !incl))
                {
                    let op = if incl { "<=" } else { "<" };
                    return Some(format!("{field} == {first} and {field} {op} {hi}"));
                }
            }
        }
        if let (Some((lo, lo_incl)), Some((hi, hi_incl))) = (bounds.lower, bounds.upper) {
            if lo > hi || (lo == hi && !(lo_incl && hi_incl)) {
                let lo_op = if lo_incl { ">=" } else { ">" };
                let hi_op = if hi_incl { "<=" } else { "<" };
                return Some(format!("{field} {lo_op} {lo} and {field} {hi_op} {hi}"));
            }
        }
    }

    None
}

fn number(rhs: &str) -> Option<f64> {
    rhs.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Numbers compare by value, so `1` and `1.0` are the same literal.
fn same_value(a: &str, b: &str) -> bool {
    match (number(a), number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn tighten_lower(bound: &mut Option<(f64, bool)>, value: f64, inclusive: bool) {
    *bound = match *bound {
        Some((current, _)) if current > value => *bound,
        Some((current, current_incl)) if current == value => {
            Some((value, current_incl && inclusive))
        }
        _ => Some((value, inclusive)),
    };
}

fn tighten_upper(bound: &mut Option<(f64, bool)>, value: f64, inclusive: bool) {
    *bound = match *bound {
        Some((current, _)) if current < value => *bound,
        Some((current, current_incl)) if current == value => {
            Some((value, current_incl && inclusive))
        }
        _ => Some((value, inclusive)),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> SafetyAnalyzer {
        SafetyAnalyzer::new(&default_safety_patterns()).unwrap()
    }

    fn checks(predicate: &str) -> Vec<String> {
        analyzer()
            .analyze(predicate)
            .into_iter()
            .map(|f| f.check)
            .collect()
    }

    #[test]
    fn well_formed_predicate_is_clean() {
        assert!(checks("deny if amount > 10000 and context.region == 'eu'").is_empty());
        assert!(checks("warn if amount >= 500 and amount < 1000").is_empty());
    }

    #[test]
    fn flags_unbounded_wildcard() {
        assert_eq!(checks("allow if resource == '*'"), vec!["unbounded_wildcard"]);
        assert_eq!(checks("deny if path == \".*\""), vec!["unbounded_wildcard"]);
    }

    #[test]
    fn flags_unbounded_iteration() {
        assert!(checks("deny while retries > 0").contains(&"unbounded_iteration".to_string()));
        assert!(checks("allow for all users").contains(&"unbounded_iteration".to_string()));
    }

    #[test]
    fn flags_unconditional_allow_but_not_deny() {
        assert_eq!(checks("allow always"), vec!["unconditional_allow"]);
        assert!(checks("deny always").is_empty());
    }

    #[test]
    fn flags_tautologies() {
        assert_eq!(checks("deny if amount == amount"), vec!["tautological_clause"]);
        assert_eq!(checks("deny if true and x > 1"), vec!["tautological_clause"]);
    }

    #[test]
    fn flags_contradictions() {
        assert_eq!(checks("deny if x == 1 and x == 2"), vec!["contradictory_clauses"]);
        assert_eq!(checks("deny if x == 'a' and x != 'a'"), vec!["contradictory_clauses"]);
        assert_eq!(checks("deny if x > 10 and x < 5"), vec!["contradictory_clauses"]);
        assert_eq!(checks("deny if x > 5 and x <= 5"), vec!["contradictory_clauses"]);
        assert!(checks("deny if x >= 5 and x <= 5").is_empty());
    }

    #[test]
    fn equal_numbers_in_different_notation_agree() {
        assert!(checks("deny if x == 1 and x == 1.0").is_empty());
        assert!(checks("deny if x == 10 and x == 1e1").is_empty());
        assert_eq!(checks("deny if x == 1 and x != 1.0"), vec!["contradictory_clauses"]);
    }

    #[test]
    fn equality_outside_bounds_is_contradictory() {
        let findings = analyzer().analyze("deny if x == 5 and x > 10");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].check, "contradictory_clauses");
        assert_eq!(findings[0].excerpt, "x == 5 and x > 10");

        assert_eq!(checks("deny if x == 5 and x < 5"), vec!["contradictory_clauses"]);
        assert_eq!(checks("deny if x == 20 and x <= 10"), vec!["contradictory_clauses"]);
        assert!(checks("deny if x == 5 and x >= 5").is_empty());
        assert!(checks("deny if x == 7 and x > 5 and x < 10").is_empty());
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let err = SafetyAnalyzer::new(&[SafetyPattern::new("broken", "(unclosed")])
            .err()
            .unwrap();
        assert!(matches!(err, PolicyError::InvalidPattern { ref name, .. } if name == "broken"));
    }
}
