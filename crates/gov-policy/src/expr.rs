// expr.rs — A small reference rule language.
//
// Production deployments plug their own rule language in through the
// `RuleParser`, `PredicateEvaluator` and `ProbeSource` traits. This one is
// deliberately tiny so the pipeline can run end to end without one:
//
//   deny if action.amount > 10000 and context.region == "eu"
//   warn if amount >= 500
//   allow always
//
// A predicate yields its verdict when every clause holds and NOT_APPLICABLE
// otherwise. A clause over a missing field does not hold.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde_json::{Map, Value};

use gov_rules::{Proposal, Verdict};

use crate::error::{ParseError, PolicyError};
use crate::traits::{PredicateEvaluator, ProbeSource, RuleParser};

/// Upper bound on the number of probe proposals generated for one comparison.
const MAX_PROBES: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CmpOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CmpOp::Eq => ordering == Ordering::Equal,
            CmpOp::Ne => ordering != Ordering::Equal,
            CmpOp::Gt => ordering == Ordering::Greater,
            CmpOp::Ge => ordering != Ordering::Less,
            CmpOp::Lt => ordering == Ordering::Less,
            CmpOp::Le => ordering != Ordering::Greater,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl Literal {
    /// Compare a proposal field against this literal. `None` when the types differ.
    fn compare(&self, field: &Value) -> Option<Ordering> {
        match self {
            Literal::Number(n) => field.as_f64()?.partial_cmp(n),
            Literal::Text(s) => Some(field.as_str()?.cmp(s.as_str())),
            Literal::Bool(b) => Some(field.as_bool()?.cmp(b)),
        }
    }

    /// Values that sit on either side of this literal's boundary. Numbers are
    /// handled per path by `numeric_probe_values`.
    fn boundary_values(&self) -> Vec<Value> {
        match self {
            Literal::Number(n) => vec![Value::from(*n)],
            Literal::Text(s) => vec![Value::from(s.clone()), Value::from(format!("{s}~other"))],
            Literal::Bool(b) => vec![Value::from(*b), Value::from(!b)],
        }
    }
}

/// Every literal, the midpoint of each adjacent pair, and one value beyond
/// each end. Any interval two predicates can disagree on holds at least one.
fn numeric_probe_values(mut literals: Vec<f64>) -> Vec<Value> {
    literals.retain(|n| n.is_finite());
    literals.sort_by(f64::total_cmp);
    literals.dedup();
    let (Some(&lowest), Some(&highest)) = (literals.first(), literals.last()) else {
        return Vec::new();
    };

    let mut values = vec![Value::from(lowest - 1.0)];
    for (i, n) in literals.iter().enumerate() {
        values.push(Value::from(*n));
        if let Some(next) = literals.get(i + 1) {
            values.push(Value::from(n + (next - n) / 2.0));
        }
    }
    values.push(Value::from(highest + 1.0));
    values
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub path: String,
    pub op: CmpOp,
    pub value: Literal,
}

impl Clause {
    fn holds(&self, proposal: &Proposal) -> bool {
        let Some(field) = proposal.field(&self.path) else {
            return false;
        };
        match self.value.compare(field) {
            Some(ordering) => self.op.holds(ordering),
            None => false,
        }
    }
}

/// A parsed predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleExpr {
    pub verdict: Verdict,
    /// Empty for `<verdict> always`.
    pub clauses: Vec<Clause>,
}

impl RuleExpr {
    pub fn parse(src: &str) -> Result<Self, ParseError> {
        Parser::new(tokenize(src)?, src.len()).parse()
    }

    pub fn evaluate(&self, proposal: &Proposal) -> Verdict {
        if self.clauses.iter().all(|c| c.holds(proposal)) {
            self.verdict
        } else {
            Verdict::NotApplicable
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Number(f64),
    Text(String),
    Op(CmpOp),
}

fn tokenize(src: &str) -> Result<Vec<(usize, Token)>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_alphabetic() || c == '_' {
            let mut word = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                    word.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push((start, Token::Word(word)));
        } else if c.is_ascii_digit() || c == '-' {
            let mut number = String::new();
            number.push(c);
            chars.next();
            while let Some(&(_, c)) = chars.peek() {
                if c.is_ascii_digit() || c == '.' {
                    number.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            let value = number
                .parse::<f64>()
                .map_err(|_| ParseError::new(format!("invalid number '{number}'"), start))?;
            tokens.push((start, Token::Number(value)));
        } else if c == '"' || c == '\'' {
            chars.next();
            let mut text = String::new();
            let mut closed = false;
            for (_, next) in chars.by_ref() {
                if next == c {
                    closed = true;
                    break;
                }
                text.push(next);
            }
            if !closed {
                return Err(ParseError::new("unterminated string", start));
            }
            tokens.push((start, Token::Text(text)));
        } else if matches!(c, '=' | '!' | '<' | '>') {
            chars.next();
            let followed_by_eq = matches!(chars.peek(), Some(&(_, '=')));
            if followed_by_eq {
                chars.next();
            }
            let op = match (c, followed_by_eq) {
                ('=', true) => CmpOp::Eq,
                ('!', true) => CmpOp::Ne,
                ('<', true) => CmpOp::Le,
                ('>', true) => CmpOp::Ge,
                ('<', false) => CmpOp::Lt,
                ('>', false) => CmpOp::Gt,
                _ => return Err(ParseError::new(format!("incomplete operator '{c}'"), start)),
            };
            tokens.push((start, Token::Op(op)));
        } else {
            return Err(ParseError::new(format!("unexpected character '{c}'"), start));
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn new(tokens: Vec<(usize, Token)>, end: usize) -> Self {
        Self { tokens, pos: 0, end }
    }

    fn advance(&mut self) -> Option<(usize, Token)> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(offset, _)| *offset)
    }

    fn keyword(&mut self) -> Option<String> {
        match self.tokens.get(self.pos) {
            Some((_, Token::Word(w))) => {
                let w = w.to_ascii_lowercase();
                self.pos += 1;
                Some(w)
            }
            _ => None,
        }
    }

    fn parse(mut self) -> Result<RuleExpr, ParseError> {
        let offset = self.offset();
        let verdict = match self.keyword().as_deref() {
            Some("allow") => Verdict::Allow,
            Some("deny") => Verdict::Deny,
            Some("warn") => Verdict::Warn,
            _ => return Err(ParseError::new("expected 'allow', 'deny' or 'warn'", offset)),
        };

        let offset = self.offset();
        let clauses = match self.keyword().as_deref() {
            Some("always") => Vec::new(),
            Some("if") => {
                let mut clauses = vec![self.clause()?];
                while self.pos < self.tokens.len() {
                    let offset = self.offset();
                    if self.keyword().as_deref() != Some("and") {
                        return Err(ParseError::new("expected 'and'", offset));
                    }
                    clauses.push(self.clause()?);
                }
                clauses
            }
            _ => return Err(ParseError::new("expected 'if' or 'always'", offset)),
        };

        if self.pos < self.tokens.len() {
            return Err(ParseError::new("unexpected trailing input", self.offset()));
        }
        Ok(RuleExpr { verdict, clauses })
    }

    fn clause(&mut self) -> Result<Clause, ParseError> {
        let offset = self.offset();
        let path = match self.advance() {
            Some((_, Token::Word(w))) if !is_reserved(&w) => w,
            _ => return Err(ParseError::new("expected a field path", offset)),
        };

        let offset = self.offset();
        let op = match self.advance() {
            Some((_, Token::Op(op))) => op,
            _ => return Err(ParseError::new("expected a comparison operator", offset)),
        };

        let offset = self.offset();
        let value = match self.advance() {
            Some((_, Token::Number(n))) => Literal::Number(n),
            Some((_, Token::Text(s))) => Literal::Text(s),
            Some((_, Token::Word(w))) if w.eq_ignore_ascii_case("true") => Literal::Bool(true),
            Some((_, Token::Word(w))) if w.eq_ignore_ascii_case("false") => Literal::Bool(false),
            _ => return Err(ParseError::new("expected a literal", offset)),
        };

        Ok(Clause { path, op, value })
    }
}

fn is_reserved(word: &str) -> bool {
    matches!(
        word.to_ascii_lowercase().as_str(),
        "allow" | "deny" | "warn" | "if" | "and" | "always" | "true" | "false"
    )
}

/// Write `value` at `path` inside a fresh proposal shape.
fn assign(
    payload: &mut Map<String, Value>,
    context: &mut BTreeMap<String, Value>,
    path: &str,
    value: Value,
) {
    let mut segments: Vec<&str> = path.split('.').collect();
    match segments.first().copied() {
        Some("action") => {
            segments.remove(0);
            insert_nested(payload, &segments, value);
        }
        Some("context") if segments.len() > 1 => {
            let key = segments[1].to_string();
            if segments.len() == 2 {
                context.insert(key, value);
            } else {
                let entry = context.entry(key).or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(map) = entry {
                    insert_nested(map, &segments[2..], value);
                }
            }
        }
        _ => insert_nested(payload, &segments, value),
    }
}

fn insert_nested(map: &mut Map<String, Value>, segments: &[&str], value: Value) {
    match segments {
        [] => {}
        [last] => {
            map.insert((*last).to_string(), value);
        }
        [head, rest @ ..] => {
            let entry = map
                .entry((*head).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(inner) = entry {
                insert_nested(inner, rest, value);
            }
        }
    }
}

/// The reference language: parser, evaluator and probe source in one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExprLanguage;

impl RuleParser for ExprLanguage {
    fn parse(&self, predicate_logic: &str) -> Result<(), ParseError> {
        RuleExpr::parse(predicate_logic).map(|_| ())
    }
}

#[async_trait]
impl PredicateEvaluator for ExprLanguage {
    async fn evaluate(
        &self,
        proposal: &Proposal,
        predicate_logic: &str,
    ) -> Result<Verdict, PolicyError> {
        Ok(RuleExpr::parse(predicate_logic)?.evaluate(proposal))
    }
}

impl ProbeSource for ExprLanguage {
    /// Cartesian product of boundary values over every field the predicates
    /// mention, capped at `MAX_PROBES`. Numeric fields get every literal any
    /// predicate compares them to, the midpoints between them and one step
    /// past either end. Predicates that do not parse are ignored.
    fn probes(&self, predicates: &[&str]) -> Vec<Proposal> {
        let mut numbers: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut values: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for predicate in predicates {
            let Ok(expr) = RuleExpr::parse(predicate) else {
                continue;
            };
            for clause in &expr.clauses {
                if let Literal::Number(n) = clause.value {
                    numbers.entry(clause.path.clone()).or_default().push(n);
                    continue;
                }
                let slot = values.entry(clause.path.clone()).or_default();
                for value in clause.value.boundary_values() {
                    if !slot.contains(&value) {
                        slot.push(value);
                    }
                }
            }
        }
        for (path, literals) in numbers {
            let slot = values.entry(path).or_default();
            for value in numeric_probe_values(literals) {
                if !slot.contains(&value) {
                    slot.push(value);
                }
            }
        }

        let mut combos: Vec<Vec<(&str, &Value)>> = vec![Vec::new()];
        for (path, options) in &values {
            let mut next = Vec::new();
            'outer: for combo in &combos {
                for value in options {
                    if next.len() >= MAX_PROBES {
                        break 'outer;
                    }
                    let mut extended = combo.clone();
                    extended.push((path.as_str(), value));
                    next.push(extended);
                }
            }
            combos = next;
        }

        combos
            .into_iter()
            .enumerate()
            .map(|(i, combo)| {
                let mut payload = Map::new();
                let mut context = BTreeMap::new();
                for (path, value) in combo {
                    assign(&mut payload, &mut context, path, value.clone());
                }
                let mut proposal = Proposal::new(format!("probe-{i}"), Value::Object(payload));
                proposal.context = context;
                proposal
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_clauses_and_always() {
        let expr =
            RuleExpr::parse("deny if action.amount > 10000 and context.region == \"eu\"").unwrap();
        assert_eq!(expr.verdict, Verdict::Deny);
        assert_eq!(expr.clauses.len(), 2);
        assert_eq!(expr.clauses[0].op, CmpOp::Gt);
        assert_eq!(expr.clauses[1].value, Literal::Text("eu".into()));

        let always = RuleExpr::parse("ALLOW always").unwrap();
        assert_eq!(always.verdict, Verdict::Allow);
        assert!(always.clauses.is_empty());
    }

    #[test]
    fn rejects_malformed_predicates() {
        for src in [
            "",
            "block if x > 1",
            "deny if",
            "deny if x >",
            "deny if x = 1",
            "deny if x > 1 or y < 2",
            "deny if x > 'open",
            "deny always extra",
        ] {
            assert!(RuleExpr::parse(src).is_err(), "{src:?} should not parse");
        }
    }

    #[test]
    fn parse_error_reports_offset() {
        let err = RuleExpr::parse("deny if amount ?? 3").unwrap_err();
        assert_eq!(err.offset, 15);
    }

    #[test]
    fn evaluates_against_payload_and_context() {
        let expr = RuleExpr::parse("deny if amount > 10000 and context.region == 'eu'").unwrap();
        let big_eu =
            Proposal::new("a", json!({"amount": 50000})).with_context("region", json!("eu"));
        let big_us =
            Proposal::new("b", json!({"amount": 50000})).with_context("region", json!("us"));
        assert_eq!(expr.evaluate(&big_eu), Verdict::Deny);
        assert_eq!(expr.evaluate(&big_us), Verdict::NotApplicable);
    }

    #[test]
    fn missing_or_mistyped_field_does_not_match() {
        let expr = RuleExpr::parse("deny if amount != 5").unwrap();
        assert_eq!(expr.evaluate(&Proposal::new("a", json!({}))), Verdict::NotApplicable);
        assert_eq!(
            expr.evaluate(&Proposal::new("b", json!({"amount": "five"}))),
            Verdict::NotApplicable
        );
        assert_eq!(expr.evaluate(&Proposal::new("c", json!({"amount": 6}))), Verdict::Deny);
    }

    #[test]
    fn probes_straddle_boundaries() {
        let probes =
            ExprLanguage.probes(&["deny if amount > 100", "allow if context.tier == 'gold'"]);
        // 3 amount values x 2 tier values.
        assert_eq!(probes.len(), 6);
        let amounts: Vec<f64> = probes
            .iter()
            .filter_map(|p| p.field("amount").and_then(Value::as_f64))
            .collect();
        assert!(amounts.contains(&99.0));
        assert!(amounts.contains(&100.0));
        assert!(amounts.contains(&101.0));
        assert!(probes.iter().all(|p| p.context.contains_key("tier")));
    }

    #[test]
    fn numeric_fields_cover_gaps_between_literals() {
        let probes = ExprLanguage.probes(&["allow if amount > 100", "deny if amount < 101"]);
        let amounts: Vec<f64> = probes
            .iter()
            .filter_map(|p| p.field("amount").and_then(Value::as_f64))
            .collect();
        assert_eq!(amounts, vec![99.0, 100.0, 100.5, 101.0, 102.0]);
    }

    #[test]
    fn probes_are_deterministic_and_capped() {
        let preds = ["deny if a > 1 and b > 1 and c > 1 and d > 1 and e > 1 and f > 1"];
        let first = ExprLanguage.probes(&preds);
        let second = ExprLanguage.probes(&preds);
        assert_eq!(first, second);
        assert!(first.len() <= MAX_PROBES);
    }

    #[tokio::test]
    async fn evaluator_surfaces_parse_errors() {
        let proposal = Proposal::new("a", json!({}));
        let err = ExprLanguage.evaluate(&proposal, "nonsense").await.unwrap_err();
        assert!(matches!(err, PolicyError::Parse(_)));
    }
}
