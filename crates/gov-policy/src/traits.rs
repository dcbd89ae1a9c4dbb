// traits.rs — Interfaces to the external collaborators.
//
// The rule language, the scorers and the evaluation service all live outside
// this workspace. Everything here is consumed through these traits, so the
// pipeline and engine stay deterministic and testable with mocks.

use async_trait::async_trait;

use gov_rules::{CandidateRule, Proposal, Verdict};

use crate::error::{ParseError, PolicyError};

/// Grammar check for the external rule language.
pub trait RuleParser: Send + Sync {
    fn parse(&self, predicate_logic: &str) -> Result<(), ParseError>;
}

/// Evaluates one predicate against one proposal.
///
/// Must be a pure function of its inputs: conflict analysis and decision
/// caching both rely on the same inputs producing the same verdict.
#[async_trait]
pub trait PredicateEvaluator: Send + Sync {
    async fn evaluate(&self, proposal: &Proposal, predicate_logic: &str)
        -> Result<Verdict, PolicyError>;
}

/// Scores how well a candidate's intent matches a principle's validation criteria.
#[async_trait]
pub trait SemanticScorer: Send + Sync {
    /// Returns a similarity in [0, 1].
    async fn score(&self, candidate: &CandidateRule, criteria: &str) -> Result<f64, PolicyError>;
}

/// Scores the fairness risk of a candidate.
#[async_trait]
pub trait BiasScorer: Send + Sync {
    /// Returns a risk score in [0, 1]; higher is riskier.
    async fn score(&self, candidate: &CandidateRule) -> Result<f64, PolicyError>;
}

/// Produces representative proposals on which two predicates can be compared.
///
/// Output must depend only on the input predicates and be in a stable order.
pub trait ProbeSource: Send + Sync {
    fn probes(&self, predicates: &[&str]) -> Vec<Proposal>;
}
