// pipeline.rs — The five-tier validation pipeline for candidate rules.
//
// Tiers run in a fixed order and stop at the first rejection, so a candidate
// that fails SYNTAX never reaches the (expensive) scorers:
//
//   SYNTAX -> SEMANTIC -> SAFETY -> BIAS -> CONFLICT
//
// Accepted candidates come back packaged as operational rules, already
// versioned against the rule they supersede (if any).

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use gov_rules::{CandidateRule, OperationalRule, PrincipleStore, RuleSetSnapshot};

use crate::conflict::{AnalysisSubject, ConflictAnalyzer, ConflictReport};
use crate::error::PolicyError;
use crate::safety::{default_safety_patterns, SafetyAnalyzer, SafetyFinding, SafetyPattern};
use crate::traits::{BiasScorer, RuleParser, SemanticScorer};

/// Validation tier at which a candidate was rejected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationTier {
    Syntax,
    Semantic,
    Safety,
    Bias,
    Conflict,
}

impl fmt::Display for ValidationTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationTier::Syntax => write!(f, "SYNTAX"),
            ValidationTier::Semantic => write!(f, "SEMANTIC"),
            ValidationTier::Safety => write!(f, "SAFETY"),
            ValidationTier::Bias => write!(f, "BIAS"),
            ValidationTier::Conflict => write!(f, "CONFLICT"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    /// Structural problem or grammar error.
    Malformed { message: String },
    /// A source principle is unknown or inactive.
    UnknownPrinciple { principle_id: String },
    SemanticMisalignment {
        principle_id: String,
        score: f64,
        threshold: f64,
    },
    Unsafe { findings: Vec<SafetyFinding> },
    BiasRisk { risk_score: f64, threshold: f64 },
    Conflicts { reports: Vec<ConflictReport> },
    /// A scorer failed; the candidate is rejected rather than let through.
    CollaboratorFailure { message: String },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::Malformed { message } => write!(f, "malformed: {message}"),
            RejectionReason::UnknownPrinciple { principle_id } => {
                write!(f, "unknown or inactive principle '{principle_id}'")
            }
            RejectionReason::SemanticMisalignment {
                principle_id,
                score,
                threshold,
            } => write!(
                f,
                "alignment with '{principle_id}' is {score:.2}, below {threshold:.2}"
            ),
            RejectionReason::Unsafe { findings } => {
                let checks: Vec<&str> = findings.iter().map(|x| x.check.as_str()).collect();
                write!(f, "unsafe: {}", checks.join(", "))
            }
            RejectionReason::BiasRisk {
                risk_score,
                threshold,
            } => write!(f, "bias risk {risk_score:.2} at or above {threshold:.2}"),
            RejectionReason::Conflicts { reports } => {
                write!(f, "{} blocking conflict(s)", reports.len())
            }
            RejectionReason::CollaboratorFailure { message } => write!(f, "{message}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationResult {
    Accepted {
        rule: OperationalRule,
        /// Non-blocking conflict reports.
        warnings: Vec<ConflictReport>,
    },
    Rejected {
        tier: ValidationTier,
        reason: RejectionReason,
    },
}

impl ValidationResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationResult::Accepted { .. })
    }

    pub fn rejected_tier(&self) -> Option<ValidationTier> {
        match self {
            ValidationResult::Rejected { tier, .. } => Some(*tier),
            ValidationResult::Accepted { .. } => None,
        }
    }
}

/// Thresholds and safety patterns. Loaded from the `[validation]` config section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationConfig {
    /// Minimum semantic alignment with every source principle.
    #[serde(default = "default_semantic_threshold")]
    pub semantic_threshold: f64,

    /// Bias risk at or above this rejects.
    #[serde(default = "default_bias_threshold")]
    pub bias_threshold: f64,

    #[serde(default = "default_safety_patterns")]
    pub safety_patterns: Vec<SafetyPattern>,
}

fn default_semantic_threshold() -> f64 {
    0.85
}

fn default_bias_threshold() -> f64 {
    0.7
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            semantic_threshold: default_semantic_threshold(),
            bias_threshold: default_bias_threshold(),
            safety_patterns: default_safety_patterns(),
        }
    }
}

pub struct ValidationPipeline {
    config: ValidationConfig,
    principles: Arc<dyn PrincipleStore>,
    parser: Arc<dyn RuleParser>,
    semantic: Arc<dyn SemanticScorer>,
    bias: Arc<dyn BiasScorer>,
    safety: SafetyAnalyzer,
    conflicts: ConflictAnalyzer,
}

impl ValidationPipeline {
    /// Fails only when a configured safety pattern does not compile.
    pub fn new(
        config: ValidationConfig,
        principles: Arc<dyn PrincipleStore>,
        parser: Arc<dyn RuleParser>,
        semantic: Arc<dyn SemanticScorer>,
        bias: Arc<dyn BiasScorer>,
        conflicts: ConflictAnalyzer,
    ) -> Result<Self, PolicyError> {
        let safety = SafetyAnalyzer::new(&config.safety_patterns)?;
        Ok(Self {
            config,
            principles,
            parser,
            semantic,
            bias,
            safety,
            conflicts,
        })
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Run every tier against `snapshot`, stopping at the first rejection.
    pub async fn validate(
        &self,
        candidate: &CandidateRule,
        snapshot: &RuleSetSnapshot,
    ) -> ValidationResult {
        let result = self.run_tiers(candidate, snapshot).await;
        match &result {
            ValidationResult::Accepted { rule, warnings } => tracing::info!(
                candidate = %candidate.candidate_id,
                rule = %rule.label(),
                warnings = warnings.len(),
                "candidate accepted"
            ),
            ValidationResult::Rejected { tier, reason } => tracing::warn!(
                candidate = %candidate.candidate_id,
                tier = %tier,
                reason = %reason,
                "candidate rejected"
            ),
        }
        result
    }

    async fn run_tiers(
        &self,
        candidate: &CandidateRule,
        snapshot: &RuleSetSnapshot,
    ) -> ValidationResult {
        let reject = |tier, reason| ValidationResult::Rejected { tier, reason };

        // SYNTAX
        if let Err(message) = check_structure(candidate) {
            return reject(ValidationTier::Syntax, RejectionReason::Malformed { message });
        }
        if let Err(e) = self.parser.parse(&candidate.predicate_logic) {
            return reject(
                ValidationTier::Syntax,
                RejectionReason::Malformed {
                    message: e.to_string(),
                },
            );
        }

        // SEMANTIC
        let mut principles = Vec::with_capacity(candidate.source_principle_ids.len());
        for id in candidate.derivation_key() {
            match self.principles.get(&id) {
                Some(p) if p.active => principles.push(p),
                _ => {
                    return reject(
                        ValidationTier::Semantic,
                        RejectionReason::UnknownPrinciple { principle_id: id },
                    )
                }
            }
        }
        for principle in &principles {
            let score = match self
                .semantic
                .score(candidate, &principle.validation_criteria)
                .await
            {
                Ok(score) => score,
                Err(e) => {
                    return reject(
                        ValidationTier::Semantic,
                        RejectionReason::CollaboratorFailure {
                            message: e.to_string(),
                        },
                    )
                }
            };
            if score < self.config.semantic_threshold {
                return reject(
                    ValidationTier::Semantic,
                    RejectionReason::SemanticMisalignment {
                        principle_id: principle.id.clone(),
                        score,
                        threshold: self.config.semantic_threshold,
                    },
                );
            }
        }

        // SAFETY
        let findings = self.safety.analyze(&candidate.predicate_logic);
        if !findings.is_empty() {
            return reject(ValidationTier::Safety, RejectionReason::Unsafe { findings });
        }

        // BIAS
        match self.bias.score(candidate).await {
            Ok(risk) if risk >= self.config.bias_threshold => {
                return reject(
                    ValidationTier::Bias,
                    RejectionReason::BiasRisk {
                        risk_score: risk,
                        threshold: self.config.bias_threshold,
                    },
                )
            }
            Ok(_) => {}
            Err(e) => {
                return reject(
                    ValidationTier::Bias,
                    RejectionReason::CollaboratorFailure {
                        message: e.to_string(),
                    },
                )
            }
        }

        // CONFLICT
        let priority = candidate
            .priority_override
            .or_else(|| principles.iter().map(|p| p.priority).max())
            .unwrap_or_default();
        let prior = snapshot.find_by_derivation(&candidate.derivation_key());
        let subject = AnalysisSubject::candidate(candidate, priority, prior.map(|r| r.rule_id));
        let (blocking, warnings): (Vec<_>, Vec<_>) = self
            .conflicts
            .analyze(subject, snapshot.rules())
            .await
            .into_iter()
            .partition(ConflictReport::is_blocking);
        if !blocking.is_empty() {
            return reject(
                ValidationTier::Conflict,
                RejectionReason::Conflicts { reports: blocking },
            );
        }

        ValidationResult::Accepted {
            rule: OperationalRule::from_candidate(candidate, priority, prior),
            warnings,
        }
    }
}

fn check_structure(candidate: &CandidateRule) -> Result<(), String> {
    if candidate.source_principle_ids.is_empty() {
        return Err("no source principles".into());
    }
    if candidate.source_principle_ids.iter().any(|id| id.trim().is_empty()) {
        return Err("empty principle id".into());
    }
    if candidate.predicate_logic.trim().is_empty() {
        return Err("empty predicate".into());
    }
    if !(0.0..=1.0).contains(&candidate.confidence) {
        return Err(format!("confidence {} outside [0, 1]", candidate.confidence));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ExprLanguage;
    use crate::mocks::{CountingParser, FixedScorer};
    use gov_rules::{InMemoryPrincipleStore, Principle};

    struct Fixture {
        parser: Arc<CountingParser>,
        semantic: Arc<FixedScorer>,
        bias: Arc<FixedScorer>,
        pipeline: ValidationPipeline,
    }

    fn fixture(semantic: f64, bias: f64) -> Fixture {
        let store = InMemoryPrincipleStore::with_principles([
            Principle::new("P1", 10, "No large transfers", "blocks transfers above limit"),
            Principle::new("P2", 5, "Flag medium transfers", "warns on medium transfers"),
        ]);
        let parser = Arc::new(CountingParser::new(ExprLanguage));
        let semantic = Arc::new(FixedScorer::new(semantic));
        let bias = Arc::new(FixedScorer::new(bias));
        let pipeline = ValidationPipeline::new(
            ValidationConfig::default(),
            Arc::new(store),
            parser.clone(),
            semantic.clone(),
            bias.clone(),
            ConflictAnalyzer::new(Arc::new(ExprLanguage), Arc::new(ExprLanguage)),
        )
        .unwrap();
        Fixture {
            parser,
            semantic,
            bias,
            pipeline,
        }
    }

    fn candidate(predicate: &str) -> CandidateRule {
        CandidateRule::new(vec!["P1".into()], predicate, "limit", 0.95)
    }

    #[tokio::test]
    async fn accepts_and_inherits_principle_priority() {
        let f = fixture(0.95, 0.1);
        let result = f
            .pipeline
            .validate(&candidate("deny if amount > 10000"), &RuleSetSnapshot::empty())
            .await;
        match result {
            ValidationResult::Accepted { rule, warnings } => {
                assert_eq!(rule.priority, 10);
                assert_eq!(rule.version, 1);
                assert!(warnings.is_empty());
            }
            other => panic!("expected acceptance, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn syntax_failure_skips_every_later_tier() {
        let f = fixture(0.95, 0.1);
        let result = f
            .pipeline
            .validate(&candidate("deny when amount is big"), &RuleSetSnapshot::empty())
            .await;
        assert_eq!(result.rejected_tier(), Some(ValidationTier::Syntax));
        assert_eq!(f.parser.calls(), 1);
        assert_eq!(f.semantic.calls(), 0);
        assert_eq!(f.bias.calls(), 0);
    }

    #[tokio::test]
    async fn structural_problems_are_syntax_rejections() {
        let f = fixture(0.95, 0.1);
        let mut no_sources = candidate("deny always");
        no_sources.source_principle_ids.clear();
        let mut bad_confidence = candidate("deny always");
        bad_confidence.confidence = 1.5;

        for c in [no_sources, bad_confidence] {
            let result = f.pipeline.validate(&c, &RuleSetSnapshot::empty()).await;
            assert_eq!(result.rejected_tier(), Some(ValidationTier::Syntax));
        }
        assert_eq!(f.parser.calls(), 0);
    }

    #[tokio::test]
    async fn low_alignment_is_semantic_rejection() {
        let f = fixture(0.5, 0.1);
        let result = f
            .pipeline
            .validate(&candidate("deny if amount > 10000"), &RuleSetSnapshot::empty())
            .await;
        assert_eq!(result.rejected_tier(), Some(ValidationTier::Semantic));
        assert_eq!(f.bias.calls(), 0);
    }

    #[tokio::test]
    async fn unknown_principle_is_semantic_rejection() {
        let f = fixture(0.95, 0.1);
        let c = CandidateRule::new(vec!["P9".into()], "deny always", "x", 0.9);
        let result = f.pipeline.validate(&c, &RuleSetSnapshot::empty()).await;
        match result {
            ValidationResult::Rejected {
                tier: ValidationTier::Semantic,
                reason: RejectionReason::UnknownPrinciple { principle_id },
            } => assert_eq!(principle_id, "P9"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(f.semantic.calls(), 0);
    }

    #[tokio::test]
    async fn unsafe_predicate_is_rejected_before_bias() {
        let f = fixture(0.95, 0.1);
        let result = f
            .pipeline
            .validate(&candidate("allow always"), &RuleSetSnapshot::empty())
            .await;
        assert_eq!(result.rejected_tier(), Some(ValidationTier::Safety));
        assert_eq!(f.bias.calls(), 0);
    }

    #[tokio::test]
    async fn bias_at_threshold_is_rejected() {
        let f = fixture(0.95, 0.7);
        let result = f
            .pipeline
            .validate(&candidate("deny if amount > 10000"), &RuleSetSnapshot::empty())
            .await;
        assert_eq!(result.rejected_tier(), Some(ValidationTier::Bias));
    }

    #[tokio::test]
    async fn scorer_failure_rejects() {
        let f = fixture(0.95, 0.1);
        f.semantic.fail_with("model offline");
        let result = f
            .pipeline
            .validate(&candidate("deny if amount > 10000"), &RuleSetSnapshot::empty())
            .await;
        assert!(matches!(
            result,
            ValidationResult::Rejected {
                tier: ValidationTier::Semantic,
                reason: RejectionReason::CollaboratorFailure { .. }
            }
        ));
    }

    #[tokio::test]
    async fn high_severity_conflict_blocks_publication() {
        let f = fixture(0.95, 0.1);
        let existing = OperationalRule::from_candidate(
            &CandidateRule::new(vec!["P2".into()], "deny if amount > 10000", "x", 1.0),
            10,
            None,
        );
        let snapshot = RuleSetSnapshot::new(1, vec![existing.clone()]).unwrap();
        let result = f
            .pipeline
            .validate(&candidate("allow if amount > 5000"), &snapshot)
            .await;
        match result {
            ValidationResult::Rejected {
                tier: ValidationTier::Conflict,
                reason: RejectionReason::Conflicts { reports },
            } => assert_eq!(reports[0].conflicting_rule_id, existing.rule_id),
            other => panic!("expected conflict rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn same_derivation_supersedes_prior_rule() {
        let f = fixture(0.95, 0.1);
        let prior = OperationalRule::from_candidate(&candidate("deny if amount > 20000"), 10, None);
        let snapshot = RuleSetSnapshot::new(1, vec![prior.clone()]).unwrap();
        // Opposes the prior rule, but replaces it, so it is not a conflict.
        let result = f
            .pipeline
            .validate(&candidate("allow if amount > 20000"), &snapshot)
            .await;
        match result {
            ValidationResult::Accepted { rule, .. } => {
                assert_eq!(rule.rule_id, prior.rule_id);
                assert_eq!(rule.version, 2);
            }
            other => panic!("expected acceptance, got {:?}", other),
        }
    }
}
