// engine.rs — Real-time policy decisions against the active rule set.
//
// Each call captures the current snapshot once and works only against it.
// Rules are scanned in snapshot order (priority descending, newest first),
// so the first DENY seen is the primary reason. After that only rules of
// equal priority can still matter for the decision; strictly lower-priority
// rules are skipped unless warnings are collected exhaustively.
//
// Every evaluator call shares one deadline. A rule that misses it, or whose
// evaluation fails, is treated as DENY (fail-closed) and the decision is not
// cached. `evaluate` itself never fails.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::{timeout_at, Instant};

use gov_rules::hasher;
use gov_rules::{
    ActiveRuleSet, Decision, DecisionRecord, EnforcementOutcome, Explanation, FeedbackRecord,
    FeedbackSink, Proposal, RuleSetSnapshot, TriggeredRule, Verdict,
};

use crate::cache::DecisionCache;
use crate::error::PolicyError;
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::traits::PredicateEvaluator;

pub const TIMEOUT_DETAIL: &str = "evaluation timeout";
pub const TIMEOUT_ERROR_CLASS: &str = "EvaluatorTimeout";
pub const EVALUATOR_ERROR_CLASS: &str = "EvaluatorError";

/// Loaded from the `[engine]` config section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Budget for one `evaluate` call, shared by all evaluator calls.
    #[serde(default = "default_decision_deadline_ms")]
    pub decision_deadline_ms: u64,

    /// Keep evaluating lower-priority rules after a DENY so every WARN is
    /// reported and the compliance score covers the whole rule set.
    #[serde(default = "default_exhaustive_warnings")]
    pub exhaustive_warnings: bool,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_decision_deadline_ms() -> u64 {
    40
}

fn default_exhaustive_warnings() -> bool {
    true
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_cache_ttl_secs() -> u64 {
    300
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            decision_deadline_ms: default_decision_deadline_ms(),
            exhaustive_warnings: default_exhaustive_warnings(),
            cache_capacity: default_cache_capacity(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl EngineConfig {
    pub fn decision_deadline(&self) -> Duration {
        Duration::from_millis(self.decision_deadline_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Working state of one rule scan.
#[derive(Default)]
struct Scan {
    triggered: Vec<TriggeredRule>,
    primary: Option<usize>,
    evaluated: usize,
    skipped: usize,
    timeouts: u64,
    errors: u64,
    error_class: Option<&'static str>,
}

impl Scan {
    fn primary_priority(&self) -> Option<i64> {
        self.primary.map(|i| self.triggered[i].priority)
    }

    fn fail(&mut self, class: &'static str) {
        if self.error_class.is_none() {
            self.error_class = Some(class);
        }
    }

    fn into_record(mut self, fingerprint: String, snapshot: &RuleSetSnapshot) -> DecisionRecord {
        let primary = self.primary.map(|i| self.triggered.remove(i));
        let warnings: Vec<TriggeredRule> = self
            .triggered
            .iter()
            .filter(|t| t.verdict == Verdict::Warn)
            .cloned()
            .collect();

        let total = snapshot.len();
        let compliance_score = if total == 0 {
            1.0
        } else {
            1.0 - warnings.len() as f64 / total as f64
        };

        let (decision, summary) = match &primary {
            Some(p) => {
                let why = snapshot
                    .get(p.rule_id)
                    .map(|r| r.explanation.as_str())
                    .unwrap_or_default();
                let detail = p.detail.as_deref().unwrap_or(why);
                (
                    Decision::Deny,
                    format!("DENY by rule {}@v{}: {}", p.rule_id, p.rule_version, detail),
                )
            }
            None => (
                Decision::Allow,
                format!("ALLOW with {} warning(s)", warnings.len()),
            ),
        };

        let mut triggered_rules = Vec::with_capacity(self.triggered.len() + 1);
        triggered_rules.extend(primary.clone());
        triggered_rules.extend(self.triggered);

        DecisionRecord {
            fingerprint,
            decision,
            triggered_rules,
            explanation: Explanation {
                primary_reason: primary,
                warnings,
                compliance_score,
                summary,
                error_class: self.error_class.map(str::to_string),
            },
            rule_set_version: snapshot.version(),
            computed_at: Utc::now(),
            rules_evaluated: self.evaluated,
            rules_skipped: self.skipped,
        }
    }
}

pub struct DecisionEngine {
    rules: Arc<ActiveRuleSet>,
    evaluator: Arc<dyn PredicateEvaluator>,
    cache: DecisionCache,
    metrics: EngineMetrics,
    config: EngineConfig,
    feedback: Option<Arc<dyn FeedbackSink>>,
}

impl DecisionEngine {
    pub fn new(
        rules: Arc<ActiveRuleSet>,
        evaluator: Arc<dyn PredicateEvaluator>,
        config: EngineConfig,
    ) -> Result<Self, PolicyError> {
        Ok(Self {
            rules,
            evaluator,
            cache: DecisionCache::new(config.cache_capacity, config.cache_ttl()),
            metrics: EngineMetrics::new()?,
            config,
            feedback: None,
        })
    }

    /// Report DENY/WARN outcomes and evaluation failures to `sink`.
    pub fn with_feedback(mut self, sink: Arc<dyn FeedbackSink>) -> Self {
        self.feedback = Some(sink);
        self
    }

    pub fn rules(&self) -> &Arc<ActiveRuleSet> {
        &self.rules
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Prometheus registry with the engine's counters and latency histogram.
    pub fn metrics_registry(&self) -> &prometheus::Registry {
        self.metrics.registry()
    }

    pub fn cached_decisions(&self) -> usize {
        self.cache.len()
    }

    /// Decide on `proposal` within the configured deadline.
    pub async fn evaluate(&self, proposal: &Proposal) -> DecisionRecord {
        let deadline = Instant::now() + self.config.decision_deadline();
        self.evaluate_until(proposal, deadline).await
    }

    /// Decide on `proposal`, treating any rule still pending at `deadline` as DENY.
    pub async fn evaluate_until(&self, proposal: &Proposal, deadline: Instant) -> DecisionRecord {
        let started = Instant::now();
        let snapshot = self.rules.current();
        let fingerprint = hasher::fingerprint(
            &proposal.action_payload,
            &proposal.context,
            snapshot.version(),
        );

        if let Some(record) = self.cache.get(&fingerprint, snapshot.version()) {
            self.metrics
                .record_decision(true, !record.is_allowed(), started.elapsed());
            tracing::trace!(proposal = %proposal.proposal_id, "decision cache hit");
            self.report(&record);
            return record;
        }

        let scan = self.scan(proposal, &snapshot, deadline).await;
        let (timeouts, errors) = (scan.timeouts, scan.errors);
        let record = scan.into_record(fingerprint, &snapshot);

        if timeouts == 0 && errors == 0 {
            self.cache.insert(record.clone());
        }
        self.metrics.record_rule_failures(timeouts, errors);
        self.metrics
            .record_decision(false, !record.is_allowed(), started.elapsed());

        tracing::debug!(
            proposal = %proposal.proposal_id,
            decision = %record.decision,
            snapshot = record.rule_set_version,
            evaluated = record.rules_evaluated,
            skipped = record.rules_skipped,
            "decision computed"
        );

        self.report(&record);
        record
    }

    async fn scan(
        &self,
        proposal: &Proposal,
        snapshot: &RuleSetSnapshot,
        deadline: Instant,
    ) -> Scan {
        let mut scan = Scan::default();

        for rule in snapshot.rules() {
            if let Some(primary_priority) = scan.primary_priority() {
                // Below the primary DENY a rule can only add warnings.
                if rule.priority < primary_priority
                    && (!self.config.exhaustive_warnings || Instant::now() >= deadline)
                {
                    scan.skipped += 1;
                    continue;
                }
            }

            scan.evaluated += 1;
            let evaluation = self.evaluator.evaluate(proposal, &rule.predicate_logic);
            let (verdict, detail) = match timeout_at(deadline, evaluation).await {
                Ok(Ok(verdict)) => (verdict, None),
                Ok(Err(e)) => {
                    tracing::warn!(
                        rule = %rule.label(),
                        error = %e,
                        "rule evaluation failed; denying"
                    );
                    scan.errors += 1;
                    scan.fail(EVALUATOR_ERROR_CLASS);
                    (Verdict::Deny, Some(format!("evaluator error: {e}")))
                }
                Err(_) => {
                    tracing::warn!(rule = %rule.label(), "rule evaluation timed out; denying");
                    scan.timeouts += 1;
                    scan.fail(TIMEOUT_ERROR_CLASS);
                    (Verdict::Deny, Some(TIMEOUT_DETAIL.to_string()))
                }
            };

            if !verdict.applies() {
                continue;
            }
            if verdict == Verdict::Deny && scan.primary.is_none() {
                scan.primary = Some(scan.triggered.len());
            }
            scan.triggered.push(TriggeredRule {
                rule_id: rule.rule_id,
                rule_version: rule.version,
                priority: rule.priority,
                verdict,
                detail,
            });
        }

        scan
    }

    fn report(&self, record: &DecisionRecord) {
        let Some(sink) = &self.feedback else {
            return;
        };
        let primary = record.primary().map(|p| p.rule_id);
        for triggered in &record.triggered_rules {
            let outcome = match (triggered.verdict, triggered.detail.as_deref()) {
                (Verdict::Deny, Some(TIMEOUT_DETAIL)) => EnforcementOutcome::EvaluationFailed {
                    error_class: TIMEOUT_ERROR_CLASS.to_string(),
                },
                (Verdict::Deny, Some(_)) => EnforcementOutcome::EvaluationFailed {
                    error_class: EVALUATOR_ERROR_CLASS.to_string(),
                },
                (Verdict::Deny, None) if primary == Some(triggered.rule_id) => {
                    EnforcementOutcome::Denied
                }
                (Verdict::Warn, _) => EnforcementOutcome::Warned,
                _ => continue,
            };
            sink.record(FeedbackRecord::new(triggered.rule_id, outcome));
        }
    }
}
