// synthesizer.rs — The rule synthesis loop and every write to the active rule set.
//
// A cycle turns one trigger into zero or more published rules:
//
//   1. INTERPRETING: resolve which principles the trigger is about.
//   2. GENERATING: ask the generator for candidates per principle.
//   3. VALIDATING: run candidates through the validation pipeline against
//      a working copy of the current snapshot.
//   4. Publish accepted rules as one new snapshot, park candidates that need
//      a human, or stage everything when the publication rate limit is hit.
//
// The synthesizer is the only writer of the active rule set. Cycles, approvals,
// revocations and rollbacks all take the same lock, so writes are serialized.
// Nothing here ever propagates a failure into the decision path: the engine
// keeps serving the last published snapshot whatever happens.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use gov_policy::{
    ConflictReport, RejectionReason, ValidationPipeline, ValidationResult, ValidationTier,
};
use gov_rules::{
    ActiveRuleSet, CandidateRule, FeedbackRecord, OperationalRule, Principle, PrincipleStore,
    RuleSetSnapshot,
};

use crate::approvals::{requires_approval, PendingApproval, PendingApprovals};
use crate::error::SynthesisError;
use crate::events::{EventDispatcher, GovEvent};
use crate::feedback::FeedbackCollector;
use crate::generator::{Generator, ResilientGenerator, SynthesisContext};
use crate::limiter::PublicationLimiter;
use crate::registry::RuleRegistry;
use crate::state::{CandidateRejection, CycleReport, FlaggedConflict, SynthesisState};
use crate::trigger::Trigger;

/// Loaded from the `[synthesis]` config section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SynthesisConfig {
    /// Candidates kept per principle per cycle.
    #[serde(default = "default_candidates_per_principle")]
    pub candidates_per_principle: usize,

    /// Accepted candidates below this confidence wait for a human.
    #[serde(default = "default_approval_confidence_gate")]
    pub approval_confidence_gate: f64,

    #[serde(default = "default_max_publications_per_window")]
    pub max_publications_per_window: usize,

    #[serde(default = "default_publication_window_secs")]
    pub publication_window_secs: u64,

    #[serde(default = "default_generator_max_attempts")]
    pub generator_max_attempts: u32,

    /// First retry delay; doubles per attempt.
    #[serde(default = "default_generator_backoff_ms")]
    pub generator_backoff_ms: u64,

    /// Candidates held for validation in one cycle; extras are dropped.
    #[serde(default = "default_candidate_buffer")]
    pub candidate_buffer: usize,

    #[serde(default = "default_trigger_queue_capacity")]
    pub trigger_queue_capacity: usize,

    /// Enforcement feedback records held between cycles.
    #[serde(default = "default_feedback_buffer")]
    pub feedback_buffer: usize,

    /// Candidates waiting for a human; the oldest is dropped past this.
    #[serde(default = "default_max_pending_approvals")]
    pub max_pending_approvals: usize,

    /// Period of the proactive review timer; disabled when absent.
    #[serde(default)]
    pub proactive_review_secs: Option<u64>,
}

fn default_candidates_per_principle() -> usize {
    3
}

fn default_approval_confidence_gate() -> f64 {
    0.9
}

fn default_max_publications_per_window() -> usize {
    5
}

fn default_publication_window_secs() -> u64 {
    60
}

fn default_generator_max_attempts() -> u32 {
    3
}

fn default_generator_backoff_ms() -> u64 {
    50
}

fn default_candidate_buffer() -> usize {
    64
}

fn default_trigger_queue_capacity() -> usize {
    128
}

fn default_feedback_buffer() -> usize {
    1024
}

fn default_max_pending_approvals() -> usize {
    32
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            candidates_per_principle: default_candidates_per_principle(),
            approval_confidence_gate: default_approval_confidence_gate(),
            max_publications_per_window: default_max_publications_per_window(),
            publication_window_secs: default_publication_window_secs(),
            generator_max_attempts: default_generator_max_attempts(),
            generator_backoff_ms: default_generator_backoff_ms(),
            candidate_buffer: default_candidate_buffer(),
            trigger_queue_capacity: default_trigger_queue_capacity(),
            feedback_buffer: default_feedback_buffer(),
            max_pending_approvals: default_max_pending_approvals(),
            proactive_review_secs: None,
        }
    }
}

impl SynthesisConfig {
    pub fn publication_window(&self) -> Duration {
        Duration::from_secs(self.publication_window_secs)
    }

    pub fn generator_backoff(&self) -> Duration {
        Duration::from_millis(self.generator_backoff_ms)
    }

    pub fn proactive_review_interval(&self) -> Option<Duration> {
        self.proactive_review_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// Result of approving a pending candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalOutcome {
    Published {
        snapshot_version: u64,
        rule: OperationalRule,
    },
    /// Approved, but the publication rate limit is exhausted; staged.
    Deferred,
    /// Re-validation against the current snapshot failed.
    Rejected {
        tier: ValidationTier,
        reason: RejectionReason,
    },
}

/// A candidate waiting for validation, with whether a human already signed off.
#[derive(Debug, Clone)]
struct Queued {
    candidate: CandidateRule,
    approved: bool,
}

/// A candidate that passed validation, with the non-blocking conflicts it
/// would go live with.
struct Accepted {
    queued: Queued,
    rule: OperationalRule,
    warnings: Vec<ConflictReport>,
}

impl Accepted {
    fn split(accepted: Vec<Accepted>) -> (Vec<OperationalRule>, Vec<FlaggedConflict>) {
        let mut rules = Vec::with_capacity(accepted.len());
        let mut flagged = Vec::new();
        for item in accepted {
            flagged.extend(flag(&item.rule, item.warnings));
            rules.push(item.rule);
        }
        (rules, flagged)
    }
}

fn flag(rule: &OperationalRule, warnings: Vec<ConflictReport>) -> Vec<FlaggedConflict> {
    warnings
        .into_iter()
        .map(|report| FlaggedConflict {
            rule_id: rule.rule_id,
            rule_version: rule.version,
            report,
        })
        .collect()
}

struct Inner {
    registry: RuleRegistry,
    approvals: PendingApprovals,
    limiter: PublicationLimiter,
    /// Accepted but rate-limited; re-validated before they publish.
    staged: Vec<Queued>,
    #[cfg(test)]
    fail_next_publish: bool,
}

pub struct RuleSynthesizer {
    rules: Arc<ActiveRuleSet>,
    principles: Arc<dyn PrincipleStore>,
    pipeline: ValidationPipeline,
    generator: ResilientGenerator,
    feedback: Arc<FeedbackCollector>,
    events: EventDispatcher,
    config: SynthesisConfig,
    inner: Mutex<Inner>,
}

impl RuleSynthesizer {
    pub fn new(
        rules: Arc<ActiveRuleSet>,
        principles: Arc<dyn PrincipleStore>,
        pipeline: ValidationPipeline,
        generator: Arc<dyn Generator>,
        feedback: Arc<FeedbackCollector>,
        config: SynthesisConfig,
    ) -> Self {
        let generator = ResilientGenerator::new(generator)
            .with_max_attempts(config.generator_max_attempts)
            .with_backoff(config.generator_backoff());
        let limiter = PublicationLimiter::new(
            config.max_publications_per_window,
            config.publication_window(),
        );
        let max_pending_approvals = config.max_pending_approvals;
        Self {
            rules,
            principles,
            pipeline,
            generator,
            feedback,
            events: EventDispatcher::new(),
            config,
            inner: Mutex::new(Inner {
                registry: RuleRegistry::new(),
                approvals: PendingApprovals::with_capacity(max_pending_approvals),
                limiter,
                staged: Vec::new(),
                #[cfg(test)]
                fail_next_publish: false,
            }),
        }
    }

    /// Tried once after the primary generator's retries are used up.
    pub fn with_fallback_generator(mut self, fallback: Arc<dyn Generator>) -> Self {
        self.generator = self.generator.with_fallback(fallback);
        self
    }

    pub fn with_events(mut self, events: EventDispatcher) -> Self {
        self.events = events;
        self
    }

    /// Use a registry backed by a rule ledger.
    pub fn with_registry(mut self, registry: RuleRegistry) -> Self {
        self.inner.get_mut().registry = registry;
        self
    }

    pub fn rules(&self) -> &Arc<ActiveRuleSet> {
        &self.rules
    }

    pub fn feedback(&self) -> &Arc<FeedbackCollector> {
        &self.feedback
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    /// Run one full cycle. Never fails: problems end the cycle in REJECTED and
    /// are described in the report.
    pub async fn run_cycle(&self, trigger: Trigger) -> CycleReport {
        let mut report = CycleReport::new(trigger.kind());
        let mut inner = self.inner.lock().await;

        if let Err(e) = self.cycle(&mut inner, &trigger, &mut report).await {
            tracing::warn!(cycle = %report.cycle_id, error = %e, "synthesis cycle failed");
            report.abort(&e);
        }

        tracing::info!(
            cycle = %report.cycle_id,
            trigger = %trigger,
            state = %report.state,
            published = report.published.len(),
            pending = report.pending_approval.len(),
            rejected = report.rejections.len(),
            "synthesis cycle finished"
        );
        self.events.dispatch(&GovEvent::cycle_finished(
            report.cycle_id,
            &report.trigger,
            report.state,
        ));
        report
    }

    async fn cycle(
        &self,
        inner: &mut Inner,
        trigger: &Trigger,
        report: &mut CycleReport,
    ) -> Result<(), SynthesisError> {
        report.transition(SynthesisState::Interpreting)?;
        let principles = self.interpret(inner, trigger);
        report.principles = principles.iter().map(|p| p.id.clone()).collect();
        if principles.is_empty() {
            tracing::info!(trigger = %trigger, "no principles in scope");
            return report.transition(SynthesisState::Rejected);
        }

        report.transition(SynthesisState::Generating)?;
        let mut queue = self.generate(trigger, &principles, report).await;
        // Staged rules go after fresh candidates so a newer rule for the same
        // principles wins. They stay staged until the cycle settles them.
        queue.extend(inner.staged.iter().cloned());
        if queue.is_empty() {
            return report.transition(SynthesisState::Rejected);
        }

        report.transition(SynthesisState::Validating)?;
        let accepted = self.validate_queue(inner, queue, report).await?;

        if !accepted.is_empty() {
            if !inner.limiter.try_acquire() {
                tracing::warn!(
                    staged = accepted.len(),
                    "publication rate limit reached; staging accepted rules"
                );
                inner.staged = accepted.into_iter().map(|a| a.queued).collect();
                return report.transition(SynthesisState::Deferred);
            }
            let (rules, flagged) = Accepted::split(accepted);
            let snapshot = self.publish(inner, &rules, &flagged)?;
            inner.staged.clear();
            report.published_version = Some(snapshot.version());
            report.published = rules;
            report.conflict_warnings = flagged;
            return report.transition(SynthesisState::Published);
        }

        inner.staged.clear();
        if !report.pending_approval.is_empty() {
            return report.transition(SynthesisState::AwaitingApproval);
        }
        report.transition(SynthesisState::Rejected)
    }

    /// Active principles the trigger is about, sorted by id.
    fn interpret(&self, inner: &Inner, trigger: &Trigger) -> Vec<Principle> {
        let mut found = match trigger {
            Trigger::PrincipleUpdated { principle_ids } => self.lookup(principle_ids),
            Trigger::ContextEvent { scope, .. } => self.principles.list_active(scope),
            Trigger::Feedback { records } => {
                let ids = inner.registry.principles_for(records.iter().map(|r| r.rule_id));
                self.lookup(&ids)
            }
            Trigger::HumanDirective { principle_ids, .. } if !principle_ids.is_empty() => {
                self.lookup(principle_ids)
            }
            Trigger::HumanDirective { .. } | Trigger::ProactiveReview => {
                self.principles.list_active(&[])
            }
        };
        found.retain(|p| p.active);
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found.dedup_by(|a, b| a.id == b.id);
        found
    }

    fn lookup(&self, ids: &[String]) -> Vec<Principle> {
        ids.iter().filter_map(|id| self.principles.get(id)).collect()
    }

    async fn generate(
        &self,
        trigger: &Trigger,
        principles: &[Principle],
        report: &mut CycleReport,
    ) -> Vec<Queued> {
        let context = self.context_for(trigger);
        let feedback: &[FeedbackRecord] = match trigger {
            Trigger::Feedback { records } => records,
            _ => &[],
        };

        let mut queue = Vec::new();
        for principle in principles {
            let generated = self.generator.generate(principle, &context, feedback).await;
            let mut candidates = match generated {
                Ok(candidates) => candidates,
                Err(e) => {
                    report
                        .generator_failures
                        .push(format!("{}: {}", principle.id, e));
                    continue;
                }
            };
            candidates.truncate(self.config.candidates_per_principle);

            for candidate in candidates {
                if queue.len() >= self.config.candidate_buffer {
                    report.dropped_candidates += 1;
                    continue;
                }
                queue.push(Queued {
                    candidate,
                    approved: false,
                });
            }
        }

        if report.dropped_candidates > 0 {
            tracing::warn!(
                dropped = report.dropped_candidates,
                buffer = self.config.candidate_buffer,
                "candidate buffer full; dropping candidates"
            );
        }
        queue
    }

    fn context_for(&self, trigger: &Trigger) -> SynthesisContext {
        let mut context = SynthesisContext {
            trigger: trigger.kind().to_string(),
            candidates_wanted: self.config.candidates_per_principle,
            ..SynthesisContext::default()
        };
        match trigger {
            Trigger::ContextEvent { scope, attributes } => {
                context.scope = scope.clone();
                context.attributes = attributes.clone();
            }
            Trigger::HumanDirective { directive, .. } => {
                context.directive = Some(directive.clone());
            }
            _ => {}
        }
        context
    }

    /// Validate in order against a working snapshot that grows with each
    /// accepted rule, so two new candidates are also checked against each
    /// other. The first accepted candidate per derivation key wins.
    async fn validate_queue(
        &self,
        inner: &mut Inner,
        queue: Vec<Queued>,
        report: &mut CycleReport,
    ) -> Result<Vec<Accepted>, SynthesisError> {
        let mut working: RuleSetSnapshot = (*self.rules.current()).clone();
        let mut settled: BTreeSet<Vec<String>> = BTreeSet::new();
        let mut accepted = Vec::new();

        for queued in queue {
            let candidate = &queued.candidate;
            let key = candidate.derivation_key();
            if settled.contains(&key) {
                tracing::debug!(candidate = %candidate.candidate_id, "principles already covered");
                continue;
            }

            let (rule, warnings) = match self.pipeline.validate(candidate, &working).await {
                ValidationResult::Accepted { rule, warnings } => (rule, warnings),
                ValidationResult::Rejected { tier, reason } => {
                    self.feedback.record_rejection(tier);
                    self.events.dispatch(&GovEvent::candidate_rejected(
                        report.cycle_id,
                        candidate.candidate_id,
                        tier,
                        &reason,
                    ));
                    report.rejections.push(CandidateRejection {
                        candidate_id: candidate.candidate_id,
                        principle_ids: key,
                        tier,
                        reason,
                    });
                    continue;
                }
            };
            settled.insert(key);

            if !queued.approved {
                let principles = self.lookup(&candidate.derivation_key());
                let gate = self.config.approval_confidence_gate;
                if let Some(reason) = requires_approval(candidate, &principles, gate) {
                    tracing::info!(
                        candidate = %candidate.candidate_id,
                        reason = ?reason,
                        "candidate awaiting approval"
                    );
                    self.events.dispatch(&GovEvent::ApprovalRequested {
                        candidate_id: candidate.candidate_id,
                        principle_ids: candidate.derivation_key(),
                        reason: format!("{reason:?}"),
                        timestamp: chrono::Utc::now(),
                    });
                    report.pending_approval.push(candidate.candidate_id);
                    let displaced = inner.approvals.insert(PendingApproval {
                        candidate: candidate.clone(),
                        rule,
                        warnings,
                        reason,
                        requested_at: chrono::Utc::now(),
                    });
                    for old in displaced {
                        self.drop_pending(&old, candidate, report);
                    }
                    continue;
                }
            }

            working = working.merge(std::slice::from_ref(&rule))?;
            accepted.push(Accepted {
                queued,
                rule,
                warnings,
            });
        }

        Ok(accepted)
    }

    /// Tell listeners a pending request left the queue to make room for
    /// `newer`.
    fn drop_pending(
        &self,
        old: &PendingApproval,
        newer: &CandidateRule,
        report: &mut CycleReport,
    ) {
        let candidate_id = old.candidate.candidate_id;
        let reason = if old.candidate.derivation_key() == newer.derivation_key() {
            "superseded by a newer candidate"
        } else {
            "approval queue full"
        };
        tracing::info!(candidate = %candidate_id, reason, "pending candidate dropped");
        report.pending_approval.retain(|id| *id != candidate_id);
        self.events.dispatch(&GovEvent::ApprovalDenied {
            candidate_id,
            reason: reason.to_string(),
            timestamp: chrono::Utc::now(),
        });
    }

    /// Merge `rules` into the current snapshot and swap it in. Conflicts the
    /// rules go live with are written to the ledger and announced.
    fn publish(
        &self,
        inner: &mut Inner,
        rules: &[OperationalRule],
        flagged: &[FlaggedConflict],
    ) -> Result<Arc<RuleSetSnapshot>, SynthesisError> {
        let current = self.rules.current();
        let next = current.merge(rules)?;
        #[cfg(test)]
        if std::mem::take(&mut inner.fail_next_publish) {
            return Err(gov_rules::RuleSetError::StaleVersion {
                current: current.version() + 1,
                proposed: next.version(),
            }
            .into());
        }
        let published = self.rules.publish(next)?;
        inner.registry.record_published(&published, rules);
        self.events.dispatch(&GovEvent::snapshot_published(
            current.version(),
            published.version(),
            rules.iter().map(|r| r.rule_id).collect(),
        ));

        for conflict in flagged {
            tracing::warn!(
                rule = %conflict.rule_id,
                kind = %conflict.report.kind,
                severity = %conflict.report.severity,
                with = %conflict.report.conflicting_rule_id,
                "rule published with unresolved conflict"
            );
            inner.registry.record_conflict(conflict, published.version());
            self.events
                .dispatch(&GovEvent::conflict_flagged(conflict, published.version()));
        }
        Ok(published)
    }

    /// Publish a pending candidate after re-validating it against the current
    /// snapshot.
    pub async fn approve(&self, candidate_id: Uuid) -> Result<ApprovalOutcome, SynthesisError> {
        let mut inner = self.inner.lock().await;
        // The entry stays queued until the approval reaches an outcome.
        let pending = inner
            .approvals
            .get(candidate_id)
            .cloned()
            .ok_or(SynthesisError::UnknownCandidate(candidate_id))?;

        let current = self.rules.current();
        let (rule, warnings) = match self.pipeline.validate(&pending.candidate, &current).await {
            ValidationResult::Accepted { rule, warnings } => (rule, warnings),
            ValidationResult::Rejected { tier, reason } => {
                inner.approvals.take(candidate_id);
                self.feedback.record_rejection(tier);
                self.events.dispatch(&GovEvent::ApprovalDenied {
                    candidate_id,
                    reason: format!("re-validation failed at {tier}: {reason}"),
                    timestamp: chrono::Utc::now(),
                });
                return Ok(ApprovalOutcome::Rejected { tier, reason });
            }
        };

        if !inner.limiter.try_acquire() {
            tracing::warn!(candidate = %candidate_id, "approved rule staged by rate limit");
            inner.approvals.take(candidate_id);
            inner.staged.push(Queued {
                candidate: pending.candidate,
                approved: true,
            });
            return Ok(ApprovalOutcome::Deferred);
        }

        let flagged = flag(&rule, warnings);
        let snapshot = self.publish(&mut inner, std::slice::from_ref(&rule), &flagged)?;
        inner.approvals.take(candidate_id);
        tracing::info!(
            candidate = %candidate_id,
            rule = %rule.label(),
            version = snapshot.version(),
            "approved rule published"
        );
        Ok(ApprovalOutcome::Published {
            snapshot_version: snapshot.version(),
            rule,
        })
    }

    /// Discard a pending candidate.
    pub async fn reject(&self, candidate_id: Uuid, reason: &str) -> Result<(), SynthesisError> {
        let mut inner = self.inner.lock().await;
        inner
            .approvals
            .take(candidate_id)
            .ok_or(SynthesisError::UnknownCandidate(candidate_id))?;
        tracing::info!(candidate = %candidate_id, reason, "pending candidate rejected");
        self.events.dispatch(&GovEvent::ApprovalDenied {
            candidate_id,
            reason: reason.to_string(),
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    /// Publish staged rules if the rate limit allows. Returns the new snapshot
    /// version, or `None` when nothing was published.
    pub async fn flush_deferred(&self) -> Result<Option<u64>, SynthesisError> {
        let mut inner = self.inner.lock().await;
        if inner.staged.is_empty() || inner.limiter.remaining() == 0 {
            return Ok(None);
        }

        let staged = inner.staged.clone();
        let mut report = CycleReport::new("deferred");
        let accepted = self.validate_queue(&mut inner, staged, &mut report).await?;
        if accepted.is_empty() || !inner.limiter.try_acquire() {
            inner.staged = accepted.into_iter().map(|a| a.queued).collect();
            return Ok(None);
        }
        let (rules, flagged) = Accepted::split(accepted);
        let snapshot = self.publish(&mut inner, &rules, &flagged)?;
        inner.staged.clear();
        Ok(Some(snapshot.version()))
    }

    /// Take a rule out of enforcement. Bypasses the rate limit.
    pub async fn revoke(&self, rule_id: Uuid, reason: &str) -> Result<u64, SynthesisError> {
        let mut inner = self.inner.lock().await;
        let current = self.rules.current();
        if current.get(rule_id).is_none() {
            return Err(SynthesisError::UnknownRule(rule_id));
        }

        let published = self.rules.publish(current.without(rule_id)?)?;
        if let Some(revoked) = inner.registry.record_revoked(rule_id, &published, reason) {
            self.events.dispatch(&GovEvent::RuleRevoked {
                rule_id,
                rule_version: revoked.version,
                snapshot_version: published.version(),
                timestamp: chrono::Utc::now(),
            });
        }
        tracing::info!(rule_id = %rule_id, version = published.version(), reason, "rule revoked");
        Ok(published.version())
    }

    /// Re-publish a retained snapshot's rules as a new, higher version.
    /// Bypasses the rate limit.
    pub async fn rollback_to(&self, version: u64) -> Result<u64, SynthesisError> {
        let mut inner = self.inner.lock().await;
        let target = self
            .rules
            .snapshot(version)
            .ok_or(SynthesisError::UnknownSnapshot(version))?;
        let current = self.rules.version();

        let published = self.rules.publish(target.republish(current + 1)?)?;
        inner.registry.reconcile(&published, current);
        self.events.dispatch(&GovEvent::snapshot_published(
            current,
            published.version(),
            published.rules().iter().map(|r| r.rule_id).collect(),
        ));
        tracing::info!(
            from = current,
            restored = version,
            to = published.version(),
            "rolled back rule set"
        );
        Ok(published.version())
    }

    pub async fn pending(&self) -> Vec<PendingApproval> {
        self.inner.lock().await.approvals.list()
    }

    pub async fn staged_count(&self) -> usize {
        self.inner.lock().await.staged.len()
    }

    /// Every version of `rule_id`, oldest first.
    pub async fn history(&self, rule_id: Uuid) -> Vec<OperationalRule> {
        self.inner.lock().await.registry.history(rule_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gov_policy::mocks::{CountingParser, FixedScorer};
    use gov_policy::{ConflictAnalyzer, ConflictKind, ExprLanguage, Severity, ValidationConfig};
    use gov_rules::{InMemoryPrincipleStore, LedgerAction, RuleLedger};

    use crate::events::MemorySink;
    use crate::mocks::ScriptedGenerator;

    struct Harness {
        synth: RuleSynthesizer,
        generator: Arc<ScriptedGenerator>,
        parser: Arc<CountingParser>,
        semantic: Arc<FixedScorer>,
        events: Arc<MemorySink>,
    }

    fn harness(principles: Vec<Principle>, config: SynthesisConfig) -> Harness {
        let store: Arc<dyn PrincipleStore> =
            Arc::new(InMemoryPrincipleStore::with_principles(principles));
        let parser = Arc::new(CountingParser::new(ExprLanguage));
        let semantic = Arc::new(FixedScorer::new(0.95));
        let bias = Arc::new(FixedScorer::new(0.1));
        let conflicts = ConflictAnalyzer::new(Arc::new(ExprLanguage), Arc::new(ExprLanguage));
        let pipeline = ValidationPipeline::new(
            ValidationConfig::default(),
            store.clone(),
            parser.clone(),
            semantic.clone(),
            bias,
            conflicts,
        )
        .unwrap();

        let generator = Arc::new(ScriptedGenerator::new("scripted"));
        let events = Arc::new(MemorySink::new());
        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_sink(Box::new(events.clone()));

        let synth = RuleSynthesizer::new(
            Arc::new(ActiveRuleSet::new()),
            store,
            pipeline,
            generator.clone(),
            Arc::new(FeedbackCollector::new(16)),
            config,
        )
        .with_events(dispatcher);

        Harness {
            synth,
            generator,
            parser,
            semantic,
            events,
        }
    }

    fn limits() -> Principle {
        Principle::new("P-LIMIT", 10, "Cap transfers", "blocks large transfers")
            .with_scope(["payments.transfer"])
    }

    fn fast_config() -> SynthesisConfig {
        SynthesisConfig {
            generator_backoff_ms: 1,
            ..SynthesisConfig::default()
        }
    }

    #[tokio::test]
    async fn publishes_accepted_rule() {
        let h = harness(vec![limits()], fast_config());
        h.generator.script("P-LIMIT", &[("deny if amount > 10000", 0.95)]);

        let report = h.synth.run_cycle(Trigger::ProactiveReview).await;
        assert_eq!(report.state, SynthesisState::Published);
        assert_eq!(report.published_version, Some(1));
        assert_eq!(report.published.len(), 1);
        assert_eq!(report.published[0].priority, 10);
        assert_eq!(h.synth.rules().version(), 1);
        assert_eq!(
            h.events.event_types(),
            vec!["snapshot_published".to_string(), "cycle_finished".to_string()]
        );
    }

    #[tokio::test]
    async fn syntax_failure_rejects_cycle_without_scoring() {
        let h = harness(vec![limits()], fast_config());
        h.generator.script("P-LIMIT", &[("deny when amount is big", 0.95)]);

        let report = h.synth.run_cycle(Trigger::ProactiveReview).await;
        assert_eq!(report.state, SynthesisState::Rejected);
        assert_eq!(report.rejections.len(), 1);
        assert_eq!(report.rejections[0].tier, ValidationTier::Syntax);
        assert_eq!(h.parser.calls(), 1);
        assert_eq!(h.semantic.calls(), 0);
        assert_eq!(h.synth.rules().version(), 0);
        assert_eq!(
            h.synth.feedback().rejection_counts()[&ValidationTier::Syntax],
            1
        );
    }

    #[tokio::test]
    async fn first_accepted_candidate_per_principle_wins() {
        let h = harness(vec![limits()], fast_config());
        h.generator.script(
            "P-LIMIT",
            &[("deny if amount > 10000", 0.95), ("deny if amount > 5000", 0.95)],
        );

        let report = h.synth.run_cycle(Trigger::ProactiveReview).await;
        assert_eq!(report.published.len(), 1);
        assert_eq!(report.published[0].predicate_logic, "deny if amount > 10000");
        // The second candidate is never validated.
        assert_eq!(h.parser.calls(), 1);
    }

    #[tokio::test]
    async fn fan_out_is_truncated() {
        let config = SynthesisConfig {
            candidates_per_principle: 1,
            ..fast_config()
        };
        let h = harness(vec![limits()], config);
        h.generator.script(
            "P-LIMIT",
            &[("deny when", 0.95), ("deny if amount > 5000", 0.95)],
        );

        let report = h.synth.run_cycle(Trigger::ProactiveReview).await;
        assert_eq!(report.state, SynthesisState::Rejected);
        assert_eq!(h.parser.calls(), 1);
    }

    #[tokio::test]
    async fn low_confidence_waits_for_approval() {
        let h = harness(vec![limits()], fast_config());
        h.generator.script("P-LIMIT", &[("deny if amount > 10000", 0.5)]);

        let report = h.synth.run_cycle(Trigger::ProactiveReview).await;
        assert_eq!(report.state, SynthesisState::AwaitingApproval);
        assert_eq!(h.synth.rules().version(), 0);
        let pending = h.synth.pending().await;
        assert_eq!(pending.len(), 1);

        let outcome = h.synth.approve(report.pending_approval[0]).await.unwrap();
        assert!(matches!(
            outcome,
            ApprovalOutcome::Published {
                snapshot_version: 1,
                ..
            }
        ));
        assert!(h.synth.pending().await.is_empty());
        assert!(matches!(
            h.synth.approve(report.pending_approval[0]).await,
            Err(SynthesisError::UnknownCandidate(_))
        ));
    }

    #[tokio::test]
    async fn rejecting_pending_candidate_discards_it() {
        let h = harness(vec![limits().mark_critical()], fast_config());
        h.generator.script("P-LIMIT", &[("deny if amount > 10000", 0.99)]);

        let report = h.synth.run_cycle(Trigger::ProactiveReview).await;
        assert_eq!(report.state, SynthesisState::AwaitingApproval);
        h.synth
            .reject(report.pending_approval[0], "too strict")
            .await
            .unwrap();
        assert!(h.synth.pending().await.is_empty());
        assert!(h.events.event_types().contains(&"approval_denied".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_defers_until_window_passes() {
        let config = SynthesisConfig {
            max_publications_per_window: 1,
            publication_window_secs: 3600,
            ..fast_config()
        };
        let fraud = Principle::new("P-FRAUD", 5, "Flag odd transfers", "warns on odd transfers");
        let h = harness(vec![limits(), fraud], config);
        h.generator.script("P-LIMIT", &[("deny if amount > 10000", 0.95)]);

        let first = h.synth.run_cycle(Trigger::ProactiveReview).await;
        assert_eq!(first.state, SynthesisState::Published);

        h.generator.script("P-LIMIT", &[]);
        h.generator.script("P-FRAUD", &[("warn if amount > 1000", 0.95)]);
        let second = h.synth.run_cycle(Trigger::ProactiveReview).await;
        assert_eq!(second.state, SynthesisState::Deferred);
        assert_eq!(h.synth.staged_count().await, 1);
        assert_eq!(h.synth.rules().version(), 1);

        // Still inside the window.
        assert_eq!(h.synth.flush_deferred().await.unwrap(), None);
        assert_eq!(h.synth.staged_count().await, 1);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(h.synth.flush_deferred().await.unwrap(), Some(2));
        assert_eq!(h.synth.staged_count().await, 0);
        assert_eq!(h.synth.rules().current().len(), 2);
    }

    #[tokio::test]
    async fn generator_failure_ends_in_rejected() {
        let h = harness(vec![limits()], fast_config());
        let failing = Arc::new(ScriptedGenerator::new("down").fail_first(u32::MAX));
        let synth = RuleSynthesizer {
            generator: ResilientGenerator::new(failing).with_max_attempts(2),
            ..h.synth
        };

        let report = synth.run_cycle(Trigger::ProactiveReview).await;
        assert_eq!(report.state, SynthesisState::Rejected);
        assert_eq!(report.generator_failures.len(), 1);
        assert!(report.error.is_none());
    }

    #[tokio::test]
    async fn unknown_principles_reject_without_generating() {
        let h = harness(vec![limits()], fast_config());
        let report = h
            .synth
            .run_cycle(Trigger::PrincipleUpdated {
                principle_ids: vec!["P-MISSING".into()],
            })
            .await;
        assert_eq!(report.state, SynthesisState::Rejected);
        assert!(report.principles.is_empty());
        assert_eq!(h.generator.calls(), 0);
    }

    #[tokio::test]
    async fn revoke_and_rollback() {
        let h = harness(vec![limits()], fast_config());
        h.generator.script("P-LIMIT", &[("deny if amount > 10000", 0.95)]);
        let report = h.synth.run_cycle(Trigger::ProactiveReview).await;
        let rule_id = report.published[0].rule_id;

        let v2 = h.synth.revoke(rule_id, "policy change").await.unwrap();
        assert_eq!(v2, 2);
        assert!(h.synth.rules().current().is_empty());
        assert!(matches!(
            h.synth.revoke(rule_id, "again").await,
            Err(SynthesisError::UnknownRule(_))
        ));

        let v3 = h.synth.rollback_to(1).await.unwrap();
        assert_eq!(v3, 3);
        assert!(h.synth.rules().current().get(rule_id).is_some());
        let history = h.synth.history(rule_id).await;
        assert_eq!(history.len(), 1);
        assert!(history[0].is_active());

        assert!(matches!(
            h.synth.rollback_to(99).await,
            Err(SynthesisError::UnknownSnapshot(99))
        ));
    }

    #[tokio::test]
    async fn published_conflicts_are_recorded() {
        let cap = Principle::new("P-CAP", 5, "Cap transfers", "blocks large transfers");
        let flag = Principle::new("P-FLAG", 5, "Flag transfers", "warns on notable transfers");
        let h = harness(vec![cap, flag], fast_config());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.jsonl");
        let synth = h
            .synth
            .with_registry(RuleRegistry::with_ledger(RuleLedger::open(&path).unwrap()));
        h.generator.script("P-CAP", &[("deny if amount > 100", 0.95)]);
        h.generator.script("P-FLAG", &[("warn if amount > 50", 0.95)]);

        let report = synth.run_cycle(Trigger::ProactiveReview).await;
        assert_eq!(report.state, SynthesisState::Published);
        assert_eq!(report.published.len(), 2);
        assert_eq!(report.conflict_warnings.len(), 1);
        let flagged = &report.conflict_warnings[0];
        assert_eq!(flagged.report.kind, ConflictKind::AmbiguousPrecedence);
        assert_eq!(flagged.report.severity, Severity::Medium);
        let warned = report
            .published
            .iter()
            .find(|r| r.predicate_logic == "warn if amount > 50")
            .unwrap();
        assert_eq!(flagged.rule_id, warned.rule_id);

        assert!(h
            .events
            .event_types()
            .contains(&"conflict_flagged".to_string()));
        let entries = RuleLedger::read_all(&path).unwrap();
        let logged: Vec<_> = entries
            .iter()
            .filter(|e| e.action == LedgerAction::ConflictFlagged)
            .collect();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].rule_id, Some(warned.rule_id));
        assert_eq!(logged[0].snapshot_version, Some(1));
        RuleLedger::verify_chain(&path).unwrap();
    }

    #[tokio::test]
    async fn newer_candidate_replaces_pending_request() {
        let h = harness(vec![limits().mark_critical()], fast_config());
        let mut latest = None;
        for limit in [10000, 20000, 30000] {
            let predicate = format!("deny if amount > {limit}");
            h.generator.script("P-LIMIT", &[(predicate.as_str(), 0.99)]);
            let report = h.synth.run_cycle(Trigger::ProactiveReview).await;
            assert_eq!(report.state, SynthesisState::AwaitingApproval);
            latest = report.pending_approval.first().copied();
        }

        let pending = h.synth.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(Some(pending[0].candidate.candidate_id), latest);
        assert_eq!(pending[0].candidate.predicate_logic, "deny if amount > 30000");
        let denied = h
            .events
            .event_types()
            .into_iter()
            .filter(|t| t == "approval_denied")
            .count();
        assert_eq!(denied, 2);
    }

    #[tokio::test]
    async fn failed_publish_keeps_pending_approval() {
        let h = harness(vec![limits()], fast_config());
        h.generator.script("P-LIMIT", &[("deny if amount > 10000", 0.5)]);
        let report = h.synth.run_cycle(Trigger::ProactiveReview).await;
        let id = report.pending_approval[0];

        h.synth.inner.lock().await.fail_next_publish = true;
        assert!(matches!(
            h.synth.approve(id).await,
            Err(SynthesisError::RuleSet(_))
        ));
        assert_eq!(h.synth.pending().await.len(), 1);
        assert_eq!(h.synth.rules().version(), 0);

        let outcome = h.synth.approve(id).await.unwrap();
        assert!(matches!(
            outcome,
            ApprovalOutcome::Published {
                snapshot_version: 1,
                ..
            }
        ));
        assert!(h.synth.pending().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_publish_keeps_staged_rules() {
        let config = SynthesisConfig {
            max_publications_per_window: 1,
            publication_window_secs: 60,
            ..fast_config()
        };
        let fraud = Principle::new("P-FRAUD", 5, "Flag odd transfers", "warns on odd transfers");
        let h = harness(vec![limits(), fraud], config);
        h.generator.script("P-LIMIT", &[("deny if amount > 10000", 0.95)]);
        h.synth.run_cycle(Trigger::ProactiveReview).await;

        h.generator.script("P-LIMIT", &[]);
        h.generator.script("P-FRAUD", &[("warn if amount > 1000", 0.95)]);
        let deferred = h.synth.run_cycle(Trigger::ProactiveReview).await;
        assert_eq!(deferred.state, SynthesisState::Deferred);

        tokio::time::advance(Duration::from_secs(60)).await;
        h.synth.inner.lock().await.fail_next_publish = true;
        assert!(h.synth.flush_deferred().await.is_err());
        assert_eq!(h.synth.staged_count().await, 1);

        // A failed cycle leaves them staged too.
        tokio::time::advance(Duration::from_secs(60)).await;
        h.generator.script("P-FRAUD", &[]);
        h.synth.inner.lock().await.fail_next_publish = true;
        let failed = h.synth.run_cycle(Trigger::ProactiveReview).await;
        assert!(failed.error.is_some());
        assert_eq!(h.synth.staged_count().await, 1);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(h.synth.flush_deferred().await.unwrap(), Some(2));
        assert_eq!(h.synth.staged_count().await, 0);
    }
}
