// service.rs — The governance service: the operations the rest of the platform calls.
//
// Wires the principle store, validation pipeline, synthesizer and decision
// engine around one shared Active Rule Set. The engine only reads it; the
// synthesizer is its only writer. `evaluate` never waits on synthesis.

use std::future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use uuid::Uuid;

use gov_policy::{
    BiasScorer, ConflictAnalyzer, DecisionEngine, ExprLanguage, MetricsSnapshot,
    PredicateEvaluator, ProbeSource, RuleParser, SemanticScorer, ValidationPipeline,
};
use gov_rules::{
    ActiveRuleSet, DecisionRecord, InMemoryPrincipleStore, OperationalRule, PrincipleStore,
    Proposal, RuleLedger,
};
use gov_synth::{
    trigger_queue, ApprovalOutcome, CycleReport, EventDispatcher, EventSink, FeedbackCollector,
    FeedbackStats, Generator, LogSink, PendingApproval, RuleRegistry, RuleSynthesizer, Trigger,
    TriggerSender,
};

use crate::config::GovernanceConfig;
use crate::error::ServiceError;

/// The external services the governance loop depends on.
pub struct Collaborators {
    pub parser: Arc<dyn RuleParser>,
    pub evaluator: Arc<dyn PredicateEvaluator>,
    pub probes: Arc<dyn ProbeSource>,
    pub semantic: Arc<dyn SemanticScorer>,
    pub bias: Arc<dyn BiasScorer>,
    pub generator: Arc<dyn Generator>,
    pub fallback_generator: Option<Arc<dyn Generator>>,
    pub event_sinks: Vec<Box<dyn EventSink>>,
}

impl Collaborators {
    /// Use the built-in rule-expression language for parsing, evaluation and
    /// probe synthesis.
    pub fn with_expr_language(
        semantic: Arc<dyn SemanticScorer>,
        bias: Arc<dyn BiasScorer>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            parser: Arc::new(ExprLanguage),
            evaluator: Arc::new(ExprLanguage),
            probes: Arc::new(ExprLanguage),
            semantic,
            bias,
            generator,
            fallback_generator: None,
            event_sinks: Vec::new(),
        }
    }

    pub fn with_fallback_generator(mut self, fallback: Arc<dyn Generator>) -> Self {
        self.fallback_generator = Some(fallback);
        self
    }

    pub fn with_event_sink(mut self, sink: Box<dyn EventSink>) -> Self {
        self.event_sinks.push(sink);
        self
    }
}

pub struct GovernanceService {
    config: GovernanceConfig,
    rules: Arc<ActiveRuleSet>,
    engine: Arc<DecisionEngine>,
    synthesizer: Arc<RuleSynthesizer>,
    feedback: Arc<FeedbackCollector>,
}

impl GovernanceService {
    /// Build the service, loading principles from `storage.principles_dir`
    /// when it is configured.
    pub fn open(
        config: GovernanceConfig,
        collaborators: Collaborators,
    ) -> Result<Self, ServiceError> {
        let principles = match &config.storage.principles_dir {
            Some(dir) => InMemoryPrincipleStore::load_dir(dir)?,
            None => InMemoryPrincipleStore::new(),
        };
        Self::new(config, Arc::new(principles), collaborators)
    }

    pub fn new(
        config: GovernanceConfig,
        principles: Arc<dyn PrincipleStore>,
        collaborators: Collaborators,
    ) -> Result<Self, ServiceError> {
        let rules = Arc::new(ActiveRuleSet::with_retention(
            config.storage.snapshot_retention,
        ));
        let feedback = Arc::new(FeedbackCollector::new(config.synthesis.feedback_buffer));

        let conflicts =
            ConflictAnalyzer::new(collaborators.evaluator.clone(), collaborators.probes.clone());
        let pipeline = ValidationPipeline::new(
            config.validation.clone(),
            principles.clone(),
            collaborators.parser.clone(),
            collaborators.semantic.clone(),
            collaborators.bias.clone(),
            conflicts,
        )?;

        let mut events = EventDispatcher::new();
        if let Some(path) = &config.storage.event_log_path {
            events.add_sink(Box::new(LogSink::new(path)));
        }
        for sink in collaborators.event_sinks {
            events.add_sink(sink);
        }

        let registry = match &config.storage.ledger_path {
            Some(path) => RuleRegistry::with_ledger(RuleLedger::open(path)?),
            None => RuleRegistry::new(),
        };

        let mut synthesizer = RuleSynthesizer::new(
            rules.clone(),
            principles,
            pipeline,
            collaborators.generator,
            feedback.clone(),
            config.synthesis.clone(),
        )
        .with_events(events)
        .with_registry(registry);
        if let Some(fallback) = collaborators.fallback_generator {
            synthesizer = synthesizer.with_fallback_generator(fallback);
        }

        let engine = DecisionEngine::new(
            rules.clone(),
            collaborators.evaluator,
            config.engine.clone(),
        )?
        .with_feedback(feedback.clone());

        Ok(Self {
            config,
            rules,
            engine: Arc::new(engine),
            synthesizer: Arc::new(synthesizer),
            feedback,
        })
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    /// Run a synthesis cycle now, outside the trigger queue.
    pub async fn synthesize_now(&self, trigger: Trigger) -> CycleReport {
        self.synthesizer.run_cycle(trigger).await
    }

    /// The enforcement call. Always returns a decision.
    pub async fn evaluate(&self, proposal: &Proposal) -> DecisionRecord {
        self.engine.evaluate(proposal).await
    }

    pub fn snapshot_version(&self) -> u64 {
        self.rules.version()
    }

    /// Rules in the current snapshot, in evaluation order.
    pub fn list_active_rules(&self) -> Vec<OperationalRule> {
        self.rules.current().rules().to_vec()
    }

    pub async fn pending_approvals(&self) -> Vec<PendingApproval> {
        self.synthesizer.pending().await
    }

    pub async fn approve(&self, candidate_id: Uuid) -> Result<ApprovalOutcome, ServiceError> {
        Ok(self.synthesizer.approve(candidate_id).await?)
    }

    pub async fn reject(&self, candidate_id: Uuid, reason: &str) -> Result<(), ServiceError> {
        Ok(self.synthesizer.reject(candidate_id, reason).await?)
    }

    /// Returns the snapshot version without the rule.
    pub async fn revoke_rule(&self, rule_id: Uuid, reason: &str) -> Result<u64, ServiceError> {
        Ok(self.synthesizer.revoke(rule_id, reason).await?)
    }

    /// Returns the version the old rule set was republished under.
    pub async fn rollback_to(&self, version: u64) -> Result<u64, ServiceError> {
        Ok(self.synthesizer.rollback_to(version).await?)
    }

    /// A human reports a rule's decision as wrong; picked up by the next
    /// feedback-driven cycle.
    pub fn dispute(&self, rule_id: Uuid, note: &str) {
        self.feedback.dispute(rule_id, note);
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.engine.metrics()
    }

    /// Engine metrics in prometheus form, for a scrape endpoint.
    pub fn metrics_registry(&self) -> &prometheus::Registry {
        self.engine.metrics_registry()
    }

    pub fn feedback_stats(&self) -> FeedbackStats {
        self.feedback.stats()
    }

    pub async fn rule_history(&self, rule_id: Uuid) -> Vec<OperationalRule> {
        self.synthesizer.history(rule_id).await
    }

    /// Start the background synthesis loop.
    ///
    /// Queued triggers run one cycle each, in order. When
    /// `synthesis.proactive_review_secs` is set, every tick also publishes
    /// rate-limited rules if the window allows, turns buffered feedback into a
    /// feedback cycle, and runs a proactive review. The loop ends when every
    /// `TriggerSender` is dropped.
    pub fn spawn_trigger_loop(&self) -> (TriggerSender, JoinHandle<()>) {
        let (sender, receiver) = trigger_queue(self.config.synthesis.trigger_queue_capacity);
        let ticker = self.config.synthesis.proactive_review_interval().map(|period| {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let handle = tokio::spawn(trigger_loop(
            self.synthesizer.clone(),
            self.feedback.clone(),
            receiver,
            ticker,
        ));
        (sender, handle)
    }
}

async fn trigger_loop(
    synthesizer: Arc<RuleSynthesizer>,
    feedback: Arc<FeedbackCollector>,
    mut receiver: mpsc::Receiver<Trigger>,
    mut ticker: Option<Interval>,
) {
    tracing::info!(proactive = ticker.is_some(), "synthesis trigger loop started");
    loop {
        tokio::select! {
            trigger = receiver.recv() => match trigger {
                Some(trigger) => {
                    synthesizer.run_cycle(trigger).await;
                }
                None => break,
            },
            _ = tick(&mut ticker) => {
                review(&synthesizer, &feedback).await;
            }
        }
    }
    tracing::info!("synthesis trigger loop stopped");
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => future::pending::<()>().await,
    }
}

async fn review(synthesizer: &RuleSynthesizer, feedback: &FeedbackCollector) {
    match synthesizer.flush_deferred().await {
        Ok(Some(version)) => tracing::info!(version, "published deferred rules"),
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "failed to publish deferred rules"),
    }

    let records = feedback.drain();
    if !records.is_empty() {
        synthesizer.run_cycle(Trigger::Feedback { records }).await;
    }
    synthesizer.run_cycle(Trigger::ProactiveReview).await;
}
