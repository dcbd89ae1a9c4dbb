// mocks.rs — Test doubles for the external collaborators.
//
// Used by this crate's tests and by downstream crates that need a pipeline or
// engine without real scorers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use gov_rules::{CandidateRule, Proposal, Verdict};

use crate::error::{ParseError, PolicyError};
use crate::traits::{BiasScorer, PredicateEvaluator, RuleParser, SemanticScorer};

/// Delegates to a real parser and counts calls.
pub struct CountingParser {
    inner: Box<dyn RuleParser>,
    calls: AtomicUsize,
}

impl CountingParser {
    pub fn new(inner: impl RuleParser + 'static) -> Self {
        Self {
            inner: Box::new(inner),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RuleParser for CountingParser {
    fn parse(&self, predicate_logic: &str) -> Result<(), ParseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.parse(predicate_logic)
    }
}

/// Returns a fixed score for every candidate. Usable as either scorer.
pub struct FixedScorer {
    score: Mutex<f64>,
    failure: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl FixedScorer {
    pub fn new(score: f64) -> Self {
        Self {
            score: Mutex::new(score),
            failure: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_score(&self, score: f64) {
        *self.score.lock().unwrap_or_else(PoisonError::into_inner) = score;
    }

    /// Make every subsequent call fail with `message`.
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn respond(&self, collaborator: &str) -> Result<f64, PolicyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Err(PolicyError::collaborator(collaborator, message.clone()));
        }
        Ok(*self.score.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[async_trait]
impl SemanticScorer for FixedScorer {
    async fn score(&self, _candidate: &CandidateRule, _criteria: &str) -> Result<f64, PolicyError> {
        self.respond("semantic scorer")
    }
}

#[async_trait]
impl BiasScorer for FixedScorer {
    async fn score(&self, _candidate: &CandidateRule) -> Result<f64, PolicyError> {
        self.respond("bias scorer")
    }
}

enum Fault {
    Delay(Duration),
    Error(String),
}

/// Wraps an evaluator and injects a delay or an error for predicates that
/// contain a marker substring.
pub struct FaultInjectingEvaluator {
    inner: Arc<dyn PredicateEvaluator>,
    marker: String,
    fault: Fault,
    calls: AtomicUsize,
}

impl FaultInjectingEvaluator {
    pub fn delaying(inner: Arc<dyn PredicateEvaluator>, marker: &str, delay: Duration) -> Self {
        Self::with_fault(inner, marker, Fault::Delay(delay))
    }

    pub fn failing(inner: Arc<dyn PredicateEvaluator>, marker: &str, message: &str) -> Self {
        Self::with_fault(inner, marker, Fault::Error(message.to_string()))
    }

    fn with_fault(inner: Arc<dyn PredicateEvaluator>, marker: &str, fault: Fault) -> Self {
        Self {
            inner,
            marker: marker.to_string(),
            fault,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PredicateEvaluator for FaultInjectingEvaluator {
    async fn evaluate(
        &self,
        proposal: &Proposal,
        predicate_logic: &str,
    ) -> Result<Verdict, PolicyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if predicate_logic.contains(&self.marker) {
            match &self.fault {
                Fault::Delay(delay) => tokio::time::sleep(*delay).await,
                Fault::Error(message) => {
                    return Err(PolicyError::collaborator("predicate evaluator", message.clone()))
                }
            }
        }
        self.inner.evaluate(proposal, predicate_logic).await
    }
}
