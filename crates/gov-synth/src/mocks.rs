// mocks.rs — Scripted generators for tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use gov_rules::{CandidateRule, FeedbackRecord, Principle};

use crate::error::GeneratorError;
use crate::generator::{Generator, SynthesisContext};

/// Returns canned `(predicate, confidence)` pairs per principle id.
///
/// The first `fail_first` calls fail with `Unavailable`. Principles with no
/// script produce no candidates.
pub struct ScriptedGenerator {
    name: String,
    scripts: Mutex<BTreeMap<String, Vec<(String, f64)>>>,
    fail_first: AtomicU32,
    calls: AtomicU32,
}

impl ScriptedGenerator {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            scripts: Mutex::new(BTreeMap::new()),
            fail_first: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_candidate(self, principle_id: &str, predicate: &str, confidence: f64) -> Self {
        self.push_candidate(principle_id, predicate, confidence);
        self
    }

    pub fn fail_first(self, failures: u32) -> Self {
        self.fail_first.store(failures, Ordering::SeqCst);
        self
    }

    pub fn push_candidate(&self, principle_id: &str, predicate: &str, confidence: f64) {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(principle_id.to_string())
            .or_default()
            .push((predicate.to_string(), confidence));
    }

    /// Replace the script for one principle.
    pub fn script(&self, principle_id: &str, candidates: &[(&str, f64)]) {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                principle_id.to_string(),
                candidates
                    .iter()
                    .map(|(p, c)| (p.to_string(), *c))
                    .collect(),
            );
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        principle: &Principle,
        _context: &SynthesisContext,
        _feedback: &[FeedbackRecord],
    ) -> Result<Vec<CandidateRule>, GeneratorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_first.load(Ordering::SeqCst) {
            return Err(GeneratorError::Unavailable {
                generator: self.name.clone(),
                message: format!("scripted failure {call}"),
            });
        }

        let scripts = self.scripts.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(script) = scripts.get(&principle.id) else {
            return Ok(Vec::new());
        };
        Ok(script
            .iter()
            .map(|(predicate, confidence)| {
                CandidateRule::new(
                    vec![principle.id.clone()],
                    predicate.clone(),
                    principle.normative_text.clone(),
                    *confidence,
                )
                .with_tags(principle.scope.iter().cloned())
            })
            .collect())
    }
}
