// generator.rs — Candidate generation behind a retrying, falling-back wrapper.
//
// The generator itself (typically a generative text model) is external and
// non-deterministic. Everything downstream of it is deterministic, so all of
// the failure handling for generation lives here.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use gov_rules::{CandidateRule, FeedbackRecord, Principle};

use crate::error::GeneratorError;

/// What the generator is told about the cycle it is serving.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SynthesisContext {
    pub trigger: String,
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directive: Option<String>,
    /// How many candidates per principle the cycle will keep.
    pub candidates_wanted: usize,
}

/// Produces candidate rules for one principle.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Used in logs and error messages.
    fn name(&self) -> &str;

    async fn generate(
        &self,
        principle: &Principle,
        context: &SynthesisContext,
        feedback: &[FeedbackRecord],
    ) -> Result<Vec<CandidateRule>, GeneratorError>;
}

/// Retries a primary generator with exponential backoff, then tries an
/// optional fallback once.
pub struct ResilientGenerator {
    primary: Arc<dyn Generator>,
    fallback: Option<Arc<dyn Generator>>,
    max_attempts: u32,
    backoff: Duration,
}

impl ResilientGenerator {
    pub fn new(primary: Arc<dyn Generator>) -> Self {
        Self {
            primary,
            fallback: None,
            max_attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn Generator>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Attempts against the primary. Zero is treated as one.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Delay before the first retry; doubles after each failure.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub async fn generate(
        &self,
        principle: &Principle,
        context: &SynthesisContext,
        feedback: &[FeedbackRecord],
    ) -> Result<Vec<CandidateRule>, GeneratorError> {
        let mut delay = self.backoff;
        let mut attempts = 0;
        let mut last = String::new();

        for attempt in 1..=self.max_attempts {
            attempts += 1;
            match self.primary.generate(principle, context, feedback).await {
                Ok(candidates) => return Ok(candidates),
                Err(e) => {
                    tracing::warn!(
                        generator = self.primary.name(),
                        principle_id = %principle.id,
                        attempt,
                        error = %e,
                        "generator attempt failed"
                    );
                    last = e.to_string();
                }
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }

        if let Some(fallback) = &self.fallback {
            attempts += 1;
            match fallback.generate(principle, context, feedback).await {
                Ok(candidates) => {
                    tracing::info!(
                        generator = fallback.name(),
                        principle_id = %principle.id,
                        "fallback generator succeeded"
                    );
                    return Ok(candidates);
                }
                Err(e) => {
                    tracing::warn!(
                        generator = fallback.name(),
                        principle_id = %principle.id,
                        error = %e,
                        "fallback generator failed"
                    );
                    last = e.to_string();
                }
            }
        }

        Err(GeneratorError::Exhausted { attempts, last })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::ScriptedGenerator;

    fn principle() -> Principle {
        Principle::new("P1", 5, "Do no harm", "blocks harmful actions")
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds() {
        let primary = Arc::new(
            ScriptedGenerator::new("primary")
                .with_candidate("P1", "deny if amount > 10", 0.95)
                .fail_first(2),
        );
        let generator = ResilientGenerator::new(primary.clone())
            .with_max_attempts(3)
            .with_backoff(Duration::from_millis(10));

        let started = tokio::time::Instant::now();
        let out = generator
            .generate(&principle(), &SynthesisContext::default(), &[])
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(primary.calls(), 3);
        // 10ms then 20ms of backoff.
        assert_eq!(started.elapsed(), Duration::from_millis(30));
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_after_primary_exhausted() {
        let primary = Arc::new(ScriptedGenerator::new("primary").fail_first(u32::MAX));
        let fallback = Arc::new(
            ScriptedGenerator::new("fallback").with_candidate("P1", "warn if amount > 1", 0.9),
        );
        let generator = ResilientGenerator::new(primary.clone())
            .with_fallback(fallback.clone())
            .with_max_attempts(2);

        let out = generator
            .generate(&principle(), &SynthesisContext::default(), &[])
            .await
            .unwrap();
        assert_eq!(out[0].predicate_logic, "warn if amount > 1");
        assert_eq!(primary.calls(), 2);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn total_failure_is_exhausted() {
        let primary = Arc::new(ScriptedGenerator::new("primary").fail_first(u32::MAX));
        let fallback = Arc::new(ScriptedGenerator::new("fallback").fail_first(u32::MAX));
        let generator = ResilientGenerator::new(primary)
            .with_fallback(fallback)
            .with_max_attempts(2);

        let err = generator
            .generate(&principle(), &SynthesisContext::default(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, GeneratorError::Exhausted { attempts: 3, .. }));
    }
}
