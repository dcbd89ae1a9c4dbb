// principle.rs — Governance principles and the read-only Principle Store.
//
// Principles are the slow-moving normative inputs to rule synthesis. They are
// referenced by rules, never mutated by them. Amendments happen outside this
// workspace; the store here only offers the read API the synthesizer needs.
//
// Principles can be loaded from a directory of YAML files, one per principle:
//
// ```yaml
// id: "financial-prudence"
// priority: 10
// scope: ["payments", "payments.transfer"]
// normative_text: "Large transfers require additional scrutiny."
// validation_criteria: "Blocks transfers above the large-transfer threshold."
// critical: true
// ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::RuleSetError;

/// A versioned governance principle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principle {
    /// Stable identifier referenced by rules.
    pub id: String,

    /// Ordered priority; higher wins.
    pub priority: i64,

    /// Context tags this principle applies to.
    #[serde(default)]
    pub scope: BTreeSet<String>,

    /// The normative statement itself.
    pub normative_text: String,

    /// Natural-language test description used for semantic alignment scoring.
    pub validation_criteria: String,

    #[serde(default = "default_active")]
    pub active: bool,

    /// Rules derived from a critical principle always need human sign-off.
    #[serde(default)]
    pub critical: bool,
}

fn default_active() -> bool {
    true
}

impl Principle {
    pub fn new(
        id: impl Into<String>,
        priority: i64,
        normative_text: impl Into<String>,
        validation_criteria: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            priority,
            scope: BTreeSet::new(),
            normative_text: normative_text.into(),
            validation_criteria: validation_criteria.into(),
            active: true,
            critical: false,
        }
    }

    pub fn with_scope<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn mark_critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Whether any of this principle's scope tags matches any requested pattern.
    ///
    /// An empty request matches every principle. Patterns are globs, so
    /// `payments.*` matches a principle tagged `payments.transfer`.
    pub fn in_scope(&self, requested: &[String]) -> bool {
        if requested.is_empty() {
            return true;
        }
        requested
            .iter()
            .any(|pattern| self.scope.iter().any(|tag| tag_matches(pattern, tag)))
    }
}

fn tag_matches(pattern: &str, tag: &str) -> bool {
    match glob::Pattern::new(pattern) {
        Ok(p) => p.matches(tag),
        Err(_) => pattern == tag,
    }
}

/// Read API over governance principles.
pub trait PrincipleStore: Send + Sync {
    /// Look up a principle by id, active or not.
    fn get(&self, principle_id: &str) -> Option<Principle>;

    /// Active principles matching any of the scope patterns, highest priority
    /// first (ties broken by id so the order is stable).
    fn list_active(&self, scope: &[String]) -> Vec<Principle>;
}

/// In-memory principle store, optionally loaded from a YAML directory.
#[derive(Debug, Default)]
pub struct InMemoryPrincipleStore {
    principles: RwLock<BTreeMap<String, Principle>>,
}

impl InMemoryPrincipleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_principles(principles: impl IntoIterator<Item = Principle>) -> Self {
        let store = Self::new();
        for principle in principles {
            store.insert(principle);
        }
        store
    }

    /// Insert or replace a principle (used by the amendment process and tests).
    pub fn insert(&self, principle: Principle) {
        self.principles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(principle.id.clone(), principle);
    }

    /// Load every `*.yaml` / `*.yml` file in `dir` as one principle.
    pub fn load_dir(dir: &Path) -> Result<Self, RuleSetError> {
        let entries = fs::read_dir(dir).map_err(|source| RuleSetError::IoError {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| RuleSetError::IoError {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path
                .extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml")
            {
                paths.push(path);
            }
        }
        paths.sort();

        let mut loaded = BTreeMap::new();
        for path in paths {
            let data = fs::read_to_string(&path).map_err(|source| RuleSetError::IoError {
                path: path.clone(),
                source,
            })?;
            let principle: Principle = serde_yaml::from_str(&data)
                .map_err(|source| RuleSetError::PrincipleParse {
                    path: path.clone(),
                    source,
                })?;
            if loaded.contains_key(&principle.id) {
                return Err(RuleSetError::DuplicatePrinciple(principle.id));
            }
            loaded.insert(principle.id.clone(), principle);
        }

        tracing::info!(count = loaded.len(), dir = %dir.display(), "loaded principles");
        Ok(Self {
            principles: RwLock::new(loaded),
        })
    }

    pub fn len(&self) -> usize {
        self.principles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PrincipleStore for InMemoryPrincipleStore {
    fn get(&self, principle_id: &str) -> Option<Principle> {
        self.principles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(principle_id)
            .cloned()
    }

    fn list_active(&self, scope: &[String]) -> Vec<Principle> {
        let mut active: Vec<Principle> = self
            .principles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|p| p.active && p.in_scope(scope))
            .cloned()
            .collect();
        active.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> InMemoryPrincipleStore {
        let mut retired = Principle::new("retired", 50, "old", "old").with_scope(["payments"]);
        retired.active = false;
        InMemoryPrincipleStore::with_principles([
            Principle::new("prudence", 10, "Be prudent", "Blocks large transfers")
                .with_scope(["payments.transfer"]),
            Principle::new("privacy", 20, "Protect data", "Blocks PII export")
                .with_scope(["data.export"]),
            Principle::new("fairness", 10, "Be fair", "No disparate treatment")
                .with_scope(["payments.lending"]),
            retired,
        ])
    }

    #[test]
    fn list_active_filters_inactive_and_sorts_by_priority() {
        let active = store().list_active(&[]);
        let ids: Vec<&str> = active.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["privacy", "fairness", "prudence"]);
    }

    #[test]
    fn list_active_matches_scope_globs() {
        let payments = store().list_active(&["payments.*".to_string()]);
        let ids: Vec<&str> = payments.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["fairness", "prudence"]);

        let exact = store().list_active(&["data.export".to_string()]);
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].id, "privacy");
    }

    #[test]
    fn get_returns_inactive_principles_too() {
        let retired = store().get("retired").unwrap();
        assert!(!retired.active);
        assert!(store().get("missing").is_none());
    }

    #[test]
    fn load_dir_reads_yaml_files() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("prudence.yaml"),
            "id: prudence\npriority: 10\nscope: [payments]\nnormative_text: Be prudent\n\
             validation_criteria: Blocks large transfers\ncritical: true\n",
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = InMemoryPrincipleStore::load_dir(dir.path()).unwrap();
        assert_eq!(store.len(), 1);
        let prudence = store.get("prudence").unwrap();
        assert!(prudence.critical);
        assert!(prudence.active);
    }

    #[test]
    fn load_dir_rejects_duplicate_ids() {
        let dir = tempdir().unwrap();
        let body = "id: same\npriority: 1\nnormative_text: a\nvalidation_criteria: b\n";
        fs::write(dir.path().join("a.yaml"), body).unwrap();
        fs::write(dir.path().join("b.yml"), body).unwrap();

        match InMemoryPrincipleStore::load_dir(dir.path()) {
            Err(RuleSetError::DuplicatePrinciple(id)) => assert_eq!(id, "same"),
            other => panic!("expected DuplicatePrinciple, got {:?}", other.map(|s| s.len())),
        }
    }
}
