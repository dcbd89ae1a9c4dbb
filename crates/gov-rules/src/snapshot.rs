// snapshot.rs — Immutable, versioned rule-set snapshots.
//
// A snapshot is the unit the decision engine reads. Construction sorts the
// rules into evaluation order (priority descending, then most recent first)
// and runs the consistency check, so every snapshot built through this API is
// servable. Snapshots that arrive through deserialization are checked again
// by `ActiveRuleSet::publish` before they can become current.
//
// New snapshots are derived copy-on-write from the current one: `merge`
// replaces superseded rules and appends new ones, `without` drops a rule.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RuleSetError;
use crate::rule::OperationalRule;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleSetSnapshot {
    version: u64,
    rules: Vec<OperationalRule>,
    created_at: DateTime<Utc>,
}

/// Evaluation order: higher priority first, then newer first, then rule id so
/// the order is total.
fn evaluation_order(a: &OperationalRule, b: &OperationalRule) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| a.rule_id.cmp(&b.rule_id))
}

impl RuleSetSnapshot {
    /// Build and verify a snapshot. Rules are sorted into evaluation order.
    pub fn new(version: u64, mut rules: Vec<OperationalRule>) -> Result<Self, RuleSetError> {
        rules.sort_by(evaluation_order);
        let snapshot = Self {
            version,
            rules,
            created_at: Utc::now(),
        };
        snapshot.verify()?;
        Ok(snapshot)
    }

    /// The version-0 snapshot with no rules.
    pub fn empty() -> Self {
        Self {
            version: 0,
            rules: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Active rules in evaluation order.
    pub fn rules(&self) -> &[OperationalRule] {
        &self.rules
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, rule_id: Uuid) -> Option<&OperationalRule> {
        self.rules.iter().find(|r| r.rule_id == rule_id)
    }

    /// The active rule derived from exactly this set of principles, if any.
    pub fn find_by_derivation(&self, key: &[String]) -> Option<&OperationalRule> {
        self.rules.iter().find(|r| r.derivation_key() == key)
    }

    /// Internal consistency check.
    ///
    /// Fails when a rule is not active, when a `rule_id` appears twice (two
    /// versions both marked active), when a version is zero, or when the rules
    /// are not in evaluation order.
    pub fn verify(&self) -> Result<(), RuleSetError> {
        let corrupt = |detail: String| RuleSetError::SnapshotCorruption {
            version: self.version,
            detail,
        };

        let mut seen = HashSet::new();
        for rule in &self.rules {
            if !rule.is_active() {
                return Err(corrupt(format!(
                    "rule {} has status {}",
                    rule.label(),
                    rule.status
                )));
            }
            if rule.version == 0 {
                return Err(corrupt(format!("rule {} has version 0", rule.rule_id)));
            }
            if !seen.insert(rule.rule_id) {
                return Err(corrupt(format!(
                    "rule {} is active at more than one version",
                    rule.rule_id
                )));
            }
        }

        if let Some(pair) = self
            .rules
            .windows(2)
            .find(|pair| evaluation_order(&pair[0], &pair[1]) == Ordering::Greater)
        {
            return Err(corrupt(format!(
                "rule {} is out of priority order relative to {}",
                pair[1].label(),
                pair[0].label()
            )));
        }

        Ok(())
    }

    /// The next snapshot: superseded versions replaced, new rules appended,
    /// everything re-sorted.
    pub fn merge(&self, incoming: &[OperationalRule]) -> Result<Self, RuleSetError> {
        let replaced: HashSet<Uuid> = incoming.iter().map(|r| r.rule_id).collect();
        let mut rules: Vec<OperationalRule> = self
            .rules
            .iter()
            .filter(|r| !replaced.contains(&r.rule_id))
            .cloned()
            .collect();
        rules.extend(incoming.iter().cloned());
        Self::new(self.version + 1, rules)
    }

    /// The next snapshot without `rule_id`.
    pub fn without(&self, rule_id: Uuid) -> Result<Self, RuleSetError> {
        let rules = self
            .rules
            .iter()
            .filter(|r| r.rule_id != rule_id)
            .cloned()
            .collect();
        Self::new(self.version + 1, rules)
    }

    /// A copy of `rules` published under a new version (rollback).
    pub fn republish(&self, version: u64) -> Result<Self, RuleSetError> {
        Self::new(version, self.rules.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{CandidateRule, RuleStatus};
    use chrono::Duration;

    fn rule(priority: i64, age_secs: i64) -> OperationalRule {
        let candidate = CandidateRule::new(vec!["p".into()], "deny always", "x", 1.0);
        let mut rule = OperationalRule::from_candidate(&candidate, priority, None);
        rule.created_at = Utc::now() - Duration::seconds(age_secs);
        rule
    }

    #[test]
    fn new_sorts_by_priority_then_recency() {
        let old_high = rule(10, 100);
        let new_high = rule(10, 1);
        let low = rule(5, 0);
        let snapshot =
            RuleSetSnapshot::new(1, vec![low.clone(), old_high.clone(), new_high.clone()])
                .unwrap();
        let order: Vec<Uuid> = snapshot.rules().iter().map(|r| r.rule_id).collect();
        assert_eq!(order, vec![new_high.rule_id, old_high.rule_id, low.rule_id]);
    }

    #[test]
    fn verify_rejects_duplicate_active_rule_ids() {
        let first = rule(10, 10);
        let mut second = first.clone();
        second.version = 2;
        match RuleSetSnapshot::new(4, vec![first, second]) {
            Err(RuleSetError::SnapshotCorruption { version, detail }) => {
                assert_eq!(version, 4);
                assert!(detail.contains("more than one version"));
            }
            other => panic!("expected SnapshotCorruption, got {:?}", other),
        }
    }

    #[test]
    fn verify_rejects_non_active_rules() {
        let superseded = rule(1, 0).with_status(RuleStatus::Superseded);
        assert!(matches!(
            RuleSetSnapshot::new(1, vec![superseded]),
            Err(RuleSetError::SnapshotCorruption { .. })
        ));
    }

    #[test]
    fn verify_detects_out_of_order_deserialized_snapshot() {
        let snapshot = RuleSetSnapshot::new(2, vec![rule(10, 0), rule(1, 0)]).unwrap();
        let mut json = serde_json::to_value(&snapshot).unwrap();
        json["rules"].as_array_mut().unwrap().reverse();
        let tampered: RuleSetSnapshot = serde_json::from_value(json).unwrap();
        assert!(tampered.verify().is_err());
    }

    #[test]
    fn merge_replaces_superseded_versions() {
        let original = rule(10, 60);
        let other = rule(3, 60);
        let base = RuleSetSnapshot::new(1, vec![original.clone(), other.clone()]).unwrap();

        let candidate = CandidateRule::new(vec!["p".into()], "deny if amount > 1", "x", 1.0);
        let successor = OperationalRule::from_candidate(&candidate, 10, Some(&original));
        let next = base.merge(&[successor.clone()]).unwrap();

        assert_eq!(next.version(), 2);
        assert_eq!(next.len(), 2);
        assert_eq!(next.get(original.rule_id).unwrap().version, 2);
        assert!(next.get(other.rule_id).is_some());
        // The base snapshot is untouched.
        assert_eq!(base.get(original.rule_id).unwrap().version, 1);
    }

    #[test]
    fn without_drops_rule_and_bumps_version() {
        let a = rule(1, 0);
        let b = rule(2, 0);
        let base = RuleSetSnapshot::new(5, vec![a.clone(), b.clone()]).unwrap();
        let next = base.without(a.rule_id).unwrap();
        assert_eq!(next.version(), 6);
        assert!(next.get(a.rule_id).is_none());
        assert!(next.get(b.rule_id).is_some());
    }
}
