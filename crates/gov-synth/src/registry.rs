// registry.rs — Every operational rule version ever published.
//
// The snapshot only holds what is enforceable now. The registry keeps the
// rest: superseded and revoked versions, per-rule history, and which
// principles a rule came from (so feedback about a rule can be traced back to
// the principles to re-synthesize). Each change is mirrored to the optional
// hash-chained ledger. A ledger write failure is logged and does not undo
// the change: the snapshot swap already happened.

use std::collections::{BTreeMap, BTreeSet};

use uuid::Uuid;

use gov_rules::{
    LedgerAction, LedgerEntry, OperationalRule, RuleLedger, RuleSetSnapshot, RuleStatus,
};

use crate::state::FlaggedConflict;

#[derive(Default)]
pub struct RuleRegistry {
    versions: BTreeMap<Uuid, Vec<OperationalRule>>,
    ledger: Option<RuleLedger>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ledger(ledger: RuleLedger) -> Self {
        Self {
            versions: BTreeMap::new(),
            ledger: Some(ledger),
        }
    }

    /// Record the rules that entered with `snapshot`, superseding whatever
    /// version of the same rule was active before.
    pub fn record_published(&mut self, snapshot: &RuleSetSnapshot, new_rules: &[OperationalRule]) {
        for rule in new_rules {
            if let Some(prior) = self.mark_active_as(rule.rule_id, RuleStatus::Superseded) {
                self.write(
                    LedgerEntry::new(LedgerAction::RuleSuperseded)
                        .for_rule(&prior)
                        .with_snapshot(snapshot.version())
                        .with_detail(format!("superseded by v{}", rule.version)),
                );
            }
            self.versions.entry(rule.rule_id).or_default().push(rule.clone());
            self.write(LedgerEntry::rule_created(rule).with_snapshot(snapshot.version()));
        }
        self.write_snapshot(snapshot, None);
    }

    /// Record a conflict a rule went live with.
    pub fn record_conflict(&mut self, flagged: &FlaggedConflict, snapshot_version: u64) {
        let mut entry = LedgerEntry::new(LedgerAction::ConflictFlagged)
            .with_snapshot(snapshot_version)
            .with_detail(format!(
                "{} ({}) with rule {}: {}",
                flagged.report.kind,
                flagged.report.severity,
                flagged.report.conflicting_rule_id,
                flagged.report.detail
            ));
        entry.rule_id = Some(flagged.rule_id);
        entry.rule_version = Some(flagged.rule_version);
        self.write(entry);
    }

    /// Mark the active version of `rule_id` revoked. Returns the revoked version.
    pub fn record_revoked(
        &mut self,
        rule_id: Uuid,
        snapshot: &RuleSetSnapshot,
        reason: &str,
    ) -> Option<OperationalRule> {
        let revoked = self.mark_active_as(rule_id, RuleStatus::Revoked)?;
        self.write(
            LedgerEntry::new(LedgerAction::RuleRevoked)
                .for_rule(&revoked)
                .with_snapshot(snapshot.version())
                .with_detail(reason),
        );
        self.write_snapshot(snapshot, None);
        Some(revoked)
    }

    /// Bring statuses in line with a snapshot republished by rollback.
    ///
    /// Versions in the snapshot become active again; versions that were active
    /// but are not in the snapshot become superseded (same rule, other version)
    /// or revoked (rule absent entirely).
    pub fn reconcile(&mut self, snapshot: &RuleSetSnapshot, from_version: u64) {
        let live: BTreeMap<Uuid, u64> = snapshot
            .rules()
            .iter()
            .map(|r| (r.rule_id, r.version))
            .collect();
        let mut entries = Vec::new();

        for rule in snapshot.rules() {
            let history = self.versions.entry(rule.rule_id).or_default();
            if !history.iter().any(|v| v.version == rule.version) {
                history.push(rule.clone());
            }
        }

        for (rule_id, history) in self.versions.iter_mut() {
            for version in history.iter_mut() {
                let wanted = match live.get(rule_id) {
                    Some(v) if *v == version.version => RuleStatus::Active,
                    Some(_) if version.is_active() => RuleStatus::Superseded,
                    None if version.is_active() => RuleStatus::Revoked,
                    _ => continue,
                };
                if version.status == wanted {
                    continue;
                }
                version.status = wanted;
                let action = match wanted {
                    RuleStatus::Superseded => LedgerAction::RuleSuperseded,
                    RuleStatus::Revoked => LedgerAction::RuleRevoked,
                    RuleStatus::Active => continue,
                };
                entries.push(
                    LedgerEntry::new(action)
                        .for_rule(version)
                        .with_snapshot(snapshot.version())
                        .with_detail(format!("rollback from v{from_version}")),
                );
            }
        }

        for entry in entries {
            self.write(entry);
        }
        self.write_snapshot(snapshot, Some(format!("rollback from v{from_version}")));
    }

    /// Every version of `rule_id`, oldest first.
    pub fn history(&self, rule_id: Uuid) -> Vec<OperationalRule> {
        self.versions.get(&rule_id).cloned().unwrap_or_default()
    }

    /// Source principles of the latest version of each rule.
    pub fn principles_for(&self, rule_ids: impl IntoIterator<Item = Uuid>) -> Vec<String> {
        let mut ids = BTreeSet::new();
        for rule_id in rule_ids {
            if let Some(latest) = self.versions.get(&rule_id).and_then(|h| h.last()) {
                ids.extend(latest.source_principle_ids.iter().cloned());
            }
        }
        ids.into_iter().collect()
    }

    /// Number of rule versions recorded, all statuses.
    pub fn version_count(&self) -> usize {
        self.versions.values().map(Vec::len).sum()
    }

    fn mark_active_as(&mut self, rule_id: Uuid, status: RuleStatus) -> Option<OperationalRule> {
        let history = self.versions.get_mut(&rule_id)?;
        let active = history.iter_mut().rev().find(|r| r.is_active())?;
        active.status = status;
        Some(active.clone())
    }

    fn write_snapshot(&mut self, snapshot: &RuleSetSnapshot, detail: Option<String>) {
        let mut entry =
            LedgerEntry::new(LedgerAction::SnapshotPublished).with_snapshot(snapshot.version());
        if let Some(detail) = detail {
            entry = entry.with_detail(detail);
        }
        self.write(entry);
    }

    fn write(&mut self, mut entry: LedgerEntry) {
        let Some(ledger) = self.ledger.as_mut() else {
            return;
        };
        if let Err(e) = ledger.append(&mut entry) {
            tracing::warn!(
                path = %ledger.path().display(),
                action = ?entry.action,
                error = %e,
                "failed to append rule ledger entry"
            );
        }
    }
}
