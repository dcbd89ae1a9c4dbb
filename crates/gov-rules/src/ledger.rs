// ledger.rs — Append-only, hash-chained history of rule lifecycle changes.
//
// Operational rules are never deleted. Every version that is created,
// superseded or revoked, every snapshot publication, and every conflict a
// rule was published with, is written as one JSON line. Each line carries the
// SHA-256 of the previous raw line in `previous_hash`, so inserting, dropping
// or editing a line breaks the chain and `verify_chain` reports where.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RuleSetError;
use crate::hasher;
use crate::rule::OperationalRule;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerAction {
    RuleCreated,
    RuleSuperseded,
    RuleRevoked,
    SnapshotPublished,
    /// A rule went live with an unresolved, non-blocking conflict.
    ConflictFlagged,
}

/// One line in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: LedgerAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_version: Option<u64>,
    /// Full rule body for `RuleCreated` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<OperationalRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Hash of the previous raw line; `None` for the first entry.
    pub previous_hash: Option<String>,
}

impl LedgerEntry {
    pub fn new(action: LedgerAction) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action,
            rule_id: None,
            rule_version: None,
            snapshot_version: None,
            rule: None,
            detail: None,
            previous_hash: None,
        }
    }

    pub fn rule_created(rule: &OperationalRule) -> Self {
        let mut entry = Self::new(LedgerAction::RuleCreated).for_rule(rule);
        entry.rule = Some(rule.clone());
        entry
    }

    pub fn for_rule(mut self, rule: &OperationalRule) -> Self {
        self.rule_id = Some(rule.rule_id);
        self.rule_version = Some(rule.version);
        self
    }

    pub fn with_snapshot(mut self, version: u64) -> Self {
        self.snapshot_version = Some(version);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// An append-only rule ledger backed by a JSONL file.
pub struct RuleLedger {
    writer: BufWriter<File>,
    path: PathBuf,
    last_hash: Option<String>,
}

impl RuleLedger {
    /// Open (or create) a ledger, recovering the chain head from existing content.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RuleSetError> {
        let path = path.as_ref().to_path_buf();
        let last_hash = if path.exists() {
            Self::read_last_hash(&path)?
        } else {
            None
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| RuleSetError::IoError {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            writer: BufWriter::new(file),
            path,
            last_hash,
        })
    }

    /// Link `entry` to the chain head, write it and flush.
    pub fn append(&mut self, entry: &mut LedgerEntry) -> Result<(), RuleSetError> {
        entry.previous_hash = self.last_hash.clone();
        let json = serde_json::to_string(entry)?;
        writeln!(self.writer, "{}", json)?;
        self.writer.flush()?;
        self.last_hash = Some(hasher::hash_str(&json));
        Ok(())
    }

    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<LedgerEntry>, RuleSetError> {
        let mut entries = Vec::new();
        for line in Self::lines(path.as_ref())? {
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }

    /// Check every `previous_hash` link against the raw preceding line.
    pub fn verify_chain(path: impl AsRef<Path>) -> Result<(), RuleSetError> {
        let mut previous_hash: Option<String> = None;
        for (line_num, line) in Self::lines(path.as_ref())?.into_iter().enumerate() {
            let entry: LedgerEntry = serde_json::from_str(&line)?;
            if entry.previous_hash != previous_hash {
                return Err(RuleSetError::IntegrityViolation {
                    line: line_num + 1,
                    expected: previous_hash.unwrap_or_else(|| "None".to_string()),
                    actual: entry.previous_hash.unwrap_or_else(|| "None".to_string()),
                });
            }
            // Hash the raw line; re-serializing could reorder fields.
            previous_hash = Some(hasher::hash_str(&line));
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lines(path: &Path) -> Result<Vec<String>, RuleSetError> {
        let file = File::open(path).map_err(|source| RuleSetError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        let mut lines = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if !line.trim().is_empty() {
                lines.push(line);
            }
        }
        Ok(lines)
    }

    fn read_last_hash(path: &Path) -> Result<Option<String>, RuleSetError> {
        Ok(Self::lines(path)?.last().map(|line| hasher::hash_str(line)))
    }
}
