//! Append-only, hash-chained audit log backed by a JSON-lines file.
//!
//! Writes are serialized under a single lock; sequence numbers are
//! totally ordered. `verify` re-reads the file from disk so tampering
//! done outside the process is caught too.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use wb_domain::config::AuditConfig;
use wb_domain::types::Severity;
use wb_domain::{Error, Result};

use crate::entry::{AuditActor, AuditEntry, AuditEvent, AuditResource, GENESIS_HASH};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chain status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Result of a full chain walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStatus {
    Intact { entries: u64, tip_hash: String },
    Broken { at_sequence: u64, reason: String },
}

impl ChainStatus {
    pub fn is_intact(&self) -> bool {
        matches!(self, Self::Intact { .. })
    }
}

/// Export serialization format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Inner {
    entries: Vec<AuditEntry>,
    next_sequence: u64,
    tip_hash: String,
    file: File,
    /// Set when a chain break was observed and the operator chose to
    /// degrade instead of halting. A degraded log refuses exports.
    degraded: bool,
}

pub struct AuditLog {
    path: PathBuf,
    inner: Mutex<Inner>,
    retention: Duration,
    fsync_critical: bool,
}

impl AuditLog {
    /// Open (or create) the log at the configured path and load the
    /// existing chain into memory.
    pub fn open(config: &AuditConfig) -> Result<Self> {
        let path = PathBuf::from(&config.path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }

        let entries = if path.exists() {
            read_entries(&path)?
        } else {
            Vec::new()
        };

        let (next_sequence, tip_hash) = match entries.last() {
            Some(last) => (last.sequence + 1, last.this_hash.clone()),
            None => (0, GENESIS_HASH.to_string()),
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(Error::Io)?;

        tracing::info!(
            entries = entries.len(),
            path = %path.display(),
            "audit log opened"
        );

        Ok(Self {
            path,
            inner: Mutex::new(Inner {
                entries,
                next_sequence,
                tip_hash,
                file,
                degraded: false,
            }),
            retention: Duration::days(config.retention_days as i64),
            fsync_critical: config.fsync_critical,
        })
    }

    /// Append one entry. Assigns the sequence number and hash pair,
    /// writes the JSON line, and fsyncs when the entry is critical and
    /// fsync-on-critical is configured.
    pub fn append(&self, event: AuditEvent) -> Result<AuditEntry> {
        let mut inner = self.inner.lock();

        let mut entry = AuditEntry {
            sequence: inner.next_sequence,
            timestamp: Utc::now(),
            event_type: event.event_type,
            actor: event.actor,
            action: event.action,
            resource: event.resource,
            detail: event.detail,
            compliance: event.compliance,
            prev_hash: inner.tip_hash.clone(),
            this_hash: String::new(),
        };
        entry.this_hash = entry.compute_hash()?;

        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        inner.file.write_all(&line).map_err(Error::Io)?;
        if self.fsync_critical && entry.compliance.severity >= Severity::High {
            inner.file.sync_data().map_err(Error::Io)?;
        }

        inner.next_sequence += 1;
        inner.tip_hash = entry.this_hash.clone();
        inner.entries.push(entry.clone());

        Ok(entry)
    }

    /// Current tip hash (genesis value when the log is empty).
    pub fn tip_hash(&self) -> String {
        self.inner.lock().tip_hash.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark the log degraded after an observed chain break. Exports are
    /// refused until the chain is repaired.
    pub fn mark_degraded(&self) {
        self.inner.lock().degraded = true;
        tracing::error!("audit log marked degraded; exports disabled");
    }

    /// Walk the on-disk chain from entry 0, recomputing every hash.
    /// Reports the first sequence where the chain does not hold.
    pub fn verify(&self) -> Result<ChainStatus> {
        let _guard = self.inner.lock();
        let entries = match read_entries_lenient(&self.path) {
            Ok(entries) => entries,
            Err(ReadFailure { at_line, reason }) => {
                return Ok(ChainStatus::Broken {
                    at_sequence: at_line,
                    reason,
                });
            }
        };

        let mut prev_hash = GENESIS_HASH.to_string();
        for (idx, entry) in entries.iter().enumerate() {
            if entry.sequence != idx as u64 {
                return Ok(ChainStatus::Broken {
                    at_sequence: idx as u64,
                    reason: format!(
                        "sequence gap: expected {idx}, found {}",
                        entry.sequence
                    ),
                });
            }
            if entry.prev_hash != prev_hash {
                return Ok(ChainStatus::Broken {
                    at_sequence: entry.sequence,
                    reason: "previous-hash link does not match".into(),
                });
            }
            match entry.compute_hash() {
                Ok(hash) if hash == entry.this_hash => {}
                Ok(_) => {
                    return Ok(ChainStatus::Broken {
                        at_sequence: entry.sequence,
                        reason: "entry hash does not match its contents".into(),
                    });
                }
                Err(e) => {
                    return Ok(ChainStatus::Broken {
                        at_sequence: entry.sequence,
                        reason: e.to_string(),
                    });
                }
            }
            prev_hash = entry.this_hash.clone();
        }

        Ok(ChainStatus::Intact {
            entries: entries.len() as u64,
            tip_hash: prev_hash,
        })
    }

    /// Drop entries older than the retention window. The surviving chain
    /// is rebased from the new earliest entry and the rebase is itself
    /// logged. Returns the number of entries dropped.
    pub fn apply_retention(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - self.retention;
        let mut inner = self.inner.lock();

        let first_kept = inner
            .entries
            .iter()
            .position(|e| e.timestamp >= cutoff)
            .unwrap_or(inner.entries.len());
        if first_kept == 0 {
            return Ok(0);
        }

        let dropped = first_kept;
        let kept: Vec<AuditEntry> = inner.entries.split_off(first_kept);

        // Rebase: renumber from 0 and rechain from the genesis value.
        let mut rebased = Vec::with_capacity(kept.len());
        let mut prev_hash = GENESIS_HASH.to_string();
        for (idx, mut entry) in kept.into_iter().enumerate() {
            entry.sequence = idx as u64;
            entry.prev_hash = prev_hash;
            entry.this_hash = entry.compute_hash()?;
            prev_hash = entry.this_hash.clone();
            rebased.push(entry);
        }

        // split_off left the dropped prefix in `entries`; discard it and
        // rewrite the file with the rebased chain, then reopen for append.
        inner.entries.clear();
        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut file = File::create(&tmp).map_err(Error::Io)?;
            for entry in &rebased {
                let mut line = serde_json::to_vec(entry)?;
                line.push(b'\n');
                file.write_all(&line).map_err(Error::Io)?;
            }
            file.sync_data().map_err(Error::Io)?;
        }
        std::fs::rename(&tmp, &self.path).map_err(Error::Io)?;

        inner.file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(Error::Io)?;
        inner.next_sequence = rebased.len() as u64;
        inner.tip_hash = rebased
            .last()
            .map(|e| e.this_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        inner.entries = rebased;
        drop(inner);

        self.append(
            AuditEvent::new(
                "retention",
                AuditActor::system(),
                "retention_rebase",
                AuditResource::new("audit_log", self.path.display().to_string()),
            )
            .detail(serde_json::json!({ "dropped": dropped }))
            .compliance("lifecycle", Severity::Medium),
        )?;

        tracing::info!(dropped, "audit retention applied; chain rebased");
        Ok(dropped)
    }

    /// Export entries whose timestamps fall in `[from, to]`, plus the
    /// current tip hash. Refused while the log is degraded.
    pub fn export(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        format: ExportFormat,
    ) -> Result<String> {
        let inner = self.inner.lock();
        if inner.degraded {
            return Err(Error::Integrity(
                "audit log is degraded; repair the chain before exporting".into(),
            ));
        }

        let in_range: Vec<&AuditEntry> = inner
            .entries
            .iter()
            .filter(|e| from.map_or(true, |f| e.timestamp >= f))
            .filter(|e| to.map_or(true, |t| e.timestamp <= t))
            .collect();

        match format {
            ExportFormat::Json => {
                let value = serde_json::json!({
                    "tip_hash": inner.tip_hash,
                    "entries": in_range,
                });
                Ok(serde_json::to_string_pretty(&value)?)
            }
            ExportFormat::Csv => {
                let mut out = String::from(
                    "sequence,timestamp,event_type,actor_type,actor_id,action,\
                     resource_type,resource_id,category,severity,prev_hash,this_hash\n",
                );
                for e in &in_range {
                    out.push_str(&format!(
                        "{},{},{},{},{},{},{},{},{},{},{},{}\n",
                        e.sequence,
                        e.timestamp.to_rfc3339(),
                        csv_field(&e.event_type),
                        csv_field(&e.actor.actor_type),
                        csv_field(&e.actor.id),
                        csv_field(&e.action),
                        csv_field(&e.resource.resource_type),
                        csv_field(&e.resource.id),
                        csv_field(&e.compliance.category),
                        e.compliance.severity,
                        e.prev_hash,
                        e.this_hash,
                    ));
                }
                out.push_str(&format!("# tip_hash,{}\n", inner.tip_hash));
                Ok(out)
            }
        }
    }

    /// Entries matching a predicate, newest first, capped at `limit`.
    pub fn query(
        &self,
        limit: usize,
        predicate: impl Fn(&AuditEntry) -> bool,
    ) -> Vec<AuditEntry> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .rev()
            .filter(|e| predicate(e))
            .take(limit)
            .cloned()
            .collect()
    }
}

fn csv_field(raw: &str) -> String {
    if raw.contains(',') || raw.contains('"') || raw.contains('\n') {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

// ── file loading ────────────────────────────────────────────────────

struct ReadFailure {
    at_line: u64,
    reason: String,
}

fn read_entries(path: &Path) -> Result<Vec<AuditEntry>> {
    read_entries_lenient(path).map_err(|f| {
        Error::Integrity(format!(
            "audit log unreadable at entry {}: {}",
            f.at_line, f.reason
        ))
    })
}

fn read_entries_lenient(path: &Path) -> std::result::Result<Vec<AuditEntry>, ReadFailure> {
    let raw = std::fs::read_to_string(path).map_err(|e| ReadFailure {
        at_line: 0,
        reason: e.to_string(),
    })?;

    let mut entries = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: AuditEntry = serde_json::from_str(line).map_err(|e| ReadFailure {
            at_line: idx as u64,
            reason: format!("malformed entry: {e}"),
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_log(dir: &Path) -> AuditLog {
        let config = AuditConfig {
            path: dir.join("audit.jsonl").display().to_string(),
            retention_days: 90,
            fsync_critical: false,
            ..Default::default()
        };
        AuditLog::open(&config).unwrap()
    }

    fn event(action: &str) -> AuditEvent {
        AuditEvent::new(
            "test",
            AuditActor::system(),
            action,
            AuditResource::new("thing", "t1"),
        )
    }

    #[test]
    fn sequences_are_monotonic_and_chained() {
        let dir = tempfile::tempdir().unwrap();
        let log = test_log(dir.path());

        let a = log.append(event("one")).unwrap();
        let b = log.append(event("two")).unwrap();
        let c = log.append(event("three")).unwrap();

        assert_eq!((a.sequence, b.sequence, c.sequence), (0, 1, 2));
        assert_eq!(a.prev_hash, GENESIS_HASH);
        assert_eq!(b.prev_hash, a.this_hash);
        assert_eq!(c.prev_hash, b.this_hash);
        assert!(log.verify().unwrap().is_intact());
    }

    #[test]
    fn reopen_continues_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let tip = {
            let log = test_log(dir.path());
            log.append(event("one")).unwrap();
            log.tip_hash()
        };

        let log = test_log(dir.path());
        let next = log.append(event("two")).unwrap();
        assert_eq!(next.sequence, 1);
        assert_eq!(next.prev_hash, tip);
        assert!(log.verify().unwrap().is_intact());
    }

    #[test]
    fn retention_rebases_and_logs_the_rebase() {
        let dir = tempfile::tempdir().unwrap();
        let log = test_log(dir.path());
        log.append(event("old")).unwrap();
        log.append(event("new")).unwrap();

        // Everything is younger than 90 days, so nothing drops.
        assert_eq!(log.apply_retention(Utc::now()).unwrap(), 0);

        // Jump far into the future: both entries age out, only the
        // rebase marker survives.
        let dropped = log
            .apply_retention(Utc::now() + Duration::days(365))
            .unwrap();
        assert_eq!(dropped, 2);
        assert_eq!(log.len(), 1);
        let status = log.verify().unwrap();
        assert!(status.is_intact(), "{status:?}");
    }

    #[test]
    fn export_includes_tip_hash() {
        let dir = tempfile::tempdir().unwrap();
        let log = test_log(dir.path());
        log.append(event("one")).unwrap();

        let json = log.export(None, None, ExportFormat::Json).unwrap();
        assert!(json.contains(&log.tip_hash()));

        let csv = log.export(None, None, ExportFormat::Csv).unwrap();
        assert!(csv.starts_with("sequence,"));
        assert!(csv.contains(&log.tip_hash()));
    }

    #[test]
    fn degraded_log_refuses_export() {
        let dir = tempfile::tempdir().unwrap();
        let log = test_log(dir.path());
        log.append(event("one")).unwrap();
        log.mark_degraded();
        assert!(log.export(None, None, ExportFormat::Json).is_err());
    }
}
