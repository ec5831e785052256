//! Buffered and streaming scrubbing, detection records, quarantine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};

use wb_audit::{AuditActor, AuditEvent, AuditLog, AuditResource};
use wb_domain::config::{ScrubMode, ScrubberConfig};
use wb_domain::types::Severity;
use wb_domain::Result;

use crate::patterns::PatternTable;

/// Replaces the whole message when a critical detection fires with
/// quarantine enabled.
pub const QUARANTINE_NOTICE: &str =
    "[message withheld: potential protected health information was detected]";

/// Window of surrounding text hashed into a detection's context.
const CONTEXT_WINDOW: usize = 24;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Detections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One detected PHI/PII span. Carries a hash of the surrounding text,
/// never the text itself.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub pattern: String,
    pub severity: Severity,
    pub start: usize,
    pub end: usize,
    pub confidence: f32,
    pub context_hash: String,
    pub detected_at: DateTime<Utc>,
}

/// Result of a scrub pass.
#[derive(Debug, Clone)]
pub struct ScrubOutcome {
    pub text: String,
    pub detections: Vec<Detection>,
    pub quarantined: bool,
}

/// Receives quarantine notifications. Configured on the scrubber, not a
/// free function slot, so tests can observe invocations.
pub trait QuarantineNotifier: Send + Sync {
    fn notify(&self, user_id: &str, room_id: &str, phi_type: &str, detections: &[Detection]);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scrubber
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Scrubber {
    table: PatternTable,
    mode: ScrubMode,
    quarantine_enabled: bool,
    notify_on_quarantine: bool,
    notifier: Option<Arc<dyn QuarantineNotifier>>,
    audit: Option<Arc<AuditLog>>,
    buffer: Mutex<String>,
}

impl Scrubber {
    /// Build a scrubber from config. Quarantine (and quarantine
    /// notification) require atomic whole-message scrubbing, so either
    /// flag forces buffered mode.
    pub fn new(
        config: &ScrubberConfig,
        table: PatternTable,
        audit: Option<Arc<AuditLog>>,
        notifier: Option<Arc<dyn QuarantineNotifier>>,
    ) -> Self {
        let mut mode = config.mode;
        if (config.quarantine_enabled || config.notify_on_quarantine)
            && mode == ScrubMode::Streaming
        {
            tracing::warn!("quarantine requires buffered scrubbing; overriding streaming mode");
            mode = ScrubMode::Buffered;
        }

        Self {
            table,
            mode,
            quarantine_enabled: config.quarantine_enabled,
            notify_on_quarantine: config.notify_on_quarantine,
            notifier,
            audit,
            buffer: Mutex::new(String::new()),
        }
    }

    /// The active processing mode.
    pub fn mode(&self) -> ScrubMode {
        self.mode
    }

    /// Append a chunk to the buffered accumulator. No scrubbing happens
    /// until [`Self::flush`]; no bytes are dropped or reordered.
    pub fn append(&self, chunk: &str) {
        self.buffer.lock().push_str(chunk);
    }

    /// Bytes currently accumulated (diagnostics).
    pub fn buffered_len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Scrub the accumulated text atomically and clear the buffer.
    pub fn flush(&self, user_id: &str, room_id: &str) -> Result<ScrubOutcome> {
        let text = std::mem::take(&mut *self.buffer.lock());
        self.scrub_message(&text, user_id, room_id)
    }

    /// Scrub one chunk immediately. Patterns that straddle a chunk
    /// boundary are not seen; callers pick this mode for latency, not
    /// compliance.
    pub fn scrub_chunk(&self, chunk: &str) -> ScrubOutcome {
        let (text, detections) = self.scrub_text(chunk);
        ScrubOutcome {
            text,
            detections,
            quarantined: false,
        }
    }

    /// Scrub a complete message, applying quarantine when configured.
    pub fn scrub_message(
        &self,
        text: &str,
        user_id: &str,
        room_id: &str,
    ) -> Result<ScrubOutcome> {
        let (scrubbed, detections) = self.scrub_text(text);

        let critical: Vec<&Detection> = detections
            .iter()
            .filter(|d| d.severity == Severity::Critical)
            .collect();

        if self.quarantine_enabled && !critical.is_empty() {
            let phi_type = critical[0].pattern.clone();

            if let Some(audit) = &self.audit {
                audit.append(
                    AuditEvent::new(
                        "phi",
                        AuditActor::user(user_id, None),
                        "quarantine",
                        AuditResource::new("room", room_id),
                    )
                    .detail(serde_json::json!({
                        "phi_type": phi_type,
                        "detections": detections.len(),
                    }))
                    .compliance("phi", Severity::Critical),
                )?;
            }

            if self.notify_on_quarantine {
                if let Some(notifier) = &self.notifier {
                    notifier.notify(user_id, room_id, &phi_type, &detections);
                }
            }

            tracing::warn!(
                user = %user_id,
                room = %room_id,
                phi_type = %phi_type,
                detections = detections.len(),
                "message quarantined"
            );

            return Ok(ScrubOutcome {
                text: QUARANTINE_NOTICE.to_string(),
                detections,
                quarantined: true,
            });
        }

        Ok(ScrubOutcome {
            text: scrubbed,
            detections,
            quarantined: false,
        })
    }

    /// Run every active pattern over `text` in table order. Detection
    /// spans are relative to the text as each pattern saw it.
    fn scrub_text(&self, text: &str) -> (String, Vec<Detection>) {
        let mut current = text.to_string();
        let mut detections = Vec::new();

        for pattern in self.table.patterns() {
            let mut found = false;
            for m in pattern.regex.find_iter(&current) {
                found = true;
                detections.push(Detection {
                    pattern: pattern.name.to_string(),
                    severity: pattern.severity,
                    start: m.start(),
                    end: m.end(),
                    confidence: pattern.confidence,
                    context_hash: hash_context(&current, m.start(), m.end()),
                    detected_at: Utc::now(),
                });
            }
            if found {
                current = pattern
                    .regex
                    .replace_all(&current, pattern.replacement)
                    .into_owned();
            }
        }

        (current, detections)
    }
}

/// SHA-256 over the match plus a fixed window either side.
fn hash_context(text: &str, start: usize, end: usize) -> String {
    let from = start.saturating_sub(CONTEXT_WINDOW);
    let to = (end + CONTEXT_WINDOW).min(text.len());
    // Clamp to char boundaries; matches always sit on them but the
    // window edges may not.
    let from = (0..=from).rev().find(|i| text.is_char_boundary(*i)).unwrap_or(0);
    let to = (to..=text.len())
        .find(|i| text.is_char_boundary(*i))
        .unwrap_or(text.len());
    hex::encode(Sha256::digest(text[from..to].as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use wb_domain::config::PatternSet;

    fn scrubber(config: ScrubberConfig) -> Scrubber {
        let table = PatternTable::for_set(PatternSet::Full).unwrap();
        Scrubber::new(&config, table, None, None)
    }

    #[test]
    fn redacts_email_and_reports_detection() {
        let s = scrubber(ScrubberConfig::default());
        let out = s
            .scrub_message("reach me at alice@example.com please", "u1", "r1")
            .unwrap();
        assert_eq!(out.text, "reach me at [EMAIL] please");
        assert_eq!(out.detections.len(), 1);
        assert_eq!(out.detections[0].pattern, "email");
        assert!(!out.quarantined);
    }

    #[test]
    fn detection_carries_hash_not_text() {
        let s = scrubber(ScrubberConfig::default());
        let out = s
            .scrub_message("card 4111 1111 1111 1111", "u1", "r1")
            .unwrap();
        let d = &out.detections[0];
        assert_eq!(d.context_hash.len(), 64);
        assert!(!d.context_hash.contains("4111"));
    }

    #[test]
    fn buffered_flush_scrubs_across_chunk_boundaries() {
        let s = scrubber(ScrubberConfig::default());
        s.append("my number is MRN: 12");
        s.append("345678 thanks");
        let out = s.flush("u1", "r1").unwrap();
        assert!(out.detections.iter().any(|d| d.pattern == "mrn"));
        assert!(out.text.contains("[MRN]"));
        // Buffer drained.
        assert_eq!(s.buffered_len(), 0);
    }

    #[test]
    fn buffered_accumulator_loses_no_bytes() {
        let s = scrubber(ScrubberConfig::default());
        let chunks = ["first ", "second ", "third, with unicode: héllo ", "fourth"];
        for chunk in chunks {
            s.append(chunk);
        }
        let out = s.flush("u1", "r1").unwrap();
        // Nothing here matches a pattern, so the output is the exact
        // concatenation of the appended chunks.
        assert_eq!(out.text, chunks.concat());
        assert!(out.detections.is_empty());
    }

    #[test]
    fn streaming_misses_split_patterns() {
        let config = ScrubberConfig {
            mode: ScrubMode::Streaming,
            ..Default::default()
        };
        let s = scrubber(config);
        let a = s.scrub_chunk("my number is MRN: 12");
        let b = s.scrub_chunk("345678 thanks");
        assert!(a.detections.iter().all(|d| d.pattern != "mrn"));
        assert!(b.detections.iter().all(|d| d.pattern != "mrn"));
    }

    #[test]
    fn quarantine_forces_buffered_mode() {
        let config = ScrubberConfig {
            mode: ScrubMode::Streaming,
            quarantine_enabled: true,
            ..Default::default()
        };
        let s = scrubber(config);
        assert_eq!(s.mode(), ScrubMode::Buffered);
    }

    struct RecordingNotifier {
        calls: PlMutex<Vec<(String, String, String, usize)>>,
    }

    impl QuarantineNotifier for RecordingNotifier {
        fn notify(
            &self,
            user_id: &str,
            room_id: &str,
            phi_type: &str,
            detections: &[Detection],
        ) {
            self.calls.lock().push((
                user_id.to_string(),
                room_id.to_string(),
                phi_type.to_string(),
                detections.len(),
            ));
        }
    }

    #[test]
    fn critical_detection_quarantines_and_notifies_once() {
        let notifier = Arc::new(RecordingNotifier {
            calls: PlMutex::new(Vec::new()),
        });
        let config = ScrubberConfig {
            quarantine_enabled: true,
            notify_on_quarantine: true,
            ..Default::default()
        };
        let table = PatternTable::for_set(PatternSet::Standard).unwrap();
        let s = Scrubber::new(&config, table, None, Some(notifier.clone()));

        let out = s
            .scrub_message("patient MRN: 99887766 was admitted", "u1", "room-9")
            .unwrap();
        assert!(out.quarantined);
        assert_eq!(out.text, QUARANTINE_NOTICE);

        let calls = notifier.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "u1");
        assert_eq!(calls[0].1, "room-9");
        assert_eq!(calls[0].2, "mrn");
    }

    #[test]
    fn quarantine_writes_exactly_one_audit_entry() {
        let dir = tempfile::tempdir().unwrap();
        let audit = Arc::new(
            AuditLog::open(&wb_domain::config::AuditConfig {
                path: dir.path().join("audit.jsonl").display().to_string(),
                fsync_critical: false,
                ..Default::default()
            })
            .unwrap(),
        );
        let config = ScrubberConfig {
            quarantine_enabled: true,
            ..Default::default()
        };
        let table = PatternTable::for_set(PatternSet::Standard).unwrap();
        let s = Scrubber::new(&config, table, Some(audit.clone()), None);

        s.scrub_message("MRN: 11223344", "u1", "r1").unwrap();
        let entries = audit.query(10, |e| e.action == "quarantine");
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn non_critical_detections_do_not_quarantine() {
        let config = ScrubberConfig {
            quarantine_enabled: true,
            ..Default::default()
        };
        let table = PatternTable::for_set(PatternSet::Standard).unwrap();
        let s = Scrubber::new(&config, table, None, None);
        let out = s
            .scrub_message("mail bob@example.org", "u1", "r1")
            .unwrap();
        assert!(!out.quarantined);
        assert_eq!(out.text, "mail [EMAIL]");
    }
}
