use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PHI/PII scrubber
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Processing mode. Buffered scrubs the accumulated text atomically at
/// flush time; streaming scrubs each chunk as it arrives and may miss
/// patterns that straddle chunk boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScrubMode {
    #[default]
    Buffered,
    Streaming,
}

/// Which tier of the pattern table is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PatternSet {
    Basic,
    #[default]
    Standard,
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScrubberConfig {
    #[serde(default)]
    pub mode: ScrubMode,
    #[serde(default)]
    pub pattern_set: PatternSet,
    /// Replace output with the quarantine notice when a critical
    /// detection fires. Forces buffered mode.
    #[serde(default)]
    pub quarantine_enabled: bool,
    /// Invoke the configured notifier on quarantine. Forces buffered mode.
    #[serde(default)]
    pub notify_on_quarantine: bool,
}
