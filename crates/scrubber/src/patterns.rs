//! The named PHI/PII pattern table.
//!
//! Patterns are compiled once at startup. The three tiers nest:
//! basic ⊂ standard ⊂ full.

use regex::Regex;

use wb_domain::config::PatternSet;
use wb_domain::types::Severity;
use wb_domain::{Error, Result};

/// One detection pattern.
pub struct PhiPattern {
    pub name: &'static str,
    pub regex: Regex,
    pub replacement: &'static str,
    pub severity: Severity,
    pub confidence: f32,
    pub description: &'static str,
}

/// Tier a pattern first appears in.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Tier {
    Basic,
    Standard,
    Full,
}

struct PatternSpec {
    name: &'static str,
    pattern: &'static str,
    replacement: &'static str,
    severity: Severity,
    confidence: f32,
    tier: Tier,
    description: &'static str,
}

const SPECS: &[PatternSpec] = &[
    PatternSpec {
        name: "email",
        pattern: r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
        replacement: "[EMAIL]",
        severity: Severity::Medium,
        confidence: 0.95,
        tier: Tier::Basic,
        description: "email address",
    },
    PatternSpec {
        name: "phone",
        pattern: r"\b(?:\+?1[-. ]?)?\(?\d{3}\)?[-. ]?\d{3}[-. ]?\d{4}\b",
        replacement: "[PHONE]",
        severity: Severity::Medium,
        confidence: 0.80,
        tier: Tier::Basic,
        description: "phone number",
    },
    PatternSpec {
        name: "government_id",
        pattern: r"\b\d{3}-\d{2}-\d{4}\b",
        replacement: "[GOVERNMENT-ID]",
        severity: Severity::Critical,
        confidence: 0.90,
        tier: Tier::Basic,
        description: "government identity number",
    },
    PatternSpec {
        name: "credit_card",
        pattern: r"\b\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b",
        replacement: "[CARD]",
        severity: Severity::High,
        confidence: 0.85,
        tier: Tier::Basic,
        description: "payment card number",
    },
    PatternSpec {
        name: "ip_address",
        pattern: r"\b(?:\d{1,3}\.){3}\d{1,3}\b",
        replacement: "[IP]",
        severity: Severity::Low,
        confidence: 0.75,
        tier: Tier::Basic,
        description: "IPv4 address",
    },
    PatternSpec {
        name: "mrn",
        pattern: r"(?i)\bMRN[:#\s]*\d{6,10}\b",
        replacement: "[MRN]",
        severity: Severity::Critical,
        confidence: 0.95,
        tier: Tier::Standard,
        description: "medical record number",
    },
    PatternSpec {
        name: "health_plan_id",
        pattern: r"\b[A-Z]{3}\d{9,12}\b",
        replacement: "[HEALTH-PLAN-ID]",
        severity: Severity::High,
        confidence: 0.70,
        tier: Tier::Standard,
        description: "health plan beneficiary number",
    },
    PatternSpec {
        name: "prescription",
        pattern: r"(?i)\bRx[:#\s]*\d{6,10}\b",
        replacement: "[PRESCRIPTION]",
        severity: Severity::Critical,
        confidence: 0.90,
        tier: Tier::Standard,
        description: "prescription number",
    },
    PatternSpec {
        name: "diagnosis_code",
        pattern: r"\b[A-TV-Z]\d{2}\.\d{1,4}\b",
        replacement: "[DIAGNOSIS]",
        severity: Severity::High,
        confidence: 0.80,
        tier: Tier::Standard,
        description: "ICD-10 diagnosis code",
    },
    PatternSpec {
        name: "npi",
        pattern: r"(?i)\bNPI[:#\s]*\d{10}\b",
        replacement: "[NPI]",
        severity: Severity::Medium,
        confidence: 0.90,
        tier: Tier::Standard,
        description: "national provider identifier",
    },
    PatternSpec {
        name: "device_id",
        pattern: r"(?i)\b(?:implant|device)\s*(?:id|serial)[:#\s]*[A-Z0-9-]{6,}\b",
        replacement: "[DEVICE-ID]",
        severity: Severity::High,
        confidence: 0.85,
        tier: Tier::Full,
        description: "medical device identifier",
    },
    PatternSpec {
        name: "biometric",
        pattern: r"(?i)\b(?:fingerprint|retina(?:l)?\s+scan|iris\s+scan|voiceprint)\b",
        replacement: "[BIOMETRIC]",
        severity: Severity::Critical,
        confidence: 0.70,
        tier: Tier::Full,
        description: "biometric marker reference",
    },
    PatternSpec {
        name: "lab_result",
        pattern: r"(?i)\b(?:HbA1c|A1C|LDL|HDL|glucose|creatinine)\s*[:=]?\s*\d+(?:\.\d+)?\b",
        replacement: "[LAB-RESULT]",
        severity: Severity::High,
        confidence: 0.80,
        tier: Tier::Full,
        description: "laboratory result value",
    },
    PatternSpec {
        name: "treatment",
        pattern: r"(?i)\b(?:chemotherapy|radiation\s+therapy|dialysis|immunotherapy)\b",
        replacement: "[TREATMENT]",
        severity: Severity::Medium,
        confidence: 0.65,
        tier: Tier::Full,
        description: "treatment reference",
    },
    PatternSpec {
        name: "dea_number",
        pattern: r"\b[ABFGMPRX][A-Z]\d{7}\b",
        replacement: "[DEA]",
        severity: Severity::High,
        confidence: 0.85,
        tier: Tier::Full,
        description: "prescriber DEA number",
    },
];

/// All patterns active for a configured tier, compiled.
pub struct PatternTable {
    patterns: Vec<PhiPattern>,
}

impl PatternTable {
    /// Compile the patterns for the configured set. Pattern syntax is
    /// static, so a compile failure is a programming error surfaced as
    /// a config error rather than a panic.
    pub fn for_set(set: PatternSet) -> Result<Self> {
        let max_tier = match set {
            PatternSet::Basic => Tier::Basic,
            PatternSet::Standard => Tier::Standard,
            PatternSet::Full => Tier::Full,
        };

        let mut patterns = Vec::new();
        for spec in SPECS {
            if spec.tier > max_tier {
                continue;
            }
            let regex = Regex::new(spec.pattern)
                .map_err(|e| Error::Config(format!("pattern '{}': {e}", spec.name)))?;
            patterns.push(PhiPattern {
                name: spec.name,
                regex,
                replacement: spec.replacement,
                severity: spec.severity,
                confidence: spec.confidence,
                description: spec.description,
            });
        }
        Ok(Self { patterns })
    }

    /// Add a custom pattern at runtime (operator extensions).
    pub fn add_custom(
        &mut self,
        name: &'static str,
        pattern: &str,
        replacement: &'static str,
        severity: Severity,
    ) -> Result<()> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::Config(format!("custom pattern '{name}': {e}")))?;
        self.patterns.push(PhiPattern {
            name,
            regex,
            replacement,
            severity,
            confidence: 0.60,
            description: "custom pattern",
        });
        Ok(())
    }

    pub fn patterns(&self) -> &[PhiPattern] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_nest() {
        let basic = PatternTable::for_set(PatternSet::Basic).unwrap();
        let standard = PatternTable::for_set(PatternSet::Standard).unwrap();
        let full = PatternTable::for_set(PatternSet::Full).unwrap();
        assert!(basic.len() < standard.len());
        assert!(standard.len() < full.len());
    }

    #[test]
    fn mrn_is_critical_in_standard() {
        let table = PatternTable::for_set(PatternSet::Standard).unwrap();
        let mrn = table
            .patterns()
            .iter()
            .find(|p| p.name == "mrn")
            .expect("mrn in standard set");
        assert_eq!(mrn.severity, Severity::Critical);
        assert!(mrn.regex.is_match("MRN: 12345678"));
    }
}
