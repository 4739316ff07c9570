//! Key-pattern detection.
//!
//! Decides whether the key set observed at an object path looks like a map
//! keyed by runtime identifiers (UUIDs, ObjectIds, …) rather than a fixed,
//! named schema. Detection is OR-triggered: either the key set is large, or
//! most keys match one identifier pattern.

use crate::error::Error;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Identifier shapes the detector recognizes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyPattern {
    /// RFC 4122 UUID, hyphenated.
    #[serde(rename = "UUID")]
    Uuid,
    /// 24 hex digits.
    #[serde(rename = "MONGODB_OBJECTID")]
    MongodbObjectId,
    /// 26 Crockford base-32 digits.
    #[serde(rename = "ULID")]
    Ulid,
    /// 6 to 20 decimal digits.
    #[serde(rename = "NUMERIC_ID")]
    NumericId,
    /// A known prefix, an underscore, then 8–32 alphanumerics.
    #[serde(rename = "PREFIXED_ID")]
    PrefixedId,
    /// Anything else, optionally described by a configured pattern.
    #[serde(rename = "CUSTOM")]
    Custom,
}

/// How trustworthy a detection is.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    /// Below 0.6.
    Low,
    /// At least 0.6.
    Medium,
    /// At least 0.8.
    High,
}

impl KeyPattern {
    /// An anchored, inline-flag-free regex source for this pattern, usable
    /// inside JSON-Schema `pattern`/`propertyNames` keywords. `Custom` has
    /// no built-in source.
    pub fn portable_source(self) -> Option<&'static str> {
        match self {
            KeyPattern::Uuid => Some(
                "^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
            ),
            KeyPattern::MongodbObjectId => Some("^[0-9a-fA-F]{24}$"),
            KeyPattern::Ulid => Some("^[0-9A-HJKMNP-TV-Za-hjkmnp-tv-z]{26}$"),
            KeyPattern::NumericId => Some("^[0-9]{6,20}$"),
            KeyPattern::PrefixedId => Some("^(user|doc|item|order)_[A-Za-z0-9]{8,32}$"),
            KeyPattern::Custom => None,
        }
    }
}

impl ConfidenceLevel {
    /// Buckets a confidence score.
    pub fn of(confidence: f64) -> Self {
        if confidence >= 0.8 {
            ConfidenceLevel::High
        } else if confidence >= 0.6 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }
}

/// Detector tuning knobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectorConfig {
    /// Key-count trigger: at least this many distinct keys.
    pub threshold: u64,
    /// Pattern trigger: at least this fraction of keys must match.
    pub min_pattern_match: f64,
    /// Detections below this confidence are discarded.
    pub confidence_threshold: f64,
    /// Extra identifier patterns, anchored regexes compiled at startup.
    pub custom_patterns: Vec<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            threshold: 50,
            min_pattern_match: 0.8,
            confidence_threshold: 0.7,
            custom_patterns: Vec::new(),
        }
    }
}

/// Outcome of running the detector over one key set.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternDetection {
    /// Whether the path should be treated as a dynamic-key map.
    pub detected: bool,
    /// Best-matching pattern, when one triggered or count did.
    pub pattern: Option<KeyPattern>,
    /// Source of the matching configured pattern, for [`KeyPattern::Custom`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_pattern: Option<String>,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Bucketed confidence.
    pub confidence_level: ConfidenceLevel,
    /// Distinct keys observed.
    pub total_keys: u64,
    /// Keys matching the best pattern.
    pub match_count: u64,
    /// `match_count / total_keys`.
    pub match_ratio: f64,
    /// Up to ten observed keys, sorted.
    pub example_keys: Vec<String>,
}

/// Maximum number of example keys carried in a detection.
pub const MAX_EXAMPLE_KEYS: usize = 10;

struct Candidate {
    pattern: KeyPattern,
    source: Option<String>,
    regex: Regex,
}

/// Compiled pattern table. Built once at startup so a bad configured pattern
/// fails the run before any sampling happens.
pub struct PatternSet {
    candidates: Vec<Candidate>,
}

impl std::fmt::Debug for PatternSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternSet")
            .field("candidates", &self.candidates.len())
            .finish()
    }
}

const BUILTINS: &[(KeyPattern, &str)] = &[
    (
        KeyPattern::Uuid,
        r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$",
    ),
    (KeyPattern::MongodbObjectId, r"(?i)^[0-9a-f]{24}$"),
    (KeyPattern::Ulid, r"(?i)^[0-9a-hjkmnp-tv-z]{26}$"),
    (KeyPattern::NumericId, r"^[0-9]{6,20}$"),
    (KeyPattern::PrefixedId, r"^(user|doc|item|order)_[A-Za-z0-9]{8,32}$"),
];

fn compile(pattern: &str) -> Result<Regex, Error> {
    Regex::new(pattern).map_err(|source| Error::InvalidKeyPattern {
        pattern: pattern.to_owned(),
        source,
    })
}

impl PatternSet {
    /// Compiles the built-in patterns plus any configured custom ones.
    pub fn compile(config: &DetectorConfig) -> Result<Self, Error> {
        let mut candidates = Vec::with_capacity(BUILTINS.len() + config.custom_patterns.len());
        for (pattern, source) in BUILTINS {
            candidates.push(Candidate {
                pattern: *pattern,
                source: None,
                regex: compile(source)?,
            });
        }
        for source in &config.custom_patterns {
            candidates.push(Candidate {
                pattern: KeyPattern::Custom,
                source: Some(source.clone()),
                regex: compile(source)?,
            });
        }
        Ok(PatternSet { candidates })
    }

    /// Runs detection over the distinct keys observed at one path.
    ///
    /// `documents_analyzed` enables the custom-pattern guard and the
    /// uniqueness penalty; pass `None` when the document count is unknown.
    pub fn detect(
        &self,
        keys: &BTreeSet<String>,
        config: &DetectorConfig,
        documents_analyzed: Option<u64>,
    ) -> PatternDetection {
        let total_keys = keys.len() as u64;
        let best = self
            .candidates
            .iter()
            .map(|candidate| {
                let matched = keys.iter().filter(|k| candidate.regex.is_match(k)).count() as u64;
                (candidate, matched)
            })
            .max_by(|a, b| a.1.cmp(&b.1));

        let (match_count, best_pattern, best_source) = match best {
            Some((candidate, matched)) if matched > 0 => {
                (matched, Some(candidate.pattern), candidate.source.clone())
            }
            _ => (0, None, None),
        };
        let match_ratio = if total_keys == 0 {
            0.0
        } else {
            match_count as f64 / total_keys as f64
        };

        let count_triggered = total_keys >= config.threshold;
        let pattern_triggered = match_ratio >= config.min_pattern_match && best_pattern.is_some();
        let mut should_detect = count_triggered || pattern_triggered;

        // Unrecognized key shapes on a small collection are usually a fixed
        // schema with many optional fields, not a dynamic map.
        if !pattern_triggered {
            if let Some(documents) = documents_analyzed {
                if documents > 50 {
                    let dominance = total_keys as f64 / documents as f64;
                    if !(total_keys > 500 || (total_keys >= 100 && dominance > 0.05)) {
                        should_detect = false;
                    }
                }
            }
        }

        let scale = if config.threshold == 0 {
            0.0
        } else {
            (total_keys as f64 / config.threshold as f64).log10()
        };
        let confidence = if pattern_triggered && count_triggered {
            let bonus = if total_keys > 2 * config.threshold {
                (0.05 * scale).clamp(0.0, 0.15)
            } else {
                0.0
            };
            (match_ratio + bonus).min(1.0)
        } else if pattern_triggered {
            (match_ratio + 0.05).min(1.0)
        } else if count_triggered {
            let mut confidence = (config.confidence_threshold + 0.2 * scale).min(0.9);
            let uniqueness = documents_analyzed
                .filter(|docs| *docs > 0)
                .map_or(1.0, |docs| total_keys as f64 / docs as f64);
            if uniqueness < 0.1 {
                confidence -= 0.1;
            }
            confidence.max(0.0)
        } else {
            match_ratio
        };

        let (pattern, custom_pattern) = if pattern_triggered {
            (best_pattern, best_source)
        } else if should_detect {
            (Some(KeyPattern::Custom), None)
        } else {
            (None, None)
        };

        PatternDetection {
            detected: should_detect && confidence >= config.confidence_threshold,
            pattern,
            custom_pattern,
            confidence,
            confidence_level: ConfidenceLevel::of(confidence),
            total_keys,
            match_count,
            match_ratio,
            example_keys: keys.iter().take(MAX_EXAMPLE_KEYS).cloned().collect(),
        }
    }
}
