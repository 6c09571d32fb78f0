//! Run statistics
//!
//! Every materialize call returns its own [`RunStatistics`]; callers merge
//! them. Nothing here is shared or global.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default cap on kept error samples
pub const DEFAULT_SAMPLE_LIMIT: usize = 50;

/// Error taxonomy used for samples and failure rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Record unreadable at the source
    Decode,
    /// One field or element fell back to its raw value
    FieldConversion,
    /// Duplicate, out-of-range or incomplete location record
    Validation,
    /// Insert or constraint failure
    Persistence,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::Decode => "decode",
            IssueKind::FieldConversion => "field_conversion",
            IssueKind::Validation => "validation",
            IssueKind::Persistence => "persistence",
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSample {
    pub kind: IssueKind,
    /// Record path and field breadcrumb
    pub context: String,
    pub message: String,
}

/// Bounded list of error samples; overflow is only counted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSamples {
    limit: usize,
    samples: Vec<ErrorSample>,
    dropped: usize,
}

impl Default for ErrorSamples {
    fn default() -> Self {
        Self::with_limit(DEFAULT_SAMPLE_LIMIT)
    }
}

impl ErrorSamples {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            samples: Vec::new(),
            dropped: 0,
        }
    }

    pub fn push(&mut self, kind: IssueKind, context: impl Into<String>, message: impl Into<String>) {
        if self.samples.len() < self.limit {
            self.samples.push(ErrorSample {
                kind,
                context: context.into(),
                message: message.into(),
            });
        } else {
            self.dropped += 1;
        }
    }

    pub fn extend(&mut self, other: ErrorSamples) {
        for sample in other.samples {
            if self.samples.len() < self.limit {
                self.samples.push(sample);
            } else {
                self.dropped += 1;
            }
        }
        self.dropped += other.dropped;
    }

    pub fn samples(&self) -> &[ErrorSample] {
        &self.samples
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn total(&self) -> usize {
        self.samples.len() + self.dropped
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty() && self.dropped == 0
    }
}

/// Counters for one materialization run (or a merge of several)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    /// Top-level records seen
    pub processed: usize,
    /// Full objects built without any fallback
    pub succeeded: usize,
    /// Records with at least one fallback, or unreadable at the source
    pub failed: usize,
    /// Top-level records with an unresolvable type (or filtered out)
    pub skipped: usize,
    /// Fields that fell back to their raw value or default
    pub field_fallbacks: usize,
    /// List elements kept raw after a conversion failure
    pub element_fallbacks: usize,
    /// Nested records materialized into objects
    pub nested_objects: usize,
    /// Nested records passed through because their type is unknown
    pub nested_skipped: usize,
    /// Deepest nesting level reached
    pub max_depth: usize,
    pub errors: ErrorSamples,
}

impl RunStatistics {
    pub fn with_sample_limit(limit: usize) -> Self {
        Self {
            errors: ErrorSamples::with_limit(limit),
            ..Self::default()
        }
    }

    /// Fold another run's counts into this one
    pub fn merge(&mut self, other: RunStatistics) {
        self.processed += other.processed;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.field_fallbacks += other.field_fallbacks;
        self.element_fallbacks += other.element_fallbacks;
        self.nested_objects += other.nested_objects;
        self.nested_skipped += other.nested_skipped;
        self.max_depth = self.max_depth.max(other.max_depth);
        self.errors.extend(other.errors);
    }

    /// Succeeded share of records that were not skipped (1.0 when none)
    pub fn success_rate(&self) -> f64 {
        let considered = self.processed.saturating_sub(self.skipped);
        if considered == 0 {
            1.0
        } else {
            self.succeeded as f64 / considered as f64
        }
    }

    /// Count an unreadable record
    pub fn record_decode_failure(&mut self, path: &str, message: impl Into<String>) {
        self.processed += 1;
        self.failed += 1;
        self.errors.push(IssueKind::Decode, path, message);
    }

    /// Count a record dropped before materialization (e.g. type filter)
    pub fn record_skip(&mut self) {
        self.processed += 1;
        self.skipped += 1;
    }

    pub fn display_string(&self) -> String {
        format!(
            "{} processed, {} succeeded, {} failed, {} skipped ({:.1}% success)",
            self.processed,
            self.succeeded,
            self.failed,
            self.skipped,
            self.success_rate() * 100.0
        )
    }
}
