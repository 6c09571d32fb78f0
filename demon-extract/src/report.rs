//! End-of-run report

use crate::pipeline::{JobReport, LocationSummary};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;

/// Overall verdict of an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    /// Completed, but some records failed or a job fell below the threshold
    SuccessWithWarnings,
    /// Strict mode and a job fell below the success threshold
    Failed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::SuccessWithWarnings => "success with warnings",
            RunOutcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub revision: Option<String>,
    pub database: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub strict: bool,
    pub min_success_rate: f64,
    pub locations: Option<LocationSummary>,
    pub jobs: Vec<JobReport>,
}

impl RunReport {
    pub fn new(revision: Option<String>, database: impl Into<String>, strict: bool, min_success_rate: f64) -> Self {
        Self {
            revision,
            database: database.into(),
            started_at: Utc::now(),
            finished_at: None,
            strict,
            min_success_rate,
            locations: None,
            jobs: Vec::new(),
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    fn below_threshold(&self) -> impl Iterator<Item = &JobReport> {
        self.jobs
            .iter()
            .filter(move |job| job.success_rate() < self.min_success_rate)
    }

    pub fn outcome(&self) -> RunOutcome {
        let below = self.below_threshold().count() > 0;
        if below && self.strict {
            return RunOutcome::Failed;
        }

        let location_issues = self
            .locations
            .as_ref()
            .is_some_and(|l| !l.stats.issues.is_empty());
        let warnings = self.jobs.iter().any(|j| j.has_failures() || j.cancelled);

        if below || warnings || location_issues {
            RunOutcome::SuccessWithWarnings
        } else {
            RunOutcome::Success
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Revision {} -> {}",
            self.revision.as_deref().unwrap_or("unknown"),
            self.database
        );

        if let Some(locations) = &self.locations {
            let _ = writeln!(
                out,
                "Locations: {} ({} stored)",
                locations.stats.display_string(),
                locations.written
            );
            for issue in locations.stats.issues.iter().take(10) {
                let _ = writeln!(out, "  ! {}", issue);
            }
            if locations.stats.issues.len() > 10 {
                let _ = writeln!(out, "  ... {} more issues", locations.stats.issues.len() - 10);
            }
        }

        for job in &self.jobs {
            let _ = writeln!(out, "{}", job.display_string());
            if job.cancelled {
                let _ = writeln!(out, "  cancelled before all records were read");
            }
            for sample in job.materialize.errors.samples().iter().chain(job.write.errors.samples()) {
                let _ = writeln!(out, "  [{}] {}: {}", sample.kind, sample.context, sample.message);
            }
            let dropped = job.materialize.errors.dropped() + job.write.errors.dropped();
            if dropped > 0 {
                let _ = writeln!(out, "  ... {} more errors", dropped);
            }
        }

        for job in self.below_threshold() {
            let _ = writeln!(
                out,
                "Job '{}' below success threshold: {:.1}% < {:.1}%",
                job.job,
                job.success_rate() * 100.0,
                self.min_success_rate * 100.0
            );
        }

        let _ = writeln!(out, "Outcome: {}", self.outcome().as_str());
        out
    }
}
