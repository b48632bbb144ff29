//! Flat result records and the run report.

use crate::task::MutationResult;
use chrono::{DateTime, Utc};
use mutjit_core::{
    Distance, ExecutionStatus, MutationSummary, Result, RunId, SourceLocation, TestId,
};
use serde::{Deserialize, Serialize};

/// One (mutation point, test) execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Unique identifier of the mutation point
    pub mutation_point: String,
    pub test: TestId,
    pub status: ExecutionStatus,
    pub running_time_ms: u64,
    pub distance: Distance,
    pub diagnostics: String,
    pub location: Option<SourceLocation>,
    /// Captured program output or the reason for an Invalid status
    pub output: String,
}

impl From<&MutationResult> for ResultRecord {
    fn from(result: &MutationResult) -> Self {
        Self {
            mutation_point: result.point.unique_identifier(),
            test: result.test.clone(),
            status: result.result.status,
            running_time_ms: result.result.running_time.as_millis() as u64,
            distance: result.distance,
            diagnostics: result.point.diagnostics.clone(),
            location: result.point.location.clone(),
            output: result.result.output.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Sorted by mutation point, then test
    pub records: Vec<ResultRecord>,
    pub summary: MutationSummary,
}

impl RunReport {
    pub fn new(run_id: RunId, started_at: DateTime<Utc>, results: &[MutationResult]) -> Self {
        let mut records: Vec<ResultRecord> = results.iter().map(ResultRecord::from).collect();
        records.sort_by(|a, b| {
            a.mutation_point
                .cmp(&b.mutation_point)
                .then_with(|| a.test.cmp(&b.test))
        });
        let summary = MutationSummary::from_results(
            records
                .iter()
                .map(|r| (r.mutation_point.as_str(), r.status)),
        );

        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            records,
            summary,
        }
    }

    pub fn has_invalid(&self) -> bool {
        self.records
            .iter()
            .any(|r| r.status == ExecutionStatus::Invalid)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Short human-readable summary
    pub fn render_text(&self) -> String {
        let mut out = format!(
            "run {}: {} mutants, {} killed, {} survived, {} invalid",
            self.run_id,
            self.summary.mutants,
            self.summary.killed,
            self.summary.survived,
            self.summary.invalid
        );
        if let Some(score) = self.summary.score() {
            out.push_str(&format!(", score {:.1}%", score * 100.0));
        }
        for survivor in &self.summary.survivors {
            let diagnostics = self
                .records
                .iter()
                .find(|r| &r.mutation_point == survivor)
                .map(|r| r.diagnostics.as_str())
                .unwrap_or_default();
            out.push_str(&format!("\n  survived: {} ({})", survivor, diagnostics));
        }
        out
    }
}
