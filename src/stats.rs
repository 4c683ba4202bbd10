//! Aggregates derived from a snapshot. Everything here is a pure function of
//! the collections passed in and is recomputed on every update.

use serde::Serialize;

use crate::api::{Build, Pipeline, Status};

/// Number of items per normalized status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub idle: usize,
    pub running: usize,
    pub success: usize,
    pub failed: usize,
}

impl StatusCounts {
    /// Count statuses in one pass. Order of the input does not matter.
    pub fn tally<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = Status>,
    {
        statuses
            .into_iter()
            .fold(Self::default(), |mut counts, status| {
                match status {
                    Status::Idle => counts.idle += 1,
                    Status::Running => counts.running += 1,
                    Status::Success => counts.success += 1,
                    Status::Failed => counts.failed += 1,
                }
                counts
            })
    }

    pub fn of_pipelines(pipelines: &[Pipeline]) -> Self {
        Self::tally(pipelines.iter().map(|p| p.status))
    }

    pub fn of_builds(builds: &[Build]) -> Self {
        Self::tally(builds.iter().map(|b| b.status))
    }

    /// Items that actually executed: running, success and failed.
    pub fn executions(&self) -> usize {
        self.running + self.success + self.failed
    }
}

/// Headline numbers of the dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub pipelines: usize,
    pub running: usize,
    pub failed: usize,
    pub success: usize,
}

impl DashboardStats {
    pub fn from_pipelines(pipelines: &[Pipeline]) -> Self {
        let counts = StatusCounts::of_pipelines(pipelines);
        Self {
            pipelines: pipelines.len(),
            running: counts.running,
            failed: counts.failed,
            success: counts.success,
        }
    }
}

/// Success and failure rate as whole percentages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Rates {
    pub executions: usize,
    pub success_rate: u32,
    pub failure_rate: u32,
}

impl Rates {
    /// Rates over `running + success + failed`; both 0 when nothing executed.
    pub fn from_counts(counts: &StatusCounts) -> Self {
        let executions = counts.executions();
        Self {
            executions,
            success_rate: percentage(counts.success, executions),
            failure_rate: percentage(counts.failed, executions),
        }
    }
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn percentage(part: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((part as f64 / total as f64) * 100.0).round() as u32
}

/// Short observations shown next to the headline numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "count", rename_all = "snake_case")]
pub enum Insight {
    AllStable,
    FailuresDetected(usize),
    Running(usize),
    HighReliability,
    NoPipelines,
}

impl Insight {
    pub fn message(&self) -> String {
        match self {
            Self::AllStable => "All pipelines are stable with no active issues".into(),
            Self::FailuresDetected(n) => format!("{n} pipeline failure(s) detected, review required"),
            Self::Running(n) => format!("{n} pipeline execution(s) currently running"),
            Self::HighReliability => "High reliability: success rate above 90%".into(),
            Self::NoPipelines => "No pipelines configured, create your first pipeline".into(),
        }
    }
}

pub fn insights(stats: &DashboardStats, rates: &Rates) -> Vec<Insight> {
    let mut insights = Vec::new();

    if stats.failed == 0 && stats.running == 0 {
        insights.push(Insight::AllStable);
    }
    if stats.failed > 0 {
        insights.push(Insight::FailuresDetected(stats.failed));
    }
    if stats.running > 0 {
        insights.push(Insight::Running(stats.running));
    }
    if rates.success_rate >= 90 && stats.failed == 0 {
        insights.push(Insight::HighReliability);
    }
    if stats.pipelines == 0 {
        insights.push(Insight::NoPipelines);
    }

    insights
}
