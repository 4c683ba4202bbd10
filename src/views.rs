use std::cmp::Ordering;

use clap::ValueEnum;
use serde::Serialize;

use crate::api::{Build, Pipeline, Status};

/// How many builds the recent activity view shows.
pub const RECENT_BUILDS_LIMIT: usize = 10;

/// Status filter of the pipeline list.
///
/// There is no `idle` filter, so idle pipelines only show under `all`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    All,
    Running,
    Success,
    Failed,
}

impl StatusFilter {
    pub fn matches(self, status: Status) -> bool {
        match self {
            Self::All => true,
            Self::Running => status == Status::Running,
            Self::Success => status == Status::Success,
            Self::Failed => status == Status::Failed,
        }
    }
}

/// Pipelines whose normalized status matches `filter`, in their original order.
pub fn filter_pipelines(pipelines: &[Pipeline], filter: StatusFilter) -> Vec<Pipeline> {
    pipelines
        .iter()
        .filter(|p| filter.matches(p.status))
        .cloned()
        .collect()
}

/// The most recent builds, newest first.
///
/// Builds without a start time sort after every timestamped build. Equal
/// start times fall back to the higher id first.
pub fn recent_builds(builds: &[Build]) -> Vec<Build> {
    let mut sorted = builds.to_vec();
    sorted.sort_by(newest_first);
    sorted.truncate(RECENT_BUILDS_LIMIT);
    sorted
}

fn newest_first(a: &Build, b: &Build) -> Ordering {
    match (a.started_at, b.started_at) {
        (Some(a_start), Some(b_start)) => b_start.cmp(&a_start),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| b.id.cmp(&a.id))
}
