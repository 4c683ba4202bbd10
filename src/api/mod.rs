mod activity;
mod auth;
mod builds;
mod client;
mod pipelines;
mod types;

pub use client::{ApiClient, DEFAULT_BASE_URL};
pub use types::{
    ActivityEntry, Build, BuildLogLine, NewPipeline, Pipeline, PipelineConfig,
    PipelineDetail, Status, Step, User,
};
