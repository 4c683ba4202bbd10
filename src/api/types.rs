use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Execution status of a pipeline or build.
///
/// The server treats this as an open set of strings. Anything outside the four
/// known values (`queued`, `unknown`, null, ...) is shown as `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "Value")]
pub enum Status {
    #[default]
    Idle,
    Running,
    Success,
    Failed,
}

impl Status {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "running" => Self::Running,
            "success" => Self::Success,
            "failed" => Self::Failed,
            _ => Self::Idle,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl From<Value> for Status {
    fn from(value: Value) -> Self {
        value.as_str().map_or(Self::Idle, Self::parse)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named command in a pipeline definition.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "command")]
    pub cmd: String,
}

impl Step {
    pub fn new(name: impl Into<String>, cmd: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cmd: cmd.into(),
        }
    }
}

/// Pipeline configuration payload as sent in `config_json`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// A pipeline as returned by `GET /api/pipelines`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: u64,
    #[serde(default, deserialize_with = "text")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Status,
    #[serde(default, rename(deserialize = "config_json"), deserialize_with = "steps")]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub runtime: Option<String>,
    #[serde(default, deserialize_with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

/// One row of a pipeline's build history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default, deserialize_with = "timestamp")]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub duration: Option<String>,
}

/// A pipeline as returned by `GET /api/pipelines/{id}`, including the logs of
/// its most recent build and its recent history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDetail {
    pub id: u64,
    #[serde(default, deserialize_with = "text")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Status,
    #[serde(default, deserialize_with = "timestamp")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, rename(deserialize = "config_json"), deserialize_with = "steps")]
    pub steps: Vec<Step>,
    #[serde(default, deserialize_with = "lines")]
    pub logs: Vec<String>,
    #[serde(default, deserialize_with = "list")]
    pub history: Vec<HistoryEntry>,
}

/// One execution of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub id: u64,
    #[serde(default)]
    pub pipeline_id: u64,
    #[serde(default)]
    pub pipeline_name: Option<String>,
    #[serde(default)]
    pub status: Status,
    #[serde(default, deserialize_with = "timestamp")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Duration in seconds, when finished
    #[serde(default)]
    pub duration: Option<i64>,
}

impl Build {
    /// Name to show for the owning pipeline.
    pub fn pipeline_label(&self) -> String {
        match &self.pipeline_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("Pipeline #{}", self.pipeline_id),
        }
    }
}

/// One stored output line of a build, from `GET /api/builds/{id}/logs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildLogLine {
    /// Zero-based index of the step that wrote the line
    #[serde(default)]
    pub step_index: Option<u32>,
    #[serde(default, deserialize_with = "text")]
    pub text: String,
    #[serde(default, deserialize_with = "timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// An entry of the recent activity feed, `GET /api/activity-logs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: u64,
    #[serde(default, deserialize_with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    /// Taken from `details.message`
    #[serde(default, rename(deserialize = "details"), deserialize_with = "detail_message")]
    pub message: String,
}

/// The signed-in user as returned by `GET /api/me`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: u64,
    #[serde(default, deserialize_with = "text")]
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn display_name(&self) -> &str {
        if self.username.is_empty() {
            "User"
        } else {
            &self.username
        }
    }
}

/// Request body for `POST /api/pipelines`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewPipeline {
    pub name: String,
    pub description: String,
    pub repo_url: String,
    pub branch: String,
    pub config_json: PipelineConfig,
}

/// Response of `POST /api/pipelines/{id}/run`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RunAccepted {
    #[serde(default)]
    pub build_id: Option<u64>,
}

/// Decode the steps of a configuration payload.
///
/// The payload may be a JSON object or a string holding encoded JSON. Anything
/// that does not decode to `{"steps": [...]}` yields no steps.
pub fn parse_steps(config: &Value) -> Vec<Step> {
    let decoded = match config {
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!("Ignoring malformed pipeline configuration: {e}");
                return Vec::new();
            }
        },
        other => other.clone(),
    };

    match serde_json::from_value::<PipelineConfig>(decoded) {
        Ok(config) => config.steps,
        Err(e) => {
            warn!("Ignoring malformed pipeline configuration: {e}");
            Vec::new()
        }
    }
}

/// Parse a server timestamp. Naive timestamps are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

/// Decode a JSON array element by element, skipping entries that do not match.
/// A non-array value decodes to an empty list.
pub(crate) fn decode_list<T: DeserializeOwned>(value: Value, what: &str) -> Vec<T> {
    let Value::Array(items) = value else {
        if !value.is_null() {
            warn!("Expected a list of {what}, got something else; using an empty list");
        }
        return Vec::new();
    };

    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!("Skipping malformed {what} entry: {e}");
                None
            }
        })
        .collect()
}

fn text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn steps<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Step>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(parse_steps(&value))
}

fn timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_str().and_then(parse_timestamp))
}

fn detail_message<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(message) => message,
        other => other
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string(),
    })
}

fn lines<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(line) => Some(line),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}

fn list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(decode_list(value, "history"))
}
