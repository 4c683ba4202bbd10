//! User-triggered mutations and their transient outcomes.
//!
//! Each mutation is one request with no retry. Only a rejected credential is
//! returned as an error; every other failure becomes an error [`Notice`].

use log::warn;
use serde::Serialize;

use crate::api::ApiClient;
use crate::error::Result;
use crate::guard::Route;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Error,
}

/// Dismissible outcome of a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
    /// View to show after dismissing, if the current one no longer applies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<Route>,
}

impl Notice {
    pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            title: title.into(),
            message: message.into(),
            redirect: None,
        }
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: title.into(),
            message: message.into(),
            redirect: None,
        }
    }

    #[must_use]
    pub fn then(mut self, route: Route) -> Self {
        self.redirect = Some(route);
        self
    }

    pub fn is_success(&self) -> bool {
        self.level == NoticeLevel::Success
    }
}

/// A delete waiting for explicit confirmation.
///
/// Deleting takes two steps: ask for a `PendingDelete`, show it to the user,
/// then hand it back to a view's `confirm_delete`.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a delete only happens once confirmed"]
pub struct PendingDelete {
    id: u64,
}

impl PendingDelete {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn prompt(&self) -> String {
        format!("Delete pipeline #{}? This action cannot be undone.", self.id)
    }
}

pub fn request_delete(id: u64) -> PendingDelete {
    PendingDelete { id }
}

/// Trigger a run. Does not wait for the run to finish.
pub(crate) async fn run_pipeline(api: &ApiClient, id: u64) -> Result<Notice> {
    match api.run_pipeline(id).await {
        Ok(accepted) => {
            let message = match accepted.build_id {
                Some(build_id) => format!("Pipeline started successfully (build #{build_id})"),
                None => "Pipeline started successfully".to_string(),
            };
            Ok(Notice::success("Pipeline Started", message))
        }
        Err(e) if e.requires_login() => Err(e),
        Err(e) => {
            warn!("Failed to start pipeline {id}: {e}");
            Ok(Notice::error("Pipeline Failed", "Pipeline failed to start"))
        }
    }
}

pub(crate) async fn delete_pipeline(api: &ApiClient, pending: PendingDelete) -> Result<Notice> {
    let id = pending.id;
    match api.delete_pipeline(id).await {
        Ok(()) => Ok(Notice::success(
            "Pipeline Deleted",
            format!("Pipeline #{id} was deleted"),
        )),
        Err(e) if e.requires_login() => Err(e),
        Err(e) => {
            warn!("Failed to delete pipeline {id}: {e}");
            Ok(Notice::error("Delete Failed", e.to_string()))
        }
    }
}
