use log::{info, warn};
use serde::Serialize;

use crate::actions::Notice;
use crate::api::{ApiClient, NewPipeline, PipelineConfig, Step};
use crate::error::{PipewatchError, Result};
use crate::guard::Route;

pub const DEFAULT_BRANCH: &str = "main";

/// Values entered into the create-pipeline form.
///
/// Submitting borrows the draft, so a failed submit leaves every value in
/// place for another attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineDraft {
    pub name: String,
    pub description: String,
    pub repo_url: String,
    pub branch: String,
    pub steps: Vec<Step>,
}

impl Default for PipelineDraft {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            repo_url: String::new(),
            branch: DEFAULT_BRANCH.to_string(),
            steps: vec![Step::new("Build", "")],
        }
    }
}

impl PipelineDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Append an empty step named after its position.
    pub fn add_step(&mut self) -> &mut Step {
        let name = format!("Step {}", self.steps.len() + 1);
        self.steps.push(Step::new(name, ""));
        let last = self.steps.len() - 1;
        &mut self.steps[last]
    }

    pub fn remove_step(&mut self, index: usize) -> Option<Step> {
        (index < self.steps.len()).then(|| self.steps.remove(index))
    }

    pub fn set_step(
        &mut self,
        index: usize,
        name: impl Into<String>,
        cmd: impl Into<String>,
    ) -> Result<()> {
        let step = self.steps.get_mut(index).ok_or_else(|| {
            PipewatchError::Validation(format!("no step at position {}", index + 1))
        })?;
        *step = Step::new(name, cmd);
        Ok(())
    }

    /// Check required fields: a name, and a name and command for every step.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PipewatchError::Validation("name is required".into()));
        }

        for (position, step) in self.steps.iter().enumerate().map(|(i, s)| (i + 1, s)) {
            if step.name.trim().is_empty() {
                return Err(PipewatchError::Validation(format!(
                    "step {position} needs a name"
                )));
            }
            if step.cmd.trim().is_empty() {
                return Err(PipewatchError::Validation(format!(
                    "step {position} ({}) needs a command",
                    step.name.trim()
                )));
            }
        }

        Ok(())
    }

    pub fn to_new_pipeline(&self) -> NewPipeline {
        NewPipeline {
            name: self.name.trim().to_string(),
            description: self.description.trim().to_string(),
            repo_url: self.repo_url.trim().to_string(),
            branch: match self.branch.trim() {
                "" => DEFAULT_BRANCH.to_string(),
                branch => branch.to_string(),
            },
            config_json: PipelineConfig {
                steps: self
                    .steps
                    .iter()
                    .map(|s| Step::new(s.name.trim(), s.cmd.trim()))
                    .collect(),
            },
        }
    }

    /// Validate and create the pipeline.
    ///
    /// An invalid draft fails with [`PipewatchError::Validation`] before any
    /// request. A rejected create becomes an error notice; on success the
    /// notice points to the pipeline list.
    pub async fn submit(&self, api: &ApiClient) -> Result<Notice> {
        self.validate()?;

        match api.create_pipeline(&self.to_new_pipeline()).await {
            Ok(pipeline) => {
                info!("Created pipeline {} ({})", pipeline.id, pipeline.name);
                Ok(Notice::success(
                    "Pipeline Created",
                    format!("Pipeline \"{}\" was created", pipeline.name),
                )
                .then(Route::Pipelines))
            }
            Err(e) if e.requires_login() => Err(e),
            Err(e) => {
                warn!("Failed to create pipeline {}: {e}", self.name);
                Ok(Notice::error("Create Failed", e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{CredentialStore, Session, Token};
    use mockito::Matcher;
    use serde_json::json;
    use std::time::Duration;

    fn client(server: &mockito::ServerGuard) -> ApiClient {
        let session = Session::open(CredentialStore::in_memory());
        session.sign_in(Token::from("t")).unwrap();
        ApiClient::new(&server.url(), Duration::from_secs(5), session).unwrap()
    }

    fn valid_draft() -> PipelineDraft {
        let mut draft = PipelineDraft::new("api");
        draft.set_step(0, "Build", "cargo build").unwrap();
        draft
    }

    #[test]
    fn test_defaults() {
        let draft = PipelineDraft::default();
        assert_eq!(draft.branch, "main");
        assert_eq!(draft.steps, vec![Step::new("Build", "")]);
    }

    #[test]
    fn test_add_and_remove_steps() {
        let mut draft = PipelineDraft::default();
        draft.add_step().cmd = "make test".into();
        draft.add_step();

        let names: Vec<&str> = draft.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Build", "Step 2", "Step 3"]);
        assert_eq!(draft.steps[1].cmd, "make test");

        assert_eq!(draft.remove_step(0).unwrap().name, "Build");
        assert!(draft.remove_step(5).is_none());
        assert_eq!(draft.steps.len(), 2);

        assert!(draft.set_step(4, "x", "y").is_err());
    }

    #[test]
    fn test_validation() {
        assert!(valid_draft().validate().is_ok());

        let mut blank_name = valid_draft();
        blank_name.name = "   ".into();
        assert!(matches!(
            blank_name.validate(),
            Err(PipewatchError::Validation(msg)) if msg.contains("name")
        ));

        // The default step has no command yet
        let err = PipelineDraft::new("api").validate().unwrap_err();
        assert!(err.to_string().contains("step 1"));

        let mut unnamed_step = valid_draft();
        unnamed_step.set_step(0, "", "make").unwrap();
        assert!(unnamed_step.validate().is_err());
    }

    #[test]
    fn test_to_new_pipeline_trims_and_defaults_branch() {
        let mut draft = valid_draft();
        draft.name = " api ".into();
        draft.branch = " ".into();

        let body = draft.to_new_pipeline();
        assert_eq!(body.name, "api");
        assert_eq!(body.branch, "main");
        assert_eq!(body.config_json.steps, vec![Step::new("Build", "cargo build")]);
    }

    #[tokio::test]
    async fn test_invalid_draft_issues_no_request() {
        let mut server = mockito::Server::new_async().await;
        let create = server
            .mock("POST", "/api/pipelines")
            .expect(0)
            .create_async()
            .await;

        let result = PipelineDraft::new("").submit(&client(&server)).await;

        assert!(matches!(result, Err(PipewatchError::Validation(_))));
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_submit_sends_body_and_redirects() {
        let mut server = mockito::Server::new_async().await;
        let create = server
            .mock("POST", "/api/pipelines")
            .match_body(Matcher::PartialJson(json!({
                "name": "api",
                "branch": "main",
                "config_json": {"steps": [{"name": "Build", "cmd": "cargo build"}]}
            })))
            .with_status(201)
            .with_body(r#"{"id": 7, "name": "api", "config_json": {"steps": []}}"#)
            .create_async()
            .await;

        let notice = valid_draft().submit(&client(&server)).await.unwrap();

        assert!(notice.is_success());
        assert_eq!(notice.redirect, Some(Route::Pipelines));
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_submit_keeps_draft() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/pipelines")
            .with_status(400)
            .with_body(r#"{"error": "Name already taken"}"#)
            .create_async()
            .await;

        let draft = valid_draft();
        let before = draft.clone();
        let notice = draft.submit(&client(&server)).await.unwrap();

        assert!(!notice.is_success());
        assert!(notice.message.contains("Name already taken"));
        assert_eq!(draft, before);
    }
}
