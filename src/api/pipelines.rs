use log::info;
use serde_json::Value;

use super::client::ApiClient;
use super::types::{decode_list, NewPipeline, Pipeline, PipelineDetail, RunAccepted};
use crate::error::{PipewatchError, Result};

impl ApiClient {
    /// `GET /api/pipelines`
    pub async fn list_pipelines(&self) -> Result<Vec<Pipeline>> {
        let url = self.endpoint("api/pipelines")?;
        let response = self.send(self.http().get(url)).await?;
        let body = Self::read_json(response).await?;
        Ok(decode_list(body, "pipelines"))
    }

    /// `GET /api/pipelines/{id}`
    pub async fn pipeline(&self, id: u64) -> Result<PipelineDetail> {
        let url = self.endpoint(&format!("api/pipelines/{id}"))?;
        let response = self.send(self.http().get(url)).await?;
        let body = Self::read_json(response).await?;
        decode_object(body, "pipeline detail")
    }

    /// `POST /api/pipelines`
    pub async fn create_pipeline(&self, pipeline: &NewPipeline) -> Result<Pipeline> {
        let url = self.endpoint("api/pipelines")?;
        let response = self.send(self.http().post(url).json(pipeline)).await?;
        let body = Self::read_json(response).await?;
        let created: Pipeline = decode_object(body, "created pipeline")?;
        info!("Created pipeline {} ({})", created.id, created.name);
        Ok(created)
    }

    /// `POST /api/pipelines/{id}/run`
    ///
    /// Returns as soon as the backend accepts the run. Completion arrives
    /// later as a push notification.
    pub async fn run_pipeline(&self, id: u64) -> Result<RunAccepted> {
        let url = self.endpoint(&format!("api/pipelines/{id}/run"))?;
        let response = self.send(self.http().post(url)).await?;
        let body = Self::read_json(response).await?;
        let accepted = serde_json::from_value(body).unwrap_or_default();
        info!("Triggered pipeline {id}");
        Ok(accepted)
    }

    /// `DELETE /api/pipelines/{id}`
    pub async fn delete_pipeline(&self, id: u64) -> Result<()> {
        let url = self.endpoint(&format!("api/pipelines/{id}"))?;
        self.send(self.http().delete(url)).await?;
        info!("Deleted pipeline {id}");
        Ok(())
    }
}

/// Objects have no neutral default, so a body of the wrong shape is an error.
fn decode_object<T: serde::de::DeserializeOwned>(body: Value, what: &str) -> Result<T> {
    serde_json::from_value(body).map_err(|e| PipewatchError::Api {
        status: 200,
        message: format!("Unexpected {what} response: {e}"),
    })
}
