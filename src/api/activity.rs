use super::client::ApiClient;
use super::types::{decode_list, ActivityEntry};
use crate::error::Result;

impl ApiClient {
    /// `GET /api/activity-logs`: the most recent build output across all
    /// pipelines, newest first.
    pub async fn list_activity(&self) -> Result<Vec<ActivityEntry>> {
        let url = self.endpoint("api/activity-logs")?;
        let response = self.send(self.http().get(url)).await?;
        let body = Self::read_json(response).await?;
        Ok(decode_list(body, "activity entries"))
    }
}
