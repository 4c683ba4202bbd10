use super::client::ApiClient;
use super::types::{decode_list, Build, BuildLogLine};
use crate::error::Result;

impl ApiClient {
    /// `GET /api/builds`
    ///
    /// The server decides how many builds to return; sorting and truncation
    /// for display happen client side.
    pub async fn list_builds(&self) -> Result<Vec<Build>> {
        let url = self.endpoint("api/builds")?;
        let response = self.send(self.http().get(url)).await?;
        let body = Self::read_json(response).await?;
        Ok(decode_list(body, "builds"))
    }

    /// `GET /api/builds/{id}/logs`, oldest line first.
    pub async fn list_build_logs(&self, build_id: u64) -> Result<Vec<BuildLogLine>> {
        let url = self.endpoint(&format!("api/builds/{build_id}/logs"))?;
        let response = self.send(self.http().get(url)).await?;
        let body = Self::read_json(response).await?;
        Ok(decode_list(body, "build log lines"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipewatchError;
    use crate::session::{CredentialStore, Session, Token};
    use std::time::Duration;

    fn signed_in_client(server: &mockito::ServerGuard) -> ApiClient {
        let session = Session::open(CredentialStore::in_memory());
        session.sign_in(Token::from("secret")).unwrap();
        ApiClient::new(&server.url(), Duration::from_secs(5), session).unwrap()
    }

    #[tokio::test]
    async fn test_list_build_logs() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/builds/12/logs")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[
                    {"step_index": 0, "text": "cargo build", "timestamp": "2024-06-01T10:00:00"},
                    {"step_index": null, "text": "done", "timestamp": null},
                    "garbage"
                ]"#,
            )
            .create_async()
            .await;

        let lines = signed_in_client(&server).list_build_logs(12).await.unwrap();

        mock.assert_async().await;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].step_index, Some(0));
        assert_eq!(lines[0].text, "cargo build");
        assert!(lines[0].timestamp.is_some());
        assert_eq!(lines[1].step_index, None);
    }

    #[tokio::test]
    async fn test_unknown_build_is_an_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/builds/99/logs")
            .with_status(404)
            .with_body(r#"{"error": "Build not found"}"#)
            .create_async()
            .await;

        let err = signed_in_client(&server).list_build_logs(99).await.unwrap_err();
        assert!(matches!(err, PipewatchError::Api { status: 404, .. }));
        assert!(err.to_string().contains("Build not found"));
    }

    #[tokio::test]
    async fn test_non_array_builds_body_is_empty() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/builds")
            .with_status(200)
            .with_body(r#"{"builds": []}"#)
            .create_async()
            .await;

        let builds = signed_in_client(&server).list_builds().await.unwrap();
        assert!(builds.is_empty());
    }
}
