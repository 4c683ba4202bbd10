use std::time::Duration;

use log::{debug, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use url::Url;

use crate::error::{PipewatchError, Result};
use crate::session::Session;

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000";

/// HTTP client for the pipeline backend.
///
/// Every protected request goes through [`ApiClient::send`], which attaches the
/// current credential and applies the sign-out policy on 401 responses.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    session: Session,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration, session: Session) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("pipewatch/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| PipewatchError::Config(format!("Failed to create HTTP client: {e}")))?;

        let mut base_url = Url::parse(base_url)
            .map_err(|e| PipewatchError::Config(format!("Invalid base URL: {e}")))?;

        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(PipewatchError::Config(format!(
                "Base URL must use http or https, got: {}",
                base_url.scheme()
            )));
        }

        // Keep any path prefix when joining endpoint paths
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            session,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub(super) fn http(&self) -> &Client {
        &self.client
    }

    /// Resolve an endpoint path such as `api/pipelines` against the base URL.
    pub(super) fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| PipewatchError::Config(format!("Invalid endpoint URL: {e}")))
    }

    /// Attach the bearer credential, if the session holds one.
    ///
    /// The credential is read at send time, never cached.
    pub fn auth_request(&self, request: RequestBuilder) -> RequestBuilder {
        if let Some(token) = self.session.token() {
            request.bearer_auth(token.as_str())
        } else {
            request
        }
    }

    /// Send a protected request.
    ///
    /// A 401 clears the session and yields [`PipewatchError::Unauthorized`],
    /// whichever endpoint produced it. Any other non-2xx status yields
    /// [`PipewatchError::Api`].
    pub(super) async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self.auth_request(request).send().await?;
        let status = response.status();
        debug!("{} {}", status.as_u16(), response.url().path());

        if status == StatusCode::UNAUTHORIZED {
            self.session.invalidate();
            return Err(PipewatchError::Unauthorized);
        }

        if !status.is_success() {
            return Err(api_error(response).await);
        }

        Ok(response)
    }

    /// Read a response body as JSON, falling back to `null` when the body is
    /// empty or not JSON.
    pub(super) async fn read_json(response: Response) -> Result<Value> {
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        Ok(serde_json::from_str(&body).unwrap_or_else(|e| {
            warn!("Response body is not valid JSON ({e}); treating it as empty");
            Value::Null
        }))
    }
}

/// Build an API error from a failed response, preferring the server's own
/// `error`/`msg`/`message` field over the raw body.
pub(super) async fn api_error(response: Response) -> PipewatchError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read error response".to_string());

    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|value| {
            ["error", "msg", "message"]
                .iter()
                .find_map(|key| value.get(key).and_then(Value::as_str).map(str::to_owned))
        })
        .unwrap_or(body);

    PipewatchError::Api { status, message }
}
