use log::info;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::client::{api_error, ApiClient};
use super::types::User;
use crate::error::{PipewatchError, Result};
use crate::session::Token;

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    access_token: Option<String>,
}

impl ApiClient {
    /// `POST /api/auth/login`
    ///
    /// Exchanges username and password for a credential and signs the session
    /// in with it.
    pub async fn login(&self, username: &str, password: &str) -> Result<Token> {
        let url = self.endpoint("api/auth/login")?;
        let response = self
            .http()
            .post(url)
            .json(&LoginRequest { username, password })
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(PipewatchError::InvalidCredentials);
        }
        if !status.is_success() {
            return Err(api_error(response).await);
        }

        let body = Self::read_json(response).await?;
        let token = serde_json::from_value::<LoginResponse>(body)
            .ok()
            .and_then(|login| login.access_token)
            .filter(|token| !token.is_empty())
            .map(Token::from)
            .ok_or_else(|| PipewatchError::Api {
                status: status.as_u16(),
                message: "Login response did not contain an access token".into(),
            })?;

        self.session().sign_in(token.clone())?;
        info!("Logged in as {username}");
        Ok(token)
    }

    /// `GET /api/me`
    ///
    /// Resolves the user behind the current credential and records it on the
    /// session. A 404 means the credential is valid but its user is gone.
    pub async fn me(&self) -> Result<Option<User>> {
        let url = self.endpoint("api/me")?;
        let response = match self.send(self.http().get(url)).await {
            Ok(response) => response,
            Err(PipewatchError::Api { status: 404, .. }) => {
                self.session().set_user(None);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let body = Self::read_json(response).await?;
        let user = body
            .get("user")
            .cloned()
            .filter(|value| !value.is_null())
            .and_then(|value: Value| serde_json::from_value::<User>(value).ok());

        self.session().set_user(user.clone());
        Ok(user)
    }
}
