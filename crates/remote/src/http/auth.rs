//! Auth binding (`/auth/v1/*`).

use super::RestClient;
use crate::auth::AuthCapability;
use crate::error::RemoteResult;
use crate::session::{Session, UserIdentity};
use chrono::{Duration, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: UserIdentity,
}

impl From<TokenResponse> for Session {
    fn from(token: TokenResponse) -> Self {
        Session {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            user: token.user,
            expires_at: token.expires_in.map(|secs| Utc::now() + Duration::seconds(secs)),
        }
    }
}

/// Password-grant authentication that updates the shared session.
#[derive(Clone, Debug)]
pub struct HttpAuth {
    client: RestClient,
}

impl HttpAuth {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }
}

impl AuthCapability for HttpAuth {
    async fn sign_in(&self, email: &str, password: &str) -> RemoteResult<Session> {
        let request = self
            .client
            .request(Method::POST, "/auth/v1/token")
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }));
        let token: TokenResponse = self.client.send(request).await?.json().await?;
        let session = Session::from(token);

        tracing::info!(user_id = %session.user.id, "Signed in");
        self.client.session().set_session(session.clone());
        Ok(session)
    }

    async fn sign_out(&self) -> RemoteResult<()> {
        let result = match self.client.user_request(Method::POST, "/auth/v1/logout") {
            Ok(request) => self.client.send(request).await.map(|_| ()),
            // Nobody signed in: nothing to revoke.
            Err(_) => Ok(()),
        };
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Remote sign-out failed, clearing local session anyway");
        }
        self.client.session().clear();
        result
    }

    async fn update_password(&self, new_password: &str) -> RemoteResult<()> {
        let request = self
            .client
            .user_request(Method::PUT, "/auth/v1/user")?
            .json(&json!({ "password": new_password }));
        self.client.send(request).await?;
        Ok(())
    }
}
