//! HTTP bindings for the remote capabilities.
//!
//! All bindings share one [`RestClient`]: base URL, `apikey` header, bearer
//! selection (session token first, then the configured fallback key) and the
//! mapping of non-success responses to [`RemoteError::Http`] with the body
//! kept verbatim.

mod auth;
mod functions;
mod records;
mod storage;

pub use auth::HttpAuth;
pub use functions::HttpFunctions;
pub use records::HttpRecordStore;
pub use storage::HttpObjectStorage;

use crate::config::RemoteConfig;
use crate::error::{RemoteError, RemoteResult};
use crate::session::SessionContext;
use reqwest::{Method, RequestBuilder, Response};

/// Shared HTTP plumbing for one remote project.
#[derive(Clone, Debug)]
pub struct RestClient {
    http: reqwest::Client,
    config: RemoteConfig,
    session: SessionContext,
}

impl RestClient {
    /// Build a client. The configured timeout bounds every request.
    pub fn new(config: RemoteConfig, session: SessionContext) -> RemoteResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        Ok(Self {
            http,
            config,
            session,
        })
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Absolute URL for `path` (which starts with `/`).
    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.url, path)
    }

    /// Request with `apikey` and the best available bearer.
    pub(crate) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let bearer = self
            .session
            .bearer_token()
            .unwrap_or_else(|| self.config.fallback_bearer().to_string());
        self.http
            .request(method, self.url(path))
            .header("apikey", &self.config.anon_key)
            .bearer_auth(bearer)
    }

    /// Request that must carry the signed-in user's token.
    pub(crate) fn user_request(&self, method: Method, path: &str) -> RemoteResult<RequestBuilder> {
        let token = self.session.bearer_token().ok_or(RemoteError::NotSignedIn)?;
        Ok(self
            .http
            .request(method, self.url(path))
            .header("apikey", &self.config.anon_key)
            .bearer_auth(token))
    }

    /// Send and fail on any non-success status.
    pub(crate) async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = request.send().await?;
        ensure_success(response).await
    }

    /// Whether the project answers at all. Any HTTP status counts as reachable.
    pub async fn health_check(&self) -> RemoteResult<()> {
        match self.send(self.request(Method::GET, "/rest/v1/")).await {
            Ok(_) | Err(RemoteError::Http { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Turn a non-success response into `RemoteError::Http` with its body.
pub(crate) async fn ensure_success(response: Response) -> RemoteResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::debug!(status = status.as_u16(), %body, "Remote request failed");
    Err(RemoteError::Http {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Session, UserIdentity};

    #[tokio::test]
    async fn test_bearer_prefers_session_token() {
        let mut server = mockito::Server::new_async().await;
        let anonymous = server
            .mock("GET", "/rest/v1/")
            .match_header("apikey", "anon")
            .match_header("authorization", "Bearer anon")
            .with_status(200)
            .create_async()
            .await;
        let signed_in = server
            .mock("GET", "/rest/v1/")
            .match_header("authorization", "Bearer user-token")
            .with_status(200)
            .create_async()
            .await;

        let session = SessionContext::new();
        let client = RestClient::new(RemoteConfig::new(server.url(), "anon"), session.clone()).unwrap();
        client.health_check().await.unwrap();
        anonymous.assert_async().await;

        session.set_session(Session::new("user-token", UserIdentity::new("u")));
        client.health_check().await.unwrap();
        signed_in.assert_async().await;
    }

    #[tokio::test]
    async fn test_health_check_treats_any_status_as_reachable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/rest/v1/")
            .with_status(404)
            .create_async()
            .await;
        let client = RestClient::new(RemoteConfig::new(server.url(), "anon"), SessionContext::new()).unwrap();
        assert!(client.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transient() {
        // Port 9 (discard) on localhost is closed in test environments.
        let client = RestClient::new(
            RemoteConfig::new("http://127.0.0.1:9", "anon"),
            SessionContext::new(),
        )
        .unwrap();
        let err = client.health_check().await.unwrap_err();
        assert!(err.is_transient(), "{:?}", err);
    }

    #[tokio::test]
    async fn test_user_request_requires_session() {
        let client = RestClient::new(
            RemoteConfig::new("http://127.0.0.1:9", "anon"),
            SessionContext::new(),
        )
        .unwrap();
        let err = client.user_request(Method::POST, "/x").unwrap_err();
        assert_eq!(err, RemoteError::NotSignedIn);
    }
}
