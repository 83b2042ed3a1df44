//! Edge function binding (`/functions/v1/{name}`).

use super::RestClient;
use crate::error::{RemoteError, RemoteResult};
use crate::functions::{Invitation, NewUser, PrivilegedFunctions, UserUpdate};
use reqwest::Method;
use serde::Serialize;
use serde_json::{json, Value};

/// Privileged functions invoked with the signed-in user's token.
#[derive(Clone, Debug)]
pub struct HttpFunctions {
    client: RestClient,
}

impl HttpFunctions {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }

    async fn invoke<B: Serialize + Sync>(&self, name: &str, body: &B) -> RemoteResult<Value> {
        let request = self
            .client
            .user_request(Method::POST, &format!("/functions/v1/{}", name))?
            .json(body);
        let response = self.client.send(request).await?;
        let text = response.text().await?;
        let value: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)?
        };

        if let Some(message) = value.get("error").and_then(Value::as_str) {
            tracing::warn!(function = name, error = message, "Privileged function refused");
            return Err(RemoteError::Function(message.to_string()));
        }
        Ok(value)
    }
}

impl PrivilegedFunctions for HttpFunctions {
    async fn create_user(&self, user: &NewUser) -> RemoteResult<Value> {
        self.invoke("create-user", user).await
    }

    async fn update_user(&self, update: &UserUpdate) -> RemoteResult<Value> {
        self.invoke("update-user", update).await
    }

    async fn set_password(&self, user_id: &str, password: &str) -> RemoteResult<Value> {
        self.invoke(
            "set-password",
            &json!({ "user_id": user_id, "password": password }),
        )
        .await
    }

    async fn send_invitation(&self, invitation: &Invitation) -> RemoteResult<Value> {
        self.invoke("send-invitation", invitation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteConfig;
    use crate::session::{Session, SessionContext, UserIdentity};
    use mockito::Matcher;

    fn functions(server: &mockito::Server, signed_in: bool) -> HttpFunctions {
        let session = if signed_in {
            SessionContext::with_session(Session::new("admin-jwt", UserIdentity::new("admin")))
        } else {
            SessionContext::new()
        };
        HttpFunctions::new(RestClient::new(RemoteConfig::new(server.url(), "anon"), session).unwrap())
    }

    fn invitation() -> Invitation {
        Invitation {
            email: "new@club.example".into(),
            role: "scout".into(),
            redirect_to: None,
        }
    }

    #[tokio::test]
    async fn test_success_payload_returned() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/functions/v1/send-invitation")
            .match_header("authorization", "Bearer admin-jwt")
            .match_body(Matcher::Json(serde_json::json!({
                "email": "new@club.example",
                "role": "scout"
            })))
            .with_status(200)
            .with_body(r#"{"invited":true}"#)
            .create_async()
            .await;

        let value = functions(&server, true)
            .send_invitation(&invitation())
            .await
            .unwrap();
        assert_eq!(value["invited"], true);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_field_becomes_function_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/functions/v1/set-password")
            .with_status(200)
            .with_body(r#"{"error":"Password too short"}"#)
            .create_async()
            .await;

        let err = functions(&server, true)
            .set_password("u2", "x")
            .await
            .unwrap_err();
        assert_eq!(err, RemoteError::Function("Password too short".into()));
    }

    #[tokio::test]
    async fn test_non_2xx_surfaced_verbatim() {
        let mut server = mockito::Server::new_async().await;
        let body = r#"{"error":"Forbidden: admin role required"}"#;
        let _mock = server
            .mock("POST", "/functions/v1/create-user")
            .with_status(403)
            .with_body(body)
            .create_async()
            .await;

        let user = NewUser {
            email: "a@b.c".into(),
            password: "secret".into(),
            full_name: "A B".into(),
            role: "scout".into(),
        };
        let err = functions(&server, true).create_user(&user).await.unwrap_err();
        assert_eq!(
            err,
            RemoteError::Http {
                status: 403,
                body: body.into()
            }
        );
    }

    #[tokio::test]
    async fn test_requires_signed_in_user() {
        let server = mockito::Server::new_async().await;
        let update = UserUpdate {
            user_id: "u2".into(),
            role: Some("admin".into()),
            ..Default::default()
        };
        let err = functions(&server, false).update_user(&update).await.unwrap_err();
        assert_eq!(err, RemoteError::NotSignedIn);
    }
}
