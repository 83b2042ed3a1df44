//! Privileged server-side procedures.
//!
//! These run with elevated rights on the server, which checks that the
//! caller's token belongs to an admin. The client only forwards the signed-in
//! user's bearer token.

use crate::error::RemoteResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Account to create.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub role: String,
}

/// Profile fields to change; `None` fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUpdate {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

/// Invitation e-mail request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    pub email: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<String>,
}

/// Privileged remote procedure capability trait.
///
/// Each call returns the function's JSON success payload. A body carrying an
/// `error` string becomes `RemoteError::Function`; a non-2xx response becomes
/// `RemoteError::Http` with the body verbatim.
#[trait_variant::make(Send)]
pub trait PrivilegedFunctions: Send + Sync {
    async fn create_user(&self, user: &NewUser) -> RemoteResult<Value>;

    async fn update_user(&self, update: &UserUpdate) -> RemoteResult<Value>;

    async fn set_password(&self, user_id: &str, password: &str) -> RemoteResult<Value>;

    async fn send_invitation(&self, invitation: &Invitation) -> RemoteResult<Value>;
}
