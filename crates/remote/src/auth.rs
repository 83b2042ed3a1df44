//! Authentication capability.
//!
//! Implementations keep the injected [`SessionContext`](crate::SessionContext)
//! current: a successful sign-in stores the new session, sign-out clears it.

use crate::error::RemoteResult;
use crate::session::Session;

/// Authentication capability trait.
#[trait_variant::make(Send)]
pub trait AuthCapability: Send + Sync {
    /// Exchange credentials for a session.
    async fn sign_in(&self, email: &str, password: &str) -> RemoteResult<Session>;

    /// End the current session. The local session is cleared even if the
    /// remote call fails.
    async fn sign_out(&self) -> RemoteResult<()>;

    /// Change the signed-in user's password.
    async fn update_password(&self, new_password: &str) -> RemoteResult<()>;
}
