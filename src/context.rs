//! Session context passed to services and remote collaborators.

/// Identifies the signed-in user for the lifetime of the cache runtime.
///
/// Constructed once at sign-in and handed to every reconciliation service and
/// remote collaborator at construction time; there is no process-wide mutable
/// holder. Tearing the runtime down drops the context with it.
#[derive(Debug, Clone)]
pub struct SessionContext {
    user_id: String,
    auth_token: String,
}

impl SessionContext {
    pub fn new(user_id: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            auth_token: auth_token.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Bearer token forwarded to the remote source on every call.
    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }
}
