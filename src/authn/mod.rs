//! Types and traits for pluggable authentication handlers.
//!
//! A handler knows how to find credentials in a request, how to ask a client for credentials and
//! how to make a client forget them. Handlers are registered with the
//! [`Authenticator`](crate::authenticator::Authenticator) for one or more path prefixes.

pub mod feedback;
pub mod http_basic;
pub mod legacy;
pub mod token;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub use feedback::{handle_redirect, DefaultFeedbackHandler, REDIRECT_PARAMETER};
pub use http_basic::HttpBasicHandler;
pub use legacy::{LegacyAuthenticationHandler, LegacyHandlerAdapter};
pub use token::TokenHandler;

use crate::http::{AuthRequest, AuthResponse};
use crate::repository::Credentials;

/// The credentials a handler found in a request, along with where to use them
#[derive(Clone)]
pub struct AuthenticationInfo {
    auth_type: String,
    credentials: Credentials,
    workspace: Option<String>,
    properties: HashMap<String, String>,
    feedback: Option<Arc<dyn AuthenticationFeedbackHandler>>,
}

impl AuthenticationInfo {
    pub fn new(auth_type: &str, credentials: Credentials) -> Self {
        AuthenticationInfo {
            auth_type: auth_type.to_owned(),
            credentials,
            workspace: None,
            properties: HashMap::new(),
            feedback: None,
        }
    }

    /// Requests a login into the named workspace instead of the repository's default one
    pub fn with_workspace(mut self, workspace: &str) -> Self {
        self.workspace = Some(workspace.to_owned());
        self
    }

    pub fn with_property(mut self, name: &str, value: &str) -> Self {
        self.properties.insert(name.to_owned(), value.to_owned());
        self
    }

    pub fn auth_type(&self) -> &str {
        &self.auth_type
    }

    /// The id of the user the credentials are for
    pub fn user(&self) -> &str {
        self.credentials.user_id()
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn workspace(&self) -> Option<&str> {
        self.workspace.as_deref()
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(|s| s.as_str())
    }

    /// The feedback handler of the handler that extracted these credentials, if it has one
    pub fn feedback_handler(&self) -> Option<&Arc<dyn AuthenticationFeedbackHandler>> {
        self.feedback.as_ref()
    }

    pub(crate) fn set_feedback_handler(
        &mut self,
        feedback: Option<Arc<dyn AuthenticationFeedbackHandler>>,
    ) {
        self.feedback = feedback;
    }
}

impl fmt::Debug for AuthenticationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationInfo")
            .field("auth_type", &self.auth_type)
            .field("credentials", &self.credentials)
            .field("workspace", &self.workspace)
            .field("properties", &self.properties)
            .field("feedback", &self.feedback.is_some())
            .finish()
    }
}

/// The outcome of asking a handler for the credentials in a request
#[derive(Debug)]
pub enum Extraction {
    /// The handler found credentials
    Credentials(AuthenticationInfo),
    /// The handler found nothing it understands. The next handler will be asked
    NoCredentials,
    /// The handler is in the middle of an authentication exchange and has already written the
    /// response, for example a redirect to a login form. Processing of the request stops
    DoingAuth,
}

/// A trait that can be implemented by any system able to authenticate a request
#[async_trait::async_trait]
pub trait AuthenticationHandler: Send + Sync {
    /// Looks for credentials in the request
    async fn extract_credentials(
        &self,
        request: &AuthRequest,
        response: &mut AuthResponse,
    ) -> Extraction;

    /// Asks the client for credentials, for example by sending a challenge or a redirect to a
    /// login form. Returns `false` if this handler cannot request credentials for the request
    async fn request_credentials(
        &self,
        request: &AuthRequest,
        response: &mut AuthResponse,
    ) -> anyhow::Result<bool>;

    /// Makes the client forget its credentials
    async fn drop_credentials(
        &self,
        request: &AuthRequest,
        response: &mut AuthResponse,
    ) -> anyhow::Result<()>;
}

/// Informed about the outcome of a login with the credentials of the handler it was registered
/// with
#[async_trait::async_trait]
pub trait AuthenticationFeedbackHandler: Send + Sync {
    /// Called when the repository rejected the credentials
    async fn authentication_failed(
        &self,
        request: &AuthRequest,
        response: &mut AuthResponse,
        info: &AuthenticationInfo,
    );

    /// Called after a successful login. Returning `true` means the handler has sent a response
    /// and processing of the request stops
    async fn authentication_succeeded(
        &self,
        request: &AuthRequest,
        response: &mut AuthResponse,
        info: &AuthenticationInfo,
    ) -> bool;
}
