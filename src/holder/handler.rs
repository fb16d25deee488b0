use std::fmt;
use std::sync::Arc;

use super::{HolderInfo, HolderPath, PathHolder};
use crate::authn::{AuthenticationFeedbackHandler, AuthenticationHandler, Extraction};
use crate::http::{AuthRequest, AuthResponse};

/// An [`AuthenticationHandler`] registered for a path prefix, together with the optional
/// feedback handler to consult once a login attempt with its credentials finished
#[derive(Clone)]
pub struct AuthenticationHandlerHolder {
    path: HolderPath,
    handler: Arc<dyn AuthenticationHandler>,
    feedback: Option<Arc<dyn AuthenticationFeedbackHandler>>,
    description: String,
}

impl AuthenticationHandlerHolder {
    pub fn new(path: &str, handler: Arc<dyn AuthenticationHandler>, description: &str) -> Self {
        AuthenticationHandlerHolder {
            path: HolderPath::parse(path),
            handler,
            feedback: None,
            description: description.to_owned(),
        }
    }

    pub fn with_feedback(mut self, feedback: Arc<dyn AuthenticationFeedbackHandler>) -> Self {
        self.feedback = Some(feedback);
        self
    }

    pub fn feedback_handler(&self) -> Option<Arc<dyn AuthenticationFeedbackHandler>> {
        self.feedback.clone()
    }

    pub async fn extract_credentials(
        &self,
        request: &AuthRequest,
        response: &mut AuthResponse,
    ) -> Extraction {
        self.handler.extract_credentials(request, response).await
    }

    pub async fn request_credentials(
        &self,
        request: &AuthRequest,
        response: &mut AuthResponse,
    ) -> anyhow::Result<bool> {
        self.handler.request_credentials(request, response).await
    }

    pub async fn drop_credentials(
        &self,
        request: &AuthRequest,
        response: &mut AuthResponse,
    ) -> anyhow::Result<()> {
        self.handler.drop_credentials(request, response).await
    }

    pub fn info(&self) -> HolderInfo {
        HolderInfo {
            path: self.path.full_path().to_owned(),
            description: self.description.clone(),
        }
    }
}

impl PathHolder for AuthenticationHandlerHolder {
    fn holder_path(&self) -> &HolderPath {
        &self.path
    }
}

impl fmt::Debug for AuthenticationHandlerHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationHandlerHolder")
            .field("path", &self.path.full_path())
            .field("description", &self.description)
            .field("feedback", &self.feedback.is_some())
            .finish()
    }
}

impl fmt::Display for AuthenticationHandlerHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.description, self.path)
    }
}
