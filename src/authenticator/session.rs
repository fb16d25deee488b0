use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use http::StatusCode;
use tracing::{debug, error, info, instrument};

use super::Authenticator;
use crate::authn::{handle_redirect, AuthenticationInfo};
use crate::http::{AuthRequest, AuthResponse};
use crate::repository::{RepositoryError, Session};
use crate::sudo::handle_impersonation;

/// Owns the repository session of an authenticated request.
///
/// The session is logged out when the request is torn down, or at the latest when the last
/// reference to this wrapper goes away. Logging out more than once does nothing.
pub struct AuthenticatedSession {
    user_id: String,
    workspace: String,
    session: Mutex<Option<Box<dyn Session>>>,
}

impl AuthenticatedSession {
    pub(crate) fn new(session: Box<dyn Session>) -> Self {
        AuthenticatedSession {
            user_id: session.user_id().to_owned(),
            workspace: session.workspace_name().to_owned(),
            session: Mutex::new(Some(session)),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    pub fn is_live(&self) -> bool {
        self.lock()
            .as_ref()
            .map(|s| s.is_live())
            .unwrap_or(false)
    }

    pub fn logout(&self) {
        if let Some(mut session) = self.lock().take() {
            if session.is_live() {
                debug!(user = %self.user_id, "Logging out session");
                session.logout();
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn Session>>> {
        // A panic while holding the lock can't leave the option in a torn state
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for AuthenticatedSession {
    fn drop(&mut self) {
        self.logout()
    }
}

impl fmt::Debug for AuthenticatedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedSession")
            .field("user_id", &self.user_id)
            .field("workspace", &self.workspace)
            .finish()
    }
}

/// Gives downstream request processing access to the identity of the authenticated session
#[derive(Clone, Debug)]
pub struct ResourceResolver {
    session: Arc<AuthenticatedSession>,
}

impl ResourceResolver {
    pub(crate) fn new(session: Arc<AuthenticatedSession>) -> Self {
        ResourceResolver { session }
    }

    pub fn user_id(&self) -> &str {
        self.session.user_id()
    }

    pub fn workspace(&self) -> &str {
        self.session.workspace()
    }

    /// Returns false once the request has been torn down
    pub fn is_live(&self) -> bool {
        self.session.is_live()
    }
}

impl Authenticator {
    /// Logs in with the extracted credentials. Returns whether processing of the request
    /// continues
    #[instrument(level = "debug", skip_all, fields(user = %info.user()))]
    pub(super) async fn get_session(
        &self,
        request: &mut AuthRequest,
        response: &mut AuthResponse,
        info: AuthenticationInfo,
    ) -> bool {
        let feedback = info.feedback_handler().cloned();

        match self
            .repository
            .login(info.credentials(), info.workspace())
            .await
        {
            Ok(session) => {
                let sudo = self.config.read().await.sudo_settings();
                let mut session = handle_impersonation(request, response, &sudo, session).await;

                let terminated = match feedback {
                    Some(feedback) => {
                        feedback
                            .authentication_succeeded(request, response, &info)
                            .await
                    }
                    None => handle_redirect(request, response),
                };
                if terminated {
                    session.logout();
                    return false;
                }

                set_attributes(request, session, Some(info.auth_type()));
                true
            }
            Err(e) => {
                if let Some(feedback) = feedback {
                    feedback
                        .authentication_failed(request, response, &info)
                        .await;
                }
                self.handle_login_failure(request, response, info.user(), e)
                    .await;
                false
            }
        }
    }

    /// Logs in anonymously if the requirements allow it, else asks for credentials
    pub(super) async fn get_anonymous_session(
        &self,
        request: &mut AuthRequest,
        response: &mut AuthResponse,
    ) -> bool {
        if !self.is_anonymous_allowed(request).await {
            info!("Anonymous access not allowed by configuration, requesting credentials");
            self.do_login(request, response).await;
            return false;
        }

        match self.repository.login_anonymous().await {
            Ok(mut session) => {
                if handle_redirect(request, response) {
                    session.logout();
                    return false;
                }
                set_attributes(request, session, None);
                true
            }
            Err(e) => {
                self.handle_login_failure(request, response, "anonymous user", e)
                    .await;
                false
            }
        }
    }

    async fn handle_login_failure(
        &self,
        request: &AuthRequest,
        response: &mut AuthResponse,
        user: &str,
        reason: RepositoryError,
    ) {
        match reason {
            RepositoryError::TooManySessions(_) => {
                info!(%user, error = %reason, "Too many sessions");
                response.send_error(StatusCode::SERVICE_UNAVAILABLE, "Too Many Users");
            }
            RepositoryError::Login(_) => {
                info!(%user, error = %reason, "Unable to authenticate");
                self.do_login(request, response).await;
            }
            _ => {
                error!(%user, error = %reason, "Unable to authenticate");
                response.send_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("data access error, reason={}", reason.kind()),
                );
            }
        }
    }
}

fn set_attributes(request: &mut AuthRequest, session: Box<dyn Session>, auth_type: Option<&str>) {
    let session = Arc::new(AuthenticatedSession::new(session));
    debug!(
        user = %session.user_id(),
        workspace = %session.workspace(),
        "Session stored as request attribute"
    );

    let attributes = &mut request.attributes;
    attributes.remote_user = Some(session.user_id().to_owned());
    attributes.auth_type = auth_type.map(|t| t.to_owned());
    attributes.resolver = Some(ResourceResolver::new(session.clone()));
    attributes.session = Some(session);
}
