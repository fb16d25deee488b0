//! The request authenticator.
//!
//! [`Authenticator::handle_security`] is called for every request before it is processed. It asks
//! the handlers registered for the request path for credentials, logs the request into the
//! repository (optionally impersonating another user) and attaches the resulting session to the
//! request. When a request can't be authenticated the authenticator writes the response (a
//! challenge, a redirect or an error status) and tells the caller to stop processing.

mod registry;
mod session;

pub use registry::{ServiceId, CONFIG_SOURCE};
use registry::Registered;
pub use session::{AuthenticatedSession, ResourceResolver};

use std::collections::BTreeMap;
use std::sync::Arc;

use http::StatusCode;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, instrument};

use crate::authn::Extraction;
use crate::config::AuthenticatorConfig;
use crate::holder::{
    AuthenticationHandlerHolder, AuthenticationRequirementHolder, HolderInfo,
    PathBasedHolderCache, PathHolder,
};
use crate::http::{AuthRequest, AuthResponse};
use crate::repository::Repository;

/// The path of the login endpoint. It never requires authentication
pub const LOGIN_PATH: &str = "/system/sling/login";
/// The path of the logout endpoint. It never requires authentication
pub const LOGOUT_PATH: &str = "/system/sling/logout";

/// The source reported for requirements the authenticator registers for itself
pub const DESCRIPTION: &str = "Request Authenticator";

/// LoginError describes why credentials could not be requested from the client
#[derive(Error, Debug, PartialEq, Eq)]
pub enum LoginError {
    /// The response has already been sent, so no handler can write to it
    #[error("response already committed")]
    ResponseCommitted,
    /// No handler registered for the request path was able to request credentials
    #[error("no authentication handler is available to handle the request")]
    NoAuthenticationHandler,
}

/// Authenticates requests using the handlers and requirements registered with it.
///
/// The authenticator is meant to be shared (usually behind an [`Arc`]) by all request tasks.
/// Handlers, requirements and configuration may be changed at any time through the registration
/// callbacks; requests in flight see either the old or the new state.
pub struct Authenticator {
    repository: Arc<dyn Repository>,
    handlers: PathBasedHolderCache<AuthenticationHandlerHolder>,
    requirements: PathBasedHolderCache<AuthenticationRequirementHolder>,
    config: RwLock<Arc<AuthenticatorConfig>>,
    registered_handlers: Mutex<Registered<AuthenticationHandlerHolder>>,
    registered_requirements: Mutex<Registered<AuthenticationRequirementHolder>>,
}

impl Authenticator {
    /// Creates an authenticator logging requests into the given repository. No handlers are
    /// registered initially
    pub async fn new(repository: Arc<dyn Repository>, config: AuthenticatorConfig) -> Self {
        let authenticator = Authenticator {
            repository,
            handlers: PathBasedHolderCache::new(),
            requirements: PathBasedHolderCache::new(),
            config: RwLock::new(Arc::new(AuthenticatorConfig::default())),
            registered_handlers: Mutex::new(BTreeMap::new()),
            registered_requirements: Mutex::new(BTreeMap::new()),
        };
        authenticator.on_config_changed(config).await;
        authenticator
    }

    /// The configuration currently in effect
    pub async fn config(&self) -> Arc<AuthenticatorConfig> {
        self.config.read().await.clone()
    }

    /// Authenticates the request.
    ///
    /// Returns `true` if processing of the request should continue, in which case the request
    /// attributes carry the authenticated identity. Returns `false` if the request has been
    /// answered, for example with a challenge or a redirect, and processing must stop.
    #[instrument(level = "debug", skip_all, fields(path = %request.path_info_or_root()))]
    pub async fn handle_security(
        &self,
        request: &mut AuthRequest,
        response: &mut AuthResponse,
    ) -> bool {
        // A request dispatched internally from an authenticated request
        if request.attributes.resolver.is_some() {
            debug!("Request already authenticated, nothing to do");
            return true;
        }

        match self.extract_credentials(request, response).await {
            Extraction::DoingAuth => {
                debug!("Ongoing authentication in the handler");
                false
            }
            Extraction::NoCredentials => {
                debug!("No credentials in the request, anonymous");
                self.get_anonymous_session(request, response).await
            }
            Extraction::Credentials(info) => {
                debug!(user = %info.user(), "Trying to get a session");
                self.get_session(request, response, info).await
            }
        }
    }

    /// Asks the handlers responsible for the request to request credentials from the client. The
    /// first handler that does ends the walk
    #[instrument(level = "debug", skip_all, fields(path = %handler_selection_path(request)))]
    pub async fn login(
        &self,
        request: &AuthRequest,
        response: &mut AuthResponse,
    ) -> Result<(), LoginError> {
        if response.is_committed() {
            return Err(LoginError::ResponseCommitted);
        }

        let holders = self.find_applicable_handlers(request).await;
        let path = handler_selection_path(request);
        for holder in holders
            .iter()
            .filter(|h| h.holder_path().is_prefix_of(&path))
        {
            debug!(handler = %holder, "Requesting authentication");
            match holder.request_credentials(request, response).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => {
                    error!(handler = %holder, error = %e, "Failed sending authentication request");
                    return Ok(());
                }
            }
        }

        info!(
            available = holders.len(),
            "No handler could request credentials"
        );
        Err(LoginError::NoAuthenticationHandler)
    }

    /// Asks every handler responsible for the request to drop the client's credentials. A
    /// failing handler does not stop the others from being asked
    #[instrument(level = "debug", skip_all, fields(path = %handler_selection_path(request)))]
    pub async fn logout(
        &self,
        request: &AuthRequest,
        response: &mut AuthResponse,
    ) -> Result<(), LoginError> {
        if response.is_committed() {
            return Err(LoginError::ResponseCommitted);
        }

        let path = handler_selection_path(request);
        for holder in self
            .find_applicable_handlers(request)
            .await
            .iter()
            .filter(|h| h.holder_path().is_prefix_of(&path))
        {
            debug!(handler = %holder, "Dropping authentication");
            if let Err(e) = holder.drop_credentials(request, response).await {
                error!(handler = %holder, error = %e, "Failed dropping authentication");
            }
        }
        Ok(())
    }

    /// Releases what [`handle_security`](Self::handle_security) attached to the request. Must be
    /// called once the request has been processed
    pub fn request_destroyed(&self, request: &mut AuthRequest) {
        if let Some(session) = request.attributes.session.take() {
            session.logout();
            request.attributes.resolver = None;
            request.attributes.remote_user = None;
            request.attributes.auth_type = None;
        }
    }

    /// A snapshot of the registered handlers, most specific path first
    pub async fn handler_holders(&self) -> Vec<HolderInfo> {
        self.handlers
            .holders()
            .await
            .iter()
            .map(|h| h.info())
            .collect()
    }

    /// A snapshot of the authentication requirements in effect, most specific path first
    pub async fn requirement_holders(&self) -> Vec<HolderInfo> {
        self.requirements
            .holders()
            .await
            .iter()
            .map(|h| h.info())
            .collect()
    }

    async fn find_applicable_handlers(
        &self,
        request: &AuthRequest,
    ) -> Vec<Arc<AuthenticationHandlerHolder>> {
        let path = handler_selection_path(request);
        self.handlers.find_applicable_holders(request, &path).await
    }

    async fn extract_credentials(
        &self,
        request: &AuthRequest,
        response: &mut AuthResponse,
    ) -> Extraction {
        // Handlers are selected by the selection path but only consulted if they are responsible
        // for the path info
        let path_info = request.path_info_or_root();
        for holder in self.find_applicable_handlers(request).await {
            if !holder.holder_path().is_prefix_of(path_info) {
                continue;
            }
            match holder.extract_credentials(request, response).await {
                Extraction::Credentials(mut info) => {
                    info.set_feedback_handler(holder.feedback_handler());
                    return Extraction::Credentials(info);
                }
                Extraction::DoingAuth => return Extraction::DoingAuth,
                Extraction::NoCredentials => {}
            }
        }
        debug!("No handler could extract credentials");
        Extraction::NoCredentials
    }

    async fn is_anonymous_allowed(&self, request: &AuthRequest) -> bool {
        let path_info = request.path_info_or_root();
        if let Some(holder) = self
            .requirements
            .find_applicable_holders(request, path_info)
            .await
            .first()
        {
            return !holder.requires_authentication();
        }
        path_info == LOGIN_PATH
    }

    /// Runs [`login`](Self::login), answering with `403` if no handler could request credentials
    async fn do_login(&self, request: &AuthRequest, response: &mut AuthResponse) {
        match self.login(request, response).await {
            Ok(()) => {}
            Err(LoginError::ResponseCommitted) => {
                error!("Cannot login: Response already committed")
            }
            Err(LoginError::NoAuthenticationHandler) => {
                error!("Cannot login: No authentication handler available to handle the request");
                response.send_error(StatusCode::FORBIDDEN, "Cannot login");
            }
        }
    }
}

/// The path used to select handlers: the login resource attribute if set, else the path info
pub fn handler_selection_path(request: &AuthRequest) -> String {
    match request.attributes.login_resource.as_deref() {
        Some(r) if !r.is_empty() => r.to_owned(),
        _ => request.path_info_or_root().to_owned(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_handler_selection_path() {
        let mut request = AuthRequest::get("/content/page.html");
        assert_eq!("/content/page.html", handler_selection_path(&request));

        request.attributes.login_resource = Some(String::new());
        assert_eq!("/content/page.html", handler_selection_path(&request));

        request.attributes.login_resource = Some("/apps/login".to_owned());
        assert_eq!("/apps/login", handler_selection_path(&request));

        let request = AuthRequest::new(http::Method::GET, None);
        assert_eq!("/", handler_selection_path(&request));
    }
}
