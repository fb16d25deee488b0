//! Support for handlers written against the older two-method handler protocol
use std::sync::Arc;

use super::{AuthenticationHandler, AuthenticationInfo, Extraction};
use crate::http::{AuthRequest, AuthResponse};

/// The older handler protocol: handlers could authenticate a request and ask for credentials, but
/// had no way to make a client forget them
#[async_trait::async_trait]
pub trait LegacyAuthenticationHandler: Send + Sync {
    /// Returns the credentials found in the request. `Ok(None)` means no credentials were found.
    /// An error after committing the response means the handler answered the request itself
    async fn authenticate(
        &self,
        request: &AuthRequest,
        response: &mut AuthResponse,
    ) -> anyhow::Result<Option<AuthenticationInfo>>;

    /// Asks the client for credentials, returning whether it did
    async fn request_authentication(
        &self,
        request: &AuthRequest,
        response: &mut AuthResponse,
    ) -> anyhow::Result<bool>;
}

/// Adapts a [`LegacyAuthenticationHandler`] to the [`AuthenticationHandler`] trait. Dropping
/// credentials does nothing. An error that leaves the response uncommitted counts as no
/// credentials
pub struct LegacyHandlerAdapter<H> {
    inner: Arc<H>,
}

impl<H: LegacyAuthenticationHandler> LegacyHandlerAdapter<H> {
    pub fn new(inner: Arc<H>) -> Self {
        LegacyHandlerAdapter { inner }
    }
}

#[async_trait::async_trait]
impl<H: LegacyAuthenticationHandler + 'static> AuthenticationHandler for LegacyHandlerAdapter<H> {
    async fn extract_credentials(
        &self,
        request: &AuthRequest,
        response: &mut AuthResponse,
    ) -> Extraction {
        match self.inner.authenticate(request, response).await {
            Ok(Some(info)) => Extraction::Credentials(info),
            Ok(None) => Extraction::NoCredentials,
            Err(e) if response.is_committed() => {
                tracing::debug!(error = %e, "Legacy handler is handling authentication");
                Extraction::DoingAuth
            }
            Err(e) => {
                tracing::warn!(error = %e, "Legacy handler failed without answering the request");
                Extraction::NoCredentials
            }
        }
    }

    async fn request_credentials(
        &self,
        request: &AuthRequest,
        response: &mut AuthResponse,
    ) -> anyhow::Result<bool> {
        self.inner.request_authentication(request, response).await
    }

    async fn drop_credentials(
        &self,
        _request: &AuthRequest,
        _response: &mut AuthResponse,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::repository::SimpleCredentials;

    struct HeaderHandler;

    #[async_trait::async_trait]
    impl LegacyAuthenticationHandler for HeaderHandler {
        async fn authenticate(
            &self,
            request: &AuthRequest,
            response: &mut AuthResponse,
        ) -> anyhow::Result<Option<AuthenticationInfo>> {
            match request.header("x-user") {
                Some("busy") => {
                    response.send_redirect("/login.html");
                    anyhow::bail!("redirected to login form")
                }
                Some("broken") => anyhow::bail!("credential store unavailable"),
                Some(user) => Ok(Some(AuthenticationInfo::new(
                    "LEGACY",
                    SimpleCredentials::new(user, "").into(),
                ))),
                None => Ok(None),
            }
        }

        async fn request_authentication(
            &self,
            _request: &AuthRequest,
            _response: &mut AuthResponse,
        ) -> anyhow::Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_adapter() {
        let adapter = LegacyHandlerAdapter::new(Arc::new(HeaderHandler));
        let mut response = AuthResponse::new();

        let request = AuthRequest::get("/").with_header("x-user", "alice");
        match adapter.extract_credentials(&request, &mut response).await {
            Extraction::Credentials(info) => assert_eq!("alice", info.user()),
            other => panic!("expected credentials, got {:?}", other),
        }

        let request = AuthRequest::get("/");
        assert!(matches!(
            adapter.extract_credentials(&request, &mut response).await,
            Extraction::NoCredentials
        ));

        let request = AuthRequest::get("/").with_header("x-user", "broken");
        assert!(matches!(
            adapter.extract_credentials(&request, &mut response).await,
            Extraction::NoCredentials
        ));
        assert!(!response.is_committed());

        let request = AuthRequest::get("/").with_header("x-user", "busy");
        assert!(matches!(
            adapter.extract_credentials(&request, &mut response).await,
            Extraction::DoingAuth
        ));
        assert!(response.is_committed());

        assert!(!adapter
            .request_credentials(&request, &mut response)
            .await
            .unwrap());
        adapter
            .drop_credentials(&request, &mut response)
            .await
            .expect("drop is a no-op");
    }
}
