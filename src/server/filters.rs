use std::convert::Infallible;
use std::sync::Arc;

use tracing::{debug, instrument, trace};
use tracing_futures::Instrument;
use warp::http::header::HOST;
use warp::http::{HeaderMap, Method};
use warp::path::FullPath;
use warp::reject::{custom, Reject, Rejection};
use warp::Filter;

use crate::authenticator::{Authenticator, LOGIN_PATH, LOGOUT_PATH};
use crate::http::{AuthRequest, AuthResponse};

/// A request that passed authentication, with the response accumulated while authenticating it
/// (for example an impersonation cookie)
#[derive(Debug)]
pub struct Authenticated {
    pub request: AuthRequest,
    pub response: AuthResponse,
}

/// The endpoints served by the frontend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Login,
    Logout,
    /// Anything else. Reports the identity the request was authenticated as
    Resource,
}

impl Endpoint {
    fn from_path(path: &str) -> Self {
        match path.trim_end_matches('/') {
            LOGIN_PATH => Endpoint::Login,
            LOGOUT_PATH => Endpoint::Logout,
            _ => Endpoint::Resource,
        }
    }
}

/// A warp filter that returns which endpoint the request is for
pub fn endpoint() -> impl Filter<Extract = (Endpoint,), Error = Infallible> + Copy {
    warp::path::full().map(|path: FullPath| Endpoint::from_path(path.as_str()))
}

/// A warp filter that converts the incoming request into an [`AuthRequest`]
pub fn auth_request(
    scheme: &'static str,
) -> impl Filter<Extract = (AuthRequest,), Error = Rejection> + Clone {
    warp::method()
        .and(warp::path::full())
        .and(warp::query::<Vec<(String, String)>>())
        .and(warp::header::headers_cloned())
        .map(
            move |method: Method,
                  path: FullPath,
                  query: Vec<(String, String)>,
                  headers: HeaderMap| {
                let host = headers
                    .get(HOST)
                    .and_then(|h| h.to_str().ok())
                    .map(|h| h.to_owned());
                let mut request = AuthRequest::new(method, Some(path.as_str()))
                    .with_scheme(scheme)
                    .with_parameters(query)
                    .with_headers(headers);
                if let Some(host) = host {
                    request = request.with_host(&host);
                }
                trace!(?request, "Converted request");
                request
            },
        )
}

/// A warp filter that runs the authenticator on the request. Requests the authenticator answered
/// itself are rejected with the answer, see [`handle_authn_rejection`]
pub fn authenticate(
    authenticator: Arc<Authenticator>,
    scheme: &'static str,
) -> impl Filter<Extract = (Authenticated,), Error = Rejection> + Clone {
    warp::any()
        .map(move || authenticator.clone())
        .and(auth_request(scheme))
        .and_then(|authenticator: Arc<Authenticator>, request: AuthRequest| {
            _authenticate(authenticator, request).instrument(tracing::debug_span!("authentication"))
        })
}

async fn _authenticate(
    authenticator: Arc<Authenticator>,
    mut request: AuthRequest,
) -> Result<Authenticated, Rejection> {
    let mut response = AuthResponse::new();
    if authenticator
        .handle_security(&mut request, &mut response)
        .await
    {
        Ok(Authenticated { request, response })
    } else {
        debug!(status = %response.status(), "Request answered during authentication");
        authenticator.request_destroyed(&mut request);
        Err(custom(AuthenticationTerminated(response)))
    }
}

/// Carries the response the authenticator wrote for a request it did not let through
#[derive(Debug)]
struct AuthenticationTerminated(AuthResponse);

impl Reject for AuthenticationTerminated {}

#[instrument(level = "trace", skip(err))]
pub(crate) async fn handle_authn_rejection(
    err: warp::Rejection,
) -> Result<impl warp::Reply, warp::Rejection> {
    if let Some(AuthenticationTerminated(response)) = err.find::<AuthenticationTerminated>() {
        debug!("Handling rejection as authn rejection");
        Ok(super::reply::from_auth_response(response))
    } else {
        Err(err)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_endpoint() {
        assert_eq!(Endpoint::Login, Endpoint::from_path(LOGIN_PATH));
        assert_eq!(Endpoint::Logout, Endpoint::from_path("/system/sling/logout/"));
        assert_eq!(Endpoint::Resource, Endpoint::from_path("/system/sling/login.html"));
        assert_eq!(Endpoint::Resource, Endpoint::from_path("/"));
    }

    #[tokio::test]
    async fn test_auth_request() {
        let request = warp::test::request()
            .method("POST")
            .path("/content/page.html?sudo=bob&sudo=carol")
            .header("host", "example.com:80")
            .header("cookie", "sling.sudo=\"alice\"")
            .filter(&auth_request("http"))
            .await
            .expect("request should convert");

        assert_eq!(Method::POST, request.method());
        assert_eq!(Some("/content/page.html"), request.path_info());
        assert_eq!(Some("bob"), request.parameter("sudo"));
        assert_eq!(Some("example.com"), request.host());
        assert_eq!(Some("\"alice\""), request.cookie("sling.sudo"));
    }
}
