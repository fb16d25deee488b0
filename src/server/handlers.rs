use std::convert::Infallible;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, instrument};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::Reply;

use super::filters::{Authenticated, Endpoint};
use super::reply;
use crate::authenticator::{Authenticator, LoginError};
use crate::http::AuthRequest;

/// The request parameter naming where to send the client after login or logout
pub const RESOURCE_PARAMETER: &str = "resource";

/// The identity a request was authenticated as
#[derive(Debug, Serialize)]
pub struct Identity {
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_type: Option<String>,
    pub workspace: String,
}

/// Serves an authenticated request and releases its session afterwards
#[instrument(level = "trace", skip(authenticated, authenticator, accept))]
pub async fn serve(
    endpoint: Endpoint,
    mut authenticated: Authenticated,
    authenticator: Arc<Authenticator>,
    accept: Option<String>,
) -> Result<Response, Infallible> {
    let res = match endpoint {
        Endpoint::Login => login(&authenticator, &mut authenticated).await,
        Endpoint::Logout => logout(&authenticator, &mut authenticated).await,
        Endpoint::Resource => whoami(&authenticated, accept.as_deref().unwrap_or_default()),
    };
    authenticator.request_destroyed(&mut authenticated.request);
    Ok(res)
}

async fn login(authenticator: &Authenticator, authenticated: &mut Authenticated) -> Response {
    let Authenticated { request, response } = authenticated;

    // Clients that already sent credentials are done logging in
    if request.attributes.auth_type.is_some() {
        response.send_redirect(&redirect_target(request));
        return reply::from_auth_response(response);
    }

    match authenticator.login(request, response).await {
        Ok(()) => {}
        Err(LoginError::NoAuthenticationHandler) => {
            debug!("No handler available, refusing login");
            response.send_error(StatusCode::FORBIDDEN, "Cannot login");
        }
        Err(e) => error!(error = %e, "Cannot login"),
    }
    reply::from_auth_response(response)
}

async fn logout(authenticator: &Authenticator, authenticated: &mut Authenticated) -> Response {
    let Authenticated { request, response } = authenticated;

    if let Err(e) = authenticator.logout(request, response).await {
        error!(error = %e, "Cannot logout");
    }
    response.send_redirect(&redirect_target(request));
    reply::from_auth_response(response)
}

fn whoami(authenticated: &Authenticated, accept: &str) -> Response {
    let attributes = &authenticated.request.attributes;
    let resolver = match attributes.resolver.as_ref() {
        Some(r) => r,
        None => {
            error!("Request passed authentication without a session");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let identity = Identity {
        user: resolver.user_id().to_owned(),
        auth_type: attributes.auth_type.clone(),
        workspace: resolver.workspace().to_owned(),
    };
    reply::with_auth_headers(
        reply::serialized_data(&identity, accept).into_response(),
        &authenticated.response,
    )
}

/// Where to send the client after login or logout: the path named by the resource parameter if
/// it is a path within this application, else the application root
fn redirect_target(request: &AuthRequest) -> String {
    match request.parameter(RESOURCE_PARAMETER) {
        Some(r) if r.starts_with('/') && !r.starts_with("//") => {
            format!("{}{}", request.context_path(), r)
        }
        _ => format!("{}/", request.context_path()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_redirect_target() {
        let request = AuthRequest::get(crate::authenticator::LOGOUT_PATH);
        assert_eq!("/", redirect_target(&request));

        let request = request.with_parameter(RESOURCE_PARAMETER, "/content/page.html");
        assert_eq!("/content/page.html", redirect_target(&request));

        let request = AuthRequest::get("/")
            .with_context_path("/app")
            .with_parameter(RESOURCE_PARAMETER, "//evil.example.com/");
        assert_eq!("/app/", redirect_target(&request));
    }
}
