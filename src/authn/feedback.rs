use tracing::{debug, warn};

use super::{AuthenticationFeedbackHandler, AuthenticationInfo};
use crate::http::{AuthRequest, AuthResponse};

/// The request parameter asking for a redirect once the request has been authenticated
pub const REDIRECT_PARAMETER: &str = "sling.auth.redirect";

/// Redirects the client if the request asks for it with the [`REDIRECT_PARAMETER`].
///
/// An empty value or `true` redirects to the request URI itself. A value starting with a single
/// `/` redirects to that path below the context path. Anything else, including absolute and
/// protocol relative URLs, is refused so the parameter can't be used to send clients to other
/// sites. Returns `true` if a redirect was sent.
pub fn handle_redirect(request: &AuthRequest, response: &mut AuthResponse) -> bool {
    let target = match request.parameter(REDIRECT_PARAMETER) {
        Some(t) => t.trim(),
        None => return false,
    };

    let location = if target.is_empty() || target.eq_ignore_ascii_case("true") {
        request.request_uri()
    } else if target.starts_with('/') && !target.starts_with("//") {
        format!("{}{}", request.context_path(), target)
    } else {
        warn!(%target, "Refusing redirect to a target outside of this application");
        return false;
    };

    if response.is_committed() {
        warn!(%location, "Response already committed, not redirecting");
        return false;
    }
    debug!(%location, "Redirecting after authentication");
    response.send_redirect(&location);
    true
}

/// A feedback handler that does nothing on failure and honors the redirect parameter on success
#[derive(Clone, Debug, Default)]
pub struct DefaultFeedbackHandler;

#[async_trait::async_trait]
impl AuthenticationFeedbackHandler for DefaultFeedbackHandler {
    async fn authentication_failed(
        &self,
        _request: &AuthRequest,
        _response: &mut AuthResponse,
        _info: &AuthenticationInfo,
    ) {
    }

    async fn authentication_succeeded(
        &self,
        request: &AuthRequest,
        response: &mut AuthResponse,
        _info: &AuthenticationInfo,
    ) -> bool {
        handle_redirect(request, response)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use http::header::LOCATION;
    use rstest::rstest;

    #[rstest]
    #[case("", Some("/app/content/page.html"))]
    #[case("true", Some("/app/content/page.html"))]
    #[case("/welcome.html", Some("/app/welcome.html"))]
    #[case("//evil.example.com/", None)]
    #[case("https://evil.example.com/", None)]
    #[case("relative.html", None)]
    fn test_handle_redirect(#[case] target: &str, #[case] expected: Option<&str>) {
        let request = AuthRequest::get("/content/page.html")
            .with_context_path("/app")
            .with_parameter(REDIRECT_PARAMETER, target);
        let mut response = AuthResponse::new();

        assert_eq!(expected.is_some(), handle_redirect(&request, &mut response));
        assert_eq!(
            expected,
            response
                .headers()
                .get(LOCATION)
                .map(|v| v.to_str().unwrap())
        );
    }

    #[test]
    fn test_no_parameter() {
        let request = AuthRequest::get("/content");
        let mut response = AuthResponse::new();
        assert!(!handle_redirect(&request, &mut response));
        assert!(!response.is_committed());
    }
}
