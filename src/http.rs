//! The request and response model the authenticator and its handlers work against.
//!
//! These types are deliberately independent of any web framework. The `server` module converts
//! warp requests into an [`AuthRequest`] and an [`AuthResponse`] back into a warp reply.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use http::header::{HeaderName, HeaderValue, CACHE_CONTROL, COOKIE, LOCATION, SET_COOKIE};
use http::{HeaderMap, Method, StatusCode};
use tracing::{debug, error, warn};

use crate::authenticator::{AuthenticatedSession, ResourceResolver};
use crate::sudo::quote_cookie_value;

/// Request attributes set and consumed by the authenticator. Downstream code reads the
/// authenticated identity from here
#[derive(Default)]
pub struct RequestAttributes {
    /// The id of the user the request is processed for
    pub remote_user: Option<String>,
    /// The authentication type reported by the handler, `None` for anonymous requests
    pub auth_type: Option<String>,
    /// Handle to the repository session for downstream use. Its presence marks the request as
    /// already authenticated
    pub resolver: Option<ResourceResolver>,
    /// Overrides the path used to select handlers for `login` and `logout`
    pub login_resource: Option<String>,
    pub(crate) session: Option<Arc<AuthenticatedSession>>,
}

impl fmt::Debug for RequestAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestAttributes")
            .field("remote_user", &self.remote_user)
            .field("auth_type", &self.auth_type)
            .field("resolver", &self.resolver.is_some())
            .field("login_resource", &self.login_resource)
            .field("session", &self.session.is_some())
            .finish()
    }
}

/// An inbound request as seen by the authenticator
#[derive(Debug)]
pub struct AuthRequest {
    method: Method,
    scheme: String,
    host: Option<String>,
    context_path: String,
    path_info: Option<String>,
    parameters: HashMap<String, String>,
    headers: HeaderMap,
    pub attributes: RequestAttributes,
}

impl AuthRequest {
    pub fn new(method: Method, path_info: Option<&str>) -> Self {
        AuthRequest {
            method,
            scheme: "http".to_owned(),
            host: None,
            context_path: String::new(),
            path_info: path_info.map(|p| p.to_owned()),
            parameters: HashMap::new(),
            headers: HeaderMap::new(),
            attributes: RequestAttributes::default(),
        }
    }

    /// Shorthand for a GET request for the given path
    pub fn get(path_info: &str) -> Self {
        Self::new(Method::GET, Some(path_info))
    }

    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_ascii_lowercase();
        self
    }

    /// Sets the host the request was sent to. Default ports for the scheme are dropped so the host
    /// compares equal to the one of scoped holders
    pub fn with_host(mut self, host: &str) -> Self {
        let default_port = match self.scheme.as_str() {
            "https" => ":443",
            _ => ":80",
        };
        let host = host.trim().to_ascii_lowercase();
        self.host = Some(host.strip_suffix(default_port).unwrap_or(&host).to_owned());
        self
    }

    pub fn with_context_path(mut self, context_path: &str) -> Self {
        self.context_path = context_path.trim_end_matches('/').to_owned();
        self
    }

    /// Parses an `application/x-www-form-urlencoded` query string into the request parameters.
    /// The first occurrence of a parameter wins
    pub fn with_query(self, query: &str) -> Self {
        self.with_parameters(
            url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned())),
        )
    }

    /// Adds already decoded parameters. As with [`with_query`](Self::with_query), the first
    /// occurrence of a parameter wins
    pub fn with_parameters(
        mut self,
        parameters: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        for (k, v) in parameters {
            self.parameters.entry(k).or_insert(v);
        }
        self
    }

    pub fn with_parameter(mut self, name: &str, value: &str) -> Self {
        self.parameters.insert(name.to_owned(), value.to_owned());
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Adds a header. Invalid header names or values are logged and ignored
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(n), Ok(v)) => {
                self.headers.append(n, v);
            }
            _ => warn!(%name, "Ignoring invalid request header"),
        }
        self
    }

    /// Adds a cookie to the request's `Cookie` header
    pub fn with_cookie(self, name: &str, value: &str) -> Self {
        self.with_header(COOKIE.as_str(), &format!("{}={}", name, value))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    /// The path of the request below the context path, if any
    pub fn path_info(&self) -> Option<&str> {
        self.path_info.as_deref()
    }

    /// The path info, or `/` if the request has no (or an empty) path info
    pub fn path_info_or_root(&self) -> &str {
        match self.path_info.as_deref() {
            Some(p) if !p.is_empty() => p,
            _ => "/",
        }
    }

    /// The request URI as seen by the client, without query string
    pub fn request_uri(&self) -> String {
        format!(
            "{}{}",
            self.context_path,
            self.path_info.as_deref().unwrap_or_default()
        )
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(|s| s.as_str())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the value of the first header with the given name that is valid visible ASCII
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get_all(name)
            .iter()
            .find_map(|v| v.to_str().ok())
    }

    /// Returns the raw value of the first cookie with the given name. Quoted values are returned
    /// with their quotes
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(split_cookie_header)
            .filter_map(|pair| {
                let mut split = pair.splitn(2, '=');
                let n = split.next()?.trim();
                let v = split.next()?.trim();
                Some((n, v))
            })
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }
}

/// Splits a `Cookie` header into its `name=value` pairs. Separators inside a quoted-string
/// (including backslash escapes) do not end a pair
fn split_cookie_header(header: &str) -> Vec<&str> {
    let mut pairs = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in header.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                pairs.push(&header[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    pairs.push(&header[start..]);
    pairs
}

/// A cookie to be sent back to the client.
///
/// A negative `max_age` makes the cookie live until the browser is closed, zero removes the
/// cookie on the client, positive values are a lifetime in seconds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub max_age: i64,
    pub path: String,
    pub comment: Option<String>,
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}; Version=1", self.name, self.value)?;
        if let Some(comment) = self.comment.as_deref() {
            // A comment that can't be quoted is simply left out
            if let Ok(quoted) = quote_cookie_value(comment) {
                write!(f, "; Comment={}", quoted)?;
            }
        }
        if self.max_age >= 0 {
            write!(f, "; Max-Age={}", self.max_age)?;
            if self.max_age == 0 {
                write!(f, "; Expires=Thu, 01 Jan 1970 00:00:00 GMT")?;
            }
        }
        write!(f, "; Path={}", self.path)
    }
}

/// The response under construction while the authenticator and its handlers work on a request.
///
/// Sending an error or a redirect commits the response; once committed the status and body are
/// final.
#[derive(Clone, Debug)]
pub struct AuthResponse {
    status: StatusCode,
    headers: HeaderMap,
    cookies: Vec<Cookie>,
    body: Option<String>,
    committed: bool,
}

impl Default for AuthResponse {
    fn default() -> Self {
        AuthResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            cookies: Vec::new(),
            body: None,
            committed: false,
        }
    }
}

impl AuthResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// The cookies added to this response, in the order they were added
    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn set_status(&mut self, status: StatusCode) {
        if self.committed {
            warn!(%status, "Ignoring status change on committed response");
            return;
        }
        self.status = status;
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    pub fn add_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.append(name, value);
    }

    /// Adds a `Set-Cookie` header for the cookie
    pub fn add_cookie(&mut self, cookie: Cookie) {
        match HeaderValue::from_str(&cookie.to_string()) {
            Ok(v) => {
                self.headers.append(SET_COOKIE, v);
                self.cookies.push(cookie);
            }
            Err(e) => error!(name = %cookie.name, error = %e, "Unable to encode cookie header"),
        }
    }

    /// Tells intermediate caches not to cache the `Set-Cookie` header of this response
    pub fn add_no_cache_set_cookie(&mut self) {
        self.headers
            .append(CACHE_CONTROL, HeaderValue::from_static("no-cache=\"Set-Cookie\""));
    }

    /// Commits the response with the given error status and message
    pub fn send_error(&mut self, status: StatusCode, message: impl Into<String>) {
        if self.committed {
            warn!(%status, "Response already committed, cannot send error");
            return;
        }
        let message = message.into();
        debug!(%status, %message, "Sending error response");
        self.status = status;
        self.body = Some(message);
        self.committed = true;
    }

    /// Commits the response as a `302 Found` redirect to the given location
    pub fn send_redirect(&mut self, location: &str) {
        if self.committed {
            warn!(%location, "Response already committed, cannot redirect");
            return;
        }
        match HeaderValue::from_str(location) {
            Ok(v) => {
                self.headers.insert(LOCATION, v);
                self.status = StatusCode::FOUND;
                self.committed = true;
            }
            Err(e) => {
                error!(%location, error = %e, "Invalid redirect location");
                self.send_error(StatusCode::INTERNAL_SERVER_ERROR, "invalid redirect location");
            }
        }
    }
}
