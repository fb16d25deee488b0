use base64::Engine;
use http::header::{HeaderValue, AUTHORIZATION, WWW_AUTHENTICATE};
use http::StatusCode;
use tracing::{debug, instrument};

use super::{AuthenticationHandler, AuthenticationInfo, Extraction};
use crate::http::{AuthRequest, AuthResponse};
use crate::repository::SimpleCredentials;

/// HTTP header prefix
const HTTP_BASIC_PREFIX: &str = "Basic ";

/// The authentication type reported for requests authenticated by this handler
pub const AUTH_TYPE: &str = "BASIC";

/// A request parameter asking the handler to challenge the client even though no credentials were
/// sent. Used by clients to force a login dialog
pub const REQUEST_LOGIN_PARAMETER: &str = "sling:authRequestLogin";

/// The default realm sent in challenges
pub const DEFAULT_REALM: &str = "authgate";

/// An authentication handler for HTTP Basic authentication
///
/// In basic auth, the Authorization header will come in as 'Basic BASE64_STRING', where
/// the Base-64 string is the username and password separated by a colon.
///
/// The handler only extracts the user name and password. Checking them is left to the
/// repository.
#[derive(Clone, Debug)]
pub struct HttpBasicHandler {
    realm: String,
}

impl Default for HttpBasicHandler {
    fn default() -> Self {
        HttpBasicHandler {
            realm: DEFAULT_REALM.to_owned(),
        }
    }
}

impl HttpBasicHandler {
    pub fn new(realm: &str) -> Self {
        HttpBasicHandler {
            realm: realm.to_owned(),
        }
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    fn send_challenge(&self, response: &mut AuthResponse) -> anyhow::Result<()> {
        let challenge = HeaderValue::from_str(&format!("Basic realm=\"{}\"", self.realm))?;
        response.set_header(WWW_AUTHENTICATE, challenge);
        response.send_error(StatusCode::UNAUTHORIZED, "Unauthorized");
        Ok(())
    }
}

#[async_trait::async_trait]
impl AuthenticationHandler for HttpBasicHandler {
    #[instrument(level = "trace", skip_all)]
    async fn extract_credentials(
        &self,
        request: &AuthRequest,
        response: &mut AuthResponse,
    ) -> Extraction {
        let auth_header = match request.header(AUTHORIZATION.as_str()) {
            Some(h) => h,
            None => {
                if request.parameter(REQUEST_LOGIN_PARAMETER).is_some() {
                    debug!("Login requested without credentials, sending challenge");
                    return match self.send_challenge(response) {
                        Ok(_) => Extraction::DoingAuth,
                        Err(e) => {
                            debug!(error = %e, "Unable to send challenge");
                            Extraction::NoCredentials
                        }
                    };
                }
                return Extraction::NoCredentials;
            }
        };

        match parse_basic(auth_header) {
            Ok((username, password)) => Extraction::Credentials(AuthenticationInfo::new(
                AUTH_TYPE,
                SimpleCredentials::new(&username, &password).into(),
            )),
            Err(e) => {
                // Some other scheme, or garbage. Another handler may understand it
                debug!(error = %e, "Ignoring Authorization header");
                Extraction::NoCredentials
            }
        }
    }

    async fn request_credentials(
        &self,
        _request: &AuthRequest,
        response: &mut AuthResponse,
    ) -> anyhow::Result<bool> {
        if response.is_committed() {
            return Ok(false);
        }
        self.send_challenge(response)?;
        Ok(true)
    }

    /// Browsers keep Basic credentials until they are closed, there is nothing to drop
    async fn drop_credentials(
        &self,
        _request: &AuthRequest,
        _response: &mut AuthResponse,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

fn parse_basic(auth_data: &str) -> anyhow::Result<(String, String)> {
    match auth_data.strip_prefix(HTTP_BASIC_PREFIX) {
        None => anyhow::bail!("Wrong auth type. Only Basic auth is supported"),
        Some(suffix) => {
            // suffix should be base64 string
            let decoded = String::from_utf8(
                base64::engine::general_purpose::STANDARD.decode(suffix.trim())?,
            )?;
            match decoded.split_once(':') {
                Some((user, password)) => Ok((user.to_owned(), password.to_owned())),
                None => anyhow::bail!("Malformed Basic header"),
            }
        }
    }
}
