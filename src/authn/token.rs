//! A handler that accepts signed bearer tokens
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use http::header::{HeaderValue, AUTHORIZATION, WWW_AUTHENTICATE};
use http::StatusCode;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::{AuthenticationHandler, AuthenticationInfo, Extraction};
use crate::http::{AuthRequest, AuthResponse};
use crate::repository::Credentials;

const BEARER_PREFIX: &str = "Bearer ";

/// The authentication type reported for requests authenticated by this handler
pub const AUTH_TYPE: &str = "TOKEN";

/// The claims carried by a token
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// The user the token was issued for
    pub sub: String,
    /// Expiry as seconds since the epoch
    pub exp: u64,
    /// The workspace to log into, if not the default one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
}

/// An authentication handler for HS256 signed JWTs sent as `Authorization: Bearer` tokens.
///
/// A valid token is trusted: the user it names is logged in without a password. Invalid or
/// expired tokens are answered with a `401` right away.
#[derive(Clone)]
pub struct TokenHandler {
    realm: String,
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
    validation: Validation,
}

impl TokenHandler {
    pub fn new(realm: &str, secret: &[u8]) -> Self {
        TokenHandler {
            realm: realm.to_owned(),
            decoding_key: DecodingKey::from_secret(secret),
            encoding_key: EncodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Issues a token for the user, valid for the given time
    pub fn issue(
        &self,
        user_id: &str,
        workspace: Option<&str>,
        valid_for: Duration,
    ) -> anyhow::Result<String> {
        let exp = SystemTime::now()
            .checked_add(valid_for)
            .ok_or_else(|| anyhow::anyhow!("Token lifetime out of range"))?
            .duration_since(UNIX_EPOCH)?
            .as_secs();
        let claims = Claims {
            sub: user_id.to_owned(),
            exp,
            workspace: workspace.map(|w| w.to_owned()),
        };
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding_key,
        )?)
    }

    fn validate(&self, token: &str) -> anyhow::Result<Claims> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }

    fn send_challenge(
        &self,
        response: &mut AuthResponse,
        error: Option<&str>,
    ) -> anyhow::Result<()> {
        let challenge = match error {
            Some(e) => format!("Bearer realm=\"{}\", error=\"{}\"", self.realm, e),
            None => format!("Bearer realm=\"{}\"", self.realm),
        };
        response.set_header(WWW_AUTHENTICATE, HeaderValue::from_str(&challenge)?);
        response.send_error(StatusCode::UNAUTHORIZED, "Unauthorized");
        Ok(())
    }
}

#[async_trait::async_trait]
impl AuthenticationHandler for TokenHandler {
    #[instrument(level = "trace", skip_all)]
    async fn extract_credentials(
        &self,
        request: &AuthRequest,
        response: &mut AuthResponse,
    ) -> Extraction {
        let token = match request
            .header(AUTHORIZATION.as_str())
            .and_then(|h| h.strip_prefix(BEARER_PREFIX))
        {
            Some(t) => t.trim(),
            None => return Extraction::NoCredentials,
        };

        match self.validate(token) {
            Ok(claims) => {
                debug!(user = %claims.sub, "Accepted bearer token");
                let mut info = AuthenticationInfo::new(
                    AUTH_TYPE,
                    Credentials::PreAuthenticated {
                        user_id: claims.sub,
                    },
                );
                if let Some(workspace) = claims.workspace.as_deref() {
                    info = info.with_workspace(workspace);
                }
                Extraction::Credentials(info)
            }
            Err(e) => {
                info!(error = %e, "Rejecting bearer token");
                match self.send_challenge(response, Some("invalid_token")) {
                    Ok(_) => Extraction::DoingAuth,
                    Err(e) => {
                        debug!(error = %e, "Unable to send challenge");
                        Extraction::NoCredentials
                    }
                }
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
        self.send_challenge(response, None)?;
        Ok(true)
    }

    /// Tokens are not remembered by clients on our behalf, so there is nothing to drop
    async fn drop_credentials(
        &self,
        _request: &AuthRequest,
        _response: &mut AuthResponse,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}
