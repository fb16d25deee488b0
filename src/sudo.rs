//! Impersonation ("sudo") support.
//!
//! An authenticated user may act as another user. The user to impersonate is remembered in a
//! cookie across requests and may be overridden on a single request with a parameter:
//!
//! - parameter absent or empty: keep impersonating the user named by the cookie, if any
//! - parameter `-`: stop impersonating
//! - any other parameter value: impersonate as that user from now on
//!
//! The cookie is only rewritten when the effective impersonation target changes.

use thiserror::Error;
use tracing::{debug, error, instrument};

use crate::http::{AuthRequest, AuthResponse, Cookie};
use crate::repository::{Credentials, Session, SimpleCredentials, ATTR_IMPERSONATOR};

/// The default name of the cookie remembering the impersonated user
pub const DEFAULT_COOKIE: &str = "sling.sudo";
/// The default name of the request parameter overriding the impersonated user
pub const DEFAULT_PARAMETER: &str = "sudo";
/// The parameter value that stops impersonation
pub const CLEAR_IMPERSONATION: &str = "-";

/// CookieError is returned when a value cannot be carried in a cookie
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CookieError {
    #[error("control character {0:#04x} not allowed in cookie value")]
    ControlCharacter(u32),
}

/// Quotes the value as an HTTP quoted-string. Quotes and backslashes are escaped with a
/// backslash. Control characters other than horizontal tab are rejected
pub fn quote_cookie_value(value: &str) -> Result<String, CookieError> {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' | '\\' => {
                quoted.push('\\');
                quoted.push(c);
            }
            '\t' => quoted.push(c),
            c if (c as u32) < 32 || c as u32 == 127 => {
                return Err(CookieError::ControlCharacter(c as u32))
            }
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    Ok(quoted)
}

/// Reverses [`quote_cookie_value`]. Values not starting with a quote are returned unchanged
pub fn unquote_cookie_value(value: &str) -> String {
    let inner = match value.strip_prefix('"') {
        Some(rest) => rest.strip_suffix('"').unwrap_or(rest),
        None => return value.to_owned(),
    };
    let mut unquoted = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            // A trailing lone backslash is kept as is
            unquoted.push(chars.next().unwrap_or('\\'));
        } else {
            unquoted.push(c);
        }
    }
    unquoted
}

/// Computes the impersonation target from the current cookie value (already unquoted) and the
/// request parameter. Returns `None` when no impersonation is requested
pub fn resolve_target(cookie: Option<&str>, parameter: Option<&str>) -> Option<String> {
    let target = match parameter {
        None | Some("") => cookie.unwrap_or_default(),
        Some(CLEAR_IMPERSONATION) => "",
        Some(p) => p,
    };
    if target.is_empty() {
        None
    } else {
        Some(target.to_owned())
    }
}

/// The names and behavior of the impersonation cookie and parameter
#[derive(Clone, Debug)]
pub struct SudoSettings {
    pub cookie_name: String,
    pub parameter_name: String,
    /// Sends `Cache-Control: no-cache="Set-Cookie"` along with any cookie change
    pub cache_control: bool,
}

impl Default for SudoSettings {
    fn default() -> Self {
        SudoSettings {
            cookie_name: DEFAULT_COOKIE.to_owned(),
            parameter_name: DEFAULT_PARAMETER.to_owned(),
            cache_control: false,
        }
    }
}

/// Applies the impersonation requested for this request to the freshly authenticated session.
///
/// Returns the session to use for the request. When impersonation succeeds the authenticated
/// session is logged out and the impersonated one returned. When it fails the failure is logged
/// and the authenticated session is returned. The impersonation cookie is synchronized with the
/// target actually in effect.
#[instrument(level = "debug", skip_all, fields(user = %session.user_id()))]
pub async fn handle_impersonation(
    request: &AuthRequest,
    response: &mut AuthResponse,
    settings: &SudoSettings,
    mut session: Box<dyn Session>,
) -> Box<dyn Session> {
    let cookie = request
        .cookie(&settings.cookie_name)
        .map(unquote_cookie_value)
        .filter(|c| !c.is_empty());
    let mut target = resolve_target(
        cookie.as_deref(),
        request.parameter(&settings.parameter_name),
    );

    if let Some(user) = target.as_deref() {
        if user != session.user_id() {
            let credentials: Credentials = SimpleCredentials::new(user, "")
                .with_attribute(ATTR_IMPERSONATOR, session.user_id())
                .into();
            match session.impersonate(&credentials).await {
                Ok(impersonated) => {
                    debug!(target = %user, "Impersonating");
                    session.logout();
                    session = impersonated;
                }
                Err(e) => {
                    error!(
                        target = %user,
                        error = %e,
                        "Impersonation failed, continuing as the authenticated user"
                    );
                    target = None;
                }
            }
        }
    }

    if target != cookie {
        let owner = session.user_id().to_owned();
        set_sudo_cookie(request, response, settings, &owner, target.as_deref());
    }
    session
}

fn set_sudo_cookie(
    request: &AuthRequest,
    response: &mut AuthResponse,
    settings: &SudoSettings,
    owner: &str,
    target: Option<&str>,
) {
    let path = match request.context_path() {
        "" => "/".to_owned(),
        p => p.to_owned(),
    };
    let cookie = match target {
        None => Cookie {
            name: settings.cookie_name.clone(),
            value: String::new(),
            max_age: 0,
            path,
            comment: None,
        },
        Some(user) => {
            let value = match quote_cookie_value(user) {
                Ok(v) => v,
                Err(e) => {
                    error!(
                        target = %user,
                        error = %e,
                        "Unable to quote impersonation cookie value, not setting cookie"
                    );
                    return;
                }
            };
            Cookie {
                name: settings.cookie_name.clone(),
                value,
                max_age: -1,
                path,
                comment: Some(format!("{} impersonates as {}", owner, user)),
            }
        }
    };
    response.add_cookie(cookie);
    if settings.cache_control {
        response.add_no_cache_set_cookie();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("alice")]
    #[case("")]
    #[case("with space")]
    #[case("tab\there")]
    #[case("quote\"inside")]
    #[case("back\\slash")]
    #[case("\\\"")]
    #[case("ünïcödé")]
    fn test_quote_round_trip(#[case] value: &str) {
        let quoted = quote_cookie_value(value).expect("value should quote");
        assert!(quoted.starts_with('"') && quoted.ends_with('"'));
        assert_eq!(value, unquote_cookie_value(&quoted));
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(
            "\"a\\\"b\\\\c\"",
            quote_cookie_value("a\"b\\c").unwrap()
        );
    }

    #[rstest]
    #[case('\0')]
    #[case('\n')]
    #[case('\r')]
    #[case('\u{1f}')]
    #[case('\u{7f}')]
    fn test_quote_rejects_control_characters(#[case] c: char) {
        let value = format!("bad{}value", c);
        assert_eq!(
            Err(CookieError::ControlCharacter(c as u32)),
            quote_cookie_value(&value)
        );
    }

    #[rstest]
    #[case("alice", "alice")]
    #[case("\"alice\"", "alice")]
    #[case("\"\"", "")]
    #[case("\"unterminated", "unterminated")]
    #[case("not\"quoted\"", "not\"quoted\"")]
    fn test_unquote(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(expected, unquote_cookie_value(raw));
    }

    #[rstest]
    #[case(None, None, None)]
    #[case(Some("alice"), None, Some("alice"))]
    #[case(Some("alice"), Some(""), Some("alice"))]
    #[case(Some("alice"), Some("-"), None)]
    #[case(None, Some("-"), None)]
    #[case(Some("alice"), Some("bob"), Some("bob"))]
    #[case(None, Some("bob"), Some("bob"))]
    fn test_resolve_target(
        #[case] cookie: Option<&str>,
        #[case] parameter: Option<&str>,
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(
            expected.map(|s| s.to_owned()),
            resolve_target(cookie, parameter)
        );
    }
}
