use serde::Serialize;
use warp::http::header::{HeaderValue, CONTENT_TYPE};
use warp::http::status::StatusCode;
use warp::reply::Response;
use warp::Reply;

use tracing::{debug, error};

use super::{JSON_MIME_TYPE, TOML_MIME_TYPE};
use crate::http::AuthResponse;

const SUPPORTED_SERIALIZERS: &[&str] = &[TOML_MIME_TYPE, JSON_MIME_TYPE, "text/json"];

/// Use an accept header to determine how to serialize content.
///
/// This will examine the Accept header, looking for the best match, and then it will
/// use the appropriate serializer to serialize the data.
///
/// The current implementation ignores `q=` annotations, assigning preference based on
/// the first MIME type to match.
///
/// For example, `Accept: text/json, application/toml;q=0.9` will cause encoding to be in JSON.
/// If no suitable content type is found, this will encode in application/toml.
pub fn serialized_data<T>(val: &T, accept: &str) -> SerializedData
where
    T: Serialize,
{
    let accept_items = parse_accept(accept);
    debug!(
        %accept,
        ?accept_items,
        "Parsed accept header into list",
    );
    let best_fit = accept_items
        .iter()
        .find(|i| SUPPORTED_SERIALIZERS.contains(&i.as_str()))
        .map(|s| s.as_str())
        .unwrap_or("*/*");
    debug!(%best_fit, "Selected a best-fit MIME");
    let (inner, mime) = match best_fit {
        JSON_MIME_TYPE | "text/json" => (
            serde_json::to_vec(val).map_err(|e| {
                error!(error = %e, "Error while serializing JSON");
            }),
            JSON_MIME_TYPE,
        ),
        // TOML is default
        _ => (
            toml::to_vec(val).map_err(|e| {
                error!(error = %e, "Error while serializing TOML");
            }),
            TOML_MIME_TYPE,
        ),
    };
    debug!(%mime, "negotiated MIME");
    SerializedData {
        inner,
        mime: mime.to_owned(),
    }
}

fn parse_accept(header: &str) -> Vec<String> {
    header
        .split(',')
        .filter_map(|h| h.split(';').next())
        .map(|mime| mime.trim().to_lowercase())
        .collect()
}

/// A serialized body.
///
/// Currently, this may be JSON or TOML.
pub struct SerializedData {
    inner: Result<Vec<u8>, ()>,
    mime: String,
}

impl Reply for SerializedData {
    #[inline]
    fn into_response(self) -> Response {
        match self.inner {
            Ok(body) => {
                let mut res = Response::new(body.into());
                res.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_str(self.mime.as_str())
                        .unwrap_or_else(|_| HeaderValue::from_static(TOML_MIME_TYPE)),
                );
                res
            }
            Err(()) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    }
}

/// Converts the response written by the authenticator or one of its handlers into a warp
/// response. The body, if any, is sent as plain text
pub fn from_auth_response(auth: &AuthResponse) -> Response {
    let mut res = match auth.body() {
        Some(body) => {
            let mut res = Response::new(body.to_owned().into());
            res.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
            res
        }
        None => Response::new(warp::hyper::Body::empty()),
    };
    *res.status_mut() = auth.status();
    with_auth_headers(res, auth)
}

/// Adds the headers the authenticator set, such as `Set-Cookie` for the impersonation cookie, to
/// a response
pub fn with_auth_headers(mut res: Response, auth: &AuthResponse) -> Response {
    for (name, value) in auth.headers() {
        res.headers_mut().append(name.clone(), value.clone());
    }
    res
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::http::Cookie;

    #[test]
    fn test_parse_accept() {
        assert_eq!(vec!["application/toml"], parse_accept("application/toml"));

        assert_eq!(vec!["application/toml"], parse_accept("application/TOML"));

        assert_eq!(
            vec!["text/json", "application/json"],
            parse_accept("text/json, application/json;q=0.9")
        );
    }

    #[test]
    fn test_from_auth_response() {
        let mut auth = AuthResponse::new();
        auth.add_cookie(Cookie {
            name: "sling.sudo".to_owned(),
            value: String::new(),
            max_age: 0,
            path: "/".to_owned(),
            comment: None,
        });
        auth.send_error(StatusCode::FORBIDDEN, "Cannot login");

        let res = from_auth_response(&auth);
        assert_eq!(StatusCode::FORBIDDEN, res.status());
        assert_eq!(1, res.headers().get_all("set-cookie").iter().count());
        assert_eq!(
            res.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
    }
}
