//! End to end tests for the HTTP frontend. Requests are sent through the full warp filter chain
#![cfg(feature = "server")]

use std::sync::Arc;

use base64::Engine;
use warp::http::header::{LOCATION, SET_COOKIE, WWW_AUTHENTICATE};
use warp::http::StatusCode;

use authgate::authenticator::{LOGIN_PATH, LOGOUT_PATH};
use authgate::authn::HttpBasicHandler;
use authgate::server::routes::api;
use authgate::server::JSON_MIME_TYPE;
use authgate::testing::RecordingRepository;
use authgate::{Authenticator, AuthenticatorConfig, ServiceId};

async fn setup(config: AuthenticatorConfig) -> (Arc<RecordingRepository>, Arc<Authenticator>) {
    let repository = Arc::new(
        RecordingRepository::new()
            .with_user("alice", "secret")
            .with_user("bob", ""),
    );
    let authenticator = Authenticator::new(repository.clone(), config).await;
    authenticator
        .on_handler_registered(
            ServiceId(0),
            &["/"],
            Arc::new(HttpBasicHandler::new("test")),
            None,
            "basic",
        )
        .await;
    (repository, Arc::new(authenticator))
}

fn basic(user: &str, password: &str) -> String {
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, password))
    )
}

fn identity(body: &[u8]) -> serde_json::Value {
    serde_json::from_slice(body).expect("body should be JSON")
}

#[tokio::test]
async fn test_anonymous_request() {
    let (repo, authenticator) = setup(AuthenticatorConfig::default()).await;
    let filter = api(authenticator, "http");

    let res = warp::test::request()
        .path("/content/page.html")
        .header("accept", JSON_MIME_TYPE)
        .reply(&filter)
        .await;
    assert_eq!(StatusCode::OK, res.status());
    let body = identity(res.body());
    assert_eq!("anonymous", body["user"]);
    assert!(body.get("auth_type").is_none());
    assert_eq!("default", body["workspace"]);

    assert_eq!(0, repo.log().live(), "the session should be released with the request");
}

#[tokio::test]
async fn test_basic_authentication() {
    let (repo, authenticator) = setup(AuthenticatorConfig::default()).await;
    let filter = api(authenticator, "http");

    let res = warp::test::request()
        .path("/content")
        .header("accept", JSON_MIME_TYPE)
        .header("authorization", basic("alice", "secret"))
        .reply(&filter)
        .await;
    assert_eq!(StatusCode::OK, res.status());
    let body = identity(res.body());
    assert_eq!("alice", body["user"]);
    assert_eq!("BASIC", body["auth_type"]);

    let res = warp::test::request()
        .path("/content")
        .header("authorization", basic("alice", "wrong"))
        .reply(&filter)
        .await;
    assert_eq!(StatusCode::UNAUTHORIZED, res.status());
    assert_eq!(
        res.headers().get(WWW_AUTHENTICATE).unwrap(),
        "Basic realm=\"test\""
    );

    assert_eq!(1, repo.log().sessions().len());
    assert_eq!(0, repo.log().live());
}

#[tokio::test]
async fn test_authentication_required() {
    let config = AuthenticatorConfig {
        anonymous_allowed: false,
        ..Default::default()
    };
    let (repo, authenticator) = setup(config).await;
    let filter = api(authenticator, "http");

    let res = warp::test::request().path("/content").reply(&filter).await;
    assert_eq!(StatusCode::UNAUTHORIZED, res.status());
    assert!(res.headers().get(WWW_AUTHENTICATE).is_some());
    assert!(repo.log().sessions().is_empty());

    // The login endpoint stays reachable and asks for credentials itself
    let res = warp::test::request().path(LOGIN_PATH).reply(&filter).await;
    assert_eq!(StatusCode::UNAUTHORIZED, res.status());
    assert_eq!(
        res.headers().get(WWW_AUTHENTICATE).unwrap(),
        "Basic realm=\"test\""
    );
}

#[tokio::test]
async fn test_forced_login_parameter() {
    let (repo, authenticator) = setup(AuthenticatorConfig::default()).await;
    let filter = api(authenticator, "http");

    let res = warp::test::request()
        .path("/content?sling:authRequestLogin=1")
        .reply(&filter)
        .await;
    assert_eq!(StatusCode::UNAUTHORIZED, res.status());
    assert!(repo.log().sessions().is_empty());
}

#[tokio::test]
async fn test_login_when_authenticated_redirects() {
    let (_, authenticator) = setup(AuthenticatorConfig::default()).await;
    let filter = api(authenticator, "http");

    let res = warp::test::request()
        .path(&format!("{}?resource=/content/page.html", LOGIN_PATH))
        .header("authorization", basic("alice", "secret"))
        .reply(&filter)
        .await;
    assert_eq!(StatusCode::FOUND, res.status());
    assert_eq!(res.headers().get(LOCATION).unwrap(), "/content/page.html");
}

#[tokio::test]
async fn test_logout_redirects() {
    let (repo, authenticator) = setup(AuthenticatorConfig::default()).await;
    let filter = api(authenticator, "http");

    let res = warp::test::request()
        .path(&format!("{}?resource=/content", LOGOUT_PATH))
        .reply(&filter)
        .await;
    assert_eq!(StatusCode::FOUND, res.status());
    assert_eq!(res.headers().get(LOCATION).unwrap(), "/content");

    let res = warp::test::request()
        .path(&format!("{}?resource=https://evil.example.com", LOGOUT_PATH))
        .reply(&filter)
        .await;
    assert_eq!(res.headers().get(LOCATION).unwrap(), "/");

    assert_eq!(0, repo.log().live());
}

#[tokio::test]
async fn test_impersonation_sets_cookie() {
    let (repo, authenticator) = setup(AuthenticatorConfig::default()).await;
    let filter = api(authenticator, "http");

    let res = warp::test::request()
        .path("/content?sudo=bob")
        .header("accept", JSON_MIME_TYPE)
        .header("authorization", basic("alice", "secret"))
        .reply(&filter)
        .await;
    assert_eq!(StatusCode::OK, res.status());
    assert_eq!("bob", identity(res.body())["user"]);
    let cookie = res
        .headers()
        .get(SET_COOKIE)
        .expect("impersonation cookie should be set")
        .to_str()
        .unwrap();
    assert!(cookie.starts_with("sling.sudo=\"bob\""), "unexpected cookie {}", cookie);

    // The cookie carries the impersonation to the next request
    let res = warp::test::request()
        .path("/content")
        .header("accept", JSON_MIME_TYPE)
        .header("authorization", basic("alice", "secret"))
        .header("cookie", "sling.sudo=\"bob\"")
        .reply(&filter)
        .await;
    assert_eq!("bob", identity(res.body())["user"]);
    assert!(res.headers().get(SET_COOKIE).is_none());

    let sessions = repo.log().sessions();
    assert_eq!(4, sessions.len());
    assert!(sessions.iter().all(|s| s.logouts == 1));
}
