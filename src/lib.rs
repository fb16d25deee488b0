//! Path based request authentication.
//!
//! An [`Authenticator`] sits in front of request processing. Pluggable
//! [`AuthenticationHandler`](authn::AuthenticationHandler)s registered for path prefixes extract
//! credentials from requests, a [`Repository`](repository::Repository) turns them into sessions and
//! an authenticated user may impersonate another user with the [`sudo`] cookie and parameter.
//! Which paths may be served anonymously is decided by authentication requirements registered for
//! path prefixes.

pub mod authenticator;
pub mod authn;
pub mod config;
pub mod holder;
pub mod http;
pub mod repository;
#[cfg(feature = "server")]
pub mod server;
pub mod sudo;
#[cfg(feature = "test-tools")]
pub mod testing;

pub use authenticator::{Authenticator, LoginError, ServiceId};
pub use config::AuthenticatorConfig;
pub use crate::http::{AuthRequest, AuthResponse};
