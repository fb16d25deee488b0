//! The content repository the authenticator logs requests into.
//!
//! The repository is an opaque credential validating store: it turns credentials into sessions,
//! allows a session to be exchanged for one impersonating another user and is told when a session
//! is no longer needed. [`memory::MemoryRepository`] is an in-process implementation backed by an
//! htpasswd file.

pub mod memory;

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

pub use memory::{MemoryRepository, UserStore};

/// A custom shorthand result type that always has an error type of
/// [`RepositoryError`](RepositoryError)
pub type Result<T> = core::result::Result<T, RepositoryError>;

/// The name of the credentials attribute naming the user that asks to impersonate as another user
pub const ATTR_IMPERSONATOR: &str = "impersonator";

/// User name and password, plus free form attributes
#[derive(Clone, Default)]
pub struct SimpleCredentials {
    user_id: String,
    password: String,
    attributes: HashMap<String, String>,
}

impl SimpleCredentials {
    pub fn new(user_id: &str, password: &str) -> Self {
        SimpleCredentials {
            user_id: user_id.to_owned(),
            password: password.to_owned(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_owned(), value.to_owned());
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(|s| s.as_str())
    }
}

impl fmt::Debug for SimpleCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleCredentials")
            .field("user_id", &self.user_id)
            .field("password", &"<redacted>")
            .field("attributes", &self.attributes)
            .finish()
    }
}

/// Credentials handed to the repository
#[derive(Clone, Debug)]
pub enum Credentials {
    /// User name and password to be checked by the repository
    Simple(SimpleCredentials),
    /// A user whose identity a handler has already verified, for example from a signed token.
    /// The repository only checks that the user exists
    PreAuthenticated { user_id: String },
}

impl Credentials {
    pub fn user_id(&self) -> &str {
        match self {
            Credentials::Simple(c) => c.user_id(),
            Credentials::PreAuthenticated { user_id } => user_id,
        }
    }
}

impl From<SimpleCredentials> for Credentials {
    fn from(c: SimpleCredentials) -> Self {
        Credentials::Simple(c)
    }
}

/// RepositoryError describes why a login or impersonation attempt failed
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// The repository refuses to open more sessions
    #[error("too many sessions: {0}")]
    TooManySessions(String),
    /// The credentials were rejected
    #[error("login failed: {0}")]
    Login(String),
    /// The requested workspace does not exist
    #[error("no such workspace: {0}")]
    NoSuchWorkspace(String),
    /// The session has already been logged out
    #[error("session is not live")]
    SessionClosed,
    /// Any errors that occur due to IO issues. Contains the underlying IO `Error`
    #[error("repository could not be accessed: {0:?}")]
    Io(#[from] std::io::Error),
    /// A catch-all for uncategorized errors
    #[error("{0}")]
    Other(String),
}

impl RepositoryError {
    /// A short name for the kind of failure, used in diagnostics sent to clients
    pub fn kind(&self) -> &'static str {
        match self {
            RepositoryError::TooManySessions(_) => "TooManySessions",
            RepositoryError::Login(_) => "Login",
            RepositoryError::NoSuchWorkspace(_) => "NoSuchWorkspace",
            RepositoryError::SessionClosed => "SessionClosed",
            RepositoryError::Io(_) => "Io",
            RepositoryError::Other(_) => "Other",
        }
    }
}

/// A live connection to the repository on behalf of a user
#[async_trait::async_trait]
pub trait Session: Send + Sync {
    /// The id of the user this session acts for
    fn user_id(&self) -> &str;

    fn workspace_name(&self) -> &str;

    /// Returns false once the session has been logged out
    fn is_live(&self) -> bool;

    /// Returns a new session for the user named by the credentials. This session stays valid and
    /// must still be logged out by the caller
    async fn impersonate(&self, credentials: &Credentials) -> Result<Box<dyn Session>>;

    /// Releases the session. Calling this on a session that is not live does nothing
    fn logout(&mut self);
}

/// The basic functionality required of a repository
#[async_trait::async_trait]
pub trait Repository: Send + Sync {
    /// Validates the credentials and opens a session in the given workspace, or the default
    /// workspace if none is given
    async fn login(
        &self,
        credentials: &Credentials,
        workspace: Option<&str>,
    ) -> Result<Box<dyn Session>>;

    /// Opens a session for the anonymous user in the default workspace
    async fn login_anonymous(&self) -> Result<Box<dyn Session>>;
}
