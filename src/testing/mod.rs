//! Some helpful utilities for testing. This module is only available if the `test-tools` feature is
//! enabled. It provides test doubles for the repository, for authentication handlers and for
//! feedback handlers that record how they were used, so tests can assert on logins, logouts and
//! handler calls.
//!
//! Like most test utilities, these panic instead of returning errors when misused.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use http::header::{HeaderValue, WWW_AUTHENTICATE};
use http::StatusCode;

use crate::authn::{
    AuthenticationFeedbackHandler, AuthenticationHandler, AuthenticationInfo, Extraction,
};
use crate::http::{AuthRequest, AuthResponse};
use crate::repository::{
    Credentials, Repository, RepositoryError, Result, Session, SimpleCredentials, ATTR_IMPERSONATOR,
};

/// The workspace recorded for logins that don't name one
pub const DEFAULT_WORKSPACE: &str = "default";
/// The user id of anonymous sessions
pub const ANONYMOUS: &str = "anonymous";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A kind of repository failure to inject
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    TooManySessions,
    Login,
    NoSuchWorkspace,
    Other,
}

impl FailureKind {
    fn to_error(self) -> RepositoryError {
        match self {
            FailureKind::TooManySessions => RepositoryError::TooManySessions("injected".to_owned()),
            FailureKind::Login => RepositoryError::Login("injected".to_owned()),
            FailureKind::NoSuchWorkspace => RepositoryError::NoSuchWorkspace("injected".to_owned()),
            FailureKind::Other => RepositoryError::Other("injected".to_owned()),
        }
    }
}

/// What is known about a session opened by a [`RecordingRepository`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: usize,
    pub user_id: String,
    pub workspace: String,
    /// The user that impersonated as `user_id` to open this session
    pub impersonator: Option<String>,
    pub logouts: usize,
}

/// A shared record of all sessions a [`RecordingRepository`] opened
#[derive(Clone, Debug, Default)]
pub struct SessionLog {
    sessions: Arc<Mutex<Vec<SessionRecord>>>,
}

impl SessionLog {
    fn open(&self, user_id: &str, workspace: &str, impersonator: Option<&str>) -> usize {
        let mut sessions = lock(&self.sessions);
        let id = sessions.len();
        sessions.push(SessionRecord {
            id,
            user_id: user_id.to_owned(),
            workspace: workspace.to_owned(),
            impersonator: impersonator.map(|s| s.to_owned()),
            logouts: 0,
        });
        id
    }

    fn logout(&self, id: usize) {
        if let Some(record) = lock(&self.sessions).get_mut(id) {
            record.logouts += 1;
        }
    }

    /// All sessions opened so far, in the order they were opened
    pub fn sessions(&self) -> Vec<SessionRecord> {
        lock(&self.sessions).clone()
    }

    /// The record of the session with the given id. Panics if there is no such session
    pub fn session(&self, id: usize) -> SessionRecord {
        lock(&self.sessions)
            .get(id)
            .cloned()
            .unwrap_or_else(|| panic!("No session with id {}", id))
    }

    /// The number of sessions that have been opened but not logged out
    pub fn live(&self) -> usize {
        lock(&self.sessions)
            .iter()
            .filter(|r| r.logouts == 0)
            .count()
    }

    /// The total number of logouts across all sessions
    pub fn total_logouts(&self) -> usize {
        lock(&self.sessions).iter().map(|r| r.logouts).sum()
    }
}

/// A repository that accepts a fixed set of users and records every session it opens.
///
/// Any user may impersonate any other known user. Failures can be injected for logins, anonymous
/// logins and impersonation separately.
#[derive(Default)]
pub struct RecordingRepository {
    users: HashMap<String, String>,
    log: SessionLog,
    login_failure: Mutex<Option<FailureKind>>,
    anonymous_failure: Mutex<Option<FailureKind>>,
    impersonation_failure: Arc<Mutex<Option<FailureKind>>>,
}

impl RecordingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user_id: &str, password: &str) -> Self {
        self.users.insert(user_id.to_owned(), password.to_owned());
        self
    }

    /// The log of sessions opened by this repository
    pub fn log(&self) -> SessionLog {
        self.log.clone()
    }

    /// Makes every following credentialed login fail. `None` stops injecting failures
    pub fn fail_logins_with(&self, failure: Option<FailureKind>) {
        *lock(&self.login_failure) = failure;
    }

    /// Makes every following anonymous login fail. `None` stops injecting failures
    pub fn fail_anonymous_with(&self, failure: Option<FailureKind>) {
        *lock(&self.anonymous_failure) = failure;
    }

    /// Makes every following impersonation fail. `None` stops injecting failures
    pub fn fail_impersonation_with(&self, failure: Option<FailureKind>) {
        *lock(&self.impersonation_failure) = failure;
    }

    fn open(&self, user_id: &str, workspace: &str) -> Box<dyn Session> {
        Box::new(RecordingSession {
            id: self.log.open(user_id, workspace, None),
            user_id: user_id.to_owned(),
            workspace: workspace.to_owned(),
            live: true,
            known_users: self.users.keys().cloned().collect(),
            log: self.log.clone(),
            impersonation_failure: self.impersonation_failure.clone(),
        })
    }
}

#[async_trait::async_trait]
impl Repository for RecordingRepository {
    async fn login(
        &self,
        credentials: &Credentials,
        workspace: Option<&str>,
    ) -> Result<Box<dyn Session>> {
        if let Some(failure) = *lock(&self.login_failure) {
            return Err(failure.to_error());
        }
        let valid = match credentials {
            Credentials::Simple(c) => {
                self.users.get(c.user_id()).map(|p| p.as_str()) == Some(c.password())
            }
            Credentials::PreAuthenticated { user_id } => self.users.contains_key(user_id),
        };
        if !valid {
            return Err(RepositoryError::Login(format!(
                "invalid credentials for {}",
                credentials.user_id()
            )));
        }
        Ok(self.open(
            credentials.user_id(),
            workspace.unwrap_or(DEFAULT_WORKSPACE),
        ))
    }

    async fn login_anonymous(&self) -> Result<Box<dyn Session>> {
        if let Some(failure) = *lock(&self.anonymous_failure) {
            return Err(failure.to_error());
        }
        Ok(self.open(ANONYMOUS, DEFAULT_WORKSPACE))
    }
}

/// A session opened by a [`RecordingRepository`]
pub struct RecordingSession {
    id: usize,
    user_id: String,
    workspace: String,
    live: bool,
    known_users: Vec<String>,
    log: SessionLog,
    impersonation_failure: Arc<Mutex<Option<FailureKind>>>,
}

impl RecordingSession {
    /// The id of this session in the [`SessionLog`]
    pub fn id(&self) -> usize {
        self.id
    }
}

#[async_trait::async_trait]
impl Session for RecordingSession {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn workspace_name(&self) -> &str {
        &self.workspace
    }

    fn is_live(&self) -> bool {
        self.live
    }

    async fn impersonate(&self, credentials: &Credentials) -> Result<Box<dyn Session>> {
        if !self.live {
            return Err(RepositoryError::SessionClosed);
        }
        if let Some(failure) = *lock(&self.impersonation_failure) {
            return Err(failure.to_error());
        }
        let target = credentials.user_id();
        if !self.known_users.iter().any(|u| u == target) {
            return Err(RepositoryError::Login(format!("no such user {}", target)));
        }
        let impersonator = match credentials {
            Credentials::Simple(c) => c.attribute(ATTR_IMPERSONATOR),
            Credentials::PreAuthenticated { .. } => None,
        };
        Ok(Box::new(RecordingSession {
            id: self.log.open(target, &self.workspace, impersonator),
            user_id: target.to_owned(),
            workspace: self.workspace.clone(),
            live: true,
            known_users: self.known_users.clone(),
            log: self.log.clone(),
            impersonation_failure: self.impersonation_failure.clone(),
        }))
    }

    fn logout(&mut self) {
        self.live = false;
        self.log.logout(self.id);
    }
}

/// What a [`StaticHandler`] answers when asked for credentials
#[derive(Clone, Debug)]
pub enum Outcome {
    /// Returns simple credentials for the user
    Credentials { user_id: String, password: String },
    NoCredentials,
    /// Redirects to `/login.html` and reports an ongoing authentication
    DoingAuth,
}

/// An authentication handler with canned answers that counts how often it was called
#[derive(Debug)]
pub struct StaticHandler {
    name: String,
    outcome: Outcome,
    can_request: bool,
    fail_drop: bool,
    extract_calls: AtomicUsize,
    request_calls: AtomicUsize,
    drop_calls: AtomicUsize,
}

impl StaticHandler {
    pub fn new(name: &str, outcome: Outcome) -> Self {
        StaticHandler {
            name: name.to_owned(),
            outcome,
            can_request: true,
            fail_drop: false,
            extract_calls: AtomicUsize::new(0),
            request_calls: AtomicUsize::new(0),
            drop_calls: AtomicUsize::new(0),
        }
    }

    /// A handler finding simple credentials for the user
    pub fn credentials(name: &str, user_id: &str, password: &str) -> Self {
        Self::new(
            name,
            Outcome::Credentials {
                user_id: user_id.to_owned(),
                password: password.to_owned(),
            },
        )
    }

    /// A handler that never finds credentials
    pub fn none(name: &str) -> Self {
        Self::new(name, Outcome::NoCredentials)
    }

    /// Whether the handler sends a challenge when asked to request credentials. Defaults to true
    pub fn requesting(mut self, can_request: bool) -> Self {
        self.can_request = can_request;
        self
    }

    /// Makes dropping credentials fail
    pub fn failing_drop(mut self) -> Self {
        self.fail_drop = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extract_calls(&self) -> usize {
        self.extract_calls.load(Ordering::SeqCst)
    }

    pub fn request_calls(&self) -> usize {
        self.request_calls.load(Ordering::SeqCst)
    }

    pub fn drop_calls(&self) -> usize {
        self.drop_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AuthenticationHandler for StaticHandler {
    async fn extract_credentials(
        &self,
        _request: &AuthRequest,
        response: &mut AuthResponse,
    ) -> Extraction {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            Outcome::Credentials { user_id, password } => {
                Extraction::Credentials(AuthenticationInfo::new(
                    &self.name,
                    SimpleCredentials::new(user_id, password).into(),
                ))
            }
            Outcome::NoCredentials => Extraction::NoCredentials,
            Outcome::DoingAuth => {
                response.send_redirect("/login.html");
                Extraction::DoingAuth
            }
        }
    }

    async fn request_credentials(
        &self,
        _request: &AuthRequest,
        response: &mut AuthResponse,
    ) -> anyhow::Result<bool> {
        self.request_calls.fetch_add(1, Ordering::SeqCst);
        if !self.can_request {
            return Ok(false);
        }
        response.set_header(
            WWW_AUTHENTICATE,
            HeaderValue::from_str(&format!("Static realm=\"{}\"", self.name))?,
        );
        response.send_error(StatusCode::UNAUTHORIZED, "Unauthorized");
        Ok(true)
    }

    async fn drop_credentials(
        &self,
        _request: &AuthRequest,
        _response: &mut AuthResponse,
    ) -> anyhow::Result<()> {
        self.drop_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_drop {
            anyhow::bail!("{} failed to drop credentials", self.name)
        }
        Ok(())
    }
}

/// A feedback handler counting how often it was told about successes and failures
#[derive(Debug, Default)]
pub struct RecordingFeedback {
    terminate: AtomicBool,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

impl RecordingFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the handler answer successful logins itself (with `204 No Content`), stopping
    /// further processing
    pub fn terminating(self) -> Self {
        self.terminate.store(true, Ordering::SeqCst);
        self
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AuthenticationFeedbackHandler for RecordingFeedback {
    async fn authentication_failed(
        &self,
        _request: &AuthRequest,
        _response: &mut AuthResponse,
        _info: &AuthenticationInfo,
    ) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    async fn authentication_succeeded(
        &self,
        _request: &AuthRequest,
        response: &mut AuthResponse,
        _info: &AuthenticationInfo,
    ) -> bool {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
        if self.terminate.load(Ordering::SeqCst) {
            response.send_error(StatusCode::NO_CONTENT, "");
            return true;
        }
        false
    }
}
