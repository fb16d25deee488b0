use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, instrument, trace, warn};

use super::{Credentials, Repository, RepositoryError, Result, Session};

/// The name of the user that may impersonate any other user
pub const ADMIN_USER: &str = "admin";
/// The id of the user anonymous sessions are opened for
pub const ANONYMOUS_USER: &str = "anonymous";
/// The workspace used when a login does not name one
pub const DEFAULT_WORKSPACE: &str = "default";

// Used to spend the same time on unknown users as on known ones
const DUMMY_HASH: &str = "$2y$07$QCVM96JWmNWzx3k/7g1UXOLAO2y0imHGNjzEVkQoikrsV3gd4Xqk6";

/// Users, their password hashes and who may impersonate them
#[derive(Clone, Debug, Default)]
pub struct UserStore {
    users: HashMap<String, String>,
    impersonators: HashMap<String, HashSet<String>>,
}

impl UserStore {
    /// Read an htpasswd-formatted file.
    ///
    /// This only supports bcrypt.
    ///
    /// Example htpassword entry for a bcrypt hash:
    ///
    /// > myName:$2y$05$c4WoMPo3SXsafkva.HHa6uXQZWr7oboPiC2bT/r7q1BB8I2s0BRqC
    ///
    /// See https://httpd.apache.org/docs/2.4/misc/password_encryptions.html
    pub async fn from_file(authfile: impl AsRef<Path>) -> std::io::Result<Self> {
        let raw = tokio::fs::read_to_string(&authfile).await?;
        Ok(Self::from_htpasswd(&raw))
    }

    /// Parses htpasswd-formatted text. Blank lines and lines starting with `#` are skipped
    pub fn from_htpasswd(raw: &str) -> Self {
        let mut store = UserStore::default();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            // Each line is username:{hash}value
            match line.split_once(':') {
                Some((user, hash)) => store.add_user(user, hash),
                None => warn!("Skipping malformed htpasswd line"),
            }
        }
        store
    }

    pub fn add_user(&mut self, user_id: &str, bcrypt_hash: &str) {
        self.users.insert(user_id.to_owned(), bcrypt_hash.to_owned());
    }

    /// Allows `impersonator` to impersonate as `user_id`
    pub fn allow_impersonation(&mut self, user_id: &str, impersonator: &str) {
        self.impersonators
            .entry(user_id.to_owned())
            .or_default()
            .insert(impersonator.to_owned());
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    fn may_impersonate(&self, impersonator: &str, user_id: &str) -> bool {
        impersonator == ADMIN_USER
            || self
                .impersonators
                .get(user_id)
                .map(|set| set.contains(impersonator))
                .unwrap_or(false)
    }

    fn check_credentials(&self, username: &str, password: &str) -> bool {
        // Note that it is consider a security risk to leak any information about
        // why an auth failed. So returning a bool provides the minimal info necessary.
        match self.users.get(username) {
            Some(ciphertext) => {
                if ciphertext.starts_with("$2y$")
                    || ciphertext.starts_with("$2b$")
                    || ciphertext.starts_with("$2a$")
                {
                    match bcrypt::verify(password, ciphertext) {
                        Err(e) => {
                            warn!(%e, "Error verifying bcrypted passwd");
                            false
                        }
                        Ok(res) => res,
                    }
                } else {
                    warn!("htpasswd has entries in the wrong format.");
                    false
                }
            }
            None => {
                let _ = bcrypt::verify(username, DUMMY_HASH);
                false
            }
        }
    }
}

/// A repository kept entirely in memory.
///
/// Sessions are counted while they are live so a maximum number of concurrent sessions can be
/// enforced.
#[derive(Clone, Debug)]
pub struct MemoryRepository {
    store: Arc<UserStore>,
    workspaces: HashSet<String>,
    anonymous_enabled: bool,
    max_sessions: Option<usize>,
    live: Arc<AtomicUsize>,
}

impl MemoryRepository {
    pub fn new(store: UserStore) -> Self {
        MemoryRepository {
            store: Arc::new(store),
            workspaces: [DEFAULT_WORKSPACE.to_owned()].into_iter().collect(),
            anonymous_enabled: true,
            max_sessions: None,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_workspace(mut self, name: &str) -> Self {
        self.workspaces.insert(name.to_owned());
        self
    }

    /// Enables or disables the anonymous account
    pub fn with_anonymous(mut self, enabled: bool) -> Self {
        self.anonymous_enabled = enabled;
        self
    }

    /// Limits the number of sessions that may be live at the same time
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = Some(max);
        self
    }

    /// The number of sessions currently live
    pub fn live_sessions(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn open(&self, user_id: &str, workspace: &str) -> Result<Box<dyn Session>> {
        open_session(
            &self.store,
            &self.live,
            self.max_sessions,
            user_id,
            workspace,
        )
    }

    fn resolve_workspace<'a>(&self, workspace: Option<&'a str>) -> Result<&'a str> {
        match workspace {
            None => Ok(DEFAULT_WORKSPACE),
            Some(w) if self.workspaces.contains(w) => Ok(w),
            Some(w) => Err(RepositoryError::NoSuchWorkspace(w.to_owned())),
        }
    }
}

fn open_session(
    store: &Arc<UserStore>,
    live: &Arc<AtomicUsize>,
    max_sessions: Option<usize>,
    user_id: &str,
    workspace: &str,
) -> Result<Box<dyn Session>> {
    let previous = live.fetch_add(1, Ordering::SeqCst);
    if let Some(max) = max_sessions {
        if previous >= max {
            live.fetch_sub(1, Ordering::SeqCst);
            return Err(RepositoryError::TooManySessions(format!(
                "{} sessions are live",
                previous
            )));
        }
    }
    trace!(user = %user_id, %workspace, "Opened session");
    Ok(Box::new(MemorySession {
        user_id: user_id.to_owned(),
        workspace: workspace.to_owned(),
        live: true,
        store: store.clone(),
        counter: live.clone(),
        max_sessions,
    }))
}

#[async_trait::async_trait]
impl Repository for MemoryRepository {
    #[instrument(level = "trace", skip(self, credentials), fields(user = %credentials.user_id()))]
    async fn login(
        &self,
        credentials: &Credentials,
        workspace: Option<&str>,
    ) -> Result<Box<dyn Session>> {
        let workspace = self.resolve_workspace(workspace)?;
        let valid = match credentials {
            Credentials::Simple(c) => self.store.check_credentials(c.user_id(), c.password()),
            Credentials::PreAuthenticated { user_id } => self.store.contains(user_id),
        };
        if !valid {
            debug!("Credentials rejected");
            return Err(RepositoryError::Login(format!(
                "invalid credentials for {}",
                credentials.user_id()
            )));
        }
        self.open(credentials.user_id(), workspace)
    }

    async fn login_anonymous(&self) -> Result<Box<dyn Session>> {
        if !self.anonymous_enabled {
            return Err(RepositoryError::Login(
                "the anonymous account is disabled".to_owned(),
            ));
        }
        self.open(ANONYMOUS_USER, DEFAULT_WORKSPACE)
    }
}

struct MemorySession {
    user_id: String,
    workspace: String,
    live: bool,
    store: Arc<UserStore>,
    counter: Arc<AtomicUsize>,
    max_sessions: Option<usize>,
}

#[async_trait::async_trait]
impl Session for MemorySession {
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
        let target = credentials.user_id();
        if !self.store.contains(target) {
            return Err(RepositoryError::Login(format!("no such user {}", target)));
        }
        if !self.store.may_impersonate(&self.user_id, target) {
            return Err(RepositoryError::Login(format!(
                "{} may not impersonate as {}",
                self.user_id, target
            )));
        }
        open_session(
            &self.store,
            &self.counter,
            self.max_sessions,
            target,
            &self.workspace,
        )
    }

    fn logout(&mut self) {
        if self.live {
            self.live = false;
            self.counter.fetch_sub(1, Ordering::SeqCst);
            trace!(user = %self.user_id, "Closed session");
        }
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.logout()
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;
    use crate::repository::SimpleCredentials;

    fn store() -> UserStore {
        let mut store = UserStore::default();
        store.add_user("alice", &bcrypt::hash("wonderland", 4).unwrap());
        store.add_user("bob", &bcrypt::hash("builder", 4).unwrap());
        store.add_user(ADMIN_USER, &bcrypt::hash("sw0rdf1sh", 4).unwrap());
        store.allow_impersonation("bob", "alice");
        store
    }

    fn simple(user: &str, password: &str) -> Credentials {
        SimpleCredentials::new(user, password).into()
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# users").unwrap();
        writeln!(file, "admin:{}", bcrypt::hash("sw0rdf1sh", 4).unwrap()).unwrap();
        writeln!(file, "garbage").unwrap();
        writeln!(file).unwrap();

        let store = UserStore::from_file(file.path())
            .await
            .expect("File should load");
        assert!(
            store.check_credentials("admin", "sw0rdf1sh"),
            "The password is always swordfish"
        );
        assert!(
            !store.check_credentials("nope", "password"),
            "should fail on nonexistent user"
        );
        assert!(
            !store.check_credentials("admin", "swordfish"),
            "The password is not swordfish"
        );
    }

    #[test]
    fn test_wrong_hash_format() {
        let store = UserStore::from_htpasswd("plain:{SHA}W6ph5Mm5Pz8GgiULbPgzG37mj9g=");
        assert!(!store.check_credentials("plain", "password"));
    }

    #[tokio::test]
    async fn test_login() {
        let repo = MemoryRepository::new(store()).with_workspace("drafts");

        let session = repo
            .login(&simple("alice", "wonderland"), None)
            .await
            .expect("valid credentials should log in");
        assert_eq!("alice", session.user_id());
        assert_eq!(DEFAULT_WORKSPACE, session.workspace_name());

        let session = repo
            .login(&simple("alice", "wonderland"), Some("drafts"))
            .await
            .unwrap();
        assert_eq!("drafts", session.workspace_name());

        let err = repo
            .login(&simple("alice", "wrong"), None)
            .await
            .err()
            .expect("wrong password should fail");
        assert!(matches!(err, RepositoryError::Login(_)));

        let err = repo
            .login(&simple("alice", "wonderland"), Some("nope"))
            .await
            .err()
            .expect("unknown workspace should fail");
        assert!(matches!(err, RepositoryError::NoSuchWorkspace(_)));

        let pre = Credentials::PreAuthenticated {
            user_id: "bob".to_owned(),
        };
        assert!(repo.login(&pre, None).await.is_ok());
        let pre = Credentials::PreAuthenticated {
            user_id: "mallory".to_owned(),
        };
        assert!(repo.login(&pre, None).await.is_err());
    }

    #[tokio::test]
    async fn test_anonymous() {
        let repo = MemoryRepository::new(store());
        let session = repo.login_anonymous().await.unwrap();
        assert_eq!(ANONYMOUS_USER, session.user_id());

        let repo = repo.with_anonymous(false);
        assert!(matches!(
            repo.login_anonymous().await,
            Err(RepositoryError::Login(_))
        ));
    }

    #[tokio::test]
    async fn test_session_limit() {
        let repo = MemoryRepository::new(store()).with_max_sessions(1);
        let mut first = repo.login_anonymous().await.unwrap();
        assert_eq!(1, repo.live_sessions());

        let err = repo
            .login(&simple("alice", "wonderland"), None)
            .await
            .err()
            .expect("second session should be refused");
        assert!(matches!(err, RepositoryError::TooManySessions(_)));
        assert_eq!(1, repo.live_sessions());

        first.logout();
        first.logout();
        assert!(!first.is_live());
        assert_eq!(0, repo.live_sessions());

        let second = repo.login_anonymous().await.unwrap();
        drop(second);
        assert_eq!(0, repo.live_sessions(), "dropping a session logs it out");
    }

    #[tokio::test]
    async fn test_impersonate() {
        let repo = MemoryRepository::new(store());
        let alice = repo
            .login(&simple("alice", "wonderland"), None)
            .await
            .unwrap();

        let bob = alice
            .impersonate(&simple("bob", ""))
            .await
            .expect("alice may impersonate as bob");
        assert_eq!("bob", bob.user_id());
        assert!(alice.is_live(), "the original session stays live");
        assert_eq!(2, repo.live_sessions());

        assert!(bob.impersonate(&simple("alice", "")).await.is_err());

        let admin = repo
            .login(&simple(ADMIN_USER, "sw0rdf1sh"), None)
            .await
            .unwrap();
        assert!(admin.impersonate(&simple("alice", "")).await.is_ok());
        assert!(admin.impersonate(&simple("mallory", "")).await.is_err());

        let mut closed = repo.login_anonymous().await.unwrap();
        closed.logout();
        assert!(matches!(
            closed.impersonate(&simple("bob", "")).await,
            Err(RepositoryError::SessionClosed)
        ));
    }
}
