use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::api::User;
use crate::error::{PipewatchError, Result};

/// Opaque bearer credential issued by the backend at login.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(***)")
    }
}

/// On-disk layout of the credential file. The credential lives under the
/// fixed key `token`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredCredential {
    #[serde(default)]
    token: Option<Token>,
}

/// Durable storage for the session credential.
///
/// Persists to `credentials.json` in the platform config directory:
/// - Linux: `~/.config/pipewatch/credentials.json`
/// - macOS: `~/Library/Application Support/pipewatch/credentials.json`
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: Option<PathBuf>,
}

impl CredentialStore {
    /// Store backed by the given file.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Store that forgets everything when the process exits.
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self { path: None }
    }

    /// Default platform location.
    ///
    /// # Errors
    ///
    /// Returns an error if no config directory can be determined.
    pub fn default_location() -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| PipewatchError::Store("No config directory found".into()))?
            .join("pipewatch");
        Ok(Self::at(dir.join("credentials.json")))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Reads the persisted credential. A missing or unreadable file means no
    /// credential.
    pub fn load(&self) -> Option<Token> {
        let path = self.path.as_ref()?;
        if !path.exists() {
            return None;
        }

        fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str::<StoredCredential>(&content).ok())
            .and_then(|stored| stored.token)
            .or_else(|| {
                warn!("Ignoring unreadable credential file: {}", path.display());
                None
            })
    }

    pub fn save(&self, token: &Token) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string(&StoredCredential {
            token: Some(token.clone()),
        })?;
        fs::write(path, content)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // Owner-only: the file holds a bearer credential
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }
        debug!("Saved credential to: {}", path.display());
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if path.exists() {
            fs::remove_file(path)?;
            debug!("Removed credential file: {}", path.display());
        }
        Ok(())
    }
}

struct SessionState {
    store: CredentialStore,
    token: RwLock<Option<Token>>,
    user: RwLock<Option<User>>,
    login_required: watch::Sender<bool>,
}

/// The signed-in session shared by every component that talks to the API.
///
/// Cloning is cheap and every clone observes the same credential. Readers
/// always see the latest value, so a credential cleared by one view is gone for
/// every other view on its next request.
#[derive(Clone)]
pub struct Session {
    state: Arc<SessionState>,
}

impl Session {
    /// Opens a session from the credential persisted in `store`, if any.
    pub fn open(store: CredentialStore) -> Self {
        let token = store.load();
        if token.is_some() {
            debug!("Loaded stored credential");
        }
        let (login_required, _) = watch::channel(token.is_none());

        Self {
            state: Arc::new(SessionState {
                store,
                token: RwLock::new(token),
                user: RwLock::new(None),
                login_required,
            }),
        }
    }

    pub fn token(&self) -> Option<Token> {
        self.state
            .token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    pub fn user(&self) -> Option<User> {
        self.state
            .user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_user(&self, user: Option<User>) {
        *self.state.user.write().unwrap_or_else(PoisonError::into_inner) = user;
    }

    /// Holds and persists a freshly issued credential, replacing any previous one.
    pub fn sign_in(&self, token: Token) -> Result<()> {
        self.state.store.save(&token)?;
        *self.state.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
        self.set_user(None);
        self.state.login_required.send_replace(false);
        info!("Signed in");
        Ok(())
    }

    /// Clears the credential and identity and asks for the login view.
    pub fn sign_out(&self) -> Result<()> {
        let cleared = self.clear_in_memory();
        self.state.store.clear()?;
        if cleared {
            info!("Signed out");
        }
        Ok(())
    }

    /// Same effect as [`Session::sign_out`], for credentials the server no
    /// longer accepts. Store failures are logged, not returned.
    pub fn invalidate(&self) {
        if self.clear_in_memory() {
            warn!("Credential rejected by server; signing out");
        }
        if let Err(e) = self.state.store.clear() {
            warn!("Failed to remove stored credential: {e}");
        }
    }

    /// Raises the login-required signal without touching the credential.
    pub fn require_login(&self) {
        self.state.login_required.send_replace(true);
    }

    pub fn login_required(&self) -> bool {
        *self.state.login_required.borrow()
    }

    /// Receiver that changes whenever the session demands the login view.
    pub fn watch_login(&self) -> watch::Receiver<bool> {
        self.state.login_required.subscribe()
    }

    fn clear_in_memory(&self) -> bool {
        let previous = self
            .state
            .token
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.set_user(None);
        self.state.login_required.send_replace(true);
        previous.is_some()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("authenticated", &self.is_authenticated())
            .field("store", &self.state.store.path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file_store(dir: &TempDir) -> CredentialStore {
        CredentialStore::at(dir.path().join("pipewatch").join("credentials.json"))
    }

    #[test]
    fn test_token_debug_hides_secret() {
        let token = Token::from("very-secret");
        assert_eq!(format!("{token:?}"), "Token(***)");
        assert_eq!(token.as_str(), "very-secret");
    }

    #[test]
    fn test_new_session_without_credential_requires_login() {
        let session = Session::open(CredentialStore::in_memory());
        assert!(!session.is_authenticated());
        assert!(session.login_required());
    }

    #[test]
    fn test_sign_in_persists_credential() {
        let temp_dir = TempDir::new().unwrap();
        let session = Session::open(file_store(&temp_dir));

        session.sign_in(Token::from("abc")).unwrap();
        assert!(!session.login_required());

        // A fresh process sees the stored credential
        let reopened = Session::open(file_store(&temp_dir));
        assert_eq!(reopened.token(), Some(Token::from("abc")));
    }

    #[test]
    fn test_credential_file_uses_fixed_key() {
        let temp_dir = TempDir::new().unwrap();
        let store = file_store(&temp_dir);
        store.save(&Token::from("abc")).unwrap();

        let content = fs::read_to_string(store.path().unwrap()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["token"], "abc");
    }

    #[cfg(unix)]
    #[test]
    fn test_credential_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let store = file_store(&temp_dir);
        store.save(&Token::from("abc")).unwrap();

        let mode = fs::metadata(store.path().unwrap()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_sign_out_clears_everything() {
        let temp_dir = TempDir::new().unwrap();
        let session = Session::open(file_store(&temp_dir));
        session.sign_in(Token::from("abc")).unwrap();
        session.set_user(Some(User {
            id: 1,
            username: "ada".into(),
            email: None,
            created_at: None,
        }));

        session.sign_out().unwrap();

        assert!(session.token().is_none());
        assert!(session.user().is_none());
        assert!(session.login_required());
        assert!(file_store(&temp_dir).load().is_none());
    }

    #[test]
    fn test_clones_observe_invalidation_immediately() {
        let session = Session::open(CredentialStore::in_memory());
        session.sign_in(Token::from("abc")).unwrap();
        let other_view = session.clone();
        let mut login = other_view.watch_login();

        session.invalidate();

        assert!(other_view.token().is_none());
        assert!(login.has_changed().unwrap());
        assert!(*login.borrow_and_update());
    }

    #[test]
    fn test_login_watch_wakes_on_invalidation() {
        let session = Session::open(CredentialStore::in_memory());
        session.sign_in(Token::from("abc")).unwrap();
        let mut login = session.watch_login();

        {
            let mut changed = tokio_test::task::spawn(login.changed());
            tokio_test::assert_pending!(changed.poll());

            session.invalidate();

            assert!(changed.is_woken());
            tokio_test::assert_ready_ok!(changed.poll());
        }
        assert!(*login.borrow());
    }

    #[test]
    fn test_unreadable_credential_file_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let store = file_store(&temp_dir);
        fs::create_dir_all(store.path().unwrap().parent().unwrap()).unwrap();
        fs::write(store.path().unwrap(), "not json").unwrap();

        assert!(store.load().is_none());
    }
}
