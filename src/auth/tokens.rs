//! Token storage and management

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::api::ApiError;

/// Access/refresh token pair for the logged-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
}

/// Token store trait for different storage backends.
///
/// Implementations use interior mutability so a single store can be shared
/// between the API client and the login/logout commands.
pub trait TokenStore: Send + Sync {
    fn session(&self) -> Option<Session>;

    /// Replace both tokens in one write.
    fn store(&self, session: Session) -> Result<(), ApiError>;

    /// Remove both tokens (logged-out state).
    fn clear(&self) -> Result<(), ApiError>;

    fn access_token(&self) -> Option<String> {
        self.session().map(|s| s.access_token)
    }

    fn refresh_token(&self) -> Option<String> {
        self.session().map(|s| s.refresh_token)
    }
}

/// In-process store, lost on exit.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    session: RwLock<Option<Session>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            session: RwLock::new(Some(session)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn session(&self) -> Option<Session> {
        self.session.read().ok().and_then(|s| s.clone())
    }

    fn store(&self, session: Session) -> Result<(), ApiError> {
        let mut guard = self
            .session
            .write()
            .map_err(|_| ApiError::Storage("token lock poisoned".into()))?;
        *guard = Some(session);
        Ok(())
    }

    fn clear(&self) -> Result<(), ApiError> {
        let mut guard = self
            .session
            .write()
            .map_err(|_| ApiError::Storage("token lock poisoned".into()))?;
        *guard = None;
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialsFile {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

/// Store mirrored to `credentials.toml` in the config directory.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    session: RwLock<Option<Session>>,
}

impl FileTokenStore {
    /// Open the store at `path`, loading any saved session.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let path = path.into();
        let session = if path.exists() {
            let content = fs::read_to_string(&path).context("Failed to read credentials file")?;
            let file: CredentialsFile =
                toml::from_str(&content).context("Failed to parse credentials file")?;
            match (file.access_token, file.refresh_token) {
                (Some(access_token), Some(refresh_token)) => Some(Session {
                    access_token,
                    refresh_token,
                }),
                _ => None,
            }
        } else {
            None
        };

        Ok(Self {
            path,
            session: RwLock::new(session),
        })
    }

    /// Open `credentials.toml` in the default config directory.
    pub fn open_default() -> anyhow::Result<Self> {
        Self::open(crate::config::Config::config_dir()?.join("credentials.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, session: Option<&Session>) -> Result<(), ApiError> {
        let file = CredentialsFile {
            access_token: session.map(|s| s.access_token.clone()),
            refresh_token: session.map(|s| s.refresh_token.clone()),
        };
        let content =
            toml::to_string_pretty(&file).map_err(|e| ApiError::Storage(e.to_string()))?;

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| ApiError::Storage(e.to_string()))?;
        }
        fs::write(&self.path, content).map_err(|e| ApiError::Storage(e.to_string()))?;

        // Set restrictive permissions (file contains tokens)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&self.path, perms).map_err(|e| ApiError::Storage(e.to_string()))?;
        }

        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn session(&self) -> Option<Session> {
        self.session.read().ok().and_then(|s| s.clone())
    }

    fn store(&self, session: Session) -> Result<(), ApiError> {
        let mut guard = self
            .session
            .write()
            .map_err(|_| ApiError::Storage("token lock poisoned".into()))?;
        self.persist(Some(&session))?;
        *guard = Some(session);
        Ok(())
    }

    fn clear(&self) -> Result<(), ApiError> {
        let mut guard = self
            .session
            .write()
            .map_err(|_| ApiError::Storage("token lock poisoned".into()))?;
        self.persist(None)?;
        *guard = None;
        Ok(())
    }
}
