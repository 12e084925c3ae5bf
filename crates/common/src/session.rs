//! On-disk session cache
//!
//! Stores the password-authenticated ticket so repeated console opens do not
//! prompt for a password. The file is owner-only, as is a directory created for it.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::types::AuthSession;
use crate::Result;

/// Cached sessions expire before the server-side ticket (120 minutes) does
pub const SESSION_TTL_MINUTES: i64 = 100;

const DIR_MODE: u32 = 0o700;
const FILE_MODE: u32 = 0o600;

/// Session file format
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionFile {
    ticket: String,
    csrf_token: String,
    username: String,
    timestamp_ms: i64,
}

impl From<&AuthSession> for SessionFile {
    fn from(session: &AuthSession) -> Self {
        Self {
            ticket: session.ticket.clone(),
            csrf_token: session.csrf_token.clone(),
            username: session.username.clone(),
            timestamp_ms: session.issued_at.timestamp_millis(),
        }
    }
}

impl SessionFile {
    fn into_session(self) -> Option<AuthSession> {
        if self.ticket.is_empty() || self.csrf_token.is_empty() || self.username.is_empty() {
            return None;
        }
        let issued_at = Utc.timestamp_millis_opt(self.timestamp_ms).single()?;
        Some(AuthSession {
            ticket: self.ticket,
            csrf_token: self.csrf_token,
            username: self.username,
            issued_at,
        })
    }
}

/// Persists the cached authentication session
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
    ttl: Duration,
}

impl SessionStore {
    /// Create a store backed by `path` with the default TTL
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ttl: Duration::minutes(SESSION_TTL_MINUTES),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cached session.
    ///
    /// Returns `None` when the file is missing, unreadable, malformed or
    /// lacks a required field. Never fails.
    pub fn load(&self) -> Option<AuthSession> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to read session file {}: {}", self.path.display(), e);
                }
                return None;
            }
        };

        match serde_json::from_str::<SessionFile>(&content) {
            Ok(file) => file.into_session(),
            Err(e) => {
                debug!("Ignoring malformed session file: {}", e);
                None
            }
        }
    }

    /// Whether the session is younger than the TTL
    pub fn is_valid(&self, session: &AuthSession) -> bool {
        self.is_valid_at(session, Utc::now())
    }

    /// Whether the session is younger than the TTL at `now`.
    /// An age equal to the TTL is already expired.
    pub fn is_valid_at(&self, session: &AuthSession, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(session.issued_at) < self.ttl
    }

    /// Remaining validity, or `None` when expired
    pub fn remaining(&self, session: &AuthSession) -> Option<Duration> {
        let remaining = self.ttl - Utc::now().signed_duration_since(session.issued_at);
        (remaining > Duration::zero()).then_some(remaining)
    }

    /// Load the cached session only if it is still valid
    pub fn load_valid(&self) -> Option<AuthSession> {
        self.load().filter(|session| self.is_valid(session))
    }

    /// Persist the session, tightening the file's permissions on every write.
    ///
    /// A missing parent directory is created owner-only. An existing one is
    /// left as it is.
    pub fn save(&self, session: &AuthSession) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                restrict(parent, DIR_MODE)?;
            }
        }

        let content = serde_json::to_string_pretty(&SessionFile::from(session))?;
        write_private(&self.path, content.as_bytes())?;
        restrict(&self.path, FILE_MODE)?;

        debug!("Saved session for {} to {}", session.username, self.path.display());
        Ok(())
    }

    /// Delete the session file if present
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Cleared session file {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
fn write_private(path: &Path, content: &[u8]) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(FILE_MODE)
        .open(path)?;
    file.write_all(content)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn write_private(path: &Path, content: &[u8]) -> Result<()> {
    fs::write(path, content)?;
    Ok(())
}

#[cfg(unix)]
fn restrict(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_session() -> AuthSession {
        AuthSession {
            ticket: "PVE:root@pam:6543ABCD::sig".to_string(),
            csrf_token: "6543ABCD:csrf".to_string(),
            username: "root@pam".to_string(),
            // Millisecond precision survives the file round trip
            issued_at: Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
        }
    }

    #[test]
    fn test_save_load() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path().join("session.json"));

        let session = sample_session();
        store.save(&session).unwrap();

        assert_eq!(store.load(), Some(session));
    }

    #[test]
    fn test_load_missing_file() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path().join("absent.json"));
        assert!(store.load().is_none());
    }

    #[test]
    fn test_load_malformed_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("session.json");

        fs::write(&path, "not json at all").unwrap();
        assert!(SessionStore::new(&path).load().is_none());

        // Missing csrfToken
        fs::write(
            &path,
            r#"{"ticket":"t","username":"root@pam","timestampMs":1700000000000}"#,
        )
        .unwrap();
        assert!(SessionStore::new(&path).load().is_none());

        // Present but empty
        fs::write(
            &path,
            r#"{"ticket":"","csrfToken":"c","username":"root@pam","timestampMs":1700000000000}"#,
        )
        .unwrap();
        assert!(SessionStore::new(&path).load().is_none());
    }

    #[test]
    fn test_file_format() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path().join("session.json"));
        store.save(&sample_session()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["ticket"], "PVE:root@pam:6543ABCD::sig");
        assert_eq!(raw["csrfToken"], "6543ABCD:csrf");
        assert_eq!(raw["username"], "root@pam");
        assert_eq!(raw["timestampMs"], 1_700_000_000_123i64);
    }

    #[test]
    fn test_ttl_boundary() {
        let store = SessionStore::new("/nonexistent/session.json");
        let session = sample_session();
        let ttl = Duration::minutes(SESSION_TTL_MINUTES);

        let just_before = session.issued_at + ttl - Duration::milliseconds(1);
        let exactly = session.issued_at + ttl;

        assert!(store.is_valid_at(&session, session.issued_at));
        assert!(store.is_valid_at(&session, just_before));
        assert!(!store.is_valid_at(&session, exactly));
    }

    #[test]
    fn test_session_from_101_minutes_ago_is_expired() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("session.json");
        let issued = Utc::now() - Duration::minutes(101);
        fs::write(
            &path,
            format!(
                r#"{{"ticket":"t","csrfToken":"c","username":"root@pam","timestampMs":{}}}"#,
                issued.timestamp_millis()
            ),
        )
        .unwrap();

        let store = SessionStore::new(&path);
        let session = store.load().expect("well-formed file loads");
        assert!(!store.is_valid(&session));
        assert!(store.load_valid().is_none());
        assert!(store.remaining(&session).is_none());
    }

    #[test]
    fn test_clear() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path().join("session.json"));

        // No-op when absent
        store.clear().unwrap();

        store.save(&sample_session()).unwrap();
        assert!(store.path().exists());
        store.clear().unwrap();
        assert!(!store.path().exists());
        assert!(store.load().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_permissions_tightened_on_every_save() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("session.json");
        fs::write(&path, "{}").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        SessionStore::new(&path).save(&sample_session()).unwrap();

        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_created_directory_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("cache");
        let path = dir.join("session.json");

        SessionStore::new(&path).save(&sample_session()).unwrap();

        let dir_mode = fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[cfg(unix)]
    #[test]
    fn test_existing_directory_keeps_its_permissions() {
        use std::os::unix::fs::PermissionsExt;

        // e.g. session.path = "/tmp/pvetui-session.json"
        let tmp = TempDir::new().unwrap();
        let shared = tmp.path().join("shared");
        fs::create_dir_all(&shared).unwrap();
        fs::set_permissions(&shared, fs::Permissions::from_mode(0o755)).unwrap();
        let path = shared.join("session.json");

        SessionStore::new(&path).save(&sample_session()).unwrap();

        let dir_mode = fs::metadata(&shared).unwrap().permissions().mode() & 0o777;
        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o755);
        assert_eq!(file_mode, 0o600);
        assert_eq!(SessionStore::new(&path).load(), Some(sample_session()));
    }
}
