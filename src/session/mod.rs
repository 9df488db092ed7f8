//! Users and active sessions (§3, §4.6). A distinct lock domain from the
//! metadata [`crate::metadata::Store`] per §5.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::RwLock;
use std::time::SystemTime;

/// A registered client identity. Registration is implicit on first
/// `REGISTER_CLIENT` for a username (§4.1).
#[derive(Debug, Clone)]
pub struct User {
    pub username: String,
    pub registered_at: SystemTime,
}

/// One logged-in client connection (invariant #6: at most one per username).
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub username: String,
    pub client_ip: IpAddr,
    pub login_time: SystemTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    AlreadyLoggedIn,
    NotLoggedIn,
}

pub struct SessionManager {
    users: RwLock<HashMap<String, User>>,
    sessions: RwLock<HashMap<String, ActiveSession>>,
}

impl SessionManager {
    pub fn new() -> Self {
        SessionManager { users: RwLock::new(HashMap::new()), sessions: RwLock::new(HashMap::new()) }
    }

    /// Registers `username` on first contact and opens a session for it.
    /// Rejects a second concurrent login for the same username (invariant
    /// #6) with [`SessionError::AlreadyLoggedIn`].
    pub fn login(&self, username: &str, client_ip: IpAddr) -> Result<(), SessionError> {
        {
            let mut users = self.users.write().unwrap();
            users.entry(username.to_string()).or_insert_with(|| User {
                username: username.to_string(),
                registered_at: SystemTime::now(),
            });
        }
        let mut sessions = self.sessions.write().unwrap();
        if sessions.contains_key(username) {
            return Err(SessionError::AlreadyLoggedIn);
        }
        sessions.insert(
            username.to_string(),
            ActiveSession { username: username.to_string(), client_ip, login_time: SystemTime::now() },
        );
        Ok(())
    }

    pub fn logout(&self, username: &str) {
        self.sessions.write().unwrap().remove(username);
    }

    pub fn is_logged_in(&self, username: &str) -> bool {
        self.sessions.read().unwrap().contains_key(username)
    }

    pub fn is_registered(&self, username: &str) -> bool {
        self.users.read().unwrap().contains_key(username)
    }

    pub fn list_users(&self) -> Vec<String> {
        let mut names: Vec<String> = self.users.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn localhost() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    #[test]
    fn second_login_for_same_user_is_rejected() {
        let sessions = SessionManager::new();
        sessions.login("alice", localhost()).unwrap();
        let err = sessions.login("alice", localhost()).unwrap_err();
        assert_eq!(err, SessionError::AlreadyLoggedIn);
    }

    #[test]
    fn logout_then_login_succeeds() {
        let sessions = SessionManager::new();
        sessions.login("alice", localhost()).unwrap();
        sessions.logout("alice");
        assert!(sessions.login("alice", localhost()).is_ok());
    }

    #[test]
    fn registration_persists_across_logout() {
        let sessions = SessionManager::new();
        sessions.login("alice", localhost()).unwrap();
        sessions.logout("alice");
        assert!(sessions.is_registered("alice"));
        assert!(!sessions.is_logged_in("alice"));
    }
}
