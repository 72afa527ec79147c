//! Where auth keys and the DC table live between runs.
//!
//! The [`SessionStore`] trait is the seam for persistence. Only an in-memory
//! store ships here; on-disk formats belong to the application.

use std::io;
use std::sync::{Mutex, PoisonError};

use crate::sender::AuthData;

/// Data center the client talks to unless told otherwise.
pub const DEFAULT_HOME_DC: i32 = 2;

/// One known data center.
#[derive(Clone, PartialEq, Eq)]
pub struct DcEntry {
    pub dc_id: i32,
    /// `host:port`.
    pub addr: String,
    pub auth_key: Option<[u8; 256]>,
    pub first_salt: i64,
    /// Server time minus local time, in seconds.
    pub time_offset: i32,
}

impl DcEntry {
    /// A DC with no key yet.
    pub fn new(dc_id: i32, addr: impl Into<String>) -> Self {
        Self { dc_id, addr: addr.into(), auth_key: None, first_salt: 0, time_offset: 0 }
    }

    /// What a sender needs to resume on this DC without a key exchange.
    pub fn auth(&self) -> Option<AuthData> {
        self.auth_key.map(|auth_key| AuthData {
            auth_key,
            first_salt: self.first_salt,
            time_offset: self.time_offset,
        })
    }

    /// Store `auth`. Dropping the key keeps the clock offset.
    pub fn set_auth(&mut self, auth: Option<AuthData>) {
        match auth {
            Some(auth) => {
                self.auth_key = Some(auth.auth_key);
                self.first_salt = auth.first_salt;
                self.time_offset = auth.time_offset;
            }
            None => {
                self.auth_key = None;
                self.first_salt = 0;
            }
        }
    }
}

impl std::fmt::Debug for DcEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DcEntry")
            .field("dc_id", &self.dc_id)
            .field("addr", &self.addr)
            .field("has_auth_key", &self.auth_key.is_some())
            .field("first_salt", &self.first_salt)
            .field("time_offset", &self.time_offset)
            .finish()
    }
}

/// Everything a client needs to resume without a new key exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistedSession {
    pub home_dc_id: i32,
    pub dcs: Vec<DcEntry>,
}

impl Default for PersistedSession {
    /// The production DC table, no keys.
    fn default() -> Self {
        Self {
            home_dc_id: DEFAULT_HOME_DC,
            dcs: default_dc_addresses()
                .into_iter()
                .map(|(dc_id, addr)| DcEntry::new(dc_id, addr))
                .collect(),
        }
    }
}

impl PersistedSession {
    pub fn dc(&self, dc_id: i32) -> Option<&DcEntry> {
        self.dcs.iter().find(|dc| dc.dc_id == dc_id)
    }

    /// Replace the key for `dc_id`. Returns `false` for unknown DCs.
    pub fn set_auth_key(&mut self, dc_id: i32, auth: Option<AuthData>) -> bool {
        match self.dcs.iter_mut().find(|dc| dc.dc_id == dc_id) {
            Some(dc) => {
                dc.set_auth(auth);
                true
            }
            None => false,
        }
    }
}

/// Bootstrap DC address table.
pub fn default_dc_addresses() -> [(i32, &'static str); 5] {
    [
        (1, "149.154.175.53:443"),
        (2, "149.154.167.51:443"),
        (3, "149.154.175.100:443"),
        (4, "149.154.167.91:443"),
        (5, "91.108.56.130:443"),
    ]
}

/// Storage for a [`PersistedSession`].
pub trait SessionStore: Send + Sync + 'static {
    /// The stored session, or `None` if nothing was saved yet.
    fn load(&self) -> io::Result<Option<PersistedSession>>;

    fn save(&self, session: &PersistedSession) -> io::Result<()>;

    /// Record a new, updated or invalidated key for one DC.
    fn set_auth_key(&self, dc_id: i32, auth: Option<AuthData>) -> io::Result<()> {
        let mut session = self.load()?.unwrap_or_default();
        if !session.set_auth_key(dc_id, auth) {
            return Err(io::Error::new(io::ErrorKind::NotFound, format!("unknown DC{dc_id}")));
        }
        self.save(&session)
    }
}

/// Keeps the session in memory only.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    data: Mutex<Option<PersistedSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing session.
    pub fn with_session(session: PersistedSession) -> Self {
        Self { data: Mutex::new(Some(session)) }
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> io::Result<Option<PersistedSession>> {
        Ok(self.data.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, session: &PersistedSession) -> io::Result<()> {
        *self.data.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_has_every_production_dc() {
        let session = PersistedSession::default();
        assert_eq!(session.home_dc_id, 2);
        assert_eq!(session.dcs.len(), 5);
        assert_eq!(session.dc(2).unwrap().addr, "149.154.167.51:443");
        assert!(session.dcs.iter().all(|dc| dc.auth_key.is_none()));
    }

    #[test]
    fn key_updates_persist() {
        let store = MemorySessionStore::new();
        assert_eq!(store.load().unwrap(), None);

        let auth = AuthData { auth_key: [9; 256], first_salt: 5, time_offset: 60 };
        store.set_auth_key(4, Some(auth)).unwrap();
        let session = store.load().unwrap().unwrap();
        assert_eq!(session.dc(4).unwrap().auth(), Some(auth));

        store.set_auth_key(4, None).unwrap();
        let dc = store.load().unwrap().unwrap().dc(4).cloned().unwrap();
        assert_eq!(dc.auth(), None);
        assert_eq!(dc.first_salt, 0);
        // The clock offset describes our clock, not the key.
        assert_eq!(dc.time_offset, 60);
    }

    #[test]
    fn unknown_dc_is_an_error() {
        let store = MemorySessionStore::new();
        let err = store.set_auth_key(99, None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
