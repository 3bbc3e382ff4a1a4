//! Session registry — the process's one mutable shared table.
//!
//! Sessions are created by Request, consumed by the first successful
//! Connect, or removed by Terminate. All mutations serialize through a
//! single mutex; `remove` is the linearization point for racing Connects.
//! An owning handle is passed into the server explicitly — there is no
//! global state, and tests build a fresh registry per case.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use capone_core::cap::Capability;
use capone_core::crypto;
use capone_core::error::{Error, Result};
use capone_core::keys::SignPublic;

/// A server-side session: parameters bound to a creator identity and the
/// root capability everything presented for this session verifies against.
#[derive(Debug, Clone)]
pub struct Session {
    pub identifier: u32,
    pub creator: SignPublic,
    /// Service-specific, parsed by the plugin.
    pub parameters: Vec<u8>,
    /// The root capability. Never transmitted.
    pub cap: Capability,
    pub created_at: Instant,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<u32, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<u32, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a session. The identifier is drawn at random and redrawn on
    /// collision, so identifiers are unique at any point in time.
    pub fn add(&self, parameters: Vec<u8>, creator: SignPublic) -> Session {
        let mut table = self.table();
        let identifier = loop {
            let candidate = crypto::random_u32();
            if !table.contains_key(&candidate) {
                break candidate;
            }
        };
        let session = Session {
            identifier,
            creator,
            parameters,
            cap: Capability::root(),
            created_at: Instant::now(),
        };
        table.insert(identifier, session.clone());
        session
    }

    pub fn find(&self, identifier: u32) -> Result<Session> {
        self.table()
            .get(&identifier)
            .cloned()
            .ok_or(Error::NotFound)
    }

    /// Remove and return a session. Exactly one of two racing callers wins;
    /// the loser sees NotFound.
    pub fn remove(&self, identifier: u32) -> Result<Session> {
        self.table().remove(&identifier).ok_or(Error::NotFound)
    }

    /// Drop every session. Test scaffolding.
    pub fn clear(&self) {
        self.table().clear();
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }
}
