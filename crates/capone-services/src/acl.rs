//! Access-control lists for the Query and Request commands.
//!
//! An ACL is a set of identities plus an optional wildcard. Connect and
//! Terminate are never consulted here — they are gated purely by
//! capability. ACLs are read-only after startup.

use std::collections::HashSet;

use capone_core::error::Result;
use capone_core::keys::SignPublic;

#[derive(Debug, Default)]
pub struct Acl {
    wildcard: bool,
    keys: HashSet<SignPublic>,
}

impl Acl {
    /// The empty ACL: every identity is denied.
    pub fn deny_all() -> Self {
        Self::default()
    }

    /// Build from config entries — hex public keys, or `"*"` for any.
    pub fn from_entries(entries: &[String]) -> Result<Self> {
        let mut acl = Self::default();
        for entry in entries {
            if entry == "*" {
                acl.wildcard = true;
            } else {
                acl.keys.insert(SignPublic::from_hex(entry)?);
            }
        }
        Ok(acl)
    }

    /// Build from an optional config list; an absent list denies everyone.
    pub fn from_config(entries: Option<&Vec<String>>) -> Result<Self> {
        match entries {
            Some(entries) => Self::from_entries(entries),
            None => Ok(Self::deny_all()),
        }
    }

    pub fn allow(&mut self, key: SignPublic) {
        self.keys.insert(key);
    }

    pub fn allow_all(&mut self) {
        self.wildcard = true;
    }

    pub fn is_allowed(&self, key: &SignPublic) -> bool {
        self.wildcard || self.keys.contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capone_core::keys::SignKeyPair;

    #[test]
    fn default_denies_everyone() {
        let acl = Acl::deny_all();
        assert!(!acl.is_allowed(&SignKeyPair::generate().public));
    }

    #[test]
    fn listed_keys_are_allowed() {
        let alice = SignKeyPair::generate().public;
        let bob = SignKeyPair::generate().public;
        let acl = Acl::from_entries(&[alice.hex()]).unwrap();
        assert!(acl.is_allowed(&alice));
        assert!(!acl.is_allowed(&bob));
    }

    #[test]
    fn wildcard_allows_anyone() {
        let acl = Acl::from_entries(&["*".to_string()]).unwrap();
        assert!(acl.is_allowed(&SignKeyPair::generate().public));
    }

    #[test]
    fn absent_config_list_denies() {
        let acl = Acl::from_config(None).unwrap();
        assert!(!acl.is_allowed(&SignKeyPair::generate().public));
    }

    #[test]
    fn malformed_entries_are_rejected() {
        assert!(Acl::from_entries(&["not-hex".to_string()]).is_err());
    }
}
