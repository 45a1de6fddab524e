//! Voter bookkeeping and cross-server roster agreement.
//!
//! Every server tracks the voters connected to it in a [`VoterRegistry`].
//! When the voting window closes, servers exchange the identities they saw
//! and run [`compare`] against each peer's list.  Only a roster that every
//! server agrees on may be summed.

use crate::field::Field;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// Opaque identifier of one accepted connection.
pub type ConnId = u64;

/// A registered voter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voter {
    /// Identity announced in the join message.
    pub identity: String,
    /// Share received for this server, if any.
    pub share: Option<u64>,
}

/// Errors raised by registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Join messages must carry a non-empty identity.
    #[error("voter identity is empty")]
    EmptyIdentity,
    /// Another live connection already uses this identity.
    #[error("voter identity {0:?} is already registered")]
    DuplicateIdentity(String),
    /// A share arrived on a connection that never joined.
    #[error("connection {0} has not joined")]
    UnknownVoter(ConnId),
    /// A second join on a connection that already joined.
    #[error("connection {0} has already joined")]
    AlreadyJoined(ConnId),
    /// The voting window is over.
    #[error("voting window is closed")]
    Closed,
}

/// Per-server table of connected voters keyed by connection.
#[derive(Debug, Default)]
pub struct VoterRegistry {
    voters: HashMap<ConnId, Voter>,
    closed: bool,
}

impl VoterRegistry {
    /// Creates an empty, open registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the voter behind `conn`.
    pub fn join(&mut self, conn: ConnId, identity: &str) -> Result<(), RegistryError> {
        if self.closed {
            return Err(RegistryError::Closed);
        }
        if identity.is_empty() {
            return Err(RegistryError::EmptyIdentity);
        }
        if self.voters.contains_key(&conn) {
            return Err(RegistryError::AlreadyJoined(conn));
        }
        if self.voters.values().any(|v| v.identity == identity) {
            return Err(RegistryError::DuplicateIdentity(identity.to_string()));
        }
        self.voters.insert(
            conn,
            Voter {
                identity: identity.to_string(),
                share: None,
            },
        );
        Ok(())
    }

    /// Stores (or overwrites) the share sent by `conn`.
    pub fn submit(&mut self, conn: ConnId, share: u64) -> Result<(), RegistryError> {
        if self.closed {
            return Err(RegistryError::Closed);
        }
        let voter = self
            .voters
            .get_mut(&conn)
            .ok_or(RegistryError::UnknownVoter(conn))?;
        voter.share = Some(share);
        Ok(())
    }

    /// Forgets a voter whose connection went away before the window closed.
    ///
    /// After closing, the roster is frozen and disconnects do not change it.
    pub fn remove(&mut self, conn: ConnId) -> Option<Voter> {
        if self.closed {
            return None;
        }
        self.voters.remove(&conn)
    }

    /// Seals the registry at the end of the voting window.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Returns true once the window has closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of registered voters, with or without a share.
    pub fn len(&self) -> usize {
        self.voters.len()
    }

    /// Returns true if nobody has joined.
    pub fn is_empty(&self) -> bool {
        self.voters.is_empty()
    }

    /// Identities of registered voters that have cast a share.
    pub fn current_voter_set(&self) -> BTreeSet<String> {
        self.voters
            .values()
            .filter(|v| v.share.is_some())
            .map(|v| v.identity.clone())
            .collect()
    }

    /// Field-sum of the shares held for the voters in `intersection`.
    pub fn partial_sum(&self, field: &Field, intersection: &BTreeSet<String>) -> u64 {
        field.sum(
            self.voters
                .values()
                .filter(|v| intersection.contains(&v.identity))
                .filter_map(|v| v.share),
        )
    }

    /// Connection ids of every registered voter.
    pub fn connections(&self) -> impl Iterator<Item = ConnId> + '_ {
        self.voters.keys().copied()
    }
}

/// Result of comparing the local roster with one peer's roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterComparison {
    /// Identities present in both rosters.
    pub common: BTreeSet<String>,
    /// True when both rosters hold exactly the same identities.
    pub agrees: bool,
}

/// Compares the local roster with a list reported by a peer.
///
/// The rosters agree only if they have the same size and the same members.
/// A peer list that repeats an identity counts as disagreement.
pub fn compare(local: &BTreeSet<String>, peer_list: &[String]) -> RosterComparison {
    let peer: BTreeSet<String> = peer_list.iter().cloned().collect();
    let common: BTreeSet<String> = local.intersection(&peer).cloned().collect();
    let agrees = peer.len() == peer_list.len()
        && local.len() == peer_list.len()
        && common.len() == local.len();
    RosterComparison { common, agrees }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn list(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn registry_tracks_joins_and_shares() {
        let mut reg = VoterRegistry::new();
        reg.join(1, "alice").unwrap();
        reg.join(2, "bob").unwrap();
        reg.join(3, "carol").unwrap();
        reg.submit(1, 10).unwrap();
        reg.submit(2, 20).unwrap();
        reg.submit(2, 21).unwrap();
        assert_eq!(reg.len(), 3);
        // carol joined but never voted
        assert_eq!(reg.current_voter_set(), set(&["alice", "bob"]));
        let field = Field::new(23).unwrap();
        assert_eq!(reg.partial_sum(&field, &set(&["alice", "bob"])), 8);
        assert_eq!(reg.partial_sum(&field, &set(&["alice"])), 10);
    }

    #[test]
    fn unknown_and_duplicate_voters_are_rejected() {
        let mut reg = VoterRegistry::new();
        assert_eq!(reg.submit(9, 1), Err(RegistryError::UnknownVoter(9)));
        reg.join(1, "alice").unwrap();
        assert_eq!(
            reg.join(2, "alice"),
            Err(RegistryError::DuplicateIdentity("alice".into()))
        );
        assert_eq!(reg.join(1, "alias"), Err(RegistryError::AlreadyJoined(1)));
        assert_eq!(reg.join(3, ""), Err(RegistryError::EmptyIdentity));
    }

    #[test]
    fn closing_freezes_the_roster() {
        let mut reg = VoterRegistry::new();
        reg.join(1, "alice").unwrap();
        reg.submit(1, 4).unwrap();
        reg.join(2, "bob").unwrap();
        reg.submit(2, 5).unwrap();
        assert!(reg.remove(2).is_some());
        reg.close();
        assert_eq!(reg.join(3, "carol"), Err(RegistryError::Closed));
        assert_eq!(reg.submit(1, 7), Err(RegistryError::Closed));
        assert!(reg.remove(1).is_none());
        assert_eq!(reg.current_voter_set(), set(&["alice"]));
    }

    #[test]
    fn identical_rosters_agree() {
        let local = set(&["a", "b", "c"]);
        let cmp = compare(&local, &list(&["c", "a", "b"]));
        assert!(cmp.agrees);
        assert_eq!(cmp.common, local);
    }

    #[test]
    fn missing_extra_or_repeated_entries_disagree() {
        let local = set(&["a", "b", "c"]);
        let short = compare(&local, &list(&["a", "b"]));
        assert!(!short.agrees);
        assert_eq!(short.common, set(&["a", "b"]));

        let padded = compare(&local, &list(&["a", "b", "c", "Bogus0"]));
        assert!(!padded.agrees);
        assert_eq!(padded.common, local);

        assert!(!compare(&local, &list(&["a", "b", "x"])).agrees);
        assert!(!compare(&local, &list(&["a", "a", "b", "c"])).agrees);
        assert!(!compare(&local, &[]).agrees);
        assert!(compare(&BTreeSet::new(), &[]).agrees);
    }
}
