//! Per-user context handed to every action callback

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a virtual user, unique within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mutable state of one virtual user
///
/// The session value (auth token, cookies, anything the embedding
/// application needs) is owned by exactly one user and is only reachable
/// through the `&mut UserContext` passed to that user's callbacks.
#[derive(Debug)]
pub struct UserContext<S> {
    user_id: UserId,
    profile: String,
    iteration: u64,
    /// Session state owned by this user
    pub session: S,
}

impl<S> UserContext<S> {
    /// Create a context around an initial session value
    pub fn new(user_id: UserId, profile: impl Into<String>, session: S) -> Self {
        Self {
            user_id,
            profile: profile.into(),
            iteration: 0,
            session,
        }
    }

    /// Identifier of the owning user
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Name of the profile the user was spawned from
    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Number of actions started by this user so far
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub(crate) fn advance(&mut self) {
        self.iteration += 1;
    }
}
