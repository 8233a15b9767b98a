//! # Frontend & Client Identity
//!
//! A frontend is a logical client (e.g. "the datastore frontend on member-1"). Every
//! time the frontend actor restarts it recovers its last [`ClientIdentifier`] and
//! persists the next generation before it accepts any command. Backends use the
//! generation to fence off stale incarnations.

use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Identifies a logical frontend across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrontendIdentifier {
    pub member_name: String,
    pub client_type: String,
}

impl FrontendIdentifier {
    pub fn new(member_name: impl Into<String>, client_type: impl Into<String>) -> Self {
        Self {
            member_name: member_name.into(),
            client_type: client_type.into(),
        }
    }
}

impl Display for FrontendIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-frontend-{}", self.member_name, self.client_type)
    }
}

/// One incarnation of a frontend.
///
/// Immutable once created. The generation strictly increases across restarts of the
/// same frontend, which is what lets a backend tell a retired incarnation apart from
/// the current one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientIdentifier {
    pub frontend: FrontendIdentifier,
    pub generation: u64,
}

impl ClientIdentifier {
    /// The identifier used when nothing has been persisted yet.
    pub fn first(frontend: FrontendIdentifier) -> Self {
        Self {
            frontend,
            generation: 0,
        }
    }

    /// The identifier of the next incarnation of the same frontend, if the generation
    /// counter has room for one.
    pub fn next(&self) -> Option<Self> {
        Some(Self {
            frontend: self.frontend.clone(),
            generation: self.generation.checked_add(1)?,
        })
    }
}

impl Display for ClientIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.frontend, self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_keeps_frontend_and_bumps_generation() {
        let first = ClientIdentifier::first(FrontendIdentifier::new("member-1", "datastore"));
        let second = first.next().unwrap();

        assert_eq!(first.generation, 0);
        assert_eq!(second.generation, 1);
        assert_eq!(second.frontend, first.frontend);
        assert_eq!(second.to_string(), "member-1-frontend-datastore-1");
    }

    #[test]
    fn next_refuses_to_overflow() {
        let last = ClientIdentifier {
            frontend: FrontendIdentifier::new("member-1", "datastore"),
            generation: u64::MAX,
        };

        assert_eq!(last.next(), None);
    }
}
