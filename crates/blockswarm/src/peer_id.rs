//! Identifier of a peer in the tracker.
use std::fmt;

use rand::{distributions::Alphanumeric, Rng};

/// A peer id is chosen by the peer itself and sent to the tracker on
/// `REGISTER`. It travels as a single token of a text line, so it must not
/// contain whitespace.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(pub String);

impl PeerId {
    /// Generate a random alphanumeric id, used when the user doesn't pick one.
    pub fn gen() -> Self {
        let mut rng = rand::thread_rng();
        let id: String =
            (0..12).map(|_| rng.sample(Alphanumeric) as char).collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
