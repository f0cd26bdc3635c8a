//! Device channel identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A logical device category ("Face", "Cart", ...).
///
/// Each channel is served by its own listening socket and routed to its own
/// processor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(String);

impl Channel {
    /// Channel of the face recognition cameras.
    pub const FACE: &'static str = "Face";
    /// Channel of the cart cameras.
    pub const CART: &'static str = "Cart";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn face() -> Self {
        Self::new(Self::FACE)
    }

    pub fn cart() -> Self {
        Self::new(Self::CART)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Channel {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Channel {
    fn from(name: String) -> Self {
        Self(name)
    }
}
