//! Session mode.

use serde::{Deserialize, Serialize};

/// Which backing store is authoritative for the cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Anonymous visitor; the cart lives in local persistent storage.
    #[default]
    Guest,
    /// Logged-in user; the backend cart is authoritative.
    Authenticated,
}

impl SessionMode {
    /// Mode for a session with or without credentials.
    #[must_use]
    pub const fn from_authenticated(is_authenticated: bool) -> Self {
        if is_authenticated {
            Self::Authenticated
        } else {
            Self::Guest
        }
    }

    /// Whether the backend cart is authoritative.
    #[must_use]
    pub const fn is_authenticated(self) -> bool {
        matches!(self, Self::Authenticated)
    }
}
