//! Client identity resolution.
//!
//! Every entry point derives the requester's identity through [`resolve`]:
//! explicit identity header first, then the session cookie, then the shared
//! anonymous identity. Two physical clients that present the same token are
//! the same logical ticket holder.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Identity used when a request carries neither a header nor a cookie.
pub const ANONYMOUS: &str = "A0";

/// Header carrying an explicit client identity.
pub const IDENTITY_HEADER: &str = "x-client-id";

/// Cookie carrying a session-scoped client identity.
pub const SESSION_COOKIE: &str = "session_id";

/// Opaque token naming a ticket holder.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn anonymous() -> Self {
        Self(ANONYMOUS.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_anonymous(&self) -> bool {
        self.0 == ANONYMOUS
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientIdentity {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for ClientIdentity {
    fn from(token: String) -> Self {
        Self(token)
    }
}

/// Picks the identity for a request: a non-empty explicit header wins, then a
/// non-empty session cookie, then [`ANONYMOUS`].
pub fn resolve(explicit_header: Option<&str>, session_cookie: Option<&str>) -> ClientIdentity {
    explicit_header
        .filter(|token| !token.is_empty())
        .or_else(|| session_cookie.filter(|token| !token.is_empty()))
        .map_or_else(ClientIdentity::anonymous, ClientIdentity::new)
}
