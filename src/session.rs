//! Identity boundary
//!
//! Authentication belongs to the embedding application; the grading
//! pipeline only consumes an opaque identity. The cookie parser here is a
//! pure function of the request headers with no shared session state, and
//! the resolver trait is the seam the application implements.
//! `MemorySessions` is the plain key-value implementation the example
//! server uses.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Opaque external identity. The pipeline never creates or mutates one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: String,
    pub username: String,
}

/// Extract a session value from a `Cookie` header, given the cookie name.
/// Pure: same headers in, same value out.
pub fn session_value_from_cookies(cookie_name: &str, cookie_header: Option<&str>) -> Option<String> {
    let header = cookie_header?;
    for pair in header.split(';') {
        let Some((name, value)) = pair.trim().split_once('=') else {
            continue;
        };
        if name == cookie_name && !value.is_empty() {
            return Some(value.to_string());
        }
    }
    None
}

/// Resolves a session value to an identity, or to "no identity".
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, session_value: &str) -> anyhow::Result<Option<UserIdentity>>;
}

/// In-memory session map for the example server: session value to
/// identity, nothing persisted.
#[derive(Default)]
pub struct MemorySessions {
    sessions: RwLock<HashMap<String, UserIdentity>>,
}

impl MemorySessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session for the identity and return its value.
    pub async fn create(&self, user: UserIdentity) -> String {
        let value = Uuid::new_v4().simple().to_string();
        self.sessions.write().await.insert(value.clone(), user);
        value
    }

    pub async fn destroy(&self, session_value: &str) {
        self.sessions.write().await.remove(session_value);
    }
}

#[async_trait]
impl IdentityResolver for MemorySessions {
    async fn resolve(&self, session_value: &str) -> anyhow::Result<Option<UserIdentity>> {
        Ok(self.sessions.read().await.get(session_value).cloned())
    }
}
