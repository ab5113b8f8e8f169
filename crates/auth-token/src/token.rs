//! Access token snapshot and its persisted form
//!
//! A `Token` is an immutable snapshot of a credential: value, granted
//! permissions, expiry, provenance, and last-refresh time. State transitions
//! in the session replace the token wholesale; fields are never mutated in
//! place. `TokenRecord` is the serde form written by the credential store.
//!
//! Timestamps are absolute unix milliseconds, computed at construction time
//! from the caller's clock.

use common::Secret;
use serde::{Deserialize, Serialize};

/// Provenance of a token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
    /// No token has been obtained yet (the empty token)
    #[default]
    None,
    /// Obtained through the trusted native companion app
    Sso,
    /// Obtained through an embedded web view login
    Dialog,
    /// Produced by a background refresh of an earlier token
    Refresh,
}

impl TokenSource {
    /// Whether the token came from the native single-sign-on path.
    /// Only SSO tokens are eligible for background extension.
    pub fn is_sso(self) -> bool {
        matches!(self, TokenSource::Sso)
    }
}

/// Immutable credential snapshot.
///
/// A token whose value is the empty string is the canonical "empty" token
/// and is invalid for use (`is_invalid`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    value: Secret,
    permissions: Vec<String>,
    expires_at: u64,
    last_refreshed_at: u64,
    source: TokenSource,
}

impl Token {
    /// The empty token: no value, no expiry, provenance `None`.
    ///
    /// Sessions hold this before their first successful authorization; the
    /// permission list carries the permissions that will be requested.
    pub fn empty(permissions: Vec<String>) -> Self {
        Self {
            value: Secret::new(""),
            permissions,
            expires_at: 0,
            last_refreshed_at: 0,
            source: TokenSource::None,
        }
    }

    /// Build a token from a completed authorization.
    ///
    /// `last_refreshed_at` is set to `now` — a freshly granted token counts
    /// as just refreshed for extension scheduling.
    pub fn from_authorization(
        value: impl Into<String>,
        permissions: Vec<String>,
        expires_at: u64,
        source: TokenSource,
        now: u64,
    ) -> Self {
        Self {
            value: Secret::new(value),
            permissions,
            expires_at,
            last_refreshed_at: now,
            source,
        }
    }

    /// Fold a refresh payload into this token.
    ///
    /// Value and expiry are replaced; permissions are replaced only when the
    /// refresh handshake reported them. Provenance becomes `Refresh` and the
    /// last-refresh time advances to `now`.
    pub fn for_refresh(
        &self,
        value: impl Into<String>,
        expires_at: u64,
        permissions: Option<Vec<String>>,
        now: u64,
    ) -> Self {
        Self {
            value: Secret::new(value),
            permissions: permissions.unwrap_or_else(|| self.permissions.clone()),
            expires_at,
            last_refreshed_at: now,
            source: TokenSource::Refresh,
        }
    }

    /// Rehydrate a token from its persisted record.
    pub fn from_record(record: TokenRecord) -> Self {
        Self {
            value: Secret::new(record.value),
            permissions: record.permissions,
            expires_at: record.expires_at,
            last_refreshed_at: record.last_refreshed_at,
            source: record.source,
        }
    }

    /// Persisted form of this token.
    pub fn to_record(&self) -> TokenRecord {
        TokenRecord {
            value: self.value.expose().to_owned(),
            permissions: self.permissions.clone(),
            expires_at: self.expires_at,
            last_refreshed_at: self.last_refreshed_at,
            source: self.source,
        }
    }

    /// An empty-valued token is invalid for use.
    pub fn is_invalid(&self) -> bool {
        self.value.is_empty()
    }

    /// Whether the token is expired at the given time (unix millis).
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at <= now
    }

    /// Whether this token grants every permission in `requested`.
    pub fn grants_all(&self, requested: &[String]) -> bool {
        requested.iter().all(|p| self.permissions.contains(p))
    }

    pub fn value(&self) -> &str {
        self.value.expose()
    }

    pub fn permissions(&self) -> &[String] {
        &self.permissions
    }

    /// Expiration as unix timestamp in milliseconds.
    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    /// Last refresh (or grant) time as unix timestamp in milliseconds.
    pub fn last_refreshed_at(&self) -> u64 {
        self.last_refreshed_at
    }

    pub fn source(&self) -> TokenSource {
        self.source
    }
}

/// Persisted credential record.
///
/// `expires_at` and `last_refreshed_at` are absolute unix millisecond
/// timestamps, computed at storage time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub value: String,
    pub permissions: Vec<String>,
    pub expires_at: u64,
    pub last_refreshed_at: u64,
    pub source: TokenSource,
}

/// Current time as unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
