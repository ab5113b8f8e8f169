//! Token model and credential persistence
//!
//! Leaf crate of the auth session workspace: the immutable `Token` snapshot,
//! its persisted `TokenRecord` form, and the `CredentialStore` seam with a
//! file-backed and an in-memory implementation. This crate has no knowledge
//! of sessions or transports — it can be tested and used independently.
//!
//! Credential flow:
//! 1. Session construction calls `CredentialStore::load()` and rehydrates a
//!    `Token` when the cached record is still usable
//! 2. A successful authorization produces a new `Token`, persisted via
//!    `CredentialStore::save()` before installation
//! 3. Background refresh folds a payload in with `Token::for_refresh()`
//! 4. Logout calls `CredentialStore::clear()`

pub mod error;
pub mod store;
pub mod token;

pub use error::{Error, Result};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use token::{Token, TokenRecord, TokenSource, now_millis};
