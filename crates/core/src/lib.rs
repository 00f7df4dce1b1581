//! Notificator core
//!
//! Shared foundations for the collaboration backend: the error taxonomy,
//! the byte-exact alert fingerprint, and the domain types that every other
//! crate speaks.

pub mod error;
pub mod fingerprint;
pub mod types;

pub use error::{Error, Result};
pub use fingerprint::alert_fingerprint;
pub use types::{
    Acknowledgment, AlertUpdate, Comment, Session, UpdateKind, User, UserCredentials,
};
