//! # Registry
//!
//! The two read-only lookup structures every validation consults:
//!
//! - [`RoleRegistry`]: which role may issue / consume which mandate kind.
//! - [`KeyDirectory`]: which public key and role stand behind a signer
//!   identity.
//!
//! Both are built once at startup from [`ProtocolConfig`](crate::config::ProtocolConfig)
//! and never mutated afterwards.

pub mod keys;
pub mod roles;

pub use keys::{KeyDirectory, KeyEntry};
pub use roles::{RegistryError, Role, RoleRegistry};
