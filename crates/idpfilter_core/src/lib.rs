//! Attribute Filter Core Types
//!
//! This crate contains pure types and logic with no I/O: identity
//! attributes, three-valued decisions, component identity and lifecycle,
//! and the core error type.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attribute;
pub mod error;
pub mod id;
pub mod lifecycle;
pub mod tristate;

// Re-exports
pub use attribute::{AttributeEncoding, AttributeValue, EmptyKind, EncodingProtocol, IdpAttribute};
pub use error::{CoreError, CoreResult};
pub use id::{ComponentId, trim_or_none};
pub use lifecycle::{ComponentState, Lifecycle};
pub use tristate::Tristate;
