//! Stowaway Core
//!
//! Error taxonomy shared by the cache library and the CLI. Every failure in a
//! save or restore pipeline is one of these variants, and [`Error::class`]
//! decides whether it reaches the caller or is swallowed.

pub mod error;

pub use error::{Error, FailureClass, Result};
