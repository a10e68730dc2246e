//! # Sound Runtime
//!
//! Foundational runtime infrastructure for the EndlessSound cache:
//! - Logging and tracing setup
//! - Cache event bus
//!
//! Other workspace crates depend on this crate for ambient concerns so that
//! logging conventions and event broadcasting stay uniform across the system.

pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
