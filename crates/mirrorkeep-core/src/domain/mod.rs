//! Domain model
//!
//! - [`rule`] - Include/exclude rules, their traversal, validation and activation
//! - [`errors`] - Configuration error taxonomy

pub mod errors;
pub mod rule;

pub use errors::ConfigError;
pub use rule::{ActivationChanges, Configuration, ExcludeVerdict, IncludeRule};
