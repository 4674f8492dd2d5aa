//! mirrorkeep core - rule model, configuration and ports
//!
//! This crate contains:
//! - **Rule model** - `IncludeRule`, `Configuration`, the shared traversal,
//!   exclude validation and drive activation
//! - **Configuration file** - JSON schema, template bootstrapping, settings
//! - **Port definitions** - `Notifier`, `VolumeMonitor`, `AutostartRegistrar`
//!
//! Nothing here spawns threads or subscribes to OS events; those live in
//! `mirrorkeep-sync`.

pub mod config;
pub mod domain;
pub mod ports;
