//! # Configuration
//!
//! Server configuration: profiles, file loading, environment overrides and validation.

pub mod server;
