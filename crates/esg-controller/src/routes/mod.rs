//! HTTP route handlers.
//!
//! - `sys`: health
//! - `specs`: declare, read, list, and delete specs
//! - `secrets`: inspect materialized secrets (metadata and key names only)

pub mod secrets;
pub mod specs;
pub mod sys;
