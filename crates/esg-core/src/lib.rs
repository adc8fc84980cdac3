//! Core library for the secrets generator.
//!
//! Turns a declarative [`spec::SecretSynthesis`] into concrete secret data and
//! materializes it exactly once:
//!
//! - [`random`] draws alphabet-uniform values from the OS CSPRNG
//! - [`hash`] produces self-describing PBKDF2 digests
//! - [`generator`] evaluates one generator declaration into named outputs
//! - [`template`] substitutes `{{ name }}` placeholders into target keys
//! - [`controller`] runs one reconciliation pass against the store
//!
//! [`store`] is the storage-backed stand-in for the resource API the
//! controller talks to. This crate depends on `esg-storage` for the key-value
//! backend trait and knows nothing about HTTP or work queues.

pub mod controller;
pub mod error;
pub mod generator;
pub mod hash;
pub mod random;
pub mod secret;
pub mod spec;
pub mod store;
pub mod template;
