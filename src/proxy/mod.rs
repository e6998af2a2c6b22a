//! Proxy domain model
//!
//! The [`Proxy`] entity is the only durable record in the system. It is
//! created in memory by the scheduler, mutated by the verifier between
//! deserialization and persistence, and owned by the store once saved.

mod models;

pub use models::{Anonymity, Protocol, Proxy, UnknownAnonymity, UnknownProtocol};
