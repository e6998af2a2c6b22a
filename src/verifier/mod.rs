//! Proxy verification
//!
//! This module provides functionality for:
//! - Probing candidate proxies against an introspection endpoint
//! - Classifying anonymity from observed header leakage
//! - Draining the verification topic under a consumer group

pub mod checker;
pub mod worker;

pub use checker::{Checker, ProbeReport, Prober, VerifyError, DEFAULT_TARGET_URL};
pub use worker::{ProxyWriter, VerifierWorker, DEFAULT_GROUP};
