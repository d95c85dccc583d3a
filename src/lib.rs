//! Client identity for the trove marketplace.
//!
//! Handles the OAuth2 callback reconciliation flow end to end:
//! authorization-code exchange (idempotency-guarded), credential
//! persistence, and session resolution across the federated and direct
//! credential sources.

pub mod auth;
pub mod config;
pub mod consts;
