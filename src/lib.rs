//! Lodestar - namespace-scoped permissions engine
//!
//! Policies live in an etcd-backed config store, are cached per
//! namespace and resource type, and are evaluated per request with
//! relation checks delegated to an OpenFGA-compatible store.

pub mod engine;
pub mod errors;
pub mod models;
pub mod oracle;
pub mod rules;
pub mod settings;
pub mod store;
pub mod web;
