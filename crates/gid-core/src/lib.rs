//! Core types and services for G_ID allocation and identity reconciliation.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! Storage backends implement [`store::IdentityStore`] and
//! [`audit::AuditSink`]; the [`allocator::Allocator`] and
//! [`reconcile::Reconciler`] services drive them.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod allocator;
pub mod audit;
pub mod error;
pub mod gid;
pub mod identity;
pub mod integrity;
pub mod matcher;
pub mod plan;
pub mod policy;
pub mod reconcile;
pub mod store;

pub use error::{Error, Result};
