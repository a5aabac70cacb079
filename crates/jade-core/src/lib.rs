//! Core types and trait definitions for the Jade discharge follow-up engine.
//!
//! This crate is deliberately free of network and database dependencies.
//! It owns the call lifecycle, the dialogue script and its driver, the
//! scoring function, and the [`store::FollowupStore`] abstraction every other
//! crate depends on.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod alert;
pub mod call;
pub mod dialogue;
pub mod error;
pub mod patient;
pub mod scoring;
pub mod store;
pub mod sync;

pub use error::{Error, Result};
