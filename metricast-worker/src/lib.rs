//! Metricast worker library.
//!
//! This library exposes internal modules for integration testing.
//! In production, `metricast-worker` is used as a binary (main.rs).

pub mod bus;
pub mod cache;
pub mod worker;
