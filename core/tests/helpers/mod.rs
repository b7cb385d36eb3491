//! Test helper modules for integration tests

#![allow(dead_code, clippy::unwrap_used, clippy::panic)]

pub mod harness;
pub mod mocks;

pub use harness::*;
pub use mocks::*;
