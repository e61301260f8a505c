//! Test Utilities and Mocks
//!
//! Shared helpers for the integration tests: a scripted MUD server and
//! ready-made configurations.

#![allow(dead_code)]

pub mod fixtures;
pub mod mock_mud;

// Re-exports for convenience
pub use fixtures::{create_test_config, create_test_session, create_test_settings, TestDaemon};
pub use mock_mud::{MockMud, MudReply};
