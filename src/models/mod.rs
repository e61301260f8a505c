//! Core data models for mudprod
//!
//! The value types shared by the session engine, the daemon and the
//! control protocol: what a session connects to, how it logs in, how it
//! recognises a prompt, and what a completed read cycle looks like.

pub mod response;
pub mod session_config;

// Re-exports for convenience
pub use response::Response;
pub use session_config::{
    ConnectionState, CustomPromptFn, LoginConfig, LoginStep, PromptConfig, SessionConfig,
};
