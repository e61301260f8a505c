//! Server output handling
//!
//! Everything that interprets what a game server sends: decoding and
//! normalization, prompt detection, the login script driver and the
//! trigger engine. None of it does I/O.

pub mod login;
pub mod output;
pub mod prompt;
pub mod triggers;

pub use login::{LoginAction, LoginMachine};
pub use output::{normalize, Normalized, TextDecoder};
pub use prompt::{PromptDetector, PromptStrategy};
pub use triggers::{Trigger, TriggerEngine, TriggerInfo, REPEAT_TRIGGER};
