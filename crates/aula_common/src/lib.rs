//! Aula Common - Shared types for the Aula classroom assistant.
//!
//! Configuration, the error taxonomy, the LLM client abstraction, session
//! memory, and the HTTP wire types used by both the daemon and the CLI.

pub mod config;
pub mod error;
pub mod llm;
pub mod session;
pub mod wire;

pub use config::*;
pub use error::*;
pub use llm::*;
pub use session::*;
pub use wire::*;
