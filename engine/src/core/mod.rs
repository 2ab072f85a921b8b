//! ContentForge Core Engine
//!
//! Credential resolution, binary adaptation, provider dispatch, job
//! polling and the content generation pipeline.

pub mod binary;
pub mod credentials;
pub mod generative;
pub mod http;
pub mod pipeline;
pub mod polling;
pub mod settings;

// Re-export common types
mod types;
pub use types::*;

mod error;
pub use error::*;
