//! Media Generation
//!
//! Request shaping and dispatch for external image providers.
//! One internal request shape is adapted into each provider's wire format,
//! and every outcome comes back as a uniform [`GenerationResult`].

pub mod dispatcher;
pub mod provider_impls;
pub mod providers;
pub mod request;
pub mod result;

// Re-export main types
pub use dispatcher::{DispatcherImageSource, ProviderDispatcher};
pub use providers::{
    CallContext, ImageProvider, PreparedImage, ProviderRegistry, ProviderReply,
};
pub use request::{GenerationMode, GenerationRequest};
pub use result::{Asset, GenerationResult, ResultMetadata};
