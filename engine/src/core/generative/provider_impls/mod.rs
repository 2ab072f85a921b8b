//! Provider Implementations
//!
//! Concrete adapters for the image services in the default registry, plus
//! the Gemini article writer and the Veo video studio used by the pipeline.

pub mod gemini_text;
pub mod ideogram;
pub mod openai;
pub mod replicate;
pub mod stability;
pub mod veo;

pub use gemini_text::GeminiArticleWriter;
pub use ideogram::IdeogramProvider;
pub use openai::OpenAiProvider;
pub use replicate::ReplicateProvider;
pub use stability::StabilityProvider;
pub use veo::VeoStudio;
