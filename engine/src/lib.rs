//! ContentForge Core Library
//!
//! Media generation orchestration engine. Turns a single prompt into
//! provider-specific wire calls, drives long-running provider jobs to a
//! terminal state, and composes article, image and video generation into
//! one content bundle.
//!
//! Presentation concerns (dashboards, progress views, credential forms)
//! live outside this crate and talk to it only through
//! [`core::generative::ProviderDispatcher::dispatch`] and
//! [`core::pipeline::ContentGenerationPipeline::generate`].

pub mod core;
