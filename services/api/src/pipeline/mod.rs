//! services/api/src/pipeline/mod.rs
//!
//! The orchestration layer between the web handlers and the ports: retrying
//! generation calls, story lifecycle transitions, and zombie recovery.

pub mod generation;
pub mod story_service;
pub mod sweeper;

pub use generation::{GenerationClient, GenerationOutcome, RetryPolicy};
pub use story_service::{LengthTargets, StoryService};
pub use sweeper::RecoverySweeper;
