//! services/api/src/web/state.rs
//!
//! Defines the application's shared state, built once at startup.

use crate::config::Config;
use crate::pipeline::StoryService;
use std::sync::Arc;
use storyweaver_core::ports::{DatabaseService, TitleGenerationService};

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub config: Arc<Config>,
    /// The orchestration service every story handler goes through.
    pub stories: Arc<StoryService>,
    pub title_adapter: Arc<dyn TitleGenerationService>,
}
