//! crates/storyweaver_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use crate::domain::{
    ChildProfile, CompletionEvent, GeneratedStory, GeneratedTitle, NewProfile, NewStory, Story,
    StoryPatch, StoryPrompt, StoryShare, StoryStatus, User, UserCredentials,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::pin::Pin;
use uuid::Uuid;

//=========================================================================================
// Port Error and Result Types
//=========================================================================================

/// The closed error taxonomy for all port operations.
///
/// Every raw error from an external service (database, provider, network) is
/// normalized into one of these variants at the adapter boundary, so downstream
/// logic switches on a finite enum rather than matching message substrings.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// Rejected before any network or database call.
    #[error("Invalid request: {0}")]
    Validation(String),
    /// Missing or invalid credential; never retried.
    #[error("Authentication failed: {0}")]
    Auth(String),
    /// Provider rate limit (429-class); retryable with backoff.
    #[error("Provider rate limit hit")]
    RateLimited,
    /// Transient provider or network failure (5xx-class); retryable.
    #[error("Transient provider error: {0}")]
    Transient(String),
    /// Optimistic-concurrency version mismatch; caller may re-read and retry.
    #[error("Version conflict: expected {expected}, found {found}")]
    Conflict { expected: i64, found: i64 },
    /// The requested status change is illegal for the record's current state.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: StoryStatus, to: StoryStatus },
    /// No response within the allowed window; treated as "unknown", not failure.
    #[error("Timed out waiting for a response")]
    Timeout,
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl PortError {
    /// Whether the generation retry loop may attempt the call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Transient(_))
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Auth Methods ---
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<User>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;

    // --- Profile Management ---
    async fn create_profile(&self, profile: NewProfile) -> PortResult<ChildProfile>;

    async fn get_profile_by_id(&self, profile_id: Uuid) -> PortResult<ChildProfile>;

    async fn get_profiles_by_user(&self, user_id: Uuid) -> PortResult<Vec<ChildProfile>>;

    async fn update_profile(&self, profile_id: Uuid, profile: NewProfile) -> PortResult<ChildProfile>;

    /// Profiles are referenced by stories' `children_ids` but never
    /// cascade-deleted with them.
    async fn delete_profile(&self, profile_id: Uuid) -> PortResult<()>;

    async fn add_profile_photo(
        &self,
        profile_id: Uuid,
        url: &str,
        storage_path: &str,
    ) -> PortResult<ChildProfile>;

    // --- Story Lifecycle ---

    /// Inserts a new story with `status = pending` and `version = 1`.
    async fn create_story(&self, story: NewStory) -> PortResult<Story>;

    async fn get_story_by_id(&self, story_id: Uuid) -> PortResult<Story>;

    async fn get_stories_by_user(&self, user_id: Uuid) -> PortResult<Vec<Story>>;

    /// Applies `patch` through a single conditional write.
    ///
    /// Fails with `Conflict` if the stored version no longer equals
    /// `expected_version` (at most one writer wins per logical update), with
    /// `NotFound` if the id does not exist, and with `InvalidTransition` if the
    /// patch requests an illegal status change. On success the version is
    /// incremented and the update time stamped.
    async fn transition_story(
        &self,
        story_id: Uuid,
        expected_version: i64,
        patch: StoryPatch,
    ) -> PortResult<Story>;

    async fn delete_story(&self, story_id: Uuid) -> PortResult<()>;

    /// Stories still `pending` whose `created_at` is strictly older than
    /// `cutoff`; the recovery sweeper's zombie scan.
    async fn get_stale_pending_stories(&self, cutoff: DateTime<Utc>) -> PortResult<Vec<Story>>;

    // --- Sharing ---
    async fn create_story_share(
        &self,
        story_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> PortResult<StoryShare>;

    /// Resolves a share token to its story, honoring expiry.
    async fn get_story_by_share_token(&self, token: &str) -> PortResult<Story>;
}

#[async_trait]
pub trait StoryGenerationService: Send + Sync {
    /// Issues one completion call for the given prompt. No retry here; the
    /// pipeline's retry client owns that policy.
    async fn generate_story(&self, prompt: &StoryPrompt) -> PortResult<GeneratedStory>;
}

#[async_trait]
pub trait TitleGenerationService: Send + Sync {
    /// Produces a handful of candidate titles for the given prompt inputs.
    async fn generate_titles(&self, prompt: &StoryPrompt) -> PortResult<Vec<GeneratedTitle>>;
}

/// A pinned, boxed stream of completion events for one user's channel.
pub type CompletionStream = Pin<Box<dyn Stream<Item = CompletionEvent> + Send>>;

#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    /// Publishes one event for a terminal transition. Delivery is best-effort:
    /// a user with no live subscribers drops the event silently.
    async fn publish(&self, event: CompletionEvent) -> PortResult<()>;

    /// Subscribes to the per-user channel. The subscription ends when the
    /// returned stream is dropped.
    async fn subscribe(&self, user_id: Uuid) -> PortResult<CompletionStream>;
}
