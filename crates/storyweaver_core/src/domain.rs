//! crates/storyweaver_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use crate::ports::{PortError, PortResult};
use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// Story Status Machine
//=========================================================================================

/// The lifecycle status of a story record.
///
/// `Completed`, `Read` and `Error` are terminal: no automatic process may move a
/// story out of them. Regeneration of a terminal story must pass through
/// `Regenerating` explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoryStatus {
    /// Created, waiting for the generation pipeline to finish.
    Pending,
    /// Generation finished, full text available.
    Completed,
    /// Marked as read by the owning user.
    Read,
    /// Generation failed; the story's `error` field holds the message.
    Error,
    /// A terminal story is being regenerated (sequel/regeneration path).
    Regenerating,
}

impl StoryStatus {
    /// Returns true for statuses from which no automatic transition occurs.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Read | Self::Error)
    }

    /// Whether a direct transition from `self` to `next` is legal.
    ///
    /// `Pending -> Pending` is allowed so a zombie recovery can re-stamp the
    /// record (bumping its version) before re-running generation.
    pub fn can_transition_to(self, next: StoryStatus) -> bool {
        use StoryStatus::*;
        matches!(
            (self, next),
            (Pending, Pending)
                | (Pending, Completed)
                | (Pending, Error)
                | (Completed, Read)
                | (Completed, Regenerating)
                | (Read, Regenerating)
                | (Error, Pending)
                | (Error, Regenerating)
                | (Regenerating, Completed)
                | (Regenerating, Error)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Read => "read",
            Self::Error => "error",
            Self::Regenerating => "regenerating",
        }
    }
}

impl fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoryStatus {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            // "ready" is the legacy spelling used by the regeneration path.
            "completed" | "ready" => Ok(Self::Completed),
            "read" => Ok(Self::Read),
            "error" => Ok(Self::Error),
            "regenerating" => Ok(Self::Regenerating),
            other => Err(PortError::Unexpected(format!(
                "unknown story status '{other}'"
            ))),
        }
    }
}

//=========================================================================================
// Objective
//=========================================================================================

/// The enumerated purpose of a story, driving the prompt content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    Sleep,
    Focus,
    Relax,
    Fun,
}

impl Objective {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sleep => "sleep",
            Self::Focus => "focus",
            Self::Relax => "relax",
            Self::Fun => "fun",
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Objective {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sleep" => Ok(Self::Sleep),
            "focus" => Ok(Self::Focus),
            "relax" => Ok(Self::Relax),
            "fun" => Ok(Self::Fun),
            "" => Err(PortError::Validation("objective must not be empty".into())),
            other => Err(PortError::Validation(format!(
                "unknown objective '{other}' (expected sleep, focus, relax or fun)"
            ))),
        }
    }
}

//=========================================================================================
// Story
//=========================================================================================

/// The central persisted entity: one generated (or in-flight) story.
#[derive(Debug, Clone)]
pub struct Story {
    pub id: Uuid,
    pub author_id: Uuid,
    pub title: String,
    /// Full generated text; empty while `status` is `Pending`.
    pub story_text: String,
    /// First ~200 characters of the text, for list views.
    pub preview: String,
    pub objective: Objective,
    pub children_names: Vec<String>,
    pub children_ids: Vec<Uuid>,
    pub status: StoryStatus,
    /// Human-readable failure message; `Some` exactly when `status` is `Error`.
    pub error: Option<String>,
    pub word_count: i32,
    pub is_favorite: bool,
    /// Series linkage for sequels ("tomes").
    pub series_id: Option<Uuid>,
    pub tome_number: Option<i32>,
    pub next_story_id: Option<Uuid>,
    pub sound_id: Option<Uuid>,
    /// Monotonically increasing optimistic-concurrency counter, starting at 1.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Story {
    /// Applies `patch` to a copy of this story, enforcing the status machine and
    /// the error-field invariant, and bumping the version.
    ///
    /// This is the single place where transition legality is decided; both the
    /// Postgres store and in-memory test doubles go through it.
    pub fn apply_patch(&self, patch: &StoryPatch, now: DateTime<Utc>) -> PortResult<Story> {
        let mut next = self.clone();

        if let Some(status) = patch.status {
            if !self.status.can_transition_to(status) {
                return Err(PortError::InvalidTransition {
                    from: self.status,
                    to: status,
                });
            }
            next.status = status;
        }

        if let Some(title) = &patch.title {
            next.title = title.clone();
        }
        if let Some(text) = &patch.story_text {
            next.story_text = text.clone();
        }
        if let Some(preview) = &patch.preview {
            next.preview = preview.clone();
        }
        if let Some(count) = patch.word_count {
            next.word_count = count;
        }
        if let Some(error) = &patch.error {
            next.error = error.clone();
        }
        if let Some(favorite) = patch.is_favorite {
            next.is_favorite = favorite;
        }
        if let Some(link) = patch.next_story_id {
            next.next_story_id = link;
        }
        if let Some(sound) = patch.sound_id {
            next.sound_id = sound;
        }

        // The error message only survives in the Error state.
        if next.status != StoryStatus::Error {
            next.error = None;
        } else if next.error.is_none() {
            next.error = Some("story generation failed".to_string());
        }

        next.version = self.version + 1;
        next.updated_at = now;
        Ok(next)
    }
}

/// Fields for inserting a new story; the store fills in id, version, timestamps
/// and the `Pending` status.
#[derive(Debug, Clone)]
pub struct NewStory {
    pub author_id: Uuid,
    pub title: String,
    pub objective: Objective,
    pub children_names: Vec<String>,
    pub children_ids: Vec<Uuid>,
    pub series_id: Option<Uuid>,
    pub tome_number: Option<i32>,
}

/// A partial update applied through the version-checked transition.
///
/// Double-`Option` fields distinguish "leave unchanged" (`None`) from
/// "set to null" (`Some(None)`).
#[derive(Debug, Clone, Default)]
pub struct StoryPatch {
    pub status: Option<StoryStatus>,
    pub title: Option<String>,
    pub story_text: Option<String>,
    pub preview: Option<String>,
    pub word_count: Option<i32>,
    pub error: Option<Option<String>>,
    pub is_favorite: Option<bool>,
    pub next_story_id: Option<Option<Uuid>>,
    pub sound_id: Option<Option<Uuid>>,
}

//=========================================================================================
// Profiles
//=========================================================================================

/// The kind of character a profile describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileCategory {
    Child,
    Adult,
    Pet,
}

impl ProfileCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Child => "child",
            Self::Adult => "adult",
            Self::Pet => "pet",
        }
    }
}

impl FromStr for ProfileCategory {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "child" => Ok(Self::Child),
            "adult" => Ok(Self::Adult),
            "pet" => Ok(Self::Pet),
            other => Err(PortError::Validation(format!(
                "unknown profile category '{other}'"
            ))),
        }
    }
}

/// A reference to an uploaded profile photo in external storage.
#[derive(Debug, Clone)]
pub struct PhotoRef {
    pub url: String,
    pub storage_path: String,
    pub uploaded_at: DateTime<Utc>,
}

/// A character profile (child, adult or pet) owned by one user.
///
/// Age is derived from the birth date, never stored.
#[derive(Debug, Clone)]
pub struct ChildProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub birth_date: NaiveDate,
    pub category: ProfileCategory,
    pub teddy_name: Option<String>,
    pub teddy_description: Option<String>,
    pub imaginary_world: Option<String>,
    pub photos: Vec<PhotoRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChildProfile {
    /// Age in whole years as of `today`.
    pub fn age_years(&self, today: NaiveDate) -> i32 {
        let mut age = today.years_since(self.birth_date).unwrap_or(0) as i32;
        if age < 0 {
            age = 0;
        }
        age
    }
}

/// Fields for creating or replacing a profile.
#[derive(Debug, Clone)]
pub struct NewProfile {
    pub user_id: Uuid,
    pub name: String,
    pub birth_date: NaiveDate,
    pub category: ProfileCategory,
    pub teddy_name: Option<String>,
    pub teddy_description: Option<String>,
    pub imaginary_world: Option<String>,
}

//=========================================================================================
// Users & Auth
//=========================================================================================

/// Represents an account holder - used throughout the app.
#[derive(Debug, Clone)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
}

/// Only used internally for login/signup - contains sensitive data.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: Uuid,
    pub email: String,
    pub hashed_password: String,
}

//=========================================================================================
// Generation & Events
//=========================================================================================

/// Inclusive word-count target for a generation call site.
#[derive(Debug, Clone, Copy)]
pub struct WordTarget {
    pub min: u32,
    pub max: u32,
}

/// Context passed to the generator when producing a sequel.
#[derive(Debug, Clone)]
pub struct SeriesContext {
    pub previous_title: String,
    /// The predecessor's preview text, when it has one.
    pub previous_recap: Option<String>,
    pub tome_number: i32,
}

/// Everything the generator needs to produce one story text.
#[derive(Debug, Clone)]
pub struct StoryPrompt {
    pub objective: Objective,
    pub children_names: Vec<String>,
    pub word_target: WordTarget,
    pub series: Option<SeriesContext>,
}

/// Raw output of a single provider call, before retry bookkeeping.
#[derive(Debug, Clone)]
pub struct GeneratedStory {
    pub text: String,
    pub token_usage: Option<u32>,
}

/// An ephemeral candidate title; held client-side until the user commits one.
#[derive(Debug, Clone)]
pub struct GeneratedTitle {
    pub title: String,
    pub description: Option<String>,
}

/// What triggered a terminal transition, carried on the completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Generation,
    Regeneration,
    Recovery,
}

impl EventSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Regeneration => "regeneration",
            Self::Recovery => "recovery",
        }
    }
}

/// Published once per terminal transition on the owning user's channel.
#[derive(Debug, Clone)]
pub struct CompletionEvent {
    pub story_id: Uuid,
    pub user_id: Uuid,
    pub status: StoryStatus,
    pub title: String,
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
}

/// A public share link for a story; access only, never ownership.
#[derive(Debug, Clone)]
pub struct StoryShare {
    pub token: String,
    pub story_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_story(status: StoryStatus) -> Story {
        let now = Utc::now();
        Story {
            id: Uuid::new_v4(),
            author_id: Uuid::new_v4(),
            title: "A Voyage to the Moon".to_string(),
            story_text: String::new(),
            preview: String::new(),
            objective: Objective::Sleep,
            children_names: vec!["Luna".to_string()],
            children_ids: vec![],
            status,
            error: None,
            word_count: 0,
            is_favorite: false,
            series_id: None,
            tome_number: None,
            next_story_id: None,
            sound_id: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn pending_cannot_jump_to_read() {
        let story = sample_story(StoryStatus::Pending);
        let patch = StoryPatch {
            status: Some(StoryStatus::Read),
            ..Default::default()
        };
        let err = story.apply_patch(&patch, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            crate::ports::PortError::InvalidTransition {
                from: StoryStatus::Pending,
                to: StoryStatus::Read
            }
        ));
    }

    #[test]
    fn terminal_states_require_regenerating() {
        for status in [StoryStatus::Completed, StoryStatus::Read, StoryStatus::Error] {
            assert!(status.is_terminal());
            // No terminal state may move straight back to Completed.
            assert!(!status.can_transition_to(StoryStatus::Completed));
            assert!(status.can_transition_to(StoryStatus::Regenerating));
        }
        // Error additionally allows a plain retry back through Pending.
        assert!(StoryStatus::Error.can_transition_to(StoryStatus::Pending));
        assert!(StoryStatus::Regenerating.can_transition_to(StoryStatus::Completed));
    }

    #[test]
    fn apply_patch_bumps_version_and_stamps_time() {
        let story = sample_story(StoryStatus::Pending);
        let later = story.updated_at + chrono::Duration::seconds(5);
        let patch = StoryPatch {
            status: Some(StoryStatus::Completed),
            story_text: Some("Once upon a time...".to_string()),
            word_count: Some(4),
            ..Default::default()
        };
        let next = story.apply_patch(&patch, later).unwrap();
        assert_eq!(next.version, 2);
        assert_eq!(next.updated_at, later);
        assert_eq!(next.status, StoryStatus::Completed);
        assert_eq!(next.word_count, 4);
    }

    #[test]
    fn error_field_cleared_outside_error_state() {
        let mut story = sample_story(StoryStatus::Error);
        story.error = Some("provider exploded".to_string());
        let patch = StoryPatch {
            status: Some(StoryStatus::Pending),
            ..Default::default()
        };
        let next = story.apply_patch(&patch, Utc::now()).unwrap();
        assert_eq!(next.error, None);

        let story = sample_story(StoryStatus::Pending);
        let patch = StoryPatch {
            status: Some(StoryStatus::Error),
            error: Some(Some("rate limited".to_string())),
            ..Default::default()
        };
        let next = story.apply_patch(&patch, Utc::now()).unwrap();
        assert_eq!(next.error.as_deref(), Some("rate limited"));
    }

    #[test]
    fn objective_parses_case_insensitively() {
        assert_eq!("Sleep".parse::<Objective>().unwrap(), Objective::Sleep);
        assert_eq!(" fun ".parse::<Objective>().unwrap(), Objective::Fun);
        assert!("".parse::<Objective>().is_err());
        assert!("adventure".parse::<Objective>().is_err());
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            StoryStatus::Pending,
            StoryStatus::Completed,
            StoryStatus::Read,
            StoryStatus::Error,
            StoryStatus::Regenerating,
        ] {
            assert_eq!(status.as_str().parse::<StoryStatus>().unwrap(), status);
        }
        // Legacy spelling from the regeneration path.
        assert_eq!("ready".parse::<StoryStatus>().unwrap(), StoryStatus::Completed);
    }
}
