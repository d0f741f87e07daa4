//! services/api/src/pipeline/story_service.rs
//!
//! Orchestrates the story lifecycle: request validation, the pending insert,
//! the fire-and-forget generation run, terminal transitions, and the events
//! published for them. All status changes go through the version-checked
//! transition, so a manual retry racing the recovery sweeper can never produce
//! a lost update; a per-story single-flight guard keeps the two from running
//! the pipeline concurrently at all.

use crate::pipeline::generation::GenerationClient;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use storyweaver_core::domain::{
    CompletionEvent, EventSource, NewStory, Objective, SeriesContext, Story, StoryPatch,
    StoryPrompt, StoryShare, StoryStatus, WordTarget,
};
use storyweaver_core::ports::{
    CompletionNotifier, CompletionStream, DatabaseService, PortError, PortResult,
};
use tracing::{error, info, warn};
use uuid::Uuid;

/// How many times a transition is re-read and re-applied after a version
/// conflict before the conflict is surfaced.
const MAX_TRANSITION_RETRIES: u32 = 3;

/// Word targets per call site. There is deliberately no single canonical
/// length; first stories and sequels each carry their own.
#[derive(Debug, Clone, Copy)]
pub struct LengthTargets {
    pub story: WordTarget,
    pub sequel: WordTarget,
}

/// The application service behind every story operation the web layer exposes.
pub struct StoryService {
    db: Arc<dyn DatabaseService>,
    generation: GenerationClient,
    notifier: Arc<dyn CompletionNotifier>,
    lengths: LengthTargets,
    /// Story ids with a generation run currently in flight. Incremented before
    /// the async work starts, so a manual retry and an automatic recovery can
    /// never both enter the pipeline for the same story.
    in_flight: Mutex<HashSet<Uuid>>,
}

/// Removes the story id from the in-flight set when the run ends, however it ends.
struct FlightGuard<'a> {
    set: &'a Mutex<HashSet<Uuid>>,
    id: Uuid,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().unwrap().remove(&self.id);
    }
}

impl StoryService {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        generation: GenerationClient,
        notifier: Arc<dyn CompletionNotifier>,
        lengths: LengthTargets,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            generation,
            notifier,
            lengths,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    //=====================================================================================
    // Creation & validation
    //=====================================================================================

    /// Validates the request and inserts the pending row. Generation itself is
    /// the caller's to spawn; the returned story is already visible in the
    /// user's library with `status = pending`.
    pub async fn create_story(
        &self,
        author_id: Uuid,
        objective: &str,
        children_ids: &[Uuid],
    ) -> PortResult<Story> {
        // Both gates fire before any database call.
        let objective: Objective = objective.parse()?;
        if children_ids.is_empty() {
            return Err(PortError::Validation(
                "at least one character is required".to_string(),
            ));
        }

        let mut children_names = Vec::with_capacity(children_ids.len());
        for profile_id in children_ids {
            let profile = self.db.get_profile_by_id(*profile_id).await?;
            if profile.user_id != author_id {
                return Err(PortError::Auth(
                    "profile does not belong to this user".to_string(),
                ));
            }
            if profile.name.trim().is_empty() {
                return Err(PortError::Validation(format!(
                    "profile {} has an empty name",
                    profile_id
                )));
            }
            children_names.push(profile.name);
        }

        let story = self
            .db
            .create_story(NewStory {
                author_id,
                title: placeholder_title(objective, &children_names),
                objective,
                children_names,
                children_ids: children_ids.to_vec(),
                series_id: None,
                tome_number: None,
            })
            .await?;
        info!(story_id = %story.id, "Created pending story");
        Ok(story)
    }

    /// Creates the follow-on tome for a finished story. The new story starts
    /// `pending` like any other; the predecessor is linked to it via
    /// `next_story_id` through a version-checked update.
    pub async fn create_sequel(&self, story_id: Uuid, user_id: Uuid) -> PortResult<Story> {
        let parent = self.owned_story(story_id, user_id).await?;
        if !matches!(parent.status, StoryStatus::Completed | StoryStatus::Read) {
            return Err(PortError::Validation(
                "a sequel needs a finished predecessor".to_string(),
            ));
        }
        if parent.next_story_id.is_some() {
            return Err(PortError::Validation(
                "this story already has a sequel".to_string(),
            ));
        }

        let series_id = parent.series_id.unwrap_or(parent.id);
        let tome_number = parent.tome_number.unwrap_or(1) + 1;
        let sequel = self
            .db
            .create_story(NewStory {
                author_id: user_id,
                title: format!("{} — tome {}", parent.title, tome_number),
                objective: parent.objective,
                children_names: parent.children_names.clone(),
                children_ids: parent.children_ids.clone(),
                series_id: Some(series_id),
                tome_number: Some(tome_number),
            })
            .await?;

        let link = StoryPatch {
            next_story_id: Some(Some(sequel.id)),
            ..Default::default()
        };
        self.transition_with_retry(parent.id, link).await?;
        info!(story_id = %sequel.id, series_id = %series_id, tome_number, "Created sequel");
        Ok(sequel)
    }

    //=====================================================================================
    // The generation run
    //=====================================================================================

    /// Runs the full generation pipeline for a story that is `pending` or
    /// `regenerating`: provider call under retry, terminal transition, and one
    /// completion event. Intended to be spawned after `create_story`,
    /// `retry_story` or `regenerate_story`; the sweeper awaits it directly.
    ///
    /// A second caller for the same story id while a run is in flight is a
    /// no-op, not an error.
    pub async fn run_generation(&self, story_id: Uuid, source: EventSource) -> PortResult<()> {
        let _guard = {
            let mut in_flight = self.in_flight.lock().unwrap();
            if !in_flight.insert(story_id) {
                info!(story_id = %story_id, "Generation already in flight, skipping");
                return Ok(());
            }
            FlightGuard {
                set: &self.in_flight,
                id: story_id,
            }
        };

        let story = self.db.get_story_by_id(story_id).await?;
        if !matches!(story.status, StoryStatus::Pending | StoryStatus::Regenerating) {
            return Err(PortError::InvalidTransition {
                from: story.status,
                to: StoryStatus::Completed,
            });
        }

        let prompt = self.build_prompt(&story).await;
        let terminal = match self.generation.generate(&prompt).await {
            Ok(outcome) => {
                info!(
                    story_id = %story_id,
                    attempts = outcome.attempts,
                    words = outcome.word_count,
                    elapsed_ms = outcome.elapsed.as_millis() as u64,
                    "Story generation succeeded"
                );
                StoryPatch {
                    status: Some(StoryStatus::Completed),
                    story_text: Some(outcome.story_text),
                    preview: Some(outcome.preview),
                    word_count: Some(outcome.word_count as i32),
                    error: Some(None),
                    ..Default::default()
                }
            }
            Err(e) => {
                // Normalize to one human-readable message; the UI only ever
                // sees the stored error field.
                warn!(story_id = %story_id, error = %e, "Story generation failed");
                StoryPatch {
                    status: Some(StoryStatus::Error),
                    error: Some(Some(e.to_string())),
                    ..Default::default()
                }
            }
        };

        let updated = self.transition_with_retry(story_id, terminal).await?;
        self.publish_terminal(&updated, source).await;
        Ok(())
    }

    /// The sweeper's recovery action: re-stamp the zombie (bumping its version
    /// so a racing writer loses) and run the pipeline to a terminal state.
    pub async fn recover_story(&self, story_id: Uuid) -> PortResult<()> {
        let story = self.db.get_story_by_id(story_id).await?;
        if story.status != StoryStatus::Pending {
            // Finished on its own between the scan and now; nothing to do.
            return Ok(());
        }
        let restamp = StoryPatch {
            status: Some(StoryStatus::Pending),
            ..Default::default()
        };
        self.db
            .transition_story(story_id, story.version, restamp)
            .await?;
        self.run_generation(story_id, EventSource::Recovery).await
    }

    //=====================================================================================
    // User-initiated lifecycle actions
    //=====================================================================================

    /// Manual retry of a failed or stuck story. Moves `error` back to
    /// `pending`; a story still `pending` is left as-is (the run itself will
    /// sort it out). The caller spawns `run_generation` afterwards.
    pub async fn retry_story(&self, story_id: Uuid, user_id: Uuid) -> PortResult<Story> {
        let story = self.owned_story(story_id, user_id).await?;
        match story.status {
            StoryStatus::Pending => Ok(story),
            StoryStatus::Error => {
                let patch = StoryPatch {
                    status: Some(StoryStatus::Pending),
                    error: Some(None),
                    ..Default::default()
                };
                self.transition_with_retry(story_id, patch).await
            }
            other => Err(PortError::InvalidTransition {
                from: other,
                to: StoryStatus::Pending,
            }),
        }
    }

    /// Explicit regeneration of a finished story: terminal state ->
    /// `regenerating`, then the caller spawns `run_generation`.
    pub async fn regenerate_story(&self, story_id: Uuid, user_id: Uuid) -> PortResult<Story> {
        self.owned_story(story_id, user_id).await?;
        let patch = StoryPatch {
            status: Some(StoryStatus::Regenerating),
            ..Default::default()
        };
        self.transition_with_retry(story_id, patch).await
    }

    pub async fn mark_read(&self, story_id: Uuid, user_id: Uuid) -> PortResult<Story> {
        self.owned_story(story_id, user_id).await?;
        let patch = StoryPatch {
            status: Some(StoryStatus::Read),
            ..Default::default()
        };
        self.transition_with_retry(story_id, patch).await
    }

    pub async fn set_favorite(
        &self,
        story_id: Uuid,
        user_id: Uuid,
        is_favorite: bool,
    ) -> PortResult<Story> {
        self.owned_story(story_id, user_id).await?;
        let patch = StoryPatch {
            is_favorite: Some(is_favorite),
            ..Default::default()
        };
        self.transition_with_retry(story_id, patch).await
    }

    /// Commits a chosen title. Candidates themselves are ephemeral; only the
    /// one the user picks is ever stored.
    pub async fn rename_story(
        &self,
        story_id: Uuid,
        user_id: Uuid,
        title: &str,
    ) -> PortResult<Story> {
        let title = title.trim();
        if title.is_empty() {
            return Err(PortError::Validation("title must not be empty".to_string()));
        }
        self.owned_story(story_id, user_id).await?;
        let patch = StoryPatch {
            title: Some(title.to_string()),
            ..Default::default()
        };
        self.transition_with_retry(story_id, patch).await
    }

    pub async fn delete_story(&self, story_id: Uuid, user_id: Uuid) -> PortResult<()> {
        self.owned_story(story_id, user_id).await?;
        self.db.delete_story(story_id).await
    }

    pub async fn get_story(&self, story_id: Uuid, user_id: Uuid) -> PortResult<Story> {
        self.owned_story(story_id, user_id).await
    }

    pub async fn list_stories(&self, user_id: Uuid) -> PortResult<Vec<Story>> {
        self.db.get_stories_by_user(user_id).await
    }

    //=====================================================================================
    // Sharing & notifications
    //=====================================================================================

    /// Issues a public link token for a story. Access only; ownership never moves.
    pub async fn share_story(
        &self,
        story_id: Uuid,
        user_id: Uuid,
        ttl: chrono::Duration,
    ) -> PortResult<StoryShare> {
        self.owned_story(story_id, user_id).await?;
        let token = Uuid::new_v4().simple().to_string();
        self.db
            .create_story_share(story_id, &token, Utc::now() + ttl)
            .await
    }

    pub async fn get_shared_story(&self, token: &str) -> PortResult<Story> {
        self.db.get_story_by_share_token(token).await
    }

    /// Subscribes to the user's completion channel.
    pub async fn subscribe(&self, user_id: Uuid) -> PortResult<CompletionStream> {
        self.notifier.subscribe(user_id).await
    }

    //=====================================================================================
    // Internals
    //=====================================================================================

    async fn owned_story(&self, story_id: Uuid, user_id: Uuid) -> PortResult<Story> {
        let story = self.db.get_story_by_id(story_id).await?;
        if story.author_id != user_id {
            return Err(PortError::Auth(
                "story does not belong to this user".to_string(),
            ));
        }
        Ok(story)
    }

    async fn build_prompt(&self, story: &Story) -> StoryPrompt {
        let is_sequel = story.tome_number.map_or(false, |t| t > 1);
        let word_target = if is_sequel {
            self.lengths.sequel
        } else {
            self.lengths.story
        };

        // The predecessor points at us through next_story_id.
        let series = if is_sequel {
            match self.db.get_stories_by_user(story.author_id).await {
                Ok(stories) => stories
                    .into_iter()
                    .find(|s| s.next_story_id == Some(story.id))
                    .map(|parent| SeriesContext {
                        previous_title: parent.title,
                        previous_recap: Some(parent.preview).filter(|p| !p.is_empty()),
                        tome_number: story.tome_number.unwrap_or(2),
                    }),
                Err(e) => {
                    warn!(story_id = %story.id, error = %e, "Could not load series context");
                    None
                }
            }
        } else {
            None
        };

        StoryPrompt {
            objective: story.objective,
            children_names: story.children_names.clone(),
            word_target,
            series,
        }
    }

    /// Applies a patch through the version check, re-reading and re-applying on
    /// conflict. Conflicts are only surfaced once the retries are exhausted.
    async fn transition_with_retry(&self, story_id: Uuid, patch: StoryPatch) -> PortResult<Story> {
        let mut last_conflict = None;
        for _ in 0..MAX_TRANSITION_RETRIES {
            let current = self.db.get_story_by_id(story_id).await?;
            match self
                .db
                .transition_story(story_id, current.version, patch.clone())
                .await
            {
                Ok(updated) => return Ok(updated),
                Err(e @ PortError::Conflict { .. }) => {
                    warn!(story_id = %story_id, "Transition lost a version race, re-reading");
                    last_conflict = Some(e);
                }
                Err(other) => return Err(other),
            }
        }
        Err(last_conflict.unwrap_or_else(|| {
            PortError::Unexpected("transition retries exhausted".to_string())
        }))
    }

    async fn publish_terminal(&self, story: &Story, source: EventSource) {
        let event = CompletionEvent {
            story_id: story.id,
            user_id: story.author_id,
            status: story.status,
            title: story.title.clone(),
            timestamp: Utc::now(),
            source,
        };
        if let Err(e) = self.notifier.publish(event).await {
            // Subscribers fall back to a direct state check on timeout, so a
            // failed publish is not fatal.
            error!(story_id = %story.id, error = %e, "Failed to publish completion event");
        }
    }
}

fn placeholder_title(objective: Objective, names: &[String]) -> String {
    format!("A {} story for {}", objective, names.join(" & "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ChannelNotifier;
    use crate::pipeline::generation::RetryPolicy;
    use crate::test_support::{sample_profile, GateGenerator, MemoryDb, StubGenerator, CLEAN_STORY};
    use futures::StreamExt;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn service_with(
        db: Arc<MemoryDb>,
        generator: Arc<StubGenerator>,
    ) -> Arc<StoryService> {
        StoryService::new(
            db,
            GenerationClient::new(
                generator,
                RetryPolicy {
                    max_attempts: 3,
                    initial_delay: Duration::from_millis(10),
                },
            ),
            Arc::new(ChannelNotifier::new()),
            LengthTargets {
                story: WordTarget { min: 2000, max: 3000 },
                sequel: WordTarget { min: 6000, max: 10000 },
            },
        )
    }

    #[tokio::test]
    async fn rejects_empty_character_list_before_any_insert() {
        let db = MemoryDb::new();
        let service = service_with(db.clone(), StubGenerator::new(vec![]));

        let result = service.create_story(Uuid::new_v4(), "sleep", &[]).await;
        assert!(matches!(result, Err(PortError::Validation(_))));
        assert_eq!(db.story_inserts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejects_empty_objective_before_any_insert() {
        let db = MemoryDb::new();
        let user = Uuid::new_v4();
        let profile = sample_profile(user, "Luna");
        let profile_id = profile.id;
        db.insert_profile_raw(profile);
        let service = service_with(db.clone(), StubGenerator::new(vec![]));

        let result = service.create_story(user, "", &[profile_id]).await;
        assert!(matches!(result, Err(PortError::Validation(_))));
        assert_eq!(db.story_inserts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejects_profiles_owned_by_someone_else() {
        let db = MemoryDb::new();
        let stranger_profile = sample_profile(Uuid::new_v4(), "Luna");
        let profile_id = stranger_profile.id;
        db.insert_profile_raw(stranger_profile);
        let service = service_with(db.clone(), StubGenerator::new(vec![]));

        let result = service
            .create_story(Uuid::new_v4(), "sleep", &[profile_id])
            .await;
        assert!(matches!(result, Err(PortError::Auth(_))));
        assert_eq!(db.story_inserts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn happy_path_reaches_completed_with_a_completion_event() {
        let db = MemoryDb::new();
        let user = Uuid::new_v4();
        let profile = sample_profile(user, "Luna");
        let profile_id = profile.id;
        db.insert_profile_raw(profile);
        let service = service_with(
            db.clone(),
            StubGenerator::new(vec![StubGenerator::ok(CLEAN_STORY)]),
        );

        let story = service
            .create_story(user, "sleep", &[profile_id])
            .await
            .unwrap();
        assert_eq!(story.status, StoryStatus::Pending);
        assert_eq!(story.version, 1);
        assert!(story.story_text.is_empty());

        let mut events = service.subscribe(user).await.unwrap();
        service
            .run_generation(story.id, EventSource::Generation)
            .await
            .unwrap();

        let stored = db.story(story.id).unwrap();
        assert_eq!(stored.status, StoryStatus::Completed);
        assert!(!stored.story_text.is_empty());
        assert!(stored.word_count > 0);
        assert_eq!(stored.error, None);
        assert_eq!(stored.version, 2);

        let event = events.next().await.unwrap();
        assert_eq!(event.story_id, story.id);
        assert_eq!(event.status, StoryStatus::Completed);
        assert_eq!(event.source, EventSource::Generation);
    }

    #[tokio::test]
    async fn exhausted_generation_lands_in_error_with_message() {
        let db = MemoryDb::new();
        let user = Uuid::new_v4();
        let profile = sample_profile(user, "Luna");
        let profile_id = profile.id;
        db.insert_profile_raw(profile);
        // Empty script: every provider call is rate-limited.
        let service = service_with(db.clone(), StubGenerator::new(vec![]));

        let story = service
            .create_story(user, "fun", &[profile_id])
            .await
            .unwrap();
        service
            .run_generation(story.id, EventSource::Generation)
            .await
            .unwrap();

        let stored = db.story(story.id).unwrap();
        assert_eq!(stored.status, StoryStatus::Error);
        assert!(stored.error.is_some());
        assert!(stored.story_text.is_empty());
    }

    #[tokio::test]
    async fn stale_version_cannot_overwrite_a_completed_story() {
        let db = MemoryDb::new();
        let user = Uuid::new_v4();
        let profile = sample_profile(user, "Luna");
        let profile_id = profile.id;
        db.insert_profile_raw(profile);
        let service = service_with(
            db.clone(),
            StubGenerator::new(vec![StubGenerator::ok(CLEAN_STORY)]),
        );

        let story = service
            .create_story(user, "relax", &[profile_id])
            .await
            .unwrap();
        service
            .run_generation(story.id, EventSource::Generation)
            .await
            .unwrap();
        let completed = db.story(story.id).unwrap();
        assert_eq!(completed.status, StoryStatus::Completed);

        // A writer holding the pre-completion version must lose.
        let stale = StoryPatch {
            status: Some(StoryStatus::Error),
            error: Some(Some("late failure".to_string())),
            ..Default::default()
        };
        let result = db.transition_story(story.id, 1, stale).await;
        assert!(matches!(result, Err(PortError::Conflict { expected: 1, found: 2 })));

        let unchanged = db.story(story.id).unwrap();
        assert_eq!(unchanged.status, StoryStatus::Completed);
        assert_eq!(unchanged.story_text, completed.story_text);
        assert_eq!(unchanged.version, 2);
    }

    #[tokio::test]
    async fn completed_story_cannot_be_marked_pending_by_retry() {
        let db = MemoryDb::new();
        let user = Uuid::new_v4();
        let profile = sample_profile(user, "Luna");
        let profile_id = profile.id;
        db.insert_profile_raw(profile);
        let service = service_with(
            db.clone(),
            StubGenerator::new(vec![StubGenerator::ok(CLEAN_STORY)]),
        );

        let story = service
            .create_story(user, "focus", &[profile_id])
            .await
            .unwrap();
        service
            .run_generation(story.id, EventSource::Generation)
            .await
            .unwrap();

        let result = service.retry_story(story.id, user).await;
        assert!(matches!(
            result,
            Err(PortError::InvalidTransition {
                from: StoryStatus::Completed,
                to: StoryStatus::Pending
            })
        ));
    }

    #[tokio::test]
    async fn manual_retry_moves_error_back_through_pending() {
        let db = MemoryDb::new();
        let user = Uuid::new_v4();
        let profile = sample_profile(user, "Max");
        let profile_id = profile.id;
        db.insert_profile_raw(profile);
        // First run exhausts; the script then has a clean story for the retry.
        let generator = StubGenerator::new(vec![
            Err(PortError::RateLimited),
            Err(PortError::RateLimited),
            Err(PortError::RateLimited),
            StubGenerator::ok(CLEAN_STORY),
        ]);
        let service = service_with(db.clone(), generator);

        let story = service
            .create_story(user, "sleep", &[profile_id])
            .await
            .unwrap();
        service
            .run_generation(story.id, EventSource::Generation)
            .await
            .unwrap();
        assert_eq!(db.story(story.id).unwrap().status, StoryStatus::Error);

        let retried = service.retry_story(story.id, user).await.unwrap();
        assert_eq!(retried.status, StoryStatus::Pending);
        assert_eq!(retried.error, None);

        service
            .run_generation(story.id, EventSource::Generation)
            .await
            .unwrap();
        assert_eq!(db.story(story.id).unwrap().status, StoryStatus::Completed);
    }

    #[tokio::test]
    async fn concurrent_runs_for_one_story_are_single_flight() {
        let db = MemoryDb::new();
        let user = Uuid::new_v4();
        let profile = sample_profile(user, "Luna");
        let profile_id = profile.id;
        db.insert_profile_raw(profile);
        let generator = GateGenerator::new();
        let service = StoryService::new(
            db.clone(),
            GenerationClient::new(
                generator.clone(),
                RetryPolicy {
                    max_attempts: 3,
                    initial_delay: Duration::from_millis(10),
                },
            ),
            Arc::new(ChannelNotifier::new()),
            LengthTargets {
                story: WordTarget { min: 2000, max: 3000 },
                sequel: WordTarget { min: 6000, max: 10000 },
            },
        );

        let story = service
            .create_story(user, "sleep", &[profile_id])
            .await
            .unwrap();

        let first = tokio::spawn({
            let service = service.clone();
            let story_id = story.id;
            async move { service.run_generation(story_id, EventSource::Generation).await }
        });
        generator.entered().await;

        // While the first run is parked at the provider, a second caller for
        // the same story is a no-op, not a second provider call.
        service
            .run_generation(story.id, EventSource::Recovery)
            .await
            .unwrap();
        assert_eq!(generator.call_count(), 1);

        generator.release();
        first.await.unwrap().unwrap();
        assert_eq!(db.story(story.id).unwrap().status, StoryStatus::Completed);
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn regeneration_goes_through_regenerating() {
        let db = MemoryDb::new();
        let user = Uuid::new_v4();
        let profile = sample_profile(user, "Luna");
        let profile_id = profile.id;
        db.insert_profile_raw(profile);
        let service = service_with(
            db.clone(),
            StubGenerator::new(vec![
                StubGenerator::ok(CLEAN_STORY),
                StubGenerator::ok(CLEAN_STORY),
            ]),
        );

        let story = service
            .create_story(user, "sleep", &[profile_id])
            .await
            .unwrap();
        service
            .run_generation(story.id, EventSource::Generation)
            .await
            .unwrap();

        let regenerating = service.regenerate_story(story.id, user).await.unwrap();
        assert_eq!(regenerating.status, StoryStatus::Regenerating);

        service
            .run_generation(story.id, EventSource::Regeneration)
            .await
            .unwrap();
        assert_eq!(db.story(story.id).unwrap().status, StoryStatus::Completed);
    }

    #[tokio::test]
    async fn sequel_links_parent_and_uses_series_numbering() {
        let db = MemoryDb::new();
        let user = Uuid::new_v4();
        let profile = sample_profile(user, "Luna");
        let profile_id = profile.id;
        db.insert_profile_raw(profile);
        let service = service_with(
            db.clone(),
            StubGenerator::new(vec![StubGenerator::ok(CLEAN_STORY)]),
        );

        let story = service
            .create_story(user, "fun", &[profile_id])
            .await
            .unwrap();
        service
            .run_generation(story.id, EventSource::Generation)
            .await
            .unwrap();

        let sequel = service.create_sequel(story.id, user).await.unwrap();
        assert_eq!(sequel.series_id, Some(story.id));
        assert_eq!(sequel.tome_number, Some(2));
        assert_eq!(sequel.status, StoryStatus::Pending);

        let parent = db.story(story.id).unwrap();
        assert_eq!(parent.next_story_id, Some(sequel.id));

        // Second sequel from the same parent is refused.
        let again = service.create_sequel(story.id, user).await;
        assert!(matches!(again, Err(PortError::Validation(_))));
    }

    #[tokio::test]
    async fn cross_user_actions_are_refused() {
        let db = MemoryDb::new();
        let owner = Uuid::new_v4();
        let intruder = Uuid::new_v4();
        let profile = sample_profile(owner, "Luna");
        let profile_id = profile.id;
        db.insert_profile_raw(profile);
        let service = service_with(db.clone(), StubGenerator::new(vec![]));

        let story = service
            .create_story(owner, "sleep", &[profile_id])
            .await
            .unwrap();

        assert!(matches!(
            service.delete_story(story.id, intruder).await,
            Err(PortError::Auth(_))
        ));
        assert!(matches!(
            service.get_story(story.id, intruder).await,
            Err(PortError::Auth(_))
        ));
        // The owner still can.
        assert!(service.delete_story(story.id, owner).await.is_ok());
    }
}
