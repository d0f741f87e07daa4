//! services/api/src/test_support.rs
//!
//! In-memory implementations of the core ports, shared by the pipeline unit
//! tests. Compiled only for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use storyweaver_core::domain::{
    ChildProfile, GeneratedStory, NewProfile, NewStory, Story, StoryPatch, StoryPrompt,
    StoryShare, StoryStatus, User, UserCredentials,
};
use storyweaver_core::ports::{
    DatabaseService, PortError, PortResult, StoryGenerationService,
};
use tokio::time::Instant;
use uuid::Uuid;

//=========================================================================================
// In-memory database
//=========================================================================================

/// A `DatabaseService` double backed by hash maps, with the same transition
/// semantics as the Postgres adapter (both delegate to `Story::apply_patch`).
#[derive(Default)]
pub struct MemoryDb {
    stories: Mutex<HashMap<Uuid, Story>>,
    profiles: Mutex<HashMap<Uuid, ChildProfile>>,
    shares: Mutex<HashMap<String, StoryShare>>,
    users: Mutex<HashMap<String, UserCredentials>>,
    sessions: Mutex<HashMap<String, (Uuid, DateTime<Utc>)>>,
    /// How many story inserts have happened; the validation-gate tests assert
    /// this stays at zero for rejected requests.
    pub story_inserts: AtomicUsize,
    /// When set, any transition into `error` fails with a transient fault.
    /// Keeps a story stuck in `pending` so sweeper tests can exercise the
    /// repeated-recovery path.
    pub fail_error_transitions: AtomicBool,
}

impl MemoryDb {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Inserts a fully-formed story row, bypassing `create_story`. Lets tests
    /// control `created_at` and `status` directly.
    pub fn insert_story_raw(&self, story: Story) {
        self.stories.lock().unwrap().insert(story.id, story);
    }

    pub fn story(&self, id: Uuid) -> Option<Story> {
        self.stories.lock().unwrap().get(&id).cloned()
    }

    pub fn insert_profile_raw(&self, profile: ChildProfile) {
        self.profiles.lock().unwrap().insert(profile.id, profile);
    }
}

#[async_trait]
impl DatabaseService for MemoryDb {
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<User> {
        let creds = UserCredentials {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
            hashed_password: hashed_password.to_string(),
        };
        self.users
            .lock()
            .unwrap()
            .insert(email.to_string(), creds.clone());
        Ok(User {
            user_id: creds.user_id,
            email: creds.email,
        })
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        self.users
            .lock()
            .unwrap()
            .get(email)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("User with email {} not found", email)))
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.to_string(), (user_id, expires_at));
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        match self.sessions.lock().unwrap().get(session_id) {
            Some((user_id, expires_at)) if *expires_at > Utc::now() => Ok(*user_id),
            _ => Err(PortError::Auth("session expired or unknown".to_string())),
        }
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        self.sessions.lock().unwrap().remove(session_id);
        Ok(())
    }

    async fn create_profile(&self, profile: NewProfile) -> PortResult<ChildProfile> {
        let now = Utc::now();
        let created = ChildProfile {
            id: Uuid::new_v4(),
            user_id: profile.user_id,
            name: profile.name,
            birth_date: profile.birth_date,
            category: profile.category,
            teddy_name: profile.teddy_name,
            teddy_description: profile.teddy_description,
            imaginary_world: profile.imaginary_world,
            photos: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.profiles
            .lock()
            .unwrap()
            .insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_profile_by_id(&self, profile_id: Uuid) -> PortResult<ChildProfile> {
        self.profiles
            .lock()
            .unwrap()
            .get(&profile_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Profile {} not found", profile_id)))
    }

    async fn get_profiles_by_user(&self, user_id: Uuid) -> PortResult<Vec<ChildProfile>> {
        let mut profiles: Vec<_> = self
            .profiles
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        profiles.sort_by_key(|p| p.created_at);
        Ok(profiles)
    }

    async fn update_profile(
        &self,
        profile_id: Uuid,
        profile: NewProfile,
    ) -> PortResult<ChildProfile> {
        let mut profiles = self.profiles.lock().unwrap();
        let existing = profiles
            .get_mut(&profile_id)
            .ok_or_else(|| PortError::NotFound(format!("Profile {} not found", profile_id)))?;
        existing.name = profile.name;
        existing.birth_date = profile.birth_date;
        existing.category = profile.category;
        existing.teddy_name = profile.teddy_name;
        existing.teddy_description = profile.teddy_description;
        existing.imaginary_world = profile.imaginary_world;
        existing.updated_at = Utc::now();
        Ok(existing.clone())
    }

    async fn delete_profile(&self, profile_id: Uuid) -> PortResult<()> {
        self.profiles
            .lock()
            .unwrap()
            .remove(&profile_id)
            .map(|_| ())
            .ok_or_else(|| PortError::NotFound(format!("Profile {} not found", profile_id)))
    }

    async fn add_profile_photo(
        &self,
        profile_id: Uuid,
        url: &str,
        storage_path: &str,
    ) -> PortResult<ChildProfile> {
        let mut profiles = self.profiles.lock().unwrap();
        let existing = profiles
            .get_mut(&profile_id)
            .ok_or_else(|| PortError::NotFound(format!("Profile {} not found", profile_id)))?;
        existing.photos.push(storyweaver_core::domain::PhotoRef {
            url: url.to_string(),
            storage_path: storage_path.to_string(),
            uploaded_at: Utc::now(),
        });
        Ok(existing.clone())
    }

    async fn create_story(&self, story: NewStory) -> PortResult<Story> {
        self.story_inserts.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let created = Story {
            id: Uuid::new_v4(),
            author_id: story.author_id,
            title: story.title,
            story_text: String::new(),
            preview: String::new(),
            objective: story.objective,
            children_names: story.children_names,
            children_ids: story.children_ids,
            status: StoryStatus::Pending,
            error: None,
            word_count: 0,
            is_favorite: false,
            series_id: story.series_id,
            tome_number: story.tome_number,
            next_story_id: None,
            sound_id: None,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.stories
            .lock()
            .unwrap()
            .insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_story_by_id(&self, story_id: Uuid) -> PortResult<Story> {
        self.story(story_id)
            .ok_or_else(|| PortError::NotFound(format!("Story {} not found", story_id)))
    }

    async fn get_stories_by_user(&self, user_id: Uuid) -> PortResult<Vec<Story>> {
        let mut stories: Vec<_> = self
            .stories
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.author_id == user_id)
            .cloned()
            .collect();
        stories.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(stories)
    }

    async fn transition_story(
        &self,
        story_id: Uuid,
        expected_version: i64,
        patch: StoryPatch,
    ) -> PortResult<Story> {
        let mut stories = self.stories.lock().unwrap();
        let current = stories
            .get(&story_id)
            .ok_or_else(|| PortError::NotFound(format!("Story {} not found", story_id)))?;
        if current.version != expected_version {
            return Err(PortError::Conflict {
                expected: expected_version,
                found: current.version,
            });
        }
        if patch.status == Some(StoryStatus::Error)
            && self.fail_error_transitions.load(Ordering::SeqCst)
        {
            return Err(PortError::Transient("injected write failure".to_string()));
        }
        let next = current.apply_patch(&patch, Utc::now())?;
        stories.insert(story_id, next.clone());
        Ok(next)
    }

    async fn delete_story(&self, story_id: Uuid) -> PortResult<()> {
        self.stories
            .lock()
            .unwrap()
            .remove(&story_id)
            .map(|_| ())
            .ok_or_else(|| PortError::NotFound(format!("Story {} not found", story_id)))
    }

    async fn get_stale_pending_stories(&self, cutoff: DateTime<Utc>) -> PortResult<Vec<Story>> {
        let mut stale: Vec<_> = self
            .stories
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.status == StoryStatus::Pending && s.created_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|s| s.created_at);
        Ok(stale)
    }

    async fn create_story_share(
        &self,
        story_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> PortResult<StoryShare> {
        let share = StoryShare {
            token: token.to_string(),
            story_id,
            expires_at,
            created_at: Utc::now(),
        };
        self.shares
            .lock()
            .unwrap()
            .insert(token.to_string(), share.clone());
        Ok(share)
    }

    async fn get_story_by_share_token(&self, token: &str) -> PortResult<Story> {
        let share = self
            .shares
            .lock()
            .unwrap()
            .get(token)
            .cloned()
            .ok_or_else(|| PortError::NotFound("Share link not found or expired".to_string()))?;
        if share.expires_at <= Utc::now() {
            return Err(PortError::NotFound(
                "Share link not found or expired".to_string(),
            ));
        }
        self.get_story_by_id(share.story_id).await
    }
}

//=========================================================================================
// Scripted generator
//=========================================================================================

/// A provider double that replays a scripted sequence of responses and records
/// the (tokio) instant of every call. Once the script runs out it keeps
/// returning `RateLimited`.
pub struct StubGenerator {
    responses: Mutex<VecDeque<PortResult<GeneratedStory>>>,
    calls: Mutex<Vec<Instant>>,
}

impl StubGenerator {
    pub fn new(responses: Vec<PortResult<GeneratedStory>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn ok(text: &str) -> PortResult<GeneratedStory> {
        Ok(GeneratedStory {
            text: text.to_string(),
            token_usage: Some(512),
        })
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl StoryGenerationService for StubGenerator {
    async fn generate_story(&self, _prompt: &StoryPrompt) -> PortResult<GeneratedStory> {
        self.calls.lock().unwrap().push(Instant::now());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(PortError::RateLimited))
    }
}

//=========================================================================================
// Gated generator
//=========================================================================================

/// A provider double that parks inside `generate_story` until released, so a
/// test can observe the service while a generation is still in flight.
pub struct GateGenerator {
    gate: tokio::sync::Notify,
    calls: AtomicUsize,
}

impl GateGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: tokio::sync::Notify::new(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Lets the parked call finish. `Notify` stores the permit, so releasing
    /// before the call reaches the gate is safe too.
    pub fn release(&self) {
        self.gate.notify_one();
    }

    /// Resolves once a generation call has started and is parked at the gate.
    pub async fn entered(&self) {
        while self.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl StoryGenerationService for GateGenerator {
    async fn generate_story(&self, _prompt: &StoryPrompt) -> PortResult<GeneratedStory> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        Ok(GeneratedStory {
            text: CLEAN_STORY.to_string(),
            token_usage: None,
        })
    }
}

//=========================================================================================
// Fixtures
//=========================================================================================

pub const CLEAN_STORY: &str = "Once upon a time, Luna and Max tiptoed into the quiet garden. \
They followed a trail of silver moonlight all the way to the old oak tree, where a very sleepy \
owl was waiting to tell them a secret. And with that secret tucked under their pillows, they \
drifted softly off to sleep.";

/// A profile owned by `user_id`, for wiring story requests in tests.
pub fn sample_profile(user_id: Uuid, name: &str) -> ChildProfile {
    let now = Utc::now();
    ChildProfile {
        id: Uuid::new_v4(),
        user_id,
        name: name.to_string(),
        birth_date: chrono::NaiveDate::from_ymd_opt(2019, 6, 1).unwrap(),
        category: storyweaver_core::domain::ProfileCategory::Child,
        teddy_name: None,
        teddy_description: None,
        imaginary_world: None,
        photos: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}

/// A pending story created `age` before `now`, as the zombie scan would see it.
pub fn pending_story_aged(
    author_id: Uuid,
    now: DateTime<Utc>,
    age: chrono::Duration,
) -> Story {
    let created = now - age;
    Story {
        id: Uuid::new_v4(),
        author_id,
        title: "Untitled story".to_string(),
        story_text: String::new(),
        preview: String::new(),
        objective: storyweaver_core::domain::Objective::Sleep,
        children_names: vec!["Luna".to_string()],
        children_ids: vec![],
        status: StoryStatus::Pending,
        error: None,
        word_count: 0,
        is_favorite: false,
        series_id: None,
        tome_number: None,
        next_story_id: None,
        sound_id: None,
        version: 1,
        created_at: created,
        updated_at: created,
    }
}
