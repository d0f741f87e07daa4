//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use storyweaver_core::domain::{
    ChildProfile, NewProfile, NewStory, PhotoRef, Story, StoryPatch, StoryShare, StoryStatus,
    User, UserCredentials,
};
use storyweaver_core::ports::{DatabaseService, PortError, PortResult};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn db_err(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn not_found(e: sqlx::Error, what: impl FnOnce() -> String) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(what()),
        other => PortError::Unexpected(other.to_string()),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    user_id: Uuid,
    email: String,
}

impl UserRecord {
    fn to_domain(self) -> User {
        User {
            user_id: self.user_id,
            email: self.email,
        }
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    user_id: Uuid,
    email: String,
    hashed_password: String,
}

impl CredentialsRecord {
    fn to_domain(self) -> UserCredentials {
        UserCredentials {
            user_id: self.user_id,
            email: self.email,
            hashed_password: self.hashed_password,
        }
    }
}

/// Photo references are kept as a JSONB array on the profile row.
#[derive(Serialize, Deserialize)]
struct PhotoRecord {
    url: String,
    storage_path: String,
    uploaded_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct ProfileRecord {
    id: Uuid,
    user_id: Uuid,
    name: String,
    birth_date: NaiveDate,
    category: String,
    teddy_name: Option<String>,
    teddy_description: Option<String>,
    imaginary_world: Option<String>,
    photos: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ProfileRecord {
    fn to_domain(self) -> PortResult<ChildProfile> {
        let photos: Vec<PhotoRecord> = serde_json::from_value(self.photos)
            .map_err(|e| PortError::Unexpected(format!("corrupt photo list: {e}")))?;
        Ok(ChildProfile {
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            birth_date: self.birth_date,
            category: self.category.parse()?,
            teddy_name: self.teddy_name,
            teddy_description: self.teddy_description,
            imaginary_world: self.imaginary_world,
            photos: photos
                .into_iter()
                .map(|p| PhotoRef {
                    url: p.url,
                    storage_path: p.storage_path,
                    uploaded_at: p.uploaded_at,
                })
                .collect(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct StoryRecord {
    id: Uuid,
    author_id: Uuid,
    title: String,
    story_text: String,
    preview: String,
    objective: String,
    children_names: Vec<String>,
    children_ids: Vec<Uuid>,
    status: String,
    error: Option<String>,
    word_count: i32,
    is_favorite: bool,
    series_id: Option<Uuid>,
    tome_number: Option<i32>,
    next_story_id: Option<Uuid>,
    sound_id: Option<Uuid>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl StoryRecord {
    fn to_domain(self) -> PortResult<Story> {
        Ok(Story {
            id: self.id,
            author_id: self.author_id,
            title: self.title,
            story_text: self.story_text,
            preview: self.preview,
            objective: self.objective.parse()?,
            children_names: self.children_names,
            children_ids: self.children_ids,
            status: self.status.parse()?,
            error: self.error,
            word_count: self.word_count,
            is_favorite: self.is_favorite,
            series_id: self.series_id,
            tome_number: self.tome_number,
            next_story_id: self.next_story_id,
            sound_id: self.sound_id,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct ShareRecord {
    token: String,
    story_id: Uuid,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl ShareRecord {
    fn to_domain(self) -> StoryShare {
        StoryShare {
            token: self.token,
            story_id: self.story_id,
            expires_at: self.expires_at,
            created_at: self.created_at,
        }
    }
}

const STORY_COLUMNS: &str = "id, author_id, title, story_text, preview, objective, \
     children_names, children_ids, status, error, word_count, is_favorite, series_id, \
     tome_number, next_story_id, sound_id, version, created_at, updated_at";

const PROFILE_COLUMNS: &str = "id, user_id, name, birth_date, category, teddy_name, \
     teddy_description, imaginary_world, photos, created_at, updated_at";

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "INSERT INTO users (user_id, email, hashed_password) VALUES ($1, $2, $3) \
             RETURNING user_id, email",
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(hashed_password)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(record.to_domain())
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT user_id, email, hashed_password FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found(e, || format!("User with email {} not found", email)))?;
        Ok(record.to_domain())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            "SELECT user_id FROM auth_sessions WHERE id = $1 AND expires_at > now()",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match row {
            Some((user_id,)) => Ok(user_id),
            None => Err(PortError::Auth("session expired or unknown".to_string())),
        }
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    // --- Profile Management ---

    async fn create_profile(&self, profile: NewProfile) -> PortResult<ChildProfile> {
        let record = sqlx::query_as::<_, ProfileRecord>(&format!(
            "INSERT INTO profiles (id, user_id, name, birth_date, category, teddy_name, \
             teddy_description, imaginary_world) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {PROFILE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(profile.user_id)
        .bind(&profile.name)
        .bind(profile.birth_date)
        .bind(profile.category.as_str())
        .bind(&profile.teddy_name)
        .bind(&profile.teddy_description)
        .bind(&profile.imaginary_world)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        record.to_domain()
    }

    async fn get_profile_by_id(&self, profile_id: Uuid) -> PortResult<ChildProfile> {
        let record = sqlx::query_as::<_, ProfileRecord>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = $1"
        ))
        .bind(profile_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found(e, || format!("Profile {} not found", profile_id)))?;
        record.to_domain()
    }

    async fn get_profiles_by_user(&self, user_id: Uuid) -> PortResult<Vec<ChildProfile>> {
        let records = sqlx::query_as::<_, ProfileRecord>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE user_id = $1 ORDER BY created_at ASC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn update_profile(
        &self,
        profile_id: Uuid,
        profile: NewProfile,
    ) -> PortResult<ChildProfile> {
        let record = sqlx::query_as::<_, ProfileRecord>(&format!(
            "UPDATE profiles SET name = $2, birth_date = $3, category = $4, teddy_name = $5, \
             teddy_description = $6, imaginary_world = $7, updated_at = now() \
             WHERE id = $1 RETURNING {PROFILE_COLUMNS}"
        ))
        .bind(profile_id)
        .bind(&profile.name)
        .bind(profile.birth_date)
        .bind(profile.category.as_str())
        .bind(&profile.teddy_name)
        .bind(&profile.teddy_description)
        .bind(&profile.imaginary_world)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found(e, || format!("Profile {} not found", profile_id)))?;
        record.to_domain()
    }

    async fn delete_profile(&self, profile_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM profiles WHERE id = $1")
            .bind(profile_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Profile {} not found",
                profile_id
            )));
        }
        Ok(())
    }

    async fn add_profile_photo(
        &self,
        profile_id: Uuid,
        url: &str,
        storage_path: &str,
    ) -> PortResult<ChildProfile> {
        let photo = serde_json::to_value(PhotoRecord {
            url: url.to_string(),
            storage_path: storage_path.to_string(),
            uploaded_at: Utc::now(),
        })
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let record = sqlx::query_as::<_, ProfileRecord>(&format!(
            "UPDATE profiles SET photos = photos || $2::jsonb, updated_at = now() \
             WHERE id = $1 RETURNING {PROFILE_COLUMNS}"
        ))
        .bind(profile_id)
        .bind(photo)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found(e, || format!("Profile {} not found", profile_id)))?;
        record.to_domain()
    }

    // --- Story Lifecycle ---

    async fn create_story(&self, story: NewStory) -> PortResult<Story> {
        let record = sqlx::query_as::<_, StoryRecord>(&format!(
            "INSERT INTO stories (id, author_id, title, objective, children_names, children_ids, \
             series_id, tome_number) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {STORY_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(story.author_id)
        .bind(&story.title)
        .bind(story.objective.as_str())
        .bind(&story.children_names)
        .bind(&story.children_ids)
        .bind(story.series_id)
        .bind(story.tome_number)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        record.to_domain()
    }

    async fn get_story_by_id(&self, story_id: Uuid) -> PortResult<Story> {
        let record = sqlx::query_as::<_, StoryRecord>(&format!(
            "SELECT {STORY_COLUMNS} FROM stories WHERE id = $1"
        ))
        .bind(story_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found(e, || format!("Story {} not found", story_id)))?;
        record.to_domain()
    }

    async fn get_stories_by_user(&self, user_id: Uuid) -> PortResult<Vec<Story>> {
        let records = sqlx::query_as::<_, StoryRecord>(&format!(
            "SELECT {STORY_COLUMNS} FROM stories WHERE author_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn transition_story(
        &self,
        story_id: Uuid,
        expected_version: i64,
        patch: StoryPatch,
    ) -> PortResult<Story> {
        // Read, validate the transition in the domain, then commit through a
        // single conditional write. The WHERE version clause makes the
        // compare-and-swap atomic; a concurrent writer leaves rows_affected at 0.
        let current = self.get_story_by_id(story_id).await?;
        if current.version != expected_version {
            return Err(PortError::Conflict {
                expected: expected_version,
                found: current.version,
            });
        }

        let next = current.apply_patch(&patch, Utc::now())?;

        let result = sqlx::query(
            "UPDATE stories SET title = $3, story_text = $4, preview = $5, \
             status = $6, error = $7, word_count = $8, is_favorite = $9, next_story_id = $10, \
             sound_id = $11, version = version + 1, updated_at = $12 \
             WHERE id = $1 AND version = $2",
        )
        .bind(story_id)
        .bind(expected_version)
        .bind(&next.title)
        .bind(&next.story_text)
        .bind(&next.preview)
        .bind(next.status.as_str())
        .bind(&next.error)
        .bind(next.word_count)
        .bind(next.is_favorite)
        .bind(next.next_story_id)
        .bind(next.sound_id)
        .bind(next.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            // Lost the race between our read and the conditional write.
            let found = self.get_story_by_id(story_id).await?.version;
            return Err(PortError::Conflict {
                expected: expected_version,
                found,
            });
        }
        Ok(next)
    }

    async fn delete_story(&self, story_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM stories WHERE id = $1")
            .bind(story_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Story {} not found", story_id)));
        }
        Ok(())
    }

    async fn get_stale_pending_stories(&self, cutoff: DateTime<Utc>) -> PortResult<Vec<Story>> {
        let records = sqlx::query_as::<_, StoryRecord>(&format!(
            "SELECT {STORY_COLUMNS} FROM stories \
             WHERE status = $1 AND created_at < $2 ORDER BY created_at ASC"
        ))
        .bind(StoryStatus::Pending.as_str())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }

    // --- Sharing ---

    async fn create_story_share(
        &self,
        story_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> PortResult<StoryShare> {
        let record = sqlx::query_as::<_, ShareRecord>(
            "INSERT INTO story_shares (token, story_id, expires_at) VALUES ($1, $2, $3) \
             RETURNING token, story_id, expires_at, created_at",
        )
        .bind(token)
        .bind(story_id)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(record.to_domain())
    }

    async fn get_story_by_share_token(&self, token: &str) -> PortResult<Story> {
        let record = sqlx::query_as::<_, StoryRecord>(
            "SELECT s.id, s.author_id, s.title, s.story_text, s.preview, \
             s.objective, s.children_names, s.children_ids, s.status, s.error, s.word_count, \
             s.is_favorite, s.series_id, s.tome_number, s.next_story_id, s.sound_id, s.version, \
             s.created_at, s.updated_at \
             FROM stories s JOIN story_shares sh ON sh.story_id = s.id \
             WHERE sh.token = $1 AND sh.expires_at > now()",
        )
        .bind(token)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found(e, || "Share link not found or expired".to_string()))?;
        record.to_domain()
    }
}
