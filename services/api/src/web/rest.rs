//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storyweaver_core::domain::{
    ChildProfile, EventSource, NewProfile, Story, StoryPrompt, StoryShare,
};
use storyweaver_core::ports::PortError;
use tracing::error;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use crate::pipeline::StoryService;
use crate::web::state::AppState;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        create_story_handler,
        list_stories_handler,
        get_story_handler,
        retry_story_handler,
        regenerate_story_handler,
        create_sequel_handler,
        mark_read_handler,
        set_favorite_handler,
        rename_story_handler,
        suggest_titles_handler,
        delete_story_handler,
        share_story_handler,
        get_shared_story_handler,
        create_profile_handler,
        list_profiles_handler,
        get_profile_handler,
        update_profile_handler,
        delete_profile_handler,
        add_profile_photo_handler,
    ),
    components(
        schemas(
            CreateStoryRequest,
            StoryResponse,
            FavoriteRequest,
            RenameRequest,
            TitleSuggestion,
            ShareRequest,
            ShareResponse,
            ProfileRequest,
            ProfileResponse,
            PhotoResponse,
            AddPhotoRequest,
        )
    ),
    tags(
        (name = "StoryWeaver API", description = "API endpoints for personalized children's stories.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct CreateStoryRequest {
    /// One of: sleep, focus, relax, fun.
    pub objective: String,
    /// Profile ids of the characters appearing in the story.
    pub children_ids: Vec<Uuid>,
}

#[derive(Serialize, ToSchema)]
pub struct StoryResponse {
    pub id: Uuid,
    pub title: String,
    pub status: String,
    pub objective: String,
    pub children_names: Vec<String>,
    pub preview: String,
    pub story_text: String,
    pub error: Option<String>,
    pub word_count: i32,
    pub is_favorite: bool,
    pub series_id: Option<Uuid>,
    pub tome_number: Option<i32>,
    pub next_story_id: Option<Uuid>,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

impl From<Story> for StoryResponse {
    fn from(story: Story) -> Self {
        Self {
            id: story.id,
            title: story.title,
            status: story.status.to_string(),
            objective: story.objective.to_string(),
            children_names: story.children_names,
            preview: story.preview,
            story_text: story.story_text,
            error: story.error,
            word_count: story.word_count,
            is_favorite: story.is_favorite,
            series_id: story.series_id,
            tome_number: story.tome_number,
            next_story_id: story.next_story_id,
            created_at: story.created_at,
            updated_at: story.updated_at,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct FavoriteRequest {
    pub is_favorite: bool,
}

#[derive(Deserialize, ToSchema)]
pub struct RenameRequest {
    pub title: String,
}

#[derive(Serialize, ToSchema)]
pub struct TitleSuggestion {
    pub title: String,
    pub description: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct ShareRequest {
    /// Days until the link expires. Defaults to 30.
    pub ttl_days: Option<i64>,
}

#[derive(Serialize, ToSchema)]
pub struct ShareResponse {
    pub token: String,
    pub expires_at: chrono::DateTime<Utc>,
}

impl From<StoryShare> for ShareResponse {
    fn from(share: StoryShare) -> Self {
        Self {
            token: share.token,
            expires_at: share.expires_at,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct ProfileRequest {
    pub name: String,
    pub birth_date: chrono::NaiveDate,
    /// One of: child, adult, pet.
    pub category: String,
    pub teddy_name: Option<String>,
    pub teddy_description: Option<String>,
    pub imaginary_world: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct PhotoResponse {
    pub url: String,
    pub uploaded_at: chrono::DateTime<Utc>,
}

#[derive(Serialize, ToSchema)]
pub struct ProfileResponse {
    pub id: Uuid,
    pub name: String,
    pub birth_date: chrono::NaiveDate,
    pub age_years: i32,
    pub category: String,
    pub teddy_name: Option<String>,
    pub teddy_description: Option<String>,
    pub imaginary_world: Option<String>,
    pub photos: Vec<PhotoResponse>,
    pub created_at: chrono::DateTime<Utc>,
}

impl From<ChildProfile> for ProfileResponse {
    fn from(profile: ChildProfile) -> Self {
        let age_years = profile.age_years(Utc::now().date_naive());
        Self {
            id: profile.id,
            name: profile.name,
            birth_date: profile.birth_date,
            age_years,
            category: profile.category.as_str().to_string(),
            teddy_name: profile.teddy_name,
            teddy_description: profile.teddy_description,
            imaginary_world: profile.imaginary_world,
            photos: profile
                .photos
                .into_iter()
                .map(|p| PhotoResponse {
                    url: p.url,
                    uploaded_at: p.uploaded_at,
                })
                .collect(),
            created_at: profile.created_at,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct AddPhotoRequest {
    pub url: String,
    pub storage_path: String,
}

//=========================================================================================
// Error Mapping
//=========================================================================================

/// Maps a port error onto an HTTP status, hiding internals behind a generic
/// message where the taxonomy says nothing client-actionable.
fn port_error(context: &str, e: PortError) -> (StatusCode, String) {
    let status = match &e {
        PortError::NotFound(_) => StatusCode::NOT_FOUND,
        PortError::Validation(_) => StatusCode::BAD_REQUEST,
        PortError::Auth(_) => StatusCode::FORBIDDEN,
        PortError::Conflict { .. } | PortError::InvalidTransition { .. } => StatusCode::CONFLICT,
        PortError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        PortError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        PortError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        PortError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("{context}: {e:?}");
        (status, format!("Failed to {context}"))
    } else {
        (status, e.to_string())
    }
}

/// Spawns the generation pipeline for a story and forgets the handle; the
/// outcome reaches the client through the status row and the event channel.
fn spawn_generation(stories: Arc<StoryService>, story_id: Uuid, source: EventSource) {
    tokio::spawn(async move {
        if let Err(e) = stories.run_generation(story_id, source).await {
            error!(story_id = %story_id, error = %e, "Generation run failed");
        }
    });
}

//=========================================================================================
// Story Handlers
//=========================================================================================

/// Create a story and start generating it in the background.
#[utoipa::path(
    post,
    path = "/stories",
    request_body = CreateStoryRequest,
    responses(
        (status = 202, description = "Story accepted and generating", body = StoryResponse),
        (status = 400, description = "Invalid objective or character list"),
        (status = 403, description = "A character belongs to another user")
    )
)]
pub async fn create_story_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<CreateStoryRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let story = state
        .stories
        .create_story(user_id, &req.objective, &req.children_ids)
        .await
        .map_err(|e| port_error("create story", e))?;

    spawn_generation(state.stories.clone(), story.id, EventSource::Generation);
    Ok((StatusCode::ACCEPTED, Json(StoryResponse::from(story))))
}

/// List the authenticated user's stories, newest first.
#[utoipa::path(
    get,
    path = "/stories",
    responses(
        (status = 200, description = "The user's story library", body = [StoryResponse])
    )
)]
pub async fn list_stories_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let stories = state
        .stories
        .list_stories(user_id)
        .await
        .map_err(|e| port_error("list stories", e))?;
    let body: Vec<StoryResponse> = stories.into_iter().map(StoryResponse::from).collect();
    Ok(Json(body))
}

/// Fetch one story, including its full text.
#[utoipa::path(
    get,
    path = "/stories/{id}",
    params(("id" = Uuid, Path, description = "Story id")),
    responses(
        (status = 200, description = "The story", body = StoryResponse),
        (status = 404, description = "No such story")
    )
)]
pub async fn get_story_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let story = state
        .stories
        .get_story(id, user_id)
        .await
        .map_err(|e| port_error("get story", e))?;
    Ok(Json(StoryResponse::from(story)))
}

/// Retry a failed story.
#[utoipa::path(
    post,
    path = "/stories/{id}/retry",
    params(("id" = Uuid, Path, description = "Story id")),
    responses(
        (status = 202, description = "Retry accepted", body = StoryResponse),
        (status = 409, description = "Story is not in a retryable state")
    )
)]
pub async fn retry_story_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let story = state
        .stories
        .retry_story(id, user_id)
        .await
        .map_err(|e| port_error("retry story", e))?;

    spawn_generation(state.stories.clone(), story.id, EventSource::Generation);
    Ok((StatusCode::ACCEPTED, Json(StoryResponse::from(story))))
}

/// Regenerate a finished story from scratch.
#[utoipa::path(
    post,
    path = "/stories/{id}/regenerate",
    params(("id" = Uuid, Path, description = "Story id")),
    responses(
        (status = 202, description = "Regeneration accepted", body = StoryResponse),
        (status = 409, description = "Story is not in a terminal state")
    )
)]
pub async fn regenerate_story_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let story = state
        .stories
        .regenerate_story(id, user_id)
        .await
        .map_err(|e| port_error("regenerate story", e))?;

    spawn_generation(state.stories.clone(), story.id, EventSource::Regeneration);
    Ok((StatusCode::ACCEPTED, Json(StoryResponse::from(story))))
}

/// Create the next tome in a series and start generating it.
#[utoipa::path(
    post,
    path = "/stories/{id}/sequel",
    params(("id" = Uuid, Path, description = "The predecessor story id")),
    responses(
        (status = 202, description = "Sequel accepted and generating", body = StoryResponse),
        (status = 400, description = "Predecessor is not finished or already has a sequel")
    )
)]
pub async fn create_sequel_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let sequel = state
        .stories
        .create_sequel(id, user_id)
        .await
        .map_err(|e| port_error("create sequel", e))?;

    spawn_generation(state.stories.clone(), sequel.id, EventSource::Generation);
    Ok((StatusCode::ACCEPTED, Json(StoryResponse::from(sequel))))
}

/// Mark a completed story as read.
#[utoipa::path(
    post,
    path = "/stories/{id}/read",
    params(("id" = Uuid, Path, description = "Story id")),
    responses(
        (status = 200, description = "Story marked read", body = StoryResponse),
        (status = 409, description = "Story is not completed")
    )
)]
pub async fn mark_read_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let story = state
        .stories
        .mark_read(id, user_id)
        .await
        .map_err(|e| port_error("mark story read", e))?;
    Ok(Json(StoryResponse::from(story)))
}

/// Set or clear the favorite flag.
#[utoipa::path(
    put,
    path = "/stories/{id}/favorite",
    params(("id" = Uuid, Path, description = "Story id")),
    request_body = FavoriteRequest,
    responses(
        (status = 200, description = "Favorite flag updated", body = StoryResponse)
    )
)]
pub async fn set_favorite_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(id): Path<Uuid>,
    Json(req): Json<FavoriteRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let story = state
        .stories
        .set_favorite(id, user_id, req.is_favorite)
        .await
        .map_err(|e| port_error("update favorite", e))?;
    Ok(Json(StoryResponse::from(story)))
}

/// Commit a chosen title for the story.
#[utoipa::path(
    put,
    path = "/stories/{id}/title",
    params(("id" = Uuid, Path, description = "Story id")),
    request_body = RenameRequest,
    responses(
        (status = 200, description = "Title updated", body = StoryResponse),
        (status = 400, description = "Empty title")
    )
)]
pub async fn rename_story_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(id): Path<Uuid>,
    Json(req): Json<RenameRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let story = state
        .stories
        .rename_story(id, user_id, &req.title)
        .await
        .map_err(|e| port_error("rename story", e))?;
    Ok(Json(StoryResponse::from(story)))
}

/// Generate candidate titles for a story. Nothing is stored; the client sends
/// the chosen one back through the title endpoint.
#[utoipa::path(
    get,
    path = "/stories/{id}/titles",
    params(("id" = Uuid, Path, description = "Story id")),
    responses(
        (status = 200, description = "Candidate titles", body = [TitleSuggestion]),
        (status = 503, description = "Title provider unavailable")
    )
)]
pub async fn suggest_titles_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let story = state
        .stories
        .get_story(id, user_id)
        .await
        .map_err(|e| port_error("get story", e))?;

    let prompt = StoryPrompt {
        objective: story.objective,
        children_names: story.children_names,
        word_target: state.config.story_words,
        series: None,
    };
    let titles = state
        .title_adapter
        .generate_titles(&prompt)
        .await
        .map_err(|e| port_error("generate titles", e))?;

    let body: Vec<TitleSuggestion> = titles
        .into_iter()
        .map(|t| TitleSuggestion {
            title: t.title,
            description: t.description,
        })
        .collect();
    Ok(Json(body))
}

/// Delete a story.
#[utoipa::path(
    delete,
    path = "/stories/{id}",
    params(("id" = Uuid, Path, description = "Story id")),
    responses(
        (status = 204, description = "Story deleted"),
        (status = 404, description = "No such story")
    )
)]
pub async fn delete_story_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .stories
        .delete_story(id, user_id)
        .await
        .map_err(|e| port_error("delete story", e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Issue a public share link for a story.
#[utoipa::path(
    post,
    path = "/stories/{id}/share",
    params(("id" = Uuid, Path, description = "Story id")),
    request_body = ShareRequest,
    responses(
        (status = 201, description = "Share link created", body = ShareResponse)
    )
)]
pub async fn share_story_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(id): Path<Uuid>,
    Json(req): Json<ShareRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let ttl = chrono::Duration::days(req.ttl_days.unwrap_or(30).clamp(1, 365));
    let share = state
        .stories
        .share_story(id, user_id, ttl)
        .await
        .map_err(|e| port_error("share story", e))?;
    Ok((StatusCode::CREATED, Json(ShareResponse::from(share))))
}

/// Fetch a story through a share token. Public; no session required.
#[utoipa::path(
    get,
    path = "/shared/{token}",
    params(("token" = String, Path, description = "Share token")),
    responses(
        (status = 200, description = "The shared story", body = StoryResponse),
        (status = 404, description = "Unknown or expired link")
    )
)]
pub async fn get_shared_story_handler(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let story = state
        .stories
        .get_shared_story(&token)
        .await
        .map_err(|e| port_error("fetch shared story", e))?;
    Ok(Json(StoryResponse::from(story)))
}

//=========================================================================================
// Profile Handlers
//=========================================================================================

async fn owned_profile(
    state: &Arc<AppState>,
    profile_id: Uuid,
    user_id: Uuid,
) -> Result<ChildProfile, (StatusCode, String)> {
    let profile = state
        .db
        .get_profile_by_id(profile_id)
        .await
        .map_err(|e| port_error("get profile", e))?;
    if profile.user_id != user_id {
        return Err((
            StatusCode::FORBIDDEN,
            "Profile does not belong to this user".to_string(),
        ));
    }
    Ok(profile)
}

fn profile_from_request(
    user_id: Uuid,
    req: ProfileRequest,
) -> Result<NewProfile, (StatusCode, String)> {
    if req.name.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Name must not be empty".to_string()));
    }
    let category = req
        .category
        .parse()
        .map_err(|e| port_error("parse profile category", e))?;
    Ok(NewProfile {
        user_id,
        name: req.name.trim().to_string(),
        birth_date: req.birth_date,
        category,
        teddy_name: req.teddy_name,
        teddy_description: req.teddy_description,
        imaginary_world: req.imaginary_world,
    })
}

/// Create a character profile.
#[utoipa::path(
    post,
    path = "/profiles",
    request_body = ProfileRequest,
    responses(
        (status = 201, description = "Profile created", body = ProfileResponse),
        (status = 400, description = "Invalid profile data")
    )
)]
pub async fn create_profile_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<ProfileRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let new_profile = profile_from_request(user_id, req)?;
    let profile = state
        .db
        .create_profile(new_profile)
        .await
        .map_err(|e| port_error("create profile", e))?;
    Ok((StatusCode::CREATED, Json(ProfileResponse::from(profile))))
}

/// List the authenticated user's profiles.
#[utoipa::path(
    get,
    path = "/profiles",
    responses(
        (status = 200, description = "The user's profiles", body = [ProfileResponse])
    )
)]
pub async fn list_profiles_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let profiles = state
        .db
        .get_profiles_by_user(user_id)
        .await
        .map_err(|e| port_error("list profiles", e))?;
    let body: Vec<ProfileResponse> = profiles.into_iter().map(ProfileResponse::from).collect();
    Ok(Json(body))
}

/// Fetch one profile.
#[utoipa::path(
    get,
    path = "/profiles/{id}",
    params(("id" = Uuid, Path, description = "Profile id")),
    responses(
        (status = 200, description = "The profile", body = ProfileResponse),
        (status = 404, description = "No such profile")
    )
)]
pub async fn get_profile_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let profile = owned_profile(&state, id, user_id).await?;
    Ok(Json(ProfileResponse::from(profile)))
}

/// Replace a profile's fields.
#[utoipa::path(
    put,
    path = "/profiles/{id}",
    params(("id" = Uuid, Path, description = "Profile id")),
    request_body = ProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = ProfileResponse),
        (status = 404, description = "No such profile")
    )
)]
pub async fn update_profile_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(id): Path<Uuid>,
    Json(req): Json<ProfileRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    owned_profile(&state, id, user_id).await?;
    let new_profile = profile_from_request(user_id, req)?;
    let profile = state
        .db
        .update_profile(id, new_profile)
        .await
        .map_err(|e| port_error("update profile", e))?;
    Ok(Json(ProfileResponse::from(profile)))
}

/// Delete a profile.
#[utoipa::path(
    delete,
    path = "/profiles/{id}",
    params(("id" = Uuid, Path, description = "Profile id")),
    responses(
        (status = 204, description = "Profile deleted"),
        (status = 404, description = "No such profile")
    )
)]
pub async fn delete_profile_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    owned_profile(&state, id, user_id).await?;
    state
        .db
        .delete_profile(id)
        .await
        .map_err(|e| port_error("delete profile", e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Attach an uploaded photo to a profile.
#[utoipa::path(
    post,
    path = "/profiles/{id}/photos",
    params(("id" = Uuid, Path, description = "Profile id")),
    request_body = AddPhotoRequest,
    responses(
        (status = 200, description = "Photo attached", body = ProfileResponse),
        (status = 404, description = "No such profile")
    )
)]
pub async fn add_profile_photo_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(id): Path<Uuid>,
    Json(req): Json<AddPhotoRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    owned_profile(&state, id, user_id).await?;
    let profile = state
        .db
        .add_profile_photo(id, &req.url, &req.storage_path)
        .await
        .map_err(|e| port_error("add profile photo", e))?;
    Ok(Json(ProfileResponse::from(profile)))
}
