//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{ChannelNotifier, DbAdapter, OpenAiStoryAdapter, OpenAiTitleAdapter},
    config::Config,
    error::ApiError,
    pipeline::{GenerationClient, LengthTargets, RecoverySweeper, RetryPolicy, StoryService},
    web::{
        auth::{login_handler, logout_handler, signup_handler},
        require_auth,
        rest::{
            add_profile_photo_handler, create_profile_handler, create_sequel_handler,
            create_story_handler, delete_profile_handler, delete_story_handler,
            get_profile_handler, get_shared_story_handler, get_story_handler,
            list_profiles_handler, list_stories_handler, mark_read_handler,
            regenerate_story_handler, rename_story_handler, retry_story_handler,
            set_favorite_handler, share_story_handler, suggest_titles_handler,
            update_profile_handler, ApiDoc,
        },
        ws_handler, AppState,
    },
};
use async_openai::{config::OpenAIConfig, Client};
use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool.clone()));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let openai_config = OpenAIConfig::new().with_api_key(
        config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?,
    );
    let openai_client = Client::with_config(openai_config);

    let story_adapter = Arc::new(OpenAiStoryAdapter::new(
        openai_client.clone(),
        config.story_model.clone(),
    ));
    let title_adapter = Arc::new(OpenAiTitleAdapter::new(
        openai_client.clone(),
        config.title_model.clone(),
    ));
    let notifier = Arc::new(ChannelNotifier::new());

    // --- 4. Build the Story Pipeline ---
    let generation = GenerationClient::new(
        story_adapter,
        RetryPolicy {
            max_attempts: config.max_generation_retries,
            initial_delay: config.initial_retry_delay,
        },
    );
    let stories = StoryService::new(
        db_adapter.clone(),
        generation,
        notifier.clone(),
        LengthTargets {
            story: config.story_words,
            sequel: config.sequel_words,
        },
    );

    let shutdown = CancellationToken::new();
    let sweeper = RecoverySweeper::new(stories.clone(), db_adapter.clone(), config.sweeper);
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown.clone()));

    // --- 5. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        db: db_adapter,
        config: config.clone(),
        stories,
        title_adapter,
    });

    let cors = CorsLayer::new()
        .allow_origin("http://localhost:3000".parse::<HeaderValue>().map_err(
            |e| ApiError::Internal(format!("Invalid CORS origin: {e}")),
        )?)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 6. Create the Web Router ---
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/shared/{token}", get(get_shared_story_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/stories", post(create_story_handler).get(list_stories_handler))
        .route(
            "/stories/{id}",
            get(get_story_handler).delete(delete_story_handler),
        )
        .route("/stories/{id}/retry", post(retry_story_handler))
        .route("/stories/{id}/regenerate", post(regenerate_story_handler))
        .route("/stories/{id}/sequel", post(create_sequel_handler))
        .route("/stories/{id}/read", post(mark_read_handler))
        .route("/stories/{id}/favorite", put(set_favorite_handler))
        .route("/stories/{id}/title", put(rename_story_handler))
        .route("/stories/{id}/titles", get(suggest_titles_handler))
        .route("/stories/{id}/share", post(share_story_handler))
        .route(
            "/profiles",
            post(create_profile_handler).get(list_profiles_handler),
        )
        .route(
            "/profiles/{id}",
            get(get_profile_handler)
                .put(update_profile_handler)
                .delete(delete_profile_handler),
        )
        .route("/profiles/{id}/photos", post(add_profile_photo_handler))
        .route("/ws", get(ws_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    // Combine API routes
    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    // Stop the background sweeper before exiting.
    shutdown.cancel();
    let _ = sweeper_handle.await;

    Ok(())
}
