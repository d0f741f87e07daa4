pub mod auth;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

// Re-export the pieces the binary needs to build the router.
pub use middleware::require_auth;
pub use state::AppState;
pub use ws_handler::ws_handler;
