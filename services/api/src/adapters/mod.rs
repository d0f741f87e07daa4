pub mod db;
pub mod notifier;
pub mod story_llm;
pub mod title_llm;

pub use db::DbAdapter;
pub use notifier::ChannelNotifier;
pub use story_llm::OpenAiStoryAdapter;
pub use title_llm::OpenAiTitleAdapter;

use async_openai::error::{ApiError, OpenAIError};
use storyweaver_core::ports::PortError;

/// Normalizes a raw provider error into the closed `PortError` taxonomy.
///
/// This is the single place where provider error strings are inspected;
/// everything downstream switches on the enum.
pub(crate) fn normalize_openai_error(error: OpenAIError) -> PortError {
    match error {
        OpenAIError::ApiError(api) => classify_api_error(&api),
        OpenAIError::Reqwest(e) => PortError::Transient(format!("network error: {e}")),
        other => PortError::Unexpected(other.to_string()),
    }
}

fn classify_api_error(api: &ApiError) -> PortError {
    let code = api.code.as_deref().unwrap_or_default();
    let kind = api.r#type.as_deref().unwrap_or_default();

    if code.contains("rate_limit") || kind.contains("rate_limit") || kind == "insufficient_quota" {
        return PortError::RateLimited;
    }
    if code.contains("invalid_api_key")
        || kind.contains("authentication")
        || kind == "invalid_request_error" && code.contains("api_key")
    {
        return PortError::Auth(api.message.clone());
    }
    if kind == "server_error" || kind.contains("overloaded") {
        return PortError::Transient(api.message.clone());
    }
    PortError::Unexpected(api.message.clone())
}
