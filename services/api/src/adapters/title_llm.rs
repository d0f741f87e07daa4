//! services/api/src/adapters/title_llm.rs
//!
//! Adapter for the title-generation LLM. Candidate titles are ephemeral:
//! they live client-side until the user commits one to a story.

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use storyweaver_core::domain::{GeneratedTitle, StoryPrompt};
use storyweaver_core::ports::{PortError, PortResult, TitleGenerationService};

use super::normalize_openai_error;

const SYSTEM_INSTRUCTIONS: &str = "You are a title generator for children's stories. \
Given the story's purpose and the children's names, propose 3 candidate titles. \
Each title is at most 6 words. Respond with one candidate per line in the form \
'title | one-sentence description', nothing else.";

pub struct OpenAiTitleAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiTitleAdapter {
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }

    /// Parses the "title | description" line format, tolerating missing
    /// descriptions and stray blank lines.
    fn parse_candidates(raw: &str) -> Vec<GeneratedTitle> {
        raw.lines()
            .filter_map(|line| {
                let line = line.trim().trim_start_matches(['-', '*', ' ']);
                if line.is_empty() {
                    return None;
                }
                let (title, description) = match line.split_once('|') {
                    Some((t, d)) => (t.trim(), Some(d.trim().to_string())),
                    None => (line, None),
                };
                if title.is_empty() {
                    return None;
                }
                Some(GeneratedTitle {
                    title: title.trim_matches('"').to_string(),
                    description: description.filter(|d| !d.is_empty()),
                })
            })
            .collect()
    }
}

#[async_trait]
impl TitleGenerationService for OpenAiTitleAdapter {
    async fn generate_titles(&self, prompt: &StoryPrompt) -> PortResult<Vec<GeneratedTitle>> {
        let names = prompt.children_names.join(", ");
        let messages = vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(SYSTEM_INSTRUCTIONS)
                    .build()
                    .map_err(|e| PortError::Unexpected(e.to_string()))?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(format!(
                        "Purpose: {}. Heroes: {}.",
                        prompt.objective, names
                    ))
                    .build()
                    .map_err(|e| PortError::Unexpected(e.to_string()))?,
            ),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .max_tokens(120u32)
            .temperature(0.9)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(normalize_openai_error)?;

        let raw = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| PortError::Transient("no titles generated".to_string()))?;

        let candidates = Self::parse_candidates(&raw);
        if candidates.is_empty() {
            return Err(PortError::Transient(
                "provider returned no usable titles".to_string(),
            ));
        }
        Ok(candidates)
    }
}
