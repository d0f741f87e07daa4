//! services/api/src/adapters/story_llm.rs
//!
//! This module contains the adapter for the story-generation LLM.
//! It implements the `StoryGenerationService` port from the `core` crate.

const SYSTEM_INSTRUCTIONS: &str = r#"You are a storyteller writing personalized bedtime and daytime stories for young children.

Rules for every story you write:
- Write one continuous story with NO chapter headers, NO section breaks and NO numbered parts.
- Do NOT put a title on the first line. Start directly with the story itself.
- Do NOT use markdown headings, bullet points or any formatting markers.
- The children named in the request are the heroes of the story. Use their names naturally and often.
- Keep the vocabulary gentle and age-appropriate. No violence, no scary imagery, no sadness without comfort.
- The story must have a clear beginning, a small adventure or discovery in the middle, and a warm, soothing ending.

Tone by objective:
- sleep: calm, slow, softly repetitive; wind the story down towards rest.
- focus: curious and steady; the heroes solve a small puzzle step by step.
- relax: light and dreamy; nothing urgent ever happens.
- fun: playful and silly; gentle humor the child will giggle at.

Respect the requested word range as closely as you can."#;

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use storyweaver_core::domain::{GeneratedStory, StoryPrompt};
use storyweaver_core::ports::{PortError, PortResult, StoryGenerationService};

use super::normalize_openai_error;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `StoryGenerationService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiStoryAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiStoryAdapter {
    /// Creates a new `OpenAiStoryAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }

    fn build_user_prompt(prompt: &StoryPrompt) -> String {
        let names = prompt.children_names.join(", ");
        let mut text = format!(
            "Write a {} story for: {}.\nTarget length: between {} and {} words.",
            prompt.objective, names, prompt.word_target.min, prompt.word_target.max
        );
        if let Some(series) = &prompt.series {
            text.push_str(&format!(
                "\nThis is tome {} of an ongoing series. The previous story was titled \"{}\".",
                series.tome_number, series.previous_title
            ));
            if let Some(recap) = &series.previous_recap {
                text.push_str(&format!(
                    " Here is how it began: {}\nContinue the same world and characters.",
                    recap
                ));
            }
        }
        text
    }
}

//=========================================================================================
// `StoryGenerationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl StoryGenerationService for OpenAiStoryAdapter {
    async fn generate_story(&self, prompt: &StoryPrompt) -> PortResult<GeneratedStory> {
        let messages = vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(SYSTEM_INSTRUCTIONS)
                    .build()
                    .map_err(|e| PortError::Unexpected(e.to_string()))?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(Self::build_user_prompt(prompt))
                    .build()
                    .map_err(|e| PortError::Unexpected(e.to_string()))?,
            ),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(0.8)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(normalize_openai_error)?;

        let token_usage = response.usage.as_ref().map(|u| u.total_tokens);

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                PortError::Transient("provider returned an empty completion".to_string())
            })?;

        Ok(GeneratedStory {
            text: text.trim().to_string(),
            token_usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyweaver_core::domain::{Objective, SeriesContext, WordTarget};

    #[test]
    fn sequel_prompt_carries_the_predecessor_recap() {
        let prompt = StoryPrompt {
            objective: Objective::Sleep,
            children_names: vec!["Luna".to_string(), "Max".to_string()],
            word_target: WordTarget { min: 6000, max: 10000 },
            series: Some(SeriesContext {
                previous_title: "The Sleepy Star".to_string(),
                previous_recap: Some("Luna followed a star to dreamland.".to_string()),
                tome_number: 2,
            }),
        };

        let text = OpenAiStoryAdapter::build_user_prompt(&prompt);
        assert!(text.contains("tome 2"));
        assert!(text.contains("\"The Sleepy Star\""));
        assert!(text.contains("Luna followed a star to dreamland."));
    }

    #[test]
    fn first_story_prompt_has_no_series_section() {
        let prompt = StoryPrompt {
            objective: Objective::Fun,
            children_names: vec!["Luna".to_string()],
            word_target: WordTarget { min: 2000, max: 3000 },
            series: None,
        };

        let text = OpenAiStoryAdapter::build_user_prompt(&prompt);
        assert!(!text.contains("tome"));
        assert!(text.contains("between 2000 and 3000 words"));
    }
}
