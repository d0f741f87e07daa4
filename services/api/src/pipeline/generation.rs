//! services/api/src/pipeline/generation.rs
//!
//! The retry wrapper around the story-generation provider call. Owns the
//! bounded-attempt policy, exponential backoff on transient failures, and the
//! forbidden-marker validation of returned text.

use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use storyweaver_core::domain::{GeneratedStory, StoryPrompt};
use storyweaver_core::ports::{PortError, PortResult, StoryGenerationService};
use tracing::{info, warn};

/// Retry knobs for a single logical generation call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Base for the exponential backoff: the wait before attempt `n`
    /// (zero-indexed) is `initial_delay * 2^n`.
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
        }
    }
}

/// Everything the caller needs to persist a finished generation.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub story_text: String,
    /// First ~200 characters, for list views.
    pub preview: String,
    pub word_count: u32,
    /// How many provider calls this logical call took (1 = first try).
    pub attempts: u32,
    pub token_usage: Option<u32>,
    pub elapsed: Duration,
}

/// Obtains final story text from the provider, tolerating transient failures.
///
/// Does not touch storage; recording the outcome is the caller's job.
#[derive(Clone)]
pub struct GenerationClient {
    generator: Arc<dyn StoryGenerationService>,
    policy: RetryPolicy,
}

impl GenerationClient {
    pub fn new(generator: Arc<dyn StoryGenerationService>, policy: RetryPolicy) -> Self {
        Self { generator, policy }
    }

    /// Runs the provider call under the retry policy.
    ///
    /// Rate-limit and transient errors back off exponentially before the next
    /// attempt; a completion carrying forbidden markers counts as a failed
    /// attempt but retries immediately; auth errors abort with no retry. When
    /// all attempts are exhausted the last error is surfaced.
    pub async fn generate(&self, prompt: &StoryPrompt) -> PortResult<GenerationOutcome> {
        let started = tokio::time::Instant::now();
        let mut last_err: Option<PortError> = None;
        let mut backoff_next = false;

        for attempt in 0..self.policy.max_attempts {
            if attempt > 0 && backoff_next {
                let delay = self.policy.initial_delay * 2u32.pow(attempt);
                info!(attempt, delay_ms = delay.as_millis() as u64, "Backing off before retry");
                tokio::time::sleep(delay).await;
            }
            backoff_next = false;

            match self.generator.generate_story(prompt).await {
                Ok(generated) => match validate_story_text(&generated.text) {
                    Ok(()) => return Ok(self.finish(generated, attempt + 1, started)),
                    Err(e) => {
                        warn!(attempt, error = %e, "Generated text failed validation, retrying");
                        last_err = Some(e);
                    }
                },
                Err(e) if e.is_retryable() => {
                    warn!(attempt, error = %e, "Transient provider failure");
                    backoff_next = true;
                    last_err = Some(e);
                }
                // Auth and validation errors are not transient; abort immediately.
                Err(e) => return Err(e),
            }
        }

        Err(last_err
            .unwrap_or_else(|| PortError::Unexpected("generation produced no result".to_string())))
    }

    fn finish(
        &self,
        generated: GeneratedStory,
        attempts: u32,
        started: tokio::time::Instant,
    ) -> GenerationOutcome {
        let word_count = generated.text.split_whitespace().count() as u32;
        GenerationOutcome {
            preview: preview_of(&generated.text),
            story_text: generated.text,
            word_count,
            attempts,
            token_usage: generated.token_usage,
            elapsed: started.elapsed(),
        }
    }
}

/// Length of the preview excerpt kept alongside the full text.
const PREVIEW_CHARS: usize = 200;

/// First ~200 characters of the text, cut on a character boundary.
pub fn preview_of(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

fn forbidden_markers() -> &'static Regex {
    static MARKERS: OnceLock<Regex> = OnceLock::new();
    MARKERS.get_or_init(|| {
        // Chapter headers, markdown headings, or an explicit "Title:" line.
        Regex::new(r"(?mi)^\s*(chapter\s+\d+|chapitre\s+\d+|#{1,6}\s|title\s*:)")
            .expect("forbidden-marker pattern is valid")
    })
}

/// Rejects completions that ignored the format constraints.
///
/// A leading title line (short first line with no sentence punctuation,
/// followed by a blank line) is treated the same as an explicit marker.
pub fn validate_story_text(text: &str) -> PortResult<()> {
    if text.trim().is_empty() {
        return Err(PortError::Transient(
            "provider returned an empty story".to_string(),
        ));
    }
    if forbidden_markers().is_match(text) {
        return Err(PortError::Transient(
            "story contains chapter headers or a title line".to_string(),
        ));
    }

    let mut lines = text.trim_start().lines();
    if let Some(first) = lines.next() {
        let first = first.trim();
        let looks_like_title = first.split_whitespace().count() <= 8
            && !first.ends_with(['.', '!', '?', ',', ';', ':'])
            && lines.next().map(|l| l.trim().is_empty()).unwrap_or(false);
        if looks_like_title {
            return Err(PortError::Transient(
                "story starts with a bare title line".to_string(),
            ));
        }
    }
    Ok(())
}
