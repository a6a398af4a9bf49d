//! Content generation for placeholders
//!
//! Builds a prompt from the placeholder, its context, the fused chunks and
//! optional user guidance, then asks the generation service for plain text.

use crate::placeholder::PlaceholderContext;
use docfill_common::errors::Result;
use docfill_common::generation::{Generator, ImageInput};
use docfill_common::metrics;
use docfill_search::Chunk;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub const FLOW_PROMPT: &str = "Describe the following process flow image in detail.";

pub const FLOW_UNAVAILABLE: &str = "Process flow description unavailable";

/// Per-request guidance shared by every placeholder of a task
#[derive(Debug, Clone, Default)]
pub struct Guidance {
    pub user_prompt: Option<String>,
    pub flow_summary: Option<String>,
}

/// Render chunks as one block, highest score first as given
pub fn format_chunks(chunks: &[Chunk]) -> String {
    chunks.iter().map(Chunk::render).collect::<Vec<_>>().join("\n\n")
}

fn length_rule(context: PlaceholderContext) -> &'static str {
    match context {
        PlaceholderContext::Table => "Produce concise output: 1-3 sentences or a few short bullets.",
        PlaceholderContext::Section => "Produce detailed, structured text covering the topic fully.",
    }
}

/// Assemble the generation prompt
pub fn build_prompt(
    token: &str,
    context: PlaceholderContext,
    chunks: &[Chunk],
    guidance: &Guidance,
) -> String {
    format!(
        "You fill placeholders in document templates using the provided context.\n\
         \n\
         Placeholder: {token}\n\
         Context type: {context}\n\
         \n\
         Retrieved context:\n{retrieved}\n\
         \n\
         User guidance: {user}\n\
         Process flow summary: {flow}\n\
         \n\
         Rules:\n\
         - {length}\n\
         - Output plain text only. No markdown, no asterisks, no code fences.\n\
         - Separate paragraphs with a blank line.\n\
         - Use the user guidance and process flow summary where relevant.\n\
         - If information is missing, use reasonable domain knowledge.\n",
        token = token,
        context = context.as_str(),
        retrieved = format_chunks(chunks),
        user = guidance.user_prompt.as_deref().unwrap_or(""),
        flow = guidance.flow_summary.as_deref().unwrap_or(""),
        length = length_rule(context),
    )
}

/// Remove a surrounding ``` fence (with optional language tag)
pub fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };

    // Drop the language tag line, if any
    let body = match rest.split_once('\n') {
        Some((tag, body)) if !tag.trim().contains(' ') => body,
        _ => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
        .to_string()
}

/// Generates replacement text for placeholders
#[derive(Clone)]
pub struct ContentGenerator {
    generator: Arc<dyn Generator>,
}

impl ContentGenerator {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    /// Generate text for one placeholder. Collaborator failures propagate.
    #[instrument(skip(self, chunks, guidance), fields(context = context.as_str(), chunks = chunks.len()))]
    pub async fn generate(
        &self,
        token: &str,
        context: PlaceholderContext,
        chunks: &[Chunk],
        guidance: &Guidance,
    ) -> Result<String> {
        let prompt = build_prompt(token, context, chunks, guidance);
        debug!(prompt_len = prompt.len(), "Prompt assembled");

        let text = self.generator.generate(&prompt, None).await?;
        metrics::record_placeholder(context.as_str());
        Ok(strip_code_fence(&text))
    }

    /// Describe an attached process-flow diagram once per task
    pub async fn summarize_flow(&self, image: &ImageInput) -> Result<String> {
        let description = self.generator.generate(FLOW_PROMPT, Some(image)).await?;
        let description = strip_code_fence(&description);
        if description.is_empty() {
            warn!("Process flow description came back empty");
            return Ok(FLOW_UNAVAILABLE.to_string());
        }
        Ok(description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docfill_common::errors::AppError;
    use docfill_search::ChunkKind;
    use std::sync::Mutex;

    /// Records prompts and replies with a fixed string
    struct Recording {
        reply: String,
        prompts: Mutex<Vec<(String, bool)>>,
    }

    impl Recording {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Generator for Recording {
        async fn generate(&self, prompt: &str, image: Option<&ImageInput>) -> Result<String> {
            self.prompts
                .lock()
                .unwrap()
                .push((prompt.to_string(), image.is_some()));
            Ok(self.reply.clone())
        }

        fn model_name(&self) -> &str {
            "recording"
        }
    }

    struct Down;

    #[async_trait]
    impl Generator for Down {
        async fn generate(&self, _prompt: &str, _image: Option<&ImageInput>) -> Result<String> {
            Err(AppError::GenerationFailure {
                message: "timeout".into(),
            })
        }

        fn model_name(&self) -> &str {
            "down"
        }
    }

    fn chunk(text: &str, kind: ChunkKind, score: f32) -> Chunk {
        Chunk {
            id: text.to_string(),
            source_id: "s1".into(),
            text: text.into(),
            kind,
            score,
        }
    }

    #[test]
    fn test_prompt_verbosity_follows_context() {
        let guidance = Guidance::default();
        let table = build_prompt("owner", PlaceholderContext::Table, &[], &guidance);
        let section = build_prompt("owner", PlaceholderContext::Section, &[], &guidance);

        assert!(table.contains("concise"));
        assert!(!table.contains("detailed"));
        assert!(section.contains("detailed"));
        assert!(!section.contains("concise"));
    }

    #[test]
    fn test_prompt_carries_inputs() {
        let chunks = vec![
            chunk("valves every six months", ChunkKind::Text, 0.9),
            chunk("| V1 | 6m |", ChunkKind::Table, 0.4),
        ];
        let guidance = Guidance {
            user_prompt: Some("Plant B only".into()),
            flow_summary: Some("Intake then filtration".into()),
        };
        let prompt = build_prompt("maintenance plan", PlaceholderContext::Section, &chunks, &guidance);

        assert!(prompt.contains("Placeholder: maintenance plan"));
        assert!(prompt.contains("Document: valves every six months\n\nTable Data: | V1 | 6m |"));
        assert!(prompt.contains("Plant B only"));
        assert!(prompt.contains("Intake then filtration"));
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\nhello\n```"), "hello");
        assert_eq!(strip_code_fence("```\nA.\n\nB.\n```\n"), "A.\n\nB.");
        assert_eq!(strip_code_fence("  plain text "), "plain text");
        assert_eq!(strip_code_fence("```inline```"), "inline");
    }

    #[tokio::test]
    async fn test_generate_strips_fence() {
        let recording = Recording::new("```\nFilled.\n```");
        let generator = ContentGenerator::new(recording.clone());
        let text = generator
            .generate("x", PlaceholderContext::Table, &[], &Guidance::default())
            .await
            .unwrap();

        assert_eq!(text, "Filled.");
        assert!(!recording.prompts.lock().unwrap()[0].1);
    }

    #[tokio::test]
    async fn test_generation_failure_propagates() {
        let generator = ContentGenerator::new(Arc::new(Down));
        let err = generator
            .generate("x", PlaceholderContext::Section, &[], &Guidance::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::GenerationFailure { .. }));
    }

    #[tokio::test]
    async fn test_flow_summary_sends_image() {
        let recording = Recording::new("Step one, then two.");
        let generator = ContentGenerator::new(recording.clone());
        let image = ImageInput::new("image/png", vec![1, 2, 3]);

        let summary = generator.summarize_flow(&image).await.unwrap();
        assert_eq!(summary, "Step one, then two.");

        let prompts = recording.prompts.lock().unwrap();
        assert_eq!(prompts[0].0, FLOW_PROMPT);
        assert!(prompts[0].1);
    }

    #[tokio::test]
    async fn test_empty_flow_summary_falls_back() {
        let generator = ContentGenerator::new(Recording::new("   "));
        let image = ImageInput::new("image/png", vec![1]);
        assert_eq!(generator.summarize_flow(&image).await.unwrap(), FLOW_UNAVAILABLE);
    }
}
