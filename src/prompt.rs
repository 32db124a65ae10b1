//! Token-budgeted prompt assembly for the generation layer.
//!
//! The system prompt and user message are always included in full; only context chunks are
//! subject to budget-driven omission. Chunks arrive similarity-ranked and are appended
//! greedily in that order; the assembler never reorders or truncates a chunk mid-text.

use anyhow::Error as TokenizerError;
use thiserror::Error;
use tiktoken_rs::{CoreBPE, cl100k_base, get_bpe_from_model, o200k_base, p50k_base, r50k_base};

use crate::config::get_config;

/// System prompt applied when the chatbot has none configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer the user's \
    question using only the information from the provided document context. If the answer \
    is not in the context, say you don't know.";

/// Tokens reserved for the prompt template's fixed formatting.
const FORMAT_BUFFER_TOKENS: usize = 20;

/// Errors raised while assembling a prompt.
#[derive(Debug, Error)]
pub enum PromptError {
    /// Tokenizer resources were unavailable for the configured model.
    #[error("failed to initialize tokenizer for model '{model}': {source}")]
    Tokenizer {
        /// Model whose tokenizer failed to load.
        model: String,
        /// Underlying error raised by the tokenizer library.
        #[source]
        source: TokenizerError,
    },
}

/// Result of assembling a prompt within the token budget.
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    /// Final prompt text handed to the generative model.
    pub prompt: String,
    /// Declared response language for the answer.
    pub language: String,
    /// Number of context chunks that fit the budget.
    pub context_chunks_used: usize,
}

/// Builds generation prompts from retrieved context under a fixed token ceiling.
pub struct PromptAssembler {
    model: String,
    max_tokens: usize,
    language: String,
}

impl PromptAssembler {
    /// Create an assembler for an explicit model, budget, and response language.
    pub fn new(model: String, max_tokens: usize, language: String) -> Self {
        Self {
            model,
            max_tokens,
            language,
        }
    }

    /// Create an assembler from the loaded configuration.
    pub fn from_config() -> Self {
        let config = get_config();
        Self::new(
            config.prompt_model.clone(),
            config.prompt_max_tokens,
            config.response_language.clone(),
        )
    }

    /// Assemble a prompt from the system template, user message, and ranked chunks.
    ///
    /// Counts tokens for the fixed parts first, then appends chunks in the supplied order
    /// while the remaining budget allows; the first chunk that does not fit stops the
    /// loop. Passing `None` for the system prompt applies [`DEFAULT_SYSTEM_PROMPT`].
    pub fn assemble(
        &self,
        system_prompt: Option<&str>,
        user_message: &str,
        chunks: &[String],
    ) -> Result<AssembledPrompt, PromptError> {
        let system_prompt = system_prompt
            .filter(|prompt| !prompt.trim().is_empty())
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let encoding = resolve_encoding(&self.model)?;
        let count = |text: &str| encoding.encode_ordinary(text).len();

        let fixed = count(system_prompt) + count(user_message) + FORMAT_BUFFER_TOKENS;
        let mut available = self.max_tokens.saturating_sub(fixed);

        let mut context_chunks: Vec<&str> = Vec::new();
        for chunk in chunks {
            let chunk_tokens = count(chunk);
            if chunk_tokens > available {
                break;
            }
            context_chunks.push(chunk);
            available -= chunk_tokens;
        }

        let context = context_chunks.join(" ");
        let prompt = format!("{system_prompt}\n\nContext:\n{context}\n\nUser:\n{user_message}");

        tracing::debug!(
            model = %self.model,
            max_tokens = self.max_tokens,
            chunks_offered = chunks.len(),
            chunks_used = context_chunks.len(),
            "Prompt assembled"
        );

        Ok(AssembledPrompt {
            prompt,
            language: self.language.clone(),
            context_chunks_used: context_chunks.len(),
        })
    }
}

/// Resolve the tokenizer for a model, falling back to well-known encodings.
fn resolve_encoding(model: &str) -> Result<CoreBPE, PromptError> {
    match get_bpe_from_model(model) {
        Ok(encoding) => Ok(encoding),
        Err(model_err) => {
            tracing::debug!(
                model,
                error = %model_err,
                "Tokenizer model lookup failed; trying encoding name"
            );
            let fallback = match model {
                "o200k_base" => o200k_base(),
                "p50k_base" => p50k_base(),
                "r50k_base" | "gpt2" => r50k_base(),
                _ => {
                    tracing::warn!(model, "Falling back to 'cl100k_base' encoding");
                    cl100k_base()
                }
            };
            fallback.map_err(|source| PromptError::Tokenizer {
                model: model.to_string(),
                source,
            })
        }
    }
}
