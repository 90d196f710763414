use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tiktoken_rs::{CoreBPE, cl100k_base, o200k_base};

/// Counts prompt tokens so the benchmark can report input size.
///
/// Either a Hugging Face `tokenizer.json` loaded from disk, or one of the
/// tiktoken encodings bundled with `tiktoken-rs` picked from the model name.
#[derive(Clone)]
pub struct Tokenizer {
    backend: Backend,
}

#[derive(Clone)]
enum Backend {
    Bpe(Arc<CoreBPE>, ModelType),
    HuggingFace(Arc<tokenizers::Tokenizer>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    // GPT-4, GPT-3.5-turbo and most open models
    Cl100k,
    // GPT-4o, o1 and later
    O200k,
    // Loaded from a tokenizer.json
    HuggingFace,
}

impl Tokenizer {
    /// A bundled BPE encoding suited to `model`.
    pub fn for_model(model: &str) -> Result<Self> {
        let model = model.to_lowercase();
        let is_o200k =
            model.contains("gpt-4o") || model.starts_with("o1") || model.starts_with("o3");
        let backend = if is_o200k {
            Backend::Bpe(Arc::new(o200k_base()?), ModelType::O200k)
        } else {
            Backend::Bpe(Arc::new(cl100k_base()?), ModelType::Cl100k)
        };
        Ok(Self { backend })
    }

    /// Load a Hugging Face `tokenizer.json`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let tokenizer = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("failed to load tokenizer from {}", path.display()))?;
        Ok(Self {
            backend: Backend::HuggingFace(Arc::new(tokenizer)),
        })
    }

    /// Use the tokenizer file when one is given, otherwise fall back to the
    /// bundled encoding for `model`.
    pub fn load(path: Option<&Path>, model: &str) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::for_model(model),
        }
    }

    pub fn count_tokens(&self, text: &str) -> Result<usize> {
        // Raw text only; chat templates add role and format markers on the
        // server side that are not counted here.
        match &self.backend {
            Backend::Bpe(encoder, _) => Ok(encoder.encode_with_special_tokens(text).len()),
            Backend::HuggingFace(tokenizer) => {
                let encoding = tokenizer
                    .encode(text, false)
                    .map_err(|e| anyhow::anyhow!("tokenization failed: {}", e))?;
                Ok(encoding.get_ids().len())
            }
        }
    }

    pub fn model_type(&self) -> ModelType {
        match &self.backend {
            Backend::Bpe(_, model_type) => *model_type,
            Backend::HuggingFace(_) => ModelType::HuggingFace,
        }
    }
}
