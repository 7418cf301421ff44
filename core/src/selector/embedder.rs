//! Query embedding for the retrieval selection strategy (§4.4 step 4b).
//! Separate from the LLM chat client since OpenAI-compatible providers
//! expose embeddings as a distinct endpoint.

use async_openai::config::OpenAIConfig;
use async_openai::types::CreateEmbeddingRequestArgs;
use async_openai::Client;
use async_trait::async_trait;

use crate::error::SelectorError;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, SelectorError>;
}

pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(api_key: &str, base_url: Option<&str>, model: &str) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base) = base_url {
            config = config.with_api_base(base);
        }
        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, SelectorError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(text)
            .build()
            .map_err(|e| SelectorError::Embedding(e.to_string()))?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| SelectorError::Embedding(e.to_string()))?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| SelectorError::Embedding("empty embedding response".into()))
    }
}

/// Deterministic, dependency-free stand-in used in tests: hashes trigrams of
/// the input into a fixed-width vector. Not semantically meaningful, only
/// useful for exercising the selector's ranking/ordering logic without a
/// network call.
pub struct HashEmbedder {
    pub dims: usize,
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, SelectorError> {
        let mut v = vec![0.0f32; self.dims];
        let bytes = text.to_ascii_lowercase();
        let bytes = bytes.as_bytes();
        for window in bytes.windows(3.min(bytes.len().max(1))) {
            let mut h: u64 = 1469598103934665603;
            for b in window {
                h ^= *b as u64;
                h = h.wrapping_mul(1099511628211);
            }
            v[(h as usize) % self.dims] += 1.0;
        }
        Ok(v)
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_is_one_for_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_is_zero_for_orthogonal_vectors() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_similarity_zero_for_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn hash_embedder_is_deterministic() {
        let e = HashEmbedder { dims: 16 };
        let a = e.embed("web search tool").await.unwrap();
        let b = e.embed("web search tool").await.unwrap();
        assert_eq!(a, b);
    }
}
