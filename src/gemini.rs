use crate::embeddings::{Embedder, Embedding};
use crate::rag::Generator;
use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::env;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Model used for document and query embeddings
pub const EMBEDDING_MODEL: &str = "models/text-embedding-004";

/// Model used to answer questions
pub const GENERATION_MODEL: &str = "models/gemini-2.5-flash";

/// Configuration for Gemini API
#[derive(Clone, Debug)]
pub struct GeminiConfig {
    pub api_key: String,
    /// Full `embedContent` endpoint, without the key
    pub embeddings_url: String,
    /// Full `generateContent` endpoint, without the key
    pub generate_url: String,
}

impl GeminiConfig {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("GEMINI_API_KEY").context("GEMINI_API_KEY not set")?;
        let embeddings_url = env::var("GEMINI_EMBEDDINGS_URL")
            .unwrap_or_else(|_| default_url(EMBEDDING_MODEL, "embedContent"));
        let generate_url = env::var("GEMINI_GENERATE_URL")
            .unwrap_or_else(|_| default_url(GENERATION_MODEL, "generateContent"));

        Ok(GeminiConfig {
            api_key,
            embeddings_url,
            generate_url,
        })
    }

    fn with_key(&self, url: &str) -> String {
        format!("{}?key={}", url, self.api_key)
    }
}

fn default_url(model: &str, method: &str) -> String {
    format!("{}/{}:{}", DEFAULT_BASE_URL, model, method)
}

/// Client for interacting with Gemini API
#[derive(Clone)]
pub struct GeminiClient {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiClient {
    /// Create a new Gemini client
    pub fn new(config: GeminiConfig) -> Self {
        let client = reqwest::Client::new();
        GeminiClient { config, client }
    }

    /// Generate embeddings for a text
    pub async fn get_embedding(&self, text: &str) -> Result<Embedding> {
        #[derive(Serialize)]
        struct EmbeddingContent<'a> {
            parts: Vec<Part<'a>>,
        }

        #[derive(Serialize)]
        struct EmbeddingRequest<'a> {
            model: &'static str,
            content: EmbeddingContent<'a>,
        }

        let request = EmbeddingRequest {
            model: EMBEDDING_MODEL,
            content: EmbeddingContent {
                parts: vec![Part { text }],
            },
        };

        let url = self.config.with_key(&self.config.embeddings_url);

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow::anyhow!(
                "Embedding request failed: {} {}",
                status,
                error_text
            ));
        }

        let response_data: EmbeddingResponse = response.json().await?;

        Ok(Embedding {
            values: response_data.embedding.values,
        })
    }

    /// Generate text using a Gemini model
    pub async fn generate_text(
        &self,
        prompt: &str,
        model: &'static str,
        generation_config: GenerationConfig,
    ) -> Result<String> {
        let request = GenerateRequest {
            model,
            contents: vec![Content::new_with_role(prompt, "user")],
            generation_config,
        };

        let url = self.config.with_key(&self.config.generate_url);
        debug!(
            "Calling {} with a {} character prompt",
            model,
            prompt.chars().count()
        );

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow::anyhow!(
                "Generation request failed: {} {}",
                status,
                error_text
            ));
        }

        let response_data: GenerateResponse = response.json().await?;
        response_data.into_text()
    }
}

impl Embedder for GeminiClient {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.get_embedding(text).await
    }
}

impl Generator for GeminiClient {
    async fn invoke(&self, prompt: &str) -> Result<String> {
        self.generate_text(prompt, GENERATION_MODEL, GenerationConfig::default())
            .await
    }
}

// Request/response structures for the Gemini API

#[derive(Deserialize, Debug)]
struct EmbeddingResponse {
    embedding: EmbeddingData,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    values: Vec<f32>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'static str,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
    role: &'static str,
}

impl<'a> Content<'a> {
    fn new_with_role(text: &'a str, role: &'static str) -> Self {
        Content {
            parts: vec![Part { text }],
            role,
        }
    }
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

/// Sampling parameters sent with every generation request
#[derive(Serialize, Debug, Clone, Copy)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: i32,
    pub max_output_tokens: i32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        GenerationConfig {
            temperature: 0.2,
            top_p: 0.8,
            top_k: 40,
            max_output_tokens: 1024,
        }
    }
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GenerateResponse {
    /// Extract the generated text of the first candidate
    fn into_text(self) -> Result<String> {
        self.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| anyhow::anyhow!("No response generated"))
    }
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Deserialize, Debug)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: String,
}
