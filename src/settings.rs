use anyhow::{anyhow, Result};
use rust_bert::pipelines::sentence_embeddings::SentenceEmbeddingsModelType;
use std::time::Duration;

/// Run configuration, sourced from the environment (a `.env` file is
/// loaded first when present). Every knob has a default except the
/// OpenAI key, which is required before any work starts.
pub struct Settings {
    /// DATABASE_URL, default `data/desabafos.db`.
    pub database_url: String,
    /// SUBREDDIT_NAME, default `desabafos`.
    pub community: String,
    /// POST_LIMIT, default 20.
    pub post_limit: usize,
    /// COMMENT_LIMIT, default 5. Top comments fetched per post.
    pub comment_limit: usize,
    /// RECENCY_HOURS, default 24. Posts older than this are skipped.
    pub recency_hours: i64,
    /// POST_DELAY_SECS, default 5. Pause between posts.
    pub post_delay: Duration,
    /// LLM_DELAY_SECS, default 3. Pause after each generative call.
    pub llm_delay: Duration,
    /// FETCH_DELAY_SECS, default 1. Pause after the comment fetch.
    pub fetch_delay: Duration,
    /// OPENAI_API_KEY, required.
    pub openai_api_key: String,
    /// LLM_MODEL, default `gpt-4o-mini`.
    pub llm_model: String,
    /// EMBEDDING_MODEL, default `all-minilm-l12-v2`
    /// (`all-minilm-l6-v2` also accepted).
    pub embedding_model: SentenceEmbeddingsModelType,
    /// REDDIT_USER_AGENT, default `desabafos-analyzer/0.1`.
    pub user_agent: String,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_embedding_model(name: &str) -> Result<SentenceEmbeddingsModelType> {
    match name.to_ascii_lowercase().as_str() {
        "all-minilm-l12-v2" => Ok(SentenceEmbeddingsModelType::AllMiniLmL12V2),
        "all-minilm-l6-v2" => Ok(SentenceEmbeddingsModelType::AllMiniLmL6V2),
        other => Err(anyhow!("Unsupported EMBEDDING_MODEL: {other}")),
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY is not set"))?;

        let embedding_model = match std::env::var("EMBEDDING_MODEL") {
            Ok(name) => parse_embedding_model(&name)?,
            Err(_) => SentenceEmbeddingsModelType::AllMiniLmL12V2,
        };

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "data/desabafos.db".to_string()),
            community: std::env::var("SUBREDDIT_NAME")
                .unwrap_or_else(|_| "desabafos".to_string()),
            post_limit: env_or("POST_LIMIT", 20),
            comment_limit: env_or("COMMENT_LIMIT", 5),
            recency_hours: env_or("RECENCY_HOURS", 24),
            post_delay: Duration::from_secs(env_or("POST_DELAY_SECS", 5)),
            llm_delay: Duration::from_secs(env_or("LLM_DELAY_SECS", 3)),
            fetch_delay: Duration::from_secs(env_or("FETCH_DELAY_SECS", 1)),
            openai_api_key,
            llm_model: std::env::var("LLM_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            embedding_model,
            user_agent: std::env::var("REDDIT_USER_AGENT")
                .unwrap_or_else(|_| "desabafos-analyzer/0.1".to_string()),
        })
    }
}
