use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::Display;
use tracing::{debug, error, warn};

use crate::pipeline::{AdviceGenerator, CommentClassifier};

const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const ADVICE_MAX_TOKENS: u32 = 350;
const ADVICE_TEMPERATURE: f32 = 0.7;
const VERIFY_MAX_TOKENS: u32 = 10;
const VERIFY_TEMPERATURE: f32 = 0.1;

/// Inputs to the verification prompt are capped to keep token cost and
/// latency bounded.
pub const MAX_COMMENT_LEN: usize = 500;
pub const MAX_POST_BODY_LEN: usize = 1000;

const ADVICE_SYSTEM: &str = "Você é um assistente prestativo e empático que oferece conselhos \
     construtivos e solidários para posts do r/desabafos.";

const VERIFY_SYSTEM: &str = "Você é um classificador de comentários. Analise o comentário no \
     contexto do post original e responda apenas 'Sim' ou 'Não' à pergunta feita.";

/// Ternary verdict of the comment verification call. `Unknown` is a valid
/// terminal outcome covering ambiguous answers and call failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum AdviceVerdict {
    #[strum(to_string = "advice")]
    Advice,
    #[strum(to_string = "not advice")]
    NotAdvice,
    #[strum(to_string = "unknown")]
    Unknown,
}

impl AdviceVerdict {
    pub fn as_db(self) -> Option<bool> {
        match self {
            Self::Advice => Some(true),
            Self::NotAdvice => Some(false),
            Self::Unknown => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedAdvice {
    pub prompt: String,
    pub response: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Clone)]
pub struct OpenAiLlm {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiLlm {
    pub fn new(api_key: &str, model: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            api_key: api_key.to_string(),
            base_url: OPENAI_API_URL.to_string(),
            model: model.to_string(),
        })
    }

    #[allow(dead_code)]
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }

    async fn chat(
        &self,
        system: &str,
        user: String,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens,
            temperature,
        };

        debug!(model = %self.model, "Sending chat completion request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("OpenAI API error ({status}): {error_text}"));
        }

        let chat_response: ChatResponse = response.json().await?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .ok_or_else(|| anyhow!("No completion in response"))
    }
}

pub fn advice_prompt(title: &str, body: &str) -> String {
    format!(
        "O seguinte post foi feito no subreddit r/desabafos. Por favor, leia o título e o \
         corpo do post e forneça um conselho ou uma perspectiva útil, empática e construtiva \
         para o autor original (OP). Concentre-se em ser solidário e evite julgamentos.\n\n\
         Título: {title}\n\n\
         Corpo:\n{body}\n\n\
         Seu conselho/perspectiva para o OP:"
    )
}

pub fn verification_prompt(title: &str, body: &str, comment_body: &str) -> String {
    let truncated_body = truncate_chars(body, MAX_POST_BODY_LEN);
    let truncated_comment = truncate_chars(comment_body, MAX_COMMENT_LEN);
    if truncated_comment.len() < comment_body.len() {
        warn!("Comment body truncated to {MAX_COMMENT_LEN} chars for verification");
    }

    format!(
        "Contexto: Post Original no r/desabafos\n\
         Título: {title}\n\
         Corpo: {truncated_body}\n\
         ---\n\
         Comentário feito neste post:\n\
         \"{truncated_comment}\"\n\
         ---\n\
         Pergunta: Este comentário está fornecendo conselho direto, apoio emocional, uma \
         perspectiva relevante ou uma pergunta construtiva em resposta direta ao conteúdo e \
         desabafo do post original? Foque em diferenciar conselhos/apoio de mensagens \
         automáticas de MOD, perguntas genéricas não relacionadas ao desabafo (ex: \"O que \
         aconteceu?\"), ou meta-comentários sobre o Reddit.\n\n\
         Responda APENAS com \"Sim\" ou \"Não\"."
    )
}

/// Maps a raw classifier answer onto the ternary verdict. Anything that
/// leads with neither an affirmative nor a negative marker is ambiguous.
pub fn parse_verdict(answer: &str) -> AdviceVerdict {
    let normalized = answer.trim().to_lowercase();

    if normalized.starts_with("sim") {
        AdviceVerdict::Advice
    } else if normalized.starts_with("não") || normalized.starts_with("nao") {
        AdviceVerdict::NotAdvice
    } else {
        AdviceVerdict::Unknown
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[async_trait]
impl AdviceGenerator for OpenAiLlm {
    async fn generate_advice(&self, title: &str, body: &str) -> Option<GeneratedAdvice> {
        let prompt = advice_prompt(title, body);

        match self
            .chat(ADVICE_SYSTEM, prompt.clone(), ADVICE_MAX_TOKENS, ADVICE_TEMPERATURE)
            .await
        {
            Ok(response) => Some(GeneratedAdvice { prompt, response }),
            Err(e) => {
                error!("Advice generation failed: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl CommentClassifier for OpenAiLlm {
    async fn classify_advice(&self, title: &str, body: &str, comment_body: &str) -> AdviceVerdict {
        let prompt = verification_prompt(title, body, comment_body);

        match self
            .chat(VERIFY_SYSTEM, prompt, VERIFY_MAX_TOKENS, VERIFY_TEMPERATURE)
            .await
        {
            Ok(answer) => {
                let verdict = parse_verdict(&answer);
                debug!("Verification answer '{answer}' mapped to {verdict}");
                verdict
            }
            Err(e) => {
                warn!("Comment verification failed: {e}");
                AdviceVerdict::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_mapping_is_total() {
        assert_eq!(parse_verdict("Sim"), AdviceVerdict::Advice);
        assert_eq!(parse_verdict("  sim, com certeza"), AdviceVerdict::Advice);
        assert_eq!(parse_verdict("Não"), AdviceVerdict::NotAdvice);
        assert_eq!(parse_verdict("nao"), AdviceVerdict::NotAdvice);
        assert_eq!(parse_verdict("NÃO."), AdviceVerdict::NotAdvice);
        assert_eq!(parse_verdict("Talvez"), AdviceVerdict::Unknown);
        assert_eq!(parse_verdict(""), AdviceVerdict::Unknown);
        assert_eq!(parse_verdict("🤷"), AdviceVerdict::Unknown);
    }

    #[test]
    fn verdict_maps_to_nullable_bool() {
        assert_eq!(AdviceVerdict::Advice.as_db(), Some(true));
        assert_eq!(AdviceVerdict::NotAdvice.as_db(), Some(false));
        assert_eq!(AdviceVerdict::Unknown.as_db(), None);
    }

    #[test]
    fn truncation_is_char_boundary_safe() {
        let accented = "ã".repeat(600);
        let truncated = truncate_chars(&accented, MAX_COMMENT_LEN);
        assert_eq!(truncated.chars().count(), MAX_COMMENT_LEN);

        let short = "curto";
        assert_eq!(truncate_chars(short, MAX_COMMENT_LEN), short);
    }

    #[test]
    fn verification_prompt_caps_inputs() {
        let long_body = "b".repeat(5000);
        let long_comment = "c".repeat(5000);
        let prompt = verification_prompt("Título", &long_body, &long_comment);

        assert!(prompt.contains(&"b".repeat(MAX_POST_BODY_LEN)));
        assert!(!prompt.contains(&"b".repeat(MAX_POST_BODY_LEN + 1)));
        assert!(prompt.contains(&"c".repeat(MAX_COMMENT_LEN)));
        assert!(!prompt.contains(&"c".repeat(MAX_COMMENT_LEN + 1)));
    }

    #[test]
    fn advice_prompt_embeds_post_content() {
        let prompt = advice_prompt("Meu título", "Meu corpo");
        assert!(prompt.contains("Título: Meu título"));
        assert!(prompt.contains("Meu corpo"));
    }
}
