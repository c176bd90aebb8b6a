use anyhow::{anyhow, Context, Result};
use reqwest::{header::HeaderValue, Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::env;
use tokio::runtime::Runtime;
use tokio::time::{sleep, Duration};
use tracing::warn;

mod embed;

pub use embed::{EmbedMode, EmbeddingProvider, RemoteEmbedder};

pub(crate) const MAX_RETRIES: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    Gemini,
    Local,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Gemini => "gemini",
            LlmProvider::Local => "local",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "openai" => Some(LlmProvider::OpenAi),
            "gemini" => Some(LlmProvider::Gemini),
            "local" => Some(LlmProvider::Local),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub user: String,
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    provider: LlmProvider,
    model: String,
    config: ProviderConfig,
}

#[derive(Clone)]
enum ProviderConfig {
    OpenAi(OpenAiConfig),
    Gemini(GeminiConfig),
    Local,
}

#[derive(Clone)]
pub(crate) struct OpenAiConfig {
    pub(crate) api_key: String,
    pub(crate) base_url: String,
}

impl OpenAiConfig {
    pub(crate) fn from_env() -> Result<Self> {
        Ok(Self {
            api_key: read_api_key("OPENAI_API_KEY")?,
            base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
        })
    }
}

#[derive(Clone)]
pub(crate) struct GeminiConfig {
    pub(crate) api_key: String,
}

impl GeminiConfig {
    pub(crate) fn from_env() -> Result<Self> {
        let var = if env::var("GEMINI_API_KEY").is_ok() {
            "GEMINI_API_KEY"
        } else {
            "GOOGLE_API_KEY"
        };
        Ok(Self {
            api_key: read_api_key(var)?,
        })
    }
}

impl LlmClient {
    pub fn new(provider: LlmProvider, model: impl Into<String>) -> Result<Self> {
        let model = model.into();
        let http = Client::new();
        let config = match provider {
            LlmProvider::OpenAi => ProviderConfig::OpenAi(OpenAiConfig::from_env()?),
            LlmProvider::Gemini => ProviderConfig::Gemini(GeminiConfig::from_env()?),
            LlmProvider::Local => ProviderConfig::Local,
        };
        Ok(Self {
            http,
            provider,
            model,
            config,
        })
    }

    pub fn local() -> Self {
        Self {
            http: Client::new(),
            provider: LlmProvider::Local,
            model: "local".to_string(),
            config: ProviderConfig::Local,
        }
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Answer text for `req`; the local provider never touches the network.
    pub async fn chat(&self, req: &LlmRequest) -> Result<String> {
        match &self.config {
            ProviderConfig::OpenAi(cfg) => self.chat_openai(cfg, req).await,
            ProviderConfig::Gemini(cfg) => self.chat_gemini(cfg, req).await,
            ProviderConfig::Local => Ok(synthesize_local_response(req)),
        }
    }

    pub fn chat_blocking(&self, req: &LlmRequest) -> Result<String> {
        let rt = Runtime::new().context("failed to create tokio runtime")?;
        rt.block_on(self.chat(req))
    }

    async fn chat_openai(&self, cfg: &OpenAiConfig, req: &LlmRequest) -> Result<String> {
        let url = format!("{}/chat/completions", cfg.base_url.trim_end_matches('/'));
        let mut messages = Vec::new();
        if let Some(system) = &req.system {
            messages.push(json!({"role": "system", "content": system }));
        }
        messages.push(json!({"role": "user", "content": req.user }));
        let payload = json!({
            "model": self.model,
            "messages": messages,
        });
        let value = post_json("openai", || {
            self.http.post(&url).bearer_auth(&cfg.api_key).json(&payload)
        })
        .await?;
        extract_openai_text(&value).ok_or_else(|| anyhow!("missing text in OpenAI response"))
    }

    async fn chat_gemini(&self, cfg: &GeminiConfig, req: &LlmRequest) -> Result<String> {
        let mut payload = json!({
            "contents": [
                {
                    "role": "user",
                    "parts": [ { "text": req.user } ]
                }
            ]
        });
        if let Some(system) = &req.system {
            payload["systemInstruction"] = json!({ "parts": [ { "text": system.trim() } ] });
        }
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, cfg.api_key
        );
        let value = post_json("gemini", || self.http.post(&url).json(&payload)).await?;
        let response: GeminiResponse =
            serde_json::from_value(value).context("failed to decode gemini response")?;
        response
            .candidates
            .and_then(|mut c| c.pop())
            .and_then(|candidate| {
                candidate
                    .content
                    .parts
                    .into_iter()
                    .find_map(|part| part.text)
            })
            .ok_or_else(|| anyhow!("missing text in Gemini response"))
    }
}

/// Sends the request built by `build`, retrying transport errors and 429s
/// with backoff, and decodes the JSON body of the final response.
pub(crate) async fn post_json<F>(provider: &str, build: F) -> Result<Value>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 0usize;
    loop {
        attempt += 1;
        let response = match build().send().await {
            Ok(response) => response,
            Err(err) if attempt <= MAX_RETRIES => {
                warn!(provider, attempt, error = %err, "request failed, retrying");
                sleep(backoff_delay(attempt, None)).await;
                continue;
            }
            Err(err) => return Err(err).with_context(|| format!("{provider} request failed")),
        };
        if response.status() == StatusCode::TOO_MANY_REQUESTS && attempt <= MAX_RETRIES {
            sleep(backoff_delay(attempt, response.headers().get("retry-after"))).await;
            continue;
        }
        return decode_json_body(provider, response).await;
    }
}

pub(crate) fn backoff_delay(attempt: usize, retry_after: Option<&HeaderValue>) -> Duration {
    if let Some(value) = retry_after {
        if let Ok(text) = value.to_str() {
            if let Ok(secs) = text.parse::<u64>() {
                return Duration::from_secs(secs.max(1));
            }
        }
    }
    let capped = attempt.min(6) as u32;
    Duration::from_secs(1u64 << capped)
}

/// Offline answer: quotes the first retrieved fragment of the prompt, or
/// echoes the question when nothing was retrieved.
fn synthesize_local_response(req: &LlmRequest) -> String {
    let fragments = extract_context_block(&req.user, "Contexto recuperado:", "Instrucciones:");
    let first = fragments
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with('['));
    match first {
        Some(line) => {
            let (marker, body) = line.split_once(']').unwrap_or(("[1", line));
            format!("{} {}]", summarize_text(body, 60), marker)
        }
        None => {
            let question = extract_context_block(&req.user, "Pregunta:", "Contexto recuperado:");
            summarize_text(&question, 40)
        }
    }
}

pub(crate) async fn decode_json_body(provider: &str, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(anyhow!(format!(
            "{provider} returned error (status {status}): {body}"
        )));
    }
    serde_json::from_str(&body).with_context(|| format!("failed to decode {provider} response"))
}

fn extract_context_block(text: &str, start_marker: &str, stop_marker: &str) -> String {
    if let Some(start_idx) = text.find(start_marker) {
        let after = &text[start_idx + start_marker.len()..];
        if let Some(end_idx) = after.find(stop_marker) {
            let (segment, _) = after.split_at(end_idx);
            return segment.trim().to_string();
        }
        return after.trim().to_string();
    }
    text.trim().to_string()
}

fn summarize_text(text: &str, max_words: usize) -> String {
    if max_words == 0 {
        return String::new();
    }
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<&str>>()
        .join(" ")
}

pub(crate) fn read_api_key(var: &str) -> Result<String> {
    let value = env::var(var).map_err(|_| anyhow!(format!("{var} is not set")))?;
    validate_api_key(var, &value)?;
    Ok(value)
}

fn validate_api_key(var: &str, value: &str) -> Result<()> {
    if var.contains("OPENAI") && !value.starts_with("sk-") {
        return Err(anyhow!(format!(
            "{} must start with 'sk-' (see https://platform.openai.com/)",
            var
        )));
    }
    if (var.contains("GEMINI") || var.contains("GOOGLE")) && !value.starts_with("AI") {
        return Err(anyhow!(format!(
            "{} must be a valid Gemini API key (starts with 'AI...')",
            var
        )));
    }
    Ok(())
}

fn extract_openai_text(value: &Value) -> Option<String> {
    let choice = value.get("choices")?.as_array()?.first()?;
    if let Some(text) = choice.get("text").and_then(|t| t.as_str()) {
        return Some(text.to_string());
    }
    let content = choice.get("message")?.get("content")?;
    if let Some(text) = content.as_str() {
        return Some(text.to_string());
    }
    content
        .as_array()?
        .iter()
        .find_map(|part| part.get("text").and_then(|t| t.as_str()))
        .map(str::to_string)
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_provider_quotes_first_fragment() {
        let client = LlmClient::local();
        let req = LlmRequest {
            system: None,
            user: "Pregunta: cuanto sale medicina\n\nContexto recuperado:\n[1] CARRERA: Medicina | ARANCEL_MENSUAL: 62000\n[2] otro\n\nInstrucciones: responde breve".to_string(),
        };
        let answer = client.chat_blocking(&req).unwrap();
        assert_eq!(answer, "CARRERA: Medicina | ARANCEL_MENSUAL: 62000 [1]");
    }

    #[test]
    fn local_provider_without_fragments_echoes_question() {
        let req = LlmRequest {
            system: None,
            user: "Pregunta: hay becas?\n\nContexto recuperado:\n\n\nInstrucciones: responde".to_string(),
        };
        assert_eq!(synthesize_local_response(&req), "hay becas?");
    }

    #[test]
    fn extracts_chat_completion_text() {
        let value = json!({"choices": [{"message": {"content": "hola"}}]});
        assert_eq!(extract_openai_text(&value).as_deref(), Some("hola"));
        let parts = json!({"choices": [{"message": {"content": [{"type": "text", "text": "chau"}]}}]});
        assert_eq!(extract_openai_text(&parts).as_deref(), Some("chau"));
        assert_eq!(extract_openai_text(&json!({})), None);
    }

    #[test]
    fn retry_after_header_wins_over_exponential_backoff() {
        let header = HeaderValue::from_static("3");
        assert_eq!(backoff_delay(1, Some(&header)), Duration::from_secs(3));
        assert_eq!(backoff_delay(2, None), Duration::from_secs(4));
        assert_eq!(backoff_delay(20, None), Duration::from_secs(64));
    }

    #[test]
    fn provider_names_round_trip() {
        for provider in [LlmProvider::OpenAi, LlmProvider::Gemini, LlmProvider::Local] {
            assert_eq!(LlmProvider::from_str(provider.as_str()), Some(provider));
        }
        assert_eq!(LlmProvider::from_str("anthropic"), None);
    }
}
