use std::time::Duration;

use anyhow::Context as _;

use crate::config::SummarizerConfig;
use crate::model::{ModelInfo, SummarizeRequest, SummarizeResponse};

/// Client for an OpenAI-compatible chat-completions API. This is the only
/// component that retries: transport errors, 429 and 5xx responses are
/// re-attempted up to the configured limit with linear backoff.
pub struct Summarizer {
    client: reqwest::Client,
    config: SummarizerConfig,
}

pub fn chat_endpoint(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/chat/completions")
}

pub fn models_endpoint(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/models")
}

/// Rough approximation: 1 token ~ 4 characters.
pub fn estimate_tokens(text: &str) -> u32 {
    text.len().div_ceil(4) as u32
}

pub fn target_tokens(original_tokens: u32, ratio: f64) -> u32 {
    (f64::from(original_tokens) * ratio).ceil() as u32
}

/// Completion budget: double the target, with a floor so tiny inputs still
/// get a usable answer.
pub fn max_completion_tokens(target: u32) -> u32 {
    target.saturating_mul(2).max(100)
}

enum CallError {
    Retryable(anyhow::Error),
    Fatal(anyhow::Error),
}

impl Summarizer {
    pub fn new(config: SummarizerConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("build http client")?;
        Ok(Self { client, config })
    }

    pub async fn summarize(
        &self,
        request: &SummarizeRequest,
    ) -> anyhow::Result<SummarizeResponse> {
        if request.content.trim().is_empty() {
            anyhow::bail!("content is empty");
        }
        if !(request.ratio > 0.0 && request.ratio <= 1.0) {
            anyhow::bail!("ratio must be in (0, 1]: {}", request.ratio);
        }

        let original_tokens = estimate_tokens(&request.content);
        let target = target_tokens(original_tokens, request.ratio);

        let prompt = request
            .custom_prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(&self.config.prompt);
        let mut system_message = format!(
            "{prompt}\n\nPlease summarize the following content to approximately {target} \
             tokens (current content is {original_tokens} tokens, target ratio: {ratio}).",
            ratio = request.ratio,
        );
        if let Some(language) = request.language.as_deref().filter(|l| !l.trim().is_empty()) {
            system_message.push_str(&format!(" Provide the summary in {language}."));
        }

        let mut messages = vec![
            serde_json::json!({ "role": "system", "content": system_message }),
            serde_json::json!({ "role": "user", "content": request.content }),
        ];
        if !request.images.is_empty() {
            let mut parts = vec![serde_json::json!({
                "type": "text",
                "text": "Please also consider these images in your summary:",
            })];
            parts.extend(request.images.iter().map(|url| {
                serde_json::json!({ "type": "image_url", "image_url": { "url": url } })
            }));
            messages.push(serde_json::json!({ "role": "user", "content": parts }));
        }

        let body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": max_completion_tokens(target),
            "temperature": 0.7,
        });

        let endpoint = chat_endpoint(&self.config.base_url);
        let raw = self.post_with_retry(&endpoint, &body).await?;
        let value: serde_json::Value =
            serde_json::from_str(&raw).context("parse chat completion response")?;
        let summary = extract_message_content(&value).context("extract summary text")?;

        let summary_tokens = estimate_tokens(&summary);
        let actual_ratio = if original_tokens == 0 {
            0.0
        } else {
            f64::from(summary_tokens) / f64::from(original_tokens)
        };

        Ok(SummarizeResponse {
            summary,
            original_tokens,
            summary_tokens,
            actual_ratio,
        })
    }

    pub async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
        let endpoint = models_endpoint(&self.config.base_url);
        let response = self
            .client
            .get(&endpoint)
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .with_context(|| format!("GET {endpoint}"))?;

        let status = response.status();
        let raw = response.text().await.context("read models response body")?;
        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or(raw);
            anyhow::bail!("LLM API error ({status}): {message}");
        }

        let value: serde_json::Value =
            serde_json::from_str(&raw).context("parse models response")?;
        parse_model_list(&value).context("extract model list")
    }

    async fn post_with_retry(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> anyhow::Result<String> {
        let attempts = self.config.max_retries.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            match self.call(endpoint, body).await {
                Ok(raw) => return Ok(raw),
                Err(CallError::Fatal(err)) => return Err(err),
                Err(CallError::Retryable(err)) => {
                    if attempt == attempts {
                        return Err(err);
                    }
                    tracing::warn!(attempt, attempts, ?err, "summarization call failed; retrying");
                    last_err = Some(err);
                    tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no summarization attempts were made")))
    }

    async fn call(&self, endpoint: &str, body: &serde_json::Value) -> Result<String, CallError> {
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|err| {
                CallError::Retryable(anyhow::Error::new(err).context(format!("POST {endpoint}")))
            })?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|err| {
                CallError::Retryable(anyhow::Error::new(err).context("read response body"))
            })?;
        if status.is_success() {
            return Ok(raw);
        }

        let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
        let err = anyhow::anyhow!("LLM API error ({status}): {message}");
        if status.is_server_error() || status.as_u16() == 429 {
            Err(CallError::Retryable(err))
        } else {
            Err(CallError::Fatal(err))
        }
    }
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let message = value.get("error")?.get("message")?.as_str()?.to_owned();
    Some(message)
}

fn extract_message_content(value: &serde_json::Value) -> anyhow::Result<String> {
    let content = value
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str())
        .ok_or_else(|| anyhow::anyhow!("missing `choices[0].message.content` in response"))?;

    if content.trim().is_empty() {
        anyhow::bail!("summary text is empty");
    }
    Ok(content.to_owned())
}

fn parse_model_list(value: &serde_json::Value) -> anyhow::Result<Vec<ModelInfo>> {
    let data = value
        .get("data")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("missing `data` array in models response"))?;

    Ok(data
        .iter()
        .filter_map(|item| {
            let id = item.get("id").and_then(|v| v.as_str())?.to_owned();
            let owned_by = item
                .get("owned_by")
                .and_then(|v| v.as_str())
                .map(str::to_owned);
            Some(ModelInfo { id, owned_by })
        })
        .collect())
}
