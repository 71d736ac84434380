use anyhow::{bail, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::auth;
use crate::config::LlmSection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
    OpenAI,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

fn default_model(provider: Provider) -> &'static str {
    match provider {
        Provider::Anthropic => "claude-3-5-sonnet-latest",
        Provider::OpenAI => "gpt-4o-mini",
    }
}

/// Resolve provider and key from config.toml and stored auth. An empty
/// provider picks Anthropic when both keys exist.
pub fn resolve_config(section: &LlmSection) -> Result<LlmConfig> {
    let a = auth::load_auth()?;
    let (provider, key) = match section.provider.trim().to_ascii_lowercase().as_str() {
        "anthropic" => (
            Provider::Anthropic,
            a.anthropic_token
                .context("missing anthropic_token; run: questline auth paste-anthropic-token")?,
        ),
        "openai" => (
            Provider::OpenAI,
            a.openai_api_key
                .context("missing openai_api_key; run: questline auth paste-openai-api-key")?,
        ),
        "" => match (a.anthropic_token, a.openai_api_key) {
            (Some(t), _) => (Provider::Anthropic, t),
            (None, Some(k)) => (Provider::OpenAI, k),
            (None, None) => bail!("no LLM credentials; run: questline auth paste-anthropic-token"),
        },
        other => bail!("unknown llm provider {other:?} (expected anthropic or openai)"),
    };

    let model = if section.model.trim().is_empty() {
        default_model(provider).to_string()
    } else {
        section.model.trim().to_string()
    };

    Ok(LlmConfig {
        provider,
        model,
        api_key: key,
        temperature: section.temperature,
        max_tokens: section.max_tokens,
    })
}

pub async fn chat_complete(
    client: &reqwest::Client,
    config: &LlmConfig,
    system: &str,
    turns: &[ChatTurn],
) -> Result<String> {
    match config.provider {
        Provider::Anthropic => anthropic_complete(client, config, system, turns).await,
        Provider::OpenAI => openai_complete(client, config, system, turns).await,
    }
}

async fn anthropic_complete(
    client: &reqwest::Client,
    config: &LlmConfig,
    system: &str,
    turns: &[ChatTurn],
) -> Result<String> {
    #[derive(Serialize)]
    struct Req<'a> {
        model: &'a str,
        max_tokens: u32,
        temperature: f32,
        system: &'a str,
        messages: &'a [ChatTurn],
    }

    #[derive(Deserialize)]
    struct Resp {
        content: Vec<ContentBlock>,
    }

    #[derive(Deserialize)]
    struct ContentBlock {
        #[serde(rename = "type")]
        t: String,
        text: Option<String>,
    }

    let body = Req {
        model: &config.model,
        max_tokens: config.max_tokens,
        temperature: config.temperature,
        system,
        messages: turns,
    };

    let mut headers = HeaderMap::new();
    headers.insert("x-api-key", HeaderValue::from_str(&config.api_key)?);
    headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let resp = client
        .post("https://api.anthropic.com/v1/messages")
        .headers(headers)
        .json(&body)
        .send()
        .await
        .context("anthropic request")?;

    let status = resp.status();
    if !status.is_success() {
        let txt = resp.text().await.unwrap_or_default();
        bail!("anthropic error: {status} {txt}");
    }

    let out: Resp = resp.json().await.context("parse anthropic response")?;
    let mut s = String::new();
    for b in out.content {
        if b.t == "text" {
            if let Some(t) = b.text {
                s.push_str(&t);
            }
        }
    }
    Ok(s.trim().to_string())
}

async fn openai_complete(
    client: &reqwest::Client,
    config: &LlmConfig,
    system: &str,
    turns: &[ChatTurn],
) -> Result<String> {
    #[derive(Serialize)]
    struct Msg<'a> {
        role: &'a str,
        content: &'a str,
    }

    #[derive(Serialize)]
    struct Req<'a> {
        model: &'a str,
        messages: Vec<Msg<'a>>,
        temperature: f32,
        max_tokens: u32,
    }

    #[derive(Deserialize)]
    struct Resp {
        choices: Vec<Choice>,
    }

    #[derive(Deserialize)]
    struct Choice {
        message: MsgOut,
    }

    #[derive(Deserialize)]
    struct MsgOut {
        content: Option<String>,
    }

    let mut messages = vec![Msg {
        role: "system",
        content: system,
    }];
    messages.extend(turns.iter().map(|t| Msg {
        role: &t.role,
        content: &t.content,
    }));

    let body = Req {
        model: &config.model,
        messages,
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    };

    let resp = client
        .post("https://api.openai.com/v1/chat/completions")
        .header(AUTHORIZATION, format!("Bearer {}", config.api_key))
        .json(&body)
        .send()
        .await
        .context("openai request")?;

    let status = resp.status();
    if !status.is_success() {
        let txt = resp.text().await.unwrap_or_default();
        bail!("openai error: {status} {txt}");
    }

    let out: Resp = resp.json().await.context("parse openai response")?;
    let content = out
        .choices
        .first()
        .and_then(|c| c.message.content.clone())
        .unwrap_or_default();

    Ok(content.trim().to_string())
}
