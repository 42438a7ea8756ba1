//! OpenAI chat-completions client backing the assistant.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::orchestrator::tools::{Tool, ToolCall, get_extraction_tool_definitions, get_tool_definitions};
use crate::orchestrator::{Assistant, AssistantReply, ChatMessage};

const API_URL: &str = "https://api.openai.com/v1/chat/completions";

const EXTRACTION_PROMPT: &str = "Extract the tracking number and OTP from the message. If found, call save_tracking_otp. Do not reply to the user.";

const DEFAULT_TEMPERATURE: f64 = 0.5;
const DEFAULT_EFFORT: &str = "low";
const DEFAULT_VERBOSITY: &str = "low";
const ALLOWED_EFFORT: &[&str] = &["minimal", "low", "medium", "high"];
const ALLOWED_VERBOSITY: &[&str] = &["low", "medium", "high"];

/// Per-model request parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOptions {
    pub temperature: Option<f64>,
    pub reasoning_effort: Option<String>,
    pub verbosity: Option<String>,
}

impl ModelOptions {
    /// gpt-5 models only accept the default temperature and take effort and
    /// verbosity instead; everything else gets a temperature.
    pub fn for_model(
        model: &str,
        temperature: Option<f64>,
        effort: Option<&str>,
        verbosity: Option<&str>,
    ) -> Self {
        if !model.trim().to_lowercase().starts_with("gpt-5") {
            return Self {
                temperature: Some(temperature.unwrap_or(DEFAULT_TEMPERATURE)),
                reasoning_effort: None,
                verbosity: None,
            };
        }

        if let Some(t) = temperature {
            if (t - 1.0).abs() > f64::EPSILON {
                warn!("⚠️ Model \"{model}\" only supports the default temperature, ignoring {t}");
            }
        }

        Self {
            temperature: None,
            reasoning_effort: Some(normalize("CHATGPT_EFFORT", effort, ALLOWED_EFFORT, DEFAULT_EFFORT)),
            verbosity: Some(normalize("CHATGPT_VERBOSITY", verbosity, ALLOWED_VERBOSITY, DEFAULT_VERBOSITY)),
        }
    }
}

fn normalize(key: &str, raw: Option<&str>, allowed: &[&str], default: &str) -> String {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return default.to_string();
    };
    let value = raw.to_lowercase();
    if allowed.contains(&value.as_str()) {
        value
    } else {
        warn!("⚠️ Invalid {key} value \"{raw}\", falling back to \"{default}\"");
        default.to_string()
    }
}

pub struct Client {
    api_key: String,
    http: reqwest::Client,
    model: String,
    system_prompt: String,
    options: ModelOptions,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    verbosity: Option<&'a str>,
    tools: Vec<ApiTool>,
    tool_choice: &'static str,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: Value,
}

#[derive(Serialize)]
struct ApiTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: Tool,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    function: FunctionCall,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

impl ResponseMessage {
    fn into_reply(self) -> AssistantReply {
        let tool_calls = self
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .filter_map(|c| ToolCall::parse(&c.function.name, &c.function.arguments))
            .collect();
        AssistantReply {
            text: self.content.unwrap_or_default().trim().to_string(),
            tool_calls,
        }
    }
}

/// Conversation window as chat-completions messages, images inlined.
fn format_messages(messages: &[ChatMessage]) -> Vec<ApiMessage> {
    messages
        .iter()
        .filter_map(|m| {
            let mut parts = Vec::new();
            let text = m.text.trim();
            if !text.is_empty() {
                parts.push(json!({ "type": "text", "text": text }));
            }
            for (data, media_type) in &m.images {
                let url = format!("data:{};base64,{}", media_type, BASE64.encode(data));
                parts.push(json!({ "type": "image_url", "image_url": { "url": url, "detail": "auto" } }));
            }
            if parts.is_empty() {
                return None;
            }
            Some(ApiMessage {
                role: if m.from_me { "assistant" } else { "user" },
                content: Value::Array(parts),
            })
        })
        .collect()
}

fn as_api_tools(tools: Vec<Tool>) -> Vec<ApiTool> {
    tools
        .into_iter()
        .map(|function| ApiTool { kind: "function", function })
        .collect()
}

impl Client {
    pub fn new(config: &Config) -> Self {
        let options = ModelOptions::for_model(
            &config.model,
            config.temperature,
            config.effort.as_deref(),
            config.verbosity.as_deref(),
        );
        Self {
            api_key: config.openai_api_key.clone(),
            http: reqwest::Client::new(),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            options,
        }
    }

    async fn complete(
        &self,
        system: &str,
        mut messages: Vec<ApiMessage>,
        tools: Vec<Tool>,
    ) -> Result<ResponseMessage, Error> {
        messages.insert(0, ApiMessage { role: "system", content: Value::String(system.to_string()) });

        let request = ApiRequest {
            model: &self.model,
            messages,
            temperature: self.options.temperature,
            reasoning_effort: self.options.reasoning_effort.as_deref(),
            verbosity: self.options.verbosity.as_deref(),
            tools: as_api_tools(tools),
            tool_choice: "auto",
        };

        let response = self
            .http
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("{status}: {body}")));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        api_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or(Error::Empty)
    }
}

#[async_trait]
impl Assistant for Client {
    async fn reply(&self, messages: &[ChatMessage]) -> Result<AssistantReply, String> {
        let message = self
            .complete(&self.system_prompt, format_messages(messages), get_tool_definitions())
            .await
            .map_err(|e| {
                error!("OpenAI request failed: {e}");
                e.to_string()
            })?;
        let reply = message.into_reply();
        info!("🤖 Reply: {} chars, {} tool call(s)", reply.text.len(), reply.tool_calls.len());
        Ok(reply)
    }

    async fn extract_otp(&self, text: &str) -> Result<Vec<ToolCall>, String> {
        let user = ApiMessage {
            role: "user",
            content: json!([{ "type": "text", "text": text }]),
        };
        let message = self
            .complete(EXTRACTION_PROMPT, vec![user], get_extraction_tool_definitions())
            .await
            .map_err(|e| {
                error!("OTP extraction request failed: {e}");
                e.to_string()
            })?;
        Ok(message.into_reply().tool_calls)
    }
}

#[derive(Debug)]
pub enum Error {
    Http(String),
    Api(String),
    Parse(String),
    Empty,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Api(e) => write!(f, "API error: {e}"),
            Error::Parse(e) => write!(f, "Parse error: {e}"),
            Error::Empty => write!(f, "Empty response"),
        }
    }
}

impl std::error::Error for Error {}
