use crate::config::Settings;
use crate::domain::contract::ModelSentimentPayload;
use crate::llm::credentials::CredentialStore;
use crate::llm::error::ModelDiagnosticsError;
use crate::llm::json;
use crate::llm::{Provider, ScoreInput, SentimentModel};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_TIMEOUT_SECS: u64 = 60;

const TOOL_NAME_EMIT_SENTIMENT: &str = "emit_sentiment";

#[derive(Debug)]
pub struct AnthropicClient {
    http: reqwest::Client,
    credentials: CredentialStore,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let credentials = CredentialStore::from_settings(settings)?;
        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let max_tokens = std::env::var("ANTHROPIC_MAX_TOKENS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let timeout_secs = std::env::var("ANTHROPIC_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            credentials,
            base_url,
            model,
            max_tokens,
        })
    }

    async fn send_once(
        &self,
        req: &CreateMessageRequest,
        api_key: &str,
    ) -> anyhow::Result<reqwest::Response> {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        self.http
            .post(url)
            .headers(headers)
            .json(req)
            .send()
            .await
            .context("Anthropic request failed")
    }

    async fn create_message(
        &self,
        req: CreateMessageRequest,
    ) -> anyhow::Result<(serde_json::Value, CreateMessageResponse)> {
        let api_key = self.credentials.token().await?;
        let mut res = self.send_once(&req, &api_key).await?;

        // One refresh-and-retry on auth failure when credentials come from a
        // refreshable token file.
        if res.status() == reqwest::StatusCode::UNAUTHORIZED && self.credentials.is_refreshable() {
            tracing::warn!("Anthropic returned 401; refreshing credentials and retrying once");
            let api_key = self.credentials.refresh().await?;
            res = self.send_once(&req, &api_key).await?;
        }

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Anthropic response body")?;
        if !status.is_success() {
            let raw_response_json = serde_json::from_str::<serde_json::Value>(&text).ok();
            return Err(ModelDiagnosticsError {
                provider: Provider::Anthropic,
                stage: "http",
                detail: format!("status={status}"),
                raw_output: Some(text),
                raw_response_json,
            }
            .into());
        }

        let raw_json = serde_json::from_str::<serde_json::Value>(&text)
            .with_context(|| format!("failed to parse Anthropic response JSON: {text}"))?;
        let parsed = serde_json::from_value::<CreateMessageResponse>(raw_json.clone())
            .context("failed to decode Anthropic response into CreateMessageResponse")?;
        Ok((raw_json, parsed))
    }

    fn tools() -> Vec<Tool> {
        // Strict schema for the sentiment contract; the range bounds ride
        // along so the model sees them, but validation stays on our side.
        let schema = serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["score", "positive_factors", "risk_factors"],
            "properties": {
                "score": {"type": "integer", "minimum": -5, "maximum": 5},
                "positive_factors": {
                    "type": "array",
                    "items": {"type": "string"}
                },
                "risk_factors": {
                    "type": "array",
                    "items": {"type": "string"}
                },
                "reasoning": {"type": ["string", "null"]}
            }
        });

        vec![Tool {
            name: TOOL_NAME_EMIT_SENTIMENT,
            description: "Emit the final news sentiment assessment as structured JSON",
            input_schema: schema,
        }]
    }

    fn tool_choice() -> ToolChoice {
        ToolChoice::Tool {
            name: TOOL_NAME_EMIT_SENTIMENT,
        }
    }

    fn system_prompt() -> String {
        [
            "You are an equity news sentiment engine for BSE-listed companies.",
            "Given recent news articles for one security, assess the expected near-term price impact.",
            "Return ONLY valid JSON. Do not wrap in markdown. Do not include any extra keys.",
            "Output schema:",
            "{",
            "  \"score\": 0,",
            "  \"positive_factors\": [\"short phrase\"],",
            "  \"risk_factors\": [\"short phrase\"],",
            "  \"reasoning\": \"one or two sentences, or null\"",
            "}",
            "Rules:",
            "- score is an integer from -5 (strongly negative) to +5 (strongly positive)",
            "- positive_factors and risk_factors keys MUST be present (use [] if none)",
            "- base the assessment only on the provided articles",
        ]
        .join("\n")
    }

    fn user_prompt(input: &ScoreInput) -> String {
        // Articles are already bounded upstream; serialize verbatim.
        let articles_json = serde_json::to_string_pretty(&input.articles)
            .unwrap_or_else(|_| "[]".to_string());
        format!(
            "Task: Score news sentiment for security {} as of {}.\n\nArticles JSON:\n{}",
            input.security_id, input.as_of_date, articles_json
        )
    }

    fn repair_prompt(previous_output: &str) -> String {
        let schema = [
            "{",
            "  \"score\": 0,",
            "  \"positive_factors\": [],",
            "  \"risk_factors\": [],",
            "  \"reasoning\": null",
            "}",
        ]
        .join("\n");

        format!(
            "Your previous message was NOT valid JSON.\n\n\
TASK: Output ONLY a single JSON object that exactly matches the schema.\n\
- Do NOT include any markdown, prose, or code fences.\n\
- score MUST be an integer in [-5, 5].\n\
- positive_factors and risk_factors MUST be string arrays (possibly empty).\n\n\
SCHEMA:\n{schema}\n\n\
INVALID OUTPUT (for reference only; DO NOT copy verbatim):\n{previous_output}"
        )
    }

    fn response_text(res: &CreateMessageResponse) -> String {
        let mut out = String::new();
        for block in &res.content {
            match block {
                ContentBlock::Text { text } => {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(text);
                }
                ContentBlock::ToolUse { .. } => {
                    // Prefer tool output parsing when tools are enabled.
                    continue;
                }
                ContentBlock::Thinking { .. }
                | ContentBlock::RedactedThinking { .. }
                | ContentBlock::Unknown => {}
            }
        }
        out
    }

    fn response_tool_payload(
        res: &CreateMessageResponse,
    ) -> anyhow::Result<Option<ModelSentimentPayload>> {
        for block in &res.content {
            if let ContentBlock::ToolUse { name, input, .. } = block {
                if name == TOOL_NAME_EMIT_SENTIMENT {
                    let parsed = serde_json::from_value::<ModelSentimentPayload>(input.clone())
                        .context("failed to decode tool_use.input into ModelSentimentPayload")?;
                    return Ok(Some(parsed));
                }
            }
        }
        Ok(None)
    }

    async fn try_parse_with_repairs(
        &self,
        initial_text: String,
    ) -> anyhow::Result<ModelSentimentPayload> {
        match json::parse_payload(&initial_text) {
            Ok(payload) => Ok(payload),
            Err(first_err) => {
                let mut last_err = first_err;
                let mut last_text = initial_text;
                let mut last_raw_json = None;

                // Repair attempts: 2
                for attempt in 1..=2u32 {
                    let repair_req = CreateMessageRequest {
                        model: self.model.clone(),
                        max_tokens: self.max_tokens,
                        system: Some(Self::system_prompt()),
                        messages: vec![Message {
                            role: "user",
                            content: Self::repair_prompt(&last_text),
                        }],
                        tools: Some(Self::tools()),
                        tool_choice: Some(Self::tool_choice()),
                    };

                    let (repair_raw_json, repair_res) = self.create_message(repair_req).await?;
                    if let Some(payload) = Self::response_tool_payload(&repair_res)? {
                        return Ok(payload);
                    }

                    let repair_text = Self::response_text(&repair_res);
                    match json::parse_payload(&repair_text) {
                        Ok(payload) => return Ok(payload),
                        Err(err) => {
                            last_err = err;
                            last_text = repair_text;
                            last_raw_json = Some(repair_raw_json);
                            tracing::warn!(
                                attempt,
                                error = %last_err,
                                "model output still invalid after repair attempt"
                            );
                        }
                    }
                }

                Err(ModelDiagnosticsError {
                    provider: Provider::Anthropic,
                    stage: "parse_after_repair",
                    detail: format!("final_error={last_err:#}"),
                    raw_output: Some(last_text),
                    raw_response_json: last_raw_json,
                }
                .into())
            }
        }
    }
}

#[async_trait::async_trait]
impl SentimentModel for AnthropicClient {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn score_articles(&self, input: &ScoreInput) -> anyhow::Result<ModelSentimentPayload> {
        let make_req = |max_tokens: u32| CreateMessageRequest {
            model: self.model.clone(),
            max_tokens,
            system: Some(Self::system_prompt()),
            messages: vec![Message {
                role: "user",
                content: Self::user_prompt(input),
            }],
            tools: Some(Self::tools()),
            tool_choice: Some(Self::tool_choice()),
        };

        let (_, mut res) = self.create_message(make_req(self.max_tokens)).await?;

        // If the model hit max_tokens, retry once with a higher ceiling.
        if matches!(res.stop_reason.as_deref(), Some("max_tokens")) {
            let bumped = self.max_tokens.saturating_mul(2).max(4096);
            tracing::warn!(
                security_id = %input.security_id,
                from = self.max_tokens,
                to = bumped,
                "Anthropic stop_reason=max_tokens; retrying once with higher max_tokens"
            );
            let (_, r) = self.create_message(make_req(bumped)).await?;
            res = r;
        }

        // Tool output path.
        if let Some(payload) = Self::response_tool_payload(&res)? {
            return Ok(payload);
        }

        // Fallback to text (should be rare).
        let text = Self::response_text(&res);
        self.try_parse_with_repairs(text).await
    }
}

#[derive(Debug, Clone, Serialize)]
struct CreateMessageRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateMessageResponse {
    content: Vec<ContentBlock>,

    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum ToolChoice {
    #[serde(rename = "tool")]
    Tool { name: &'static str },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },

    #[serde(rename = "thinking")]
    Thinking {
        #[serde(default)]
        thinking: String,
        #[serde(default)]
        signature: String,
    },

    #[serde(rename = "redacted_thinking")]
    RedactedThinking {
        #[serde(default)]
        data: String,
    },

    #[serde(other)]
    Unknown,
}
