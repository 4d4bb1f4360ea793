use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::ProviderError;
use crate::llm::{
    ChatModel, ModelCompletion, ModelMessage, ModelToolCall, ModelToolChoice, ModelToolDefinition,
    ModelUsage, TextStream,
};

const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GOOGLE_MODEL: &str = "gemini-2.5-flash";
const API_KEY_VARS: [&str; 3] = ["API_KEY", "GOOGLE_API_KEY", "GEMINI_API_KEY"];
const MISSING_KEY_MESSAGE: &str =
    "API_KEY is not set in the environment. Please configure it to use the Playground.";

#[derive(Debug, Clone)]
/// Runtime configuration for [`GoogleModel`].
pub struct GoogleModelConfig {
    /// API key; a missing key surfaces as a config error on the first call.
    pub api_key: Option<String>,
    /// Model id (for example `gemini-2.5-flash`).
    pub model: String,
    /// Optional base URL override for proxies or compatible endpoints.
    pub api_base_url: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_output_tokens: Option<u32>,
    /// `Some(0)` disables thinking for faster streamed answers.
    pub thinking_budget_tokens: Option<u32>,
}

impl GoogleModelConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            model: model.into(),
            api_base_url: None,
            temperature: None,
            top_p: None,
            max_output_tokens: Some(4096),
            thinking_budget_tokens: Some(0),
        }
    }

    /// Reads the key from `API_KEY`, then `GOOGLE_API_KEY`, then `GEMINI_API_KEY`.
    pub fn from_env(model: impl Into<String>) -> Self {
        Self {
            api_key: lookup_api_key(|name| std::env::var(name).ok()),
            ..Self::new(String::new(), model)
        }
    }
}

/// First non-blank value among [`API_KEY_VARS`], in order.
fn lookup_api_key(var: impl Fn(&str) -> Option<String>) -> Option<String> {
    API_KEY_VARS
        .iter()
        .find_map(|name| var(name).filter(|key| !key.trim().is_empty()))
}

#[derive(Debug, Clone)]
/// Gemini adapter implementing [`ChatModel`].
pub struct GoogleModel {
    client: Client,
    config: GoogleModelConfig,
}

impl GoogleModel {
    pub fn new(config: GoogleModelConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .build()
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new(GoogleModelConfig::from_env(model))
    }

    pub fn model_name(&self) -> &str {
        &self.config.model
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Config(MISSING_KEY_MESSAGE.to_string()))
    }

    fn endpoint(&self, method: &str) -> String {
        let base = self
            .config
            .api_base_url
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE_URL)
            .trim_end_matches('/');
        format!("{base}/models/{}:{method}", self.config.model)
    }
}

#[async_trait]
impl ChatModel for GoogleModel {
    async fn invoke(
        &self,
        messages: &[ModelMessage],
        tools: &[ModelToolDefinition],
        tool_choice: ModelToolChoice,
    ) -> Result<ModelCompletion, ProviderError> {
        let api_key = self.api_key()?;
        let request = build_request(messages, tools, tool_choice, &self.config);
        tracing::debug!(model = %self.config.model, tools = tools.len(), "generateContent");

        let response = self
            .client
            .post(self.endpoint("generateContent"))
            .header("x-goog-api-key", api_key)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Request(extract_api_error(response).await));
        }

        let payload = response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|err| ProviderError::Response(err.to_string()))?;

        normalize_response(payload)
    }

    async fn stream(&self, messages: &[ModelMessage]) -> Result<TextStream, ProviderError> {
        let api_key = self.api_key()?;
        let request = build_request(messages, &[], ModelToolChoice::None, &self.config);
        tracing::debug!(model = %self.config.model, "streamGenerateContent");

        let response = self
            .client
            .post(self.endpoint("streamGenerateContent"))
            .query(&[("alt", "sse")])
            .header("x-goog-api-key", api_key)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Request(extract_api_error(response).await));
        }

        Ok(Box::pin(decode_sse_text(response.bytes_stream())))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<GoogleContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GoogleSystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GoogleTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_config: Option<GoogleToolConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GoogleGenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
struct GoogleContent {
    role: String,
    #[serde(default)]
    parts: Vec<GooglePart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GoogleSystemInstruction {
    parts: Vec<GooglePart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GoogleTool {
    function_declarations: Vec<GoogleFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GoogleFunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GoogleToolConfig {
    function_calling_config: GoogleFunctionCallingConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GoogleFunctionCallingConfig {
    mode: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GoogleGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<GoogleThinkingConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GoogleThinkingConfig {
    thinking_budget: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
struct GooglePart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thought: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<GoogleFunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_response: Option<GoogleFunctionResponse>,
}

impl GooglePart {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
struct GoogleFunctionCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: Option<String>,
    args: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
struct GoogleFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<GoogleCandidate>,
    usage_metadata: Option<GoogleUsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleCandidate {
    content: Option<GoogleContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleUsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
    thoughts_token_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleErrorEnvelope {
    error: GoogleApiError,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleApiError {
    code: Option<u16>,
    status: Option<String>,
    message: Option<String>,
}

fn build_request(
    messages: &[ModelMessage],
    tools: &[ModelToolDefinition],
    tool_choice: ModelToolChoice,
    config: &GoogleModelConfig,
) -> GenerateContentRequest {
    let (contents, system_instruction) = to_google_contents(messages);

    let (tools_payload, tool_config) = if tools.is_empty() {
        (None, None)
    } else {
        let declarations = tools
            .iter()
            .map(|tool| GoogleFunctionDeclaration {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.parameters.clone(),
            })
            .collect::<Vec<_>>();
        let mode = match tool_choice {
            ModelToolChoice::Auto => "AUTO",
            ModelToolChoice::None => "NONE",
        };
        (
            Some(vec![GoogleTool {
                function_declarations: declarations,
            }]),
            Some(GoogleToolConfig {
                function_calling_config: GoogleFunctionCallingConfig {
                    mode: mode.to_string(),
                },
            }),
        )
    };

    let generation_config = GoogleGenerationConfig {
        temperature: config.temperature,
        top_p: config.top_p,
        max_output_tokens: config.max_output_tokens,
        thinking_config: config
            .thinking_budget_tokens
            .map(|budget| GoogleThinkingConfig {
                thinking_budget: budget,
            }),
    };

    GenerateContentRequest {
        contents,
        system_instruction: system_instruction.map(|instruction| GoogleSystemInstruction {
            parts: vec![GooglePart::text(instruction)],
        }),
        tools: tools_payload,
        tool_config,
        generation_config: Some(generation_config),
    }
}

fn to_google_contents(messages: &[ModelMessage]) -> (Vec<GoogleContent>, Option<String>) {
    let mut system_lines = Vec::new();
    let mut contents = Vec::new();

    for message in messages {
        match message {
            ModelMessage::System(content) => {
                if !content.is_empty() {
                    system_lines.push(content.clone());
                }
            }
            ModelMessage::User(content) => {
                if content.is_empty() {
                    continue;
                }
                contents.push(GoogleContent {
                    role: "user".to_string(),
                    parts: vec![GooglePart::text(content.clone())],
                });
            }
            ModelMessage::Assistant {
                content,
                tool_calls,
            } => {
                let mut parts = Vec::new();

                if let Some(text) = content
                    && !text.is_empty()
                {
                    parts.push(GooglePart::text(text.clone()));
                }

                for call in tool_calls {
                    parts.push(GooglePart {
                        function_call: Some(GoogleFunctionCall {
                            id: None,
                            name: Some(call.name.clone()),
                            args: Some(call.arguments.clone()),
                        }),
                        ..GooglePart::default()
                    });
                }

                if !parts.is_empty() {
                    contents.push(GoogleContent {
                        role: "model".to_string(),
                        parts,
                    });
                }
            }
            ModelMessage::ToolResult { tool_name, content } => contents.push(GoogleContent {
                role: "user".to_string(),
                parts: vec![GooglePart {
                    function_response: Some(GoogleFunctionResponse {
                        name: tool_name.clone(),
                        response: json!({ "content": content }),
                    }),
                    ..GooglePart::default()
                }],
            }),
        }
    }

    let system = if system_lines.is_empty() {
        None
    } else {
        Some(system_lines.join("\n\n"))
    };

    (contents, system)
}

fn normalize_response(response: GenerateContentResponse) -> Result<ModelCompletion, ProviderError> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(ProviderError::Response(
            "google response missing candidates".to_string(),
        ));
    };

    let mut text_parts = Vec::new();
    let mut thinking_parts = Vec::new();
    let mut tool_calls = Vec::new();

    if let Some(content) = candidate.content {
        for (index, part) in content.parts.into_iter().enumerate() {
            if let Some(text) = part.text {
                if part.thought.unwrap_or(false) {
                    thinking_parts.push(text);
                } else {
                    text_parts.push(text);
                }
            }

            if let Some(function_call) = part.function_call {
                let Some(name) = function_call.name else {
                    return Err(ProviderError::Response(
                        "google functionCall missing name".to_string(),
                    ));
                };

                tool_calls.push(ModelToolCall {
                    id: function_call
                        .id
                        .unwrap_or_else(|| format!("call_{}", index + 1)),
                    name,
                    arguments: function_call.args.unwrap_or_else(|| json!({})),
                });
            }
        }
    }

    let usage = response.usage_metadata.map(|usage| ModelUsage {
        input_tokens: usage.prompt_token_count.unwrap_or(0),
        output_tokens: usage
            .candidates_token_count
            .unwrap_or(0)
            .saturating_add(usage.thoughts_token_count.unwrap_or(0)),
    });

    let text = if text_parts.is_empty() {
        None
    } else {
        Some(text_parts.concat())
    };

    let thinking = if thinking_parts.is_empty() {
        None
    } else {
        Some(thinking_parts.join("\n"))
    };

    Ok(ModelCompletion {
        text,
        thinking,
        tool_calls,
        usage,
    })
}

/// Turns a raw `alt=sse` byte stream into answer-text deltas.
fn decode_sse_text<S, B, E>(chunks: S) -> impl Stream<Item = Result<String, ProviderError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    try_stream! {
        futures_util::pin_mut!(chunks);
        let mut decoder = SseDecoder::default();

        while let Some(chunk) = chunks.next().await {
            let bytes = chunk.map_err(|err| ProviderError::Stream(err.to_string()))?;
            let payloads = decoder.push(bytes.as_ref());
            for payload in payloads {
                if let Some(text) = stream_payload_text(&payload)? {
                    yield text;
                }
            }
        }

        for payload in decoder.finish() {
            if let Some(text) = stream_payload_text(&payload)? {
                yield text;
            }
        }
    }
}

/// Incremental server-sent-events decoder that yields joined `data:` payloads.
#[derive(Debug, Default)]
struct SseDecoder {
    pending: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(newline) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line = self.pending.drain(..=newline).collect::<Vec<_>>();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            self.accept_line(line, &mut events);
        }

        events
    }

    fn finish(mut self) -> Vec<String> {
        let mut events = Vec::new();
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&rest);
            self.accept_line(line.trim_end_matches('\r'), &mut events);
        }
        self.accept_line("", &mut events);
        events
    }

    fn accept_line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            if !self.data_lines.is_empty() {
                events.push(self.data_lines.join("\n"));
                self.data_lines.clear();
            }
            return;
        }

        if let Some(data) = line.strip_prefix("data:") {
            self.data_lines
                .push(data.strip_prefix(' ').unwrap_or(data).to_string());
        }
    }
}

fn stream_payload_text(payload: &str) -> Result<Option<String>, ProviderError> {
    let response = match serde_json::from_str::<GenerateContentResponse>(payload) {
        Ok(response) => response,
        Err(err) => {
            if let Ok(envelope) = serde_json::from_str::<GoogleErrorEnvelope>(payload) {
                return Err(ProviderError::Stream(describe_api_error(
                    envelope.error,
                    None,
                )));
            }
            return Err(ProviderError::Response(err.to_string()));
        }
    };

    let text = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter(|part| !part.thought.unwrap_or(false))
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .unwrap_or_default();

    Ok(if text.is_empty() { None } else { Some(text) })
}

fn describe_api_error(error: GoogleApiError, status: Option<reqwest::StatusCode>) -> String {
    let code = error
        .code
        .or_else(|| status.map(|status| status.as_u16()))
        .unwrap_or_default();
    let status_name = error
        .status
        .or_else(|| status.map(|status| status.to_string().to_uppercase()))
        .unwrap_or_else(|| "UNKNOWN".to_string());
    let message = error
        .message
        .unwrap_or_else(|| "unknown google api error".to_string());
    format!("google api error {code} {status_name}: {message}")
}

async fn extract_api_error(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if let Ok(parsed) = serde_json::from_str::<GoogleErrorEnvelope>(&body) {
        return describe_api_error(parsed.error, Some(status));
    }

    if body.is_empty() {
        format!("google api request failed ({status})")
    } else {
        format!("google api request failed ({status}): {body}")
    }
}

#[cfg(test)]
mod tests {
    use futures_util::stream;
    use serde_json::json;

    use super::*;

    fn code_tool() -> ModelToolDefinition {
        ModelToolDefinition {
            name: "code_interpreter".to_string(),
            description: "Executes Python code".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"code": {"type": "string"}},
                "required": ["code"]
            }),
        }
    }

    #[test]
    fn build_request_serializes_history_tools_and_function_response() {
        let messages = vec![
            ModelMessage::System("You are helpful".to_string()),
            ModelMessage::User("Sort [3, 1]".to_string()),
            ModelMessage::Assistant {
                content: None,
                tool_calls: vec![ModelToolCall {
                    id: "call_1".to_string(),
                    name: "code_interpreter".to_string(),
                    arguments: json!({"code": "print(sorted([3, 1]))"}),
                }],
            },
            ModelMessage::ToolResult {
                tool_name: "code_interpreter".to_string(),
                content: "[1, 3]".to_string(),
            },
        ];

        let config = GoogleModelConfig::new("key", DEFAULT_GOOGLE_MODEL);
        let request = build_request(&messages, &[code_tool()], ModelToolChoice::Auto, &config);
        let value = serde_json::to_value(request).expect("serializes");

        assert_eq!(
            value["systemInstruction"]["parts"][0]["text"],
            "You are helpful"
        );
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["contents"][1]["role"], "model");
        assert_eq!(
            value["contents"][1]["parts"][0]["functionCall"]["args"]["code"],
            "print(sorted([3, 1]))"
        );
        assert_eq!(
            value["contents"][2]["parts"][0]["functionResponse"]["response"]["content"],
            "[1, 3]"
        );
        assert_eq!(value["toolConfig"]["functionCallingConfig"]["mode"], "AUTO");
        assert_eq!(
            value["tools"][0]["functionDeclarations"][0]["name"],
            "code_interpreter"
        );
        assert_eq!(
            value["generationConfig"]["thinkingConfig"]["thinkingBudget"],
            0
        );
    }

    #[test]
    fn build_request_without_tools_omits_tool_config() {
        let config = GoogleModelConfig::new("key", DEFAULT_GOOGLE_MODEL);
        let request = build_request(
            &[ModelMessage::User("hi".to_string())],
            &[],
            ModelToolChoice::None,
            &config,
        );
        let value = serde_json::to_value(request).expect("serializes");

        assert!(value.get("tools").is_none());
        assert!(value.get("toolConfig").is_none());
        assert!(value.get("systemInstruction").is_none());
    }

    #[test]
    fn normalize_response_extracts_text_thinking_tool_calls_and_usage() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "answer"},
                        {"text": "reasoning", "thought": true},
                        {"functionCall": {"name": "code_interpreter", "args": {"code": "print(1+1)"}}}
                    ]
                }
            }],
            "usageMetadata": {
                "promptTokenCount": 11,
                "candidatesTokenCount": 7,
                "thoughtsTokenCount": 3
            }
        }))
        .expect("valid payload");

        let completion = normalize_response(response).expect("response normalizes");

        assert_eq!(completion.text.as_deref(), Some("answer"));
        assert_eq!(completion.thinking.as_deref(), Some("reasoning"));
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].id, "call_3");
        assert_eq!(completion.tool_calls[0].arguments["code"], "print(1+1)");
        assert_eq!(
            completion.usage,
            Some(ModelUsage {
                input_tokens: 11,
                output_tokens: 10,
            })
        );
    }

    #[test]
    fn normalize_response_requires_candidates() {
        let err = normalize_response(GenerateContentResponse {
            candidates: Vec::new(),
            usage_metadata: None,
        })
        .expect_err("should fail");

        match err {
            ProviderError::Response(message) => {
                assert!(message.contains("missing candidates"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn sse_decoder_handles_split_lines_and_crlf() {
        let mut decoder = SseDecoder::default();

        assert!(decoder.push(b"data: {\"a\":").is_empty());
        let events = decoder.push(b"1}\r\n\r\ndata: {\"b\":2}\n\n");
        assert_eq!(events, vec!["{\"a\":1}".to_string(), "{\"b\":2}".to_string()]);

        assert!(decoder.push(b"data: tail").is_empty());
        assert_eq!(decoder.finish(), vec!["tail".to_string()]);
    }

    #[test]
    fn stream_payload_text_skips_thought_parts() {
        let payload = json!({
            "candidates": [{"content": {"role": "model", "parts": [
                {"text": "hidden", "thought": true},
                {"text": "Hel"}
            ]}}]
        })
        .to_string();

        assert_eq!(
            stream_payload_text(&payload).expect("parses").as_deref(),
            Some("Hel")
        );
        assert_eq!(
            stream_payload_text("{\"candidates\": []}").expect("parses"),
            None
        );
    }

    #[test]
    fn stream_payload_error_envelope_becomes_stream_error() {
        let payload = json!({"error": {"code": 503, "status": "UNAVAILABLE", "message": "overloaded"}})
            .to_string();

        match stream_payload_text(&payload) {
            Err(ProviderError::Stream(message)) => {
                assert_eq!(message, "google api error 503 UNAVAILABLE: overloaded");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn decode_sse_text_yields_deltas_in_order() {
        let first = "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Hel\"}]}}]}\n\n";
        let second = "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"lo\"}]}}]}\n\n";
        let chunks = stream::iter(vec![
            Ok::<_, String>(first.as_bytes().to_vec()),
            Ok(second.as_bytes().to_vec()),
        ]);

        let deltas = decode_sse_text(chunks)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .expect("stream ok");

        assert_eq!(deltas, vec!["Hel".to_string(), "lo".to_string()]);
    }

    #[tokio::test]
    async fn decode_sse_text_surfaces_transport_errors() {
        let chunks = stream::iter(vec![Err::<Vec<u8>, _>("connection reset".to_string())]);

        let results = decode_sse_text(chunks).collect::<Vec<_>>().await;
        assert_eq!(results.len(), 1);
        assert!(matches!(&results[0], Err(ProviderError::Stream(message)) if message == "connection reset"));
    }

    #[test]
    fn api_key_lookup_skips_blank_vars_in_order() {
        fn vars(
            pairs: &'static [(&'static str, &'static str)],
        ) -> impl Fn(&str) -> Option<String> {
            move |name| {
                pairs
                    .iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| value.to_string())
            }
        }

        assert_eq!(
            lookup_api_key(vars(&[("API_KEY", ""), ("GOOGLE_API_KEY", "real-key")])),
            Some("real-key".to_string())
        );
        assert_eq!(
            lookup_api_key(vars(&[("API_KEY", "  "), ("GEMINI_API_KEY", "gemini-key")])),
            Some("gemini-key".to_string())
        );
        assert_eq!(
            lookup_api_key(vars(&[("API_KEY", "primary"), ("GOOGLE_API_KEY", "secondary")])),
            Some("primary".to_string())
        );
        assert_eq!(lookup_api_key(vars(&[("GOOGLE_API_KEY", "")])), None);
    }

    #[tokio::test]
    async fn missing_api_key_is_a_config_error_on_first_call() {
        let mut config = GoogleModelConfig::new("unused", DEFAULT_GOOGLE_MODEL);
        config.api_key = None;
        let model = GoogleModel::new(config).expect("client builds");

        let err = model
            .invoke(
                &[ModelMessage::User("hi".to_string())],
                &[],
                ModelToolChoice::None,
            )
            .await
            .expect_err("must fail without key");

        assert!(matches!(err, ProviderError::Config(_)));
        assert_eq!(err.user_message(), MISSING_KEY_MESSAGE);
    }
}
