//! Gemini provider implementation.
//!
//! Talks to the Generative Language REST API:
//! - `models/{model}:generateContent` (non-streaming, may return a function call)
//! - `models/{model}:streamGenerateContent?alt=sse` (streaming text)
//! - `models/{model}:batchEmbedContents` (embeddings for the knowledge base)

use async_trait::async_trait;
use futures::StreamExt;
use sagebot_core::action::{ActionRequest, ActionSpec};
use sagebot_core::error::ProviderError;
use sagebot_core::provider::*;
use sagebot_core::turn::{ConversationTurn, Prompt};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// A Gemini LLM provider.
pub struct GeminiProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    /// Create a new Gemini provider.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: "gemini".into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!("{}/models/{model}:{method}", self.base_url)
    }

    /// Convert prompt turns to Gemini `contents`.
    fn to_api_contents(prompt: &Prompt) -> Vec<ApiContent> {
        prompt
            .turns()
            .iter()
            .map(|turn| match turn {
                ConversationTurn::User { text } => ApiContent::text("user", text),
                ConversationTurn::Model { text } => ApiContent::text("model", text),
                ConversationTurn::ModelAction(req) => ApiContent {
                    role: Some("model".into()),
                    parts: vec![ApiPart {
                        function_call: Some(ApiFunctionCall {
                            name: req.name.clone(),
                            args: if req.arguments.is_null() {
                                serde_json::json!({})
                            } else {
                                req.arguments.clone()
                            },
                        }),
                        thought_signature: req.thought_signature.clone(),
                        ..Default::default()
                    }],
                },
                ConversationTurn::ActionResult(res) => ApiContent {
                    role: Some("user".into()),
                    parts: vec![ApiPart {
                        function_response: Some(ApiFunctionResponse {
                            name: res.name.clone(),
                            response: res.response.clone(),
                        }),
                        ..Default::default()
                    }],
                },
            })
            .collect()
    }

    /// Convert action specs to a Gemini `tools` entry.
    fn to_api_tools(actions: &[ActionSpec]) -> Vec<serde_json::Value> {
        if actions.is_empty() {
            return Vec::new();
        }
        let declarations: Vec<serde_json::Value> =
            actions.iter().map(ActionSpec::to_declaration).collect();
        vec![serde_json::json!({ "functionDeclarations": declarations })]
    }

    fn build_body(request: &GenerateRequest) -> serde_json::Value {
        let mut generation_config = serde_json::json!({
            "temperature": request.config.temperature,
        });
        if let Some(top_p) = request.config.top_p {
            generation_config["topP"] = serde_json::json!(top_p);
        }
        if let Some(max) = request.config.max_output_tokens {
            generation_config["maxOutputTokens"] = serde_json::json!(max);
        }

        let mut body = serde_json::json!({
            "contents": Self::to_api_contents(&request.prompt),
            "generationConfig": generation_config,
        });

        let tools = Self::to_api_tools(&request.actions);
        if !tools.is_empty() {
            body["tools"] = serde_json::json!(tools);
        }
        body
    }

    async fn post(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(response);
        }

        let error_body = response.text().await.unwrap_or_default();
        warn!(provider = %self.name, status, body = %error_body, "Provider returned error");
        Err(error_from_status(status, &error_body))
    }
}

#[async_trait]
impl sagebot_core::Provider for GeminiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: GenerateRequest) -> Result<Generation, ProviderError> {
        let url = self.model_url(&request.model, "generateContent");
        let body = Self::build_body(&request);

        debug!(
            provider = %self.name,
            model = %request.model,
            turns = request.prompt.len(),
            actions = request.actions.len(),
            "Sending generate request"
        );

        let response = self.post(&url, &body).await?;
        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(format!("Failed to parse response: {e}")))?;

        parse_generation(api_response)
    }

    async fn stream(
        &self,
        request: GenerateRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError>
    {
        let url = format!(
            "{}?alt=sse",
            self.model_url(&request.model, "streamGenerateContent")
        );
        let body = Self::build_body(&request);

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self.post(&url, &body).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Spawn task to read the SSE byte stream and parse chunks
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut lines = SseLineBuffer::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for data in lines.push(&bytes) {
                    match parse_stream_event(&data) {
                        Ok(Some(text)) => {
                            if tx.send(Ok(StreamChunk::text(text))).await.is_err() {
                                return; // receiver dropped
                            }
                        }
                        Ok(None) => {}
                        Err(e @ ProviderError::MalformedResponse(_)) => {
                            trace!(
                                provider = %provider_name,
                                data = %data,
                                error = %e,
                                "Ignoring unparseable SSE chunk"
                            );
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }

            let _ = tx.send(Ok(StreamChunk::done())).await;
        });

        Ok(rx)
    }

    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.model_url(model, "batchEmbedContents");
        let requests: Vec<serde_json::Value> = texts
            .iter()
            .map(|t| {
                serde_json::json!({
                    "model": format!("models/{model}"),
                    "content": { "parts": [{ "text": t }] },
                })
            })
            .collect();
        let body = serde_json::json!({ "requests": requests });

        debug!(provider = %self.name, model, count = texts.len(), "Sending embedding request");

        let response = self.post(&url, &body).await?;
        let api_resp: EmbeddingApiResponse = response.json().await.map_err(|e| {
            ProviderError::MalformedResponse(format!("Failed to parse embedding response: {e}"))
        })?;

        if api_resp.embeddings.len() != texts.len() {
            return Err(ProviderError::MalformedResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                api_resp.embeddings.len()
            )));
        }

        Ok(api_resp.embeddings.into_iter().map(|e| e.values).collect())
    }
}

/// Map a non-success HTTP status and body to a [`ProviderError`].
pub fn error_from_status(status: u16, body: &str) -> ProviderError {
    let envelope = serde_json::from_str::<ApiErrorEnvelope>(body).ok();
    let message = envelope
        .as_ref()
        .map(|e| e.error.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.trim().to_string());

    match status {
        503 => ProviderError::Unavailable { message },
        429 => ProviderError::RateLimited {
            retry_after_secs: envelope.as_ref().and_then(|e| e.error.retry_delay_secs()),
            message,
        },
        401 | 403 => ProviderError::AuthenticationFailed(message),
        _ => ProviderError::ApiError {
            status_code: status,
            message,
        },
    }
}

/// Turn a complete response into text or an action request.
///
/// A function call anywhere in the first candidate wins over any text.
fn parse_generation(response: ApiResponse) -> Result<Generation, ProviderError> {
    let candidate = response.candidates.into_iter().next().ok_or_else(|| {
        let reason = response
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .unwrap_or_else(|| "no candidates".into());
        ProviderError::MalformedResponse(format!("Empty response: {reason}"))
    })?;

    let parts = candidate.content.map(|c| c.parts).unwrap_or_default();

    if let Some(part) = parts.iter().find(|p| p.function_call.is_some()) {
        let call = part.function_call.clone().unwrap_or_default();
        if call.name.is_empty() {
            return Err(ProviderError::MalformedResponse(
                "function call without a name".into(),
            ));
        }
        return Ok(Generation::Action(ActionRequest {
            name: call.name,
            arguments: call.args,
            thought_signature: part.thought_signature.clone(),
        }));
    }

    Ok(Generation::Text(visible_text(&parts)))
}

/// Parse one SSE `data:` payload into the text it carries.
fn parse_stream_event(data: &str) -> Result<Option<String>, ProviderError> {
    let value: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

    if let Some(err) = value.get("error") {
        let code = err["code"].as_u64().unwrap_or(500) as u16;
        return Err(error_from_status(code, data));
    }

    let response: ApiResponse = serde_json::from_value(value)
        .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
    let parts = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts)
        .unwrap_or_default();

    if parts.iter().any(|p| p.function_call.is_some()) {
        debug!("Ignoring function call in streamed answer");
    }

    let text = visible_text(&parts);
    Ok((!text.is_empty()).then_some(text))
}

/// Concatenate text parts, skipping thought summaries.
fn visible_text(parts: &[ApiPart]) -> String {
    parts
        .iter()
        .filter(|p| !p.thought.unwrap_or(false))
        .filter_map(|p| p.text.as_deref())
        .collect()
}

/// Splits an SSE byte stream into `data:` payloads.
#[derive(Debug, Default)]
struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    /// Feed raw body bytes, returning the payload of every complete `data:` line.
    ///
    /// Bytes are only decoded once a full line is buffered, so a character
    /// split across network reads stays intact.
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();

        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw[..line_end]);
            let line = line.trim_end_matches('\r');

            // Skip empty lines and SSE comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    out.push(data.to_string());
                }
            }
        }
        out
    }
}

// --- Gemini API types (internal) ---

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<ApiPart>,
}

impl ApiContent {
    fn text(role: &str, text: &str) -> Self {
        Self {
            role: Some(role.into()),
            parts: vec![ApiPart {
                text: Some(text.into()),
                ..Default::default()
            }],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<ApiFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<ApiFunctionResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought_signature: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ApiFunctionCall {
    #[serde(default)]
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiFunctionResponse {
    name: String,
    response: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<ApiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCandidate {
    #[serde(default)]
    content: Option<ApiContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Vec<serde_json::Value>,
}

impl ApiErrorBody {
    /// `retryDelay` of the `google.rpc.RetryInfo` detail, rounded up to whole seconds.
    fn retry_delay_secs(&self) -> Option<u64> {
        self.details
            .iter()
            .find(|d| {
                d["@type"]
                    .as_str()
                    .is_some_and(|t| t.ends_with("google.rpc.RetryInfo"))
            })
            .and_then(|d| d["retryDelay"].as_str())
            .and_then(|s| s.trim_end_matches('s').parse::<f64>().ok())
            .map(|secs| secs.ceil() as u64)
    }
}

// --- Embedding API types ---

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sagebot_core::Provider;
    use sagebot_core::action::{ActionResult, FieldSpec, FieldType};
    use sagebot_core::turn::ActionResponse;

    fn provider() -> GeminiProvider {
        GeminiProvider::new(DEFAULT_BASE_URL, "test-key").unwrap()
    }

    #[test]
    fn constructor_trims_base_url() {
        let p = GeminiProvider::new("http://localhost:9999/v1beta/", "k").unwrap();
        assert_eq!(p.name(), "gemini");
        assert_eq!(
            p.model_url("gemini-2.5-flash", "generateContent"),
            "http://localhost:9999/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn request_body_shape() {
        let mut prompt = Prompt::new("Gold price?");
        let mut req = ActionRequest::new("getAssetPrice", serde_json::json!({"symbol": "XAU/USD"}));
        req.thought_signature = Some("CqIDAdHt".into());
        let result = ActionResult::success("getAssetPrice", serde_json::json!({"price": "2400.1"}));
        prompt.append_exchange(req, ActionResponse::from_result(&result));

        let spec = ActionSpec::new("getAssetPrice", "Quote")
            .field(FieldSpec::required("symbol", FieldType::String));
        let request = GenerateRequest::new("gemini-2.5-flash", prompt)
            .with_actions(vec![spec])
            .with_config(GenerationConfig {
                temperature: 0.5,
                top_p: Some(0.9),
                max_output_tokens: None,
            });

        let body = GeminiProvider::build_body(&request);
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[0]["parts"][0]["text"], "Gold price?");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["functionCall"]["name"], "getAssetPrice");
        assert_eq!(contents[1]["parts"][0]["functionCall"]["args"]["symbol"], "XAU/USD");
        assert_eq!(contents[1]["parts"][0]["thoughtSignature"], "CqIDAdHt");
        assert_eq!(
            contents[2]["parts"][0]["functionResponse"]["response"]["result"]["price"],
            "2400.1"
        );
        assert_eq!(
            body["tools"][0]["functionDeclarations"][0]["parameters"]["type"],
            "object"
        );
        assert_eq!(body["generationConfig"]["topP"], serde_json::json!(0.9f32));
        assert!(body["generationConfig"].get("maxOutputTokens").is_none());
    }

    #[test]
    fn no_tools_key_without_actions() {
        let body = GeminiProvider::build_body(&GenerateRequest::new("m", Prompt::new("hi")));
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn parse_text_response() {
        let data = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hello "},{"text":"there"}]},"finishReason":"STOP"}]}"#;
        let parsed: ApiResponse = serde_json::from_str(data).unwrap();
        assert_eq!(
            parse_generation(parsed).unwrap(),
            Generation::Text("Hello there".into())
        );
    }

    #[test]
    fn parse_function_call_wins_over_text() {
        let data = r#"{"candidates":[{"content":{"role":"model","parts":[
            {"text":"Let me check."},
            {"functionCall":{"name":"scrapePage","args":{"url":"https://safebroker.org/blog/how-add-indicator-mt4-mt5"}},"thoughtSignature":"sig-1"}
        ]}}]}"#;
        let parsed: ApiResponse = serde_json::from_str(data).unwrap();
        match parse_generation(parsed).unwrap() {
            Generation::Action(req) => {
                assert_eq!(req.name, "scrapePage");
                assert_eq!(
                    req.arguments["url"],
                    "https://safebroker.org/blog/how-add-indicator-mt4-mt5"
                );
                assert_eq!(req.thought_signature.as_deref(), Some("sig-1"));
            }
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[test]
    fn parse_blocked_response_is_malformed() {
        let data = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        let parsed: ApiResponse = serde_json::from_str(data).unwrap();
        let err = parse_generation(parsed).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn thought_parts_are_hidden() {
        let data = r#"{"candidates":[{"content":{"parts":[{"text":"thinking...","thought":true},{"text":"Answer"}]}}]}"#;
        assert_eq!(parse_stream_event(data).unwrap().as_deref(), Some("Answer"));
    }

    #[test]
    fn stream_event_without_text_is_skipped() {
        let data = r#"{"candidates":[{"content":{"parts":[]},"finishReason":"STOP"}]}"#;
        assert_eq!(parse_stream_event(data).unwrap(), None);
    }

    #[test]
    fn stream_error_event_maps_status() {
        let data = r#"{"error":{"code":503,"message":"The model is overloaded.","status":"UNAVAILABLE"}}"#;
        let err = parse_stream_event(data).unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable { .. }));
    }

    #[test]
    fn sse_buffer_handles_split_lines() {
        let mut buf = SseLineBuffer::default();
        assert!(buf.push(b"data: {\"a\"").is_empty());
        let out = buf.push(b":1}\r\n\r\n: keep-alive\ndata: {\"b\":2}\n");
        assert_eq!(out, vec!["{\"a\":1}".to_string(), "{\"b\":2}".to_string()]);
    }

    #[test]
    fn sse_buffer_keeps_split_characters() {
        let line = "data: {\"text\":\"سلام\"}\n".as_bytes();
        // Split inside the first two-byte character.
        let split = line.iter().position(|&b| b == 0xD8).unwrap() + 1;

        let mut buf = SseLineBuffer::default();
        assert!(buf.push(&line[..split]).is_empty());
        assert_eq!(buf.push(&line[split..]), vec!["{\"text\":\"سلام\"}".to_string()]);
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            error_from_status(503, "overloaded"),
            ProviderError::Unavailable { .. }
        ));
        assert!(matches!(
            error_from_status(401, "{}"),
            ProviderError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            error_from_status(403, ""),
            ProviderError::AuthenticationFailed(_)
        ));
        match error_from_status(
            400,
            r#"{"error":{"code":400,"message":"Please ensure that function response turn comes immediately after a function call turn.","status":"INVALID_ARGUMENT"}}"#,
        ) {
            ProviderError::ApiError { status_code, message } => {
                assert_eq!(status_code, 400);
                assert!(message.starts_with("Please ensure"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rate_limit_reads_retry_info() {
        let body = r#"{"error":{"code":429,"message":"You exceeded your current quota.","status":"RESOURCE_EXHAUSTED","details":[
            {"@type":"type.googleapis.com/google.rpc.Help","links":[]},
            {"@type":"type.googleapis.com/google.rpc.RetryInfo","retryDelay":"22s"}
        ]}}"#;
        match error_from_status(429, body) {
            ProviderError::RateLimited { retry_after_secs, message } => {
                assert_eq!(retry_after_secs, Some(22));
                assert_eq!(message, "You exceeded your current quota.");
            }
            other => panic!("unexpected {other:?}"),
        }

        match error_from_status(429, "quota") {
            ProviderError::RateLimited { retry_after_secs, .. } => assert!(retry_after_secs.is_none()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_embedding_response() {
        let data = r#"{"embeddings":[{"values":[0.1,0.2]},{"values":[0.3,0.4]}]}"#;
        let parsed: EmbeddingApiResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.embeddings.len(), 2);
        assert_eq!(parsed.embeddings[1].values, vec![0.3, 0.4]);
    }

    #[tokio::test]
    async fn embed_empty_input_skips_request() {
        let out = provider().embed("text-embedding-004", &[]).await.unwrap();
        assert!(out.is_empty());
    }

    mod http {
        use super::*;
        use axum::Router;
        use axum::routing::post;

        async fn serve(router: Router) -> String {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, router).await.unwrap();
            });
            format!("http://{addr}/v1beta")
        }

        #[tokio::test]
        async fn streams_sse_chunks_in_order() {
            let router = Router::new().route(
                "/v1beta/models/{call}",
                post(|| async {
                    concat!(
                        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Gold is \"}]}}]}\r\n\r\n",
                        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"2400 USD\"}]},\"finishReason\":\"STOP\"}]}\r\n\r\n",
                    )
                }),
            );
            let base = serve(router).await;
            let provider = GeminiProvider::new(base, "k").unwrap();

            let mut rx = provider
                .stream(GenerateRequest::new("gemini-2.5-flash", Prompt::new("gold?")))
                .await
                .unwrap();
            let mut text = String::new();
            let mut done = false;
            while let Some(chunk) = rx.recv().await {
                let chunk = chunk.unwrap();
                if let Some(c) = chunk.content {
                    text.push_str(&c);
                }
                done |= chunk.done;
            }
            assert_eq!(text, "Gold is 2400 USD");
            assert!(done);
        }

        #[tokio::test]
        async fn stream_keeps_characters_split_across_frames() {
            let event = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"سلام\"}]}}]}\n\n"
                .as_bytes()
                .to_vec();
            let split = event.iter().position(|&b| b == 0xD8).unwrap() + 1;
            let frames = vec![event[..split].to_vec(), event[split..].to_vec()];

            let router = Router::new().route(
                "/v1beta/models/{call}",
                post(move || {
                    let frames = frames.clone();
                    async move {
                        let body = futures::stream::unfold(frames.into_iter(), |mut rest| async move {
                            let frame = rest.next()?;
                            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                            Some((Ok::<_, std::io::Error>(frame), rest))
                        });
                        axum::body::Body::from_stream(body)
                    }
                }),
            );
            let base = serve(router).await;
            let provider = GeminiProvider::new(base, "k").unwrap();

            let mut rx = provider
                .stream(GenerateRequest::new("gemini-2.5-flash", Prompt::new("سلام")))
                .await
                .unwrap();
            let mut text = String::new();
            while let Some(chunk) = rx.recv().await {
                if let Some(c) = chunk.unwrap().content {
                    text.push_str(&c);
                }
            }
            assert_eq!(text, "سلام");
        }

        #[tokio::test]
        async fn generate_maps_unavailable() {
            let router = Router::new().route(
                "/v1beta/models/{call}",
                post(|| async {
                    (
                        axum::http::StatusCode::SERVICE_UNAVAILABLE,
                        r#"{"error":{"code":503,"message":"The model is overloaded.","status":"UNAVAILABLE"}}"#,
                    )
                }),
            );
            let base = serve(router).await;
            let provider = GeminiProvider::new(base, "k").unwrap();

            let err = provider
                .generate(GenerateRequest::new("gemini-2.5-flash", Prompt::new("hi")))
                .await
                .unwrap_err();
            assert!(err.is_retryable());
            assert!(err.to_string().contains("overloaded"));
        }
    }
}
