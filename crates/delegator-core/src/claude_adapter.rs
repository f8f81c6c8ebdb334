//! A concrete [`WorkerAdapter`] that calls the Anthropic Messages API
//! directly over HTTP, in-process, from the Executor's own task.
//!
//! Driving the backend this way (rather than shelling out to a CLI) is the
//! hard requirement: authentication is carried by this adapter's own
//! `reqwest::Client` and API key, never by a subprocess's environment.

use std::pin::Pin;

use async_trait::async_trait;
use delegator_db::models::WorkerModel;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::worker_adapter::{AdapterError, ProgressMessage, RunEvent, TerminalResult, WorkerAdapter};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;

fn model_id(model: WorkerModel) -> &'static str {
    match model {
        WorkerModel::Haiku => "claude-3-5-haiku-20241022",
        WorkerModel::Sonnet => "claude-3-5-sonnet-20241022",
        WorkerModel::Opus => "claude-3-opus-20240229",
    }
}

/// Calls `POST /v1/messages` with the task's system/execution prompts,
/// yielding one [`ProgressMessage`] before the request and a single
/// [`TerminalResult`] once the response (or a transport failure) arrives.
#[derive(Clone)]
pub struct ClaudeApiWorkerAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    max_tokens: u32,
}

impl ClaudeApiWorkerAdapter {
    /// Build an adapter against the real Anthropic API.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            api_key: api_key.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Point at an arbitrary base URL, for tests.
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<RequestMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

/// Classify a non-2xx response. Status code is the primary signal;
/// Anthropic's `error.type` refines it when the body parses.
fn classify_http_error(status: reqwest::StatusCode, body: &str) -> AdapterError {
    let parsed = serde_json::from_str::<ErrorResponse>(body).ok();

    if let Some(ErrorResponse { error }) = &parsed {
        match error.kind.as_str() {
            "rate_limit_error" | "overloaded_error" | "api_error" => {
                return AdapterError::Transient(error.message.clone());
            }
            "authentication_error" | "permission_error" | "invalid_request_error" | "not_found_error" => {
                return AdapterError::Permanent(error.message.clone());
            }
            _ => {}
        }
    }

    let message = parsed
        .map(|r| r.error.message)
        .unwrap_or_else(|| body.to_owned());

    if status.is_server_error() || status.as_u16() == 429 || status.as_u16() == 529 {
        AdapterError::Transient(message)
    } else {
        AdapterError::Permanent(message)
    }
}

/// Network-level failure: connection refused, DNS failure, timeout. Always
/// worth retrying.
fn classify_transport_error(err: &reqwest::Error) -> AdapterError {
    AdapterError::Transient(format!("request to Anthropic API failed: {err}"))
}

#[async_trait]
impl WorkerAdapter for ClaudeApiWorkerAdapter {
    fn name(&self) -> &str {
        "claude-api"
    }

    fn run(
        &self,
        system_prompt: &str,
        execution_prompt: &str,
        working_directory: &str,
        model: WorkerModel,
    ) -> Pin<Box<dyn Stream<Item = RunEvent> + Send>> {
        let client = self.client.clone();
        let base_url = self.base_url.clone();
        let api_key = self.api_key.clone();
        let max_tokens = self.max_tokens;
        let system_prompt = format!("{system_prompt}\n\nWorking directory: {working_directory}");
        let execution_prompt = execution_prompt.to_owned();
        let model_id = model_id(model);

        let stream = async_stream::stream! {
            yield RunEvent::Progress(ProgressMessage(format!(
                "requesting completion from {model_id}"
            )));

            let request = MessagesRequest {
                model: model_id,
                max_tokens,
                system: &system_prompt,
                messages: vec![RequestMessage {
                    role: "user",
                    content: &execution_prompt,
                }],
            };

            let response = client
                .post(format!("{base_url}/v1/messages"))
                .header("x-api-key", &api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&request)
                .send()
                .await;

            let response = match response {
                Ok(response) => response,
                Err(err) => {
                    yield RunEvent::Terminal(TerminalResult::Err(classify_transport_error(&err)));
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                yield RunEvent::Terminal(TerminalResult::Err(classify_http_error(status, &body)));
                return;
            }

            match response.json::<MessagesResponse>().await {
                Ok(parsed) => {
                    let summary = parsed
                        .content
                        .iter()
                        .filter_map(|block| block.text.as_deref())
                        .collect::<Vec<_>>()
                        .join("\n");
                    if summary.is_empty() {
                        yield RunEvent::Terminal(TerminalResult::Err(AdapterError::Crashed(
                            "response had no text content".to_owned(),
                        )));
                    } else {
                        yield RunEvent::Terminal(TerminalResult::Ok(summary));
                    }
                }
                Err(err) => {
                    yield RunEvent::Terminal(TerminalResult::Err(AdapterError::Crashed(format!(
                        "failed to parse response body: {err}"
                    ))));
                }
            }
        };

        Box::pin(stream)
    }
}
