use futures_util::StreamExt;
use memchr::memchr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::{ChatRequest, ChatResponse};
use crate::core::providers::ProviderSession;
use crate::core::session::SessionId;
use crate::utils::url::construct_api_url;

/// Result of one completion round trip. A request produces exactly one
/// outcome; partial output never leaves the fetch task.
#[derive(Clone, Debug)]
pub enum CompletionOutcome {
    Success(String),
    Error(String),
}

/// Outcome tagged with the session and stream it belongs to. The controller
/// drops events whose stream id is no longer current for the session.
#[derive(Clone, Debug)]
pub struct CompletionEvent {
    pub session_id: SessionId,
    pub stream_id: u64,
    pub outcome: CompletionOutcome,
}

/// Everything the fetch task needs for one completion request.
#[derive(Debug)]
pub struct CompletionRequest {
    pub session_id: SessionId,
    pub stream_id: u64,
    pub cancel: CancellationToken,
    pub payload: ChatRequest,
}

enum SseEvent {
    Chunk(String),
    Done,
    Error(String),
}

fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let payload = line.strip_prefix("data:").map(str::trim_start)?;

    if payload == "[DONE]" {
        return Some(SseEvent::Done);
    }
    if payload.is_empty() {
        return None;
    }

    match serde_json::from_str::<ChatResponse>(payload) {
        Ok(response) => {
            let content = response
                .choices
                .first()
                .and_then(|choice| choice.delta.content.clone());
            content.map(SseEvent::Chunk)
        }
        Err(_) => Some(SseEvent::Error(format_api_error(payload))),
    }
}

fn error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.clone()),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        })?;

    let collapsed = summary.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Format an API error body for display: a one-line summary when the body is
/// JSON with a recognizable error message, the raw body otherwise.
pub fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();
    if trimmed.is_empty() {
        return "API error (empty response body)".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(summary) = error_summary(&json_value) {
            return format!("API error: {summary}");
        }
    }

    format!("API error: {trimmed}")
}

/// Spawns completion fetches and funnels their outcomes into a single
/// channel, multiplexed with terminal events by the chat loop.
#[derive(Clone)]
pub struct CompletionService {
    client: reqwest::Client,
    provider: ProviderSession,
    tx: mpsc::UnboundedSender<CompletionEvent>,
}

impl CompletionService {
    pub fn new(provider: ProviderSession) -> (Self, mpsc::UnboundedReceiver<CompletionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                client: reqwest::Client::new(),
                provider,
                tx,
            },
            rx,
        )
    }

    /// Run one completion request in a background task. The task accumulates
    /// streamed chunks internally and reports a single outcome, so a failed
    /// or cancelled request never produces a partial assistant message.
    pub fn spawn(&self, request: CompletionRequest) {
        let tx = self.tx.clone();
        let client = self.client.clone();
        let provider = self.provider.clone();

        tokio::spawn(async move {
            let CompletionRequest {
                session_id,
                stream_id,
                cancel,
                payload,
            } = request;

            tracing::debug!(session_id, stream_id, model = %payload.model, "starting completion");

            let outcome = tokio::select! {
                outcome = fetch_completion(&client, &provider, &payload) => outcome,
                _ = cancel.cancelled() => {
                    tracing::debug!(session_id, stream_id, "completion cancelled");
                    return;
                }
            };

            let _ = tx.send(CompletionEvent {
                session_id,
                stream_id,
                outcome,
            });
        });
    }

    #[cfg(test)]
    pub fn send_for_test(&self, event: CompletionEvent) {
        let _ = self.tx.send(event);
    }
}

async fn fetch_completion(
    client: &reqwest::Client,
    provider: &ProviderSession,
    payload: &ChatRequest,
) -> CompletionOutcome {
    let url = construct_api_url(&provider.base_url, "chat/completions");
    let response = match client
        .post(url)
        .header("Content-Type", "application/json")
        .header("Authorization", format!("Bearer {}", provider.api_key))
        .json(payload)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(error = %e, "completion request failed to send");
            return CompletionOutcome::Error(format!("Request failed: {e}"));
        }
    };

    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<no body>".to_string());
        tracing::warn!(%status, "completion request rejected");
        return CompletionOutcome::Error(format_api_error(&body));
    }

    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();
    let mut content = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk_bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => return CompletionOutcome::Error(format!("Stream failed: {e}")),
        };
        buffer.extend_from_slice(&chunk_bytes);

        while let Some(newline_pos) = memchr(b'\n', &buffer) {
            let line = match std::str::from_utf8(&buffer[..newline_pos]) {
                Ok(s) => s.trim().to_string(),
                Err(_) => {
                    // Skip the malformed line; the rest of the stream may
                    // still be usable.
                    buffer.drain(..=newline_pos);
                    continue;
                }
            };
            buffer.drain(..=newline_pos);

            match parse_sse_line(&line) {
                Some(SseEvent::Chunk(delta)) => content.push_str(&delta),
                Some(SseEvent::Done) => return CompletionOutcome::Success(content),
                Some(SseEvent::Error(message)) => return CompletionOutcome::Error(message),
                None => {}
            }
        }
    }

    // Stream ended without [DONE]; whatever accumulated is the full response.
    CompletionOutcome::Success(content)
}
