//! OpenAI-compatible chat-completions client with SSE streaming.

use std::collections::{BTreeMap, VecDeque};

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::chat::{Message, Role, ToolCall};
use crate::generator::{
    EventStream, Generator, GeneratorError, ModelUsage, ReasoningEffort, RequestConfig, StopReason,
    StreamEvent,
};
use crate::tools::{TOOL_CANCELLED, ToolDefinition};

pub struct HttpGenerator {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpGenerator {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, GeneratorError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("chatterm/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, GeneratorError> {
        let mut request = self.http.post(self.endpoint()).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeneratorError::Status {
                status: status.as_u16(),
                body: body.chars().take(2_000).collect(),
            });
        }
        Ok(response)
    }
}

/// Request body shared by the unary and streaming calls.
pub fn request_body(
    messages: &[Message],
    tools: &[ToolDefinition],
    config: &RequestConfig,
    stream: bool,
) -> Value {
    let mut body = Map::new();
    body.insert("model".into(), json!(config.model));
    body.insert("messages".into(), Value::Array(wire_messages(messages)));
    body.insert("stream".into(), json!(stream));
    if stream {
        body.insert("stream_options".into(), json!({"include_usage": true}));
    }
    if let Some(max) = config.max_tokens {
        body.insert("max_tokens".into(), json!(max));
    }
    if let Some(t) = config.temperature {
        body.insert("temperature".into(), json!(t));
    }
    if config.reasoning_effort != ReasoningEffort::None {
        body.insert(
            "reasoning_effort".into(),
            json!(config.reasoning_effort.as_str()),
        );
    }
    if !tools.is_empty() {
        let defs: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body.insert("tools".into(), Value::Array(defs));
    }
    Value::Object(body)
}

/// Serialize messages for the wire.
///
/// Tool calls left without a result (rejected by the user) are answered with
/// the cancellation text so the endpoint never sees a dangling call.
pub fn wire_messages(messages: &[Message]) -> Vec<Value> {
    fn close_unanswered(out: &mut Vec<Value>, unanswered: &mut Vec<String>) {
        for id in unanswered.drain(..) {
            out.push(json!({"role": "tool", "tool_call_id": id, "content": TOOL_CANCELLED}));
        }
    }

    let mut out = Vec::with_capacity(messages.len());
    let mut unanswered: Vec<String> = Vec::new();
    for msg in messages {
        if msg.role == Role::Tool {
            let id = msg.tool_call_id.clone().unwrap_or_default();
            unanswered.retain(|u| *u != id);
            out.push(json!({"role": "tool", "tool_call_id": id, "content": msg.content}));
            continue;
        }
        close_unanswered(&mut out, &mut unanswered);
        match msg.role {
            Role::Assistant if !msg.tool_calls.is_empty() => {
                let calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": {"name": c.name, "arguments": c.arguments},
                        })
                    })
                    .collect();
                unanswered = msg.tool_calls.iter().map(|c| c.id.clone()).collect();
                out.push(json!({"role": "assistant", "content": msg.content, "tool_calls": calls}));
            }
            role => out.push(json!({"role": role.as_str(), "content": msg.content})),
        }
    }
    close_unanswered(&mut out, &mut unanswered);
    out
}

#[derive(Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Incremental SSE decoder for chat-completion chunks.
#[derive(Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    calls: BTreeMap<u64, PartialCall>,
    done: bool,
}

type Decoded = Result<StreamEvent, GeneratorError>;

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every event completed by this chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Decoded> {
        self.buffer.extend(chunk.iter().filter(|b| **b != b'\r'));
        let mut out = Vec::new();
        while let Some(end) = find_event_end(&self.buffer) {
            let event: Vec<u8> = self.buffer.drain(..end + 2).collect();
            self.process_event(&String::from_utf8_lossy(&event), &mut out);
        }
        out
    }

    /// Flush whatever remains at end of body.
    pub fn finish(&mut self) -> Vec<Decoded> {
        let mut out = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.process_event(&String::from_utf8_lossy(&rest), &mut out);
        }
        self.flush_calls(&mut out);
        out
    }

    fn process_event(&mut self, text: &str, out: &mut Vec<Decoded>) {
        let data: Vec<&str> = text
            .lines()
            .filter_map(|l| l.strip_prefix("data:"))
            .map(|d| d.strip_prefix(' ').unwrap_or(d))
            .collect();
        if data.is_empty() || self.done {
            return;
        }
        let payload = data.join("\n");
        if payload.trim() == "[DONE]" {
            self.done = true;
            self.flush_calls(out);
            return;
        }
        match serde_json::from_str::<Value>(&payload) {
            Ok(chunk) => self.apply_chunk(&chunk, out),
            Err(e) => out.push(Err(e.into())),
        }
    }

    fn apply_chunk(&mut self, chunk: &Value, out: &mut Vec<Decoded>) {
        if let Some(err) = chunk.get("error") {
            let msg = err
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            out.push(Err(GeneratorError::Protocol(msg)));
            return;
        }

        for choice in chunk["choices"].as_array().into_iter().flatten() {
            let delta = &choice["delta"];
            let reasoning = delta
                .get("reasoning")
                .or_else(|| delta.get("reasoning_content"))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty());
            if let Some(r) = reasoning {
                out.push(Ok(StreamEvent::Reasoning(r.to_string())));
            }
            if let Some(c) = delta["content"].as_str().filter(|s| !s.is_empty()) {
                out.push(Ok(StreamEvent::Content(c.to_string())));
            }
            for frag in delta["tool_calls"].as_array().into_iter().flatten() {
                let index = frag["index"].as_u64().unwrap_or(0);
                let call = self.calls.entry(index).or_default();
                if let Some(id) = frag["id"].as_str().filter(|s| !s.is_empty()) {
                    call.id = id.to_string();
                }
                if let Some(name) = frag["function"]["name"].as_str().filter(|s| !s.is_empty()) {
                    call.name = name.to_string();
                }
                if let Some(args) = frag["function"]["arguments"].as_str() {
                    call.arguments.push_str(args);
                }
            }
            if let Some(reason) = choice["finish_reason"].as_str() {
                self.flush_calls(out);
                out.push(Ok(StreamEvent::StopReason(StopReason::from_wire(reason))));
            }
        }

        if let Some(usage) = chunk.get("usage").filter(|u| u.is_object()) {
            out.push(Ok(StreamEvent::Usage(usage_from_wire(usage))));
            let metrics: Map<String, Value> = ["id", "model", "provider", "system_fingerprint"]
                .iter()
                .filter_map(|k| chunk.get(*k).map(|v| (k.to_string(), v.clone())))
                .collect();
            if !metrics.is_empty() {
                out.push(Ok(StreamEvent::Metrics(Value::Object(metrics))));
            }
        }
    }

    fn flush_calls(&mut self, out: &mut Vec<Decoded>) {
        for (index, call) in std::mem::take(&mut self.calls) {
            if call.name.is_empty() {
                warn!(index, "dropping tool call fragment without a name");
                continue;
            }
            let id = if call.id.is_empty() {
                format!("call_{index}")
            } else {
                call.id
            };
            out.push(Ok(StreamEvent::ToolCall(ToolCall {
                id,
                name: call.name,
                arguments: call.arguments,
            })));
        }
    }
}

fn find_event_end(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn usage_from_wire(usage: &Value) -> ModelUsage {
    let int = |v: &Value| v.as_i64().map(|n| n.clamp(0, i32::MAX as i64) as i32);
    let mut out = ModelUsage::default();
    if let Some(n) = int(&usage["prompt_tokens"]) {
        out = out.with("input", n, 0.0);
    }
    if let Some(n) = int(&usage["completion_tokens"]) {
        out = out.with("output", n, 0.0);
    }
    if let Some(n) = int(&usage["completion_tokens_details"]["reasoning_tokens"]) {
        out = out.with("reasoning", n, 0.0);
    }
    if let Some(n) = int(&usage["prompt_tokens_details"]["cached_tokens"]) {
        out = out.with("cached_input", n, 0.0);
    }
    if let Some(cost) = usage["cost"].as_f64() {
        let total = int(&usage["total_tokens"]).unwrap_or(0);
        out = out.with("total", total, cost);
    }
    out
}

struct SseState {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    decoder: SseDecoder,
    queue: VecDeque<Decoded>,
    finished: bool,
}

fn decode_stream(body: BoxStream<'static, reqwest::Result<Bytes>>) -> EventStream {
    let state = SseState {
        body,
        decoder: SseDecoder::new(),
        queue: VecDeque::new(),
        finished: false,
    };
    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.queue.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.body.next().await {
                Some(Ok(bytes)) => st.queue.extend(st.decoder.push(&bytes)),
                Some(Err(e)) => {
                    st.finished = true;
                    st.queue.push_back(Err(e.into()));
                }
                None => {
                    st.finished = true;
                    st.queue.extend(st.decoder.finish());
                }
            }
        }
    })
    .boxed()
}

#[async_trait::async_trait]
impl Generator for HttpGenerator {
    async fn generate(
        &self,
        messages: &[Message],
        config: &RequestConfig,
    ) -> Result<Message, GeneratorError> {
        let body = request_body(messages, &[], config, false);
        let value: Value = self.post(&body).await?.json().await?;
        let msg = &value["choices"][0]["message"];
        let content = msg["content"]
            .as_str()
            .ok_or_else(|| GeneratorError::Protocol("response has no message content".into()))?;
        let mut reply = Message::assistant(content);
        reply.reasoning = msg
            .get("reasoning")
            .or_else(|| msg.get("reasoning_content"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Ok(reply)
    }

    async fn stream(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        config: &RequestConfig,
    ) -> Result<EventStream, GeneratorError> {
        let body = request_body(messages, tools, config, true);
        debug!(model = %config.model, messages = messages.len(), tools = tools.len(), "opening stream");
        let response = self.post(&body).await?;
        Ok(decode_stream(response.bytes_stream().boxed()))
    }
}
