//! Contract with the remote text-generation service.

use std::collections::BTreeMap;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::chat::{Message, ToolCall};
use crate::tools::ToolDefinition;

/// Three-level deliberation hint, plus "off".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    /// none → low → medium → high → none
    pub fn cycle(self) -> Self {
        match self {
            Self::None => Self::Low,
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High => Self::None,
        }
    }

    /// Parse the `--think` flag. A bare flag (empty value) means medium.
    pub fn parse_flag(s: &str) -> Result<Self, String> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "medium" | "m" => Ok(Self::Medium),
            "low" | "l" => Ok(Self::Low),
            "high" | "h" => Ok(Self::High),
            "none" | "off" => Ok(Self::None),
            other => Err(format!(
                "invalid reasoning effort '{other}' (expected low|l|medium|m|high|h)"
            )),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Fixed per-call configuration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestConfig {
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub reasoning_effort: ReasoningEffort,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ToolCalls,
    ContentFilter,
    Other(String),
}

impl StopReason {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "stop" | "end_turn" => Self::EndTurn,
            "length" | "max_tokens" => Self::MaxTokens,
            "tool_calls" | "tool_use" | "function_call" => Self::ToolCalls,
            "content_filter" => Self::ContentFilter,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct UsageQuantity {
    pub quantity: i32,
    pub price: f64,
}

/// Token usage keyed by kind (`input`, `output`, `reasoning`, `cached_input`, ...).
///
/// Protocol note: snapshots within one call are treated as deltas and merged
/// additively. An endpoint that reports running totals instead would be
/// double-counted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelUsage {
    pub kinds: BTreeMap<String, UsageQuantity>,
}

impl ModelUsage {
    pub fn with(mut self, kind: &str, quantity: i32, price: f64) -> Self {
        self.kinds
            .insert(kind.to_string(), UsageQuantity { quantity, price });
        self
    }

    pub fn merge(&mut self, other: &ModelUsage) {
        for (kind, q) in &other.kinds {
            let entry = self.kinds.entry(kind.clone()).or_default();
            entry.quantity = entry.quantity.saturating_add(q.quantity);
            entry.price += q.price;
        }
    }

    pub fn quantity(&self, kind: &str) -> i32 {
        self.kinds.get(kind).map(|q| q.quantity).unwrap_or(0)
    }

    pub fn total_price(&self) -> f64 {
        self.kinds.values().map(|q| q.price).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// One server-streamed event.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    Content(String),
    Reasoning(String),
    ToolCall(ToolCall),
    StopReason(StopReason),
    Usage(ModelUsage),
    Metrics(serde_json::Value),
}

#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("{0}")]
    Protocol(String),
}

/// End of stream is the normal end of this stream; errors are transport errors.
pub type EventStream = BoxStream<'static, Result<StreamEvent, GeneratorError>>;

/// Dropping an [`EventStream`] cancels the underlying call.
#[async_trait::async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        messages: &[Message],
        config: &RequestConfig,
    ) -> Result<Message, GeneratorError>;

    async fn stream(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        config: &RequestConfig,
    ) -> Result<EventStream, GeneratorError>;
}
