pub mod chat;
pub mod client;
pub mod config;
pub mod files;
pub mod generator;
pub mod history;
pub mod store;
pub mod summary;
pub mod tools;

// Re-exports
pub use chat::{Chat, INTERRUPTED, Message, Role, ToolCall};
pub use client::HttpGenerator;
pub use config::{Config, ConfigError};
pub use generator::{
    EventStream, Generator, GeneratorError, ModelUsage, ReasoningEffort, RequestConfig,
    StopReason, StreamEvent,
};
pub use history::InputHistory;
#[cfg(feature = "sqlite-store")]
pub use store::Store;
pub use store::{ChatStore, Field, StoreError, TURN_MASK};
pub use summary::SummaryGenerator;
pub use tools::{TOOL_CANCELLED, ToolDefinition, ToolError, ToolInvocation, ToolRegistry};
