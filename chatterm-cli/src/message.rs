//! Display-layer messages. One persisted assistant message may become up to
//! three of these (reasoning, content, tool calls).

use std::sync::atomic::{AtomicU64, Ordering};

use chatterm_core::chat::{Message, Role, ToolCall};

use crate::markdown::{Block, parse_blocks};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    User,
    Assistant,
    Reasoning,
    ToolCall,
    ToolResult,
    System,
}

#[derive(Clone, Debug)]
pub struct RuntimeMessage {
    /// Stable across the session; keys the render cache.
    pub id: u64,
    pub kind: Kind,
    pub content: String,
    pub blocks: Vec<Block>,
    pub streaming: bool,
    /// Errored messages are shown but never persisted.
    pub error: Option<String>,
    pub tool_call_id: Option<String>,
    pub tool_name: Option<String>,
}

impl RuntimeMessage {
    fn with_kind(kind: Kind, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: next_id(),
            kind,
            blocks: parse_blocks(&content),
            content,
            streaming: false,
            error: None,
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_kind(Kind::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_kind(Kind::Assistant, content)
    }

    pub fn reasoning(content: impl Into<String>) -> Self {
        Self::with_kind(Kind::Reasoning, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_kind(Kind::System, content)
    }

    /// Empty message that will receive streamed chunks.
    pub fn streaming(kind: Kind) -> Self {
        Self {
            streaming: true,
            ..Self::with_kind(kind, "")
        }
    }

    /// Tool call shown as its name plus pretty-printed arguments.
    pub fn tool_call(call: &ToolCall) -> Self {
        let args = serde_json::from_str::<serde_json::Value>(&call.arguments)
            .ok()
            .and_then(|v| serde_json::to_string_pretty(&v).ok())
            .unwrap_or_else(|| call.arguments.clone());
        Self {
            tool_call_id: Some(call.id.clone()),
            tool_name: Some(call.name.clone()),
            ..Self::with_kind(Kind::ToolCall, format!("```json\n{args}\n```"))
        }
    }

    /// Tool output is always shown verbatim as a single code block.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::with_kind(Kind::ToolResult, "");
        msg.content = content.into();
        msg.blocks = vec![Block::Code {
            lang: "text".into(),
            code: msg.content.trim_end_matches('\n').replace('\t', "  "),
        }];
        msg.tool_call_id = Some(call_id.into());
        msg
    }

    pub fn append_content(&mut self, chunk: &str) {
        self.content.push_str(chunk);
        if self.kind == Kind::ToolResult {
            return;
        }
        self.blocks = parse_blocks(&self.content);
    }

    pub fn finalize(&mut self, error: Option<String>) {
        self.streaming = false;
        if error.is_some() {
            self.error = error;
        }
    }

    pub fn is_errored(&self) -> bool {
        self.error.is_some()
    }

    /// Rebuild the display form of persisted messages, preserving stored errors.
    pub fn from_persisted(messages: &[Message]) -> Vec<Self> {
        let mut out = Vec::with_capacity(messages.len());
        for msg in messages {
            match msg.role {
                Role::User => out.push(Self::user(&msg.content)),
                Role::System => out.push(Self::system(&msg.content)),
                Role::Tool => out.push(Self::tool_result(
                    msg.tool_call_id.clone().unwrap_or_default(),
                    &msg.content,
                )),
                Role::Assistant => {
                    let reasoning = msg.reasoning.as_deref().unwrap_or_default();
                    if !reasoning.is_empty() {
                        out.push(Self::reasoning(reasoning));
                    }
                    let bare = reasoning.is_empty() && msg.tool_calls.is_empty();
                    if !msg.content.is_empty() || msg.error.is_some() || bare {
                        let mut content = Self::assistant(&msg.content);
                        content.error = msg.error.clone();
                        out.push(content);
                    }
                    out.extend(msg.tool_calls.iter().map(Self::tool_call));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatterm_core::chat::INTERRUPTED;

    #[test]
    fn ids_are_unique() {
        let a = RuntimeMessage::user("a");
        let b = RuntimeMessage::user("a");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn append_reparses_blocks() {
        let mut m = RuntimeMessage::streaming(Kind::Assistant);
        m.append_content("see:\n```sh\nls");
        assert_eq!(m.blocks.len(), 2);
        m.append_content("\n```\n");
        assert_eq!(
            m.blocks[1],
            Block::Code {
                lang: "sh".into(),
                code: "ls".into()
            }
        );
        assert!(m.streaming);
        m.finalize(None);
        assert!(!m.streaming);
        assert!(!m.is_errored());
    }

    #[test]
    fn tool_result_is_one_code_block() {
        let m = RuntimeMessage::tool_result("t1", "a\nb\n");
        assert_eq!(m.content, "a\nb\n");
        assert_eq!(
            m.blocks,
            vec![Block::Code {
                lang: "text".into(),
                code: "a\nb".into()
            }]
        );
    }

    #[test]
    fn tool_call_pretty_prints_arguments() {
        let call = ToolCall {
            id: "t1".into(),
            name: "exec_shell".into(),
            arguments: r#"{"command":"ls /tmp"}"#.into(),
        };
        let m = RuntimeMessage::tool_call(&call);
        assert_eq!(m.tool_name.as_deref(), Some("exec_shell"));
        assert!(matches!(&m.blocks[0], Block::Code { lang, code } if lang == "json" && code.contains("\"command\": \"ls /tmp\"")));
    }

    #[test]
    fn assistant_splits_into_reasoning_content_and_calls() {
        let mut assistant = Message::assistant("answer");
        assistant.reasoning = Some("thinking".into());
        assistant.tool_calls.push(ToolCall {
            id: "t1".into(),
            name: "exec_shell".into(),
            arguments: "{}".into(),
        });
        let rt = RuntimeMessage::from_persisted(&[Message::user("q"), assistant]);
        let kinds: Vec<Kind> = rt.iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![Kind::User, Kind::Reasoning, Kind::Assistant, Kind::ToolCall]
        );
    }

    #[test]
    fn tool_only_assistant_has_no_empty_content() {
        let mut assistant = Message::assistant("");
        assistant.tool_calls.push(ToolCall {
            id: "t1".into(),
            name: "exec_shell".into(),
            arguments: "{}".into(),
        });
        let rt = RuntimeMessage::from_persisted(&[assistant, Message::tool_result("t1", "out")]);
        let kinds: Vec<Kind> = rt.iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![Kind::ToolCall, Kind::ToolResult]);
        assert_eq!(rt[1].tool_call_id.as_deref(), Some("t1"));
    }

    #[test]
    fn persisted_error_is_preserved() {
        let mut assistant = Message::assistant("");
        assistant.error = Some(INTERRUPTED.into());
        let rt = RuntimeMessage::from_persisted(&[assistant]);
        assert_eq!(rt.len(), 1);
        assert_eq!(rt[0].error.as_deref(), Some(INTERRUPTED));
    }
}
