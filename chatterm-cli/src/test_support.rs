//! Fakes for driving the session without a network or a real database.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chatterm_core::chat::{Chat, Message};
use chatterm_core::generator::{
    EventStream, Generator, GeneratorError, RequestConfig, StreamEvent,
};
use chatterm_core::store::{
    ChatStore, Field, ListRequest, Page, SearchRequest, Store, StoreError,
};
use chatterm_core::tools::ToolDefinition;
use futures::StreamExt;

/// One step of a canned stream.
#[derive(Clone, Debug)]
pub enum Step {
    Event(StreamEvent),
    Delay(Duration),
    /// Transport error; ends the stream.
    Fail(String),
    /// Never yields again; only cancellation ends the stream.
    Hang,
}

#[derive(Clone, Debug)]
pub struct Recorded {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub config: RequestConfig,
}

/// Replays one script per `stream` call and records every request.
pub struct ScriptedGenerator {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    requests: Mutex<Vec<Recorded>>,
}

impl ScriptedGenerator {
    pub fn new(scripts: Vec<Vec<Step>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

/// Content chunks followed by a normal end of stream.
pub fn chunks(parts: &[&str]) -> Vec<Step> {
    parts
        .iter()
        .map(|p| Step::Event(StreamEvent::Content(p.to_string())))
        .collect()
}

#[async_trait::async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        _messages: &[Message],
        _config: &RequestConfig,
    ) -> Result<Message, GeneratorError> {
        Ok(Message::assistant("\"Greeting\""))
    }

    async fn stream(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        config: &RequestConfig,
    ) -> Result<EventStream, GeneratorError> {
        self.requests.lock().unwrap().push(Recorded {
            messages: messages.to_vec(),
            tools: tools.to_vec(),
            config: config.clone(),
        });
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| GeneratorError::Protocol("no script left".into()))?;
        let steps: VecDeque<Step> = script.into();
        let stream = futures::stream::unfold(steps, |mut steps| async move {
            loop {
                match steps.pop_front()? {
                    Step::Event(ev) => return Some((Ok(ev), steps)),
                    Step::Delay(d) => tokio::time::sleep(d).await,
                    Step::Fail(msg) => {
                        steps.clear();
                        return Some((Err(GeneratorError::Protocol(msg)), steps));
                    }
                    Step::Hang => std::future::pending::<()>().await,
                }
            }
        });
        Ok(stream.boxed())
    }
}

/// In-memory store whose writes can be switched to fail.
pub struct FlakyStore {
    inner: Store,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: Store::memory().unwrap(),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("disk on fire".into()));
        }
        Ok(())
    }

    pub fn all(&self) -> Vec<Chat> {
        self.inner
            .list_chats(&ListRequest {
                page_size: 100,
                ..Default::default()
            })
            .unwrap()
            .chats
    }
}

impl ChatStore for FlakyStore {
    fn get_chat(&self, id: &str) -> Result<Chat, StoreError> {
        self.inner.get_chat(id)
    }

    fn list_chats(&self, req: &ListRequest) -> Result<Page, StoreError> {
        self.inner.list_chats(req)
    }

    fn search_chats(&self, req: &SearchRequest) -> Result<Page, StoreError> {
        self.inner.search_chats(req)
    }

    fn create_chat(&self, chat: Chat) -> Result<Chat, StoreError> {
        self.check()?;
        self.inner.create_chat(chat)
    }

    fn update_chat(&self, chat: &Chat, mask: &[Field]) -> Result<Chat, StoreError> {
        self.check()?;
        self.inner.update_chat(chat, mask)
    }

    fn delete_chat(&self, id: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete_chat(id)
    }
}
