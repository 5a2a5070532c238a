//! Interactive chat session state machine.
//!
//! All mutable state lives here and is only touched from the UI loop. The
//! stream producer and tool executions talk back through the mailbox.

use std::collections::VecDeque;
use std::sync::Arc;

use chatterm_core::chat::{Chat, INTERRUPTED, Message, Role, ToolCall};
use chatterm_core::generator::{
    Generator, ModelUsage, ReasoningEffort, RequestConfig, StopReason, StreamEvent,
};
use chatterm_core::store::{ChatStore, StoreError, TURN_MASK};
use chatterm_core::summary::{SummaryGenerator, spawn_title_task};
use chatterm_core::tools::{TOOL_CANCELLED, ToolInvocation, ToolRegistry};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::event::{AppEvent, StreamMsg};
use crate::message::{Kind, RuntimeMessage};
use crate::producer::{StreamRequest, spawn_producer};

/// Error sentinel on a rejected tool call's synthetic result.
pub const CANCELLED: &str = "cancelled";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Streaming,
    /// Interrupt requested; waiting for the producer's terminal message.
    Cancelling,
    AwaitingConfirm,
    Executing,
}

/// Collaborators injected at construction.
#[derive(Clone)]
pub struct SessionDeps {
    pub generator: Arc<dyn Generator>,
    pub store: Arc<dyn ChatStore>,
    /// Empty registry means tools are disabled; calls are still answered with an error.
    pub tools: Arc<ToolRegistry>,
    pub summary: Option<SummaryGenerator>,
}

/// A tool call waiting for the user's decision.
pub struct PendingConfirm {
    pub call: ToolCall,
    pub summary: String,
    invocation: Box<dyn ToolInvocation>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
    pub error: bool,
}

/// Accumulates one streamed assistant message.
#[derive(Default)]
struct TurnBuilder {
    content: String,
    reasoning: String,
    tool_calls: Vec<ToolCall>,
    content_idx: Option<usize>,
    reasoning_idx: Option<usize>,
}

impl TurnBuilder {
    fn take_message(&mut self) -> Message {
        let builder = std::mem::take(self);
        let mut msg = Message::assistant(builder.content);
        if !builder.reasoning.is_empty() {
            msg.reasoning = Some(builder.reasoning);
        }
        msg.tool_calls = builder.tool_calls;
        msg
    }
}

pub struct Session {
    chat: Chat,
    /// Whether `chat` exists in the store yet.
    persisted: bool,
    /// File injections and role prompt, constant for the session.
    prefix: Vec<Message>,
    pending_user: Option<Message>,
    builder: TurnBuilder,
    messages: Vec<RuntimeMessage>,
    /// `messages[..settled]` are all reflected in the store.
    settled: usize,
    queue: VecDeque<ToolCall>,
    confirm: Option<PendingConfirm>,
    /// Tool results recorded since the last stream ended.
    round_results: usize,
    phase: Phase,
    usage_last: ModelUsage,
    usage_total: ModelUsage,
    stop_reason: Option<StopReason>,
    op_seq: u64,
    current_op: u64,
    cancel: Option<CancellationToken>,
    deps: SessionDeps,
    config: RequestConfig,
    tx: UnboundedSender<AppEvent>,
    title_task: Option<JoinHandle<()>>,
    notices: Vec<Notice>,
}

impl Session {
    /// `persisted` is true when `chat` was loaded from the store.
    pub fn new(
        chat: Chat,
        persisted: bool,
        prefix: Vec<Message>,
        config: RequestConfig,
        deps: SessionDeps,
        tx: UnboundedSender<AppEvent>,
    ) -> Self {
        let messages = RuntimeMessage::from_persisted(&chat.messages);
        Self {
            settled: messages.len(),
            messages,
            chat,
            persisted,
            prefix,
            pending_user: None,
            builder: TurnBuilder::default(),
            queue: VecDeque::new(),
            confirm: None,
            round_results: 0,
            phase: Phase::Idle,
            usage_last: ModelUsage::default(),
            usage_total: ModelUsage::default(),
            stop_reason: None,
            op_seq: 0,
            current_op: 0,
            cancel: None,
            deps,
            config,
            tx,
            title_task: None,
            notices: Vec::new(),
        }
    }

    // ─── Accessors ──────────────────────────────────────────────────

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.phase, Phase::Streaming | Phase::Cancelling)
    }

    pub fn chat(&self) -> &Chat {
        &self.chat
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn messages(&self) -> &[RuntimeMessage] {
        &self.messages
    }

    pub fn confirm(&self) -> Option<&PendingConfirm> {
        self.confirm.as_ref()
    }

    pub fn config(&self) -> &RequestConfig {
        &self.config
    }

    pub fn usage_last(&self) -> &ModelUsage {
        &self.usage_last
    }

    pub fn usage_total(&self) -> &ModelUsage {
        &self.usage_total
    }

    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop_reason.as_ref()
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn take_title_task(&mut self) -> Option<JoinHandle<()>> {
        self.title_task.take()
    }

    fn notify(&mut self, text: impl Into<String>, error: bool) {
        self.notices.push(Notice {
            text: text.into(),
            error,
        });
    }

    fn next_op(&mut self) -> u64 {
        self.op_seq += 1;
        self.current_op = self.op_seq;
        self.current_op
    }

    // ─── User actions ───────────────────────────────────────────────

    /// Stage a user prompt and start streaming. Ignored unless idle.
    pub fn submit(&mut self, text: &str) -> bool {
        if self.phase != Phase::Idle || text.trim().is_empty() {
            return false;
        }
        let msg = Message::user(text);
        self.messages.push(RuntimeMessage::user(text));
        self.pending_user = Some(msg);
        self.start_stream();
        true
    }

    /// Ask the producer to stop. The partial turn is persisted when it acknowledges.
    /// A running tool is killed and its call answered like a rejection.
    pub fn interrupt(&mut self) {
        match self.phase {
            Phase::Streaming => {
                if let Some(cancel) = &self.cancel {
                    cancel.cancel();
                }
                self.phase = Phase::Cancelling;
                debug!(op = self.current_op, "interrupt requested");
            }
            Phase::Executing => {
                if let Some(cancel) = &self.cancel {
                    cancel.cancel();
                }
                debug!(op = self.current_op, "tool interrupt requested");
            }
            _ => {}
        }
    }

    pub fn cycle_effort(&mut self) -> ReasoningEffort {
        self.config.reasoning_effort = self.config.reasoning_effort.cycle();
        self.config.reasoning_effort
    }

    /// Run the pending tool call.
    pub fn approve(&mut self) {
        if self.phase != Phase::AwaitingConfirm {
            return;
        }
        let Some(PendingConfirm {
            call, invocation, ..
        }) = self.confirm.take()
        else {
            return;
        };
        let id = self.next_op();
        let tx = self.tx.clone();
        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());
        info!(tool = %call.name, call = %call.id, "tool approved");
        tokio::spawn(async move {
            let output = invocation.invoke(cancel).await;
            let _ = tx.send(AppEvent::ToolFinished {
                id,
                call_id: call.id,
                output,
            });
        });
        self.phase = Phase::Executing;
    }

    /// Decline the pending call and every call queued behind it.
    pub fn reject(&mut self) {
        if self.phase != Phase::AwaitingConfirm {
            return;
        }
        let rejected = self.confirm.take().map(|c| c.call.id);
        self.cancel_calls(rejected);
    }

    /// Answer `first` and every queued call with a runtime-only cancellation.
    fn cancel_calls(&mut self, first: Option<String>) {
        let queued: Vec<String> = self.queue.drain(..).map(|c| c.id).collect();
        for call_id in first.into_iter().chain(queued) {
            debug!(call = %call_id, "tool call cancelled");
            let mut msg = RuntimeMessage::tool_result(&call_id, TOOL_CANCELLED);
            msg.finalize(Some(CANCELLED.into()));
            self.messages.push(msg);
        }
        self.round_results = 0;
        self.phase = Phase::Idle;
    }

    // ─── Mailbox ────────────────────────────────────────────────────

    /// Apply a producer or tool event. Returns whether the screen should be redrawn.
    pub fn handle(&mut self, event: AppEvent) -> bool {
        match event {
            AppEvent::Stream { id, msg } => {
                if id != self.current_op || !self.is_streaming() {
                    debug!(stream = id, "dropping stale stream event");
                    return false;
                }
                self.on_stream(msg)
            }
            AppEvent::ToolFinished {
                id,
                call_id,
                output,
            } => {
                if id != self.current_op || self.phase != Phase::Executing {
                    return false;
                }
                if self.cancel.take().is_some_and(|c| c.is_cancelled()) {
                    self.cancel_calls(Some(call_id));
                    self.notices.push(Notice {
                        text: "Tool cancelled".into(),
                        error: false,
                    });
                } else {
                    self.on_tool_finished(call_id, output);
                }
                true
            }
            _ => false,
        }
    }

    fn on_stream(&mut self, msg: StreamMsg) -> bool {
        match msg {
            StreamMsg::Event(event) => self.on_event(event),
            StreamMsg::Render => true,
            StreamMsg::Finished if self.phase == Phase::Cancelling => {
                self.on_interrupted();
                true
            }
            StreamMsg::Finished => {
                self.on_finished();
                true
            }
            StreamMsg::Cancelled => {
                self.on_interrupted();
                true
            }
            StreamMsg::Failed(err) => {
                self.on_failed(err);
                true
            }
        }
    }

    fn on_event(&mut self, event: StreamEvent) -> bool {
        match event {
            StreamEvent::Content(chunk) => {
                self.builder.content.push_str(&chunk);
                let idx = self.streaming_message(Kind::Assistant);
                self.messages[idx].append_content(&chunk);
                false
            }
            StreamEvent::Reasoning(chunk) => {
                self.builder.reasoning.push_str(&chunk);
                let idx = self.streaming_message(Kind::Reasoning);
                self.messages[idx].append_content(&chunk);
                false
            }
            StreamEvent::ToolCall(call) => {
                debug!(tool = %call.name, call = %call.id, "tool call received");
                self.messages.push(RuntimeMessage::tool_call(&call));
                self.builder.tool_calls.push(call);
                true
            }
            StreamEvent::StopReason(reason) => {
                self.stop_reason = Some(reason);
                false
            }
            StreamEvent::Usage(usage) => {
                self.usage_last.merge(&usage);
                true
            }
            StreamEvent::Metrics(metrics) => {
                tracing::debug!(%metrics, "generation metrics");
                false
            }
        }
    }

    /// Index of the streaming message of `kind`, created on first use.
    fn streaming_message(&mut self, kind: Kind) -> usize {
        let slot = match kind {
            Kind::Reasoning => self.builder.reasoning_idx,
            _ => self.builder.content_idx,
        };
        if let Some(idx) = slot {
            return idx;
        }
        self.messages.push(RuntimeMessage::streaming(kind));
        let idx = self.messages.len() - 1;
        match kind {
            Kind::Reasoning => self.builder.reasoning_idx = Some(idx),
            _ => self.builder.content_idx = Some(idx),
        }
        idx
    }

    // ─── Transitions ────────────────────────────────────────────────

    fn start_stream(&mut self) {
        let id = self.next_op();
        let cancel = CancellationToken::new();
        let mut messages = self.prefix.clone();
        messages.extend(self.chat.messages.iter().cloned());
        messages.extend(self.pending_user.iter().cloned());
        let tools = self.deps.tools.definitions();
        debug!(
            stream = id,
            messages = messages.len(),
            tools = tools.len(),
            "starting stream"
        );
        spawn_producer(
            StreamRequest {
                generator: self.deps.generator.clone(),
                messages,
                tools,
                config: self.config.clone(),
            },
            id,
            cancel.clone(),
            self.tx.clone(),
        );
        self.builder = TurnBuilder::default();
        self.usage_last = ModelUsage::default();
        self.stop_reason = None;
        self.cancel = Some(cancel);
        self.round_results = 0;
        self.phase = Phase::Streaming;
    }

    fn close_stream(&mut self) {
        self.cancel = None;
        self.usage_total.merge(&self.usage_last);
        for msg in &mut self.messages[self.settled..] {
            if msg.streaming {
                msg.finalize(None);
            }
        }
    }

    fn on_finished(&mut self) {
        self.close_stream();
        let assistant = self.builder.take_message();
        let calls = assistant.tool_calls.clone();
        let mut batch: Vec<Message> = self.pending_user.take().into_iter().collect();
        batch.push(assistant);
        if let Err(e) = self.persist(batch) {
            self.store_failed(self.settled, e);
            return;
        }
        self.queue = calls.into();
        self.advance_tools();
    }

    /// Persist the partial answer with the interrupt sentinel. Tool calls are dropped.
    fn on_interrupted(&mut self) {
        self.close_stream();
        let content_idx = self.builder.content_idx;
        let mut assistant = self.builder.take_message();
        assistant.tool_calls.clear();
        assistant.error = Some(INTERRUPTED.into());

        let idx = content_idx.unwrap_or_else(|| {
            self.messages.push(RuntimeMessage::assistant(""));
            self.messages.len() - 1
        });
        self.messages[idx].finalize(Some(INTERRUPTED.into()));
        for msg in &mut self.messages[self.settled..] {
            if msg.kind == Kind::ToolCall {
                msg.finalize(Some(INTERRUPTED.into()));
            }
        }

        let mut batch: Vec<Message> = self.pending_user.take().into_iter().collect();
        batch.push(assistant);
        if let Err(e) = self.persist(batch) {
            self.store_failed(self.settled, e);
            return;
        }
        self.notify("Interrupted", false);
        self.phase = Phase::Idle;
    }

    /// Transport error: nothing from this round is persisted.
    fn on_failed(&mut self, err: String) {
        warn!(error = %err, "stream failed");
        self.cancel = None;
        self.builder = TurnBuilder::default();
        self.pending_user = None;
        self.usage_last = ModelUsage::default();
        if !self.messages[self.settled..]
            .iter()
            .any(|m| m.kind == Kind::Assistant)
        {
            self.messages.push(RuntimeMessage::assistant(""));
        }
        for msg in &mut self.messages[self.settled..] {
            msg.finalize(Some(err.clone()));
        }
        self.settled = self.messages.len();
        self.notify(format!("Stream failed: {err}"), true);
        self.phase = Phase::Idle;
    }

    fn on_tool_finished(&mut self, call_id: String, output: Result<String, String>) {
        let content = match output {
            Ok(text) => text,
            Err(e) => format!("Error: {e}"),
        };
        if self.record_tool_result(call_id, content) {
            self.advance_tools();
        }
    }

    /// Show and persist one tool result. False when the store refused it.
    fn record_tool_result(&mut self, call_id: String, content: String) -> bool {
        let idx = self.messages.len();
        self.messages
            .push(RuntimeMessage::tool_result(&call_id, &content));
        if let Err(e) = self.persist(vec![Message::tool_result(call_id, content)]) {
            self.store_failed(idx, e);
            return false;
        }
        self.round_results += 1;
        true
    }

    /// Confirm the next valid queued call. Unknown or malformed calls are
    /// answered immediately. Once the queue drains, stream again if any
    /// result was recorded.
    fn advance_tools(&mut self) {
        while let Some(call) = self.queue.pop_front() {
            match self.deps.tools.parse(&call) {
                Ok(invocation) => {
                    self.confirm = Some(PendingConfirm {
                        summary: invocation.summary(),
                        call,
                        invocation,
                    });
                    self.phase = Phase::AwaitingConfirm;
                    return;
                }
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "tool call rejected");
                    if !self.record_tool_result(call.id, format!("Error: {e}")) {
                        return;
                    }
                }
            }
        }
        if self.round_results > 0 {
            self.start_stream();
        } else {
            self.phase = Phase::Idle;
        }
    }

    /// Append `batch` to the chat as one write. The in-memory chat is only
    /// replaced once the store accepts it.
    fn persist(&mut self, batch: Vec<Message>) -> Result<(), StoreError> {
        let mut next = self.chat.clone();
        next.messages.extend(batch);
        let created = !self.persisted;
        let saved = if created {
            self.deps.store.create_chat(next)?
        } else {
            self.deps.store.update_chat(&next, TURN_MASK)?
        };
        info!(chat = %saved.id, messages = saved.messages.len(), created, "chat saved");
        self.chat = saved;
        self.persisted = true;
        self.settled = self.messages.len();
        if created {
            self.spawn_title();
        }
        Ok(())
    }

    fn spawn_title(&mut self) {
        let Some(summary) = self.deps.summary.clone() else {
            return;
        };
        debug_assert!(
            self.chat
                .messages
                .first()
                .is_some_and(|m| m.role == Role::User),
            "title seed must be the opening user message"
        );
        let Some(seed) = self.chat.first_user_message().map(|m| m.content.clone()) else {
            return;
        };
        self.title_task =
            spawn_title_task(summary, self.deps.store.clone(), self.chat.id.clone(), seed);
    }

    /// Mark `messages[from..]` as unsaved and drop everything staged.
    fn store_failed(&mut self, from: usize, err: StoreError) {
        warn!(error = %err, "chat save failed");
        let sentinel = format!("not saved: {err}");
        for msg in &mut self.messages[from..] {
            if msg.error.is_none() {
                msg.finalize(Some(sentinel.clone()));
            } else {
                msg.finalize(None);
            }
        }
        self.settled = self.messages.len();
        self.pending_user = None;
        self.queue.clear();
        self.confirm = None;
        self.round_results = 0;
        self.notify(format!("Save failed: {err}"), true);
        self.phase = Phase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FlakyStore, ScriptedGenerator, Step, chunks};
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    struct Harness {
        session: Session,
        rx: UnboundedReceiver<AppEvent>,
        store: Arc<FlakyStore>,
        generator: Arc<ScriptedGenerator>,
    }

    fn harness(scripts: Vec<Vec<Step>>, tools: bool) -> Harness {
        let generator = Arc::new(ScriptedGenerator::new(scripts));
        let store = Arc::new(FlakyStore::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = if tools {
            ToolRegistry::builtin()
        } else {
            ToolRegistry::new()
        };
        let deps = SessionDeps {
            generator: generator.clone(),
            store: store.clone(),
            tools: Arc::new(registry),
            summary: Some(SummaryGenerator::new(generator.clone(), "title-model")),
        };
        let session = Session::new(
            Chat::new(),
            false,
            Vec::new(),
            RequestConfig {
                model: "test-model".into(),
                ..Default::default()
            },
            deps,
            tx,
        );
        Harness {
            session,
            rx,
            store,
            generator,
        }
    }

    impl Harness {
        /// Pump the mailbox until the session leaves the streaming/executing phases.
        async fn settle(&mut self) {
            while matches!(
                self.session.phase(),
                Phase::Streaming | Phase::Cancelling | Phase::Executing
            ) {
                let ev = self.rx.recv().await.unwrap();
                self.session.handle(ev);
            }
        }

        fn stored(&self) -> Option<Chat> {
            self.store.get_chat(&self.session.chat().id).ok()
        }
    }

    fn tool_call(id: &str, args: &str) -> Step {
        Step::Event(StreamEvent::ToolCall(ToolCall {
            id: id.into(),
            name: "exec_shell".into(),
            arguments: args.into(),
        }))
    }

    fn roles(chat: &Chat) -> Vec<Role> {
        chat.messages.iter().map(|m| m.role).collect()
    }

    // ── happy path ──

    #[tokio::test]
    async fn happy_path_persists_pair_and_titles() {
        let mut h = harness(vec![chunks(&["hel", "lo"])], false);
        assert!(h.session.submit("hi"));
        h.settle().await;

        assert_eq!(h.session.phase(), Phase::Idle);
        let chat = h.stored().unwrap();
        assert_eq!(roles(&chat), vec![Role::User, Role::Assistant]);
        assert_eq!(chat.messages[0].content, "hi");
        assert_eq!(chat.messages[1].content, "hello");

        let visible: Vec<(Kind, &str)> = h
            .session
            .messages()
            .iter()
            .map(|m| (m.kind, m.content.as_str()))
            .collect();
        assert_eq!(
            visible,
            vec![(Kind::User, "hi"), (Kind::Assistant, "hello")]
        );
        assert!(h.session.messages().iter().all(|m| !m.streaming && m.error.is_none()));

        h.session.take_title_task().unwrap().await.unwrap();
        assert_eq!(h.stored().unwrap().title.as_deref(), Some("Greeting"));
    }

    #[tokio::test]
    async fn request_carries_prefix_history_and_pending_user() {
        let mut h = harness(vec![chunks(&["one"]), chunks(&["two"])], false);
        h.session.prefix = vec![Message::system("be terse")];
        h.session.submit("first");
        h.settle().await;
        h.session.submit("second");
        h.settle().await;

        let reqs = h.generator.requests();
        let contents: Vec<&str> = reqs[1].messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["be terse", "first", "one", "second"]);
        assert_eq!(reqs[1].config.model, "test-model");
        assert!(reqs[1].tools.is_empty());

        let chat = h.stored().unwrap();
        assert_eq!(chat.messages.len(), 4);
        assert!(chat.created_at <= chat.updated_at);
    }

    #[tokio::test]
    async fn submit_is_ignored_while_streaming() {
        let mut h = harness(vec![vec![Step::Hang]], false);
        assert!(h.session.submit("a"));
        assert!(!h.session.submit("b"));
        h.session.interrupt();
        h.settle().await;
        assert_eq!(h.generator.requests().len(), 1);
    }

    // ── interrupt ──

    #[tokio::test]
    async fn interrupt_persists_partial_answer() {
        let mut script = chunks(&["Once ", "upon "]);
        script.push(Step::Hang);
        let mut h = harness(vec![script], false);
        h.session.submit("tell me a story");

        let mut seen = 0;
        while seen < 2 {
            let ev = h.rx.recv().await.unwrap();
            if matches!(
                ev,
                AppEvent::Stream {
                    msg: StreamMsg::Event(StreamEvent::Content(_)),
                    ..
                }
            ) {
                seen += 1;
            }
            h.session.handle(ev);
        }
        h.session.interrupt();
        assert_eq!(h.session.phase(), Phase::Cancelling);
        h.settle().await;

        assert_eq!(h.session.phase(), Phase::Idle);
        let chat = h.stored().unwrap();
        assert_eq!(chat.messages[0].content, "tell me a story");
        assert_eq!(chat.messages[1].content, "Once upon ");
        assert!(chat.messages[1].is_interrupted());

        let errored: Vec<&RuntimeMessage> = h
            .session
            .messages()
            .iter()
            .filter(|m| m.is_errored())
            .collect();
        assert_eq!(errored.len(), 1);
        assert_eq!(errored[0].error.as_deref(), Some(INTERRUPTED));
    }

    #[tokio::test]
    async fn interrupt_before_first_chunk_persists_empty_answer() {
        let mut h = harness(vec![vec![Step::Hang]], false);
        h.session.submit("q");
        h.session.interrupt();
        h.settle().await;
        let chat = h.stored().unwrap();
        assert_eq!(roles(&chat), vec![Role::User, Role::Assistant]);
        assert_eq!(chat.messages[1].content, "");
        assert!(chat.messages[1].is_interrupted());
    }

    #[tokio::test]
    async fn interrupted_user_message_is_resent_on_next_turn() {
        let mut h = harness(vec![vec![Step::Hang], chunks(&["ok"])], false);
        h.session.submit("first");
        h.session.interrupt();
        h.settle().await;
        h.session.submit("again");
        h.settle().await;
        let reqs = h.generator.requests();
        let contents: Vec<&str> = reqs[1].messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "", "again"]);
    }

    // ── transport error ──

    #[tokio::test]
    async fn transport_error_leaves_store_untouched() {
        let mut h = harness(
            vec![chunks(&["fine"]), {
                let mut s = chunks(&["par"]);
                s.push(Step::Fail("connection reset".into()));
                s
            }],
            false,
        );
        h.session.submit("one");
        h.settle().await;
        h.session.take_title_task().unwrap().await.unwrap();
        let before = h.stored().unwrap();

        h.session.submit("two");
        h.settle().await;
        assert_eq!(h.session.phase(), Phase::Idle);
        assert_eq!(h.stored().unwrap(), before);

        let tail: Vec<bool> = h.session.messages()[2..]
            .iter()
            .map(|m| m.is_errored())
            .collect();
        assert_eq!(tail, vec![true, true]);
        let notices = h.session.take_notices();
        assert!(notices.iter().any(|n| n.error && n.text.contains("connection reset")));
    }

    #[tokio::test]
    async fn failure_on_first_turn_creates_nothing() {
        let mut h = harness(vec![vec![Step::Fail("boom".into())]], false);
        h.session.submit("hi");
        h.settle().await;
        assert!(h.store.all().is_empty());
        assert!(!h.session.is_persisted());
    }

    // ── tools ──

    #[tokio::test]
    async fn approved_tool_round_trip() {
        let mut h = harness(
            vec![
                vec![tool_call("t1", r#"{"command":"printf 'a\\nb\\n'"}"#)],
                chunks(&["done"]),
            ],
            true,
        );
        h.session.submit("list files");
        h.settle().await;

        assert_eq!(h.session.phase(), Phase::AwaitingConfirm);
        assert_eq!(
            h.session.confirm().unwrap().summary,
            "$ printf 'a\\nb\\n'"
        );
        let chat = h.stored().unwrap();
        assert_eq!(roles(&chat), vec![Role::User, Role::Assistant]);
        assert_eq!(chat.messages[1].tool_calls[0].id, "t1");

        h.session.approve();
        assert_eq!(h.session.phase(), Phase::Executing);
        h.settle().await;
        assert_eq!(h.session.phase(), Phase::Idle);

        let chat = h.stored().unwrap();
        assert_eq!(
            roles(&chat),
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(chat.messages[2].tool_call_id.as_deref(), Some("t1"));
        assert_eq!(chat.messages[2].content, "a\nb\n");
        assert_eq!(chat.messages[3].content, "done");

        let reqs = h.generator.requests();
        assert_eq!(reqs[0].tools[0].name, "exec_shell");
        let last = reqs[1].messages.last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert_eq!(last.content, "a\nb\n");
    }

    #[tokio::test]
    async fn rejected_tool_is_shown_but_not_persisted() {
        let mut h = harness(vec![vec![tool_call("t1", r#"{"command":"ls /tmp"}"#)]], true);
        h.session.submit("list files");
        h.settle().await;
        h.session.reject();

        assert_eq!(h.session.phase(), Phase::Idle);
        let chat = h.stored().unwrap();
        assert_eq!(roles(&chat), vec![Role::User, Role::Assistant]);
        let last = h.session.messages().last().unwrap();
        assert_eq!(last.kind, Kind::ToolResult);
        assert_eq!(last.content, TOOL_CANCELLED);
        assert_eq!(last.error.as_deref(), Some(CANCELLED));
    }

    #[tokio::test]
    async fn interrupting_a_running_tool_answers_it_as_cancelled() {
        let mut h = harness(
            vec![vec![
                tool_call("t1", r#"{"command":"sleep 10"}"#),
                tool_call("t2", r#"{"command":"true"}"#),
            ]],
            true,
        );
        h.session.submit("wait");
        h.settle().await;
        h.session.approve();
        assert_eq!(h.session.phase(), Phase::Executing);
        h.session.interrupt();
        h.settle().await;

        assert_eq!(h.session.phase(), Phase::Idle);
        let cancelled: Vec<&str> = h
            .session
            .messages()
            .iter()
            .filter(|m| m.error.as_deref() == Some(CANCELLED))
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(cancelled, vec![TOOL_CANCELLED, TOOL_CANCELLED]);
        let chat = h.stored().unwrap();
        assert_eq!(roles(&chat), vec![Role::User, Role::Assistant]);
        assert_eq!(h.generator.requests().len(), 1);
        assert!(h.session.take_notices().iter().any(|n| n.text == "Tool cancelled"));
    }

    #[tokio::test]
    async fn reject_drops_the_rest_of_the_queue() {
        let mut h = harness(
            vec![vec![
                tool_call("t1", r#"{"command":"true"}"#),
                tool_call("t2", r#"{"command":"true"}"#),
            ]],
            true,
        );
        h.session.submit("go");
        h.settle().await;
        h.session.reject();
        let cancelled = h
            .session
            .messages()
            .iter()
            .filter(|m| m.error.as_deref() == Some(CANCELLED))
            .count();
        assert_eq!(cancelled, 2);
        assert!(h.session.confirm().is_none());
    }

    #[tokio::test]
    async fn malformed_and_unknown_calls_are_answered_without_confirmation() {
        let mut h = harness(
            vec![
                vec![
                    tool_call("t1", "{not json"),
                    Step::Event(StreamEvent::ToolCall(ToolCall {
                        id: "t2".into(),
                        name: "rm_rf".into(),
                        arguments: "{}".into(),
                    })),
                ],
                chunks(&["sorry"]),
            ],
            true,
        );
        h.session.submit("go");
        h.settle().await;
        assert_eq!(h.session.phase(), Phase::Idle);

        let chat = h.stored().unwrap();
        assert_eq!(
            roles(&chat),
            vec![
                Role::User,
                Role::Assistant,
                Role::Tool,
                Role::Tool,
                Role::Assistant
            ]
        );
        assert!(chat.messages[2].content.starts_with("Error: "));
        assert_eq!(chat.messages[3].content, "Error: Unknown tool: rm_rf");
    }

    #[tokio::test]
    async fn tool_calls_are_dropped_on_interrupt() {
        let mut h = harness(
            vec![vec![tool_call("t1", r#"{"command":"true"}"#), Step::Hang]],
            true,
        );
        h.session.submit("go");
        loop {
            let ev = h.rx.recv().await.unwrap();
            let is_call = matches!(
                ev,
                AppEvent::Stream {
                    msg: StreamMsg::Event(StreamEvent::ToolCall(_)),
                    ..
                }
            );
            h.session.handle(ev);
            if is_call {
                break;
            }
        }
        h.session.interrupt();
        h.settle().await;
        assert_eq!(h.session.phase(), Phase::Idle);
        let chat = h.stored().unwrap();
        assert!(chat.messages[1].tool_calls.is_empty());
        assert!(chat.messages[1].is_interrupted());
    }

    // ── store failure ──

    #[tokio::test]
    async fn store_failure_on_first_turn_then_retry() {
        let mut h = harness(vec![chunks(&["hello"]), chunks(&["again"])], false);
        h.store.set_failing(true);
        h.session.submit("hi");
        h.settle().await;

        assert!(h.store.all().is_empty());
        assert!(!h.session.is_persisted());
        assert!(h.session.messages().iter().all(|m| m.is_errored()));
        assert_eq!(h.session.messages().len(), 2);

        h.store.set_failing(false);
        h.session.submit("retry");
        h.settle().await;
        let chat = h.stored().unwrap();
        let contents: Vec<&str> = chat.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["retry", "again"]);
    }

    #[tokio::test]
    async fn stale_stream_events_are_ignored() {
        let mut h = harness(vec![chunks(&["x"])], false);
        let stale = AppEvent::Stream {
            id: 999,
            msg: StreamMsg::Event(StreamEvent::Content("ghost".into())),
        };
        h.session.submit("hi");
        assert!(!h.session.handle(stale));
        h.settle().await;
        assert_eq!(h.stored().unwrap().messages[1].content, "x");
    }

    #[tokio::test]
    async fn usage_is_merged_per_call_and_folded_into_total() {
        let usage = |n| {
            Step::Event(StreamEvent::Usage(
                ModelUsage::default().with("output", n, 0.0),
            ))
        };
        let mut h = harness(
            vec![
                vec![usage(3), usage(4)],
                vec![usage(5)],
            ],
            false,
        );
        h.session.submit("a");
        h.settle().await;
        assert_eq!(h.session.usage_last().quantity("output"), 7);
        h.session.submit("b");
        h.settle().await;
        assert_eq!(h.session.usage_last().quantity("output"), 5);
        assert_eq!(h.session.usage_total().quantity("output"), 12);
    }

    #[tokio::test]
    async fn effort_cycles_into_next_request() {
        let mut h = harness(vec![chunks(&["ok"])], false);
        assert_eq!(h.session.cycle_effort(), ReasoningEffort::Low);
        h.session.submit("q");
        h.settle().await;
        assert_eq!(
            h.generator.requests()[0].config.reasoning_effort,
            ReasoningEffort::Low
        );
    }
}
