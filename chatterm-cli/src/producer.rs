//! The single in-flight stream reader. Owns no session state: it forwards
//! generator events into the UI mailbox and coalesces redraw requests.

use std::sync::Arc;
use std::time::Duration;

use chatterm_core::chat::Message;
use chatterm_core::generator::{Generator, RequestConfig, StreamEvent};
use chatterm_core::tools::ToolDefinition;
use futures::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::event::{AppEvent, StreamMsg};

/// Ceiling on redraw rate while streaming (~15 fps).
pub const RENDER_INTERVAL: Duration = Duration::from_millis(66);

/// Emits at most one render per interval; chunks inside the window only mark a pending render.
#[derive(Debug)]
pub struct RenderThrottle {
    interval: Duration,
    last: Option<Instant>,
    pending: bool,
}

impl RenderThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
            pending: false,
        }
    }

    /// Whether a render should be posted now for a chunk received at `now`.
    pub fn on_chunk(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => {
                self.pending = true;
                false
            }
            _ => {
                self.last = Some(now);
                self.pending = false;
                true
            }
        }
    }

    /// When the pending render becomes due.
    pub fn deadline(&self) -> Option<Instant> {
        match (self.pending, self.last) {
            (true, Some(last)) => Some(last + self.interval),
            _ => None,
        }
    }

    /// Consume the pending flag, if set.
    pub fn take_pending(&mut self, now: Instant) -> bool {
        if !self.pending {
            return false;
        }
        self.pending = false;
        self.last = Some(now);
        true
    }
}

pub struct StreamRequest {
    pub generator: Arc<dyn Generator>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub config: RequestConfig,
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Start reading one stream. Exactly one terminal message (`Finished`,
/// `Cancelled` or `Failed`) is posted unless the mailbox is gone.
pub fn spawn_producer(
    request: StreamRequest,
    id: u64,
    cancel: CancellationToken,
    tx: UnboundedSender<AppEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let send = |msg: StreamMsg| tx.send(AppEvent::Stream { id, msg }).is_ok();

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                send(StreamMsg::Cancelled);
                return;
            }
            opened = request.generator.stream(&request.messages, &request.tools, &request.config) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(stream = id, error = %e, "stream request failed");
                send(StreamMsg::Failed(e.to_string()));
                return;
            }
        };
        tracing::debug!(stream = id, "stream opened");

        let mut throttle = RenderThrottle::new(RENDER_INTERVAL);
        let mut chunks = 0usize;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    drop(stream);
                    tracing::debug!(stream = id, chunks, "stream cancelled");
                    send(StreamMsg::Cancelled);
                    return;
                }
                _ = sleep_until(throttle.deadline()) => {
                    if throttle.take_pending(Instant::now()) {
                        send(StreamMsg::Render);
                    }
                }
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        let is_chunk = matches!(event, StreamEvent::Content(_) | StreamEvent::Reasoning(_));
                        if !send(StreamMsg::Event(event)) {
                            return;
                        }
                        if is_chunk {
                            chunks += 1;
                            if throttle.on_chunk(Instant::now()) {
                                send(StreamMsg::Render);
                            }
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(stream = id, error = %e, "stream failed");
                        send(StreamMsg::Failed(e.to_string()));
                        return;
                    }
                    None => {
                        if throttle.take_pending(Instant::now()) {
                            send(StreamMsg::Render);
                        }
                        tracing::debug!(stream = id, chunks, "stream finished");
                        send(StreamMsg::Finished);
                        return;
                    }
                }
            }
        }
    })
}
