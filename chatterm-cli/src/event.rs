use chatterm_core::generator::StreamEvent;
use crossterm::event::Event as TermEvent;

/// Unified event type for the main loop.
#[derive(Debug)]
pub enum AppEvent {
    Terminal(TermEvent),
    /// Posted by the stream producer. `id` names the stream; stale ids are dropped.
    Stream { id: u64, msg: StreamMsg },
    /// A tool invocation approved in the confirm dialog has finished.
    ToolFinished {
        id: u64,
        call_id: String,
        output: Result<String, String>,
    },
    Tick,
    Quit,
}

#[derive(Debug)]
pub enum StreamMsg {
    Event(StreamEvent),
    /// Coalesced redraw request.
    Render,
    Finished,
    Cancelled,
    Failed(String),
}
