//! Folds a stream's events into session state.
//!
//! A [`StreamSession`] is created for one send and owns everything that
//! accumulates while the reply streams in. It never performs I/O: each event
//! goes in, at most one [`SessionUpdate`] comes out, and the caller decides
//! who to notify.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::errors::StreamFailure;
use crate::event::{DoneEvent, StreamEvent, ToolCallEvent};
use crate::message::{Message, MessageContent, MessageMetadata, Role, ToolCallRecord, new_message_id};

/// Caller-visible effect of applying one event.
///
/// Every payload is an owned snapshot; observers never see reducer state by
/// reference.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionUpdate {
    Started {
        conversation_id: String,
        message_id: String,
    },
    /// A text or thinking delta together with all text so far.
    Text { delta: String, full_text: String },
    Progress {
        stage: Option<String>,
        message: Option<String>,
        percent: Option<f64>,
    },
    ToolCall(ToolCallRecord),
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        result: serde_json::Value,
    },
    /// Terminal: the stream failed and nothing was kept.
    Failed(StreamFailure),
    /// Terminal: the reply is complete.
    Completed(Message),
}

/// State of one streaming send.
#[derive(Debug)]
pub struct StreamSession {
    conversation_id: String,
    accumulated_text: String,
    /// Announcement order is preserved; ids are unique.
    tool_calls: Vec<ToolCallRecord>,
    progress_text: String,
    tool_calls_started_at: Option<Instant>,
    active: bool,
}

impl StreamSession {
    /// Starts an active session for a send to `conversation_id`.
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            accumulated_text: String::new(),
            tool_calls: Vec::new(),
            progress_text: String::new(),
            tool_calls_started_at: None,
            active: true,
        }
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated_text
    }

    pub fn tool_calls(&self) -> &[ToolCallRecord] {
        &self.tool_calls
    }

    pub fn progress_text(&self) -> &str {
        &self.progress_text
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Applies one event.
    ///
    /// Returns `None` for events that have no caller-visible effect, and for
    /// every event after the session has terminated.
    pub fn apply(&mut self, event: StreamEvent) -> Option<SessionUpdate> {
        self.apply_at(event, Instant::now())
    }

    pub(crate) fn apply_at(&mut self, event: StreamEvent, now: Instant) -> Option<SessionUpdate> {
        if !self.active {
            trace!(kind = event.kind(), "ignoring event after terminal state");
            return None;
        }
        match event {
            StreamEvent::Start(start) => Some(SessionUpdate::Started {
                conversation_id: start.conversation_id,
                message_id: start.message_id,
            }),
            StreamEvent::Text(text) => Some(self.push_text(text.text)),
            StreamEvent::Thinking(thinking) => Some(self.push_text(thinking.thinking)),
            StreamEvent::Progress(progress) => {
                self.progress_text = progress.message.clone().unwrap_or_default();
                Some(SessionUpdate::Progress {
                    stage: progress.stage,
                    message: progress.message,
                    percent: progress.percent,
                })
            }
            StreamEvent::ToolCall(call) => Some(SessionUpdate::ToolCall(self.record_tool_call(call, now))),
            StreamEvent::ToolResult(result) => {
                match self.tool_calls.iter_mut().find(|c| c.id == result.tool_call_id) {
                    Some(record) => record.result = Some(result.result.clone()),
                    None => {
                        debug!(tool_call_id = %result.tool_call_id, "tool result for unknown call");
                    }
                }
                Some(SessionUpdate::ToolResult {
                    tool_call_id: result.tool_call_id,
                    tool_name: result.tool_name,
                    result: result.result,
                })
            }
            StreamEvent::Error(error) => {
                Some(self.fail(StreamFailure::server(error.error, error.code)))
            }
            StreamEvent::Done(done) => Some(self.complete(done, now)),
            StreamEvent::Unknown => None,
        }
    }

    /// Terminates the session with a failure raised outside the event
    /// stream (a read error, or a body that ended early).
    ///
    /// Accumulated text is discarded.
    pub fn fail(&mut self, failure: StreamFailure) -> SessionUpdate {
        debug!(
            conversation_id = %self.conversation_id,
            discarded_chars = self.accumulated_text.len(),
            "stream session failed"
        );
        self.reset();
        SessionUpdate::Failed(failure)
    }

    /// Stops the session on behalf of the user.
    ///
    /// Text received so far becomes an `interrupted` assistant message
    /// carrying the tool calls seen. Returns `None` when there was no text,
    /// and on every call once the session has already terminated.
    pub fn cancel(&mut self) -> Option<Message> {
        self.cancel_at(Instant::now())
    }

    pub(crate) fn cancel_at(&mut self, now: Instant) -> Option<Message> {
        if !self.active {
            return None;
        }
        let partial = (!self.accumulated_text.is_empty()).then(|| {
            let mut message = Message::new(
                new_message_id(),
                self.conversation_id.clone(),
                Role::Assistant,
                MessageContent::Text(self.accumulated_text.clone()),
            );
            message.metadata = self.tool_call_metadata(now);
            message.metadata.interrupted = true;
            message
        });
        debug!(
            conversation_id = %self.conversation_id,
            kept_partial = partial.is_some(),
            "stream session cancelled"
        );
        self.reset();
        partial
    }

    fn push_text(&mut self, delta: String) -> SessionUpdate {
        self.accumulated_text.push_str(&delta);
        self.progress_text.clear();
        SessionUpdate::Text {
            delta,
            full_text: self.accumulated_text.clone(),
        }
    }

    fn record_tool_call(&mut self, call: ToolCallEvent, now: Instant) -> ToolCallRecord {
        if self.tool_calls.is_empty() && self.tool_calls_started_at.is_none() {
            self.tool_calls_started_at = Some(now);
        }
        let record = ToolCallRecord {
            id: call.tool_call_id,
            name: call.tool_name,
            args: call.args,
            result: None,
            reasoning: call.reasoning,
            display_name: call.display_name,
        };
        match self.tool_calls.iter_mut().find(|c| c.id == record.id) {
            Some(existing) => {
                debug!(tool_call_id = %record.id, "tool call announced twice, updating");
                let result = existing.result.take();
                *existing = ToolCallRecord { result, ..record };
                existing.clone()
            }
            None => {
                self.tool_calls.push(record.clone());
                record
            }
        }
    }

    fn complete(&mut self, done: DoneEvent, now: Instant) -> SessionUpdate {
        let id = if done.message_id.is_empty() {
            new_message_id()
        } else {
            done.message_id
        };
        let conversation_id = if done.conversation_id.is_empty() {
            self.conversation_id.clone()
        } else {
            done.conversation_id
        };
        let mut message = Message::new(id, conversation_id, Role::Assistant, done.content);
        message.citations = done.citations;
        message.metadata = self.tool_call_metadata(now);
        message.metadata.usage = done.usage;
        debug!(
            message_id = %message.id,
            tool_calls = message.metadata.tool_call_details.len(),
            "stream session completed"
        );
        self.reset();
        SessionUpdate::Completed(message)
    }

    fn tool_call_metadata(&self, now: Instant) -> MessageMetadata {
        if self.tool_calls.is_empty() {
            return MessageMetadata::default();
        }
        MessageMetadata {
            tool_call_details: self.tool_calls.clone(),
            tool_call_duration_seconds: self
                .tool_calls_started_at
                .map(|started| rounded_seconds(now.saturating_duration_since(started))),
            ..MessageMetadata::default()
        }
    }

    fn reset(&mut self) {
        self.accumulated_text.clear();
        self.tool_calls.clear();
        self.progress_text.clear();
        self.tool_calls_started_at = None;
        self.active = false;
    }
}

fn rounded_seconds(elapsed: Duration) -> u64 {
    u64::try_from((elapsed.as_millis() + 500) / 1000).unwrap_or(u64::MAX)
}
