use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt as _};
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::errors::{ChatError, StreamFailure};
use crate::event::parse_frame;
use crate::message::{Message, ToolCallRecord};
use crate::reducer::{SessionUpdate, StreamSession};
use crate::sse::FrameDecoder;

/// Response body of a streaming send, as raw chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ChatError>> + Send>>;

/// Handle used to request cancellation of a running stream.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Requests cancellation. Calling it again has no further effect.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Returns the receiving side handed to the driver.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving side of an [`AbortHandle`].
#[derive(Clone, Debug)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation was requested.
    ///
    /// Never resolves if every handle is dropped without aborting.
    pub async fn aborted(&mut self) {
        if self.rx.wait_for(|aborted| *aborted).await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}

/// Receives the caller-visible effects of a stream, in order.
///
/// Every method has a no-op default so observers implement only what they
/// render.
pub trait StreamObserver: Send {
    fn on_start(&mut self, _conversation_id: &str, _message_id: &str) {}

    /// `full_text` is everything received so far, `delta` included.
    fn on_text(&mut self, _delta: &str, _full_text: &str) {}

    fn on_progress(&mut self, _stage: Option<&str>, _message: Option<&str>, _percent: Option<f64>) {}

    fn on_tool_call(&mut self, _call: ToolCallRecord) {}

    fn on_tool_result(&mut self, _tool_call_id: &str, _tool_name: &str, _result: &serde_json::Value) {}

    /// Called at most once per send, for any failure other than cancellation.
    fn on_error(&mut self, _error: &ChatError) {}

    fn on_done(&mut self, _message: &Message) {}
}

impl StreamObserver for () {}

/// How a streaming send ended.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamOutcome {
    Completed(Message),
    Failed(StreamFailure),
    /// Stopped by the caller; holds the partial reply if any text arrived.
    Cancelled(Option<Message>),
}

/// Pipes a response body through frame decoding, event parsing and the
/// session reducer until a terminal state is reached.
///
/// The abort signal is raced against every chunk read and checked again
/// before each frame is applied.
pub async fn drive_stream(
    conversation_id: &str,
    mut body: ByteStream,
    observer: &mut dyn StreamObserver,
    mut abort: AbortSignal,
) -> StreamOutcome {
    let mut decoder = FrameDecoder::default();
    let mut session = StreamSession::new(conversation_id);

    loop {
        tokio::select! {
            biased;
            () = abort.aborted() => {
                return cancel(conversation_id, &mut decoder, &mut session);
            }
            next = body.next() => {
                match next {
                    Some(Ok(chunk)) => {
                        trace!(conversation_id, bytes = chunk.len(), "stream chunk");
                        for payload in decoder.push_chunk(&chunk) {
                            if abort.is_aborted() {
                                return cancel(conversation_id, &mut decoder, &mut session);
                            }
                            let Some(event) = parse_frame(&payload) else {
                                continue;
                            };
                            if event.is_terminal() {
                                debug!(conversation_id, kind = event.kind(), "terminal event received");
                            }
                            if let Some(update) = session.apply(event)
                                && let Some(outcome) = dispatch(observer, update)
                            {
                                decoder.finish();
                                return outcome;
                            }
                        }
                    }
                    Some(Err(err)) => {
                        decoder.finish();
                        let update = session.fail(StreamFailure::transport(err.to_string()));
                        return dispatch(observer, update)
                            .unwrap_or(StreamOutcome::Failed(StreamFailure::Incomplete));
                    }
                    None => {
                        decoder.finish();
                        debug!(conversation_id, "stream body ended without a terminal event");
                        let update = session.fail(StreamFailure::Incomplete);
                        return dispatch(observer, update)
                            .unwrap_or(StreamOutcome::Failed(StreamFailure::Incomplete));
                    }
                }
            }
        }
    }
}

fn cancel(conversation_id: &str, decoder: &mut FrameDecoder, session: &mut StreamSession) -> StreamOutcome {
    decoder.finish();
    let partial = session.cancel();
    debug!(conversation_id, kept_partial = partial.is_some(), "stream cancelled");
    StreamOutcome::Cancelled(partial)
}

/// Forwards one update; returns the outcome when the update is terminal.
fn dispatch(observer: &mut dyn StreamObserver, update: SessionUpdate) -> Option<StreamOutcome> {
    match update {
        SessionUpdate::Started {
            conversation_id,
            message_id,
        } => observer.on_start(&conversation_id, &message_id),
        SessionUpdate::Text { delta, full_text } => observer.on_text(&delta, &full_text),
        SessionUpdate::Progress {
            stage,
            message,
            percent,
        } => observer.on_progress(stage.as_deref(), message.as_deref(), percent),
        SessionUpdate::ToolCall(call) => observer.on_tool_call(call),
        SessionUpdate::ToolResult {
            tool_call_id,
            tool_name,
            result,
        } => observer.on_tool_result(&tool_call_id, &tool_name, &result),
        SessionUpdate::Failed(failure) => {
            observer.on_error(&ChatError::Stream(failure.clone()));
            return Some(StreamOutcome::Failed(failure));
        }
        SessionUpdate::Completed(message) => {
            observer.on_done(&message);
            return Some(StreamOutcome::Completed(message));
        }
    }
    None
}
