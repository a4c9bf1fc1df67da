use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::backend::ChatBackend;
use crate::client::AgentClient;
use crate::config::ChatConfig;
use crate::errors::ChatError;
use crate::files::{FilePolicy, LocalFile, PendingFile};
use crate::message::{JsonMap, Message, Role, ToolCallRecord};
use crate::model::{Conversation, CreateConversationRequest, SendMessageRequest};
use crate::transport::{AbortHandle, StreamObserver, StreamOutcome, drive_stream};

/// Notifications fired by a [`ChatSession`].
pub trait ChatCallbacks: Send {
    fn on_message_sent(&mut self, _message: &Message) {}

    fn on_message_received(&mut self, _message: &Message) {}

    fn on_stream_text(&mut self, _delta: &str, _full_text: &str) {}

    fn on_tool_call(&mut self, _name: &str, _args: &JsonMap) {}

    fn on_tool_result(&mut self, _name: &str, _result: &serde_json::Value) {}

    fn on_error(&mut self, _error: &ChatError) {}

    fn on_conversation_created(&mut self, _conversation: &Conversation) {}
}

impl ChatCallbacks for () {}

/// Caller-visible state of a chat.
#[derive(Clone, Debug, Default)]
pub struct ChatState {
    pub messages: Vec<Message>,
    pub conversation: Option<Conversation>,
    pub is_loading: bool,
    /// Text of the reply currently streaming in.
    pub streaming_text: String,
    pub progress_text: String,
    /// Tool calls of the reply currently streaming in.
    pub active_tool_calls: Vec<ToolCallRecord>,
    /// Current error; cleared by the next send.
    pub error: Option<ChatError>,
    pub pending_files: Vec<PendingFile>,
    pub last_user_message: Option<String>,
}

/// Stops the stream of a [`ChatSession`] from another task.
#[derive(Clone, Debug, Default)]
pub struct StopHandle {
    slot: Arc<Mutex<Option<AbortHandle>>>,
}

impl StopHandle {
    /// Aborts the running stream. Returns `false` when nothing was running.
    pub fn stop(&self) -> bool {
        match self.lock().take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().is_some()
    }

    fn install(&self, handle: AbortHandle) {
        *self.lock() = Some(handle);
    }

    fn clear(&self) {
        self.lock().take();
    }

    fn lock(&self) -> MutexGuard<'_, Option<AbortHandle>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Stateful chat with one agent: message list, current conversation,
/// streaming progress and pending attachments.
pub struct ChatSession {
    backend: Arc<dyn ChatBackend>,
    config: ChatConfig,
    callbacks: Box<dyn ChatCallbacks>,
    stop: StopHandle,
    state: ChatState,
}

impl ChatSession {
    pub fn new(backend: Arc<dyn ChatBackend>, config: ChatConfig) -> Self {
        Self {
            backend,
            config,
            callbacks: Box::new(()),
            stop: StopHandle::default(),
            state: ChatState::default(),
        }
    }

    /// Creates a session talking HTTP to `config.base_url`.
    pub fn connect(config: ChatConfig) -> Result<Self, ChatError> {
        config.validate()?;
        let client = AgentClient::new(&config)?;
        Ok(Self::new(Arc::new(client), config))
    }

    pub fn with_callbacks(mut self, callbacks: impl ChatCallbacks + 'static) -> Self {
        self.callbacks = Box::new(callbacks);
        self
    }

    /// Seeds the message list.
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.state.messages = messages;
        self
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn messages(&self) -> &[Message] {
        &self.state.messages
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Handle that stops the running stream; clones share the same slot.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stop(&self) -> bool {
        self.stop.stop()
    }

    /// Sends `text` and waits for the reply.
    ///
    /// Blank input is ignored. A conversation is created first when none is
    /// open. Returns the assistant message added to the list: the reply, or
    /// the partial reply of a stopped stream. Failures are stored in the
    /// error slot, reported through `on_error`, and returned.
    pub async fn send_message(&mut self, text: &str) -> Result<Option<Message>, ChatError> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        self.state.error = None;
        self.state.is_loading = true;
        self.state.last_user_message = Some(text.to_string());

        let result = self.deliver(text).await;

        self.state.is_loading = false;
        self.state.streaming_text.clear();
        self.state.progress_text.clear();
        self.state.active_tool_calls.clear();
        if let Err(err) = &result {
            self.report(err.clone());
        }
        result
    }

    /// Resends the last user text verbatim, first dropping a trailing
    /// interrupted reply.
    pub async fn retry(&mut self) -> Result<Option<Message>, ChatError> {
        let Some(text) = self.state.last_user_message.clone() else {
            return Ok(None);
        };
        if self
            .state
            .messages
            .last()
            .is_some_and(|m| m.role == Role::Assistant && m.metadata.interrupted)
        {
            self.state.messages.pop();
        }
        self.send_message(&text).await
    }

    /// Replaces the error slot; `None` clears it.
    pub fn set_error(&mut self, error: Option<ChatError>) {
        self.state.error = error;
    }

    pub fn clear_messages(&mut self) {
        self.state.messages.clear();
        self.state.conversation = None;
        self.state.error = None;
    }

    /// Opens an existing conversation with its messages.
    pub async fn load_conversation(&mut self, conversation_id: &str) -> Result<(), ChatError> {
        self.state.is_loading = true;
        self.state.error = None;
        let result = self.backend.get_conversation(conversation_id).await;
        self.state.is_loading = false;
        match result {
            Ok(detail) => {
                debug!(conversation_id, messages = detail.messages.len(), "conversation loaded");
                self.state.conversation = Some(detail.conversation);
                self.state.messages = detail.messages;
                Ok(())
            }
            Err(err) => {
                self.report(err.clone());
                Err(err)
            }
        }
    }

    /// Creates a conversation with the configured agent and makes it current.
    pub async fn create_conversation(&mut self, title: Option<&str>) -> Result<Conversation, ChatError> {
        let conversation = self
            .backend
            .create_conversation(CreateConversationRequest {
                agent_id: self.config.agent_id.clone(),
                title: title.map(str::to_string),
                ..Default::default()
            })
            .await?;
        self.state.conversation = Some(conversation.clone());
        self.state.messages.clear();
        self.callbacks.on_conversation_created(&conversation);
        Ok(conversation)
    }

    /// Queues attachments for the next send and returns how many were
    /// accepted. Each rejected file is reported through `on_error`.
    pub fn add_files(&mut self, files: Vec<LocalFile>) -> usize {
        let policy = FilePolicy::from(&self.config);
        let (accepted, rejected) = policy.admit(self.state.pending_files.len(), files);
        for err in &rejected {
            self.callbacks.on_error(err);
        }
        let count = accepted.len();
        self.state.pending_files.extend(accepted);
        count
    }

    pub fn remove_file(&mut self, file_id: &str) -> bool {
        let before = self.state.pending_files.len();
        self.state.pending_files.retain(|f| f.id() != file_id);
        self.state.pending_files.len() != before
    }

    fn report(&mut self, err: ChatError) {
        warn!(error = %err, "chat request failed");
        self.callbacks.on_error(&err);
        self.state.error = Some(err);
    }

    async fn deliver(&mut self, text: &str) -> Result<Option<Message>, ChatError> {
        let conversation_id = match &self.state.conversation {
            Some(conversation) => conversation.id.clone(),
            None => self.create_conversation(None).await?.id,
        };

        let files = std::mem::take(&mut self.state.pending_files);
        let request = SendMessageRequest::new(text).files(files.iter().map(PendingFile::to_payload).collect());
        let mut user_message = Message::user(&conversation_id, text);
        if !files.is_empty() {
            user_message.files = Some(files.into_iter().map(|f| f.attachment).collect());
        }
        let optimistic_id = user_message.id.clone();
        self.state.messages.push(user_message);
        if let Some(sent) = self.state.messages.last() {
            self.callbacks.on_message_sent(sent);
        }

        if self.config.streaming {
            return self.stream_reply(&conversation_id, request).await;
        }

        let response = self.backend.send_message(&conversation_id, request).await?;
        self.state.messages.retain(|m| m.id != optimistic_id);
        self.state.messages.push(response.message);
        self.state.messages.push(response.response.clone());
        self.callbacks.on_message_received(&response.response);
        Ok(Some(response.response))
    }

    async fn stream_reply(
        &mut self,
        conversation_id: &str,
        request: SendMessageRequest,
    ) -> Result<Option<Message>, ChatError> {
        self.state.streaming_text.clear();
        self.state.active_tool_calls.clear();
        let abort = AbortHandle::new();
        self.stop.install(abort.clone());
        let signal = abort.signal();

        let mut opening = signal.clone();
        let opened = tokio::select! {
            biased;
            () = opening.aborted() => None,
            opened = self.backend.open_stream(conversation_id, request) => Some(opened),
        };
        let body = match opened {
            Some(Ok(body)) => body,
            Some(Err(err)) => {
                self.stop.clear();
                return Err(err);
            }
            None => {
                self.stop.clear();
                debug!(conversation_id, "stopped before the stream opened");
                return Ok(None);
            }
        };

        let mut observer = SessionObserver {
            callbacks: self.callbacks.as_mut(),
            state: &mut self.state,
            stop: &self.stop,
        };
        let outcome = drive_stream(conversation_id, body, &mut observer, signal).await;
        self.stop.clear();

        match outcome {
            StreamOutcome::Completed(message) => {
                self.state.messages.push(message.clone());
                self.callbacks.on_message_received(&message);
                Ok(Some(message))
            }
            StreamOutcome::Failed(failure) => Err(ChatError::Stream(failure)),
            StreamOutcome::Cancelled(partial) => {
                if let Some(message) = &partial {
                    self.state.messages.push(message.clone());
                }
                Ok(partial)
            }
        }
    }
}

/// Mirrors stream progress into [`ChatState`] and the caller's callbacks.
///
/// Terminal notifications empty the stop slot first, so a late `stop()`
/// finds nothing to abort.
struct SessionObserver<'a> {
    callbacks: &'a mut dyn ChatCallbacks,
    state: &'a mut ChatState,
    stop: &'a StopHandle,
}

impl StreamObserver for SessionObserver<'_> {
    fn on_text(&mut self, delta: &str, full_text: &str) {
        self.state.streaming_text = full_text.to_string();
        self.state.progress_text.clear();
        self.callbacks.on_stream_text(delta, full_text);
    }

    fn on_progress(&mut self, _stage: Option<&str>, message: Option<&str>, _percent: Option<f64>) {
        self.state.progress_text = message.unwrap_or_default().to_string();
    }

    fn on_tool_call(&mut self, call: ToolCallRecord) {
        self.callbacks.on_tool_call(&call.name, &call.args);
        match self.state.active_tool_calls.iter_mut().find(|c| c.id == call.id) {
            Some(existing) => *existing = call,
            None => self.state.active_tool_calls.push(call),
        }
    }

    fn on_tool_result(&mut self, tool_call_id: &str, tool_name: &str, result: &serde_json::Value) {
        if let Some(call) = self
            .state
            .active_tool_calls
            .iter_mut()
            .find(|c| c.id == tool_call_id)
        {
            call.result = Some(result.clone());
        }
        self.callbacks.on_tool_result(tool_name, result);
    }

    fn on_error(&mut self, _error: &ChatError) {
        self.stop.clear();
    }

    fn on_done(&mut self, _message: &Message) {
        self.stop.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StreamFailure;
    use crate::model::{ConversationDetail, SendMessageResponse};
    use crate::test_support::{FakeBackend, conversation, server_message};

    const START: &str = "data: {\"type\":\"stream.start\",\"conversationId\":\"conv-1\",\"messageId\":\"m1\"}\n";

    #[derive(Clone, Default)]
    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
        stop_on_text: Option<StopHandle>,
    }

    impl Recorder {
        fn push(&self, entry: String) {
            self.log.lock().expect("log lock").push(entry);
        }

        fn entries(&self) -> Vec<String> {
            self.log.lock().expect("log lock").clone()
        }

        fn errors(&self) -> Vec<String> {
            self.entries()
                .into_iter()
                .filter(|e| e.starts_with("error "))
                .collect()
        }
    }

    impl ChatCallbacks for Recorder {
        fn on_message_sent(&mut self, message: &Message) {
            self.push(format!("sent {}", message.text()));
        }

        fn on_message_received(&mut self, message: &Message) {
            self.push(format!("received {}", message.text()));
        }

        fn on_stream_text(&mut self, _delta: &str, full_text: &str) {
            self.push(format!("text {full_text}"));
            if let Some(stop) = &self.stop_on_text {
                stop.stop();
            }
        }

        fn on_tool_call(&mut self, name: &str, _args: &JsonMap) {
            self.push(format!("tool_call {name}"));
        }

        fn on_tool_result(&mut self, name: &str, result: &serde_json::Value) {
            self.push(format!("tool_result {name} {result}"));
        }

        fn on_error(&mut self, error: &ChatError) {
            self.push(format!("error {error}"));
        }

        fn on_conversation_created(&mut self, conversation: &Conversation) {
            self.push(format!("created {}", conversation.id));
        }
    }

    fn session(backend: &Arc<FakeBackend>, recorder: &Recorder) -> ChatSession {
        ChatSession::new(backend.clone(), ChatConfig::new("http://agent.test", "support"))
            .with_callbacks(recorder.clone())
    }

    #[tokio::test]
    async fn streamed_reply_lands_in_messages() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_stream(&[
            START,
            "data: {\"type\":\"stream.tool_call\",\"toolName\":\"search\",\"toolCallId\":\"t1\",\"args\":{}}\n",
            "data: {\"type\":\"stream.tool_result\",\"toolName\":\"search\",\"toolCallId\":\"t1\",\"result\":{\"hits\":3}}\n",
            "data: {\"type\":\"stream.text\",\"text\":\"Hel\"}\ndata: {\"type\":\"stream.text\",\"text\":\"lo\"}\n",
            "data: {\"type\":\"stream.done\",\"conversationId\":\"conv-1\",\"messageId\":\"m1\",\"content\":\"Hello!\"}\n",
        ]);
        let recorder = Recorder::default();
        let mut chat = session(&backend, &recorder);

        let reply = chat.send_message("hi").await.expect("send").expect("reply");
        assert_eq!(reply.text(), "Hello!");

        let state = chat.state();
        assert_eq!(state.conversation.as_ref().map(|c| c.id.as_str()), Some("conv-1"));
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[0].role, Role::User);
        assert_eq!(state.messages[1].id, "m1");
        assert!(!state.is_loading);
        assert!(state.streaming_text.is_empty());
        assert!(state.active_tool_calls.is_empty());
        assert!(state.error.is_none());
        assert!(!chat.stop_handle().is_streaming());
        assert_eq!(
            recorder.entries(),
            vec![
                "created conv-1",
                "sent hi",
                "tool_call search",
                "tool_result search {\"hits\":3}",
                "text Hel",
                "text Hello",
                "received Hello!",
            ]
        );
        assert_eq!(backend.created()[0].agent_id, "support");
    }

    #[tokio::test]
    async fn stop_mid_stream_keeps_partial_reply() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_hanging_stream(&[
            START,
            "data: {\"type\":\"stream.text\",\"text\":\"Partial\"}\ndata: {\"type\":\"stream.te",
        ]);
        let chat = ChatSession::new(backend.clone(), ChatConfig::new("http://agent.test", "support"));
        let recorder = Recorder {
            stop_on_text: Some(chat.stop_handle()),
            ..Recorder::default()
        };
        let mut chat = chat.with_callbacks(recorder.clone());

        let partial = chat.send_message("question").await.expect("send").expect("partial");
        assert_eq!(partial.text(), "Partial");
        assert!(partial.metadata.interrupted);
        assert_eq!(chat.messages().len(), 2);
        assert!(chat.state().error.is_none());
        assert!(recorder.errors().is_empty());
        assert!(!chat.stop());
    }

    #[tokio::test]
    async fn retry_drops_interrupted_reply_and_resends() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_hanging_stream(&[START, "data: {\"type\":\"stream.text\",\"text\":\"Partial\"}\n"]);
        backend.push_stream(&["data: {\"type\":\"stream.done\",\"content\":\"Full answer\"}\n"]);
        let chat = ChatSession::new(backend.clone(), ChatConfig::new("http://agent.test", "support"));
        let stopper = Recorder {
            stop_on_text: Some(chat.stop_handle()),
            ..Recorder::default()
        };
        let mut chat = chat.with_callbacks(stopper);

        chat.send_message("Explain lifetimes").await.expect("first send");
        assert!(chat.messages()[1].metadata.interrupted);

        let reply = chat.retry().await.expect("retry").expect("reply");
        assert_eq!(reply.text(), "Full answer");
        let roles: Vec<Role> = chat.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::User, Role::Assistant]);
        let sent = backend.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1.message, "Explain lifetimes");
        assert_eq!(sent[1].1.message, "Explain lifetimes");
    }

    #[tokio::test]
    async fn stream_error_sets_error_slot_once() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_stream(&[
            START,
            "data: {\"type\":\"stream.text\",\"text\":\"So far\"}\n",
            "data: {\"type\":\"stream.error\",\"error\":\"rate limited\"}\n",
        ]);
        let recorder = Recorder::default();
        let mut chat = session(&backend, &recorder);

        let err = chat.send_message("hi").await.expect_err("stream error");
        assert_eq!(err, ChatError::Stream(StreamFailure::server("rate limited", None)));
        assert_eq!(chat.state().error.as_ref(), Some(&err));
        assert_eq!(recorder.errors(), vec!["error rate limited"]);
        assert_eq!(chat.messages().len(), 1);
        assert!(!chat.stop_handle().is_streaming());

        chat.set_error(None);
        assert!(chat.state().error.is_none());
        assert_eq!(chat.messages().len(), 1);
    }

    #[tokio::test]
    async fn open_failure_is_reported() {
        let backend = Arc::new(FakeBackend::default());
        backend.fail_next_open(ChatError::api(503, "agent unavailable"));
        let recorder = Recorder::default();
        let mut chat = session(&backend, &recorder);

        let err = chat.send_message("hi").await.expect_err("open failure");
        assert_eq!(err.status(), Some(503));
        assert_eq!(recorder.errors(), vec!["error agent unavailable"]);
        assert!(!chat.state().is_loading);
    }

    #[tokio::test]
    async fn blank_input_is_ignored() {
        let backend = Arc::new(FakeBackend::default());
        let recorder = Recorder::default();
        let mut chat = session(&backend, &recorder);
        assert_eq!(chat.send_message("   ").await.expect("blank"), None);
        assert!(recorder.entries().is_empty());
        assert!(backend.created().is_empty());
    }

    #[tokio::test]
    async fn non_streaming_reply_replaces_optimistic_message() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_response(SendMessageResponse {
            message: server_message("u-server", "conv-1", Role::User, "hi"),
            response: server_message("a-server", "conv-1", Role::Assistant, "hello"),
            usage: None,
        });
        let recorder = Recorder::default();
        let mut chat = ChatSession::new(
            backend.clone(),
            ChatConfig::new("http://agent.test", "support").streaming(false),
        )
        .with_callbacks(recorder.clone());

        chat.send_message("hi").await.expect("send");
        let ids: Vec<&str> = chat.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["u-server", "a-server"]);
        assert!(!backend.sent()[0].1.stream);
        assert!(recorder.entries().contains(&"received hello".to_string()));
    }

    #[tokio::test]
    async fn pending_files_travel_with_the_next_message() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_stream(&["data: {\"type\":\"stream.done\",\"content\":\"got it\"}\n"]);
        let recorder = Recorder::default();
        let mut chat = ChatSession::new(
            backend.clone(),
            ChatConfig::new("http://agent.test", "support")
                .allowed_file_types(["text/plain"])
                .file_limits(16, 10),
        )
        .with_callbacks(recorder.clone());

        let accepted = chat.add_files(vec![
            LocalFile::new("a.txt", "text/plain", "hello"),
            LocalFile::new("b.png", "image/png", "png"),
            LocalFile::new("c.txt", "text/plain", "x".repeat(17)),
        ]);
        assert_eq!(accepted, 1);
        assert_eq!(recorder.errors().len(), 2);
        let extra = chat.add_files(vec![LocalFile::new("d.txt", "text/plain", "bye")]);
        assert_eq!(extra, 1);
        let dropped = chat.state().pending_files[1].id().to_string();
        assert!(chat.remove_file(&dropped));
        assert!(!chat.remove_file(&dropped));

        chat.send_message("see attached").await.expect("send");
        let sent = backend.sent();
        let files = sent[0].1.files.as_ref().expect("files");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].content, "aGVsbG8=");
        assert!(chat.state().pending_files.is_empty());
        let attached = chat.messages()[0].files.as_ref().expect("attachments");
        assert_eq!(attached[0].name, "a.txt");
    }

    #[tokio::test]
    async fn load_and_clear_conversation() {
        let backend = Arc::new(FakeBackend::default());
        backend.insert_detail(ConversationDetail {
            conversation: conversation("c7"),
            messages: vec![
                server_message("m1", "c7", Role::User, "hi"),
                server_message("m2", "c7", Role::Assistant, "hello"),
            ],
        });
        let recorder = Recorder::default();
        let mut chat = session(&backend, &recorder);

        chat.load_conversation("c7").await.expect("load");
        assert_eq!(chat.messages().len(), 2);
        assert_eq!(chat.state().conversation.as_ref().map(|c| c.id.as_str()), Some("c7"));

        let err = chat.load_conversation("missing").await.expect_err("missing");
        assert_eq!(err.status(), Some(404));
        assert!(chat.state().error.is_some());

        chat.clear_messages();
        assert!(chat.messages().is_empty());
        assert!(chat.state().conversation.is_none());
        assert!(chat.state().error.is_none());
    }

    #[tokio::test]
    async fn created_conversation_becomes_current() {
        let backend = Arc::new(FakeBackend::default());
        let recorder = Recorder::default();
        let mut chat = session(&backend, &recorder)
            .with_messages(vec![server_message("old", "c0", Role::User, "old")]);

        let created = chat.create_conversation(Some("Billing")).await.expect("create");
        assert_eq!(created.title.as_deref(), Some("Billing"));
        assert!(chat.messages().is_empty());
        assert_eq!(recorder.entries(), vec!["created conv-1"]);
    }

    #[test]
    fn stop_without_stream_is_a_no_op() {
        let handle = StopHandle::default();
        assert!(!handle.stop());
        let abort = AbortHandle::new();
        handle.install(abort.clone());
        assert!(handle.is_streaming());
        assert!(handle.stop());
        assert!(abort.is_aborted());
        assert!(!handle.stop());
    }
}
