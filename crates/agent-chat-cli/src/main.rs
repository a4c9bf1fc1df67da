//! Streams one message to an agent server and prints the reply.

use std::io::Write as _;

use agent_chat_client::prelude::*;
use agent_chat_client::{JsonMap, init_observability};
use clap::Parser;
use tracing::debug;

/// Send a message to an agent and stream the reply to stdout.
#[derive(Parser, Debug, Clone)]
#[command(version)]
struct Cli {
    /// Base URL of the agent server API.
    #[arg(long, env = "AGENT_CHAT_BASE_URL")]
    base_url: String,

    /// Agent that answers when a new conversation is created.
    #[arg(long, env = "AGENT_CHAT_AGENT_ID")]
    agent_id: String,

    /// Authorization header value, sent verbatim.
    #[arg(long, env = "AGENT_CHAT_AUTHORIZATION", hide_env_values = true)]
    authorization: Option<String>,

    /// Continue an existing conversation instead of starting a new one.
    #[arg(long, value_name = "ID")]
    conversation: Option<String>,

    /// Wait for the complete reply instead of streaming it.
    #[arg(long = "no-stream", default_value_t = false)]
    no_stream: bool,

    /// Message to send.
    message: String,
}

impl Cli {
    fn config(&self) -> ChatConfig {
        let mut config = ChatConfig::new(&self.base_url, &self.agent_id).streaming(!self.no_stream);
        if let Some(authorization) = &self.authorization {
            config = config.authorization(authorization);
        }
        config
    }
}

/// Prints deltas on stdout and tool activity on stderr.
struct TerminalPrinter;

impl ChatCallbacks for TerminalPrinter {
    fn on_stream_text(&mut self, delta: &str, _full_text: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(delta.as_bytes());
        let _ = stdout.flush();
    }

    fn on_tool_call(&mut self, name: &str, args: &JsonMap) {
        let args = serde_json::to_string(args).unwrap_or_default();
        eprintln!("[tool] {name} {args}");
    }

    fn on_tool_result(&mut self, name: &str, _result: &serde_json::Value) {
        eprintln!("[tool] {name} done");
    }

    fn on_conversation_created(&mut self, conversation: &agent_chat_client::Conversation) {
        eprintln!("[conversation] {}", conversation.id);
    }
}

/// Stops the reply being streamed. Returns `false` when nothing was
/// streaming yet, in which case the caller exits instead.
fn interrupt(stop: &StopHandle) -> bool {
    let stopped = stop.stop();
    debug!(stopped, "ctrl-c received");
    stopped
}

#[tokio::main]
async fn main() -> Result<(), ChatError> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_observability();

    let config = cli.config();
    let streaming = config.streaming;
    let mut chat = ChatSession::connect(config)?.with_callbacks(TerminalPrinter);

    let stop = chat.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() && !interrupt(&stop) {
            eprintln!("[interrupted]");
            std::process::exit(130);
        }
    });

    if let Some(conversation_id) = &cli.conversation {
        chat.load_conversation(conversation_id).await?;
    }

    match chat.send_message(&cli.message).await? {
        Some(reply) if reply.metadata.interrupted => {
            println!();
            eprintln!("[interrupted]");
        }
        Some(reply) if !streaming => println!("{}", reply.text()),
        Some(_) => println!(),
        None => eprintln!("[no reply]"),
    }
    Ok(())
}
