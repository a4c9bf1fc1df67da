use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_FILTER: &str = "warn";
const DEFAULT_LOG_FILE: &str = "agent-chat.logs.jsonl";

/// Logging settings resolved from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
struct LogSettings {
    enabled: bool,
    level: Option<String>,
    json_path: Option<PathBuf>,
}

impl LogSettings {
    fn resolve(var: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            enabled: var("AGENT_CHAT_OBSERVABILITY")
                .and_then(|v| parse_flag(&v))
                .unwrap_or(true),
            level: var("AGENT_CHAT_LOG_LEVEL").filter(|v| !v.trim().is_empty()),
            json_path: var("AGENT_CHAT_JSON_LOG_PATH")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    fn filter(&self) -> EnvFilter {
        if let Some(level) = &self.level
            && let Ok(filter) = EnvFilter::try_new(level)
        {
            return filter;
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Splits a log path into the directory and file name the appender wants.
fn log_file_target(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    (dir, file_name)
}

/// Installs the process-wide tracing subscriber once.
///
/// Environment variables:
/// - `AGENT_CHAT_OBSERVABILITY`: `0`/`false`/`off` disables logging (default on).
/// - `AGENT_CHAT_LOG_LEVEL`: filter directive; falls back to `RUST_LOG`, then `warn`.
/// - `AGENT_CHAT_JSON_LOG_PATH`: write JSONL to this file instead of the console.
///
/// Console output goes to stderr so it never mixes with streamed replies.
pub fn init_observability() {
    INIT.get_or_init(|| {
        let settings = LogSettings::resolve(|key| std::env::var(key).ok());
        if !settings.enabled {
            return;
        }
        let filter = settings.filter();
        match &settings.json_path {
            Some(path) => {
                let (dir, file_name) = log_file_target(path);
                let _ = std::fs::create_dir_all(&dir);
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(false)
                    .with_writer(tracing_appender::rolling::never(dir, file_name));
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(json_layer)
                    .try_init();
            }
            None => {
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(console_layer)
                    .try_init();
            }
        }
    });
}
