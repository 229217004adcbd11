//! Error-store collaborator: a small `tracing_subscriber::Layer` that
//! remembers the most recent `tracing::error!` message so the renderer can
//! print it alongside the numeric exit code, plus the `-log [path]` file
//! sink.
//!
//! A layer that inspects only the fields it cares about and forwards them
//! somewhere other than the terminal — here an in-memory slot instead of the
//! stdout formatter.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Holds the last `ERROR`-level message emitted on a fatal path, for the
/// renderer to print next to the numeric return code on exit.
#[derive(Debug, Clone, Default)]
pub struct ErrorStore {
    last_message: Arc<Mutex<Option<String>>>,
}

impl ErrorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer(&self) -> ErrorStoreLayer {
        ErrorStoreLayer {
            last_message: self.last_message.clone(),
        }
    }

    pub fn last_message(&self) -> Option<String> {
        self.last_message.lock().expect("error store mutex poisoned").clone()
    }
}

pub struct ErrorStoreLayer {
    last_message: Arc<Mutex<Option<String>>>,
}

impl<S: Subscriber> Layer<S> for ErrorStoreLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::ERROR {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        if let Some(msg) = visitor.message {
            *self.last_message.lock().expect("error store mutex poisoned") = Some(msg);
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: Option<String>,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        }
    }
}

/// Default log path when `-log` is given without a value.
pub const DEFAULT_LOG_PATH: &str = "./TPMFactoryUpd.log";

/// Longest path this tool accepts for `-log`.
pub const MAX_LOG_PATH_LEN: usize = 260;

/// A tracing `fmt` layer writing to a capped-size rotating file. Rotation is
/// a single-generation rename (`path` -> `path.old`) performed before the
/// file is (re)opened, rather than a background roller, since the log is
/// small and only written by this one process.
pub fn open_rotating(path: &Path, max_size_bytes: u64) -> std::io::Result<(tracing_appender::non_blocking::NonBlocking, tracing_appender::non_blocking::WorkerGuard)> {
    if let Ok(metadata) = std::fs::metadata(path) {
        if metadata.len() >= max_size_bytes {
            let rotated = rotated_path(path);
            let _ = std::fs::rename(path, rotated);
        }
    }
    let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    Ok(tracing_appender::non_blocking(file))
}

fn rotated_path(path: &Path) -> PathBuf {
    let mut rotated = path.as_os_str().to_owned();
    rotated.push(".old");
    PathBuf::from(rotated)
}
