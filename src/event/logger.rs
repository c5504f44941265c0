//! Loggers handed to long-running lifecycle operations.
//!
//! The caller of an operation supplies an [`OperationLogger`]; the registry wraps it in
//! an [`OperationScope`] before passing it to hook code. The scope forwards output and
//! guarantees that `end` reaches the caller's logger exactly once, whether the hook
//! succeeds, fails, calls `end` itself, or the operation future is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mockall::automock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::{channel::Channel, event_bus::EventBus};

/// Progress sink for a single operation.
#[automock]
pub trait OperationLogger: Send + Sync {
    fn log(&self, message: &str);

    fn warn(&self, message: &str);

    fn error(&self, message: &str);

    /// Signals the logical end of the operation.
    fn end(&self);
}

/// Logger forwarding to `tracing`, used when no caller is waiting on progress.
#[derive(Debug, Clone)]
pub struct TracingLogger {
    operation: String,
}

impl TracingLogger {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
        }
    }
}

impl OperationLogger for TracingLogger {
    fn log(&self, message: &str) {
        info!(operation = %self.operation, "{}", message);
    }

    fn warn(&self, message: &str) {
        warn!(operation = %self.operation, "{}", message);
    }

    fn error(&self, message: &str) {
        error!(operation = %self.operation, "{}", message);
    }

    fn end(&self) {
        debug!(operation = %self.operation, "operation ended");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Log,
    Warn,
    Error,
}

/// Payload of a [`Channel::TaskLog`] event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLogLine {
    pub key: String,
    pub level: LogLevel,
    pub message: String,
}

/// Payload of a [`Channel::TaskEnd`] event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnd {
    pub key: String,
}

/// Logger streaming an operation's output to UI surfaces over the bus.
///
/// Lines go out on `task-log`, completion on `task-end`, both tagged with `key` so the
/// surface can route them to the right progress view.
pub struct EventLogger {
    key: String,
    event_bus: Arc<EventBus>,
}

impl EventLogger {
    pub fn new(key: impl Into<String>, event_bus: Arc<EventBus>) -> Self {
        Self {
            key: key.into(),
            event_bus,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn line(&self, level: LogLevel, message: &str) {
        let line = TaskLogLine {
            key: self.key.clone(),
            level,
            message: message.to_string(),
        };
        if let Err(e) = self.event_bus.publish(Channel::TaskLog, &line) {
            warn!("dropping task log line: {}", e);
        }
    }
}

impl OperationLogger for EventLogger {
    fn log(&self, message: &str) {
        self.line(LogLevel::Log, message);
    }

    fn warn(&self, message: &str) {
        self.line(LogLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.line(LogLevel::Error, message);
    }

    fn end(&self) {
        let end = TaskEnd {
            key: self.key.clone(),
        };
        if let Err(e) = self.event_bus.publish(Channel::TaskEnd, &end) {
            warn!("dropping task end: {}", e);
        }
    }
}

/// Wraps a caller's logger for the duration of one operation.
pub struct OperationScope {
    inner: Arc<dyn OperationLogger>,
    ended: AtomicBool,
}

impl OperationScope {
    pub fn new(inner: Arc<dyn OperationLogger>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            ended: AtomicBool::new(false),
        })
    }

    pub fn has_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Guard that ends the scope when dropped.
    pub fn guard(self: &Arc<Self>) -> EndGuard {
        EndGuard(self.clone())
    }
}

impl OperationLogger for OperationScope {
    fn log(&self, message: &str) {
        self.inner.log(message);
    }

    fn warn(&self, message: &str) {
        self.inner.warn(message);
    }

    fn error(&self, message: &str) {
        self.inner.error(message);
    }

    fn end(&self) {
        if !self.ended.swap(true, Ordering::SeqCst) {
            self.inner.end();
        }
    }
}

/// Calls [`OperationLogger::end`] on its scope when dropped.
pub struct EndGuard(Arc<OperationScope>);

impl Drop for EndGuard {
    fn drop(&mut self) {
        self.0.end();
    }
}
