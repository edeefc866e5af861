//! Where progress notifications go while a tool call is in flight.

use tracing::info;

use crate::normalizer::format_progress;
use crate::types::ProgressEvent;

/// Receives progress updates as they arrive
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, server: &str, tool: &str, event: &ProgressEvent);
}

/// Logs each update at info level
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgressSink;

impl ProgressSink for LogProgressSink {
    fn on_progress(&self, server: &str, tool: &str, event: &ProgressEvent) {
        match &event.message {
            Some(message) => info!(
                "Progress: {} [{}/{}] {}",
                format_progress(event),
                server,
                tool,
                message
            ),
            None => info!("Progress: {} [{}/{}]", format_progress(event), server, tool),
        }
    }
}
