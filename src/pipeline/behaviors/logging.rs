//! Request logging behavior.

use std::time::Duration;

use tokio::time::Instant;
use tracing::Instrument;

use crate::error::Result;
use crate::handler::Envelope;
use crate::message::AnyValue;
use crate::pipeline::{Continuation, OpenBehavior};

const TARGET: &str = "source_mediator::dispatch";

/// Default threshold above which a request is logged as slow.
pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_millis(500);

/// Wraps each request in a `tracing` span and logs its outcome.
///
/// Requests slower than the threshold are logged at `warn`, failures at
/// `error`, everything else at `debug`. Errors are returned unchanged.
#[derive(Debug, Clone)]
pub struct LoggingBehavior {
    slow_threshold: Duration,
}

impl LoggingBehavior {
    pub fn new(slow_threshold: Duration) -> Self {
        Self { slow_threshold }
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }
}

impl Default for LoggingBehavior {
    fn default() -> Self {
        Self::new(DEFAULT_SLOW_THRESHOLD)
    }
}

impl OpenBehavior for LoggingBehavior {
    async fn handle(&self, envelope: &Envelope, next: Continuation) -> Result<AnyValue> {
        let ctx = envelope.context();
        let span = tracing::debug_span!(
            target: TARGET,
            "mediator.send",
            call_id = ctx.call_id(),
            message = ctx.message_type().name(),
            response = ctx.response_type().map(|k| k.name()).unwrap_or("()"),
        );

        tracing::debug!(target: TARGET, parent: &span, "Handling request");
        let started = Instant::now();
        let result = next.run().instrument(span.clone()).await;
        let elapsed = started.elapsed();
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

        match &result {
            Ok(_) if elapsed >= self.slow_threshold => {
                tracing::warn!(target: TARGET, parent: &span, elapsed_ms, "Slow request");
            }
            Ok(_) => tracing::debug!(target: TARGET, parent: &span, elapsed_ms, "Handled request"),
            Err(e) if e.is_cancelled() => {
                tracing::debug!(target: TARGET, parent: &span, elapsed_ms, "Request cancelled");
            }
            Err(e) => {
                tracing::error!(target: TARGET, parent: &span, elapsed_ms, error = %e, "Request failed");
            }
        }

        result
    }
}
